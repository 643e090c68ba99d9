//! Scalar measurement providers.
//!
//! Each gauge answers one question per tick (processor time, resident
//! memory, frame rate). A gauge that fails to read reports an error; the
//! sampler substitutes 0 for that tick and keeps going.

use super::fps::{FrameClock, FrameRateGauge};
use crate::error::{Error, Result};
use std::fs;
use std::sync::Arc;
use std::time::Instant;

/// A single scalar measurement source.
pub trait Gauge: Send {
    fn read(&mut self) -> Result<f64>;
}

/// The measurement sources feeding one sampler.
///
/// The leak gauge is optional: it is only meaningful when a
/// [`LeakMonitor`](crate::leak::LeakMonitor) runs in the same process.
pub struct SamplerSources {
    pub cpu: Box<dyn Gauge>,
    pub memory: Box<dyn Gauge>,
    pub fps: Box<dyn Gauge>,
    pub leaks: Option<Box<dyn Gauge>>,
}

impl SamplerSources {
    /// /proc-backed sources for an arbitrary process. Frame pacing is
    /// only observable in-process, so the frame channel stays at 0
    /// unless the returned clock is driven by a render loop.
    pub fn for_process(pid: u32) -> (Self, Arc<FrameClock>) {
        let clock = Arc::new(FrameClock::new());
        let sources = SamplerSources {
            cpu: Box::new(ProcessCpuGauge::new(pid)),
            memory: Box::new(ResidentMemoryGauge::new(pid)),
            fps: Box::new(FrameRateGauge::new(Arc::clone(&clock))),
            leaks: None,
        };
        (sources, clock)
    }

    /// Sources for the calling process itself.
    pub fn for_self() -> (Self, Arc<FrameClock>) {
        Self::for_process(std::process::id())
    }
}

/// Processor utilization across a process's threads, as a percentage.
///
/// Reads cumulative utime+stime from `/proc/<pid>/task/*/stat` and
/// reports the delta since the previous read over wall time. Threads
/// that accrued no processor time contribute nothing; the first read
/// has no baseline and reports 0.
pub struct ProcessCpuGauge {
    pid: u32,
    ticks_per_sec: f64,
    last: Option<(Instant, u64)>,
}

impl ProcessCpuGauge {
    pub fn new(pid: u32) -> Self {
        let hz = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };
        ProcessCpuGauge {
            pid,
            ticks_per_sec: if hz > 0 { hz as f64 } else { 100.0 },
            last: None,
        }
    }

    fn total_thread_ticks(&self) -> Result<u64> {
        let task_dir = format!("/proc/{}/task", self.pid);
        let entries = fs::read_dir(&task_dir).map_err(|e| {
            Error::Measurement(format!("cannot enumerate threads for PID {}: {}", self.pid, e))
        })?;

        let mut total = 0u64;
        for entry in entries.flatten() {
            // Threads may exit between readdir and read; skip them.
            let Ok(stat) = fs::read_to_string(entry.path().join("stat")) else {
                continue;
            };
            if let Some(ticks) = parse_stat_ticks(&stat) {
                total += ticks;
            }
        }
        Ok(total)
    }
}

impl Gauge for ProcessCpuGauge {
    fn read(&mut self) -> Result<f64> {
        let now = Instant::now();
        let ticks = self.total_thread_ticks()?;

        let usage = match self.last {
            Some((prev_at, prev_ticks)) => {
                let elapsed = now.duration_since(prev_at).as_secs_f64();
                if elapsed > 0.0 {
                    let delta = ticks.saturating_sub(prev_ticks) as f64;
                    delta / self.ticks_per_sec / elapsed * 100.0
                } else {
                    0.0
                }
            }
            None => 0.0,
        };

        self.last = Some((now, ticks));
        Ok(usage)
    }
}

/// Parse utime+stime out of a `/proc/.../stat` line. The comm field may
/// contain spaces, so fields are counted from the closing paren.
fn parse_stat_ticks(stat: &str) -> Option<u64> {
    let rest = stat.rsplit_once(')')?.1;
    let mut fields = rest.split_whitespace();
    // After ')': state is field 3, so utime (field 14) is at index 11.
    let utime: u64 = fields.nth(11)?.parse().ok()?;
    let stime: u64 = fields.next()?.parse().ok()?;
    Some(utime + stime)
}

/// Resident set size of a process, in MB, from `/proc/<pid>/statm`.
pub struct ResidentMemoryGauge {
    pid: u32,
    page_size: f64,
}

impl ResidentMemoryGauge {
    pub fn new(pid: u32) -> Self {
        let page = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        ResidentMemoryGauge {
            pid,
            page_size: if page > 0 { page as f64 } else { 4096.0 },
        }
    }
}

impl Gauge for ResidentMemoryGauge {
    fn read(&mut self) -> Result<f64> {
        let path = format!("/proc/{}/statm", self.pid);
        let statm = fs::read_to_string(&path).map_err(|e| {
            Error::Measurement(format!("cannot read statm for PID {}: {}", self.pid, e))
        })?;

        let resident_pages: f64 = statm
            .split_whitespace()
            .nth(1)
            .and_then(|f| f.parse().ok())
            .ok_or_else(|| Error::Measurement(format!("malformed statm for PID {}", self.pid)))?;

        Ok(resident_pages * self.page_size / (1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_stat_with_spaces_in_comm() {
        let stat = "1234 (tokio worker 1) S 1 1234 1234 0 -1 4194304 100 0 0 0 57 13 0 0 20 0 4 0 12345 1000000 250 18446744073709551615 1 1 0 0 0 0 0 0 0 0 0 0 17 3 0 0 0 0 0";
        assert_eq!(parse_stat_ticks(stat), Some(70));
    }

    #[test]
    fn rejects_malformed_stat() {
        assert_eq!(parse_stat_ticks("garbage"), None);
        assert_eq!(parse_stat_ticks("1 (x) S 1 2"), None);
    }

    #[test]
    fn cpu_gauge_reads_self() {
        let mut gauge = ProcessCpuGauge::new(std::process::id());
        // First read establishes the baseline.
        assert_eq!(gauge.read().unwrap(), 0.0);

        // Burn a little processor time, then read the delta.
        let mut acc = 0u64;
        for i in 0..2_000_000u64 {
            acc = acc.wrapping_add(i * i);
        }
        std::hint::black_box(acc);

        let usage = gauge.read().unwrap();
        assert!(usage >= 0.0);
    }

    #[test]
    fn memory_gauge_reads_self() {
        let mut gauge = ResidentMemoryGauge::new(std::process::id());
        let mb = gauge.read().unwrap();
        assert!(mb > 0.0, "resident size should be nonzero, got {mb}");
    }

    #[test]
    fn missing_process_is_a_measurement_error() {
        // PID 0 has no /proc entry visible to us.
        let mut cpu = ProcessCpuGauge::new(0);
        assert!(cpu.read().is_err());

        let mut mem = ResidentMemoryGauge::new(0);
        assert!(mem.read().is_err());
    }
}
