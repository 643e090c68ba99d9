//! Frame pacing counter.
//!
//! The host's render loop calls [`FrameClock::frame`] once per presented
//! frame; the clock accumulates frames over a report window and exposes
//! the last computed rate on demand. Until a full window has elapsed the
//! reported rate is 0.

use super::providers::Gauge;
use crate::error::Result;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

struct FrameWindow {
    window_start: Option<Instant>,
    frames: u32,
    fps: f64,
}

pub struct FrameClock {
    window: Mutex<FrameWindow>,
    /// Delay between rate updates. Longer windows mean more averaged numbers.
    report_interval: Duration,
}

impl FrameClock {
    pub fn new() -> Self {
        Self::with_report_interval(Duration::from_secs(1))
    }

    pub fn with_report_interval(report_interval: Duration) -> Self {
        FrameClock {
            window: Mutex::new(FrameWindow {
                window_start: None,
                frames: 0,
                fps: 0.0,
            }),
            report_interval,
        }
    }

    /// Record one presented frame. The first call after a report only
    /// opens the window; it is not counted as a frame.
    pub fn frame(&self) {
        let mut window = self.window.lock().unwrap();
        let now = Instant::now();

        let Some(start) = window.window_start else {
            window.window_start = Some(now);
            window.frames = 0;
            return;
        };

        window.frames += 1;
        let elapsed = now - start;
        if elapsed >= self.report_interval {
            window.fps = (f64::from(window.frames) / elapsed.as_secs_f64()).round();
            window.window_start = None;
            window.frames = 0;
        }
    }

    /// Last computed frame rate, 0 until the first full window.
    pub fn fps(&self) -> f64 {
        self.window.lock().unwrap().fps
    }
}

impl Default for FrameClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Adapter exposing a shared [`FrameClock`] as a sampler gauge.
pub struct FrameRateGauge(Arc<FrameClock>);

impl FrameRateGauge {
    pub fn new(clock: Arc<FrameClock>) -> Self {
        FrameRateGauge(clock)
    }
}

impl Gauge for FrameRateGauge {
    fn read(&mut self) -> Result<f64> {
        Ok(self.0.fps())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn reports_zero_before_first_window() {
        let clock = FrameClock::new();
        assert_eq!(clock.fps(), 0.0);
        clock.frame();
        assert_eq!(clock.fps(), 0.0);
    }

    #[test]
    fn computes_rate_after_full_window() {
        let clock = FrameClock::with_report_interval(Duration::from_millis(40));

        clock.frame(); // opens the window
        for _ in 0..20 {
            thread::sleep(Duration::from_millis(5));
            clock.frame();
        }

        let fps = clock.fps();
        assert!(fps > 0.0, "expected a computed rate, got {fps}");
        // ~5ms per frame is ~200 fps; leave wide margins for scheduling.
        assert!(fps < 1000.0);
    }

    #[test]
    fn gauge_reads_the_shared_clock() {
        let clock = Arc::new(FrameClock::with_report_interval(Duration::from_millis(20)));
        let mut gauge = FrameRateGauge::new(Arc::clone(&clock));
        assert_eq!(gauge.read().unwrap(), 0.0);

        clock.frame();
        thread::sleep(Duration::from_millis(30));
        clock.frame();
        assert!(gauge.read().unwrap() > 0.0);
    }
}
