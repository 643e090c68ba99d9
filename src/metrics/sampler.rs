//! Periodic metrics sampling with bounded history and running extrema.

use super::providers::{Gauge, SamplerSources};
use crate::ring::RingBuffer;
use crate::sched::{Scheduler, TaskHandle};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const DEFAULT_HISTORY: usize = 120;

#[derive(Debug, Clone, Copy)]
pub struct SamplerConfig {
    /// Samples retained per channel.
    pub capacity: usize,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        SamplerConfig {
            capacity: DEFAULT_HISTORY,
        }
    }
}

/// One published measurement: current values plus running extrema.
///
/// `min_fps` stays at infinity until a nonzero frame rate has been
/// observed; zero readings never lower it. A sampler that has not ticked
/// yet reports the all-zero default.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SampleSnapshot {
    pub cpu: f64,
    pub memory_mb: f64,
    pub fps: f64,
    pub leaks: f64,
    pub max_cpu: f64,
    pub max_memory_mb: f64,
    pub min_fps: f64,
    pub max_fps: f64,
    pub max_leaks: f64,
}

/// Ordered per-channel history, oldest first.
#[derive(Debug, Clone, Default)]
pub struct MetricsHistory {
    pub cpu: Vec<f64>,
    pub memory_mb: Vec<f64>,
    pub fps: Vec<f64>,
    pub leaks: Vec<f64>,
}

struct Channel {
    ring: RingBuffer<f64>,
    current: f64,
    max: f64,
}

impl Channel {
    fn new(capacity: usize) -> Self {
        Channel {
            ring: RingBuffer::new(capacity),
            current: 0.0,
            max: 0.0,
        }
    }

    fn record(&mut self, value: f64) {
        self.current = value;
        self.ring.push(value);
        if value > self.max {
            self.max = value;
        }
    }
}

struct Channels {
    sources: SamplerSources,
    cpu: Channel,
    memory: Channel,
    fps: Channel,
    leaks: Channel,
    min_fps: f64,
}

type SampleCallback = Box<dyn Fn(&SampleSnapshot) + Send>;

struct Inner {
    channels: Mutex<Channels>,
    latest: Mutex<Option<SampleSnapshot>>,
    subscribers: Mutex<Vec<SampleCallback>>,
}

impl Inner {
    /// One read-compute-publish cycle. Runs on the scheduler worker, so
    /// ticks are strictly sequential.
    fn tick(&self) {
        let snapshot = {
            let mut ch = self.channels.lock().unwrap();

            let cpu = ch.sources.cpu.read().unwrap_or(0.0);
            ch.cpu.record(cpu);

            let memory = ch.sources.memory.read().unwrap_or(0.0);
            ch.memory.record(memory);

            let fps = ch.sources.fps.read().unwrap_or(0.0);
            ch.fps.record(fps);
            // A frame rate of exactly 0 means "not yet measured"; it must
            // not register as the minimum.
            if fps != 0.0 && fps < ch.min_fps {
                ch.min_fps = fps;
            }

            let leaks = match ch.sources.leaks.as_mut() {
                Some(gauge) => gauge.read().unwrap_or(0.0),
                None => 0.0,
            };
            ch.leaks.record(leaks);

            SampleSnapshot {
                cpu: ch.cpu.current,
                memory_mb: ch.memory.current,
                fps: ch.fps.current,
                leaks: ch.leaks.current,
                max_cpu: ch.cpu.max,
                max_memory_mb: ch.memory.max,
                min_fps: ch.min_fps,
                max_fps: ch.fps.max,
                max_leaks: ch.leaks.max,
            }
        };

        *self.latest.lock().unwrap() = Some(snapshot);

        for subscriber in self.subscribers.lock().unwrap().iter() {
            subscriber(&snapshot);
        }
    }
}

/// Periodic sampler over a set of [`SamplerSources`].
///
/// Each tick reads every gauge, appends to the per-channel ring buffers,
/// updates the running extrema and publishes a [`SampleSnapshot`] to all
/// subscribers on the tick thread.
pub struct MetricsSampler {
    inner: Arc<Inner>,
    sched: Scheduler,
    handle: Mutex<Option<TaskHandle>>,
}

impl MetricsSampler {
    pub fn new(sources: SamplerSources, config: SamplerConfig) -> Self {
        let capacity = config.capacity.max(1);
        MetricsSampler {
            inner: Arc::new(Inner {
                channels: Mutex::new(Channels {
                    sources,
                    cpu: Channel::new(capacity),
                    memory: Channel::new(capacity),
                    fps: Channel::new(capacity),
                    leaks: Channel::new(capacity),
                    min_fps: f64::INFINITY,
                }),
                latest: Mutex::new(None),
                subscribers: Mutex::new(Vec::new()),
            }),
            sched: Scheduler::new(),
            handle: Mutex::new(None),
        }
    }

    /// Begin sampling at the given cadence. No-op when already running.
    pub fn start(&self, interval: Duration) {
        let mut slot = self.handle.lock().unwrap();
        if slot.is_some() {
            return;
        }
        let inner = Arc::clone(&self.inner);
        *slot = Some(self.sched.schedule_repeating(interval, move || inner.tick()));
    }

    /// Halt sampling. Safe when not running. Synchronous: once this
    /// returns, no further snapshot is published.
    pub fn stop(&self) {
        let handle = self.handle.lock().unwrap().take();
        if let Some(handle) = handle {
            handle.cancel();
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.lock().unwrap().is_some()
    }

    /// Register a subscriber invoked once per tick.
    pub fn on_sample(&self, f: impl Fn(&SampleSnapshot) + Send + 'static) {
        self.inner.subscribers.lock().unwrap().push(Box::new(f));
    }

    /// Most recent published snapshot, or the zero snapshot before the
    /// first tick.
    pub fn current_snapshot(&self) -> SampleSnapshot {
        self.inner.latest.lock().unwrap().unwrap_or_default()
    }

    /// Ordered ring-buffer contents for every channel.
    pub fn history(&self) -> MetricsHistory {
        let ch = self.inner.channels.lock().unwrap();
        MetricsHistory {
            cpu: ch.cpu.ring.snapshot(),
            memory_mb: ch.memory.ring.snapshot(),
            fps: ch.fps.ring.snapshot(),
            leaks: ch.leaks.ring.snapshot(),
        }
    }
}

impl Drop for MetricsSampler {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, Result};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    /// Gauge replaying a scripted sequence; `None` entries simulate a
    /// failed read. The last reading repeats once the script is spent.
    struct Scripted(VecDeque<Option<f64>>);

    impl Scripted {
        fn new(values: &[Option<f64>]) -> Box<dyn Gauge> {
            Box::new(Scripted(values.iter().copied().collect()))
        }
    }

    impl Gauge for Scripted {
        fn read(&mut self) -> Result<f64> {
            let reading = if self.0.len() > 1 {
                self.0.pop_front().unwrap()
            } else {
                self.0.front().copied().unwrap_or(Some(0.0))
            };
            reading.ok_or_else(|| Error::Measurement("scripted failure".into()))
        }
    }

    fn sampler_with(
        cpu: &[Option<f64>],
        memory: &[Option<f64>],
        fps: &[Option<f64>],
    ) -> MetricsSampler {
        let sources = SamplerSources {
            cpu: Scripted::new(cpu),
            memory: Scripted::new(memory),
            fps: Scripted::new(fps),
            leaks: None,
        };
        MetricsSampler::new(sources, SamplerConfig { capacity: 8 })
    }

    fn tick(sampler: &MetricsSampler, times: usize) {
        for _ in 0..times {
            sampler.inner.tick();
        }
    }

    #[test]
    fn zero_snapshot_before_first_tick() {
        let sampler = sampler_with(&[Some(1.0)], &[Some(1.0)], &[Some(1.0)]);
        assert_eq!(sampler.current_snapshot(), SampleSnapshot::default());
    }

    #[test]
    fn failed_cpu_read_substitutes_zero() {
        let sampler = sampler_with(
            &[Some(5.0), None, Some(15.0)],
            &[Some(1.0)],
            &[Some(60.0)],
        );
        tick(&sampler, 3);

        let snap = sampler.current_snapshot();
        assert_eq!(snap.cpu, 15.0);
        assert_eq!(snap.max_cpu, 15.0);
        assert_eq!(sampler.history().cpu, vec![5.0, 0.0, 15.0]);
    }

    #[test]
    fn max_extrema_are_non_decreasing() {
        let sampler = sampler_with(
            &[Some(40.0), Some(10.0), Some(25.0)],
            &[Some(512.0), Some(256.0), Some(300.0)],
            &[Some(60.0)],
        );

        let mut prev_cpu = 0.0;
        let mut prev_mem = 0.0;
        for _ in 0..3 {
            sampler.inner.tick();
            let snap = sampler.current_snapshot();
            assert!(snap.max_cpu >= prev_cpu);
            assert!(snap.max_memory_mb >= prev_mem);
            prev_cpu = snap.max_cpu;
            prev_mem = snap.max_memory_mb;
        }

        let snap = sampler.current_snapshot();
        assert_eq!(snap.max_cpu, 40.0);
        assert_eq!(snap.max_memory_mb, 512.0);
    }

    #[test]
    fn zero_fps_never_registers_as_minimum() {
        let sampler = sampler_with(
            &[Some(1.0)],
            &[Some(1.0)],
            &[Some(0.0), Some(60.0), Some(30.0), Some(0.0), Some(45.0)],
        );

        tick(&sampler, 1);
        assert_eq!(sampler.current_snapshot().min_fps, f64::INFINITY);

        tick(&sampler, 2);
        assert_eq!(sampler.current_snapshot().min_fps, 30.0);

        // The zero reading must not lower the minimum.
        tick(&sampler, 2);
        let snap = sampler.current_snapshot();
        assert_eq!(snap.min_fps, 30.0);
        assert_eq!(snap.max_fps, 60.0);
        assert_eq!(snap.fps, 45.0);
    }

    #[test]
    fn history_is_bounded_and_ordered() {
        let sampler = sampler_with(&[Some(7.0)], &[Some(3.0)], &[Some(60.0)]);
        tick(&sampler, 20);

        let history = sampler.history();
        assert_eq!(history.cpu.len(), 8);
        assert!(history.cpu.iter().all(|&v| v == 7.0));
        assert_eq!(history.leaks.len(), 20.min(8));
    }

    #[test]
    fn every_subscriber_sees_every_tick() {
        let sampler = sampler_with(&[Some(1.0)], &[Some(2.0)], &[Some(3.0)]);
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        let f = Arc::clone(&first);
        sampler.on_sample(move |_| {
            f.fetch_add(1, Ordering::SeqCst);
        });
        let s = Arc::clone(&second);
        sampler.on_sample(move |snap| {
            assert_eq!(snap.memory_mb, 2.0);
            s.fetch_add(1, Ordering::SeqCst);
        });

        tick(&sampler, 5);
        assert_eq!(first.load(Ordering::SeqCst), 5);
        assert_eq!(second.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn start_is_idempotent_and_stop_halts_publishing() {
        let sampler = sampler_with(&[Some(9.0)], &[Some(9.0)], &[Some(9.0)]);
        let ticks = Arc::new(AtomicUsize::new(0));
        let t = Arc::clone(&ticks);
        sampler.on_sample(move |_| {
            t.fetch_add(1, Ordering::SeqCst);
        });

        sampler.start(Duration::from_millis(10));
        sampler.start(Duration::from_millis(1)); // ignored: already running
        assert!(sampler.is_running());

        thread::sleep(Duration::from_millis(100));
        sampler.stop();
        assert!(!sampler.is_running());
        let at_stop = ticks.load(Ordering::SeqCst);
        assert!(at_stop >= 1);

        // The timer keeps advancing, but nothing may be published.
        thread::sleep(Duration::from_millis(100));
        assert_eq!(ticks.load(Ordering::SeqCst), at_stop);

        // stop() again is harmless.
        sampler.stop();
    }
}
