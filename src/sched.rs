//! Delayed task scheduling shared by the sampler and the leak monitor.
//!
//! One worker thread per scheduler drains a deadline heap. Tasks on the
//! same scheduler never overlap, which keeps per-component state
//! single-writer without extra locking at the call sites.

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

enum Job {
    Once(Option<Box<dyn FnOnce() + Send>>),
    Every(Duration, Box<dyn FnMut() + Send>),
}

struct Entry {
    at: Instant,
    seq: u64,
    cancelled: Arc<AtomicBool>,
    job: Job,
}

// Min-heap on deadline; seq breaks ties in scheduling order.
impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.at == other.at && self.seq == other.seq
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other
            .at
            .cmp(&self.at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct State {
    queue: BinaryHeap<Entry>,
    /// Cancel flag of the task currently executing on the worker, if any.
    running: Option<Arc<AtomicBool>>,
    worker_thread: Option<ThreadId>,
    shutdown: bool,
    next_seq: u64,
}

struct Shared {
    state: Mutex<State>,
    cvar: Condvar,
}

/// Cancellation token for a scheduled task.
///
/// `cancel` is synchronous: once it returns, the task is guaranteed not
/// to run again, and any in-flight execution has finished (unless cancel
/// was issued from the task itself, which cannot wait for its own
/// completion and instead only suppresses rescheduling).
pub struct TaskHandle {
    cancelled: Arc<AtomicBool>,
    shared: Arc<Shared>,
}

impl TaskHandle {
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);

        let mut state = self.shared.state.lock().unwrap();
        if state.worker_thread == Some(thread::current().id()) {
            return;
        }
        while state
            .running
            .as_ref()
            .is_some_and(|r| Arc::ptr_eq(r, &self.cancelled))
        {
            state = self.shared.cvar.wait(state).unwrap();
        }
    }
}

/// Single-threaded delayed-task scheduler.
pub struct Scheduler {
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
}

impl Scheduler {
    pub fn new() -> Self {
        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                queue: BinaryHeap::new(),
                running: None,
                worker_thread: None,
                shutdown: false,
                next_seq: 0,
            }),
            cvar: Condvar::new(),
        });

        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name("vigil-sched".to_string())
            .spawn(move || worker_loop(&worker_shared))
            .expect("failed to spawn scheduler thread");

        Scheduler {
            shared,
            worker: Some(worker),
        }
    }

    /// Run `f` once after `delay`.
    pub fn schedule_once(&self, delay: Duration, f: impl FnOnce() + Send + 'static) -> TaskHandle {
        self.push(delay, Job::Once(Some(Box::new(f))))
    }

    /// Run `f` every `interval`, starting one interval from now. A tick
    /// that overruns delays the next deadline; ticks never overlap.
    pub fn schedule_repeating(
        &self,
        interval: Duration,
        f: impl FnMut() + Send + 'static,
    ) -> TaskHandle {
        self.push(interval, Job::Every(interval, Box::new(f)))
    }

    fn push(&self, delay: Duration, job: Job) -> TaskHandle {
        let cancelled = Arc::new(AtomicBool::new(false));
        let mut state = self.shared.state.lock().unwrap();
        let seq = state.next_seq;
        state.next_seq += 1;
        state.queue.push(Entry {
            at: Instant::now() + delay,
            seq,
            cancelled: Arc::clone(&cancelled),
            job,
        });
        drop(state);
        self.shared.cvar.notify_all();

        TaskHandle {
            cancelled,
            shared: Arc::clone(&self.shared),
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        {
            let mut state = self.shared.state.lock().unwrap();
            state.shutdown = true;
            state.queue.clear();
        }
        self.shared.cvar.notify_all();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn worker_loop(shared: &Shared) {
    let mut state = shared.state.lock().unwrap();
    state.worker_thread = Some(thread::current().id());

    loop {
        if state.shutdown {
            break;
        }

        let now = Instant::now();
        let next_deadline = state.queue.peek().map(|entry| entry.at);
        let due = match next_deadline {
            None => {
                state = shared.cvar.wait(state).unwrap();
                continue;
            }
            Some(at) if at > now => {
                state = shared.cvar.wait_timeout(state, at - now).unwrap().0;
                continue;
            }
            Some(_) => state.queue.pop().unwrap(),
        };

        let Entry {
            at,
            seq,
            cancelled,
            mut job,
        } = due;

        if cancelled.load(Ordering::Acquire) {
            continue;
        }

        state.running = Some(Arc::clone(&cancelled));
        drop(state);

        match &mut job {
            Job::Once(f) => {
                if let Some(f) = f.take() {
                    f();
                }
            }
            Job::Every(_, f) => f(),
        }

        state = shared.state.lock().unwrap();
        state.running = None;
        shared.cvar.notify_all();

        if let Job::Every(interval, _) = &job
            && !cancelled.load(Ordering::Acquire)
            && !state.shutdown
        {
            let next = (at + *interval).max(Instant::now());
            state.queue.push(Entry {
                at: next,
                seq,
                cancelled,
                job,
            });
        }
    }
}
