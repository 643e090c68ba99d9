//! Deferred leak verification.
//!
//! When an entity is detached from its owning structure, a check is
//! scheduled one grace period later. If the entity is still orphaned at
//! fire time (and the process stayed in the foreground for the whole
//! interval) it is reported as a suspected leak and kept on the books
//! until its owner signals destruction, which resolves the record.
//!
//! The monitor never extends an entity's lifetime: liveness is observed
//! through a caller-supplied probe, and destruction through an explicit
//! notification carrying the correlation id of the report.

use crate::error::Result;
use crate::metrics::Gauge;
use crate::sched::{Scheduler, TaskHandle};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(1);

/// Opaque comparable identity of a tracked entity.
pub type EntityId = u64;

/// Stable identifier linking a leak report to its resolution event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CorrelationId(pub u64);

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Answer of a liveness probe against the external ownership graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    /// Reachable from the live graph (or re-attached meanwhile).
    Attached,
    /// Removed from the graph but still alive: a leak candidate.
    Detached,
    /// Already destroyed; nothing to report.
    Gone,
}

pub type Probe = Arc<dyn Fn() -> Result<Liveness> + Send + Sync>;

/// A detachable object under observation.
///
/// The monitor holds only this descriptor, never the object itself.
#[derive(Clone)]
pub struct Entity {
    pub id: EntityId,
    /// Type-level name, matched exactly against the ignore list.
    pub kind: String,
    /// Human-readable description used in reports.
    pub label: String,
    pub probe: Probe,
    /// Detaching a parent also schedules checks for these.
    pub children: Vec<Entity>,
}

impl Entity {
    pub fn new(
        id: EntityId,
        kind: impl Into<String>,
        label: impl Into<String>,
        probe: Probe,
    ) -> Self {
        Entity {
            id,
            kind: kind.into(),
            label: label.into(),
            probe,
            children: Vec::new(),
        }
    }

    pub fn with_children(mut self, children: Vec<Entity>) -> Self {
        self.children = children;
        self
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entity")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("label", &self.label)
            .field("children", &self.children.len())
            .finish()
    }
}

/// One confirmed leak, kept for the lifetime of the session.
#[derive(Debug, Clone)]
pub struct LeakRecord {
    pub correlation: CorrelationId,
    pub entity: EntityId,
    pub kind: String,
    pub details: String,
    pub detected_at: DateTime<Utc>,
    /// Opaque visual snapshot captured at detection time, if a capture
    /// hook is installed.
    pub snapshot: Option<Vec<u8>>,
    pub resolved: bool,
    /// Time from detection to destruction, set once resolved.
    pub resolution: Option<Duration>,
    detected_instant: Instant,
}

impl LeakRecord {
    pub fn is_active(&self) -> bool {
        !self.resolved
    }
}

type LeakCallback = Box<dyn Fn(&LeakRecord) + Send>;
type CaptureFn = Box<dyn Fn(&Entity) -> Option<Vec<u8>> + Send>;

struct PendingCheck {
    generation: u64,
    handle: TaskHandle,
}

struct MonitorInner {
    grace: Mutex<Duration>,
    last_backgrounded: Mutex<Option<Instant>>,
    pending: Mutex<HashMap<EntityId, PendingCheck>>,
    records: Mutex<Vec<LeakRecord>>,
    ignored_kinds: Mutex<Vec<String>>,
    capture: Mutex<Option<CaptureFn>>,
    detected_subs: Mutex<Vec<LeakCallback>>,
    resolved_subs: Mutex<Vec<LeakCallback>>,
    next_correlation: AtomicU64,
    next_generation: AtomicU64,
}

impl MonitorInner {
    fn verify(inner: &Arc<MonitorInner>, entity: &Entity, scheduled_at: Instant, generation: u64) {
        {
            let mut pending = inner.pending.lock().unwrap();
            if pending
                .get(&entity.id)
                .is_some_and(|p| p.generation == generation)
            {
                pending.remove(&entity.id);
            }
        }

        // A background transition anywhere in the grace interval voids
        // the check; it is not rescheduled on return to foreground.
        if inner
            .last_backgrounded
            .lock()
            .unwrap()
            .is_some_and(|at| at > scheduled_at)
        {
            return;
        }

        match (entity.probe)() {
            // Fail safe toward "attached": an inconsistent graph must not
            // produce a false positive.
            Err(e) => {
                eprintln!("[warn] vigil: liveness probe failed for {}: {}", entity.label, e);
            }
            Ok(Liveness::Attached) | Ok(Liveness::Gone) => {}
            Ok(Liveness::Detached) => inner.report(entity),
        }
    }

    fn report(&self, entity: &Entity) {
        // At most one active record per entity.
        if self
            .records
            .lock()
            .unwrap()
            .iter()
            .any(|r| r.entity == entity.id && !r.resolved)
        {
            return;
        }

        let snapshot = match self.capture.lock().unwrap().as_ref() {
            Some(capture) => capture(entity),
            None => None,
        };

        let record = LeakRecord {
            correlation: CorrelationId(self.next_correlation.fetch_add(1, Ordering::Relaxed) + 1),
            entity: entity.id,
            kind: entity.kind.clone(),
            details: entity.label.clone(),
            detected_at: Utc::now(),
            snapshot,
            resolved: false,
            resolution: None,
            detected_instant: Instant::now(),
        };

        self.records.lock().unwrap().push(record.clone());
        for subscriber in self.detected_subs.lock().unwrap().iter() {
            subscriber(&record);
        }
    }
}

/// Detachment-driven leak monitor.
pub struct LeakMonitor {
    inner: Arc<MonitorInner>,
    sched: Scheduler,
}

impl LeakMonitor {
    pub fn new() -> Self {
        Self::with_grace_period(DEFAULT_GRACE_PERIOD)
    }

    pub fn with_grace_period(grace: Duration) -> Self {
        LeakMonitor {
            inner: Arc::new(MonitorInner {
                grace: Mutex::new(grace),
                last_backgrounded: Mutex::new(None),
                pending: Mutex::new(HashMap::new()),
                records: Mutex::new(Vec::new()),
                ignored_kinds: Mutex::new(Vec::new()),
                capture: Mutex::new(None),
                detected_subs: Mutex::new(Vec::new()),
                resolved_subs: Mutex::new(Vec::new()),
                next_correlation: AtomicU64::new(0),
                next_generation: AtomicU64::new(0),
            }),
            sched: Scheduler::new(),
        }
    }

    pub fn grace_period(&self) -> Duration {
        *self.inner.grace.lock().unwrap()
    }

    /// Delay between detachment and the orphan check. Applies to checks
    /// scheduled after the call.
    pub fn set_grace_period(&self, grace: Duration) {
        *self.inner.grace.lock().unwrap() = grace;
    }

    /// Entities whose kind matches are never tracked.
    pub fn ignore_kind(&self, kind: impl Into<String>) {
        self.inner.ignored_kinds.lock().unwrap().push(kind.into());
    }

    pub fn ignored_kinds(&self) -> Vec<String> {
        self.inner.ignored_kinds.lock().unwrap().clone()
    }

    pub fn on_leak_detected(&self, f: impl Fn(&LeakRecord) + Send + 'static) {
        self.inner.detected_subs.lock().unwrap().push(Box::new(f));
    }

    pub fn on_leak_resolved(&self, f: impl Fn(&LeakRecord) + Send + 'static) {
        self.inner.resolved_subs.lock().unwrap().push(Box::new(f));
    }

    /// Install a hook that captures an opaque visual snapshot of an
    /// entity at detection time.
    pub fn set_capture_hook(&self, f: impl Fn(&Entity) -> Option<Vec<u8>> + Send + 'static) {
        *self.inner.capture.lock().unwrap() = Some(Box::new(f));
    }

    /// Lifecycle hook: the process just transitioned to the background.
    /// Checks scheduled before this instant are voided when they fire.
    pub fn note_backgrounded(&self) {
        *self.inner.last_backgrounded.lock().unwrap() = Some(Instant::now());
    }

    /// An entity (and, recursively, its children) was removed from its
    /// owning structure. Schedules a deferred orphan check per entity; a
    /// newer detach for the same id supersedes the pending check.
    pub fn on_detach(&self, entity: Entity) {
        self.detach_recursive(&entity);
    }

    fn detach_recursive(&self, entity: &Entity) {
        let ignored = self
            .inner
            .ignored_kinds
            .lock()
            .unwrap()
            .iter()
            .any(|k| *k == entity.kind);
        if !ignored {
            self.schedule_check(entity);
        }
        for child in &entity.children {
            self.detach_recursive(child);
        }
    }

    fn schedule_check(&self, entity: &Entity) {
        let scheduled_at = Instant::now();
        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);

        // Supersede: only the most recent request per entity may fire.
        // The old handle is cancelled outside the pending lock, since
        // cancel() waits for an in-flight check to finish.
        let previous = self.inner.pending.lock().unwrap().remove(&entity.id);
        if let Some(previous) = previous {
            previous.handle.cancel();
        }

        let inner = Arc::clone(&self.inner);
        let target = Entity {
            children: Vec::new(),
            ..entity.clone()
        };
        let handle = self.sched.schedule_once(self.grace_period(), move || {
            MonitorInner::verify(&inner, &target, scheduled_at, generation);
        });

        self.inner
            .pending
            .lock()
            .unwrap()
            .insert(entity.id, PendingCheck { generation, handle });
    }

    /// Destruction notification from the entity's owner. Resolves the
    /// matching report; a no-op when the entity was never flagged or the
    /// record is already resolved.
    pub fn on_destroyed(&self, entity: EntityId, correlation: CorrelationId) {
        let resolved = {
            let mut records = self.inner.records.lock().unwrap();
            match records
                .iter_mut()
                .find(|r| r.correlation == correlation && r.entity == entity && !r.resolved)
            {
                Some(record) => {
                    record.resolved = true;
                    record.resolution = Some(record.detected_instant.elapsed());
                    Some(record.clone())
                }
                None => None,
            }
        };

        if let Some(record) = resolved {
            for subscriber in self.inner.resolved_subs.lock().unwrap().iter() {
                subscriber(&record);
            }
        }
    }

    /// Full session history, detection order.
    pub fn records(&self) -> Vec<LeakRecord> {
        self.inner.records.lock().unwrap().clone()
    }

    pub fn unresolved(&self) -> Vec<LeakRecord> {
        self.inner
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.is_active())
            .cloned()
            .collect()
    }

    pub fn active_leak_count(&self) -> usize {
        self.inner
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.is_active())
            .count()
    }

    /// Clear the session history. No undo; pending checks are unaffected.
    pub fn reset(&self) {
        self.inner.records.lock().unwrap().clear();
    }

    /// A sampler gauge reading the active leak count.
    pub fn leak_gauge(&self) -> LeakCountGauge {
        LeakCountGauge(Arc::clone(&self.inner))
    }
}

impl Default for LeakMonitor {
    fn default() -> Self {
        Self::new()
    }
}

/// Number of unresolved leaks, as a metrics channel.
pub struct LeakCountGauge(Arc<MonitorInner>);

impl Gauge for LeakCountGauge {
    fn read(&mut self) -> Result<f64> {
        let count = self
            .0
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| !r.resolved)
            .count();
        Ok(count as f64)
    }
}
