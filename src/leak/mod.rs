pub mod verifier;

pub use verifier::{
    CorrelationId, Entity, EntityId, LeakCountGauge, LeakMonitor, LeakRecord, Liveness, Probe,
};
