pub mod fps;
pub mod providers;
pub mod sampler;

pub use fps::{FrameClock, FrameRateGauge};
pub use providers::{Gauge, ProcessCpuGauge, ResidentMemoryGauge, SamplerSources};
pub use sampler::{MetricsHistory, MetricsSampler, SampleSnapshot, SamplerConfig};
