//! Memory sampling and leak diagnosis

pub mod leak;
pub mod sampler;
pub mod source;

pub use leak::{ConsumerTally, LeakMode, LeakPolicy, LeakReport, ThresholdBreach, TopConsumer};
pub use sampler::{
    MemorySampler, RecordedSeries, SamplerConfig, SamplerHandle, SamplerOutput, SeriesRecorder,
};
pub use source::{MemoryReading, MemorySource, ProcStatm, SiteCounters, SiteTotals, TrackedSource};
