//! Frame pipeline: source, sampled annotation, sink.

pub mod driver;
pub mod memory;

pub use driver::{
    FailurePolicy, PipelineConfig, PipelineDriver, PipelineReport, DEFAULT_SAMPLE_INTERVAL,
};
pub use memory::{MemorySink, MemorySource};
