//! Background services.

pub mod job_logger;
pub mod job_reaper;
pub mod job_registry;
pub mod job_runner;

pub use job_logger::JobLogger;
pub use job_reaper::JobReaper;
pub use job_registry::{JobHandle, JobRegistry};
pub use job_runner::JobRunner;
