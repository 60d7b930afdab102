//! Shared data models for the AquaFun service.
//!
//! This crate provides Serde-serializable types for:
//! - Job identifiers
//! - Job status snapshots served to the browser while a video is annotated

pub mod job;
pub mod job_status;

// Re-export common types
pub use job::{JobId, JobIdError};
pub use job_status::{JobSnapshot, JobStatus};
