//! AquaFun HTTP server.
//!
//! This crate provides:
//! - Video upload and background annotation jobs
//! - Job status polling, cancellation and result playback/download
//! - Rate limiting and security headers
//! - Prometheus metrics

pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod services;
pub mod state;

pub use config::{ApiConfig, PipelineSettings};
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use services::{JobReaper, JobRegistry, JobRunner};
pub use state::AppState;
