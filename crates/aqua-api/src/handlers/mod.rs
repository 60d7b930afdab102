//! HTTP handlers.

pub mod health;
pub mod jobs;
pub mod page;

pub use health::{health, ready};
