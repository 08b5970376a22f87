//! featureloop - session-bounded feature tracking for autonomous implementers
//!
//! Work is broken into small features with explicit verification steps. The
//! registry sequences them through a strict lifecycle, the validation loop
//! gates acceptance, and the router turns incoming requests into batches of
//! features.

pub mod cli;
pub mod config;
pub mod error;
pub mod feature;
pub mod knowledge;
pub mod ralph;
pub mod router;
pub mod session_log;
pub mod store;

pub use error::{BuilderError, Result};
