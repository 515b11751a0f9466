//! # Rincon Common
//!
//! Shared plumbing for the el-rincon service worker crates.
//!
//! ## Features
//!
//! - Logging configuration and setup
//! - Deadline wrapper for async operations
//! - Retry with exponential backoff

use std::time::Duration;
use thiserror::Error;

pub mod logging;
pub mod retry;

pub use logging::{init_logging, LogConfig, LogFormat};
pub use retry::{retry_with_backoff, with_timeout, RetryConfig};

/// An operation did not settle before its deadline.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Operation timed out after {0:?}")]
pub struct TimeoutError(pub Duration);

impl TimeoutError {
    /// The deadline that elapsed.
    pub fn duration(&self) -> Duration {
        self.0
    }
}
