//! Reliability patterns for the change feed
//!
//! This module provides:
//! - [`RetryPolicy`] - Configurable retry with exponential backoff

mod retry;

pub use retry::RetryPolicy;
