//! Reliability patterns for job execution
//!
//! This module provides:
//! - [`BackoffPolicy`] - Failure backoff with an optional auto-disable threshold

mod backoff;

pub use backoff::BackoffPolicy;
