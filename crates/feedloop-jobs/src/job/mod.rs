//! Job records and handler-facing types
//!
//! This module provides:
//! - [`Job`] - The durable unit of work with lease and failure bookkeeping
//! - [`JobOutcome`] - What a finished task reports back to the queue
//! - [`JobHandler`] / [`JobRouter`] - Execution of a claimed job
//! - [`TypedJob`] - Decoding of the opaque payload into a tagged enum

mod handler;
mod record;

pub use handler::{JobError, JobHandler, JobRouter, TypedJob};
pub use record::{Job, JobOutcome, NewJob};
