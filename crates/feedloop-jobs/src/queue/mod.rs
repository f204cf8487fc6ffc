//! Job queue layer
//!
//! This module provides:
//! - [`JobQueue`] trait, the claim protocol the worker pool drives
//! - [`InMemoryJobQueue`] for tests and single-process deployments

mod memory;
mod store;

pub use memory::InMemoryJobQueue;
pub use store::{JobQueue, QueueError};
