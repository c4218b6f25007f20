//! Run execution for task graphs.
//!
//! [`LocalRunner`] drives a [`crate::graph::TaskGraph`] to completion through a
//! [`TaskExecutor`], recording per-task outcomes in a [`RunState`].

pub mod executor;
pub mod types;

pub use executor::{LocalRunner, TaskExecutor};
pub use types::{RunState, RunStatus, TaskRecord, TaskStatus};
