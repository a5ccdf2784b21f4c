// src/workflow/mod.rs

//! Durable workflows of typed tasks.
//!
//! - [`model`]: tasks, edges, payloads and retry policy.
//! - [`handler`]: typed handlers and the opaque-payload wrapper the
//!   processor drives.
//! - [`processor`]: claims tasks and advances their state machine.
//! - [`lifecycle`]: creating and cancelling workflows.
//! - [`backoff`], [`merge`], [`task_log`]: helpers for the above.

pub mod backoff;
pub mod handler;
pub mod lifecycle;
pub mod merge;
pub mod model;
pub mod processor;
pub mod task_log;

pub use handler::{HandlerError, HandlerRegistry, TaskHandler, TaskState};
pub use model::{
    Payload, PayloadType, RetrySettings, TaskSpec, TaskStatus, TaskType, Workflow, WorkflowSpec,
    WorkflowTask,
};
pub use processor::{CycleReport, TaskProcessor};
