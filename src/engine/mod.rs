// src/engine/mod.rs

//! Long-running shell of cloudbench.
//!
//! - [`ticker`]: single-flight periodic loops with a failure budget.
//! - [`runtime`]: wires config, store, processor and supervisor, and runs
//!   them once or until shutdown.

pub mod runtime;
pub mod ticker;

pub use runtime::Runtime;
pub use ticker::{LoopHandle, spawn_periodic};
