// src/dag/mod.rs

//! Generic DAG algorithms.
//!
//! - [`graph`] holds the [`Dag`] trait (cycle detection, Kahn layering,
//!   layer lookups by predicate) and a simple owned [`Graph`].
//!
//! Workflows (tasks + edges) and resource deployments both implement
//! [`Dag`], so the same layering decides which tasks may start and whether
//! a deployment is ready.

pub mod graph;

use thiserror::Error;

pub use graph::{Dag, DagEdge, DagNode, Edge, Graph};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DagError {
    #[error("cycle detected in DAG")]
    CycleDetected,

    #[error("no layer found")]
    NoLayerFound,
}
