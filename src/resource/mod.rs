// src/resource/mod.rs

//! Externally managed infrastructure.
//!
//! - [`model`]: resources, clouds and VM requests.
//! - [`tree`]: parent/child traversal and readiness aggregation.
//! - [`actor`]: the external create/read/delete boundary, [`local`] is an
//!   in-process implementation of it.
//! - [`reconciler`]: converges deployments and trees against the actor.
//! - [`builder`], [`ips`], [`quota`]: turning a VM request into resources.

pub mod actor;
pub mod builder;
pub mod ips;
pub mod local;
pub mod model;
pub mod quota;
pub mod reconciler;
pub mod tree;

pub use actor::{ActorError, ResourceActor};
pub use builder::{Deployment, DeploymentBuilder};
pub use model::{Cloud, Resource, ResourceDag, ResourceRef, ResourceStatus, VmSpec};
pub use reconciler::Reconciler;
pub use tree::TreeNode;
