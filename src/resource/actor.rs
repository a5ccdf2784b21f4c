// src/resource/actor.rs

use async_trait::async_trait;
use thiserror::Error;

use super::model::{Resource, ResourceRef};

#[derive(Debug, Error)]
pub enum ActorError {
    #[error("resource not found: {0}")]
    NotFound(ResourceRef),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ActorError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ActorError::NotFound(_))
    }
}

/// The declarative layer that actually materialises resources.
///
/// `update_resource_from_remote` returns the resource with the remote view
/// of `synced`, `ready` and `external_id` filled in, and must answer
/// [`ActorError::NotFound`] for resources that no longer exist.
#[async_trait]
pub trait ResourceActor: Send + Sync {
    async fn create_resource(&self, resource: &Resource) -> Result<(), ActorError>;

    async fn update_resource_from_remote(&self, resource: &Resource) -> Result<Resource, ActorError>;

    async fn delete_resource(&self, reference: &ResourceRef) -> Result<(), ActorError>;
}
