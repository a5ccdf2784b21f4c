// src/resource/local.rs

//! In-process actor used when no cloud control plane is configured.
//!
//! Resources become synced and ready after a fixed number of status reads,
//! which is enough to drive the whole engine end-to-end on a laptop.

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::anyhow;
use async_trait::async_trait;
use tracing::debug;
use uuid::Uuid;

use super::actor::{ActorError, ResourceActor};
use super::model::{Resource, ResourceRef};

#[derive(Debug, Clone)]
struct LocalObject {
    reads: u32,
    external_id: String,
}

#[derive(Debug)]
pub struct LocalActor {
    ready_after_reads: u32,
    objects: Mutex<HashMap<ResourceRef, LocalObject>>,
}

impl LocalActor {
    pub fn new(ready_after_reads: u32) -> Self {
        Self {
            ready_after_reads,
            objects: Mutex::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.objects.lock().map(|o| o.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn objects(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<ResourceRef, LocalObject>>, ActorError> {
        self.objects
            .lock()
            .map_err(|_| ActorError::Other(anyhow!("local actor state poisoned")))
    }
}

impl Default for LocalActor {
    fn default() -> Self {
        Self::new(2)
    }
}

#[async_trait]
impl ResourceActor for LocalActor {
    async fn create_resource(&self, resource: &Resource) -> Result<(), ActorError> {
        let mut objects = self.objects()?;
        objects
            .entry(resource.reference.clone())
            .or_insert_with(|| LocalObject {
                reads: 0,
                external_id: String::new(),
            });
        debug!(reference = %resource.reference, "local resource created");
        Ok(())
    }

    async fn update_resource_from_remote(&self, resource: &Resource) -> Result<Resource, ActorError> {
        let mut objects = self.objects()?;
        let object = objects
            .get_mut(&resource.reference)
            .ok_or_else(|| ActorError::NotFound(resource.reference.clone()))?;

        object.reads += 1;
        if object.reads >= self.ready_after_reads && object.external_id.is_empty() {
            object.external_id = format!("local-{}", Uuid::new_v4());
        }

        let ready = !object.external_id.is_empty();
        let mut updated = resource.clone();
        updated.synced = ready;
        updated.ready = ready;
        updated.external_id = object.external_id.clone();
        Ok(updated)
    }

    async fn delete_resource(&self, reference: &ResourceRef) -> Result<(), ActorError> {
        let mut objects = self.objects()?;
        match objects.remove(reference) {
            Some(_) => {
                debug!(%reference, "local resource deleted");
                Ok(())
            }
            None => Err(ActorError::NotFound(reference.clone())),
        }
    }
}
