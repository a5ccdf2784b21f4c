use std::collections::HashSet;
use std::sync::Mutex;

use async_trait::async_trait;
use cloudbench::resource::actor::{ActorError, ResourceActor};
use cloudbench::resource::model::{Resource, ResourceRef};

#[derive(Debug, Default)]
struct FakeState {
    live: HashSet<ResourceRef>,
    created: Vec<ResourceRef>,
    deleted: Vec<ResourceRef>,
    ready: bool,
    fail_creates_of: Option<String>,
}

/// A scriptable actor that:
/// - records every create and delete it is asked for
/// - reports live resources as ready (or not) depending on `set_ready`
/// - answers `NotFound` for anything it does not hold
#[derive(Debug, Default)]
pub struct FakeActor {
    state: Mutex<FakeState>,
}

impl FakeActor {
    /// Resources are ready as soon as they are created.
    pub fn ready() -> Self {
        let actor = Self::default();
        actor.set_ready(true);
        actor
    }

    /// Resources stay unready until `set_ready(true)`.
    pub fn pending() -> Self {
        Self::default()
    }

    pub fn set_ready(&self, ready: bool) {
        self.state.lock().unwrap().ready = ready;
    }

    /// Make creates of `kind` fail with a non-retryable error.
    pub fn fail_creates_of(&self, kind: &str) {
        self.state.lock().unwrap().fail_creates_of = Some(kind.to_string());
    }

    /// Drop a resource behind the engine's back.
    pub fn forget(&self, reference: &ResourceRef) {
        self.state.lock().unwrap().live.remove(reference);
    }

    pub fn created(&self) -> Vec<ResourceRef> {
        self.state.lock().unwrap().created.clone()
    }

    pub fn deleted(&self) -> Vec<ResourceRef> {
        self.state.lock().unwrap().deleted.clone()
    }

    pub fn live_count(&self) -> usize {
        self.state.lock().unwrap().live.len()
    }
}

#[async_trait]
impl ResourceActor for FakeActor {
    async fn create_resource(&self, resource: &Resource) -> Result<(), ActorError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_creates_of.as_deref() == Some(resource.reference.kind.as_str()) {
            return Err(ActorError::Other(anyhow::anyhow!(
                "scripted create failure for {}",
                resource.reference
            )));
        }
        state.created.push(resource.reference.clone());
        state.live.insert(resource.reference.clone());
        Ok(())
    }

    async fn update_resource_from_remote(&self, resource: &Resource) -> Result<Resource, ActorError> {
        let state = self.state.lock().unwrap();
        if !state.live.contains(&resource.reference) {
            return Err(ActorError::NotFound(resource.reference.clone()));
        }

        let mut updated = resource.clone();
        updated.synced = state.ready;
        updated.ready = state.ready;
        updated.external_id = if state.ready {
            format!("fake-{}", resource.reference.name)
        } else {
            String::new()
        };
        Ok(updated)
    }

    async fn delete_resource(&self, reference: &ResourceRef) -> Result<(), ActorError> {
        let mut state = self.state.lock().unwrap();
        if !state.live.remove(reference) {
            return Err(ActorError::NotFound(reference.clone()));
        }
        state.deleted.push(reference.clone());
        Ok(())
    }
}
