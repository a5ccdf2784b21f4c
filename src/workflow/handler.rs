// src/workflow/handler.rs

//! Typed task handlers behind an opaque-payload seam.
//!
//! A [`TaskHandler`] is written against concrete input/output types. The
//! processor only sees [`TaskWrapper`]s, which decode the stored payloads
//! once, run the handler, and encode the (possibly updated) state back.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

use super::model::{Payload, PayloadType, TaskStatus, TaskType, WorkflowTask};
use crate::errors::{CloudbenchError, Result};

#[derive(Debug, Error)]
pub enum HandlerError {
    /// The outcome could not be observed this cycle; try again later
    /// without changing the task's status.
    #[error("temporarily unavailable: {0}")]
    Temporary(String),

    #[error(transparent)]
    Failed(#[from] CloudbenchError),
}

impl HandlerError {
    pub fn temporary(reason: impl fmt::Display) -> Self {
        HandlerError::Temporary(reason.to_string())
    }

    pub fn is_temporary(&self) -> bool {
        matches!(self, HandlerError::Temporary(_))
    }
}

impl From<anyhow::Error> for HandlerError {
    fn from(err: anyhow::Error) -> Self {
        HandlerError::Failed(CloudbenchError::Other(err))
    }
}

/// Decoded input/output of a running task.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskState<I, O> {
    pub input: I,
    pub output: O,
}

#[async_trait]
pub trait TaskHandler: Send + Sync + 'static {
    type Input: PayloadType + Serialize + DeserializeOwned + Send + Sync + 'static;
    type Output: PayloadType + Serialize + DeserializeOwned + Default + Send + Sync + 'static;

    async fn start(&self, input: &Self::Input) -> Result<Self::Output, HandlerError>;

    async fn status(
        &self,
        state: &mut TaskState<Self::Input, Self::Output>,
    ) -> Result<TaskStatus, HandlerError>;

    /// Must be safe to call again after a partial failure.
    async fn cleanup(
        &self,
        state: &mut TaskState<Self::Input, Self::Output>,
    ) -> Result<(), HandlerError>;
}

/// What the processor drives: a handler bound to one task's state.
#[async_trait]
pub trait TaskWrapper: Send {
    async fn start(&mut self) -> Result<(), HandlerError>;
    async fn status(&mut self) -> Result<TaskStatus, HandlerError>;
    async fn cleanup(&mut self) -> Result<(), HandlerError>;

    fn input(&self) -> Result<Payload>;
    fn output(&self) -> Result<Payload>;
}

struct TypedWrapper<H: TaskHandler> {
    handler: Arc<H>,
    state: TaskState<H::Input, H::Output>,
}

#[async_trait]
impl<H: TaskHandler> TaskWrapper for TypedWrapper<H> {
    async fn start(&mut self) -> Result<(), HandlerError> {
        self.state.output = self.handler.start(&self.state.input).await?;
        Ok(())
    }

    async fn status(&mut self) -> Result<TaskStatus, HandlerError> {
        self.handler.status(&mut self.state).await
    }

    async fn cleanup(&mut self) -> Result<(), HandlerError> {
        self.handler.cleanup(&mut self.state).await
    }

    fn input(&self) -> Result<Payload> {
        Payload::of(&self.state.input)
    }

    fn output(&self) -> Result<Payload> {
        Payload::of(&self.state.output)
    }
}

pub trait TaskWrapperBuilder: Send + Sync {
    fn wrap(&self, task: &WorkflowTask) -> Result<Box<dyn TaskWrapper>>;
}

struct HandlerBuilder<H>(Arc<H>);

impl<H: TaskHandler> TaskWrapperBuilder for HandlerBuilder<H> {
    fn wrap(&self, task: &WorkflowTask) -> Result<Box<dyn TaskWrapper>> {
        let input = task
            .input
            .decode::<H::Input>()?
            .ok_or_else(|| CloudbenchError::PayloadMismatch {
                expected: <H::Input as PayloadType>::TYPE_TAG.to_string(),
                actual: "<empty>".to_string(),
            })?;
        let output = task.output.decode::<H::Output>()?.unwrap_or_default();

        Ok(Box::new(TypedWrapper {
            handler: Arc::clone(&self.0),
            state: TaskState { input, output },
        }))
    }
}

/// Task type to handler dispatch table.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    builders: HashMap<TaskType, Arc<dyn TaskWrapperBuilder>>,
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("task_types", &self.task_types())
            .finish()
    }
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<H: TaskHandler>(mut self, task_type: TaskType, handler: H) -> Self {
        self.builders
            .insert(task_type, Arc::new(HandlerBuilder(Arc::new(handler))));
        self
    }

    pub fn task_types(&self) -> Vec<TaskType> {
        let mut types: Vec<_> = self.builders.keys().copied().collect();
        types.sort_by_key(|t| t.as_str());
        types
    }

    pub fn wrap(&self, task: &WorkflowTask) -> Result<Box<dyn TaskWrapper>> {
        self.builders
            .get(&task.task_type)
            .ok_or_else(|| CloudbenchError::NoHandler(task.task_type.to_string()))?
            .wrap(task)
    }
}
