// src/tasks/collect_results.rs

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::automation::model::RunStatus;
use crate::errors::CloudbenchError;
use crate::store::{IsolationLevel, RunRecordRepository, Store};
use crate::workflow::{HandlerError, PayloadType, TaskHandler, TaskState, TaskStatus};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CollectRunResultsInput {
    pub run_id: Option<Uuid>,
}

impl PayloadType for CollectRunResultsInput {
    const TYPE_TAG: &'static str = "collect_run_results_input";
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CollectRunResultsOutput {}

impl PayloadType for CollectRunResultsOutput {
    const TYPE_TAG: &'static str = "collect_run_results_output";
}

/// Waits until the workload reports its run as no longer IDLE.
pub struct CollectRunResults<S: Store> {
    store: Arc<S>,
}

impl<S: Store> CollectRunResults<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl<S: Store> TaskHandler for CollectRunResults<S> {
    type Input = CollectRunResultsInput;
    type Output = CollectRunResultsOutput;

    async fn start(&self, _input: &CollectRunResultsInput) -> Result<CollectRunResultsOutput, HandlerError> {
        Ok(CollectRunResultsOutput::default())
    }

    async fn status(
        &self,
        state: &mut TaskState<CollectRunResultsInput, CollectRunResultsOutput>,
    ) -> Result<TaskStatus, HandlerError> {
        let run_id = state.input.run_id.ok_or_else(|| {
            CloudbenchError::ConfigError("collect_run_results task has no run_id".into())
        })?;

        let mut tx = self.store.begin(IsolationLevel::ReadCommitted).await?;
        let record = match tx.get_run_record(run_id).await {
            Ok(record) => record,
            Err(CloudbenchError::NotFound { .. }) => {
                return Err(HandlerError::temporary(format!("run record {run_id} not written yet")));
            }
            Err(err) => return Err(err.into()),
        };

        debug!(%run_id, status = ?record.status, "run record observed");
        if record.status == RunStatus::Idle {
            Ok(TaskStatus::Running)
        } else {
            Ok(TaskStatus::Completed)
        }
    }

    async fn cleanup(
        &self,
        _state: &mut TaskState<CollectRunResultsInput, CollectRunResultsOutput>,
    ) -> Result<(), HandlerError> {
        Ok(())
    }
}
