use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use cloudbench::errors::CloudbenchError;
use cloudbench::workflow::{HandlerError, PayloadType, TaskHandler, TaskState, TaskStatus};
use serde::{Deserialize, Serialize};

pub const SCRIPTED_DEPLOYMENT_ID: &str = "test-deployment-id";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScriptedInput {
    pub label: String,
    /// Filled from a completed predecessor's output.
    pub deployment_id: Option<String>,
}

impl PayloadType for ScriptedInput {
    const TYPE_TAG: &'static str = "scripted_input";
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScriptedOutput {
    pub deployment_id: String,
}

impl PayloadType for ScriptedOutput {
    const TYPE_TAG: &'static str = "scripted_output";
}

/// What one `start` call does.
#[derive(Debug, Clone)]
pub enum StartStep {
    Succeed,
    Fail(String),
    Temporary(String),
}

#[derive(Debug, Default)]
struct Script {
    starts: Mutex<VecDeque<StartStep>>,
    statuses: Mutex<VecDeque<Result<TaskStatus, String>>>,
    start_calls: AtomicU32,
    status_calls: AtomicU32,
    cleanup_calls: AtomicU32,
    seen_inputs: Mutex<Vec<ScriptedInput>>,
    status_delay: Mutex<Option<Duration>>,
}

/// A handler that:
/// - plays back scripted `start` outcomes, succeeding once they run out
/// - plays back scripted `status` answers, COMPLETED once they run out
/// - optionally sleeps in `status` so concurrent tasks overlap
/// - counts every call so tests can assert on them
///
/// Clones share the script.
#[derive(Debug, Clone, Default)]
pub struct ScriptedHandler {
    script: Arc<Script>,
}

impl ScriptedHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_starts(self, steps: impl IntoIterator<Item = StartStep>) -> Self {
        self.script.starts.lock().unwrap().extend(steps);
        self
    }

    pub fn with_statuses(self, statuses: impl IntoIterator<Item = TaskStatus>) -> Self {
        self.script
            .statuses
            .lock()
            .unwrap()
            .extend(statuses.into_iter().map(Ok));
        self
    }

    pub fn with_status_error(self, reason: &str) -> Self {
        self.script
            .statuses
            .lock()
            .unwrap()
            .push_back(Err(reason.to_string()));
        self
    }

    /// Sleep for `delay` before answering each `status` call.
    pub fn with_status_delay(self, delay: Duration) -> Self {
        *self.script.status_delay.lock().unwrap() = Some(delay);
        self
    }

    pub fn start_calls(&self) -> u32 {
        self.script.start_calls.load(Ordering::SeqCst)
    }

    pub fn status_calls(&self) -> u32 {
        self.script.status_calls.load(Ordering::SeqCst)
    }

    pub fn cleanup_calls(&self) -> u32 {
        self.script.cleanup_calls.load(Ordering::SeqCst)
    }

    /// Inputs `start` was called with, in call order.
    pub fn seen_inputs(&self) -> Vec<ScriptedInput> {
        self.script.seen_inputs.lock().unwrap().clone()
    }
}

#[async_trait]
impl TaskHandler for ScriptedHandler {
    type Input = ScriptedInput;
    type Output = ScriptedOutput;

    async fn start(&self, input: &ScriptedInput) -> Result<ScriptedOutput, HandlerError> {
        self.script.start_calls.fetch_add(1, Ordering::SeqCst);
        self.script.seen_inputs.lock().unwrap().push(input.clone());

        let step = self.script.starts.lock().unwrap().pop_front();
        match step.unwrap_or(StartStep::Succeed) {
            StartStep::Succeed => Ok(ScriptedOutput {
                deployment_id: SCRIPTED_DEPLOYMENT_ID.to_string(),
            }),
            StartStep::Fail(reason) => Err(HandlerError::Failed(CloudbenchError::Other(
                anyhow::anyhow!(reason),
            ))),
            StartStep::Temporary(reason) => Err(HandlerError::Temporary(reason)),
        }
    }

    async fn status(
        &self,
        state: &mut TaskState<ScriptedInput, ScriptedOutput>,
    ) -> Result<TaskStatus, HandlerError> {
        self.script.status_calls.fetch_add(1, Ordering::SeqCst);

        let delay = *self.script.status_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let answer = self.script.statuses.lock().unwrap().pop_front();
        match answer.unwrap_or(Ok(TaskStatus::Completed)) {
            Ok(status) => {
                if status == TaskStatus::Completed {
                    state.output.deployment_id = format!("{}-status", state.output.deployment_id);
                }
                Ok(status)
            }
            Err(reason) => Err(HandlerError::Failed(CloudbenchError::Other(
                anyhow::anyhow!(reason),
            ))),
        }
    }

    async fn cleanup(
        &self,
        _state: &mut TaskState<ScriptedInput, ScriptedOutput>,
    ) -> Result<(), HandlerError> {
        self.script.cleanup_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
