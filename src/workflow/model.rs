// src/workflow/model.rs

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::dag::{Dag, DagEdge, DagNode};
use crate::errors::{CloudbenchError, Result};
use crate::types::HumanDuration;

/// Lifecycle of a workflow task.
///
/// `Waiting` tasks have unfinished predecessors and are not claimable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Waiting,
    Pending,
    Retrying,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub const ACTIVE: [TaskStatus; 3] = [TaskStatus::Pending, TaskStatus::Retrying, TaskStatus::Running];
    pub const TERMINAL: [TaskStatus; 3] =
        [TaskStatus::Completed, TaskStatus::Failed, TaskStatus::Cancelled];

    pub fn is_terminal(self) -> bool {
        Self::TERMINAL.contains(&self)
    }

    /// Statuses the processor picks up for start/status work.
    pub fn is_active(self) -> bool {
        Self::ACTIVE.contains(&self)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Waiting => "WAITING",
            TaskStatus::Pending => "PENDING",
            TaskStatus::Retrying => "RETRYING",
            TaskStatus::Running => "RUNNING",
            TaskStatus::Completed => "COMPLETED",
            TaskStatus::Failed => "FAILED",
            TaskStatus::Cancelled => "CANCELLED",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    DeployDatabase,
    DeployWorkload,
    CollectRunResults,
}

impl TaskType {
    pub const ALL: [TaskType; 3] = [
        TaskType::DeployDatabase,
        TaskType::DeployWorkload,
        TaskType::CollectRunResults,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TaskType::DeployDatabase => "deploy_database",
            TaskType::DeployWorkload => "deploy_workload",
            TaskType::CollectRunResults => "collect_run_results",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        TaskType::ALL
            .into_iter()
            .find(|t| t.as_str() == s.trim())
            .ok_or_else(|| {
                let known: Vec<_> = TaskType::ALL.iter().map(|t| t.as_str()).collect();
                format!("unknown task type: {s} (expected one of {})", known.join(", "))
            })
    }
}

/// How long to wait before retrying a failed start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackoffPolicy {
    Constant {
        interval: HumanDuration,
    },
    Exponential {
        initial_interval: HumanDuration,
        max_interval: HumanDuration,
        /// Zero means no limit.
        max_elapsed_time: HumanDuration,
        multiplier: f64,
        randomization_factor: f64,
    },
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        BackoffPolicy::Exponential {
            initial_interval: HumanDuration::from_secs(10),
            max_interval: HumanDuration::from_secs(300),
            max_elapsed_time: HumanDuration::from_secs(300),
            multiplier: 30.0,
            randomization_factor: 0.1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RetrySettings {
    pub policy: BackoffPolicy,
    /// Zero means unlimited.
    pub max_attempts: u32,
}

/// Where a task is in its retry curve.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RetryState {
    pub attempt: u32,
    /// Last un-jittered backoff interval; the next one grows from it.
    pub interval: Duration,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub first_failure_at: Option<DateTime<Utc>>,
}

/// Typed payloads carry a stable tag so a stored payload can be checked
/// before it is decoded.
pub trait PayloadType {
    const TYPE_TAG: &'static str;
}

/// Opaque task input/output as persisted.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Payload {
    pub type_tag: String,
    pub value: serde_json::Value,
}

impl Payload {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.type_tag.is_empty() && self.value.is_null()
    }

    pub fn of<T: PayloadType + Serialize>(value: &T) -> Result<Self> {
        Ok(Self {
            type_tag: T::TYPE_TAG.to_string(),
            value: serde_json::to_value(value)?,
        })
    }

    /// Decode into `T`; an empty payload decodes to `None`.
    pub fn decode<T: PayloadType + DeserializeOwned>(&self) -> Result<Option<T>> {
        if self.is_empty() {
            return Ok(None);
        }
        if self.type_tag != T::TYPE_TAG {
            return Err(CloudbenchError::PayloadMismatch {
                expected: T::TYPE_TAG.to_string(),
                actual: self.type_tag.clone(),
            });
        }
        Ok(Some(serde_json::from_value(self.value.clone())?))
    }
}

/// One structured line in a task's own log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub at: DateTime<Utc>,
    pub level: String,
    pub message: String,
    pub fields: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowTask {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub task_type: TaskType,
    pub status: TaskStatus,
    pub input: Payload,
    pub output: Payload,
    pub retry_settings: RetrySettings,
    pub retry_state: RetryState,
    /// Instance id of the processor that claimed the task.
    pub on_worker: Option<String>,
    pub cleaned_up: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub logs: Vec<LogRecord>,
}

impl WorkflowTask {
    pub fn new(
        workflow_id: Uuid,
        task_type: TaskType,
        input: Payload,
        retry_settings: RetrySettings,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            workflow_id,
            task_type,
            status: TaskStatus::Waiting,
            input,
            output: Payload::empty(),
            retry_settings,
            retry_state: RetryState::default(),
            on_worker: None,
            cleaned_up: false,
            created_at: now,
            updated_at: now,
            logs: Vec::new(),
        }
    }

    /// Claimable right now: RETRYING tasks wait out their backoff.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        match (self.status, self.retry_state.next_attempt_at) {
            (TaskStatus::Retrying, Some(at)) => at <= now,
            _ => true,
        }
    }
}

impl DagNode for WorkflowTask {
    type Id = Uuid;

    fn node_id(&self) -> Uuid {
        self.id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkflowEdge {
    pub workflow_id: Uuid,
    pub from_id: Uuid,
    pub to_id: Uuid,
}

impl DagEdge<Uuid> for WorkflowEdge {
    fn from_id(&self) -> Uuid {
        self.from_id
    }

    fn to_id(&self) -> Uuid {
        self.to_id
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    pub id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub tasks: Vec<WorkflowTask>,
    pub edges: Vec<WorkflowEdge>,
}

impl Dag for Workflow {
    type Node = WorkflowTask;
    type Edge = WorkflowEdge;

    fn nodes(&self) -> &[WorkflowTask] {
        &self.tasks
    }

    fn edges(&self) -> &[WorkflowEdge] {
        &self.edges
    }
}

impl Workflow {
    pub fn task(&self, id: Uuid) -> Option<&WorkflowTask> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn is_terminal(&self) -> bool {
        self.all_by(|t| t.status.is_terminal())
    }

    pub fn is_cleaned_up(&self) -> bool {
        self.all_by(|t| t.status.is_terminal() && t.cleaned_up)
    }
}

/// Blueprint a workflow is instantiated from.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct WorkflowSpec {
    pub name: String,
    pub tasks: Vec<TaskSpec>,
    /// `(from_key, to_key)` pairs.
    pub edges: Vec<(String, String)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TaskSpec {
    pub key: String,
    pub task_type: TaskType,
    pub input: Payload,
    pub retry: RetrySettings,
}

impl WorkflowSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn task(mut self, spec: TaskSpec) -> Self {
        self.tasks.push(spec);
        self
    }

    pub fn edge(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.edges.push((from.into(), to.into()));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct DbRef {
        name: String,
    }

    impl PayloadType for DbRef {
        const TYPE_TAG: &'static str = "db_ref";
    }

    #[derive(Debug, Serialize, Deserialize)]
    struct Other;

    impl PayloadType for Other {
        const TYPE_TAG: &'static str = "other";
    }

    #[test]
    fn payload_decodes_matching_tag_only() {
        let payload = Payload::of(&DbRef { name: "db".into() }).unwrap();
        assert_eq!(payload.value, json!({"name": "db"}));
        assert_eq!(
            payload.decode::<DbRef>().unwrap(),
            Some(DbRef { name: "db".into() })
        );
        assert!(matches!(
            payload.decode::<Other>(),
            Err(CloudbenchError::PayloadMismatch { .. })
        ));
        assert_eq!(Payload::empty().decode::<DbRef>().unwrap(), None);
    }

    #[test]
    fn retrying_task_waits_for_backoff() {
        let mut task = WorkflowTask::new(
            Uuid::new_v4(),
            TaskType::DeployDatabase,
            Payload::empty(),
            RetrySettings::default(),
        );
        let now = Utc::now();
        task.status = TaskStatus::Retrying;
        task.retry_state.next_attempt_at = Some(now + chrono::Duration::seconds(5));
        assert!(!task.is_due(now));
        assert!(task.is_due(now + chrono::Duration::seconds(6)));

        task.status = TaskStatus::Running;
        assert!(task.is_due(now));
    }

    #[test]
    fn task_type_parses_snake_case() {
        assert_eq!("deploy_workload".parse::<TaskType>(), Ok(TaskType::DeployWorkload));
        assert!("deploy".parse::<TaskType>().is_err());
    }
}
