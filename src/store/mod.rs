// src/store/mod.rs

//! Persistence boundary.
//!
//! Everything the engine reads or writes goes through a [`Transaction`]
//! opened with an explicit [`IsolationLevel`]. Dropping a transaction
//! without [`Transaction::commit`] discards its writes.
//!
//! [`memory::MemoryStore`] is the in-process implementation used by the
//! binary and the tests.

pub mod memory;

use async_trait::async_trait;
use uuid::Uuid;

use crate::automation::model::{AutomationStatus, CloudAutomation, RunRecord};
use crate::errors::Result;
use crate::resource::model::{Cloud, Resource, ResourceStatus};
use crate::resource::quota::{Quota, QuotaKind};
use crate::resource::tree::TreeNode;
use crate::workflow::model::{TaskStatus, Workflow, WorkflowTask};

pub use memory::MemoryStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IsolationLevel {
    /// Best-effort background scans.
    ReadUncommitted,
    /// Task state transitions.
    ReadCommitted,
    /// Quota and provisioning changes that must not interleave.
    Serializable,
}

#[async_trait]
pub trait Store: Send + Sync + 'static {
    type Tx: Transaction + 'static;

    async fn begin(&self, isolation: IsolationLevel) -> Result<Self::Tx>;
}

#[async_trait]
pub trait Transaction:
    TaskRepository
    + WorkflowRepository
    + ResourceRepository
    + AutomationRepository
    + QuotaRepository
    + RunRecordRepository
    + Send
{
    async fn commit(self) -> Result<()>;
}

#[async_trait]
pub trait TaskRepository {
    /// Unclaimed tasks in `statuses` matching `cleaned_up`, locked for the
    /// rest of the transaction. Rows locked by another transaction are
    /// skipped, as are RETRYING tasks still inside their backoff.
    async fn list_actual_tasks(
        &mut self,
        worker: Option<&str>,
        cleaned_up: bool,
        statuses: &[TaskStatus],
    ) -> Result<Vec<WorkflowTask>>;

    /// Terminal, not yet cleaned up, unclaimed tasks whose whole workflow
    /// is terminal. Locked like [`TaskRepository::list_actual_tasks`].
    async fn list_cleanup_tasks(&mut self) -> Result<Vec<WorkflowTask>>;

    async fn set_workflow_task_on_worker(
        &mut self,
        ids: &[Uuid],
        worker: Option<&str>,
    ) -> Result<()>;

    /// Merge completed predecessors' outputs into `task.input`.
    async fn ensure_workflow_task_input(&mut self, task: &mut WorkflowTask) -> Result<()>;

    async fn save_workflow_task(&mut self, task: &WorkflowTask) -> Result<()>;

    /// Move WAITING successors of `task` whose predecessors are all
    /// COMPLETED to PENDING. Returns the ids that moved.
    async fn set_children_tasks_as_pending(&mut self, task: &WorkflowTask) -> Result<Vec<Uuid>>;

    /// Cancel every WAITING task downstream of `task`.
    async fn cancel_waiting_descendants(&mut self, task: &WorkflowTask) -> Result<Vec<Uuid>>;

    async fn get_workflow_task(&mut self, id: Uuid) -> Result<WorkflowTask>;
}

#[async_trait]
pub trait WorkflowRepository {
    async fn create_workflow(&mut self, workflow: &Workflow) -> Result<()>;

    async fn get_workflow(&mut self, id: Uuid) -> Result<Workflow>;

    /// Cancel every non-terminal task of the workflow.
    async fn mark_workflow_as_canceled(&mut self, id: Uuid) -> Result<Workflow>;
}

#[async_trait]
pub trait ResourceRepository {
    async fn insert_resource(&mut self, resource: &Resource) -> Result<()>;

    async fn update_resource(&mut self, resource: &Resource) -> Result<()>;

    /// Tree under `root_id` restricted to `statuses`; empty means any.
    async fn get_resource_tree(
        &mut self,
        root_id: Uuid,
        statuses: &[ResourceStatus],
    ) -> Result<TreeNode>;
}

#[async_trait]
pub trait AutomationRepository {
    async fn create_automation(&mut self, automation: &CloudAutomation) -> Result<()>;

    async fn get_automation(&mut self, id: Uuid) -> Result<CloudAutomation>;

    /// IDLE and RUNNING automations.
    async fn list_active_automations(&mut self) -> Result<Vec<CloudAutomation>>;

    async fn update_automation_status(&mut self, id: Uuid, status: AutomationStatus) -> Result<()>;
}

#[async_trait]
pub trait QuotaRepository {
    async fn find_quota(&mut self, cloud: Cloud, kind: QuotaKind) -> Result<Quota>;

    async fn upsert_quota(&mut self, quota: &Quota) -> Result<()>;

    async fn increment_quota(&mut self, cloud: Cloud, kind: QuotaKind, amount: u32) -> Result<()>;

    /// Saturates at zero.
    async fn decrement_quota(&mut self, cloud: Cloud, kind: QuotaKind, amount: u32) -> Result<()>;
}

#[async_trait]
pub trait RunRecordRepository {
    async fn save_run_record(&mut self, record: &RunRecord) -> Result<()>;

    async fn get_run_record(&mut self, id: Uuid) -> Result<RunRecord>;
}
