// src/store/memory.rs

//! In-process [`Store`].
//!
//! A transaction reads from a snapshot taken at `begin` and records every
//! write twice: applied to the snapshot right away (so it reads its own
//! writes) and journaled for replay against the shared tables on commit.
//!
//! Claim queries (`list_actual_tasks`, `list_cleanup_tasks`) read the
//! latest committed rows instead of the snapshot and lock what they return
//! until the transaction ends; rows locked elsewhere are skipped. Commit
//! applies the journal before the locks are released, so the next claimer
//! always sees the claim write. Serializable transactions additionally run
//! one at a time.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::OwnedMutexGuard;
use tracing::trace;
use uuid::Uuid;

use super::{
    AutomationRepository, IsolationLevel, QuotaRepository, ResourceRepository,
    RunRecordRepository, Store, TaskRepository, Transaction, WorkflowRepository,
};
use crate::automation::model::{AutomationStatus, CloudAutomation, RunRecord};
use crate::errors::{CloudbenchError, Result};
use crate::resource::model::{Cloud, Resource, ResourceStatus};
use crate::resource::quota::{Quota, QuotaKind};
use crate::resource::tree::TreeNode;
use crate::workflow::merge::merge_outputs_into_input;
use crate::workflow::model::{TaskStatus, Workflow, WorkflowEdge, WorkflowTask};

#[derive(Debug, Clone)]
struct WorkflowRow {
    id: Uuid,
    name: String,
    created_at: DateTime<Utc>,
    task_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, Default)]
struct Tables {
    workflows: HashMap<Uuid, WorkflowRow>,
    tasks: HashMap<Uuid, WorkflowTask>,
    edges: Vec<WorkflowEdge>,
    resource_order: Vec<Uuid>,
    resources: HashMap<Uuid, Resource>,
    automations: HashMap<Uuid, CloudAutomation>,
    quotas: HashMap<(Cloud, QuotaKind), Quota>,
    run_records: HashMap<Uuid, RunRecord>,
}

impl Tables {
    /// Tasks in workflow creation order, then task order within a workflow.
    fn tasks_in_order(&self) -> Vec<&WorkflowTask> {
        let mut workflows: Vec<&WorkflowRow> = self.workflows.values().collect();
        workflows.sort_by_key(|w| (w.created_at, w.id));
        workflows
            .into_iter()
            .flat_map(|w| w.task_ids.iter())
            .filter_map(|id| self.tasks.get(id))
            .collect()
    }

    fn workflow_is_terminal(&self, workflow_id: Uuid) -> bool {
        self.workflows.get(&workflow_id).is_some_and(|w| {
            w.task_ids
                .iter()
                .filter_map(|id| self.tasks.get(id))
                .all(|t| t.status.is_terminal())
        })
    }

    fn predecessors(&self, task: &WorkflowTask) -> Vec<&WorkflowTask> {
        self.edges
            .iter()
            .filter(|e| e.workflow_id == task.workflow_id && e.to_id == task.id)
            .filter_map(|e| self.tasks.get(&e.from_id))
            .collect()
    }

    fn successor_ids(&self, task_id: Uuid) -> Vec<Uuid> {
        self.edges
            .iter()
            .filter(|e| e.from_id == task_id)
            .map(|e| e.to_id)
            .collect()
    }

    fn workflow(&self, id: Uuid) -> Result<Workflow> {
        let row = self
            .workflows
            .get(&id)
            .ok_or_else(|| CloudbenchError::not_found("workflow", id))?;
        Ok(Workflow {
            id: row.id,
            name: row.name.clone(),
            created_at: row.created_at,
            tasks: row
                .task_ids
                .iter()
                .filter_map(|t| self.tasks.get(t).cloned())
                .collect(),
            edges: self
                .edges
                .iter()
                .filter(|e| e.workflow_id == id)
                .copied()
                .collect(),
        })
    }
}

/// Every predecessor of `child` is COMPLETED, counting `completed` as done
/// even when its own write has not landed yet.
fn predecessors_done(tables: &Tables, child: &WorkflowTask, completed: Uuid) -> bool {
    tables
        .predecessors(child)
        .iter()
        .all(|p| p.id == completed || p.status == TaskStatus::Completed)
}

#[derive(Debug, Default)]
struct Shared {
    tables: Tables,
    locks: HashSet<Uuid>,
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    shared: Arc<Mutex<Shared>>,
    serial: Arc<tokio::sync::Mutex<()>>,
}

impl fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shared = lock(&self.shared);
        f.debug_struct("MemoryStore")
            .field("workflows", &shared.tables.workflows.len())
            .field("tasks", &shared.tables.tasks.len())
            .field("resources", &shared.tables.resources.len())
            .field("locked_rows", &shared.locks.len())
            .finish()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    type Tx = MemoryTx;

    async fn begin(&self, isolation: IsolationLevel) -> Result<MemoryTx> {
        let serial = match isolation {
            IsolationLevel::Serializable => Some(Arc::clone(&self.serial).lock_owned().await),
            IsolationLevel::ReadCommitted | IsolationLevel::ReadUncommitted => None,
        };
        let view = lock(&self.shared).tables.clone();
        trace!(?isolation, "transaction started");

        Ok(MemoryTx {
            isolation,
            shared: Arc::clone(&self.shared),
            view,
            journal: Vec::new(),
            locked: Vec::new(),
            _serial: serial,
        })
    }
}

type Mutation = Box<dyn Fn(&mut Tables) + Send + Sync>;

pub struct MemoryTx {
    isolation: IsolationLevel,
    shared: Arc<Mutex<Shared>>,
    view: Tables,
    journal: Vec<Mutation>,
    locked: Vec<Uuid>,
    _serial: Option<OwnedMutexGuard<()>>,
}

impl fmt::Debug for MemoryTx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryTx")
            .field("isolation", &self.isolation)
            .field("pending_writes", &self.journal.len())
            .field("locked_rows", &self.locked.len())
            .finish()
    }
}

impl Drop for MemoryTx {
    fn drop(&mut self) {
        if self.locked.is_empty() {
            return;
        }
        let mut shared = lock(&self.shared);
        for id in &self.locked {
            shared.locks.remove(id);
        }
    }
}

impl MemoryTx {
    fn write<F>(&mut self, mutation: F)
    where
        F: Fn(&mut Tables) + Send + Sync + 'static,
    {
        mutation(&mut self.view);
        self.journal.push(Box::new(mutation));
    }

    /// Lock and return the committed tasks matching `filter`.
    fn claim_where<F>(&mut self, filter: F) -> Vec<WorkflowTask>
    where
        F: Fn(&Tables, &WorkflowTask) -> bool,
    {
        let mut shared = lock(&self.shared);
        let Shared { tables, locks } = &mut *shared;

        let found: Vec<WorkflowTask> = tables
            .tasks_in_order()
            .into_iter()
            .filter(|t| !locks.contains(&t.id) && filter(tables, t))
            .cloned()
            .collect();
        for task in &found {
            locks.insert(task.id);
        }
        drop(shared);

        for task in &found {
            self.locked.push(task.id);
            self.view.tasks.insert(task.id, task.clone());
        }
        found
    }

    fn task(&self, id: Uuid) -> Result<&WorkflowTask> {
        self.view
            .tasks
            .get(&id)
            .ok_or_else(|| CloudbenchError::not_found("workflow task", id))
    }

    fn quota(&self, cloud: Cloud, kind: QuotaKind) -> Result<&Quota> {
        self.view
            .quotas
            .get(&(cloud, kind))
            .ok_or_else(|| CloudbenchError::not_found("quota", format!("{cloud}:{kind}")))
    }
}

#[async_trait]
impl Transaction for MemoryTx {
    async fn commit(mut self) -> Result<()> {
        let journal = std::mem::take(&mut self.journal);
        let writes = journal.len();
        {
            let mut shared = lock(&self.shared);
            for mutation in &journal {
                mutation(&mut shared.tables);
            }
        }
        trace!(isolation = ?self.isolation, writes, "transaction committed");
        Ok(())
    }
}

#[async_trait]
impl TaskRepository for MemoryTx {
    async fn list_actual_tasks(
        &mut self,
        worker: Option<&str>,
        cleaned_up: bool,
        statuses: &[TaskStatus],
    ) -> Result<Vec<WorkflowTask>> {
        let now = Utc::now();
        Ok(self.claim_where(|_, t| {
            t.on_worker.as_deref() == worker
                && t.cleaned_up == cleaned_up
                && statuses.contains(&t.status)
                && t.is_due(now)
        }))
    }

    async fn list_cleanup_tasks(&mut self) -> Result<Vec<WorkflowTask>> {
        Ok(self.claim_where(|tables, t| {
            t.on_worker.is_none()
                && !t.cleaned_up
                && t.status.is_terminal()
                && tables.workflow_is_terminal(t.workflow_id)
        }))
    }

    async fn set_workflow_task_on_worker(
        &mut self,
        ids: &[Uuid],
        worker: Option<&str>,
    ) -> Result<()> {
        let ids = ids.to_vec();
        let worker = worker.map(str::to_string);
        self.write(move |db| {
            for id in &ids {
                if let Some(task) = db.tasks.get_mut(id) {
                    task.on_worker = worker.clone();
                }
            }
        });
        Ok(())
    }

    async fn ensure_workflow_task_input(&mut self, task: &mut WorkflowTask) -> Result<()> {
        let outputs: Vec<_> = self
            .view
            .predecessors(task)
            .into_iter()
            .filter(|p| p.status == TaskStatus::Completed)
            .map(|p| p.output.clone())
            .collect();
        let copied = merge_outputs_into_input(&mut task.input, &outputs);
        trace!(task_id = %task.id, predecessors = outputs.len(), copied, "task input merged");
        Ok(())
    }

    async fn save_workflow_task(&mut self, task: &WorkflowTask) -> Result<()> {
        if !self.view.workflows.contains_key(&task.workflow_id) {
            return Err(CloudbenchError::not_found("workflow", task.workflow_id));
        }
        let task = task.clone();
        self.write(move |db| {
            db.tasks.insert(task.id, task.clone());
        });
        Ok(())
    }

    async fn set_children_tasks_as_pending(&mut self, task: &WorkflowTask) -> Result<Vec<Uuid>> {
        let waiting: Vec<Uuid> = self
            .view
            .successor_ids(task.id)
            .into_iter()
            .filter(|id| {
                self.view
                    .tasks
                    .get(id)
                    .is_some_and(|child| child.status == TaskStatus::Waiting)
            })
            .collect();

        // Sibling predecessors may complete in other open transactions, so
        // the gate is evaluated against the committed rows, both here and
        // again when the journal is replayed.
        let released: Vec<Uuid> = {
            let shared = lock(&self.shared);
            waiting
                .iter()
                .copied()
                .filter(|id| {
                    shared
                        .tables
                        .tasks
                        .get(id)
                        .is_some_and(|child| predecessors_done(&shared.tables, child, task.id))
                })
                .collect()
        };

        let now = Utc::now();
        let completed = task.id;
        self.write(move |db| {
            for id in &waiting {
                let ready = db.tasks.get(id).is_some_and(|child| {
                    child.status == TaskStatus::Waiting && predecessors_done(db, child, completed)
                });
                if let Some(child) = db.tasks.get_mut(id).filter(|_| ready) {
                    child.status = TaskStatus::Pending;
                    child.updated_at = now;
                }
            }
        });
        Ok(released)
    }

    async fn cancel_waiting_descendants(&mut self, task: &WorkflowTask) -> Result<Vec<Uuid>> {
        let mut seen = HashSet::new();
        let mut queue: VecDeque<Uuid> = self.view.successor_ids(task.id).into();
        let mut waiting = Vec::new();
        while let Some(id) = queue.pop_front() {
            if !seen.insert(id) {
                continue;
            }
            if self
                .view
                .tasks
                .get(&id)
                .is_some_and(|t| t.status == TaskStatus::Waiting)
            {
                waiting.push(id);
            }
            queue.extend(self.view.successor_ids(id));
        }

        let now = Utc::now();
        let ids = waiting.clone();
        self.write(move |db| {
            for id in &ids {
                if let Some(t) = db.tasks.get_mut(id) {
                    if t.status == TaskStatus::Waiting {
                        t.status = TaskStatus::Cancelled;
                        t.updated_at = now;
                    }
                }
            }
        });
        Ok(waiting)
    }

    async fn get_workflow_task(&mut self, id: Uuid) -> Result<WorkflowTask> {
        self.task(id).cloned()
    }
}

#[async_trait]
impl WorkflowRepository for MemoryTx {
    async fn create_workflow(&mut self, workflow: &Workflow) -> Result<()> {
        let workflow = workflow.clone();
        self.write(move |db| {
            db.workflows.insert(
                workflow.id,
                WorkflowRow {
                    id: workflow.id,
                    name: workflow.name.clone(),
                    created_at: workflow.created_at,
                    task_ids: workflow.tasks.iter().map(|t| t.id).collect(),
                },
            );
            for task in &workflow.tasks {
                db.tasks.insert(task.id, task.clone());
            }
            db.edges.extend(workflow.edges.iter().copied());
        });
        Ok(())
    }

    async fn get_workflow(&mut self, id: Uuid) -> Result<Workflow> {
        self.view.workflow(id)
    }

    async fn mark_workflow_as_canceled(&mut self, id: Uuid) -> Result<Workflow> {
        if !self.view.workflows.contains_key(&id) {
            return Err(CloudbenchError::not_found("workflow", id));
        }
        let now = Utc::now();
        self.write(move |db| {
            let ids = db
                .workflows
                .get(&id)
                .map(|w| w.task_ids.clone())
                .unwrap_or_default();
            for task_id in ids {
                if let Some(t) = db.tasks.get_mut(&task_id) {
                    if !t.status.is_terminal() {
                        t.status = TaskStatus::Cancelled;
                        t.updated_at = now;
                    }
                }
            }
        });
        self.view.workflow(id)
    }
}

#[async_trait]
impl ResourceRepository for MemoryTx {
    async fn insert_resource(&mut self, resource: &Resource) -> Result<()> {
        let resource = resource.clone();
        self.write(move |db| {
            if db.resources.insert(resource.id, resource.clone()).is_none() {
                db.resource_order.push(resource.id);
            }
        });
        Ok(())
    }

    async fn update_resource(&mut self, resource: &Resource) -> Result<()> {
        if !self.view.resources.contains_key(&resource.id) {
            return Err(CloudbenchError::not_found("resource", resource.id));
        }
        let resource = resource.clone();
        self.write(move |db| {
            db.resources.insert(resource.id, resource.clone());
        });
        Ok(())
    }

    async fn get_resource_tree(
        &mut self,
        root_id: Uuid,
        statuses: &[ResourceStatus],
    ) -> Result<TreeNode> {
        let rows = self
            .view
            .resource_order
            .iter()
            .filter_map(|id| self.view.resources.get(id))
            .filter(|r| statuses.is_empty() || statuses.contains(&r.status))
            .cloned();
        TreeNode::from_resources(root_id, rows)
            .ok_or_else(|| CloudbenchError::not_found("resource tree", root_id))
    }
}

#[async_trait]
impl AutomationRepository for MemoryTx {
    async fn create_automation(&mut self, automation: &CloudAutomation) -> Result<()> {
        let automation = automation.clone();
        self.write(move |db| {
            db.automations.insert(automation.id, automation.clone());
        });
        Ok(())
    }

    async fn get_automation(&mut self, id: Uuid) -> Result<CloudAutomation> {
        self.view
            .automations
            .get(&id)
            .cloned()
            .ok_or_else(|| CloudbenchError::not_found("automation", id))
    }

    async fn list_active_automations(&mut self) -> Result<Vec<CloudAutomation>> {
        let mut active: Vec<_> = self
            .view
            .automations
            .values()
            .filter(|a| a.status.is_active())
            .cloned()
            .collect();
        active.sort_by_key(|a| (a.created_at, a.id));
        Ok(active)
    }

    async fn update_automation_status(&mut self, id: Uuid, status: AutomationStatus) -> Result<()> {
        if !self.view.automations.contains_key(&id) {
            return Err(CloudbenchError::not_found("automation", id));
        }
        let now = Utc::now();
        self.write(move |db| {
            if let Some(a) = db.automations.get_mut(&id) {
                a.status = status;
                a.updated_at = now;
            }
        });
        Ok(())
    }
}

#[async_trait]
impl QuotaRepository for MemoryTx {
    async fn find_quota(&mut self, cloud: Cloud, kind: QuotaKind) -> Result<Quota> {
        self.quota(cloud, kind).cloned()
    }

    async fn upsert_quota(&mut self, quota: &Quota) -> Result<()> {
        let quota = quota.clone();
        self.write(move |db| {
            db.quotas.insert((quota.cloud, quota.kind), quota.clone());
        });
        Ok(())
    }

    async fn increment_quota(&mut self, cloud: Cloud, kind: QuotaKind, amount: u32) -> Result<()> {
        self.quota(cloud, kind)?;
        self.write(move |db| {
            if let Some(q) = db.quotas.get_mut(&(cloud, kind)) {
                q.current = q.current.saturating_add(amount);
            }
        });
        Ok(())
    }

    async fn decrement_quota(&mut self, cloud: Cloud, kind: QuotaKind, amount: u32) -> Result<()> {
        self.quota(cloud, kind)?;
        self.write(move |db| {
            if let Some(q) = db.quotas.get_mut(&(cloud, kind)) {
                q.current = q.current.saturating_sub(amount);
            }
        });
        Ok(())
    }
}

#[async_trait]
impl RunRecordRepository for MemoryTx {
    async fn save_run_record(&mut self, record: &RunRecord) -> Result<()> {
        let record = record.clone();
        self.write(move |db| {
            db.run_records.insert(record.id, record.clone());
        });
        Ok(())
    }

    async fn get_run_record(&mut self, id: Uuid) -> Result<RunRecord> {
        self.view
            .run_records
            .get(&id)
            .cloned()
            .ok_or_else(|| CloudbenchError::not_found("run record", id))
    }
}
