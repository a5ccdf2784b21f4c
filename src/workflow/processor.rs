// src/workflow/processor.rs

//! The task scheduling core.
//!
//! Each cycle claims work in one transaction (row locks plus an `on_worker`
//! stamp, so several processor instances can share a store), then drives
//! every claimed task one step through its state machine, each in its own
//! transaction:
//!
//! ```text
//! PENDING/RETRYING --start--> RUNNING | RETRYING (backoff) | FAILED
//! RUNNING          --status-> whatever the handler reports | FAILED
//! terminal, not cleaned up --cleanup--> cleaned_up = true
//! ```

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::StreamExt;
use futures_util::stream;
use serde_json::json;
use tracing::{debug, error, info};
use uuid::Uuid;

use super::backoff::{can_retry, next_backoff_state};
use super::handler::{HandlerError, HandlerRegistry, TaskWrapper};
use super::model::{TaskStatus, WorkflowTask};
use super::task_log::TaskLogger;
use crate::config::model::ProcessorConfig;
use crate::engine::ticker::{LoopHandle, spawn_periodic};
use crate::errors::Result;
use crate::instance::InstanceInfo;
use crate::store::{IsolationLevel, Store, TaskRepository, Transaction};

/// Outcome of one [`TaskProcessor::process_once`] cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub claimed: usize,
    pub failed: usize,
}

pub struct TaskProcessor<S: Store> {
    poll_interval: Duration,
    max_concurrent_tasks: usize,
    task_logger: TaskLogger,
    instance: InstanceInfo,
    store: Arc<S>,
    handlers: HandlerRegistry,
}

impl<S: Store> std::fmt::Debug for TaskProcessor<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskProcessor")
            .field("instance", &self.instance.instance_id())
            .field("poll_interval", &self.poll_interval)
            .field("max_concurrent_tasks", &self.max_concurrent_tasks)
            .field("handlers", &self.handlers)
            .finish_non_exhaustive()
    }
}

impl<S: Store> TaskProcessor<S> {
    pub fn new(
        config: &ProcessorConfig,
        instance: InstanceInfo,
        store: Arc<S>,
        handlers: HandlerRegistry,
    ) -> Result<Self> {
        Ok(Self {
            poll_interval: config.poll_interval.as_duration(),
            max_concurrent_tasks: config.max_concurrent_tasks.max(1),
            task_logger: TaskLogger::from_level_name(&config.task_logger_level)?,
            instance,
            store,
            handlers,
        })
    }

    pub fn instance(&self) -> &InstanceInfo {
        &self.instance
    }

    /// Start polling every `poll_interval` until the handle is stopped.
    pub fn start(self: Arc<Self>) -> LoopHandle {
        let interval = self.poll_interval;
        spawn_periodic("task-processor", interval, None, move || {
            let processor = Arc::clone(&self);
            async move { processor.process_once().await.map(|_| ()) }
        })
    }

    /// Claim every ready task and advance each one step.
    ///
    /// A failing task is logged and released; it does not affect the
    /// other tasks of the cycle.
    pub async fn process_once(&self) -> Result<CycleReport> {
        let claimed = self.claim_tasks().await?;
        if claimed.is_empty() {
            return Ok(CycleReport::default());
        }
        debug!(
            worker = self.instance.instance_id(),
            claimed = claimed.len(),
            "claimed workflow tasks"
        );

        let outcomes: Vec<bool> = stream::iter(claimed)
            .map(|task| async move {
                let task_id = task.id;
                match self.process_task(task).await {
                    Ok(_) => true,
                    Err(err) => {
                        error!(%task_id, error = %err, "failed to process workflow task");
                        if let Err(release_err) = self.release_claim(task_id).await {
                            error!(%task_id, error = %release_err, "failed to release task claim");
                        }
                        false
                    }
                }
            })
            .buffer_unordered(self.max_concurrent_tasks)
            .collect()
            .await;

        Ok(CycleReport {
            claimed: outcomes.len(),
            failed: outcomes.iter().filter(|ok| !**ok).count(),
        })
    }

    async fn claim_tasks(&self) -> Result<Vec<WorkflowTask>> {
        let mut tx = self.store.begin(IsolationLevel::ReadCommitted).await?;

        let mut tasks = tx
            .list_actual_tasks(None, false, &TaskStatus::ACTIVE)
            .await?;
        tasks.extend(tx.list_cleanup_tasks().await?);

        let worker = self.instance.instance_id();
        let ids: Vec<Uuid> = tasks.iter().map(|t| t.id).collect();
        if !ids.is_empty() {
            tx.set_workflow_task_on_worker(&ids, Some(worker)).await?;
        }
        tx.commit().await?;

        for task in &mut tasks {
            task.on_worker = Some(worker.to_string());
        }
        Ok(tasks)
    }

    async fn release_claim(&self, task_id: Uuid) -> Result<()> {
        let mut tx = self.store.begin(IsolationLevel::ReadCommitted).await?;
        tx.set_workflow_task_on_worker(&[task_id], None).await?;
        tx.commit().await
    }

    /// Advance one task a single step and persist it, releasing its claim.
    ///
    /// On COMPLETED the task's ready successors become PENDING; on FAILED
    /// its waiting descendants are cancelled. Both happen in the same
    /// transaction as the status change.
    pub async fn process_task(&self, mut task: WorkflowTask) -> Result<WorkflowTask> {
        let mut tx = self.store.begin(IsolationLevel::ReadCommitted).await?;

        tx.ensure_workflow_task_input(&mut task).await?;
        let mut wrapper = self.handlers.wrap(&task)?;

        let before = task.status;
        self.advance(&mut task, wrapper.as_mut()).await;

        task.input = wrapper.input()?;
        task.output = wrapper.output()?;
        task.on_worker = None;
        task.updated_at = Utc::now();
        tx.save_workflow_task(&task).await?;

        if before != task.status {
            match task.status {
                TaskStatus::Completed => {
                    let released = tx.set_children_tasks_as_pending(&task).await?;
                    if !released.is_empty() {
                        debug!(task_id = %task.id, successors = released.len(), "successor tasks pending");
                    }
                }
                TaskStatus::Failed => {
                    let cancelled = tx.cancel_waiting_descendants(&task).await?;
                    if !cancelled.is_empty() {
                        info!(task_id = %task.id, cancelled = cancelled.len(), "cancelled tasks downstream of failure");
                    }
                }
                _ => {}
            }
        }

        tx.commit().await?;
        Ok(task)
    }

    async fn advance(&self, task: &mut WorkflowTask, wrapper: &mut dyn TaskWrapper) {
        let log = &self.task_logger;

        match task.status {
            TaskStatus::Pending | TaskStatus::Retrying => match wrapper.start().await {
                Ok(()) => {
                    task.status = TaskStatus::Running;
                    let fields = json!({ "attempt": task.retry_state.attempt });
                    log.info(task, "task successfully started", fields);
                }
                Err(HandlerError::Temporary(reason)) => {
                    task.status = TaskStatus::Pending;
                    log.warn(task, "task start deferred", json!({ "reason": reason }));
                }
                Err(err) => self.start_failed(task, &err),
            },
            TaskStatus::Running => match wrapper.status().await {
                Ok(status) => {
                    if status != task.status {
                        let from = task.status;
                        task.status = status;
                        log.info(
                            task,
                            "task status changed",
                            json!({ "from": from.to_string(), "to": status.to_string() }),
                        );
                    }
                }
                Err(HandlerError::Temporary(reason)) => {
                    log.debug(task, "task status not yet observable", json!({ "reason": reason }));
                }
                Err(err) => {
                    task.status = TaskStatus::Failed;
                    log.error(task, "task status check failed", json!({ "error": err.to_string() }));
                }
            },
            status if status.is_terminal() && !task.cleaned_up => match wrapper.cleanup().await {
                Ok(()) => {
                    task.cleaned_up = true;
                    log.info(task, "task cleaned up", json!({}));
                }
                Err(err) => {
                    log.error(task, "task cleanup failed", json!({ "error": err.to_string() }));
                }
            },
            _ => {}
        }
    }

    fn start_failed(&self, task: &mut WorkflowTask, err: &HandlerError) {
        let now = Utc::now();
        let next = if can_retry(&task.retry_settings, &task.retry_state) {
            next_backoff_state(&task.retry_settings, &task.retry_state, now)
        } else {
            None
        };

        match next {
            Some(state) => {
                task.retry_state = state;
                task.status = TaskStatus::Retrying;
                let fields = json!({
                    "error": err.to_string(),
                    "attempt": task.retry_state.attempt,
                    "next_attempt_at": task.retry_state.next_attempt_at.map(|at| at.to_rfc3339()),
                });
                self.task_logger.warn(task, "task start failed, will retry", fields);
            }
            None => {
                task.status = TaskStatus::Failed;
                let fields = json!({ "error": err.to_string(), "attempt": task.retry_state.attempt });
                self.task_logger.error(task, "task start failed, retries exhausted", fields);
            }
        }
    }
}
