// src/automation/supervisor.rs

//! Background loop keeping automations honest.
//!
//! Each cycle, in one serializable transaction:
//!
//! 1. every active automation's two resource trees are re-reconciled,
//!    concurrently across automations, failing the cycle on the first
//!    error;
//! 2. an IDLE automation whose two roots are READY becomes RUNNING;
//! 3. one still provisioning after `creation_timeout` is torn down FAILED;
//! 4. one older than `max_ttl` is torn down CANCELED, whatever its state.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::future::try_join_all;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::model::{AutomationStatus, CloudAutomation};
use crate::config::model::SupervisorConfig;
use crate::engine::ticker::{LoopHandle, spawn_periodic};
use crate::errors::{CloudbenchError, Result};
use crate::resource::{Reconciler, ResourceStatus, TreeNode};
use crate::store::{AutomationRepository, IsolationLevel, ResourceRepository, Store, Transaction};
use crate::types::elapsed_since;

/// Resource statuses still worth reconciling. DESTROYED resources are left
/// alone; DEGRADED ones may still recover.
const LIVE: [ResourceStatus; 4] = [
    ResourceStatus::Creating,
    ResourceStatus::Ready,
    ResourceStatus::Degraded,
    ResourceStatus::Destroying,
];

/// Outcome of one [`AutomationSupervisor::check_once`] cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CheckReport {
    pub checked: usize,
    pub promoted: usize,
    pub failed: usize,
    pub expired: usize,
}

struct Tracked {
    automation: CloudAutomation,
    database: TreeNode,
    workload: TreeNode,
}

pub struct AutomationSupervisor<S: Store> {
    store: Arc<S>,
    reconciler: Arc<Reconciler>,
    check_interval: Duration,
    creation_timeout: Duration,
    max_ttl: Duration,
    max_consecutive_failures: u32,
}

impl<S: Store> std::fmt::Debug for AutomationSupervisor<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AutomationSupervisor")
            .field("check_interval", &self.check_interval)
            .field("creation_timeout", &self.creation_timeout)
            .field("max_ttl", &self.max_ttl)
            .finish_non_exhaustive()
    }
}

impl<S: Store> AutomationSupervisor<S> {
    pub fn new(config: &SupervisorConfig, store: Arc<S>, reconciler: Arc<Reconciler>) -> Self {
        Self {
            store,
            reconciler,
            check_interval: config.check_interval.as_duration(),
            creation_timeout: config.creation_timeout.as_duration(),
            max_ttl: config.max_ttl.as_duration(),
            max_consecutive_failures: config.max_consecutive_failures,
        }
    }

    /// Check every `check_interval`. The loop gives up, returning the last
    /// error from its handle, after `max_consecutive_failures` failed
    /// cycles in a row.
    pub fn start(self: Arc<Self>) -> LoopHandle {
        let interval = self.check_interval;
        let budget = Some(self.max_consecutive_failures.max(1));
        spawn_periodic("automation-supervisor", interval, budget, move || {
            let supervisor = Arc::clone(&self);
            async move { supervisor.check_once().await.map(|_| ()) }
        })
    }

    pub async fn check_once(&self) -> Result<CheckReport> {
        let mut tx = self.store.begin(IsolationLevel::Serializable).await?;
        let automations = tx.list_active_automations().await?;
        let mut report = CheckReport {
            checked: automations.len(),
            ..CheckReport::default()
        };

        let mut tracked = Vec::with_capacity(automations.len());
        for automation in automations {
            match load_trees(&mut tx, &automation, &LIVE).await {
                Ok((database, workload)) => tracked.push(Tracked {
                    automation,
                    database,
                    workload,
                }),
                Err(CloudbenchError::NotFound { .. }) => {
                    warn!(
                        automation_id = %automation.id,
                        "automation resources gone, marking failed"
                    );
                    self.fail_without_live_trees(&mut tx, automation).await?;
                    report.failed += 1;
                }
                Err(err) => return Err(err),
            }
        }

        let reconciler = &self.reconciler;
        let tracked = try_join_all(tracked.into_iter().map(|mut t| async move {
            reconciler.reconcile_tree(&mut t.database).await?;
            reconciler.reconcile_tree(&mut t.workload).await?;
            Ok::<_, CloudbenchError>(t)
        }))
        .await?;

        let now = Utc::now();
        for mut t in tracked {
            let id = t.automation.id;
            let age = elapsed_since(t.automation.created_at, now);
            let ready = t.database.resource.status == ResourceStatus::Ready
                && t.workload.resource.status == ResourceStatus::Ready;

            if age > self.max_ttl {
                info!(automation_id = %id, age_secs = age.as_secs(), "automation expired");
                self.stop_trees(&mut tx, &mut t, AutomationStatus::Canceled).await?;
                report.expired += 1;
            } else if ready {
                persist_tree(&mut tx, &t.database).await?;
                persist_tree(&mut tx, &t.workload).await?;
                if t.automation.status == AutomationStatus::Idle {
                    tx.update_automation_status(id, AutomationStatus::Running).await?;
                    info!(automation_id = %id, "automation running");
                    report.promoted += 1;
                }
            } else if age > self.creation_timeout {
                warn!(
                    automation_id = %id,
                    creation_timeout_secs = self.creation_timeout.as_secs(),
                    "automation creation timed out"
                );
                self.stop_trees(&mut tx, &mut t, AutomationStatus::Failed).await?;
                report.failed += 1;
            } else {
                persist_tree(&mut tx, &t.database).await?;
                persist_tree(&mut tx, &t.workload).await?;
                debug!(automation_id = %id, "automation still provisioning");
            }
        }

        tx.commit().await?;
        Ok(report)
    }

    /// Tear down both trees of an automation and record `status`, which
    /// must be FAILED or CANCELED.
    pub async fn stop_automation(&self, id: Uuid, status: AutomationStatus) -> Result<()> {
        let mut tx = self.store.begin(IsolationLevel::Serializable).await?;
        let automation = tx.get_automation(id).await?;
        let (database, workload) = load_trees(&mut tx, &automation, &[]).await?;

        let mut tracked = Tracked {
            automation,
            database,
            workload,
        };
        self.stop_trees(&mut tx, &mut tracked, status).await?;
        tx.commit().await
    }

    /// A root is DESTROYED or missing: tear down whatever rows remain the
    /// same way a timeout does, or just record FAILED when there are none.
    async fn fail_without_live_trees(
        &self,
        tx: &mut S::Tx,
        automation: CloudAutomation,
    ) -> Result<()> {
        match load_trees(tx, &automation, &[]).await {
            Ok((database, workload)) => {
                let mut tracked = Tracked {
                    automation,
                    database,
                    workload,
                };
                self.stop_trees(tx, &mut tracked, AutomationStatus::Failed).await
            }
            Err(CloudbenchError::NotFound { .. }) => {
                tx.update_automation_status(automation.id, AutomationStatus::Failed)
                    .await
            }
            Err(err) => Err(err),
        }
    }

    async fn stop_trees(
        &self,
        tx: &mut S::Tx,
        tracked: &mut Tracked,
        status: AutomationStatus,
    ) -> Result<()> {
        if status.is_active() {
            return Err(CloudbenchError::ConfigError(format!(
                "automation cannot be stopped as {status}"
            )));
        }

        self.reconciler.stop_tree(&mut tracked.database).await?;
        self.reconciler.stop_tree(&mut tracked.workload).await?;
        persist_tree(tx, &tracked.database).await?;
        persist_tree(tx, &tracked.workload).await?;
        tx.update_automation_status(tracked.automation.id, status).await?;

        info!(automation_id = %tracked.automation.id, %status, "automation stopped");
        Ok(())
    }
}

async fn load_trees<T>(
    tx: &mut T,
    automation: &CloudAutomation,
    statuses: &[ResourceStatus],
) -> Result<(TreeNode, TreeNode)>
where
    T: ResourceRepository + Send,
{
    let database = tx.get_resource_tree(automation.database_root_id, statuses).await?;
    let workload = tx.get_resource_tree(automation.workload_root_id, statuses).await?;
    Ok((database, workload))
}

async fn persist_tree<T>(tx: &mut T, tree: &TreeNode) -> Result<()>
where
    T: ResourceRepository + Send,
{
    for resource in tree.resources() {
        tx.update_resource(resource).await?;
    }
    Ok(())
}
