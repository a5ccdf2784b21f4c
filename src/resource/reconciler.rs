// src/resource/reconciler.rs

//! Converges resources against the external actor.
//!
//! Two shapes are handled: the flat [`ResourceDag`] carried in a deploy
//! task's output, and the persisted [`TreeNode`] hierarchy owned by an
//! automation. Nodes are always processed one at a time, in dependency
//! order.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::actor::ResourceActor;
use super::model::{Resource, ResourceDag, ResourceRef, ResourceStatus};
use super::tree::TreeNode;
use crate::dag::Dag;
use crate::errors::Result;
use crate::types::elapsed_since;
use crate::uow::UnitOfWork;

pub struct Reconciler {
    actor: Arc<dyn ResourceActor>,
    reconcile_interval: Duration,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("reconcile_interval", &self.reconcile_interval)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    pub fn new(actor: Arc<dyn ResourceActor>, reconcile_interval: Duration) -> Self {
        Self {
            actor,
            reconcile_interval,
        }
    }

    pub fn actor(&self) -> &Arc<dyn ResourceActor> {
        &self.actor
    }

    /// Stamp every node CREATING and create it, parents first.
    ///
    /// The first create error aborts; compensating deletes are the
    /// caller's business.
    pub async fn create_deployment(&self, dag: &mut ResourceDag) -> Result<()> {
        let now = Utc::now();
        for id in layered_ids(dag)? {
            let Some(node) = dag.nodes.iter_mut().find(|n| n.id == id) else {
                continue;
            };
            node.status = ResourceStatus::Creating;
            node.created_at = now;
            node.updated_at = now;
            self.actor.create_resource(node).await?;
            debug!(resource_id = %node.id, reference = %node.reference, "resource create issued");
        }
        Ok(())
    }

    /// Refresh every node from the remote side and advance its status.
    pub async fn process_deployment_status(&self, dag: &mut ResourceDag) -> Result<()> {
        let now = Utc::now();
        for id in layered_ids(dag)? {
            let Some(node) = dag.nodes.iter_mut().find(|n| n.id == id) else {
                continue;
            };

            if !self.observe(node).await? {
                if node.status == ResourceStatus::Destroying {
                    node.set_status(ResourceStatus::Destroyed, now);
                    debug!(resource_id = %node.id, "resource gone; marked destroyed");
                }
                continue;
            }

            if may_become_ready(node.status) && node.is_ready() {
                if node.status == ResourceStatus::Degraded {
                    info!(resource_id = %node.id, reference = %node.reference, "degraded resource recovered");
                }
                node.set_status(ResourceStatus::Ready, now);
                debug!(resource_id = %node.id, reference = %node.reference, "resource ready");
            }

            self.degrade_if_stuck(node, now).await;
        }
        Ok(())
    }

    /// Stamp every node DESTROYING and delete it, children first.
    ///
    /// Resources that are already gone count as deleted.
    pub async fn destroy_deployment(&self, dag: &mut ResourceDag) -> Result<()> {
        let now = Utc::now();
        for id in layered_ids(dag)?.into_iter().rev() {
            let Some(node) = dag.nodes.iter_mut().find(|n| n.id == id) else {
                continue;
            };
            if node.status == ResourceStatus::Destroyed {
                continue;
            }
            node.set_status(ResourceStatus::Destroying, now);
            self.delete(&node.reference).await?;
        }
        Ok(())
    }

    /// Create a whole tree breadth-first, registering a delete for every
    /// successful create in `uow`.
    pub async fn create_tree(&self, tree: &mut TreeNode, uow: &mut UnitOfWork) -> Result<()> {
        let now = Utc::now();
        for id in breadth_first_ids(tree) {
            let Some(node) = tree.find_mut(id) else {
                continue;
            };
            let resource = &mut node.resource;
            resource.status = ResourceStatus::Creating;
            resource.created_at = now;
            resource.updated_at = now;

            self.actor.create_resource(resource).await?;

            let actor = Arc::clone(&self.actor);
            let reference = resource.reference.clone();
            uow.defer(move || async move {
                if let Err(err) = actor.delete_resource(&reference).await {
                    if !err.is_not_found() {
                        warn!(%reference, error = %err, "rollback delete failed");
                    }
                }
            });
        }
        Ok(())
    }

    /// Post-order refresh of a persisted tree: children are settled before
    /// their parent decides whether the whole subtree is ready.
    pub fn reconcile_tree<'a>(&'a self, node: &'a mut TreeNode) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            for child in node.children.iter_mut() {
                self.reconcile_tree(child).await?;
            }

            if node.resource.status == ResourceStatus::Destroyed {
                return Ok(());
            }

            let now = Utc::now();
            if !self.observe(&mut node.resource).await? {
                match node.resource.status {
                    ResourceStatus::Destroying => {
                        node.resource.set_status(ResourceStatus::Destroyed, now);
                        debug!(resource_id = %node.id(), "resource gone; marked destroyed");
                    }
                    // Abandoned when it degraded; nothing left to recover.
                    ResourceStatus::Degraded => {}
                    status => warn!(
                        resource_id = %node.id(),
                        %status,
                        "resource missing on remote side"
                    ),
                }
                return Ok(());
            }

            if may_become_ready(node.resource.status) && node.is_node_and_descendants_ready() {
                node.resource.set_status(ResourceStatus::Ready, now);
                debug!(resource_id = %node.id(), "resource subtree ready");
                return Ok(());
            }

            self.degrade_if_stuck(&mut node.resource, now).await;
            Ok(())
        })
    }

    /// Breadth-first teardown of a tree.
    pub async fn stop_tree(&self, tree: &mut TreeNode) -> Result<()> {
        let now = Utc::now();
        for id in breadth_first_ids(tree) {
            let Some(node) = tree.find_mut(id) else {
                continue;
            };
            if node.resource.status == ResourceStatus::Destroyed {
                continue;
            }
            self.delete(&node.resource.reference).await?;
            node.resource.set_status(ResourceStatus::Destroying, now);
        }
        info!(root = %tree.id(), "resource tree teardown issued");
        Ok(())
    }

    /// Copy the remote view onto `resource`. `Ok(false)` means not found.
    async fn observe(&self, resource: &mut Resource) -> Result<bool> {
        match self.actor.update_resource_from_remote(resource).await {
            Ok(remote) => {
                resource.synced = remote.synced;
                resource.ready = remote.ready;
                resource.external_id = remote.external_id;
                Ok(true)
            }
            Err(err) if err.is_not_found() => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    async fn delete(&self, reference: &ResourceRef) -> Result<()> {
        match self.actor.delete_resource(reference).await {
            Ok(()) => Ok(()),
            Err(err) if err.is_not_found() => {
                debug!(%reference, "resource already deleted");
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    fn overstayed(&self, resource: &Resource, now: DateTime<Utc>) -> bool {
        let since = match resource.status {
            ResourceStatus::Creating => resource.created_at,
            ResourceStatus::Destroying => resource.updated_at,
            _ => return false,
        };
        elapsed_since(since, now) > self.reconcile_interval
    }

    /// CREATING/DESTROYING for too long becomes DEGRADED. A stuck create is
    /// also abandoned with a best-effort delete.
    async fn degrade_if_stuck(&self, resource: &mut Resource, now: DateTime<Utc>) {
        if !self.overstayed(resource, now) {
            return;
        }

        let previous = resource.status;
        resource.set_status(ResourceStatus::Degraded, now);
        warn!(
            resource_id = %resource.id,
            reference = %resource.reference,
            previous = %previous,
            "resource degraded after reconcile window"
        );

        if previous == ResourceStatus::Creating {
            if let Err(err) = self.delete(&resource.reference).await {
                warn!(reference = %resource.reference, error = %err, "failed to delete degraded resource");
            }
        }
    }
}

/// CREATING resources and DEGRADED ones whose remote side came back can be
/// promoted to READY. Teardown is never reversed.
fn may_become_ready(status: ResourceStatus) -> bool {
    matches!(status, ResourceStatus::Creating | ResourceStatus::Degraded)
}

/// `true` iff the DAG is non-empty and every node has `status`.
pub fn all_dag_nodes_status(dag: &ResourceDag, status: ResourceStatus) -> bool {
    !dag.nodes.is_empty() && dag.all_by(|r| r.status == status)
}

pub fn any_dag_node_in_statuses(dag: &ResourceDag, statuses: &[ResourceStatus]) -> bool {
    dag.any_by(|r| statuses.contains(&r.status))
}

fn layered_ids(dag: &ResourceDag) -> Result<Vec<Uuid>> {
    Ok(dag.layers()?.into_iter().flatten().map(|r| r.id).collect())
}

fn breadth_first_ids(tree: &TreeNode) -> Vec<Uuid> {
    let mut ids = Vec::new();
    let _ = tree.traverse_breadth_first(|node, _| -> std::result::Result<bool, ()> {
        ids.push(node.id());
        Ok(true)
    });
    ids
}
