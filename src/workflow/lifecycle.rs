// src/workflow/lifecycle.rs

use std::collections::HashMap;

use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use super::model::{TaskStatus, Workflow, WorkflowEdge, WorkflowSpec, WorkflowTask};
use crate::dag::{Dag, DagError};
use crate::errors::{CloudbenchError, Result};
use crate::store::{IsolationLevel, Store, Transaction, WorkflowRepository};

/// Turn a blueprint into a fresh workflow: tasks without predecessors start
/// PENDING, the rest WAITING.
pub fn instantiate(spec: &WorkflowSpec) -> Result<Workflow> {
    let workflow_id = Uuid::new_v4();
    let mut ids = HashMap::new();
    let mut tasks = Vec::with_capacity(spec.tasks.len());

    for task in &spec.tasks {
        let row = WorkflowTask::new(
            workflow_id,
            task.task_type,
            task.input.clone(),
            task.retry.clone(),
        );
        if ids.insert(task.key.as_str(), row.id).is_some() {
            return Err(CloudbenchError::ConfigError(format!(
                "duplicate task '{}' in workflow '{}'",
                task.key, spec.name
            )));
        }
        tasks.push(row);
    }

    let lookup = |key: &str| {
        ids.get(key).copied().ok_or_else(|| {
            CloudbenchError::ConfigError(format!("unknown task '{key}' in workflow edge"))
        })
    };
    let edges = spec
        .edges
        .iter()
        .map(|(from, to)| {
            Ok(WorkflowEdge {
                workflow_id,
                from_id: lookup(from)?,
                to_id: lookup(to)?,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let mut workflow = Workflow {
        id: workflow_id,
        name: spec.name.clone(),
        created_at: Utc::now(),
        tasks,
        edges,
    };

    let roots: Vec<Uuid> = workflow.root_layer()?.iter().map(|t| t.id).collect();
    if roots.is_empty() {
        return Err(DagError::NoLayerFound.into());
    }
    for task in &mut workflow.tasks {
        if roots.contains(&task.id) {
            task.status = TaskStatus::Pending;
        }
    }
    Ok(workflow)
}

pub async fn create_workflow<S: Store>(store: &S, spec: &WorkflowSpec) -> Result<Workflow> {
    let workflow = instantiate(spec)?;

    let mut tx = store.begin(IsolationLevel::ReadCommitted).await?;
    tx.create_workflow(&workflow).await?;
    tx.commit().await?;

    info!(
        workflow_id = %workflow.id,
        name = %workflow.name,
        tasks = workflow.tasks.len(),
        "workflow created"
    );
    Ok(workflow)
}

/// Cancel every task that has not finished; cleanup still runs for them.
pub async fn cancel_workflow<S: Store>(store: &S, id: Uuid) -> Result<Workflow> {
    let mut tx = store.begin(IsolationLevel::ReadCommitted).await?;
    let workflow = tx.mark_workflow_as_canceled(id).await?;
    tx.commit().await?;

    info!(workflow_id = %id, "workflow cancelled");
    Ok(workflow)
}

pub async fn get_workflow<S: Store>(store: &S, id: Uuid) -> Result<Workflow> {
    let mut tx = store.begin(IsolationLevel::ReadUncommitted).await?;
    tx.get_workflow(id).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::model::{Payload, RetrySettings, TaskSpec, TaskType};

    fn spec(key: &str, task_type: TaskType) -> TaskSpec {
        TaskSpec {
            key: key.into(),
            task_type,
            input: Payload::empty(),
            retry: RetrySettings::default(),
        }
    }

    #[test]
    fn roots_start_pending_others_wait() {
        let wf = instantiate(
            &WorkflowSpec::new("bench")
                .task(spec("db", TaskType::DeployDatabase))
                .task(spec("load", TaskType::DeployWorkload))
                .task(spec("results", TaskType::CollectRunResults))
                .edge("db", "load")
                .edge("load", "results"),
        )
        .unwrap();

        let statuses: Vec<_> = wf.tasks.iter().map(|t| t.status).collect();
        assert_eq!(
            statuses,
            [TaskStatus::Pending, TaskStatus::Waiting, TaskStatus::Waiting]
        );
        assert_eq!(wf.edges.len(), 2);
        assert!(wf.edges.iter().all(|e| e.workflow_id == wf.id));
    }

    #[test]
    fn cyclic_blueprint_is_rejected() {
        let err = instantiate(
            &WorkflowSpec::new("loop")
                .task(spec("a", TaskType::DeployDatabase))
                .task(spec("b", TaskType::DeployWorkload))
                .edge("a", "b")
                .edge("b", "a"),
        )
        .unwrap_err();
        assert!(matches!(err, CloudbenchError::Dag(DagError::CycleDetected)));
    }

    #[test]
    fn unknown_edge_endpoint_is_rejected() {
        let err = instantiate(
            &WorkflowSpec::new("bad")
                .task(spec("a", TaskType::DeployDatabase))
                .edge("a", "ghost"),
        )
        .unwrap_err();
        assert!(matches!(err, CloudbenchError::ConfigError(_)));
    }
}
