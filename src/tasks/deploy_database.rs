// src/tasks/deploy_database.rs

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use super::create_with_rollback;
use crate::resource::model::{MachineInfo, ResourceStatus, Strategy};
use crate::resource::reconciler::{all_dag_nodes_status, any_dag_node_in_statuses};
use crate::resource::{Cloud, Deployment, DeploymentBuilder, Reconciler, VmSpec};
use crate::workflow::{HandlerError, PayloadType, TaskHandler, TaskState, TaskStatus};

/// Node statuses that mean a deployment will never become ready.
pub(crate) const DEPLOYMENT_BROKEN: [ResourceStatus; 3] = [
    ResourceStatus::Destroying,
    ResourceStatus::Destroyed,
    ResourceStatus::Degraded,
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeployDatabaseInput {
    pub cloud: Cloud,
    pub machine: MachineInfo,
    /// Image with the database preinstalled.
    pub image_id: String,
    pub ssh_user: String,
    pub run_id: Option<Uuid>,
}

impl Default for DeployDatabaseInput {
    fn default() -> Self {
        Self {
            cloud: Cloud::Local,
            machine: MachineInfo::default(),
            image_id: "postgres-16".to_string(),
            ssh_user: "ubuntu".to_string(),
            run_id: None,
        }
    }
}

impl PayloadType for DeployDatabaseInput {
    const TYPE_TAG: &'static str = "deploy_database_input";
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeployDatabaseOutput {
    pub database_deployment: Option<Deployment>,
}

impl PayloadType for DeployDatabaseOutput {
    const TYPE_TAG: &'static str = "deploy_database_output";
}

#[derive(Debug)]
pub struct DeployDatabase {
    reconciler: Arc<Reconciler>,
    builder: Arc<DeploymentBuilder>,
}

impl DeployDatabase {
    pub fn new(reconciler: Arc<Reconciler>, builder: Arc<DeploymentBuilder>) -> Self {
        Self {
            reconciler,
            builder,
        }
    }
}

/// Map a deployment's node statuses onto a task status.
pub(crate) fn deployment_task_status(deployment: &Deployment) -> TaskStatus {
    if all_dag_nodes_status(&deployment.dag, ResourceStatus::Ready) {
        TaskStatus::Completed
    } else if any_dag_node_in_statuses(&deployment.dag, &DEPLOYMENT_BROKEN) {
        TaskStatus::Failed
    } else {
        TaskStatus::Running
    }
}

#[async_trait]
impl TaskHandler for DeployDatabase {
    type Input = DeployDatabaseInput;
    type Output = DeployDatabaseOutput;

    async fn start(&self, input: &DeployDatabaseInput) -> Result<DeployDatabaseOutput, HandlerError> {
        let common_id = input.run_id.unwrap_or_else(Uuid::new_v4).to_string();
        let vm = VmSpec {
            machine: input.machine.clone(),
            public_ip: false,
            internal_ip: None,
            ssh_user: input.ssh_user.clone(),
            strategy: Strategy::PrebuiltImage {
                image_id: input.image_id.clone(),
            },
        };

        let mut deployment = self.builder.build_vm_deployment(input.cloud, &common_id, vm)?;
        create_with_rollback(&self.reconciler, &mut deployment).await?;

        info!(
            deployment_id = %deployment.id,
            cloud = %deployment.cloud,
            internal_ip = deployment.internal_ip().unwrap_or_default(),
            "database deployment created"
        );
        Ok(DeployDatabaseOutput {
            database_deployment: Some(deployment),
        })
    }

    async fn status(
        &self,
        state: &mut TaskState<DeployDatabaseInput, DeployDatabaseOutput>,
    ) -> Result<TaskStatus, HandlerError> {
        let Some(deployment) = state.output.database_deployment.as_mut() else {
            return Ok(TaskStatus::Failed);
        };
        self.reconciler
            .process_deployment_status(&mut deployment.dag)
            .await
            .map_err(HandlerError::temporary)?;
        Ok(deployment_task_status(deployment))
    }

    async fn cleanup(
        &self,
        state: &mut TaskState<DeployDatabaseInput, DeployDatabaseOutput>,
    ) -> Result<(), HandlerError> {
        let Some(deployment) = state.output.database_deployment.as_mut() else {
            debug!("no database deployment to clean up");
            return Ok(());
        };
        self.reconciler.destroy_deployment(&mut deployment.dag).await?;
        info!(deployment_id = %deployment.id, "database deployment destroyed");
        Ok(())
    }
}
