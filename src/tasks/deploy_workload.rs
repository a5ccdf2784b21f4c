// src/tasks/deploy_workload.rs

//! The load generator VM.
//!
//! It lands in the same network as the database, on the lowest address the
//! database does not use, and boots with the database address and the run
//! id in its environment. Its capacity is reserved against the quota table
//! for as long as the deployment exists.

use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::create_with_rollback;
use super::deploy_database::deployment_task_status;
use super::quota::{release_quotas, reserve_quotas};
use crate::errors::{CloudbenchError, Result};
use crate::resource::model::{FsFile, MachineInfo, Strategy};
use crate::resource::{Cloud, Deployment, DeploymentBuilder, Reconciler, VmSpec};
use crate::store::{IsolationLevel, Store, Transaction};
use crate::workflow::{HandlerError, PayloadType, TaskHandler, TaskState, TaskStatus};

pub const RUN_ID_ENV: &str = "CLOUDBENCH_RUN_ID";
pub const DATABASE_ADDR_ENV: &str = "CLOUDBENCH_DATABASE_ADDR";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeployWorkloadInput {
    pub cloud: Cloud,
    pub machine: MachineInfo,
    pub public_ip: bool,
    pub ssh_user: String,
    /// Command run from the home directory once the VM boots. `${NAME}`
    /// is replaced from `env`.
    pub cmd: String,
    pub files: Vec<FsFile>,
    pub env: BTreeMap<String, String>,
    pub run_id: Option<Uuid>,
    /// Filled from the database task's output.
    pub database_deployment: Option<Deployment>,
}

impl Default for DeployWorkloadInput {
    fn default() -> Self {
        Self {
            cloud: Cloud::Local,
            machine: MachineInfo::default(),
            public_ip: false,
            ssh_user: "ubuntu".to_string(),
            cmd: format!("./run-benchmark --db ${{{DATABASE_ADDR_ENV}}} --run ${{{RUN_ID_ENV}}}"),
            files: Vec::new(),
            env: BTreeMap::new(),
            run_id: None,
            database_deployment: None,
        }
    }
}

impl PayloadType for DeployWorkloadInput {
    const TYPE_TAG: &'static str = "deploy_workload_input";
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeployWorkloadOutput {
    pub workload_deployment: Option<Deployment>,
}

impl PayloadType for DeployWorkloadOutput {
    const TYPE_TAG: &'static str = "deploy_workload_output";
}

pub struct DeployWorkload<S: Store> {
    store: Arc<S>,
    reconciler: Arc<Reconciler>,
    builder: Arc<DeploymentBuilder>,
}

impl<S: Store> DeployWorkload<S> {
    pub fn new(store: Arc<S>, reconciler: Arc<Reconciler>, builder: Arc<DeploymentBuilder>) -> Self {
        Self {
            store,
            reconciler,
            builder,
        }
    }

    fn vm_spec(&self, input: &DeployWorkloadInput, database: &Deployment) -> Result<VmSpec> {
        let database_ip: Ipv4Addr = database
            .internal_ip()
            .ok_or_else(|| {
                CloudbenchError::ConfigError("database deployment has no internal ip".into())
            })?
            .parse()
            .map_err(|e| CloudbenchError::ConfigError(format!("database internal ip: {e}")))?;

        let cidr = self.builder.cidr(input.cloud)?;
        let internal_ip = cidr.first_free(&[database_ip]).ok_or_else(|| {
            CloudbenchError::ConfigError(format!("no free address left in {cidr}"))
        })?;

        let mut env = input.env.clone();
        env.insert(DATABASE_ADDR_ENV.to_string(), database_ip.to_string());
        if let Some(run_id) = input.run_id {
            env.insert(RUN_ID_ENV.to_string(), run_id.to_string());
        }

        let files = input
            .files
            .iter()
            .map(|f| FsFile {
                path: f.path.clone(),
                content: render(&f.content, &env),
            })
            .collect();

        Ok(VmSpec {
            machine: input.machine.clone(),
            public_ip: input.public_ip,
            internal_ip: Some(internal_ip.to_string()),
            ssh_user: input.ssh_user.clone(),
            strategy: Strategy::Scripting {
                workdir: "~/".to_string(),
                cmd: render(&input.cmd, &env),
                files,
            },
        })
    }

    async fn reserve(&self, deployment: &Deployment) -> Result<(), HandlerError> {
        let mut tx = self.store.begin(IsolationLevel::Serializable).await?;
        reserve_quotas(&mut tx, deployment.cloud, &deployment.quotas).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn release(&self, deployment: &Deployment) -> Result<()> {
        let mut tx = self.store.begin(IsolationLevel::Serializable).await?;
        release_quotas(&mut tx, deployment.cloud, &deployment.quotas).await?;
        tx.commit().await
    }
}

/// Replace every `${NAME}` with its value from `env`. Unknown names are
/// left as they are.
fn render(template: &str, env: &BTreeMap<String, String>) -> String {
    env.iter().fold(template.to_string(), |acc, (name, value)| {
        acc.replace(&format!("${{{name}}}"), value)
    })
}

#[async_trait]
impl<S: Store> TaskHandler for DeployWorkload<S> {
    type Input = DeployWorkloadInput;
    type Output = DeployWorkloadOutput;

    async fn start(&self, input: &DeployWorkloadInput) -> Result<DeployWorkloadOutput, HandlerError> {
        let database = input.database_deployment.as_ref().ok_or_else(|| {
            CloudbenchError::ConfigError("workload deployed without a database deployment".into())
        })?;

        let vm = self.vm_spec(input, database)?;
        let common_id = input.run_id.unwrap_or_else(Uuid::new_v4).to_string();
        let mut deployment = self.builder.build_vm_deployment(input.cloud, &common_id, vm)?;

        self.reserve(&deployment).await?;
        if let Err(err) = create_with_rollback(&self.reconciler, &mut deployment).await {
            if let Err(release_err) = self.release(&deployment).await {
                warn!(deployment_id = %deployment.id, error = %release_err, "failed to release quotas");
            }
            return Err(err.into());
        }

        info!(
            deployment_id = %deployment.id,
            cloud = %deployment.cloud,
            internal_ip = deployment.internal_ip().unwrap_or_default(),
            database_deployment_id = %database.id,
            "workload deployment created"
        );
        Ok(DeployWorkloadOutput {
            workload_deployment: Some(deployment),
        })
    }

    async fn status(
        &self,
        state: &mut TaskState<DeployWorkloadInput, DeployWorkloadOutput>,
    ) -> Result<TaskStatus, HandlerError> {
        let Some(deployment) = state.output.workload_deployment.as_mut() else {
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
        state: &mut TaskState<DeployWorkloadInput, DeployWorkloadOutput>,
    ) -> Result<(), HandlerError> {
        let Some(deployment) = state.output.workload_deployment.as_mut() else {
            debug!("no workload deployment to clean up");
            return Ok(());
        };
        self.reconciler.destroy_deployment(&mut deployment.dag).await?;
        self.release(deployment).await?;
        info!(deployment_id = %deployment.id, "workload deployment destroyed");
        Ok(())
    }
}
