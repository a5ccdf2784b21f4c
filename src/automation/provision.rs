// src/automation/provision.rs

use std::net::Ipv4Addr;

use tracing::info;
use uuid::Uuid;

use super::model::{CloudAutomation, RunRecord};
use crate::errors::{CloudbenchError, Result};
use crate::resource::model::{MachineInfo, Strategy};
use crate::resource::{Cloud, Deployment, DeploymentBuilder, Reconciler, TreeNode, VmSpec};
use crate::store::{
    AutomationRepository, IsolationLevel, ResourceRepository, RunRecordRepository, Store,
    Transaction,
};
use crate::uow::{self, UnitOfWork};

/// What to provision for one benchmark run.
#[derive(Debug, Clone, PartialEq)]
pub struct AutomationRequest {
    pub cloud: Cloud,
    pub database: VmSpec,
    /// Placed next to the database when `internal_ip` is unset.
    pub workload: VmSpec,
}

impl AutomationRequest {
    /// A prebuilt database image plus a scripted load generator.
    pub fn standard(cloud: Cloud) -> Self {
        Self {
            cloud,
            database: VmSpec {
                machine: MachineInfo::default(),
                public_ip: false,
                internal_ip: None,
                ssh_user: "ubuntu".to_string(),
                strategy: Strategy::PrebuiltImage {
                    image_id: "postgres-16".to_string(),
                },
            },
            workload: VmSpec {
                machine: MachineInfo::default(),
                public_ip: false,
                internal_ip: None,
                ssh_user: "ubuntu".to_string(),
                strategy: Strategy::Scripting {
                    workdir: "~/".to_string(),
                    cmd: "./run-benchmark".to_string(),
                    files: Vec::new(),
                },
            },
        }
    }
}

fn tree_of(deployment: &Deployment) -> Result<TreeNode> {
    deployment.to_tree().ok_or_else(|| {
        CloudbenchError::ConfigError(format!("deployment {} has no root resource", deployment.id))
    })
}

async fn insert_tree<T>(tx: &mut T, tree: &TreeNode) -> Result<()>
where
    T: ResourceRepository + Send,
{
    for resource in tree.resources() {
        tx.insert_resource(resource).await?;
    }
    Ok(())
}

/// Provision the database and workload trees of a new automation and record
/// it IDLE together with its run record.
///
/// Everything happens in one serializable transaction. Every resource
/// created on the remote side registers a delete, so a failure part-way
/// leaves neither rows nor remote resources behind.
pub async fn run_automation<S: Store>(
    store: &S,
    reconciler: &Reconciler,
    builder: &DeploymentBuilder,
    request: &AutomationRequest,
) -> Result<RunRecord> {
    let automation_id = Uuid::new_v4();
    let common_id = automation_id.to_string();

    let database = builder.build_vm_deployment(request.cloud, &common_id, request.database.clone())?;

    let mut workload_vm = request.workload.clone();
    if workload_vm.internal_ip.is_none() {
        let taken: Vec<Ipv4Addr> = database
            .internal_ip()
            .and_then(|ip| ip.parse().ok())
            .into_iter()
            .collect();
        workload_vm.internal_ip = builder
            .cidr(request.cloud)?
            .first_free(&taken)
            .map(|ip| ip.to_string());
    }
    let workload = builder.build_vm_deployment(request.cloud, &common_id, workload_vm)?;

    let mut database_tree = tree_of(&database)?;
    let mut workload_tree = tree_of(&workload)?;
    let database_root = database_tree.id();
    let workload_root = workload_tree.id();
    let mut tx = store.begin(IsolationLevel::Serializable).await?;

    let record = uow::with(async move |uow: &mut UnitOfWork| {
        reconciler.create_tree(&mut database_tree, uow).await?;
        insert_tree(&mut tx, &database_tree).await?;

        reconciler.create_tree(&mut workload_tree, uow).await?;
        insert_tree(&mut tx, &workload_tree).await?;

        let automation = CloudAutomation::new(automation_id, database_root, workload_root);
        tx.create_automation(&automation).await?;

        let record = RunRecord::new(automation_id, Some(automation_id));
        tx.save_run_record(&record).await?;

        tx.commit().await?;
        Ok::<_, CloudbenchError>(record)
    })
    .await?;

    info!(
        %automation_id,
        cloud = %request.cloud,
        %database_root,
        %workload_root,
        "automation provisioned"
    );
    Ok(record)
}
