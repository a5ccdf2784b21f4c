// src/resource/builder.rs

//! Turns a VM request into the resource DAG that materialises it.
//!
//! Every cloud lays out the same chain, `network -> subnet -> vm`, but with
//! its own manifests; [`DeploymentBuilder`] dispatches to the per-cloud
//! [`DagBuilder`].

use std::collections::HashMap;
use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;
use uuid::Uuid;

use super::ips::Ipv4Cidr;
use super::model::{Cloud, Resource, ResourceDag, ResourceRef, Strategy, VmSpec};
use super::quota::{Quota, QuotaKind};
use super::tree::TreeNode;
use crate::dag::{Edge, Graph};
use crate::errors::{CloudbenchError, Result};

pub const DEFAULT_NAMESPACE: &str = "crossplane-system";

/// A built (and possibly created) VM deployment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deployment {
    pub id: String,
    pub cloud: Cloud,
    pub vm: VmSpec,
    pub dag: ResourceDag,
    /// Capacity this deployment consumes.
    pub quotas: Vec<Quota>,
}

impl Deployment {
    pub fn internal_ip(&self) -> Option<&str> {
        self.vm.internal_ip.as_deref()
    }

    /// The same resources as a parent/child tree rooted at the network.
    pub fn to_tree(&self) -> Option<TreeNode> {
        let root = self.dag.nodes.iter().find(|r| r.parent_id.is_none())?;
        TreeNode::from_resources(root.id, self.dag.nodes.iter().cloned())
    }
}

/// Output of a per-cloud builder.
#[derive(Debug, Clone)]
pub struct VmResourceDag {
    pub dag: ResourceDag,
    pub quotas: Vec<Quota>,
    pub assigned_internal_ip: Ipv4Addr,
}

pub trait DagBuilder: Send + Sync {
    fn build_vm_resource_dag(
        &self,
        namespace: &str,
        common_id: &str,
        vm: &VmSpec,
    ) -> Result<VmResourceDag>;

    /// Network the builder allocates VM addresses from.
    fn cidr(&self) -> Ipv4Cidr;
}

pub struct DeploymentBuilder {
    namespace: String,
    builders: HashMap<Cloud, Box<dyn DagBuilder>>,
}

impl std::fmt::Debug for DeploymentBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeploymentBuilder")
            .field("namespace", &self.namespace)
            .field("clouds", &self.builders.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl DeploymentBuilder {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            builders: HashMap::new(),
        }
    }

    /// Builder with the local and yandex layouts registered on `cidr`.
    pub fn with_default_clouds(namespace: impl Into<String>, cidr: Ipv4Cidr) -> Self {
        Self::new(namespace)
            .register(Cloud::Local, Box::new(CrossplaneDagBuilder::local(cidr)))
            .register(Cloud::Yandex, Box::new(CrossplaneDagBuilder::yandex(cidr)))
    }

    pub fn register(mut self, cloud: Cloud, builder: Box<dyn DagBuilder>) -> Self {
        self.builders.insert(cloud, builder);
        self
    }

    pub fn cidr(&self, cloud: Cloud) -> Result<Ipv4Cidr> {
        self.builder_for(cloud).map(|b| b.cidr())
    }

    fn builder_for(&self, cloud: Cloud) -> Result<&dyn DagBuilder> {
        self.builders
            .get(&cloud)
            .map(|b| b.as_ref())
            .ok_or_else(|| CloudbenchError::UnsupportedCloud(cloud.to_string()))
    }

    pub fn build_vm_deployment(
        &self,
        cloud: Cloud,
        common_id: &str,
        mut vm: VmSpec,
    ) -> Result<Deployment> {
        let builder = self.builder_for(cloud)?;
        let built = builder.build_vm_resource_dag(&self.namespace, common_id, &vm)?;
        vm.internal_ip = Some(built.assigned_internal_ip.to_string());

        debug!(
            %cloud,
            common_id,
            resources = built.dag.nodes.len(),
            internal_ip = %built.assigned_internal_ip,
            "built vm deployment"
        );

        Ok(Deployment {
            id: Uuid::new_v4().to_string(),
            cloud,
            vm,
            dag: built.dag,
            quotas: built.quotas,
        })
    }
}

/// Emits crossplane-style manifests for one provider.
#[derive(Debug, Clone)]
pub struct CrossplaneDagBuilder {
    cloud: Cloud,
    api_version: String,
    network_name: String,
    cidr: Ipv4Cidr,
}

impl CrossplaneDagBuilder {
    pub fn yandex(cidr: Ipv4Cidr) -> Self {
        Self {
            cloud: Cloud::Yandex,
            api_version: "vpc.yandex-cloud.jet.crossplane.io/v1alpha1".to_string(),
            network_name: "cloudbench-network".to_string(),
            cidr,
        }
    }

    pub fn local(cidr: Ipv4Cidr) -> Self {
        Self {
            cloud: Cloud::Local,
            api_version: "local.cloudbench.dev/v1".to_string(),
            network_name: "local-network".to_string(),
            cidr,
        }
    }

    fn reference(&self, kind: &str, name: String, namespace: &str) -> ResourceRef {
        ResourceRef {
            api_version: self.api_version.clone(),
            kind: kind.to_string(),
            name,
            namespace: namespace.to_string(),
        }
    }
}

impl DagBuilder for CrossplaneDagBuilder {
    fn cidr(&self) -> Ipv4Cidr {
        self.cidr
    }

    fn build_vm_resource_dag(
        &self,
        namespace: &str,
        common_id: &str,
        vm: &VmSpec,
    ) -> Result<VmResourceDag> {
        let assigned_internal_ip = match vm.internal_ip.as_deref() {
            Some(ip) if !ip.is_empty() => ip.parse::<Ipv4Addr>().map_err(|e| {
                CloudbenchError::ConfigError(format!("invalid internal ip {ip}: {e}"))
            })?,
            _ => self.cidr.random_host().ok_or_else(|| {
                CloudbenchError::ConfigError(format!("no host addresses in {}", self.cidr))
            })?,
        };

        // Subnet names are shared per common id; VM names are always fresh.
        let subnet_name = format!("cloudbench-subnet-{}", common_id.to_lowercase());
        let vm_name = format!("cloudbench-vm-{}", Uuid::new_v4());

        let network_ref = self.reference("Network", self.network_name.clone(), namespace);
        let subnet_ref = self.reference("Subnet", subnet_name, namespace);
        let vm_ref = self.reference("Instance", vm_name.clone(), namespace);

        let network = Resource::new(
            None,
            network_ref.clone(),
            json!({ "name": network_ref.name }),
        );
        let subnet = Resource::new(
            Some(network.id),
            subnet_ref.clone(),
            json!({
                "name": subnet_ref.name,
                "networkRef": network_ref.name,
                "v4CidrBlocks": [self.cidr.to_string()],
            }),
        );

        let startup = match &vm.strategy {
            Strategy::PrebuiltImage { image_id } => json!({ "imageId": image_id }),
            Strategy::Scripting { workdir, cmd, files } => json!({
                "imageId": vm.machine.image_id,
                "workdir": workdir,
                "cmd": cmd,
                "files": files,
            }),
        };
        let instance = Resource::new(
            Some(subnet.id),
            vm_ref,
            json!({
                "name": vm_name,
                "cores": vm.machine.cores,
                "memoryGb": vm.machine.memory_gb,
                "diskGb": vm.machine.disk_gb,
                "subnetRef": subnet_ref.name,
                "internalIp": assigned_internal_ip.to_string(),
                "natIp": vm.public_ip,
                "sshUser": vm.ssh_user,
                "startup": startup,
                "writeConnectionSecretTo": format!("{vm_name}-access-secret"),
            }),
        );

        // One network is shared by every VM, so it does not count against quota.
        let mut quotas = vec![
            Quota::needed(self.cloud, QuotaKind::Subnet, 1),
            Quota::needed(self.cloud, QuotaKind::Vm, 1),
        ];
        if vm.public_ip {
            quotas.push(Quota::needed(self.cloud, QuotaKind::PublicIpAddress, 1));
        }

        let edges = vec![
            Edge::new(network.id, subnet.id),
            Edge::new(subnet.id, instance.id),
        ];

        Ok(VmResourceDag {
            dag: Graph::new(vec![network, subnet, instance], edges),
            quotas,
            assigned_internal_ip,
        })
    }
}
