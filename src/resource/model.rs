// src/resource/model.rs

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::dag::{DagNode, Edge, Graph};

/// Lifecycle of an externally managed resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResourceStatus {
    Creating,
    Ready,
    Degraded,
    Destroying,
    Destroyed,
}

impl fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ResourceStatus::Creating => "CREATING",
            ResourceStatus::Ready => "READY",
            ResourceStatus::Degraded => "DEGRADED",
            ResourceStatus::Destroying => "DESTROYING",
            ResourceStatus::Destroyed => "DESTROYED",
        };
        f.write_str(s)
    }
}

/// How the external actor addresses a resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceRef {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    pub namespace: String,
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.namespace, self.kind, self.name)
    }
}

/// One externally managed infrastructure object (network, subnet, VM...).
///
/// `definition` is the manifest handed to the actor on create; the engine
/// never looks inside it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub id: Uuid,
    pub parent_id: Option<Uuid>,
    pub reference: ResourceRef,
    pub definition: serde_json::Value,
    pub status: ResourceStatus,
    pub synced: bool,
    pub ready: bool,
    pub external_id: String,
    pub created_at: DateTime<Utc>,
    /// Last status transition.
    pub updated_at: DateTime<Utc>,
}

impl Resource {
    pub fn new(
        parent_id: Option<Uuid>,
        reference: ResourceRef,
        definition: serde_json::Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            parent_id,
            reference,
            definition,
            status: ResourceStatus::Creating,
            synced: false,
            ready: false,
            external_id: String::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// `ready && synced && external_id != ""`.
    pub fn is_ready(&self) -> bool {
        self.ready && self.synced && !self.external_id.is_empty()
    }

    pub fn set_status(&mut self, status: ResourceStatus, now: DateTime<Utc>) {
        self.status = status;
        self.updated_at = now;
    }
}

impl DagNode for Resource {
    type Id = Uuid;

    fn node_id(&self) -> Uuid {
        self.id
    }
}

/// Resources plus their dependency edges (`from` must exist before `to`).
pub type ResourceDag = Graph<Resource, Edge<Uuid>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Cloud {
    Local,
    Yandex,
}

impl fmt::Display for Cloud {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cloud::Local => f.write_str("local"),
            Cloud::Yandex => f.write_str("yandex"),
        }
    }
}

impl FromStr for Cloud {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "local" => Ok(Cloud::Local),
            "yandex" => Ok(Cloud::Yandex),
            other => Err(format!("unknown cloud: {other} (expected \"local\" or \"yandex\")")),
        }
    }
}

/// Machine shape requested for a VM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineInfo {
    pub cores: u32,
    pub memory_gb: u32,
    pub disk_gb: u32,
    pub image_id: String,
}

impl Default for MachineInfo {
    fn default() -> Self {
        Self {
            cores: 2,
            memory_gb: 4,
            disk_gb: 20,
            image_id: "ubuntu-22-04".to_string(),
        }
    }
}

/// What to run on a VM once it boots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Strategy {
    PrebuiltImage {
        image_id: String,
    },
    Scripting {
        workdir: String,
        cmd: String,
        files: Vec<FsFile>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FsFile {
    pub path: String,
    pub content: String,
}

/// VM request handed to a deployment builder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmSpec {
    pub machine: MachineInfo,
    pub public_ip: bool,
    /// Pre-assigned internal address; the builder picks one when `None`.
    pub internal_ip: Option<String>,
    pub ssh_user: String,
    pub strategy: Strategy,
}
