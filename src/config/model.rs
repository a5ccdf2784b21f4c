// src/config/model.rs

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::errors::Result;
use crate::resource::builder::{DEFAULT_NAMESPACE, DeploymentBuilder};
use crate::resource::ips::Ipv4Cidr;
use crate::resource::model::Cloud;
use crate::resource::quota::{Quota, QuotaKind};
use crate::tasks::input_payload;
use crate::types::HumanDuration;
use crate::workflow::model::{BackoffPolicy, RetrySettings, TaskSpec, TaskType, WorkflowSpec};

/// Configuration as read from a TOML file, before validation.
///
/// ```toml
/// [processor]
/// poll_interval = "10s"
///
/// [processor.task_retry.deploy_database]
/// max_attempts = 5
///
/// [deployment]
/// cloud = "local"
/// network_cidr = "10.2.0.0/24"
///
/// [[deployment.quota]]
/// kind = "vm"
/// maximum = 4
///
/// [workflow.task.database]
/// type = "deploy_database"
///
/// [workflow.task.workload]
/// type = "deploy_workload"
/// after = ["database"]
/// ```
///
/// All sections are optional except at least one workflow task.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawConfigFile {
    #[serde(default)]
    pub instance: InstanceConfig,

    #[serde(default)]
    pub processor: ProcessorConfig,

    #[serde(default)]
    pub reconciler: ReconcilerConfig,

    #[serde(default)]
    pub supervisor: SupervisorConfig,

    #[serde(default)]
    pub deployment: DeploymentConfig,

    #[serde(default)]
    pub workflow: WorkflowConfig,
}

/// Validated configuration. Build it with `ConfigFile::try_from(raw)` or
/// [`crate::config::load_and_validate`].
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub instance: InstanceConfig,
    pub processor: ProcessorConfig,
    pub reconciler: ReconcilerConfig,
    pub supervisor: SupervisorConfig,
    pub deployment: DeploymentConfig,
    pub workflow: WorkflowConfig,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(raw: RawConfigFile) -> Self {
        Self {
            instance: raw.instance,
            processor: raw.processor,
            reconciler: raw.reconciler,
            supervisor: raw.supervisor,
            deployment: raw.deployment,
            workflow: raw.workflow,
        }
    }

    /// Retry settings for a task: the task's own override, else the
    /// processor-wide one for its type, else the defaults.
    pub fn retry_for(&self, task_type: TaskType, task_override: Option<&RetryConfig>) -> RetrySettings {
        task_override
            .or_else(|| self.processor.task_retry.get(&task_type))
            .cloned()
            .unwrap_or_default()
            .to_settings()
    }

    /// The `[workflow]` template as a blueprint. Tasks are listed in name
    /// order; every `after` entry becomes an edge into the task.
    pub fn workflow_spec(&self) -> Result<WorkflowSpec> {
        let mut spec = WorkflowSpec::new(self.workflow.name.clone());
        for (key, task) in &self.workflow.task {
            let overrides = task.input.as_ref().map(serde_json::to_value).transpose()?;
            spec = spec.task(TaskSpec {
                key: key.clone(),
                task_type: task.task_type,
                input: input_payload(task.task_type, overrides.as_ref())?,
                retry: self.retry_for(task.task_type, task.retry.as_ref()),
            });
        }
        for (key, task) in &self.workflow.task {
            for dep in &task.after {
                spec = spec.edge(dep.clone(), key.clone());
            }
        }
        Ok(spec)
    }

    /// `[[deployment.quota]]` rows with nothing in use yet.
    pub fn quotas(&self) -> Vec<Quota> {
        self.deployment
            .quota
            .iter()
            .map(|q| Quota {
                cloud: q.cloud.unwrap_or(self.deployment.cloud),
                kind: q.kind,
                current: 0,
                maximum: q.maximum,
            })
            .collect()
    }

    pub fn deployment_builder(&self) -> DeploymentBuilder {
        DeploymentBuilder::with_default_clouds(
            self.deployment.namespace.clone(),
            self.deployment.network_cidr,
        )
    }
}

/// `[instance]`
#[derive(Debug, Clone, Deserialize)]
pub struct InstanceConfig {
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

fn default_service_name() -> String {
    "cloudbench".to_string()
}

impl Default for InstanceConfig {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
        }
    }
}

/// `[processor]`
#[derive(Debug, Clone, Deserialize)]
pub struct ProcessorConfig {
    #[serde(default = "default_poll_interval")]
    pub poll_interval: HumanDuration,

    /// Minimum level of records kept in a task's own log.
    #[serde(default = "default_task_logger_level")]
    pub task_logger_level: String,

    /// Upper bound on tasks processed at once within one cycle.
    #[serde(default = "default_max_concurrent_tasks")]
    pub max_concurrent_tasks: usize,

    /// `[processor.task_retry.<task_type>]`
    #[serde(default)]
    pub task_retry: BTreeMap<TaskType, RetryConfig>,
}

fn default_poll_interval() -> HumanDuration {
    HumanDuration::from_secs(10)
}

fn default_task_logger_level() -> String {
    "debug".to_string()
}

fn default_max_concurrent_tasks() -> usize {
    8
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            poll_interval: default_poll_interval(),
            task_logger_level: default_task_logger_level(),
            max_concurrent_tasks: default_max_concurrent_tasks(),
            task_retry: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BackoffKind {
    #[default]
    Exponential,
    Constant,
}

/// Retry policy as written in config. A constant policy waits
/// `initial_interval` between attempts.
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    #[serde(default)]
    pub kind: BackoffKind,

    #[serde(default = "default_initial_interval")]
    pub initial_interval: HumanDuration,

    #[serde(default = "default_retry_ceiling")]
    pub max_interval: HumanDuration,

    /// `"0s"` disables the limit.
    #[serde(default = "default_retry_ceiling")]
    pub max_elapsed_time: HumanDuration,

    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    #[serde(default = "default_randomization_factor")]
    pub randomization_factor: f64,

    /// 0 means unlimited.
    #[serde(default)]
    pub max_attempts: u32,
}

fn default_initial_interval() -> HumanDuration {
    HumanDuration::from_secs(10)
}

fn default_retry_ceiling() -> HumanDuration {
    HumanDuration::from_secs(300)
}

fn default_multiplier() -> f64 {
    30.0
}

fn default_randomization_factor() -> f64 {
    0.1
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            kind: BackoffKind::default(),
            initial_interval: default_initial_interval(),
            max_interval: default_retry_ceiling(),
            max_elapsed_time: default_retry_ceiling(),
            multiplier: default_multiplier(),
            randomization_factor: default_randomization_factor(),
            max_attempts: 0,
        }
    }
}

impl RetryConfig {
    pub fn to_settings(&self) -> RetrySettings {
        let policy = match self.kind {
            BackoffKind::Constant => BackoffPolicy::Constant {
                interval: self.initial_interval,
            },
            BackoffKind::Exponential => BackoffPolicy::Exponential {
                initial_interval: self.initial_interval,
                max_interval: self.max_interval,
                max_elapsed_time: self.max_elapsed_time,
                multiplier: self.multiplier,
                randomization_factor: self.randomization_factor,
            },
        };
        RetrySettings {
            policy,
            max_attempts: self.max_attempts,
        }
    }
}

/// `[reconciler]`
#[derive(Debug, Clone, Deserialize)]
pub struct ReconcilerConfig {
    /// How long a resource may stay CREATING or DESTROYING before it is
    /// marked DEGRADED.
    #[serde(default = "default_reconcile_interval")]
    pub reconcile_interval: HumanDuration,
}

fn default_reconcile_interval() -> HumanDuration {
    HumanDuration::from_secs(300)
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            reconcile_interval: default_reconcile_interval(),
        }
    }
}

/// `[supervisor]`
#[derive(Debug, Clone, Deserialize)]
pub struct SupervisorConfig {
    #[serde(default = "default_check_interval")]
    pub check_interval: HumanDuration,

    /// An automation still provisioning after this long is failed.
    #[serde(default = "default_creation_timeout")]
    pub creation_timeout: HumanDuration,

    /// Any automation older than this is torn down.
    #[serde(default = "default_max_ttl")]
    pub max_ttl: HumanDuration,

    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: u32,
}

fn default_check_interval() -> HumanDuration {
    HumanDuration::from_secs(30)
}

fn default_creation_timeout() -> HumanDuration {
    HumanDuration::from_secs(20 * 60)
}

fn default_max_ttl() -> HumanDuration {
    HumanDuration::from_secs(4 * 60 * 60)
}

fn default_max_consecutive_failures() -> u32 {
    10
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            check_interval: default_check_interval(),
            creation_timeout: default_creation_timeout(),
            max_ttl: default_max_ttl(),
            max_consecutive_failures: default_max_consecutive_failures(),
        }
    }
}

/// `[deployment]`
#[derive(Debug, Clone, Deserialize)]
pub struct DeploymentConfig {
    #[serde(default = "default_namespace")]
    pub namespace: String,

    #[serde(default = "default_cloud")]
    pub cloud: Cloud,

    #[serde(default = "default_network_cidr")]
    pub network_cidr: Ipv4Cidr,

    /// Reads before a locally simulated resource reports ready.
    #[serde(default = "default_local_ready_after_reads")]
    pub local_ready_after_reads: u32,

    /// `[[deployment.quota]]`
    #[serde(default)]
    pub quota: Vec<QuotaConfig>,
}

fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_string()
}

fn default_cloud() -> Cloud {
    Cloud::Local
}

fn default_network_cidr() -> Ipv4Cidr {
    Ipv4Cidr::DEFAULT
}

fn default_local_ready_after_reads() -> u32 {
    2
}

impl Default for DeploymentConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            cloud: default_cloud(),
            network_cidr: default_network_cidr(),
            local_ready_after_reads: default_local_ready_after_reads(),
            quota: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct QuotaConfig {
    /// Defaults to `[deployment].cloud`.
    #[serde(default)]
    pub cloud: Option<Cloud>,
    pub kind: QuotaKind,
    pub maximum: u32,
}

/// `[workflow]`
#[derive(Debug, Clone, Deserialize)]
pub struct WorkflowConfig {
    #[serde(default = "default_workflow_name")]
    pub name: String,

    /// `[workflow.task.<name>]`, keyed by task name.
    #[serde(default)]
    pub task: BTreeMap<String, WorkflowTaskConfig>,
}

fn default_workflow_name() -> String {
    "benchmark".to_string()
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            name: default_workflow_name(),
            task: BTreeMap::new(),
        }
    }
}

/// `[workflow.task.<name>]`
#[derive(Debug, Clone, Deserialize)]
pub struct WorkflowTaskConfig {
    #[serde(rename = "type")]
    pub task_type: TaskType,

    /// This task waits for every task listed here.
    #[serde(default)]
    pub after: Vec<String>,

    #[serde(default)]
    pub retry: Option<RetryConfig>,

    /// Fields overriding the task type's default input.
    #[serde(default)]
    pub input: Option<toml::Table>,
}
