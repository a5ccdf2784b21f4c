#![allow(dead_code)]

use cloudbench::config::model::{BackoffKind, QuotaConfig};
use cloudbench::config::{
    ConfigFile, DeploymentConfig, RawConfigFile, RetryConfig, WorkflowTaskConfig,
};
use cloudbench::resource::model::{Resource, ResourceRef, ResourceStatus};
use cloudbench::resource::quota::QuotaKind;
use cloudbench::resource::tree::TreeNode;
use cloudbench::types::HumanDuration;
use cloudbench::workflow::model::{BackoffPolicy, RetrySettings, TaskType};
use uuid::Uuid;

/// Builder for `ConfigFile` to simplify test setup.
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl ConfigFileBuilder {
    pub fn new() -> Self {
        Self {
            config: RawConfigFile::default(),
        }
    }

    pub fn with_task(mut self, name: &str, task: WorkflowTaskConfig) -> Self {
        self.config.workflow.task.insert(name.to_string(), task);
        self
    }

    pub fn with_quota(mut self, kind: QuotaKind, maximum: u32) -> Self {
        self.config.deployment.quota.push(QuotaConfig {
            cloud: None,
            kind,
            maximum,
        });
        self
    }

    pub fn with_poll_interval(mut self, interval: HumanDuration) -> Self {
        self.config.processor.poll_interval = interval;
        self
    }

    pub fn with_task_retry(mut self, task_type: TaskType, retry: RetryConfig) -> Self {
        self.config.processor.task_retry.insert(task_type, retry);
        self
    }

    pub fn with_deployment(mut self, deployment: DeploymentConfig) -> Self {
        self.config.deployment = deployment;
        self
    }

    pub fn with_local_ready_after_reads(mut self, reads: u32) -> Self {
        self.config.deployment.local_ready_after_reads = reads;
        self
    }

    pub fn raw(self) -> RawConfigFile {
        self.config
    }

    pub fn build(self) -> ConfigFile {
        ConfigFile::try_from(self.config).expect("Failed to build valid config from builder")
    }
}

impl Default for ConfigFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `WorkflowTaskConfig`.
pub struct TaskConfigBuilder {
    task: WorkflowTaskConfig,
}

impl TaskConfigBuilder {
    pub fn new(task_type: TaskType) -> Self {
        Self {
            task: WorkflowTaskConfig {
                task_type,
                after: vec![],
                retry: None,
                input: None,
            },
        }
    }

    pub fn after(mut self, dep: &str) -> Self {
        self.task.after.push(dep.to_string());
        self
    }

    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.task.retry = Some(retry);
        self
    }

    pub fn input(mut self, key: &str, value: impl Into<toml::Value>) -> Self {
        self.task
            .input
            .get_or_insert_with(toml::Table::new)
            .insert(key.to_string(), value.into());
        self
    }

    pub fn build(self) -> WorkflowTaskConfig {
        self.task
    }
}

/// Retry config that retries immediately, `max_attempts` times.
pub fn immediate_retry_config(max_attempts: u32) -> RetryConfig {
    RetryConfig {
        kind: BackoffKind::Constant,
        initial_interval: HumanDuration(std::time::Duration::ZERO),
        max_attempts,
        ..RetryConfig::default()
    }
}

/// Retry settings that retry immediately, `max_attempts` times.
pub fn immediate_retry(max_attempts: u32) -> RetrySettings {
    RetrySettings {
        policy: BackoffPolicy::Constant {
            interval: HumanDuration(std::time::Duration::ZERO),
        },
        max_attempts,
    }
}

/// Builder for a single `Resource`.
pub struct ResourceBuilder {
    resource: Resource,
}

impl ResourceBuilder {
    pub fn new(kind: &str, name: &str) -> Self {
        let reference = ResourceRef {
            api_version: "test.cloudbench.io/v1".to_string(),
            kind: kind.to_string(),
            name: name.to_string(),
            namespace: "test".to_string(),
        };
        Self {
            resource: Resource::new(None, reference, serde_json::json!({ "name": name })),
        }
    }

    pub fn parent(mut self, parent_id: Uuid) -> Self {
        self.resource.parent_id = Some(parent_id);
        self
    }

    pub fn status(mut self, status: ResourceStatus) -> Self {
        self.resource.status = status;
        self
    }

    pub fn build(self) -> Resource {
        self.resource
    }
}

/// `network -> subnet -> vm`, all CREATING.
pub fn vm_tree(name: &str) -> TreeNode {
    let network = ResourceBuilder::new("Network", &format!("{name}-network")).build();
    let subnet = ResourceBuilder::new("Subnet", &format!("{name}-subnet"))
        .parent(network.id)
        .build();
    let vm = ResourceBuilder::new("Instance", &format!("{name}-vm"))
        .parent(subnet.id)
        .build();

    TreeNode::new(network).with_child(TreeNode::new(subnet).with_child(TreeNode::new(vm)))
}
