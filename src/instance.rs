// src/instance.rs

use uuid::Uuid;

/// Identity of one running process.
///
/// Built once at startup and handed to whoever needs it; the instance id is
/// what the task processor writes into `on_worker` when it claims tasks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceInfo {
    service_name: String,
    version: String,
    instance_id: String,
}

impl InstanceInfo {
    pub fn new(service_name: impl Into<String>, version: impl Into<String>) -> Self {
        let service_name = service_name.into();
        let version = version.into();
        let instance_id = format!("{service_name}-{version}-{}", Uuid::new_v4());
        Self {
            service_name,
            version,
            instance_id,
        }
    }

    /// Instance info stamped with this crate's version.
    pub fn for_service(service_name: impl Into<String>) -> Self {
        Self::new(service_name, env!("CARGO_PKG_VERSION"))
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }
}
