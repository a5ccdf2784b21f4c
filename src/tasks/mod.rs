// src/tasks/mod.rs

//! The concrete task types of a benchmark workflow.
//!
//! - [`deploy_database`]: one database VM.
//! - [`deploy_workload`]: one load-generator VM pointed at the database.
//! - [`collect_results`]: waits for the run record to leave IDLE.

pub mod collect_results;
pub mod deploy_database;
pub mod deploy_workload;
pub mod quota;

use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::warn;
use uuid::Uuid;

use crate::errors::{CloudbenchError, Result};
use crate::resource::{Deployment, DeploymentBuilder, Reconciler};
use crate::store::Store;
use crate::uow::UnitOfWork;
use crate::workflow::merge::copy_common_fields;
use crate::workflow::{HandlerRegistry, Payload, PayloadType, TaskType};

pub use collect_results::{CollectRunResults, CollectRunResultsInput, CollectRunResultsOutput};
pub use deploy_database::{DeployDatabase, DeployDatabaseInput, DeployDatabaseOutput};
pub use deploy_workload::{DeployWorkload, DeployWorkloadInput, DeployWorkloadOutput};

/// Registry with a handler for every [`TaskType`].
pub fn default_registry<S: Store>(
    store: Arc<S>,
    reconciler: Arc<Reconciler>,
    builder: Arc<DeploymentBuilder>,
) -> HandlerRegistry {
    HandlerRegistry::new()
        .register(
            TaskType::DeployDatabase,
            DeployDatabase::new(Arc::clone(&reconciler), Arc::clone(&builder)),
        )
        .register(
            TaskType::DeployWorkload,
            DeployWorkload::new(Arc::clone(&store), reconciler, builder),
        )
        .register(TaskType::CollectRunResults, CollectRunResults::new(store))
}

/// Default input of `task_type` with the top-level fields of `overrides`
/// applied. Unknown fields and ill-typed values are configuration errors.
pub fn input_payload(task_type: TaskType, overrides: Option<&Value>) -> Result<Payload> {
    match task_type {
        TaskType::DeployDatabase => typed_input::<DeployDatabaseInput>(task_type, overrides),
        TaskType::DeployWorkload => typed_input::<DeployWorkloadInput>(task_type, overrides),
        TaskType::CollectRunResults => typed_input::<CollectRunResultsInput>(task_type, overrides),
    }
}

fn typed_input<T>(task_type: TaskType, overrides: Option<&Value>) -> Result<Payload>
where
    T: PayloadType + Serialize + DeserializeOwned + Default,
{
    let mut value = serde_json::to_value(T::default())?;

    if let Some(overrides) = overrides {
        let (Value::Object(fields), Value::Object(defaults)) = (overrides, &mut value) else {
            return Err(CloudbenchError::ConfigError(format!(
                "input of a {task_type} task must be a table"
            )));
        };
        for (key, field) in fields {
            if !defaults.contains_key(key) {
                return Err(CloudbenchError::ConfigError(format!(
                    "unknown input field '{key}' for a {task_type} task"
                )));
            }
            defaults.insert(key.clone(), field.clone());
        }
    }

    let typed: T = serde_json::from_value(value).map_err(|e| {
        CloudbenchError::ConfigError(format!("invalid input for a {task_type} task: {e}"))
    })?;
    Payload::of(&typed)
}

/// Point a task input at `run_id`, if its type has a `run_id` field.
pub fn set_run_id(input: &mut Payload, run_id: Uuid) -> bool {
    copy_common_fields(&mut input.value, &json!({ "run_id": run_id })) > 0
}

/// Create `deployment`'s resources; on failure, whatever was created is
/// deleted again before the error is returned.
pub(crate) async fn create_with_rollback(
    reconciler: &Arc<Reconciler>,
    deployment: &mut Deployment,
) -> Result<()> {
    let mut uow = UnitOfWork::new();

    let rollback = Arc::clone(reconciler);
    let mut created = deployment.dag.clone();
    let deployment_id = deployment.id.clone();
    uow.defer(move || async move {
        if let Err(err) = rollback.destroy_deployment(&mut created).await {
            warn!(%deployment_id, error = %err, "failed to roll back deployment");
        }
    });

    let result = reconciler.create_deployment(&mut deployment.dag).await;
    uow.settle(result).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_replace_default_fields() {
        let payload = input_payload(
            TaskType::DeployDatabase,
            Some(&json!({ "image_id": "postgres-16", "ssh_user": "admin" })),
        )
        .unwrap();
        let input: DeployDatabaseInput = payload.decode().unwrap().unwrap();
        assert_eq!(input.image_id, "postgres-16");
        assert_eq!(input.ssh_user, "admin");
    }

    #[test]
    fn unknown_override_is_a_config_error() {
        let err = input_payload(TaskType::CollectRunResults, Some(&json!({ "nope": 1 }))).unwrap_err();
        assert!(matches!(err, CloudbenchError::ConfigError(_)));
    }

    #[test]
    fn ill_typed_override_is_a_config_error() {
        let err = input_payload(TaskType::DeployWorkload, Some(&json!({ "public_ip": "yes" })))
            .unwrap_err();
        assert!(matches!(err, CloudbenchError::ConfigError(_)));
    }

    #[test]
    fn run_id_lands_in_every_task_type() {
        let run_id = Uuid::new_v4();
        for task_type in TaskType::ALL {
            let mut payload = input_payload(task_type, None).unwrap();
            assert!(set_run_id(&mut payload, run_id), "{task_type}");
            assert_eq!(payload.value["run_id"], json!(run_id));
        }
    }
}
