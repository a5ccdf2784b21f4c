// tests/runtime_local.rs

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use cloudbench::automation::AutomationStatus;
use cloudbench::config::ConfigFile;
use cloudbench::engine::Runtime;
use cloudbench::instance::InstanceInfo;
use cloudbench::resource::Cloud;
use cloudbench::resource::local::LocalActor;
use cloudbench::resource::quota::QuotaKind;
use cloudbench::store::{IsolationLevel, MemoryStore, QuotaRepository, Store};
use cloudbench::tasks::{DeployWorkloadInput, DeployWorkloadOutput};
use cloudbench::types::HumanDuration;
use cloudbench::workflow::{TaskStatus, TaskType};
use cloudbench_test_utils::builders::{ConfigFileBuilder, TaskConfigBuilder};
use cloudbench_test_utils::init_tracing;
use tokio::time::timeout;

type TestResult = Result<(), Box<dyn Error>>;

/// database -> workload -> results, polling fast, resources ready on the
/// first read.
fn benchmark_config(vm_quota: u32) -> ConfigFile {
    ConfigFileBuilder::new()
        .with_task("database", TaskConfigBuilder::new(TaskType::DeployDatabase).build())
        .with_task(
            "workload",
            TaskConfigBuilder::new(TaskType::DeployWorkload)
                .after("database")
                .build(),
        )
        .with_task(
            "results",
            TaskConfigBuilder::new(TaskType::CollectRunResults)
                .after("workload")
                .build(),
        )
        .with_quota(QuotaKind::Vm, vm_quota)
        .with_poll_interval(HumanDuration(Duration::from_millis(10)))
        .with_local_ready_after_reads(1)
        .build()
}

async fn runtime(
    cfg: &ConfigFile,
    actor: &Arc<LocalActor>,
) -> Result<(Runtime<MemoryStore>, Arc<MemoryStore>), Box<dyn Error>> {
    let store = Arc::new(MemoryStore::new());
    let runtime = Runtime::new(
        cfg,
        InstanceInfo::new("cloudbench-test", "0.0.0"),
        Arc::clone(&store),
        actor.clone(),
    )
    .await?;
    Ok((runtime, store))
}

async fn vm_usage(store: &MemoryStore) -> Result<u32, Box<dyn Error>> {
    let mut tx = store.begin(IsolationLevel::ReadCommitted).await?;
    Ok(tx.find_quota(Cloud::Local, QuotaKind::Vm).await?.current)
}

#[tokio::test]
async fn workflow_runs_end_to_end_on_the_local_actor() -> TestResult {
    init_tracing();

    let cfg = benchmark_config(2);
    let actor = Arc::new(LocalActor::new(1));
    let (runtime, store) = runtime(&cfg, &actor).await?;

    let workflow = timeout(Duration::from_secs(10), runtime.run_workflow_once()).await??;

    assert!(workflow.tasks.iter().all(|t| t.status == TaskStatus::Completed));
    assert!(workflow.tasks.iter().all(|t| t.cleaned_up && t.on_worker.is_none()));

    let workload = workflow
        .tasks
        .iter()
        .find(|t| t.task_type == TaskType::DeployWorkload)
        .unwrap();
    let input: DeployWorkloadInput = workload.input.decode()?.unwrap();
    let output: DeployWorkloadOutput = workload.output.decode()?.unwrap();
    let database = input.database_deployment.expect("database output merged into input");
    let deployed = output.workload_deployment.expect("workload deployed");
    assert!(input.run_id.is_some());
    assert_ne!(database.internal_ip(), deployed.internal_ip());

    // Cleanup destroyed every resource and gave the quota back.
    assert!(actor.is_empty());
    assert_eq!(vm_usage(&store).await?, 0);
    Ok(())
}

#[tokio::test]
async fn automation_is_promoted_then_cancelled() -> TestResult {
    init_tracing();

    let cfg = benchmark_config(2);
    let actor = Arc::new(LocalActor::new(1));
    let (runtime, _store) = runtime(&cfg, &actor).await?;

    let automation = timeout(Duration::from_secs(10), runtime.run_automation_once()).await??;
    assert_eq!(automation.status, AutomationStatus::Canceled);
    assert!(actor.is_empty());
    Ok(())
}

#[tokio::test]
async fn serve_stops_on_shutdown() -> TestResult {
    init_tracing();

    let cfg = benchmark_config(2);
    let actor = Arc::new(LocalActor::new(1));
    let (runtime, _store) = runtime(&cfg, &actor).await?;

    let shutdown = tokio::time::sleep(Duration::from_millis(200));
    timeout(Duration::from_secs(5), runtime.serve(shutdown)).await??;
    Ok(())
}
