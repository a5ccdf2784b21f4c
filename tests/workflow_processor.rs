// tests/workflow_processor.rs

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use cloudbench::config::ProcessorConfig;
use cloudbench::instance::InstanceInfo;
use cloudbench::store::MemoryStore;
use cloudbench::workflow::lifecycle::{cancel_workflow, create_workflow, get_workflow};
use cloudbench::types::HumanDuration;
use cloudbench::workflow::model::BackoffPolicy;
use cloudbench::workflow::{
    HandlerRegistry, Payload, RetrySettings, TaskProcessor, TaskSpec, TaskStatus, TaskType,
    Workflow, WorkflowSpec,
};
use cloudbench_test_utils::builders::immediate_retry;
use cloudbench_test_utils::fake_handler::{
    SCRIPTED_DEPLOYMENT_ID, ScriptedHandler, ScriptedInput, ScriptedOutput, StartStep,
};
use cloudbench_test_utils::{init_tracing, with_timeout};
use uuid::Uuid;

type TestResult = Result<(), Box<dyn Error>>;

fn scripted(key: &str, task_type: TaskType, retry: RetrySettings) -> TaskSpec {
    let input = ScriptedInput {
        label: key.to_string(),
        deployment_id: None,
    };
    TaskSpec {
        key: key.to_string(),
        task_type,
        input: Payload::of(&input).unwrap(),
        retry,
    }
}

fn processor(store: &Arc<MemoryStore>, handlers: HandlerRegistry) -> TaskProcessor<MemoryStore> {
    TaskProcessor::new(
        &ProcessorConfig::default(),
        InstanceInfo::new("cloudbench-test", "0.0.0"),
        Arc::clone(store),
        handlers,
    )
    .unwrap()
}

/// Run cycles until the workflow is terminal and cleaned up.
async fn drive(
    processor: &TaskProcessor<MemoryStore>,
    store: &MemoryStore,
    id: Uuid,
    max_cycles: usize,
) -> Result<Workflow, Box<dyn Error>> {
    for _ in 0..max_cycles {
        processor.process_once().await?;
        let workflow = get_workflow(store, id).await?;
        if workflow.is_terminal() && workflow.is_cleaned_up() {
            return Ok(workflow);
        }
    }
    Err(format!("workflow {id} not finished after {max_cycles} cycles").into())
}

fn status_of(workflow: &Workflow, id: Uuid) -> TaskStatus {
    workflow.task(id).map(|t| t.status).unwrap()
}

#[tokio::test]
async fn failed_starts_are_retried_until_the_task_completes() -> TestResult {
    init_tracing();

    let store = Arc::new(MemoryStore::new());
    let handler = ScriptedHandler::new().with_starts([
        StartStep::Fail("quota api unreachable".into()),
        StartStep::Fail("quota api unreachable".into()),
    ]);
    let processor = processor(
        &store,
        HandlerRegistry::new().register(TaskType::DeployDatabase, handler.clone()),
    );

    let spec = WorkflowSpec::new("retry").task(scripted("db", TaskType::DeployDatabase, immediate_retry(5)));
    let workflow = create_workflow(store.as_ref(), &spec).await?;
    let task_id = workflow.tasks[0].id;

    let mut seen = Vec::new();
    for _ in 0..4 {
        processor.process_once().await?;
        let workflow = get_workflow(store.as_ref(), workflow.id).await?;
        seen.push(status_of(&workflow, task_id));

        if status_of(&workflow, task_id) == TaskStatus::Running {
            let output: ScriptedOutput = workflow.task(task_id).unwrap().output.decode()?.unwrap();
            assert_eq!(output.deployment_id, SCRIPTED_DEPLOYMENT_ID);
        }
    }

    assert_eq!(
        seen,
        vec![
            TaskStatus::Retrying,
            TaskStatus::Retrying,
            TaskStatus::Running,
            TaskStatus::Completed,
        ]
    );

    let workflow = drive(&processor, &store, workflow.id, 3).await?;
    let task = workflow.task(task_id).unwrap();
    assert_eq!(task.retry_state.attempt, 2);
    assert!(task.cleaned_up);
    assert!(task.on_worker.is_none());

    let output: ScriptedOutput = task.output.decode()?.unwrap();
    assert_eq!(output.deployment_id, format!("{SCRIPTED_DEPLOYMENT_ID}-status"));

    assert_eq!(handler.start_calls(), 3);
    assert_eq!(handler.status_calls(), 1);
    assert_eq!(handler.cleanup_calls(), 1);
    assert!(task.logs.iter().any(|l| l.message.contains("will retry")));
    Ok(())
}

#[tokio::test]
async fn exponential_backoff_walks_through_retrying_before_running() -> TestResult {
    init_tracing();

    let store = Arc::new(MemoryStore::new());
    let handler = ScriptedHandler::new().with_starts([
        StartStep::Fail("subnet api timed out".into()),
        StartStep::Fail("subnet api timed out".into()),
    ]);
    let processor = processor(
        &store,
        HandlerRegistry::new().register(TaskType::DeployDatabase, handler.clone()),
    );

    let retry = RetrySettings {
        policy: BackoffPolicy::Exponential {
            initial_interval: HumanDuration(Duration::from_secs(1)),
            max_interval: HumanDuration(Duration::from_secs(60)),
            max_elapsed_time: HumanDuration(Duration::from_secs(300)),
            multiplier: 2.0,
            randomization_factor: 0.0,
        },
        max_attempts: 3,
    };
    let spec = WorkflowSpec::new("exponential").task(scripted("db", TaskType::DeployDatabase, retry));
    let workflow = create_workflow(store.as_ref(), &spec).await?;
    let task_id = workflow.tasks[0].id;

    // Backed-off tasks are not claimable yet, so step the task directly.
    let mut task = workflow.tasks[0].clone();
    let mut seen = vec![task.status];
    let mut intervals = Vec::new();
    for _ in 0..3 {
        task = processor.process_task(task).await?;
        seen.push(task.status);
        if task.status == TaskStatus::Retrying {
            intervals.push(task.retry_state.interval);
            assert!(task.retry_state.next_attempt_at > Some(chrono::Utc::now()));
        }
    }

    assert_eq!(
        seen,
        vec![
            TaskStatus::Pending,
            TaskStatus::Retrying,
            TaskStatus::Retrying,
            TaskStatus::Running,
        ]
    );
    assert_eq!(task.retry_state.attempt, 2);
    assert_eq!(intervals, vec![Duration::from_secs(1), Duration::from_secs(2)]);

    let stored = get_workflow(store.as_ref(), workflow.id).await?;
    assert_eq!(status_of(&stored, task_id), TaskStatus::Running);
    assert_eq!(handler.start_calls(), 3);
    Ok(())
}

#[tokio::test]
async fn exhausted_retries_fail_the_task() -> TestResult {
    init_tracing();

    let store = Arc::new(MemoryStore::new());
    let handler = ScriptedHandler::new().with_starts(vec![StartStep::Fail("boom".into()); 3]);
    let processor = processor(
        &store,
        HandlerRegistry::new().register(TaskType::DeployDatabase, handler.clone()),
    );

    let spec = WorkflowSpec::new("exhaust").task(scripted("db", TaskType::DeployDatabase, immediate_retry(2)));
    let workflow = create_workflow(store.as_ref(), &spec).await?;

    let workflow = drive(&processor, &store, workflow.id, 10).await?;
    let task = &workflow.tasks[0];
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.retry_state.attempt, 2);
    assert_eq!(handler.start_calls(), 3);
    assert_eq!(handler.status_calls(), 0);
    Ok(())
}

#[tokio::test]
async fn temporary_start_errors_leave_the_task_pending() -> TestResult {
    init_tracing();

    let store = Arc::new(MemoryStore::new());
    let handler = ScriptedHandler::new().with_starts([StartStep::Temporary("quota exhausted".into())]);
    let processor = processor(
        &store,
        HandlerRegistry::new().register(TaskType::DeployWorkload, handler.clone()),
    );

    let spec = WorkflowSpec::new("temporary").task(scripted(
        "workload",
        TaskType::DeployWorkload,
        immediate_retry(1),
    ));
    let workflow = create_workflow(store.as_ref(), &spec).await?;
    let task_id = workflow.tasks[0].id;

    processor.process_once().await?;
    let after_first = get_workflow(store.as_ref(), workflow.id).await?;
    let task = after_first.task(task_id).unwrap();
    assert_eq!(task.status, TaskStatus::Pending);
    assert_eq!(task.retry_state.attempt, 0);
    assert!(task.on_worker.is_none());

    processor.process_once().await?;
    let after_second = get_workflow(store.as_ref(), workflow.id).await?;
    assert_eq!(status_of(&after_second, task_id), TaskStatus::Running);
    assert_eq!(handler.start_calls(), 2);
    Ok(())
}

#[tokio::test]
async fn diamond_runs_in_dependency_order_and_cleans_up_everything() -> TestResult {
    init_tracing();

    let store = Arc::new(MemoryStore::new());
    let database = ScriptedHandler::new();
    let workload = ScriptedHandler::new();
    let collect = ScriptedHandler::new();
    let processor = processor(
        &store,
        HandlerRegistry::new()
            .register(TaskType::DeployDatabase, database.clone())
            .register(TaskType::DeployWorkload, workload.clone())
            .register(TaskType::CollectRunResults, collect.clone()),
    );

    let retry = RetrySettings::default();
    let spec = WorkflowSpec::new("diamond")
        .task(scripted("db", TaskType::DeployDatabase, retry.clone()))
        .task(scripted("load-a", TaskType::DeployWorkload, retry.clone()))
        .task(scripted("load-b", TaskType::DeployWorkload, retry.clone()))
        .task(scripted("collect", TaskType::CollectRunResults, retry))
        .edge("db", "load-a")
        .edge("db", "load-b")
        .edge("load-a", "collect")
        .edge("load-b", "collect");

    let workflow = create_workflow(store.as_ref(), &spec).await?;
    assert_eq!(workflow.tasks[0].status, TaskStatus::Pending);
    assert!(workflow.tasks[1..].iter().all(|t| t.status == TaskStatus::Waiting));

    let workflow = with_timeout(drive(&processor, &store, workflow.id, 20)).await?;
    assert!(workflow.tasks.iter().all(|t| t.status == TaskStatus::Completed));
    assert!(workflow.tasks.iter().all(|t| t.cleaned_up));

    assert_eq!(database.start_calls(), 1);
    assert_eq!(workload.start_calls(), 2);
    assert_eq!(collect.start_calls(), 1);
    assert_eq!(
        database.cleanup_calls() + workload.cleanup_calls() + collect.cleanup_calls(),
        4
    );

    // Successors see their predecessors' outputs merged into their input.
    let expected = Some(format!("{SCRIPTED_DEPLOYMENT_ID}-status"));
    assert!(workload.seen_inputs().iter().all(|i| i.deployment_id == expected));
    assert_eq!(collect.seen_inputs()[0].deployment_id, expected);
    assert_eq!(collect.seen_inputs()[0].label, "collect");
    Ok(())
}

#[tokio::test]
async fn join_task_starts_after_slow_siblings_complete_together() -> TestResult {
    init_tracing();

    let store = Arc::new(MemoryStore::new());
    let slow = ScriptedHandler::new().with_status_delay(Duration::from_millis(20));
    let collect = ScriptedHandler::new();
    let processor = processor(
        &store,
        HandlerRegistry::new()
            .register(TaskType::DeployDatabase, slow.clone())
            .register(TaskType::DeployWorkload, slow.clone())
            .register(TaskType::CollectRunResults, collect.clone()),
    );

    let retry = RetrySettings::default();
    let spec = WorkflowSpec::new("join")
        .task(scripted("db", TaskType::DeployDatabase, retry.clone()))
        .task(scripted("load", TaskType::DeployWorkload, retry.clone()))
        .task(scripted("collect", TaskType::CollectRunResults, retry))
        .edge("db", "collect")
        .edge("load", "collect");
    let workflow = create_workflow(store.as_ref(), &spec).await?;
    let join_id = workflow.tasks[2].id;

    // Both siblings start, then finish their status checks in one cycle.
    processor.process_once().await?;
    processor.process_once().await?;
    let after = get_workflow(store.as_ref(), workflow.id).await?;
    assert_eq!(status_of(&after, workflow.tasks[0].id), TaskStatus::Completed);
    assert_eq!(status_of(&after, workflow.tasks[1].id), TaskStatus::Completed);
    assert_eq!(status_of(&after, join_id), TaskStatus::Pending);

    let workflow = with_timeout(drive(&processor, &store, workflow.id, 10)).await?;
    assert!(workflow.tasks.iter().all(|t| t.status == TaskStatus::Completed));
    assert!(workflow.tasks.iter().all(|t| t.cleaned_up));
    assert_eq!(collect.start_calls(), 1);
    assert_eq!(slow.status_calls(), 2);
    Ok(())
}

#[tokio::test]
async fn failure_cancels_waiting_descendants() -> TestResult {
    init_tracing();

    let store = Arc::new(MemoryStore::new());
    let database = ScriptedHandler::new().with_status_error("vm never booted");
    let workload = ScriptedHandler::new();
    let processor = processor(
        &store,
        HandlerRegistry::new()
            .register(TaskType::DeployDatabase, database.clone())
            .register(TaskType::DeployWorkload, workload.clone())
            .register(TaskType::CollectRunResults, workload.clone()),
    );

    let retry = RetrySettings::default();
    let spec = WorkflowSpec::new("chain")
        .task(scripted("db", TaskType::DeployDatabase, retry.clone()))
        .task(scripted("load", TaskType::DeployWorkload, retry.clone()))
        .task(scripted("collect", TaskType::CollectRunResults, retry))
        .edge("db", "load")
        .edge("load", "collect");

    let workflow = create_workflow(store.as_ref(), &spec).await?;
    let ids: Vec<Uuid> = workflow.tasks.iter().map(|t| t.id).collect();

    let workflow = drive(&processor, &store, workflow.id, 10).await?;
    assert_eq!(status_of(&workflow, ids[0]), TaskStatus::Failed);
    assert_eq!(status_of(&workflow, ids[1]), TaskStatus::Cancelled);
    assert_eq!(status_of(&workflow, ids[2]), TaskStatus::Cancelled);

    assert_eq!(workload.start_calls(), 0);
    assert_eq!(database.cleanup_calls(), 1);
    assert_eq!(workload.cleanup_calls(), 2);
    Ok(())
}

#[tokio::test]
async fn cancelled_workflow_is_cleaned_up_without_starting() -> TestResult {
    init_tracing();

    let store = Arc::new(MemoryStore::new());
    let handler = ScriptedHandler::new();
    let processor = processor(
        &store,
        HandlerRegistry::new()
            .register(TaskType::DeployDatabase, handler.clone())
            .register(TaskType::DeployWorkload, handler.clone()),
    );

    let retry = RetrySettings::default();
    let spec = WorkflowSpec::new("cancel")
        .task(scripted("db", TaskType::DeployDatabase, retry.clone()))
        .task(scripted("load", TaskType::DeployWorkload, retry))
        .edge("db", "load");
    let workflow = create_workflow(store.as_ref(), &spec).await?;

    let cancelled = cancel_workflow(store.as_ref(), workflow.id).await?;
    assert!(cancelled.tasks.iter().all(|t| t.status == TaskStatus::Cancelled));

    let workflow = drive(&processor, &store, workflow.id, 3).await?;
    assert!(workflow.tasks.iter().all(|t| t.cleaned_up));
    assert_eq!(handler.start_calls(), 0);
    assert_eq!(handler.cleanup_calls(), 2);
    Ok(())
}

#[tokio::test]
async fn concurrent_processors_never_start_the_same_task_twice() -> TestResult {
    init_tracing();

    let store = Arc::new(MemoryStore::new());
    let handler = ScriptedHandler::new().with_statuses([TaskStatus::Running; 4]);
    let registry = HandlerRegistry::new().register(TaskType::DeployDatabase, handler.clone());
    let first = processor(&store, registry.clone());
    let second = processor(&store, registry);

    let mut spec = WorkflowSpec::new("shared");
    for i in 0..8 {
        spec = spec.task(scripted(
            &format!("db-{i}"),
            TaskType::DeployDatabase,
            RetrySettings::default(),
        ));
    }
    create_workflow(store.as_ref(), &spec).await?;

    let (a, b) = tokio::join!(first.process_once(), second.process_once());
    let (a, b) = (a?, b?);
    assert_eq!(a.failed + b.failed, 0);
    assert_eq!(handler.start_calls(), 8);
    Ok(())
}

#[tokio::test]
async fn processor_without_handler_releases_the_claim() -> TestResult {
    init_tracing();

    let store = Arc::new(MemoryStore::new());
    let processor = processor(&store, HandlerRegistry::new());

    let spec = WorkflowSpec::new("orphan").task(scripted(
        "db",
        TaskType::DeployDatabase,
        RetrySettings::default(),
    ));
    let workflow = create_workflow(store.as_ref(), &spec).await?;

    let report = processor.process_once().await?;
    assert_eq!(report.claimed, 1);
    assert_eq!(report.failed, 1);

    let workflow = get_workflow(store.as_ref(), workflow.id).await?;
    assert_eq!(workflow.tasks[0].status, TaskStatus::Pending);
    assert!(workflow.tasks[0].on_worker.is_none());
    Ok(())
}
