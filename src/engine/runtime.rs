// src/engine/runtime.rs

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};
use uuid::Uuid;

use super::ticker::spawn_periodic;
use crate::automation::{
    AutomationRequest, AutomationStatus, AutomationSupervisor, CloudAutomation, RunRecord,
    RunStatus, run_automation,
};
use crate::config::model::ConfigFile;
use crate::errors::Result;
use crate::instance::InstanceInfo;
use crate::resource::{Cloud, DeploymentBuilder, Reconciler, ResourceActor};
use crate::store::{
    AutomationRepository, IsolationLevel, QuotaRepository, RunRecordRepository, Store,
    Transaction,
};
use crate::tasks::{default_registry, set_run_id};
use crate::workflow::lifecycle::{create_workflow, get_workflow};
use crate::workflow::{TaskProcessor, TaskStatus, TaskType, Workflow, WorkflowSpec};

/// Everything the binary runs, wired from one [`ConfigFile`].
///
/// The processor and the supervisor are independent loops sharing a
/// store; this struct only owns them and decides how long they run.
pub struct Runtime<S: Store> {
    store: Arc<S>,
    reconciler: Arc<Reconciler>,
    builder: Arc<DeploymentBuilder>,
    processor: Arc<TaskProcessor<S>>,
    supervisor: Arc<AutomationSupervisor<S>>,
    template: WorkflowSpec,
    cloud: Cloud,
    poll_interval: Duration,
    check_interval: Duration,
}

impl<S: Store> fmt::Debug for Runtime<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("processor", &self.processor)
            .field("supervisor", &self.supervisor)
            .field("cloud", &self.cloud)
            .finish_non_exhaustive()
    }
}

impl<S: Store> Runtime<S> {
    /// Wire the components and seed the configured quotas into `store`.
    pub async fn new(
        cfg: &ConfigFile,
        instance: InstanceInfo,
        store: Arc<S>,
        actor: Arc<dyn ResourceActor>,
    ) -> Result<Self> {
        let mut tx = store.begin(IsolationLevel::Serializable).await?;
        for quota in cfg.quotas() {
            tx.upsert_quota(&quota).await?;
        }
        tx.commit().await?;

        let reconciler = Arc::new(Reconciler::new(
            actor,
            cfg.reconciler.reconcile_interval.as_duration(),
        ));
        let builder = Arc::new(cfg.deployment_builder());
        let handlers = default_registry(
            Arc::clone(&store),
            Arc::clone(&reconciler),
            Arc::clone(&builder),
        );

        let processor = Arc::new(TaskProcessor::new(
            &cfg.processor,
            instance,
            Arc::clone(&store),
            handlers,
        )?);
        let supervisor = Arc::new(AutomationSupervisor::new(
            &cfg.supervisor,
            Arc::clone(&store),
            Arc::clone(&reconciler),
        ));

        Ok(Self {
            store,
            reconciler,
            builder,
            processor,
            supervisor,
            template: cfg.workflow_spec()?,
            cloud: cfg.deployment.cloud,
            poll_interval: cfg.processor.poll_interval.as_duration(),
            check_interval: cfg.supervisor.check_interval.as_duration(),
        })
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Create a run record and a workflow from the template pointed at it.
    pub async fn start_run(&self) -> Result<(RunRecord, Workflow)> {
        let record = RunRecord::new(Uuid::new_v4(), None);
        let mut tx = self.store.begin(IsolationLevel::ReadCommitted).await?;
        tx.save_run_record(&record).await?;
        tx.commit().await?;

        let mut spec = self.template.clone();
        for task in &mut spec.tasks {
            set_run_id(&mut task.input, record.id);
        }
        let workflow = create_workflow(self.store.as_ref(), &spec).await?;
        Ok((record, workflow))
    }

    /// Drive one workflow until it is terminal and cleaned up.
    pub async fn run_workflow_once(&self) -> Result<Workflow> {
        let (record, workflow) = self.start_run().await?;
        info!(workflow_id = %workflow.id, run_id = %record.id, "running workflow once");

        loop {
            let report = self.processor.process_once().await?;
            let workflow = get_workflow(self.store.as_ref(), workflow.id).await?;
            debug!(claimed = report.claimed, failed = report.failed, "processor cycle done");

            if self.cloud == Cloud::Local {
                report_local_run(self.store.as_ref(), &workflow, record.id).await?;
            }
            if workflow.is_terminal() && workflow.is_cleaned_up() {
                return Ok(workflow);
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Provision one automation, supervise it until it leaves IDLE, then
    /// tear it down if it made it to RUNNING.
    pub async fn run_automation_once(&self) -> Result<CloudAutomation> {
        let request = AutomationRequest::standard(self.cloud);
        let record =
            run_automation(self.store.as_ref(), &self.reconciler, &self.builder, &request).await?;
        let id = record.automation_id.unwrap_or(record.id);

        loop {
            self.supervisor.check_once().await?;
            let automation = self.automation(id).await?;
            match automation.status {
                AutomationStatus::Idle => tokio::time::sleep(self.check_interval).await,
                AutomationStatus::Running => {
                    self.supervisor
                        .stop_automation(id, AutomationStatus::Canceled)
                        .await?;
                    return self.automation(id).await;
                }
                _ => return Ok(automation),
            }
        }
    }

    async fn automation(&self, id: Uuid) -> Result<CloudAutomation> {
        let mut tx = self.store.begin(IsolationLevel::ReadCommitted).await?;
        tx.get_automation(id).await
    }

    /// Seed one workflow, run the processor and supervisor loops until
    /// `shutdown` resolves, then stop them.
    ///
    /// Returns early with the supervisor's error if it exhausts its failure
    /// budget.
    pub async fn serve(&self, shutdown: impl Future<Output = ()>) -> Result<()> {
        let (record, workflow) = self.start_run().await?;
        info!(workflow_id = %workflow.id, run_id = %record.id, "seeded workflow");

        let processor_loop = Arc::clone(&self.processor).start();
        let supervisor_loop = Arc::clone(&self.supervisor).start();

        let reporter_loop = (self.cloud == Cloud::Local).then(|| {
            let store = Arc::clone(&self.store);
            let (workflow_id, run_id) = (workflow.id, record.id);
            spawn_periodic("local-run-reporter", self.poll_interval, None, move || {
                let store = Arc::clone(&store);
                async move {
                    let workflow = get_workflow(store.as_ref(), workflow_id).await?;
                    report_local_run(store.as_ref(), &workflow, run_id).await.map(|_| ())
                }
            })
        });

        let outcome = tokio::select! {
            _ = shutdown => {
                info!("shutdown requested");
                Ok(())
            }
            result = supervisor_loop.join() => result,
        };

        processor_loop.shutdown().await?;
        if let Some(reporter) = reporter_loop {
            reporter.shutdown().await?;
        }
        outcome
    }
}

/// Without a real workload nothing reports run progress, so a local run
/// counts as done as soon as its workload is deployed.
async fn report_local_run<S: Store>(store: &S, workflow: &Workflow, run_id: Uuid) -> Result<bool> {
    let workload_done = workflow
        .tasks
        .iter()
        .any(|t| t.task_type == TaskType::DeployWorkload && t.status == TaskStatus::Completed);
    if !workload_done {
        return Ok(false);
    }

    let mut tx = store.begin(IsolationLevel::ReadCommitted).await?;
    let mut record = tx.get_run_record(run_id).await?;
    if record.status != RunStatus::Idle {
        return Ok(false);
    }
    record.status = RunStatus::Completed;
    record.updated_at = chrono::Utc::now();
    tx.save_run_record(&record).await?;
    tx.commit().await?;

    info!(%run_id, "local run reported completed");
    Ok(true)
}
