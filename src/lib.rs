// src/lib.rs

pub mod automation;
pub mod cli;
pub mod config;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod instance;
pub mod logging;
pub mod resource;
pub mod store;
pub mod tasks;
pub mod types;
pub mod uow;
pub mod workflow;

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, info};

use crate::cli::{CliArgs, Mode};
use crate::config::loader::load_and_validate;
use crate::config::model::ConfigFile;
use crate::dag::Dag;
use crate::engine::Runtime;
use crate::instance::InstanceInfo;
use crate::resource::local::LocalActor;
use crate::resource::{Cloud, ResourceActor};
use crate::store::MemoryStore;
use crate::workflow::lifecycle::instantiate;

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading
/// - the store, the resource actor and the runtime
/// - one of the run modes (`--dry-run`, `--once`, `--automate`, serve)
/// - Ctrl-C handling
pub async fn run(args: CliArgs) -> Result<()> {
    let cfg = load_and_validate(&args.config)?;

    match args.mode() {
        Mode::DryRun => print_dry_run(&cfg)?,
        Mode::Once => {
            let workflow = build_runtime(&cfg).await?.run_workflow_once().await?;
            println!("workflow '{}' ({}) finished:", workflow.name, workflow.id);
            for task in &workflow.tasks {
                println!("  - {:<20} {}", task.task_type, task.status);
            }
        }
        Mode::Automate => {
            let automation = build_runtime(&cfg).await?.run_automation_once().await?;
            println!("automation {} finished: {}", automation.id, automation.status);
        }
        Mode::Serve => {
            build_runtime(&cfg)
                .await?
                .serve(async {
                    if let Err(e) = tokio::signal::ctrl_c().await {
                        eprintln!("failed to listen for Ctrl+C: {e}");
                    }
                })
                .await?;
        }
    }
    Ok(())
}

async fn build_runtime(cfg: &ConfigFile) -> Result<Runtime<MemoryStore>> {
    let instance = InstanceInfo::for_service(cfg.instance.service_name.clone());
    info!(
        instance_id = instance.instance_id(),
        cloud = %cfg.deployment.cloud,
        "cloudbench starting"
    );

    let actor = resource_actor(cfg)?;
    let store = Arc::new(MemoryStore::new());
    Ok(Runtime::new(cfg, instance, store, actor).await?)
}

fn resource_actor(cfg: &ConfigFile) -> Result<Arc<dyn ResourceActor>> {
    match cfg.deployment.cloud {
        Cloud::Local => Ok(Arc::new(LocalActor::new(
            cfg.deployment.local_ready_after_reads,
        ))),
        other => anyhow::bail!(
            "no control plane client for cloud '{other}'; only 'local' can be driven from the binary"
        ),
    }
}

fn print_dry_run(cfg: &ConfigFile) -> Result<()> {
    let spec = cfg.workflow_spec()?;
    let workflow = instantiate(&spec)?;

    // Tasks are instantiated in template order.
    let keys: HashMap<_, _> = workflow
        .tasks
        .iter()
        .zip(&spec.tasks)
        .map(|(task, template)| (task.id, template.key.as_str()))
        .collect();

    println!("cloudbench dry-run");
    println!("  cloud: {}", cfg.deployment.cloud);
    println!("  namespace: {}", cfg.deployment.namespace);
    println!("  network: {}", cfg.deployment.network_cidr);
    println!("  poll_interval: {}", cfg.processor.poll_interval);
    println!("  max_concurrent_tasks: {}", cfg.processor.max_concurrent_tasks);
    for quota in cfg.quotas() {
        println!("  quota {}:{} <= {}", quota.cloud, quota.kind, quota.maximum);
    }
    println!();
    println!("workflow '{}':", spec.name);

    for (depth, layer) in workflow.layers()?.iter().enumerate() {
        println!("  layer {depth}:");
        for task in layer {
            let key = keys.get(&task.id).copied().unwrap_or("?");
            let retry = &task.retry_settings;
            println!("    - {key} ({})", task.task_type);
            println!("      retry: {:?}, max_attempts: {}", retry.policy, retry.max_attempts);
        }
    }

    debug!("dry-run complete (nothing provisioned)");
    Ok(())
}
