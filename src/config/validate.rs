// src/config/validate.rs

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::config::model::{ConfigFile, RawConfigFile, RetryConfig};
use crate::errors::{CloudbenchError, Result};
use crate::tasks::input_payload;
use crate::workflow::task_log::TaskLogger;

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = CloudbenchError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_config(&raw)?;
        Ok(ConfigFile::new_unchecked(raw))
    }
}

pub fn validate_config(cfg: &RawConfigFile) -> Result<()> {
    ensure_has_tasks(cfg)?;
    validate_processor(cfg)?;
    validate_supervisor(cfg)?;
    validate_task_dependencies(cfg)?;
    validate_task_inputs(cfg)?;
    validate_dag(cfg)?;
    Ok(())
}

fn config_error(msg: impl Into<String>) -> CloudbenchError {
    CloudbenchError::ConfigError(msg.into())
}

fn ensure_has_tasks(cfg: &RawConfigFile) -> Result<()> {
    if cfg.workflow.task.is_empty() {
        return Err(config_error(
            "config must contain at least one [workflow.task.<name>] section",
        ));
    }
    Ok(())
}

fn validate_processor(cfg: &RawConfigFile) -> Result<()> {
    let processor = &cfg.processor;

    if processor.max_concurrent_tasks == 0 {
        return Err(config_error(
            "[processor].max_concurrent_tasks must be >= 1 (got 0)",
        ));
    }
    if processor.poll_interval.as_duration().is_zero() {
        return Err(config_error("[processor].poll_interval must be positive"));
    }
    TaskLogger::from_level_name(&processor.task_logger_level)?;

    for (task_type, retry) in &processor.task_retry {
        validate_retry(&format!("[processor.task_retry.{task_type}]"), retry)?;
    }
    for (name, task) in &cfg.workflow.task {
        if let Some(retry) = &task.retry {
            validate_retry(&format!("[workflow.task.{name}.retry]"), retry)?;
        }
    }
    Ok(())
}

fn validate_retry(section: &str, retry: &RetryConfig) -> Result<()> {
    if retry.multiplier < 1.0 {
        return Err(config_error(format!(
            "{section} multiplier must be >= 1.0 (got {})",
            retry.multiplier
        )));
    }
    if !(0.0..=1.0).contains(&retry.randomization_factor) {
        return Err(config_error(format!(
            "{section} randomization_factor must be within [0, 1] (got {})",
            retry.randomization_factor
        )));
    }
    if retry.initial_interval.as_duration() > retry.max_interval.as_duration() {
        return Err(config_error(format!(
            "{section} initial_interval ({}) exceeds max_interval ({})",
            retry.initial_interval, retry.max_interval
        )));
    }
    Ok(())
}

fn validate_supervisor(cfg: &RawConfigFile) -> Result<()> {
    let supervisor = &cfg.supervisor;
    if supervisor.max_consecutive_failures == 0 {
        return Err(config_error(
            "[supervisor].max_consecutive_failures must be >= 1 (got 0)",
        ));
    }
    if supervisor.check_interval.as_duration().is_zero() {
        return Err(config_error("[supervisor].check_interval must be positive"));
    }
    Ok(())
}

fn validate_task_dependencies(cfg: &RawConfigFile) -> Result<()> {
    for (name, task) in cfg.workflow.task.iter() {
        for dep in task.after.iter() {
            if !cfg.workflow.task.contains_key(dep) {
                return Err(config_error(format!(
                    "task '{name}' has unknown dependency '{dep}' in `after`"
                )));
            }
            if dep == name {
                return Err(config_error(format!(
                    "task '{name}' cannot depend on itself in `after`"
                )));
            }
        }
    }
    Ok(())
}

fn validate_task_inputs(cfg: &RawConfigFile) -> Result<()> {
    for (name, task) in cfg.workflow.task.iter() {
        let Some(input) = &task.input else {
            continue;
        };
        let overrides = serde_json::to_value(input)?;
        input_payload(task.task_type, Some(&overrides))
            .map_err(|e| config_error(format!("task '{name}': {e}")))?;
    }
    Ok(())
}

fn validate_dag(cfg: &RawConfigFile) -> Result<()> {
    // Edge direction: dep -> task
    // For:
    //   [workflow.task.B]
    //   after = ["A"]
    // we add edge A -> B.
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();

    for name in cfg.workflow.task.keys() {
        graph.add_node(name.as_str());
    }

    for (name, task) in cfg.workflow.task.iter() {
        for dep in task.after.iter() {
            graph.add_edge(dep.as_str(), name.as_str(), ());
        }
    }

    match toposort(&graph, None) {
        Ok(_order) => Ok(()),
        Err(cycle) => Err(config_error(format!(
            "cycle detected in workflow involving task '{}'",
            cycle.node_id()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_src: &str) -> Result<ConfigFile> {
        let raw: RawConfigFile = toml::from_str(toml_src)?;
        ConfigFile::try_from(raw)
    }

    const CHAIN: &str = r#"
        [workflow.task.database]
        type = "deploy_database"

        [workflow.task.workload]
        type = "deploy_workload"
        after = ["database"]
    "#;

    #[test]
    fn accepts_a_simple_chain() {
        let cfg = parse(CHAIN).unwrap();
        let spec = cfg.workflow_spec().unwrap();
        assert_eq!(spec.tasks.len(), 2);
        assert_eq!(spec.edges, vec![("database".to_string(), "workload".to_string())]);
    }

    #[test]
    fn rejects_empty_workflow() {
        let err = parse("").unwrap_err();
        assert!(matches!(err, CloudbenchError::ConfigError(_)));
    }

    #[test]
    fn rejects_cycles_and_self_dependencies() {
        let cycle = r#"
            [workflow.task.a]
            type = "deploy_database"
            after = ["b"]

            [workflow.task.b]
            type = "deploy_workload"
            after = ["a"]
        "#;
        assert!(parse(cycle).unwrap_err().to_string().contains("cycle"));

        let selfish = r#"
            [workflow.task.a]
            type = "deploy_database"
            after = ["a"]
        "#;
        assert!(parse(selfish).unwrap_err().to_string().contains("itself"));
    }

    #[test]
    fn rejects_bad_retry_and_logger_settings() {
        let retry = format!("{CHAIN}\n[processor.task_retry.deploy_database]\nmultiplier = 0.5\n");
        assert!(parse(&retry).unwrap_err().to_string().contains("multiplier"));

        let logger = format!("[processor]\ntask_logger_level = \"loud\"\n{CHAIN}");
        assert!(matches!(parse(&logger).unwrap_err(), CloudbenchError::ConfigError(_)));
    }

    #[test]
    fn rejects_unknown_input_fields() {
        let src = format!("{CHAIN}\n[workflow.task.database.input]\nflavour = \"vanilla\"\n");
        let err = parse(&src).unwrap_err();
        assert!(err.to_string().contains("flavour"));
    }
}
