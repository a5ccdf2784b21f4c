// src/workflow/task_log.rs

use std::str::FromStr;

use chrono::Utc;
use serde_json::{Map, Value};
use tracing::Level;
use tracing::level_filters::LevelFilter;
use tracing::{debug, error, info, warn};

use super::model::{LogRecord, WorkflowTask};
use crate::errors::{CloudbenchError, Result};

/// Writes to a task's own log and mirrors every record to `tracing`.
///
/// Records below the configured level are dropped from the task log but
/// still reach `tracing`, which applies its own filter.
#[derive(Debug, Clone, Copy)]
pub struct TaskLogger {
    level: LevelFilter,
}

impl Default for TaskLogger {
    fn default() -> Self {
        Self {
            level: LevelFilter::DEBUG,
        }
    }
}

impl TaskLogger {
    pub fn new(level: LevelFilter) -> Self {
        Self { level }
    }

    pub fn from_level_name(name: &str) -> Result<Self> {
        LevelFilter::from_str(name)
            .map(Self::new)
            .map_err(|_| CloudbenchError::ConfigError(format!("invalid task logger level: {name}")))
    }

    pub fn debug(&self, task: &mut WorkflowTask, message: &str, fields: Value) {
        self.log(task, Level::DEBUG, message, fields);
    }

    pub fn info(&self, task: &mut WorkflowTask, message: &str, fields: Value) {
        self.log(task, Level::INFO, message, fields);
    }

    pub fn warn(&self, task: &mut WorkflowTask, message: &str, fields: Value) {
        self.log(task, Level::WARN, message, fields);
    }

    pub fn error(&self, task: &mut WorkflowTask, message: &str, fields: Value) {
        self.log(task, Level::ERROR, message, fields);
    }

    fn log(&self, task: &mut WorkflowTask, level: Level, message: &str, fields: Value) {
        let mut fields = match fields {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => Map::from_iter([("value".to_string(), other)]),
        };
        fields.insert("task_id".into(), Value::String(task.id.to_string()));
        fields.insert("task_type".into(), Value::String(task.task_type.to_string()));
        fields.insert("task_status".into(), Value::String(task.status.to_string()));

        let rendered = Value::Object(fields.clone());
        if level == Level::ERROR {
            error!(task_id = %task.id, fields = %rendered, "{message}");
        } else if level == Level::WARN {
            warn!(task_id = %task.id, fields = %rendered, "{message}");
        } else if level == Level::INFO {
            info!(task_id = %task.id, fields = %rendered, "{message}");
        } else {
            debug!(task_id = %task.id, fields = %rendered, "{message}");
        }

        if level > self.level {
            return;
        }
        task.logs.push(LogRecord {
            at: Utc::now(),
            level: level.as_str().to_lowercase(),
            message: message.to_string(),
            fields,
        });
    }
}
