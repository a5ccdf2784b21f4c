// src/automation/model.rs

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AutomationStatus {
    Idle,
    Running,
    Failed,
    Canceled,
}

impl AutomationStatus {
    pub fn is_active(self) -> bool {
        matches!(self, AutomationStatus::Idle | AutomationStatus::Running)
    }
}

impl fmt::Display for AutomationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AutomationStatus::Idle => "IDLE",
            AutomationStatus::Running => "RUNNING",
            AutomationStatus::Failed => "FAILED",
            AutomationStatus::Canceled => "CANCELED",
        };
        f.write_str(s)
    }
}

/// A database + workload pair of resource trees provisioned together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloudAutomation {
    pub id: Uuid,
    pub database_root_id: Uuid,
    pub workload_root_id: Uuid,
    pub status: AutomationStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CloudAutomation {
    pub fn new(id: Uuid, database_root_id: Uuid, workload_root_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id,
            database_root_id,
            workload_root_id,
            status: AutomationStatus::Idle,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn roots(&self) -> [Uuid; 2] {
        [self.database_root_id, self.workload_root_id]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Idle,
    Running,
    Completed,
    Failed,
    Cancelled,
}

/// Progress record of one benchmark run, written by the workload itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: Uuid,
    pub automation_id: Option<Uuid>,
    pub status: RunStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RunRecord {
    pub fn new(id: Uuid, automation_id: Option<Uuid>) -> Self {
        let now = Utc::now();
        Self {
            id,
            automation_id,
            status: RunStatus::Idle,
            created_at: now,
            updated_at: now,
        }
    }
}
