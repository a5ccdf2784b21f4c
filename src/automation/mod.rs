// src/automation/mod.rs

//! Database + workload resource trees provisioned and supervised as one
//! unit.

pub mod model;
pub mod provision;
pub mod supervisor;

pub use model::{AutomationStatus, CloudAutomation, RunRecord, RunStatus};
pub use provision::{AutomationRequest, run_automation};
pub use supervisor::{AutomationSupervisor, CheckReport};
