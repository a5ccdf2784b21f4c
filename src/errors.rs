// src/errors.rs

//! Crate-wide error aliases and helpers.

use thiserror::Error;

use crate::dag::DagError;
use crate::resource::actor::ActorError;
use crate::resource::quota::QuotaExceeded;

#[derive(Error, Debug)]
pub enum CloudbenchError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error(transparent)]
    Dag(#[from] DagError),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error(transparent)]
    Actor(#[from] ActorError),

    #[error(transparent)]
    QuotaExceeded(#[from] QuotaExceeded),

    #[error("Unsupported cloud: {0}")]
    UnsupportedCloud(String),

    #[error("Payload type mismatch: expected {expected}, got {actual}")]
    PayloadMismatch { expected: String, actual: String },

    #[error("No handler registered for task type {0}")]
    NoHandler(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CloudbenchError {
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        CloudbenchError::NotFound {
            kind,
            id: id.to_string(),
        }
    }
}

pub use anyhow::Error;
pub type Result<T, E = CloudbenchError> = std::result::Result<T, E>;
