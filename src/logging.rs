// src/logging.rs

//! Logging setup for `cloudbench` using `tracing` + `tracing-subscriber`.
//!
//! The filter comes from, in order:
//! 1. `--log-level` (one level for everything),
//! 2. `CLOUDBENCH_LOG`, read as `EnvFilter` directives, so both `debug`
//!    and `cloudbench::workflow=trace,info` work,
//! 3. `info`.
//!
//! Logs go to STDERR; stdout only carries run summaries.

use anyhow::Result;
use tracing_subscriber::{EnvFilter, fmt};

use crate::cli::LogLevel;

pub const LOG_ENV: &str = "CLOUDBENCH_LOG";

const DEFAULT_DIRECTIVE: &str = "info";

/// Install the global subscriber. Fails if one is already installed.
pub fn init_logging(cli_level: Option<LogLevel>) -> Result<()> {
    let env = std::env::var(LOG_ENV).ok();
    let filter = build_filter(cli_level, env.as_deref());

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {e}"))?;

    Ok(())
}

fn build_filter(cli_level: Option<LogLevel>, env: Option<&str>) -> EnvFilter {
    if let Some(level) = cli_level {
        return EnvFilter::new(directive(level));
    }

    match env.map(str::trim).filter(|s| !s.is_empty()) {
        Some(directives) => EnvFilter::try_new(directives).unwrap_or_else(|err| {
            eprintln!("ignoring invalid {LOG_ENV}={directives:?}: {err}");
            EnvFilter::new(DEFAULT_DIRECTIVE)
        }),
        None => EnvFilter::new(DEFAULT_DIRECTIVE),
    }
}

fn directive(level: LogLevel) -> &'static str {
    match level {
        LogLevel::Error => "error",
        LogLevel::Warn => "warn",
        LogLevel::Info => "info",
        LogLevel::Debug => "debug",
        LogLevel::Trace => "trace",
    }
}
