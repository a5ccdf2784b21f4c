// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use crate::config::default_config_path;

/// Command-line arguments for `cloudbench`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "cloudbench",
    version,
    about = "Provision cloud benchmark infrastructure from a workflow of tasks.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (TOML).
    #[arg(long, short = 'c', value_name = "PATH", default_value_os_t = default_config_path())]
    pub config: PathBuf,

    /// Run one workflow from the template until it is finished and cleaned
    /// up, then exit.
    #[arg(long, group = "mode")]
    pub once: bool,

    /// Provision one automation, supervise it until it is running, tear it
    /// down and exit.
    #[arg(long, group = "mode")]
    pub automate: bool,

    /// Parse + validate, print the workflow layers, but don't provision
    /// anything.
    #[arg(long, group = "mode")]
    pub dry_run: bool,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `CLOUDBENCH_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,
}

/// What the binary does after loading its config.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Processor and supervisor loops until Ctrl-C.
    Serve,
    Once,
    Automate,
    DryRun,
}

impl CliArgs {
    pub fn mode(&self) -> Mode {
        if self.dry_run {
            Mode::DryRun
        } else if self.once {
            Mode::Once
        } else if self.automate {
            Mode::Automate
        } else {
            Mode::Serve
        }
    }
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_serving_the_local_config() {
        let args = CliArgs::try_parse_from(["cloudbench"]).unwrap();
        assert_eq!(args.mode(), Mode::Serve);
        assert_eq!(args.config, PathBuf::from("Cloudbench.toml"));
        assert!(args.log_level.is_none());
    }

    #[test]
    fn modes_are_mutually_exclusive() {
        let args = CliArgs::try_parse_from(["cloudbench", "-c", "bench.toml", "--automate"]).unwrap();
        assert_eq!(args.mode(), Mode::Automate);
        assert_eq!(args.config, PathBuf::from("bench.toml"));

        assert!(CliArgs::try_parse_from(["cloudbench", "--once", "--dry-run"]).is_err());
    }
}
