//! # saneitizer
//!
//! Command-line interface over `saneitizer-core`.
//!
//! ## Commands
//!
//! - `saneitize check` - Scan a page id range of a snapshot and fix drift
//! - `saneitize chunks` - Split a page id range into `check` invocations
//!
//! ## Configuration
//!
//! Settings come from `saneitizer.toml` (see `--config` and
//! `SANEITIZER_CONFIG`); flags override the file.

#![forbid(unsafe_code)]
// CLI uses print! macros intentionally
#![allow(clippy::print_stdout)]
#![allow(clippy::print_stderr)]

pub mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use saneitizer_core::config::{LogFormat, SaneitizerConfig, resolve_config_path};
use saneitizer_core::logging::LogLevel;

/// saneitize - search index drift detection and repair.
#[derive(Debug, Parser)]
#[command(name = "saneitize")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to saneitizer.toml.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level, overriding the config file.
    #[arg(long, global = true)]
    pub log_level: Option<LogLevel>,

    /// Log format, overriding the config file.
    #[arg(long, global = true)]
    pub log_format: Option<LogFormat>,

    /// Output format for results.
    #[arg(long, global = true, value_enum, default_value = "text")]
    pub format: OutputFormat,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Load the config file, if any, and apply the logging overrides.
    ///
    /// The second value is whether a file was actually read.
    pub fn load_config(&self) -> anyhow::Result<(SaneitizerConfig, bool)> {
        let path = resolve_config_path(self.config.as_deref());
        let mut config = match &path {
            Some(path) => SaneitizerConfig::load(path)?,
            None => SaneitizerConfig::default(),
        };
        if let Some(level) = self.log_level {
            config.log.level = level;
        }
        if let Some(format) = self.log_format {
            config.log.format = format;
        }
        Ok((config, path.is_some()))
    }
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Check a page id range and repair what drifted.
    Check(commands::check::CheckArgs),
    /// Print `check` invocations that together cover a page id range.
    Chunks(commands::chunks::ChunksArgs),
}

/// Output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// JSON output.
    Json,
}
