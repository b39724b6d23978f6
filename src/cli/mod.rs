//! Command-line interface

pub mod commands;
pub mod output;

use clap::{Parser, Subcommand};
use commands::{AnalyzeCommand, ConfigCommand, HistoryCommand, RunCommand, ValidateCommand};
use std::ffi::OsString;

/// Multi-platform build pipeline with regression tracking
#[derive(Debug, Parser, Clone)]
#[command(name = "build-pipeline")]
#[command(version)]
#[command(about = "Build every platform/environment combination, survive partial failures and track regressions", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to pipeline configuration file (YAML)
    #[arg(short, long, global = true)]
    pub config: Option<String>,
}

/// Available commands
#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run a build
    Run(RunCommand),

    /// Analyze build history for performance regressions
    Analyze(AnalyzeCommand),

    /// Show build history
    History(HistoryCommand),

    /// Validate a configuration file
    Validate(ValidateCommand),

    /// Print the effective configuration
    Config(ConfigCommand),
}

impl Cli {
    /// Parse CLI arguments from environment
    pub fn from_args() -> Self {
        Self::parse()
    }

    /// Parse CLI arguments from a slice
    pub fn try_parse_from<I, T>(itr: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        <Self as Parser>::try_parse_from(itr)
    }
}
