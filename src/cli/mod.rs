//! Command-line interface

pub mod commands;
pub mod output;

use clap::{Parser, Subcommand};
use commands::{HistoryCommand, PlanCommand, RunCommand, ValidateCommand};
use std::ffi::OsString;

/// Workflow pipeline executor
#[derive(Debug, Parser, Clone)]
#[command(name = "flowline")]
#[command(version)]
#[command(about = "Run declarative workflows: triggers, matrix fan-out, provisioning and steps", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// Available commands
#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run workflows
    Run(RunCommand),

    /// Validate a workflow configuration
    Validate(ValidateCommand),

    /// Show the job instances a workflow expands into
    Plan(PlanCommand),

    /// Show run history
    History(HistoryCommand),
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
