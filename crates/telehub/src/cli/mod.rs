//! Command-line interface for telehub.
//!
//! This module provides the CLI structure for the `telehub` binary.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub use commands::{
    ConfigCommand, DashboardCommand, DbCommand, OutputFormat, SendTestCommand, ServeCommand,
    ShowCommand,
};

/// telehub - Installation telemetry service
///
/// Receives installation-progress events from installer scripts, stores them,
/// and serves analytics through an HTTP API and a dashboard.
#[derive(Debug, Parser)]
#[command(name = "telehub")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to custom configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// The command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the telemetry API server
    Serve(ServeCommand),

    /// Serve or print the dashboard
    #[command(subcommand)]
    Dashboard(DashboardCommand),

    /// Post a sample event to the API and print the resulting statistics
    SendTest(SendTestCommand),

    /// Inspect or maintain the telemetry database
    #[command(subcommand)]
    Db(DbCommand),

    /// View configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

impl Cli {
    /// Get the verbosity level based on flags.
    #[must_use]
    pub fn verbosity(&self) -> crate::logging::Verbosity {
        crate::logging::Verbosity::from_flags(self.quiet, self.verbose)
    }
}
