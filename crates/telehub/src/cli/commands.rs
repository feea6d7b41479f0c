//! CLI command definitions.
//!
//! This module defines the structure of all CLI subcommands.

use std::path::PathBuf;

use clap::{Args, Subcommand, ValueEnum};

/// Arguments of `telehub serve`.
#[derive(Debug, Args)]
pub struct ServeCommand {
    /// Address to bind (overrides `server.host`)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to listen on (overrides `server.port`)
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Number of HTTP workers (overrides `server.workers`)
    #[arg(short, long)]
    pub workers: Option<usize>,
}

/// Dashboard commands.
#[derive(Debug, Subcommand)]
pub enum DashboardCommand {
    /// Serve the dashboard page
    Serve {
        /// Address to bind (overrides `dashboard.host`)
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on (overrides `dashboard.port`)
        #[arg(short, long)]
        port: Option<u16>,

        /// Base URL of the telemetry API (overrides `dashboard.api_url`)
        #[arg(long)]
        api_url: Option<String>,
    },

    /// Print the dashboard to the terminal
    Show(ShowCommand),
}

/// Arguments of `telehub dashboard show`.
#[derive(Debug, Args)]
pub struct ShowCommand {
    /// Base URL of the telemetry API (overrides `dashboard.api_url`)
    #[arg(long)]
    pub api_url: Option<String>,

    /// Read the configured database directly instead of calling the API
    #[arg(long, conflicts_with = "api_url")]
    pub local: bool,

    /// Number of recent sessions to show
    #[arg(short, long)]
    pub limit: Option<usize>,

    /// Session to show in detail (defaults to the most recent)
    #[arg(short, long)]
    pub session: Option<String>,

    /// Also write the recent sessions to a CSV file
    #[arg(long, value_name = "FILE")]
    pub export_csv: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    pub format: OutputFormat,
}

/// Arguments of `telehub send-test`.
#[derive(Debug, Args)]
pub struct SendTestCommand {
    /// Base URL of the telemetry API (overrides `dashboard.api_url`)
    #[arg(long)]
    pub api_url: Option<String>,

    /// Session ID to report (defaults to a timestamped test session)
    #[arg(long)]
    pub session: Option<String>,
}

/// Database maintenance commands.
#[derive(Debug, Subcommand)]
pub enum DbCommand {
    /// Show database statistics
    Stats {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Delete events older than the retention period
    Prune {
        /// Maximum age in days (overrides `storage.max_age_days`)
        #[arg(short, long)]
        days: Option<u32>,
    },

    /// Delete every stored event
    Clear {
        /// Skip confirmation
        #[arg(short, long)]
        yes: bool,
    },
}

/// Configuration commands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Show the configuration file path
    Path,

    /// Validate configuration
    Validate {
        /// Path to configuration file to validate
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
}

/// Output format for the terminal dashboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Plain text
    #[default]
    Text,
    /// Standalone HTML page
    Html,
}
