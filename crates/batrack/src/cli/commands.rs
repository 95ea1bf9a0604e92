//! CLI command definitions.
//!
//! This module defines the structure of all CLI subcommands.

use std::path::PathBuf;

use clap::{Args, Subcommand};

/// Service management commands.
#[derive(Debug, Subcommand)]
pub enum ServiceCommand {
    /// Install the recorder as a systemd service
    Install {
        /// User the service runs as
        #[arg(short, long, default_value = "pi")]
        user: String,

        /// Home directory receiving the launch script
        #[arg(long, value_name = "DIR")]
        home: Option<PathBuf>,

        /// Start the service after installation
        #[arg(long)]
        start: bool,
    },

    /// Stop, disable and remove the systemd service
    Uninstall,

    /// Start the service
    Start,

    /// Stop the service
    Stop,

    /// Show the service state
    Status,

    /// Show the service journal
    Logs {
        /// Keep following new entries
        #[arg(short, long)]
        follow: bool,
    },
}

/// Status command arguments.
#[derive(Debug, Args)]
pub struct StatusCommand {
    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// Events command arguments.
#[derive(Debug, Args)]
pub struct EventsCommand {
    /// Show the last N events
    #[arg(short, long, default_value = "20")]
    pub last: usize,

    /// Only events of this source (e.g. `AudioAnalysisUnit`)
    #[arg(short, long)]
    pub source: Option<String>,

    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
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

    /// Show configuration file path
    Path,

    /// Validate configuration file
    Validate {
        /// Path to configuration file to validate
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
}
