//! Command-line interface for batrack.
//!
//! This module provides the CLI structure for the `batrack` binary.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub use commands::{ConfigCommand, EventsCommand, ServiceCommand, StatusCommand};

/// batrack - Sensor-triggered bat activity recorder
///
/// Watches radio-tag detections, ultrasonic audio and a camera, and records
/// audio and video while bats are around.
#[derive(Debug, Parser)]
#[command(name = "batrack")]
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
    /// Run the recorder in the foreground
    Run,

    /// Manage the systemd service
    #[command(subcommand)]
    Service(ServiceCommand),

    /// Show service and event store status
    Status(StatusCommand),

    /// Show recorded trigger events
    Events(EventsCommand),

    /// List audio capture devices
    Devices,

    /// View or validate configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

impl Cli {
    /// Get the verbosity level based on flags.
    ///
    /// Returns `None` when no flag was given, so the configured log level
    /// can apply.
    #[must_use]
    pub fn verbosity(&self) -> Option<crate::logging::Verbosity> {
        if self.quiet {
            Some(crate::logging::Verbosity::Quiet)
        } else {
            match self.verbose {
                0 => None,
                1 => Some(crate::logging::Verbosity::Verbose),
                _ => Some(crate::logging::Verbosity::Trace),
            }
        }
    }
}
