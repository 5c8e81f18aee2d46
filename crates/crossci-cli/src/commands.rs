//! CLI command definitions.

use crate::config::OutputFormat;
use clap::{Subcommand, ValueEnum};
use crossci_scheduler::TriggerEvent;
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum Commands {
    /// Write the default cross-platform cargo workflow
    Init {
        /// Overwrite an existing workflow file
        #[arg(long)]
        force: bool,
    },

    /// Validate a workflow file
    Validate {
        /// Path to workflow file
        path: Option<String>,
    },

    /// Show the jobs and steps each platform would run
    Plan {
        /// Path to workflow file
        path: Option<String>,

        /// Event to plan for
        #[arg(short, long, value_enum, default_value_t = EventArg::Push)]
        event: EventArg,
    },

    /// Run the workflow on this machine
    Run {
        /// Path to workflow file
        path: Option<String>,

        /// Event that triggers the run
        #[arg(short, long, value_enum, default_value_t = EventArg::Push)]
        event: EventArg,

        /// Only run jobs for these platforms
        #[arg(short, long = "platform")]
        platforms: Vec<String>,

        /// Output format for the run report
        #[arg(short, long, value_enum)]
        format: Option<OutputFormat>,

        /// Directory jobs run in (defaults to the current directory)
        #[arg(short, long)]
        workspace: Option<PathBuf>,
    },

    /// Print the JSON schema of the workflow file format
    Schema,

    /// Manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum EventArg {
    Push,
    PullRequest,
}

impl From<EventArg> for TriggerEvent {
    fn from(event: EventArg) -> Self {
        match event {
            EventArg::Push => TriggerEvent::Push { git_ref: None },
            EventArg::PullRequest => TriggerEvent::PullRequest { number: None },
        }
    }
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,

    /// Set configuration value
    Set {
        /// Key
        key: String,

        /// Value
        value: String,
    },
}
