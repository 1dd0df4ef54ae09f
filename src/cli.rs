//! Command-line interface for the patrol attendance engine.
//!
//! Defines the [`Cli`] struct with its [`Command`] subcommands and the
//! global flags (`--config`, `--db`, `--verbose`).

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use crate::lifecycle::ManualAction;
use crate::model::{AlertAction, CheckInAction};

/// Patrol: geofence attendance for security rounds.
#[derive(Debug, Parser)]
#[command(name = "patrol", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Path to the configuration file.
    #[arg(long, global = true, default_value = crate::config::DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    /// Database path, overriding the config file and environment.
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    /// Enable debug logging.
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Ingest position reports (a JSON object or array) from a file or stdin.
    Ingest {
        /// JSON file to read; stdin when omitted.
        file: Option<PathBuf>,
    },

    /// Re-run attendance for a stored sample.
    Reprocess { sample_id: String },

    /// Run the periodic jobs until interrupted.
    Run,

    /// Run one sweep pass now.
    Sweep,

    /// Run one assignment status refresh now.
    Refresh,

    /// Run the alert audits now.
    Alerts,

    /// Show presence counts, active alerts and, optionally, agent details.
    Status {
        /// Agent to show in detail. With `--verbose`, every agent is shown.
        #[arg(long)]
        agent: Option<String>,
    },

    /// Load agents, rounds and assignments from a TOML fixture.
    Seed { file: PathBuf },

    /// Apply an operator transition to an assignment.
    Assignment {
        action: AssignmentArg,
        id: String,
    },

    /// Confirm or cancel a check-in.
    #[command(name = "check-in")]
    CheckIn { action: CheckInArg, id: String },

    /// Resolve, ignore or reopen an alert.
    Alert { action: AlertArg, id: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum AssignmentArg {
    /// SCHEDULED → ACTIVE while the window is open.
    Start,
    /// ACTIVE → COMPLETED once the window is over.
    Finish,
    /// SCHEDULED or ACTIVE → CANCELLED.
    Cancel,
    /// CANCELLED → SCHEDULED.
    Plan,
}

impl From<AssignmentArg> for ManualAction {
    fn from(arg: AssignmentArg) -> Self {
        match arg {
            AssignmentArg::Start => ManualAction::Start,
            AssignmentArg::Finish => ManualAction::Finish,
            AssignmentArg::Cancel => ManualAction::Cancel,
            AssignmentArg::Plan => ManualAction::Plan,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CheckInArg {
    Confirm,
    Cancel,
}

impl From<CheckInArg> for CheckInAction {
    fn from(arg: CheckInArg) -> Self {
        match arg {
            CheckInArg::Confirm => CheckInAction::Confirm,
            CheckInArg::Cancel => CheckInAction::Cancel,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum AlertArg {
    Resolve,
    Ignore,
    Reopen,
}

impl From<AlertArg> for AlertAction {
    fn from(arg: AlertArg) -> Self {
        match arg {
            AlertArg::Resolve => AlertAction::Resolve,
            AlertArg::Ignore => AlertAction::Ignore,
            AlertArg::Reopen => AlertAction::Reopen,
        }
    }
}
