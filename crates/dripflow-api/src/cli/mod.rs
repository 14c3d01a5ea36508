//! CLI command definitions for the `dripflow` binary.

pub mod flow;
pub mod run;
pub mod status;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use dripflow_types::flow::{FlowId, FlowStatus};

/// Drip flow execution engine.
#[derive(Parser)]
#[command(name = "dripflow", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all logging except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for debug, -vv for trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Export spans through OpenTelemetry (stdout exporter).
    #[arg(long, global = true)]
    pub otel: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run one cycle over every active flow.
    Run,

    /// Check a flow definition file without touching the database.
    Validate {
        /// Path to the definition JSON.
        file: PathBuf,
    },

    /// Create or replace a flow from a definition file.
    Import {
        /// Path to the definition JSON.
        file: PathBuf,

        /// Flow name.
        #[arg(long)]
        name: String,

        /// Target segment (D0-D3, D4-D7, D8-D15, D16-D30, D30+). Omit for all subjects.
        #[arg(long)]
        segment: Option<String>,

        /// Flow status (active, draft, paused).
        #[arg(long, default_value = "draft")]
        status: FlowStatus,

        /// Flow id to create or replace. Defaults to the next free id.
        #[arg(long)]
        id: Option<FlowId>,
    },

    /// Show execution states of a flow.
    Status {
        /// Flow id.
        flow_id: FlowId,
    },
}
