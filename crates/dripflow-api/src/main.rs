//! dripflow CLI entry point.
//!
//! Binary name: `dripflow`
//!
//! Meant to be called by an external periodic trigger (cron, systemd timer):
//! every `dripflow run` is one cycle over all active flows.

mod cli;
mod state;

use clap::Parser;

use cli::{Cli, Commands};
use dripflow_observe::tracing_setup::{filter_for, init_tracing, shutdown_tracing};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_tracing(filter_for(cli.verbose, cli.quiet), cli.otel)
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))?;

    let result = dispatch(cli).await;
    shutdown_tracing();
    result
}

async fn dispatch(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        // Offline: no data dir or database needed.
        Commands::Validate { file } => cli::flow::validate(&file, cli.json).await,
        Commands::Run => {
            let state = AppState::init().await?;
            cli::run::run(&state, cli.json).await
        }
        Commands::Import {
            file,
            name,
            segment,
            status,
            id,
        } => {
            let state = AppState::init().await?;
            let args = cli::flow::ImportArgs {
                name,
                segment,
                status,
                id,
            };
            cli::flow::import(&state, &file, args, cli.json).await
        }
        Commands::Status { flow_id } => {
            let state = AppState::init().await?;
            cli::status::status(&state, flow_id, cli.json).await
        }
    }
}
