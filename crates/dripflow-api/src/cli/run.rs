//! `dripflow run`: one scheduler cycle.

use anyhow::{Context, Result};
use chrono::Utc;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;

use dripflow_core::flow::scheduler::{FlowOutcome, RunReport};

use crate::state::AppState;

pub async fn run(state: &AppState, json: bool) -> Result<()> {
    let scheduler = state
        .scheduler()
        .context("cannot start the message generator")?;
    let report = scheduler.run_cycle(Utc::now()).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    Ok(())
}

fn outcome_cell(outcome: &FlowOutcome) -> Cell {
    match outcome {
        FlowOutcome::Processed => Cell::new("processed").fg(Color::Green),
        FlowOutcome::NoSubjects => Cell::new("no subjects"),
        FlowOutcome::EmptyGraph => Cell::new("empty graph").fg(Color::Yellow),
        FlowOutcome::Failed(reason) => Cell::new(format!("failed: {reason}")).fg(Color::Red),
    }
}

fn print_report(report: &RunReport) {
    println!();
    if report.flows.is_empty() {
        println!("  No active flows.");
        println!();
        return;
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Flow").fg(Color::Cyan),
            Cell::new("Name"),
            Cell::new("Outcome"),
            Cell::new("Advanced"),
            Cell::new("Finalized"),
            Cell::new("Skipped"),
            Cell::new("Failed"),
            Cell::new("Outputs"),
        ]);

    for flow in &report.flows {
        table.add_row(vec![
            Cell::new(flow.flow_id),
            Cell::new(&flow.name),
            outcome_cell(&flow.outcome),
            Cell::new(flow.counts.advanced),
            Cell::new(flow.counts.finalized),
            Cell::new(flow.counts.skipped),
            Cell::new(flow.counts.failed),
            Cell::new(flow.counts.outputs),
        ]);
    }
    println!("{table}");

    let totals = &report.totals;
    println!();
    println!(
        "  {} {} subject(s) across {} flow(s): {} advanced, {} finalized, {} skipped, {} failed",
        style("*").green().bold(),
        totals.total(),
        report.flows.len(),
        totals.advanced,
        totals.finalized,
        totals.skipped,
        totals.failed,
    );
    println!("  Outputs queued: {}", style(totals.outputs).bold());
    let failed_flows = report.failed_flows();
    if failed_flows > 0 {
        println!(
            "  {}",
            style(format!("{failed_flows} flow(s) could not be processed")).red()
        );
    }
    println!();
}
