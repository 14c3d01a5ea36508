//! `dripflow status <flow-id>`: execution states of one flow.

use anyhow::{Result, bail};
use chrono::{DateTime, Utc};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;

use dripflow_core::flow::graph::{GraphSource, load_graph_with_source};
use dripflow_core::repository::execution::ExecutionStateRepository;
use dripflow_core::repository::flow::FlowRepository;
use dripflow_infra::sqlite::execution::SqliteExecutionStateRepository;
use dripflow_infra::sqlite::flow::SqliteFlowRepository;
use dripflow_infra::sqlite::outbound::SqliteOutboundQueue;
use dripflow_types::execution::ExecutionStatus;
use dripflow_types::flow::FlowId;

use crate::state::AppState;

pub async fn status(state: &AppState, flow_id: FlowId, json: bool) -> Result<()> {
    let flows = SqliteFlowRepository::new(state.db_pool.clone());
    let Some(flow) = flows.get(flow_id).await? else {
        bail!("flow {flow_id} not found");
    };

    let (graph, source) = load_graph_with_source(&flow);
    let executions = SqliteExecutionStateRepository::new(state.db_pool.clone())
        .list_for_flow(flow_id)
        .await?;
    let pending = SqliteOutboundQueue::new(state.db_pool.clone())
        .count_pending(flow_id)
        .await?;
    let finished = executions.iter().filter(|e| e.is_finished()).count();

    if json {
        let out = serde_json::json!({
            "flow": {
                "id": flow.id,
                "name": flow.name,
                "status": flow.status,
                "target_segment": flow.target_segment,
                "steps": graph.len(),
                "graph_source": source_label(source),
            },
            "executions": executions,
            "finished": finished,
            "pending_outputs": pending,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!();
    println!(
        "  Flow {} '{}' ({})",
        flow.id,
        style(&flow.name).cyan(),
        flow.status
    );
    println!(
        "  Segment: {}  Steps: {} ({})  Pending outputs: {}",
        flow.target_segment.as_deref().unwrap_or("all"),
        graph.len(),
        source_label(source),
        pending
    );
    println!();

    if executions.is_empty() {
        println!("  No subjects have entered this flow yet.");
        println!();
        return Ok(());
    }

    let now = Utc::now();
    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Subject").fg(Color::Cyan),
            Cell::new("Step"),
            Cell::new("Status"),
            Cell::new("Next run"),
            Cell::new("Updated"),
        ]);

    for exec in &executions {
        let status = match exec.status {
            ExecutionStatus::Finished => Cell::new("finished").fg(Color::DarkGrey),
            ExecutionStatus::Active if exec.is_waiting(now) => {
                Cell::new("waiting").fg(Color::Yellow)
            }
            ExecutionStatus::Active => Cell::new("due").fg(Color::Green),
        };
        table.add_row(vec![
            Cell::new(exec.subject_id),
            Cell::new(exec.current_step.as_deref().unwrap_or("-")),
            status,
            Cell::new(exec.next_run_at.map(format_time).unwrap_or_else(|| "-".to_string())),
            Cell::new(format_time(exec.updated_at)),
        ]);
    }
    println!("{table}");
    println!();
    println!(
        "  {} of {} subject(s) finished",
        style(finished).bold(),
        executions.len()
    );
    println!();
    Ok(())
}

fn source_label(source: GraphSource) -> &'static str {
    match source {
        GraphSource::Modern => "definition",
        GraphSource::Legacy => "legacy rows",
        GraphSource::None => "none",
    }
}

fn format_time(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M").to_string()
}
