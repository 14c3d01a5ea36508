//! Campaign scheduler: one cycle over every active flow.
//!
//! A cycle is invoked by an external periodic trigger (cron calling
//! `dripflow run`). For each active flow it resolves a bounded batch of
//! eligible subjects, loads the graph once, and runs every subject exactly
//! one hop. Per-subject failures never abort the flow and per-flow failures
//! never abort the cycle.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use dripflow_types::config::EngineConfig;
use dripflow_types::error::RepositoryError;
use dripflow_types::flow::{FlowDefinition, FlowId};
use dripflow_types::subject::SubjectId;
use serde::Serialize;
use tracing::Instrument;

use super::graph::load_graph;
use super::step_runner::{StepOutcome, StepRunner};
use crate::generator::MessageGenerator;
use crate::repository::execution::ExecutionStateRepository;
use crate::repository::flow::FlowRepository;
use crate::repository::outbound::OutboundQueue;
use crate::repository::segment::SegmentResolver;

// ---------------------------------------------------------------------------
// Report types
// ---------------------------------------------------------------------------

/// Subject tallies for a flow or a whole cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunCounts {
    pub advanced: u32,
    pub finalized: u32,
    /// Waiting or already finished subjects.
    pub skipped: u32,
    /// Generation failures and storage errors.
    pub failed: u32,
    /// Outputs handed to the delivery queue.
    pub outputs: u32,
}

impl RunCounts {
    fn record(&mut self, outcome: &StepOutcome) {
        match outcome {
            StepOutcome::AlreadyFinished | StepOutcome::Waiting { .. } => self.skipped += 1,
            StepOutcome::Advanced { .. } => self.advanced += 1,
            StepOutcome::Finalized { .. } => self.finalized += 1,
            StepOutcome::GenerationFailed { .. } => self.failed += 1,
        }
        if outcome.produced_output() {
            self.outputs += 1;
        }
    }

    fn add(&mut self, other: &RunCounts) {
        self.advanced += other.advanced;
        self.finalized += other.finalized;
        self.skipped += other.skipped;
        self.failed += other.failed;
        self.outputs += other.outputs;
    }

    /// Subjects the cycle looked at.
    pub fn total(&self) -> u32 {
        self.advanced + self.finalized + self.skipped + self.failed
    }
}

/// How a single flow fared during the cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum FlowOutcome {
    Processed,
    NoSubjects,
    /// The flow has no usable steps; skipped this cycle.
    EmptyGraph,
    /// Subject resolution failed; the flow was not processed.
    Failed(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct FlowReport {
    pub flow_id: FlowId,
    pub name: String,
    pub outcome: FlowOutcome,
    pub counts: RunCounts,
}

/// Aggregated result of one cycle, for operational logging.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub flows: Vec<FlowReport>,
    pub totals: RunCounts,
}

impl RunReport {
    pub fn failed_flows(&self) -> usize {
        self.flows
            .iter()
            .filter(|f| matches!(f.outcome, FlowOutcome::Failed(_)))
            .count()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("failed to list active flows: {0}")]
    ListFlows(#[source] RepositoryError),
}

// ---------------------------------------------------------------------------
// CampaignScheduler
// ---------------------------------------------------------------------------

/// Drives every active flow forward by at most one hop per subject.
pub struct CampaignScheduler<F, S, E, G, Q> {
    flows: F,
    segments: S,
    runner: StepRunner<E, G, Q>,
    max_batch_size: u32,
}

impl<F, S, E, G, Q> CampaignScheduler<F, S, E, G, Q>
where
    F: FlowRepository,
    S: SegmentResolver,
    E: ExecutionStateRepository,
    G: MessageGenerator,
    Q: OutboundQueue,
{
    pub fn new(flows: F, segments: S, runner: StepRunner<E, G, Q>, config: &EngineConfig) -> Self {
        Self {
            flows,
            segments,
            runner,
            max_batch_size: config.max_batch_size.max(1),
        }
    }

    pub fn runner(&self) -> &StepRunner<E, G, Q> {
        &self.runner
    }

    pub fn flows(&self) -> &F {
        &self.flows
    }

    /// Run one cycle at `now`.
    ///
    /// Only a failure to list the active flows is returned as an error.
    pub async fn run_cycle(&self, now: DateTime<Utc>) -> Result<RunReport, SchedulerError> {
        let flows = self
            .flows
            .list_active()
            .await
            .map_err(SchedulerError::ListFlows)?;

        tracing::info!(flows = flows.len(), max_batch = self.max_batch_size, "cycle started");

        let mut report = RunReport {
            started_at: now,
            flows: Vec::with_capacity(flows.len()),
            totals: RunCounts::default(),
        };

        for flow in &flows {
            let span = tracing::info_span!("flow", flow_id = flow.id, name = %flow.name);
            let flow_report = self.run_flow(flow, now).instrument(span).await;
            report.totals.add(&flow_report.counts);
            report.flows.push(flow_report);
        }

        tracing::info!(
            flows = report.flows.len(),
            advanced = report.totals.advanced,
            finalized = report.totals.finalized,
            skipped = report.totals.skipped,
            failed = report.totals.failed,
            outputs = report.totals.outputs,
            "cycle finished"
        );

        Ok(report)
    }

    async fn run_flow(&self, flow: &FlowDefinition, now: DateTime<Utc>) -> FlowReport {
        let mut flow_report = FlowReport {
            flow_id: flow.id,
            name: flow.name.clone(),
            outcome: FlowOutcome::Processed,
            counts: RunCounts::default(),
        };

        let subjects = match self
            .segments
            .resolve_eligible(
                flow.id,
                flow.target_segment.as_deref(),
                self.max_batch_size,
                now,
            )
            .await
        {
            Ok(subjects) => subjects,
            Err(e) => {
                tracing::error!(error = %e, "failed to resolve eligible subjects");
                flow_report.outcome = FlowOutcome::Failed(e.to_string());
                return flow_report;
            }
        };

        if subjects.is_empty() {
            tracing::debug!("no eligible subjects");
            flow_report.outcome = FlowOutcome::NoSubjects;
            return flow_report;
        }

        let graph = load_graph(flow);
        if graph.is_empty() {
            tracing::warn!("flow has no usable steps, skipping");
            flow_report.outcome = FlowOutcome::EmptyGraph;
            return flow_report;
        }

        // The resolver may hand back more than asked for, or the same subject
        // twice; the cap and the one-hop rule are ours.
        let mut seen: HashSet<SubjectId> = HashSet::new();
        let batch = subjects
            .iter()
            .filter(|subject| {
                let first = seen.insert(subject.id);
                if !first {
                    tracing::warn!(subject_id = subject.id, "duplicate subject in batch, skipping");
                }
                first
            })
            .take(self.max_batch_size as usize);
        for subject in batch {
            match self.runner.run(flow, &graph, subject, now).await {
                Ok(outcome) => flow_report.counts.record(&outcome),
                Err(e) => {
                    tracing::error!(subject_id = subject.id, error = %e, "subject step failed");
                    flow_report.counts.failed += 1;
                }
            }
        }

        tracing::info!(
            subjects = subjects.len(),
            advanced = flow_report.counts.advanced,
            finalized = flow_report.counts.finalized,
            failed = flow_report.counts.failed,
            "flow processed"
        );

        flow_report
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
