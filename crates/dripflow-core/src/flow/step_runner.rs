//! Per-subject state machine.
//!
//! `StepRunner` moves one subject at most one hop through a flow graph:
//!
//! ```text
//! NotStarted -> Active(step) -> { Active(next) | Finished }
//! ```
//!
//! Conditional steps branch without output. Message steps generate content,
//! queue it, and then advance (or finalize at the end of the flow). A failed
//! or timed-out generation leaves state untouched so the same step is retried
//! on a later cycle.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dripflow_types::config::EngineConfig;
use dripflow_types::error::RepositoryError;
use dripflow_types::execution::{ExecutionState, GeneratedOutput};
use dripflow_types::flow::{FlowDefinition, Step, StepKind};
use dripflow_types::subject::Subject;
use tracing::Instrument;

use super::condition::ConditionEvaluator;
use super::context::{FlowContext, build_context};
use super::graph::FlowGraph;
use crate::generator::{GenerationError, MessageGenerator};
use crate::repository::execution::ExecutionStateRepository;
use crate::repository::outbound::OutboundQueue;

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// What a single runner invocation did for one subject.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    /// The subject already finished this flow. Nothing changed.
    AlreadyFinished,

    /// The subject is scheduled for later. Nothing changed.
    Waiting { until: DateTime<Utc> },

    /// State now points at `to`.
    Advanced {
        from: String,
        to: String,
        /// `None` means eligible on the next cycle.
        next_run_at: Option<DateTime<Utc>>,
        produced_output: bool,
    },

    /// State is now finished.
    Finalized {
        /// The step being processed, if one could be resolved.
        step: Option<String>,
        reason: FinalizeReason,
        produced_output: bool,
    },

    /// Generation failed or timed out. State is unchanged and the step will
    /// be retried on a later cycle.
    GenerationFailed { step: String, error: String },
}

impl StepOutcome {
    pub fn produced_output(&self) -> bool {
        matches!(
            self,
            StepOutcome::Advanced {
                produced_output: true,
                ..
            } | StepOutcome::Finalized {
                produced_output: true,
                ..
            }
        )
    }
}

/// Why a subject's execution was finalized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinalizeReason {
    /// The graph has no root.
    EmptyGraph,
    /// A step id (current or next) does not exist in the graph.
    DanglingReference(String),
    /// The branch chosen by a conditional step is absent.
    BranchTerminated,
    /// A message step without `next` completed.
    EndOfFlow,
}

impl fmt::Display for FinalizeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FinalizeReason::EmptyGraph => f.write_str("empty graph"),
            FinalizeReason::DanglingReference(id) => write!(f, "unknown step '{id}'"),
            FinalizeReason::BranchTerminated => f.write_str("branch terminated"),
            FinalizeReason::EndOfFlow => f.write_str("end of flow"),
        }
    }
}

/// Storage failures abort the current subject only.
#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error("execution state error: {0}")]
    State(#[source] RepositoryError),

    #[error("outbound queue error: {0}")]
    Queue(#[source] RepositoryError),
}

// ---------------------------------------------------------------------------
// StepRunner
// ---------------------------------------------------------------------------

/// Advances one subject through one flow per invocation.
pub struct StepRunner<E, G, Q> {
    states: E,
    generator: G,
    queue: Q,
    evaluator: ConditionEvaluator,
    generation_timeout: Duration,
    default_template: String,
}

impl<E, G, Q> StepRunner<E, G, Q>
where
    E: ExecutionStateRepository,
    G: MessageGenerator,
    Q: OutboundQueue,
{
    pub fn new(states: E, generator: G, queue: Q, config: &EngineConfig) -> Self {
        Self {
            states,
            generator,
            queue,
            evaluator: ConditionEvaluator::new(),
            generation_timeout: Duration::from_secs(config.generation_timeout_secs.max(1)),
            default_template: config.default_template.clone(),
        }
    }

    pub fn with_generation_timeout(mut self, timeout: Duration) -> Self {
        self.generation_timeout = timeout;
        self
    }

    pub fn states(&self) -> &E {
        &self.states
    }

    pub fn generator(&self) -> &G {
        &self.generator
    }

    pub fn queue(&self) -> &Q {
        &self.queue
    }

    /// Run one hop for `subject` in `flow`.
    pub async fn run(
        &self,
        flow: &FlowDefinition,
        graph: &FlowGraph,
        subject: &Subject,
        now: DateTime<Utc>,
    ) -> Result<StepOutcome, StepError> {
        let span = tracing::info_span!("subject", flow_id = flow.id, subject_id = subject.id);
        self.run_inner(flow, graph, subject, now)
            .instrument(span)
            .await
    }

    async fn run_inner(
        &self,
        flow: &FlowDefinition,
        graph: &FlowGraph,
        subject: &Subject,
        now: DateTime<Utc>,
    ) -> Result<StepOutcome, StepError> {
        let state = self
            .states
            .get(flow.id, subject.id)
            .await
            .map_err(StepError::State)?;

        if state.as_ref().is_some_and(ExecutionState::is_finished) {
            return Ok(StepOutcome::AlreadyFinished);
        }

        let current = state
            .as_ref()
            .and_then(|s| s.current_step.clone())
            .or_else(|| graph.root().map(str::to_string));

        let Some(step) = current.as_deref().and_then(|id| graph.get(id)) else {
            let reason = match &current {
                None => FinalizeReason::EmptyGraph,
                Some(id) => FinalizeReason::DanglingReference(id.clone()),
            };
            return self.finalize(flow, subject, current, reason, false, now).await;
        };

        if let Some(until) = state.as_ref().and_then(|s| s.next_run_at).filter(|at| *at > now) {
            tracing::debug!(step_id = %step.id, %until, "subject waiting");
            return Ok(StepOutcome::Waiting { until });
        }

        let ctx = build_context(flow, subject, now);

        match &step.kind {
            StepKind::Conditional {
                condition,
                next_if,
                next_else,
            } => {
                let result = self.evaluator.evaluate(condition, &ctx);
                let chosen = if result { next_if } else { next_else };

                tracing::info!(
                    flow_id = flow.id,
                    subject_id = subject.id,
                    step_id = %step.id,
                    condition = %condition,
                    result,
                    next_step = chosen.as_deref().unwrap_or("-"),
                    "conditional step evaluated"
                );

                self.transition(flow, graph, subject, step, chosen.as_deref(), 0, false, now)
                    .await
            }
            StepKind::Message {
                template,
                delay_minutes,
                next,
            } => {
                let template = template.as_deref().unwrap_or(&self.default_template);
                let content = match self.generate(template, &ctx).await {
                    Ok(content) => content,
                    Err(e) => {
                        tracing::warn!(step_id = %step.id, template, error = %e, "message generation failed, will retry");
                        return Ok(StepOutcome::GenerationFailed {
                            step: step.id.clone(),
                            error: e.to_string(),
                        });
                    }
                };

                let output = GeneratedOutput {
                    flow_id: flow.id,
                    step_id: step.id.clone(),
                    subject_id: subject.id,
                    destination: subject.destination.clone(),
                    content,
                    created_at: now,
                };
                self.queue.enqueue(&output).await.map_err(StepError::Queue)?;
                tracing::debug!(step_id = %step.id, template, "output queued");

                self.transition(flow, graph, subject, step, next.as_deref(), *delay_minutes, true, now)
                    .await
            }
        }
    }

    /// Move from `step` to `next`. An absent or unknown `next` finalizes.
    #[allow(clippy::too_many_arguments)]
    async fn transition(
        &self,
        flow: &FlowDefinition,
        graph: &FlowGraph,
        subject: &Subject,
        step: &Step,
        next: Option<&str>,
        delay_minutes: u32,
        produced_output: bool,
        now: DateTime<Utc>,
    ) -> Result<StepOutcome, StepError> {
        let current = Some(step.id.clone());

        let Some(next) = next else {
            let reason = if step.is_conditional() {
                FinalizeReason::BranchTerminated
            } else {
                FinalizeReason::EndOfFlow
            };
            return self
                .finalize(flow, subject, current, reason, produced_output, now)
                .await;
        };

        if !graph.contains(next) {
            let reason = FinalizeReason::DanglingReference(next.to_string());
            return self
                .finalize(flow, subject, current, reason, produced_output, now)
                .await;
        }

        self.states
            .advance(flow.id, subject.id, next, delay_minutes, now)
            .await
            .map_err(StepError::State)?;

        let next_run_at = (delay_minutes > 0)
            .then(|| now + chrono::Duration::minutes(i64::from(delay_minutes)));
        tracing::debug!(from = %step.id, to = next, delay_minutes, "execution advanced");

        Ok(StepOutcome::Advanced {
            from: step.id.clone(),
            to: next.to_string(),
            next_run_at,
            produced_output,
        })
    }

    async fn finalize(
        &self,
        flow: &FlowDefinition,
        subject: &Subject,
        step: Option<String>,
        reason: FinalizeReason,
        produced_output: bool,
        now: DateTime<Utc>,
    ) -> Result<StepOutcome, StepError> {
        self.states
            .finalize(flow.id, subject.id, now)
            .await
            .map_err(StepError::State)?;

        match &reason {
            FinalizeReason::DanglingReference(_) | FinalizeReason::EmptyGraph => {
                tracing::warn!(step_id = step.as_deref().unwrap_or("-"), %reason, "execution finalized")
            }
            _ => tracing::debug!(step_id = step.as_deref().unwrap_or("-"), %reason, "execution finalized"),
        }

        Ok(StepOutcome::Finalized {
            step,
            reason,
            produced_output,
        })
    }

    /// Call the generator, bounded by the configured timeout. Blank content
    /// counts as a failure.
    async fn generate(&self, template: &str, ctx: &FlowContext) -> Result<String, GenerationError> {
        let content = tokio::time::timeout(
            self.generation_timeout,
            self.generator.generate(template, ctx),
        )
        .await
        .map_err(|_| GenerationError::Timeout(self.generation_timeout))??;

        if content.trim().is_empty() {
            return Err(GenerationError::Failed("generator returned empty content".to_string()));
        }
        Ok(content)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::flow::graph::{load_graph, parse_modern};
    use crate::testing::{
        EchoGenerator, FailingGenerator, InMemoryQueue, InMemoryStates, SlowGenerator,
    };
    use chrono::Duration as ChronoDuration;
    use dripflow_types::execution::ExecutionStatus;
    use dripflow_types::flow::{FlowStatus, LegacyStepRow};

    fn flow_with(json: &str) -> FlowDefinition {
        FlowDefinition {
            id: 7,
            name: "reactivation".to_string(),
            status: FlowStatus::Active,
            target_segment: Some("D30+".to_string()),
            definition_json: Some(json.to_string()),
            legacy_steps: Vec::new(),
        }
    }

    fn runner<G: MessageGenerator>(
        generator: G,
    ) -> StepRunner<InMemoryStates, G, InMemoryQueue> {
        StepRunner::new(
            InMemoryStates::default(),
            generator,
            InMemoryQueue::default(),
            &EngineConfig::default(),
        )
    }

    fn lapsed_subject(now: DateTime<Utc>) -> Subject {
        Subject::new(42, "+5511988887777")
            .with_last_activity(now - ChronoDuration::days(45))
            .with_attribute("name", "Ana")
    }

    fn active_state(step: &str, next_run_at: Option<DateTime<Utc>>) -> ExecutionState {
        ExecutionState {
            flow_id: 7,
            subject_id: 42,
            current_step: Some(step.to_string()),
            next_run_at,
            status: ExecutionStatus::Active,
            updated_at: Utc::now(),
        }
    }

    const BRANCHING: &str = r#"{"steps": [
        {"id": "A", "type": "condicional", "condition": "ctx.segment == 'D30+'",
         "next_if": "B", "next_else": "C"},
        {"id": "B", "type": "mensagem", "template_slug": "winback", "delay_minutes": 60, "next": "C"},
        {"id": "C", "type": "mensagem", "template_slug": "farewell"}
    ]}"#;

    #[tokio::test]
    async fn single_message_step_outputs_once_and_finalizes() {
        let now = Utc::now();
        let flow = flow_with(r#"{"steps": [{"id": "only", "template_slug": "hello"}]}"#);
        let graph = load_graph(&flow);
        let runner = runner(EchoGenerator::default());
        let subject = lapsed_subject(now);

        let outcome = runner.run(&flow, &graph, &subject, now).await.unwrap();
        assert_eq!(
            outcome,
            StepOutcome::Finalized {
                step: Some("only".to_string()),
                reason: FinalizeReason::EndOfFlow,
                produced_output: true,
            }
        );

        let outputs = runner.queue().all();
        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs[0].step_id, "only");
        assert_eq!(outputs[0].destination, "+5511988887777");
        assert_eq!(outputs[0].content, "hello for Ana");
        assert!(runner.states().snapshot(7, 42).unwrap().is_finished());

        // Already finished: a second run does nothing.
        let again = runner.run(&flow, &graph, &subject, now).await.unwrap();
        assert_eq!(again, StepOutcome::AlreadyFinished);
        assert_eq!(runner.queue().len(), 1);
    }

    #[tokio::test]
    async fn conditional_root_branches_without_output() {
        let now = Utc::now();
        let flow = flow_with(BRANCHING);
        let graph = load_graph(&flow);
        let runner = runner(EchoGenerator::default());

        let outcome = runner
            .run(&flow, &graph, &lapsed_subject(now), now)
            .await
            .unwrap();

        assert_eq!(
            outcome,
            StepOutcome::Advanced {
                from: "A".to_string(),
                to: "B".to_string(),
                next_run_at: None,
                produced_output: false,
            }
        );
        assert_eq!(runner.queue().len(), 0);
        assert_eq!(runner.generator().call_count(), 0);
        let state = runner.states().snapshot(7, 42).unwrap();
        assert_eq!(state.current_step.as_deref(), Some("B"));
        assert_eq!(state.next_run_at, None);
    }

    #[tokio::test]
    async fn conditional_false_takes_else_branch() {
        let now = Utc::now();
        let flow = flow_with(BRANCHING);
        let graph = load_graph(&flow);
        let runner = runner(EchoGenerator::default());
        let recent = Subject::new(42, "+55").with_last_activity(now - ChronoDuration::days(2));

        let outcome = runner.run(&flow, &graph, &recent, now).await.unwrap();
        assert!(matches!(outcome, StepOutcome::Advanced { ref to, .. } if to == "C"));
    }

    #[tokio::test]
    async fn absent_branch_terminates() {
        let now = Utc::now();
        let flow = flow_with(
            r#"{"steps": [{"id": "A", "type": "condicional", "condition": "false", "next_if": "B"},
                          {"id": "B"}]}"#,
        );
        let graph = load_graph(&flow);
        let runner = runner(EchoGenerator::default());

        let outcome = runner
            .run(&flow, &graph, &lapsed_subject(now), now)
            .await
            .unwrap();
        assert_eq!(
            outcome,
            StepOutcome::Finalized {
                step: Some("A".to_string()),
                reason: FinalizeReason::BranchTerminated,
                produced_output: false,
            }
        );
    }

    #[tokio::test]
    async fn waiting_subject_is_untouched() {
        let now = Utc::now();
        let flow = flow_with(BRANCHING);
        let graph = load_graph(&flow);
        let runner = runner(EchoGenerator::default());
        let until = now + ChronoDuration::minutes(10);
        let before = active_state("B", Some(until));
        runner.states().insert(before.clone());

        let outcome = runner
            .run(&flow, &graph, &lapsed_subject(now), now)
            .await
            .unwrap();

        assert_eq!(outcome, StepOutcome::Waiting { until });
        assert_eq!(runner.queue().len(), 0);
        assert_eq!(runner.generator().call_count(), 0);
        assert_eq!(runner.states().snapshot(7, 42), Some(before));
    }

    #[tokio::test]
    async fn message_delay_schedules_next_run() {
        let now = Utc::now();
        let flow = flow_with(BRANCHING);
        let graph = load_graph(&flow);
        let runner = runner(EchoGenerator::default());
        runner.states().insert(active_state("B", None));

        let outcome = runner
            .run(&flow, &graph, &lapsed_subject(now), now)
            .await
            .unwrap();

        let expected_at = now + ChronoDuration::minutes(60);
        assert_eq!(
            outcome,
            StepOutcome::Advanced {
                from: "B".to_string(),
                to: "C".to_string(),
                next_run_at: Some(expected_at),
                produced_output: true,
            }
        );
        let state = runner.states().snapshot(7, 42).unwrap();
        assert_eq!(state.current_step.as_deref(), Some("C"));
        assert_eq!(state.next_run_at, Some(expected_at));
    }

    #[tokio::test]
    async fn due_subject_runs_when_next_run_has_passed() {
        let now = Utc::now();
        let flow = flow_with(BRANCHING);
        let graph = load_graph(&flow);
        let runner = runner(EchoGenerator::default());
        runner
            .states()
            .insert(active_state("C", Some(now - ChronoDuration::minutes(1))));

        let outcome = runner
            .run(&flow, &graph, &lapsed_subject(now), now)
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            StepOutcome::Finalized {
                reason: FinalizeReason::EndOfFlow,
                produced_output: true,
                ..
            }
        ));
        assert_eq!(runner.generator().calls.lock().unwrap().as_slice(), ["farewell"]);
    }

    #[tokio::test]
    async fn generation_failure_leaves_state_unchanged() {
        let now = Utc::now();
        let flow = flow_with(BRANCHING);
        let graph = load_graph(&flow);
        let runner = runner(FailingGenerator);
        let before = active_state("B", None);
        runner.states().insert(before.clone());

        let outcome = runner
            .run(&flow, &graph, &lapsed_subject(now), now)
            .await
            .unwrap();

        assert!(matches!(outcome, StepOutcome::GenerationFailed { ref step, .. } if step == "B"));
        assert_eq!(runner.states().snapshot(7, 42), Some(before));
        assert_eq!(runner.queue().len(), 0);
    }

    #[tokio::test]
    async fn generation_timeout_counts_as_failure() {
        let now = Utc::now();
        let flow = flow_with(r#"{"steps": [{"id": "slow", "template_slug": "x"}]}"#);
        let graph = load_graph(&flow);
        let runner = runner(SlowGenerator(Duration::from_secs(5)))
            .with_generation_timeout(Duration::from_millis(20));

        let outcome = runner
            .run(&flow, &graph, &lapsed_subject(now), now)
            .await
            .unwrap();

        match outcome {
            StepOutcome::GenerationFailed { step, error } => {
                assert_eq!(step, "slow");
                assert!(error.contains("timed out"));
            }
            other => panic!("expected generation failure, got {other:?}"),
        }
        assert!(runner.states().snapshot(7, 42).is_none());
    }

    #[tokio::test]
    async fn unknown_current_step_finalizes() {
        let now = Utc::now();
        let flow = flow_with(BRANCHING);
        let graph = load_graph(&flow);
        let runner = runner(EchoGenerator::default());
        runner.states().insert(active_state("deleted", None));

        let outcome = runner
            .run(&flow, &graph, &lapsed_subject(now), now)
            .await
            .unwrap();
        assert_eq!(
            outcome,
            StepOutcome::Finalized {
                step: Some("deleted".to_string()),
                reason: FinalizeReason::DanglingReference("deleted".to_string()),
                produced_output: false,
            }
        );
        assert!(runner.states().snapshot(7, 42).unwrap().is_finished());
    }

    #[tokio::test]
    async fn unknown_next_finalizes_after_output() {
        let now = Utc::now();
        let flow = flow_with(r#"{"steps": [{"id": "a", "next": "ghost"}]}"#);
        let graph = load_graph(&flow);
        let runner = runner(EchoGenerator::default());

        let outcome = runner
            .run(&flow, &graph, &lapsed_subject(now), now)
            .await
            .unwrap();
        assert_eq!(
            outcome,
            StepOutcome::Finalized {
                step: Some("a".to_string()),
                reason: FinalizeReason::DanglingReference("ghost".to_string()),
                produced_output: true,
            }
        );
        // No template on the step: the configured default is used.
        assert_eq!(
            runner.generator().calls.lock().unwrap().as_slice(),
            ["reactivation"]
        );
    }

    #[tokio::test]
    async fn empty_graph_finalizes() {
        let now = Utc::now();
        let flow = flow_with(r#"{"steps": []}"#);
        let graph = load_graph(&flow);
        let runner = runner(EchoGenerator::default());

        let outcome = runner
            .run(&flow, &graph, &lapsed_subject(now), now)
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            StepOutcome::Finalized {
                step: None,
                reason: FinalizeReason::EmptyGraph,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn legacy_chain_walks_one_hop_per_run() {
        let now = Utc::now();
        let rows = (1..=3)
            .map(|position| LegacyStepRow {
                position,
                step_type: "mensagem_whatsapp".to_string(),
                template_slug: Some(format!("t{position}")),
                delay_minutes: 0,
            })
            .collect();
        let flow = FlowDefinition {
            definition_json: None,
            legacy_steps: rows,
            ..flow_with("")
        };
        let graph = load_graph(&flow);
        let runner = runner(EchoGenerator::default());
        let subject = lapsed_subject(now);

        let mut hops = Vec::new();
        for _ in 0..4 {
            hops.push(runner.run(&flow, &graph, &subject, now).await.unwrap());
        }

        assert!(matches!(&hops[0], StepOutcome::Advanced { to, .. } if to == "step_2"));
        assert!(matches!(&hops[1], StepOutcome::Advanced { to, .. } if to == "step_3"));
        assert!(matches!(&hops[2], StepOutcome::Finalized { reason: FinalizeReason::EndOfFlow, .. }));
        assert_eq!(hops[3], StepOutcome::AlreadyFinished);
        assert_eq!(runner.queue().len(), 3);
    }

    #[tokio::test]
    async fn identical_inputs_give_identical_decisions() {
        let now = Utc::now();
        let flow = flow_with(BRANCHING);
        let graph = parse_modern(BRANCHING).unwrap();
        let subject = lapsed_subject(now);

        let first = runner(EchoGenerator::default())
            .run(&flow, &graph, &subject, now)
            .await
            .unwrap();
        let second = runner(EchoGenerator::default())
            .run(&flow, &graph, &subject, now)
            .await
            .unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn state_write_failure_is_a_step_error() {
        let now = Utc::now();
        let flow = flow_with(BRANCHING);
        let graph = load_graph(&flow);
        let runner = runner(EchoGenerator::default());
        runner.states().fail_writes.store(true, Ordering::SeqCst);

        let err = runner
            .run(&flow, &graph, &lapsed_subject(now), now)
            .await
            .unwrap_err();
        assert!(matches!(err, StepError::State(_)));
    }

    #[tokio::test]
    async fn queue_failure_does_not_advance() {
        let now = Utc::now();
        let flow = flow_with(BRANCHING);
        let graph = load_graph(&flow);
        let runner = runner(EchoGenerator::default());
        runner.queue().fail.store(true, Ordering::SeqCst);
        runner.states().insert(active_state("B", None));

        let err = runner
            .run(&flow, &graph, &lapsed_subject(now), now)
            .await
            .unwrap_err();
        assert!(matches!(err, StepError::Queue(_)));
        assert_eq!(
            runner.states().snapshot(7, 42).unwrap().current_step.as_deref(),
            Some("B")
        );
    }
}
