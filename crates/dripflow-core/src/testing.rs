//! In-memory implementations of the core ports, for unit tests.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dripflow_types::error::RepositoryError;
use dripflow_types::execution::{ExecutionState, ExecutionStatus, GeneratedOutput};
use dripflow_types::flow::{FlowDefinition, FlowId, FlowStatus};
use dripflow_types::subject::{InactivityBucket, Subject, SubjectId};

use crate::flow::context::FlowContext;
use crate::generator::{GenerationError, MessageGenerator};
use crate::repository::execution::ExecutionStateRepository;
use crate::repository::flow::FlowRepository;
use crate::repository::outbound::OutboundQueue;
use crate::repository::segment::SegmentResolver;

// ---------------------------------------------------------------------------
// Flows
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct InMemoryFlows {
    pub flows: Mutex<Vec<FlowDefinition>>,
    pub fail_listing: AtomicBool,
}

impl InMemoryFlows {
    pub fn with(flows: Vec<FlowDefinition>) -> Self {
        Self {
            flows: Mutex::new(flows),
            fail_listing: AtomicBool::new(false),
        }
    }
}

impl FlowRepository for InMemoryFlows {
    async fn list_active(&self) -> Result<Vec<FlowDefinition>, RepositoryError> {
        if self.fail_listing.load(Ordering::SeqCst) {
            return Err(RepositoryError::Connection);
        }
        let mut active: Vec<FlowDefinition> = self
            .flows
            .lock()
            .unwrap()
            .iter()
            .filter(|f| f.status == FlowStatus::Active)
            .cloned()
            .collect();
        active.sort_by_key(|f| f.id);
        Ok(active)
    }

    async fn get(&self, id: FlowId) -> Result<Option<FlowDefinition>, RepositoryError> {
        Ok(self.flows.lock().unwrap().iter().find(|f| f.id == id).cloned())
    }

    async fn save(&self, flow: &FlowDefinition) -> Result<(), RepositoryError> {
        let mut flows = self.flows.lock().unwrap();
        flows.retain(|f| f.id != flow.id);
        flows.push(flow.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Execution state
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct InMemoryStates {
    pub states: Mutex<BTreeMap<(FlowId, SubjectId), ExecutionState>>,
    pub fail_writes: AtomicBool,
}

impl InMemoryStates {
    pub fn insert(&self, state: ExecutionState) {
        self.states
            .lock()
            .unwrap()
            .insert((state.flow_id, state.subject_id), state);
    }

    pub fn snapshot(&self, flow_id: FlowId, subject_id: SubjectId) -> Option<ExecutionState> {
        self.states.lock().unwrap().get(&(flow_id, subject_id)).cloned()
    }

    fn check_writable(&self) -> Result<(), RepositoryError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(RepositoryError::Query("state store is read-only".to_string()));
        }
        Ok(())
    }
}

impl ExecutionStateRepository for InMemoryStates {
    async fn get(
        &self,
        flow_id: FlowId,
        subject_id: SubjectId,
    ) -> Result<Option<ExecutionState>, RepositoryError> {
        Ok(self.snapshot(flow_id, subject_id))
    }

    async fn advance(
        &self,
        flow_id: FlowId,
        subject_id: SubjectId,
        next_step_id: &str,
        delay_minutes: u32,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        self.check_writable()?;
        let next_run_at =
            (delay_minutes > 0).then(|| now + chrono::Duration::minutes(i64::from(delay_minutes)));
        self.insert(ExecutionState {
            flow_id,
            subject_id,
            current_step: Some(next_step_id.to_string()),
            next_run_at,
            status: ExecutionStatus::Active,
            updated_at: now,
        });
        Ok(())
    }

    async fn finalize(
        &self,
        flow_id: FlowId,
        subject_id: SubjectId,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        self.check_writable()?;
        let mut states = self.states.lock().unwrap();
        let entry = states
            .entry((flow_id, subject_id))
            .or_insert_with(|| ExecutionState {
                flow_id,
                subject_id,
                current_step: None,
                next_run_at: None,
                status: ExecutionStatus::Finished,
                updated_at: now,
            });
        entry.status = ExecutionStatus::Finished;
        entry.next_run_at = None;
        entry.updated_at = now;
        Ok(())
    }

    async fn list_for_flow(&self, flow_id: FlowId) -> Result<Vec<ExecutionState>, RepositoryError> {
        Ok(self
            .states
            .lock()
            .unwrap()
            .values()
            .filter(|s| s.flow_id == flow_id)
            .cloned()
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Outbound queue
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct InMemoryQueue {
    pub outputs: Mutex<Vec<GeneratedOutput>>,
    pub fail: AtomicBool,
}

impl InMemoryQueue {
    pub fn len(&self) -> usize {
        self.outputs.lock().unwrap().len()
    }

    pub fn all(&self) -> Vec<GeneratedOutput> {
        self.outputs.lock().unwrap().clone()
    }
}

impl OutboundQueue for InMemoryQueue {
    async fn enqueue(&self, output: &GeneratedOutput) -> Result<(), RepositoryError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(RepositoryError::Query("queue full".to_string()));
        }
        self.outputs.lock().unwrap().push(output.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Segments
// ---------------------------------------------------------------------------

/// Filters a fixed subject list by inactivity bucket, without any
/// finished/waiting exclusion.
#[derive(Default)]
pub struct StaticSegments {
    pub subjects: Vec<Subject>,
    pub failing_flow: Option<FlowId>,
    pub calls: Mutex<Vec<(FlowId, Option<String>, u32)>>,
}

impl StaticSegments {
    pub fn with(subjects: Vec<Subject>) -> Self {
        Self {
            subjects,
            ..Default::default()
        }
    }
}

impl SegmentResolver for StaticSegments {
    async fn resolve_eligible(
        &self,
        flow_id: FlowId,
        segment: Option<&str>,
        max_batch: u32,
        now: DateTime<Utc>,
    ) -> Result<Vec<Subject>, RepositoryError> {
        self.calls
            .lock()
            .unwrap()
            .push((flow_id, segment.map(str::to_string), max_batch));
        if self.failing_flow == Some(flow_id) {
            return Err(RepositoryError::Query("segment query failed".to_string()));
        }
        let bucket = segment.and_then(InactivityBucket::parse);
        Ok(self
            .subjects
            .iter()
            .filter(|s| bucket.is_none() || s.bucket(now) == bucket)
            .take(max_batch as usize)
            .cloned()
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Generators
// ---------------------------------------------------------------------------

/// Returns `"<template> for <name>"` and records every template it saw.
#[derive(Default)]
pub struct EchoGenerator {
    pub calls: Mutex<Vec<String>>,
}

impl EchoGenerator {
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

impl MessageGenerator for EchoGenerator {
    async fn generate(
        &self,
        template: &str,
        context: &FlowContext,
    ) -> Result<String, GenerationError> {
        self.calls.lock().unwrap().push(template.to_string());
        let name = context
            .get("name")
            .map(ToString::to_string)
            .unwrap_or_default();
        Ok(format!("{template} for {name}"))
    }
}

/// Always fails.
pub struct FailingGenerator;

impl MessageGenerator for FailingGenerator {
    async fn generate(
        &self,
        _template: &str,
        _context: &FlowContext,
    ) -> Result<String, GenerationError> {
        Err(GenerationError::Failed("provider unavailable".to_string()))
    }
}

/// Sleeps before answering.
pub struct SlowGenerator(pub Duration);

impl MessageGenerator for SlowGenerator {
    async fn generate(
        &self,
        _template: &str,
        _context: &FlowContext,
    ) -> Result<String, GenerationError> {
        tokio::time::sleep(self.0).await;
        Ok("late".to_string())
    }
}
