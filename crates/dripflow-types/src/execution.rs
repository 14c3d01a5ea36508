//! Execution tracking types.
//!
//! `ExecutionState` is the persisted pointer to a subject's position inside
//! one flow. `GeneratedOutput` is the append-only record handed to the
//! delivery queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::flow::FlowId;
use crate::subject::SubjectId;

/// Per-(flow, subject) progress. At most one exists per pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionState {
    pub flow_id: FlowId,
    pub subject_id: SubjectId,
    /// `None` means not started yet: the runner uses the graph root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_step: Option<String>,
    /// `None` means eligible now.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_run_at: Option<DateTime<Utc>>,
    pub status: ExecutionStatus,
    pub updated_at: DateTime<Utc>,
}

impl ExecutionState {
    pub fn is_finished(&self) -> bool {
        self.status == ExecutionStatus::Finished
    }

    /// True while the scheduled next run lies strictly in the future.
    pub fn is_waiting(&self, now: DateTime<Utc>) -> bool {
        self.next_run_at.is_some_and(|at| at > now)
    }
}

/// Whether an execution can still advance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Active,
    Finished,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Active => "active",
            ExecutionStatus::Finished => "finished",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(ExecutionStatus::Active),
            "finished" => Some(ExecutionStatus::Finished),
            _ => None,
        }
    }
}

/// Content produced by a message step, queued for the delivery worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedOutput {
    pub flow_id: FlowId,
    pub step_id: String,
    pub subject_id: SubjectId,
    /// Where the delivery worker sends the content (a phone number).
    pub destination: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}
