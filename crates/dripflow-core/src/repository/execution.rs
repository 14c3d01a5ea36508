//! Execution state repository trait definition.

use chrono::{DateTime, Utc};
use dripflow_types::error::RepositoryError;
use dripflow_types::execution::ExecutionState;
use dripflow_types::flow::FlowId;
use dripflow_types::subject::SubjectId;

/// Persists the per-(flow, subject) step pointer and next-eligible-run time.
///
/// Every mutation must be all-or-nothing: no reader may ever observe a new
/// step paired with a stale `next_run_at` (or vice versa). Implementations
/// also guarantee at most one record per (flow, subject).
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait ExecutionStateRepository: Send + Sync {
    /// Get the execution state for a pair, if one was ever created.
    fn get(
        &self,
        flow_id: FlowId,
        subject_id: SubjectId,
    ) -> impl std::future::Future<Output = Result<Option<ExecutionState>, RepositoryError>> + Send;

    /// Point the pair at `next_step_id` and schedule it.
    ///
    /// `next_run_at` becomes `now + delay_minutes`, or `None` (eligible now)
    /// when the delay is zero. Creates the record on first advancement.
    fn advance(
        &self,
        flow_id: FlowId,
        subject_id: SubjectId,
        next_step_id: &str,
        delay_minutes: u32,
        now: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Mark the pair finished so it is not processed again for this flow.
    ///
    /// Creates a finished record when none exists yet.
    fn finalize(
        &self,
        flow_id: FlowId,
        subject_id: SubjectId,
        now: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// List every execution of a flow, ordered by subject id.
    fn list_for_flow(
        &self,
        flow_id: FlowId,
    ) -> impl std::future::Future<Output = Result<Vec<ExecutionState>, RepositoryError>> + Send;
}
