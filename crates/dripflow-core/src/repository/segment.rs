//! Segment eligibility trait definition.

use chrono::{DateTime, Utc};
use dripflow_types::error::RepositoryError;
use dripflow_types::flow::FlowId;
use dripflow_types::subject::Subject;

/// Resolves which subjects a flow should look at this cycle.
pub trait SegmentResolver: Send + Sync {
    /// Subjects matching `segment` (all subjects when `None` or unrecognized),
    /// in a stable order, at most `max_batch` of them.
    ///
    /// Implementations may leave out subjects that already finished `flow_id`
    /// or are still waiting at `now`; the runner re-checks both regardless.
    fn resolve_eligible(
        &self,
        flow_id: FlowId,
        segment: Option<&str>,
        max_batch: u32,
        now: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<Vec<Subject>, RepositoryError>> + Send;
}
