//! Outbound delivery queue trait definition.

use dripflow_types::error::RepositoryError;
use dripflow_types::execution::GeneratedOutput;

/// Append-only hand-off to the external delivery worker.
pub trait OutboundQueue: Send + Sync {
    /// Append one generated output. Records are never mutated by the engine.
    fn enqueue(
        &self,
        output: &GeneratedOutput,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;
}
