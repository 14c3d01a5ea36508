//! Flow definition repository trait definition.

use dripflow_types::error::RepositoryError;
use dripflow_types::flow::{FlowDefinition, FlowId};

/// Read access to authored flows, plus the upsert used by `dripflow import`.
pub trait FlowRepository: Send + Sync {
    /// All flows with status `active`, ordered by id. Legacy rows are loaded
    /// alongside each definition.
    fn list_active(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<FlowDefinition>, RepositoryError>> + Send;

    /// Get a single flow by id.
    fn get(
        &self,
        id: FlowId,
    ) -> impl std::future::Future<Output = Result<Option<FlowDefinition>, RepositoryError>> + Send;

    /// Insert or replace a flow (legacy rows are not touched).
    fn save(
        &self,
        flow: &FlowDefinition,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;
}
