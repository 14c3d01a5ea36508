use thiserror::Error;

/// Errors from repository operations (used by trait definitions in dripflow-core).
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database connection error")]
    Connection,

    #[error("query error: {0}")]
    Query(String),
}
