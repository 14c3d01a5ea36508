//! Repository trait definitions (ports).
//!
//! These traits define the storage interface that the infrastructure layer
//! (dripflow-infra) implements. The core crate never depends on any
//! specific storage technology.

pub mod execution;
pub mod flow;
pub mod outbound;
pub mod segment;
