//! Flow execution engine and repository trait definitions for dripflow.
//!
//! This crate defines the "ports" (repository, segment, queue and generator
//! traits) that the infrastructure layer implements, plus the engine itself.
//! It depends only on `dripflow-types` -- never on `dripflow-infra` or any
//! database/IO crate.

pub mod flow;
pub mod generator;
pub mod repository;

#[cfg(test)]
pub(crate) mod testing;
