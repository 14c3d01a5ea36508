//! Shared domain types for dripflow.
//!
//! Flow definitions, execution state, subjects and their context values,
//! engine configuration, and the storage error type shared by every
//! repository trait.
//!
//! Zero infrastructure dependencies -- only serde, chrono, thiserror.

pub mod config;
pub mod error;
pub mod execution;
pub mod flow;
pub mod subject;
