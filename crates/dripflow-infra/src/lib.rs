//! Infrastructure layer for dripflow.
//!
//! Contains implementations of the ports defined in `dripflow-core`: SQLite
//! storage for flows, execution state, subjects and the outbound queue, plus
//! the LLM-backed message generator and the config/data-dir loaders.

pub mod config;
pub mod filesystem;
pub mod generator;
pub mod sqlite;
