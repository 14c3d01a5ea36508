//! Flow engine core: graph loading, condition evaluation, and stepping.
//!
//! - `graph` -- normalizes modern/legacy step definitions into a `FlowGraph`
//! - `definition` -- authoring-time validation of definition documents
//! - `condition` -- fail-closed, literal-only condition evaluator
//! - `context` -- per-subject context map exposed as `ctx.*`
//! - `step_runner` -- the per-subject state machine (one hop per call)
//! - `scheduler` -- the cycle loop over active flows and eligible subjects

pub mod condition;
pub mod context;
pub mod definition;
pub mod graph;
pub mod scheduler;
pub mod step_runner;
