//! Tracing setup for the dripflow binary.

pub mod tracing_setup;
