//! Per-subject context exposed to conditions and the message generator.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use dripflow_types::flow::FlowDefinition;
use dripflow_types::subject::{ContextValue, Subject};

/// Context map keyed by the identifier used after `ctx.` in conditions.
pub type FlowContext = BTreeMap<String, ContextValue>;

/// Build the context for `subject` inside `flow` at `now`.
///
/// Subject attributes are copied first and always win. Derived keys are only
/// filled in when the attributes do not already carry them:
/// - `segment`: the subject's inactivity bucket, or the flow's target
///   segment when the subject has no activity timestamp
/// - `days_inactive`, `status`, `name`, `flow_id`
pub fn build_context(flow: &FlowDefinition, subject: &Subject, now: DateTime<Utc>) -> FlowContext {
    let mut ctx: FlowContext = subject.attributes.clone();

    let segment = subject
        .bucket(now)
        .map(|b| b.label().to_string())
        .or_else(|| flow.target_segment.clone());

    ctx.entry("segment".to_string())
        .or_insert_with(|| segment.into());
    ctx.entry("days_inactive".to_string())
        .or_insert_with(|| subject.days_inactive(now).into());
    ctx.entry("status".to_string())
        .or_insert_with(|| subject.status.clone().into());
    ctx.entry("name".to_string())
        .or_insert_with(|| subject.name.clone().into());
    ctx.entry("flow_id".to_string())
        .or_insert_with(|| flow.id.into());

    ctx
}
