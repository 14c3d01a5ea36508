//! Authoring-time validation of modern flow definitions.
//!
//! The runtime loader in [`super::graph`] tolerates malformed input (it drops
//! duplicates and finalizes on dangling references). Definitions entering the
//! store through the operator CLI are held to a stricter standard: every
//! problem is collected and reported at once.

use std::collections::HashSet;

use serde_json::{Map, Value};
use thiserror::Error;

use super::condition::{ConditionError, ConditionEvaluator};
use super::context::FlowContext;
use super::graph::{self, CONDITIONAL_TYPE, FlowGraph, MESSAGE_TYPE};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum DefinitionError {
    /// Not JSON, or no `steps` array.
    #[error("parse error: {0}")]
    ParseError(String),

    /// Structurally parseable but violates one or more rules.
    #[error("validation failed: {}", .0.join("; "))]
    ValidationError(Vec<String>),
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate a modern definition document.
///
/// Checks:
/// - Every step is an object
/// - Step ids are unique (after defaulting missing ids to `step_<n>`)
/// - `type` is absent, `mensagem`, or `condicional`
/// - `next`, `next_if`, `next_else` reference existing step ids
/// - Conditional steps carry a non-empty `condition`
/// - `delay_minutes` is a non-negative integer
/// - Message steps carry no branch fields, conditionals no message fields
pub fn validate_definition(json: &str) -> Result<(), DefinitionError> {
    let doc: Value =
        serde_json::from_str(json).map_err(|e| DefinitionError::ParseError(e.to_string()))?;
    let entries = doc
        .get("steps")
        .and_then(Value::as_array)
        .ok_or_else(|| DefinitionError::ParseError("missing 'steps' array".to_string()))?;

    let mut issues = Vec::new();

    // First pass: ids, so forward references resolve.
    let mut ids: HashSet<String> = HashSet::new();
    let mut steps: Vec<(String, &Map<String, Value>)> = Vec::new();
    for (idx, entry) in entries.iter().enumerate() {
        let Some(obj) = entry.as_object() else {
            issues.push(format!("step #{} is not an object", idx + 1));
            continue;
        };
        let id = step_id(idx + 1, obj);
        if !ids.insert(id.clone()) {
            issues.push(format!("duplicate step id '{id}'"));
            continue;
        }
        steps.push((id, obj));
    }

    for (id, obj) in &steps {
        let kind = obj.get("type").and_then(Value::as_str);
        let is_conditional = kind == Some(CONDITIONAL_TYPE);

        match obj.get("type") {
            None => {}
            Some(Value::String(t)) if t == CONDITIONAL_TYPE || t == MESSAGE_TYPE => {}
            Some(other) => issues.push(format!("step '{id}' has unknown type {other}")),
        }

        let refs: &[&str] = if is_conditional {
            &["next_if", "next_else"]
        } else {
            &["next"]
        };
        for field in refs {
            if let Some(target) = reference(obj, field) {
                if !ids.contains(&target) {
                    issues.push(format!(
                        "step '{id}' {field} references unknown step '{target}'"
                    ));
                }
            }
        }

        if is_conditional {
            let condition = obj.get("condition").and_then(Value::as_str).unwrap_or("");
            if condition.trim().is_empty() {
                issues.push(format!("conditional step '{id}' has an empty condition"));
            } else if let Some(e) = condition_problem(condition) {
                issues.push(format!("conditional step '{id}' has an unusable condition: {e}"));
            }
            for field in ["template_slug", "delay_minutes", "next"] {
                if obj.contains_key(field) {
                    issues.push(format!("conditional step '{id}' carries message field '{field}'"));
                }
            }
        } else {
            if let Some(delay) = obj.get("delay_minutes") {
                if !valid_delay(delay) {
                    issues.push(format!(
                        "step '{id}' delay_minutes must be a non-negative integer, got {delay}"
                    ));
                }
            }
            for field in ["condition", "next_if", "next_else"] {
                if obj.contains_key(field) {
                    issues.push(format!("message step '{id}' carries conditional field '{field}'"));
                }
            }
        }
    }

    if issues.is_empty() {
        Ok(())
    } else {
        Err(DefinitionError::ValidationError(issues))
    }
}

/// Dry-run a condition with an empty context. Type errors depend on the
/// subject's values and are not reported.
fn condition_problem(condition: &str) -> Option<ConditionError> {
    match ConditionEvaluator::new().try_evaluate(condition, &FlowContext::new()) {
        Ok(_) | Err(ConditionError::Type(_)) => None,
        Err(e) => Some(e),
    }
}

/// Validate, then load the graph the runtime would see.
pub fn parse_and_validate(json: &str) -> Result<FlowGraph, DefinitionError> {
    validate_definition(json)?;
    graph::parse_modern(json)
        .ok_or_else(|| DefinitionError::ParseError("missing 'steps' array".to_string()))
}

fn step_id(position: usize, obj: &Map<String, Value>) -> String {
    match obj.get("id") {
        Some(Value::String(s)) if !s.is_empty() => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => graph::default_step_id(position),
    }
}

fn reference(obj: &Map<String, Value>, field: &str) -> Option<String> {
    match obj.get(field)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn valid_delay(value: &Value) -> bool {
    match value {
        Value::Number(n) => n.as_u64().is_some(),
        Value::String(s) => s.trim().parse::<u64>().is_ok(),
        _ => false,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
