//! Flow graph loading and normalization.
//!
//! Converts a stored `FlowDefinition` into a `FlowGraph`: an id-keyed arena
//! of `Step`s plus a root. Two sources are understood:
//!
//! - the modern document `{"steps": [{id, type, template_slug, ...}]}`
//! - legacy ordered rows, adapted into a strictly linear message chain
//!
//! Loading never fails. Anything unusable yields an empty graph, which the
//! scheduler treats as "flow has no steps" for the cycle.

use std::collections::HashMap;

use dripflow_types::flow::{FlowDefinition, LegacyStepRow, Step, StepKind};
use serde_json::Value;

/// Wire value of `type` that selects a conditional step. Anything else is a message.
pub const CONDITIONAL_TYPE: &str = "condicional";

/// Wire value of `type` for message steps.
pub const MESSAGE_TYPE: &str = "mensagem";

// ---------------------------------------------------------------------------
// FlowGraph
// ---------------------------------------------------------------------------

/// Validated, read-only step graph keyed by step id.
///
/// Cycles are legal: the runner moves a subject at most one hop per call.
#[derive(Debug, Clone, Default)]
pub struct FlowGraph {
    steps: HashMap<String, Step>,
    /// Step ids in the order they were accepted; the first is the root.
    order: Vec<String>,
}

impl FlowGraph {
    /// An empty graph (no root).
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a graph from steps in authoring order. The first occurrence of
    /// an id wins; later duplicates are dropped.
    pub fn from_steps(steps: impl IntoIterator<Item = Step>) -> Self {
        let mut graph = Self::empty();
        for step in steps {
            graph.insert(step);
        }
        graph
    }

    /// Insert a step unless its id is already taken. Returns whether it was kept.
    fn insert(&mut self, step: Step) -> bool {
        if self.steps.contains_key(&step.id) {
            tracing::warn!(step_id = %step.id, "duplicate step id dropped");
            return false;
        }
        self.order.push(step.id.clone());
        self.steps.insert(step.id.clone(), step);
        true
    }

    /// The first step encountered while loading.
    pub fn root(&self) -> Option<&str> {
        self.order.first().map(String::as_str)
    }

    pub fn get(&self, id: &str) -> Option<&Step> {
        self.steps.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.steps.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Steps in authoring order.
    pub fn steps(&self) -> impl Iterator<Item = &Step> {
        self.order.iter().filter_map(|id| self.steps.get(id))
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Which stored representation produced a graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphSource {
    Modern,
    Legacy,
    None,
}

/// Load the graph for `flow`, preferring the modern document.
pub fn load_graph(flow: &FlowDefinition) -> FlowGraph {
    load_graph_with_source(flow).0
}

/// Like [`load_graph`], also reporting which source was used.
pub fn load_graph_with_source(flow: &FlowDefinition) -> (FlowGraph, GraphSource) {
    if let Some(graph) = flow.definition_json.as_deref().and_then(parse_modern) {
        return (graph, GraphSource::Modern);
    }

    if !flow.legacy_steps.is_empty() {
        return (from_legacy(&flow.legacy_steps), GraphSource::Legacy);
    }

    (FlowGraph::empty(), GraphSource::None)
}

/// Parse a modern definition document.
///
/// Returns `None` when the text is not JSON or has no `steps` array, so the
/// caller can fall back to legacy rows. A document whose steps are all
/// unusable still returns `Some` (an empty graph).
pub fn parse_modern(json: &str) -> Option<FlowGraph> {
    let doc: Value = serde_json::from_str(json).ok()?;
    let entries = doc.get("steps")?.as_array()?;

    let mut graph = FlowGraph::empty();
    for (idx, entry) in entries.iter().enumerate() {
        if let Some(step) = normalize_step(idx + 1, entry) {
            graph.insert(step);
        }
    }
    Some(graph)
}

/// Normalize one modern step entry found at 1-based `position`.
fn normalize_step(position: usize, entry: &Value) -> Option<Step> {
    let obj = entry.as_object()?;

    let id = obj
        .get("id")
        .and_then(scalar_to_string)
        .unwrap_or_else(|| default_step_id(position));

    let is_conditional = obj.get("type").and_then(Value::as_str) == Some(CONDITIONAL_TYPE);

    let kind = if is_conditional {
        StepKind::Conditional {
            condition: obj
                .get("condition")
                .and_then(scalar_to_string)
                .unwrap_or_default(),
            next_if: obj.get("next_if").and_then(scalar_to_string),
            next_else: obj.get("next_else").and_then(scalar_to_string),
        }
    } else {
        StepKind::Message {
            template: obj.get("template_slug").and_then(scalar_to_string),
            delay_minutes: obj.get("delay_minutes").map(delay_from_value).unwrap_or(0),
            next: obj.get("next").and_then(scalar_to_string),
        }
    };

    Some(Step { id, kind })
}

/// Adapt legacy rows into a linear chain `step_1 -> step_2 -> ... -> None`.
///
/// Every row becomes a message step regardless of its stored type; the
/// legacy table had no way to express a condition or its branches.
pub fn from_legacy(rows: &[LegacyStepRow]) -> FlowGraph {
    let mut ordered: Vec<&LegacyStepRow> = rows.iter().collect();
    ordered.sort_by_key(|row| row.position);

    let count = ordered.len();
    let steps = ordered.into_iter().enumerate().map(|(idx, row)| {
        let next = (idx + 1 < count).then(|| default_step_id(idx + 2));
        Step {
            id: default_step_id(idx + 1),
            kind: StepKind::Message {
                template: row.template_slug.clone().filter(|t| !t.is_empty()),
                delay_minutes: clamp_delay(row.delay_minutes),
                next,
            },
        }
    });

    FlowGraph::from_steps(steps)
}

/// Id given to a step without one: `step_<position>` (1-based).
pub fn default_step_id(position: usize) -> String {
    format!("step_{position}")
}

/// Strings and numbers become ids/references; empty strings and anything
/// else count as absent.
fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Integers and numeric strings are accepted; anything else is zero.
fn delay_from_value(value: &Value) -> u32 {
    let minutes = match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f.trunc() as i64))
            .unwrap_or(0),
        Value::String(s) => s.trim().parse::<i64>().unwrap_or(0),
        _ => 0,
    };
    clamp_delay(minutes)
}

fn clamp_delay(minutes: i64) -> u32 {
    u32::try_from(minutes.max(0)).unwrap_or(u32::MAX)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
