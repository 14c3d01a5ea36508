//! Flow domain types for dripflow.
//!
//! A `FlowDefinition` is authored elsewhere and only read by the engine. Its
//! stored graph is either a modern JSON document or a list of legacy rows;
//! both normalize into `Step` values keyed by step id.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Numeric flow identifier as assigned by the authoring subsystem.
pub type FlowId = i64;

// ---------------------------------------------------------------------------
// Flow Definition
// ---------------------------------------------------------------------------

/// A named automation: a step graph plus a target segment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowDefinition {
    pub id: FlowId,
    pub name: String,
    pub status: FlowStatus,
    /// Segment tag selecting eligible subjects (e.g. `D30+`). `None` targets everyone.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_segment: Option<String>,
    /// Modern graph document (`{"steps": [...]}`), stored verbatim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub definition_json: Option<String>,
    /// Legacy linear rows, used when `definition_json` is absent or unusable.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub legacy_steps: Vec<LegacyStepRow>,
}

/// Lifecycle status of a flow. Only `Active` flows are processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowStatus {
    Active,
    Draft,
    Paused,
}

impl FlowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlowStatus::Active => "active",
            FlowStatus::Draft => "draft",
            FlowStatus::Paused => "paused",
        }
    }
}

impl fmt::Display for FlowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FlowStatus {
    type Err = String;

    /// Accepts the canonical names plus the Portuguese labels used by older
    /// panel databases (`ativo`, `rascunho`, `pausado`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "active" | "ativo" => Ok(FlowStatus::Active),
            "draft" | "rascunho" => Ok(FlowStatus::Draft),
            "paused" | "pausado" => Ok(FlowStatus::Paused),
            other => Err(format!("invalid flow status: '{other}'")),
        }
    }
}

/// One row of the legacy linear step table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyStepRow {
    pub position: i64,
    pub step_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_slug: Option<String>,
    #[serde(default)]
    pub delay_minutes: i64,
}

// ---------------------------------------------------------------------------
// Steps
// ---------------------------------------------------------------------------

/// A graph node, unique by `id` within its flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub id: String,
    pub kind: StepKind,
}

/// What a step does when the runner reaches it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepKind {
    /// Generate content and hand it to the outbound queue.
    Message {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        template: Option<String>,
        /// Minutes to wait before the next step becomes eligible.
        delay_minutes: u32,
        /// `None` ends the flow after this step.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        next: Option<String>,
    },
    /// Branch on a boolean expression; never produces output.
    Conditional {
        condition: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        next_if: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        next_else: Option<String>,
    },
}

impl Step {
    /// Convenience constructor for a message step.
    pub fn message(
        id: impl Into<String>,
        template: Option<&str>,
        delay_minutes: u32,
        next: Option<&str>,
    ) -> Self {
        Self {
            id: id.into(),
            kind: StepKind::Message {
                template: template.map(str::to_string),
                delay_minutes,
                next: next.map(str::to_string),
            },
        }
    }

    /// Convenience constructor for a conditional step.
    pub fn conditional(
        id: impl Into<String>,
        condition: impl Into<String>,
        next_if: Option<&str>,
        next_else: Option<&str>,
    ) -> Self {
        Self {
            id: id.into(),
            kind: StepKind::Conditional {
                condition: condition.into(),
                next_if: next_if.map(str::to_string),
                next_else: next_else.map(str::to_string),
            },
        }
    }

    pub fn is_conditional(&self) -> bool {
        matches!(self.kind, StepKind::Conditional { .. })
    }

    /// Every step id this step can transition to.
    pub fn successors(&self) -> Vec<&str> {
        match &self.kind {
            StepKind::Message { next, .. } => next.as_deref().into_iter().collect(),
            StepKind::Conditional {
                next_if, next_else, ..
            } => next_if
                .as_deref()
                .into_iter()
                .chain(next_else.as_deref())
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flow_status_parses_legacy_labels() {
        assert_eq!("ativo".parse::<FlowStatus>().unwrap(), FlowStatus::Active);
        assert_eq!("Paused".parse::<FlowStatus>().unwrap(), FlowStatus::Paused);
        assert_eq!("rascunho".parse::<FlowStatus>().unwrap(), FlowStatus::Draft);
        assert!("archived".parse::<FlowStatus>().is_err());
    }

    #[test]
    fn test_flow_status_display() {
        assert_eq!(FlowStatus::Active.to_string(), "active");
        assert_eq!(FlowStatus::Draft.as_str(), "draft");
    }

    #[test]
    fn test_successors() {
        let msg = Step::message("a", Some("welcome"), 0, Some("b"));
        assert_eq!(msg.successors(), vec!["b"]);

        let terminal = Step::message("z", None, 0, None);
        assert!(terminal.successors().is_empty());

        let cond = Step::conditional("c", "ctx.x == 1", Some("yes"), None);
        assert_eq!(cond.successors(), vec!["yes"]);
        assert!(cond.is_conditional());
    }

    #[test]
    fn test_step_kind_serializes_tagged() {
        let step = Step::conditional("c", "true", Some("a"), Some("b"));
        let v = serde_json::to_value(&step).unwrap();
        assert_eq!(v["kind"]["type"], "conditional");
        assert_eq!(v["kind"]["next_if"], "a");
    }
}
