//! Subjects (conversations) and the scalar values exposed to conditions.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Numeric subject identifier (a conversation id).
pub type SubjectId = i64;

// ---------------------------------------------------------------------------
// Subject
// ---------------------------------------------------------------------------

/// The entity advanced through a flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subject {
    pub id: SubjectId,
    /// Delivery address (phone number) copied onto every generated output.
    pub destination: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// Timestamp of the last message exchanged with this subject.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_activity_at: Option<DateTime<Utc>>,
    /// Free-form attributes, exposed verbatim as `ctx.<key>`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, ContextValue>,
}

impl Subject {
    pub fn new(id: SubjectId, destination: impl Into<String>) -> Self {
        Self {
            id,
            destination: destination.into(),
            name: None,
            status: None,
            last_activity_at: None,
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_last_activity(mut self, at: DateTime<Utc>) -> Self {
        self.last_activity_at = Some(at);
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<ContextValue>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Whole days since the last activity, or `None` if never active.
    pub fn days_inactive(&self, now: DateTime<Utc>) -> Option<i64> {
        self.last_activity_at
            .map(|at| (now - at).num_days().max(0))
    }

    /// Inactivity bucket at `now`, if the subject has any activity.
    pub fn bucket(&self, now: DateTime<Utc>) -> Option<InactivityBucket> {
        self.days_inactive(now).map(InactivityBucket::from_days)
    }
}

// ---------------------------------------------------------------------------
// Context values
// ---------------------------------------------------------------------------

/// A scalar visible to condition expressions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ContextValue {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
}

impl From<&str> for ContextValue {
    fn from(s: &str) -> Self {
        ContextValue::String(s.to_string())
    }
}

impl From<String> for ContextValue {
    fn from(s: String) -> Self {
        ContextValue::String(s)
    }
}

impl From<bool> for ContextValue {
    fn from(b: bool) -> Self {
        ContextValue::Bool(b)
    }
}

impl From<f64> for ContextValue {
    fn from(n: f64) -> Self {
        ContextValue::Number(n)
    }
}

impl From<i64> for ContextValue {
    fn from(n: i64) -> Self {
        ContextValue::Number(n as f64)
    }
}

impl<T: Into<ContextValue>> From<Option<T>> for ContextValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(ContextValue::Null)
    }
}

impl fmt::Display for ContextValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContextValue::Null => f.write_str("null"),
            ContextValue::Bool(b) => write!(f, "{b}"),
            ContextValue::Number(n) => write!(f, "{n}"),
            ContextValue::String(s) => f.write_str(s),
        }
    }
}

// ---------------------------------------------------------------------------
// Inactivity buckets
// ---------------------------------------------------------------------------

/// Segment buckets by days since last activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InactivityBucket {
    D0To3,
    D4To7,
    D8To15,
    D16To30,
    D30Plus,
}

impl InactivityBucket {
    pub const ALL: [InactivityBucket; 5] = [
        InactivityBucket::D0To3,
        InactivityBucket::D4To7,
        InactivityBucket::D8To15,
        InactivityBucket::D16To30,
        InactivityBucket::D30Plus,
    ];

    pub fn from_days(days: i64) -> Self {
        match days {
            i64::MIN..=3 => InactivityBucket::D0To3,
            4..=7 => InactivityBucket::D4To7,
            8..=15 => InactivityBucket::D8To15,
            16..=30 => InactivityBucket::D16To30,
            _ => InactivityBucket::D30Plus,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            InactivityBucket::D0To3 => "D0-D3",
            InactivityBucket::D4To7 => "D4-D7",
            InactivityBucket::D8To15 => "D8-D15",
            InactivityBucket::D16To30 => "D16-D30",
            InactivityBucket::D30Plus => "D30+",
        }
    }

    /// Parse a segment tag. En-dash labels (`D16–D30`) written by older
    /// panels are accepted alongside the ASCII form.
    pub fn parse(tag: &str) -> Option<Self> {
        let normalized: String = tag
            .trim()
            .chars()
            .map(|c| if c == '\u{2013}' || c == '\u{2014}' { '-' } else { c })
            .collect::<String>()
            .to_uppercase();
        Self::ALL
            .into_iter()
            .find(|bucket| bucket.label() == normalized)
    }

    /// Bounds on `last_activity_at` selecting this bucket at `now`, as
    /// `(oldest_allowed, newest_allowed)`. `None` leaves that side open.
    pub fn activity_window(
        &self,
        now: DateTime<Utc>,
    ) -> (Option<DateTime<Utc>>, Option<DateTime<Utc>>) {
        let days = |n: i64| now - Duration::days(n);
        match self {
            InactivityBucket::D0To3 => (Some(days(3)), None),
            InactivityBucket::D4To7 => (Some(days(7)), Some(days(4))),
            InactivityBucket::D8To15 => (Some(days(15)), Some(days(8))),
            InactivityBucket::D16To30 => (Some(days(30)), Some(days(16))),
            InactivityBucket::D30Plus => (None, Some(days(30))),
        }
    }
}

impl fmt::Display for InactivityBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
