//! SQLite storage layer.
//!
//! Repository implementations backed by SQLite with WAL mode and split
//! read/write connection pools. Timestamps are stored as RFC 3339 text with
//! second precision (`2026-03-01T12:00:00Z`).

pub mod execution;
pub mod flow;
pub mod outbound;
pub mod pool;
pub mod segment;

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use dripflow_types::error::RepositoryError;

/// Parse a stored timestamp. Panel-written `YYYY-MM-DD HH:MM:SS` values are
/// read as UTC.
pub(crate) fn parse_datetime(s: &str) -> Result<DateTime<Utc>, RepositoryError> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .map(|naive| naive.and_utc())
        .map_err(|e| RepositoryError::Query(format!("invalid datetime '{s}': {e}")))
}

pub(crate) fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Secs, true)
}
