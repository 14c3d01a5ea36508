//! SQLite segment resolver.
//!
//! Selects conversations by inactivity bucket, skipping those that already
//! finished the flow or are still waiting on a delay.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use dripflow_core::repository::segment::SegmentResolver;
use dripflow_types::error::RepositoryError;
use dripflow_types::flow::FlowId;
use dripflow_types::subject::{ContextValue, InactivityBucket, Subject};
use sqlx::Row;

use super::pool::DatabasePool;
use super::{format_datetime, parse_datetime};

/// SQLite-backed implementation of `SegmentResolver` over `conversations`.
pub struct SqliteSegmentResolver {
    pool: DatabasePool,
}

impl SqliteSegmentResolver {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

// ---------------------------------------------------------------------------
// Internal row type
// ---------------------------------------------------------------------------

struct ConversationRow {
    id: i64,
    destination: String,
    display_name: Option<String>,
    status: Option<String>,
    last_message_at: Option<String>,
    attributes: Option<String>,
}

impl ConversationRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            destination: row.try_get("destination")?,
            display_name: row.try_get("display_name")?,
            status: row.try_get("status")?,
            last_message_at: row.try_get("last_message_at")?,
            attributes: row.try_get("attributes")?,
        })
    }

    fn into_subject(self) -> Result<Subject, RepositoryError> {
        let last_activity_at = self
            .last_message_at
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .map(parse_datetime)
            .transpose()?;
        let attributes = self
            .attributes
            .as_deref()
            .map(|raw| parse_attributes(self.id, raw))
            .unwrap_or_default();

        Ok(Subject {
            id: self.id,
            destination: self.destination,
            name: self.display_name.filter(|s| !s.trim().is_empty()),
            status: self.status.filter(|s| !s.trim().is_empty()),
            last_activity_at,
            attributes,
        })
    }
}

/// Scalar entries of a JSON object. Nested values are dropped; anything that
/// is not an object yields no attributes.
fn parse_attributes(subject_id: i64, raw: &str) -> BTreeMap<String, ContextValue> {
    if raw.trim().is_empty() {
        return BTreeMap::new();
    }
    let object = match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(serde_json::Value::Object(map)) => map,
        Ok(_) | Err(_) => {
            tracing::warn!(subject_id, "conversation attributes are not a JSON object, ignoring");
            return BTreeMap::new();
        }
    };

    object
        .into_iter()
        .filter_map(|(key, value)| {
            let scalar = match value {
                serde_json::Value::Null => ContextValue::Null,
                serde_json::Value::Bool(b) => ContextValue::Bool(b),
                serde_json::Value::Number(n) => ContextValue::Number(n.as_f64()?),
                serde_json::Value::String(s) => ContextValue::String(s),
                serde_json::Value::Array(_) | serde_json::Value::Object(_) => return None,
            };
            Some((key, scalar))
        })
        .collect()
}

impl SegmentResolver for SqliteSegmentResolver {
    async fn resolve_eligible(
        &self,
        flow_id: FlowId,
        segment: Option<&str>,
        max_batch: u32,
        now: DateTime<Utc>,
    ) -> Result<Vec<Subject>, RepositoryError> {
        let bucket = match segment.map(str::trim).filter(|s| !s.is_empty()) {
            Some(tag) => {
                let parsed = InactivityBucket::parse(tag);
                if parsed.is_none() {
                    tracing::warn!(flow_id, segment = tag, "unknown segment, selecting all subjects");
                }
                parsed
            }
            None => None,
        };

        let mut sql = String::from(
            "SELECT c.id, c.destination, c.display_name, c.status, c.last_message_at, c.attributes \
             FROM conversations c \
             LEFT JOIN flow_executions e ON e.flow_id = ? AND e.subject_id = c.id \
             WHERE (e.status IS NULL OR e.status != 'finished') \
             AND (e.next_run_at IS NULL OR julianday(e.next_run_at) <= julianday(?))",
        );

        let mut bounds = Vec::new();
        if let Some(bucket) = bucket {
            sql.push_str(" AND c.last_message_at IS NOT NULL");
            let (oldest, newest) = bucket.activity_window(now);
            if let Some(oldest) = oldest {
                sql.push_str(" AND julianday(c.last_message_at) >= julianday(?)");
                bounds.push(format_datetime(&oldest));
            }
            if let Some(newest) = newest {
                sql.push_str(" AND julianday(c.last_message_at) <= julianday(?)");
                bounds.push(format_datetime(&newest));
            }
        }
        sql.push_str(" ORDER BY c.id LIMIT ?");

        let mut query = sqlx::query(&sql).bind(flow_id).bind(format_datetime(&now));
        for bound in &bounds {
            query = query.bind(bound);
        }
        let rows = query
            .bind(i64::from(max_batch))
            .fetch_all(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        // A malformed row costs only its own subject.
        let subjects: Vec<Subject> = rows
            .iter()
            .filter_map(|r| {
                let subject = ConversationRow::from_row(r)
                    .map_err(|e| RepositoryError::Query(e.to_string()))
                    .and_then(ConversationRow::into_subject);
                match subject {
                    Ok(subject) => Some(subject),
                    Err(e) => {
                        let subject_id: Option<i64> = r.try_get("id").ok();
                        tracing::warn!(flow_id, ?subject_id, error = %e, "skipping unreadable conversation");
                        None
                    }
                }
            })
            .collect();

        tracing::debug!(
            flow_id,
            segment = bucket.map(|b| b.label()).unwrap_or("all"),
            count = subjects.len(),
            "segment resolved"
        );
        Ok(subjects)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::pool::test_support::{insert_conversation, insert_flow, temp_pool};
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    fn days_ago(days: i64) -> String {
        format_datetime(&(now() - Duration::days(days)))
    }

    async fn seeded() -> (tempfile::TempDir, DatabasePool) {
        let (dir, pool) = temp_pool().await;
        insert_flow(&pool, 1, "active", None, None).await;
        for (id, days) in [(1, 1), (2, 5), (3, 10), (4, 20), (5, 45)] {
            insert_conversation(&pool, id, Some(&days_ago(days)), None).await;
        }
        insert_conversation(&pool, 6, None, None).await;
        (dir, pool)
    }

    fn ids(subjects: &[Subject]) -> Vec<i64> {
        subjects.iter().map(|s| s.id).collect()
    }

    #[tokio::test]
    async fn buckets_select_by_inactivity() {
        let (_dir, pool) = seeded().await;
        let resolver = SqliteSegmentResolver::new(pool);

        for (tag, expected) in [
            ("D0-D3", vec![1]),
            ("D4-D7", vec![2]),
            ("D8-D15", vec![3]),
            ("D16\u{2013}D30", vec![4]),
            ("D30+", vec![5]),
        ] {
            let subjects = resolver.resolve_eligible(1, Some(tag), 100, now()).await.unwrap();
            assert_eq!(ids(&subjects), expected, "segment {tag}");
        }
    }

    #[tokio::test]
    async fn no_or_unknown_segment_selects_everyone_in_id_order() {
        let (_dir, pool) = seeded().await;
        let resolver = SqliteSegmentResolver::new(pool);

        let all = resolver.resolve_eligible(1, None, 100, now()).await.unwrap();
        assert_eq!(ids(&all), vec![1, 2, 3, 4, 5, 6]);

        let unknown = resolver.resolve_eligible(1, Some("vip"), 100, now()).await.unwrap();
        assert_eq!(ids(&unknown), vec![1, 2, 3, 4, 5, 6]);
    }

    #[tokio::test]
    async fn batch_is_capped() {
        let (_dir, pool) = seeded().await;
        let resolver = SqliteSegmentResolver::new(pool);
        let subjects = resolver.resolve_eligible(1, None, 2, now()).await.unwrap();
        assert_eq!(ids(&subjects), vec![1, 2]);
    }

    #[tokio::test]
    async fn finished_and_waiting_subjects_are_left_out() {
        let (_dir, pool) = seeded().await;
        let later = format_datetime(&(now() + Duration::minutes(10)));
        let earlier = format_datetime(&(now() - Duration::minutes(10)));
        for (subject, status, next_run_at) in [
            (1, "finished", None),
            (2, "active", Some(later.as_str())),
            (3, "active", Some(earlier.as_str())),
        ] {
            sqlx::query(
                "INSERT INTO flow_executions (flow_id, subject_id, current_step, status, next_run_at, created_at, updated_at) \
                 VALUES (1, ?, 'a', ?, ?, '2026-03-01T00:00:00Z', '2026-03-01T00:00:00Z')",
            )
            .bind(subject)
            .bind(status)
            .bind(next_run_at)
            .execute(&pool.writer)
            .await
            .unwrap();
        }

        let resolver = SqliteSegmentResolver::new(pool);
        let subjects = resolver.resolve_eligible(1, None, 100, now()).await.unwrap();
        assert_eq!(ids(&subjects), vec![3, 4, 5, 6]);

        // Progress in another flow does not matter.
        insert_flow(&resolver.pool, 2, "active", None, None).await;
        let other = resolver.resolve_eligible(2, None, 100, now()).await.unwrap();
        assert_eq!(ids(&other), vec![1, 2, 3, 4, 5, 6]);
    }

    #[tokio::test]
    async fn unreadable_row_skips_only_that_subject() {
        let (_dir, pool) = temp_pool().await;
        insert_flow(&pool, 1, "active", None, None).await;
        insert_conversation(&pool, 1, Some("2026-02-01 08:00:00"), None).await;
        insert_conversation(&pool, 2, Some("2026-02-01T08:00"), None).await;
        insert_conversation(&pool, 3, Some("2026-02-20T08:00:00Z"), None).await;

        let resolver = SqliteSegmentResolver::new(pool);
        let subjects = resolver.resolve_eligible(1, None, 100, now()).await.unwrap();
        assert_eq!(ids(&subjects), vec![1, 3]);
    }

    #[tokio::test]
    async fn subject_fields_and_attributes_are_mapped() {
        let (_dir, pool) = temp_pool().await;
        insert_flow(&pool, 1, "active", None, None).await;
        insert_conversation(
            &pool,
            7,
            Some("2026-02-01 08:00:00"),
            Some(r#"{"plan": "gold", "orders": 3, "vip": true, "tags": ["a"]}"#),
        )
        .await;
        insert_conversation(&pool, 8, None, Some("not json")).await;

        let resolver = SqliteSegmentResolver::new(pool);
        let subjects = resolver.resolve_eligible(1, None, 100, now()).await.unwrap();

        let first = &subjects[0];
        assert_eq!(first.destination, "+5511900000007");
        assert_eq!(first.name.as_deref(), Some("Customer 7"));
        assert_eq!(first.status.as_deref(), Some("open"));
        assert_eq!(
            first.last_activity_at,
            Some(Utc.with_ymd_and_hms(2026, 2, 1, 8, 0, 0).unwrap())
        );
        assert_eq!(first.attributes.get("plan"), Some(&ContextValue::from("gold")));
        assert_eq!(first.attributes.get("orders"), Some(&ContextValue::Number(3.0)));
        assert_eq!(first.attributes.get("vip"), Some(&ContextValue::Bool(true)));
        assert!(!first.attributes.contains_key("tags"));

        assert!(subjects[1].attributes.is_empty());
    }
}
