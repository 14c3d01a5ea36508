//! SQLite outbound queue implementation.
//!
//! Rows land in `flow_queue` with status `pending`; the delivery worker owns
//! every later status change.

use dripflow_core::repository::outbound::OutboundQueue;
use dripflow_types::error::RepositoryError;
use dripflow_types::execution::GeneratedOutput;
use dripflow_types::flow::FlowId;
use sqlx::Row;

use super::pool::DatabasePool;
use super::{format_datetime, parse_datetime};

/// SQLite-backed implementation of `OutboundQueue`.
pub struct SqliteOutboundQueue {
    pool: DatabasePool,
}

impl SqliteOutboundQueue {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    /// Outputs of `flow_id` not yet picked up by the delivery worker.
    pub async fn count_pending(&self, flow_id: FlowId) -> Result<i64, RepositoryError> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS pending FROM flow_queue WHERE flow_id = ? AND status = 'pending'",
        )
        .bind(flow_id)
        .fetch_one(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        row.try_get("pending")
            .map_err(|e| RepositoryError::Query(e.to_string()))
    }

    /// Oldest pending outputs first, at most `limit`.
    pub async fn list_pending(&self, limit: u32) -> Result<Vec<GeneratedOutput>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT flow_id, step_id, subject_id, destination, content, created_at \
             FROM flow_queue WHERE status = 'pending' ORDER BY created_at, id LIMIT ?",
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        rows.iter()
            .map(|r| {
                QueueRow::from_row(r)
                    .map_err(|e| RepositoryError::Query(e.to_string()))?
                    .into_output()
            })
            .collect()
    }
}

struct QueueRow {
    flow_id: i64,
    step_id: String,
    subject_id: i64,
    destination: String,
    content: String,
    created_at: String,
}

impl QueueRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            flow_id: row.try_get("flow_id")?,
            step_id: row.try_get("step_id")?,
            subject_id: row.try_get("subject_id")?,
            destination: row.try_get("destination")?,
            content: row.try_get("content")?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn into_output(self) -> Result<GeneratedOutput, RepositoryError> {
        Ok(GeneratedOutput {
            flow_id: self.flow_id,
            step_id: self.step_id,
            subject_id: self.subject_id,
            destination: self.destination,
            content: self.content,
            created_at: parse_datetime(&self.created_at)?,
        })
    }
}

impl OutboundQueue for SqliteOutboundQueue {
    async fn enqueue(&self, output: &GeneratedOutput) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"INSERT INTO flow_queue (flow_id, step_id, subject_id, destination, content, status, created_at)
               VALUES (?, ?, ?, ?, ?, 'pending', ?)"#,
        )
        .bind(output.flow_id)
        .bind(&output.step_id)
        .bind(output.subject_id)
        .bind(&output.destination)
        .bind(&output.content)
        .bind(format_datetime(&output.created_at))
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        tracing::debug!(
            flow_id = output.flow_id,
            subject_id = output.subject_id,
            step = %output.step_id,
            "output enqueued"
        );
        Ok(())
    }
}
