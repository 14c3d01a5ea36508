//! SQLite execution state repository implementation.
//!
//! Every mutation is a single `INSERT ... ON CONFLICT DO UPDATE` on the
//! `(flow_id, subject_id)` primary key, so the step pointer and `next_run_at`
//! always change together and a pair never has two records.

use chrono::{DateTime, Duration, Utc};
use dripflow_core::repository::execution::ExecutionStateRepository;
use dripflow_types::error::RepositoryError;
use dripflow_types::execution::{ExecutionState, ExecutionStatus};
use dripflow_types::flow::FlowId;
use dripflow_types::subject::SubjectId;
use sqlx::Row;

use super::pool::DatabasePool;
use super::{format_datetime, parse_datetime};

/// SQLite-backed implementation of `ExecutionStateRepository`.
pub struct SqliteExecutionStateRepository {
    pool: DatabasePool,
}

impl SqliteExecutionStateRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

// ---------------------------------------------------------------------------
// Internal row type
// ---------------------------------------------------------------------------

struct ExecutionRow {
    flow_id: i64,
    subject_id: i64,
    current_step: Option<String>,
    status: String,
    next_run_at: Option<String>,
    updated_at: String,
}

impl ExecutionRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            flow_id: row.try_get("flow_id")?,
            subject_id: row.try_get("subject_id")?,
            current_step: row.try_get("current_step")?,
            status: row.try_get("status")?,
            next_run_at: row.try_get("next_run_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn into_state(self) -> Result<ExecutionState, RepositoryError> {
        let status = ExecutionStatus::parse(&self.status).ok_or_else(|| {
            RepositoryError::Query(format!("invalid execution status: {}", self.status))
        })?;
        let next_run_at = self
            .next_run_at
            .as_deref()
            .map(parse_datetime)
            .transpose()?;

        Ok(ExecutionState {
            flow_id: self.flow_id,
            subject_id: self.subject_id,
            current_step: self.current_step,
            next_run_at,
            status,
            updated_at: parse_datetime(&self.updated_at)?,
        })
    }
}

const SELECT_COLUMNS: &str =
    "SELECT flow_id, subject_id, current_step, status, next_run_at, updated_at FROM flow_executions";

impl ExecutionStateRepository for SqliteExecutionStateRepository {
    async fn get(
        &self,
        flow_id: FlowId,
        subject_id: SubjectId,
    ) -> Result<Option<ExecutionState>, RepositoryError> {
        let sql = format!("{SELECT_COLUMNS} WHERE flow_id = ? AND subject_id = ?");
        let row = sqlx::query(&sql)
            .bind(flow_id)
            .bind(subject_id)
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        match row {
            Some(r) => {
                let exec_row =
                    ExecutionRow::from_row(&r).map_err(|e| RepositoryError::Query(e.to_string()))?;
                Ok(Some(exec_row.into_state()?))
            }
            None => Ok(None),
        }
    }

    async fn advance(
        &self,
        flow_id: FlowId,
        subject_id: SubjectId,
        next_step_id: &str,
        delay_minutes: u32,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let now_str = format_datetime(&now);
        let next_run_at = (delay_minutes > 0)
            .then(|| format_datetime(&(now + Duration::minutes(i64::from(delay_minutes)))));

        sqlx::query(
            r#"INSERT INTO flow_executions
                   (flow_id, subject_id, current_step, status, next_run_at, created_at, updated_at)
               VALUES (?, ?, ?, 'active', ?, ?, ?)
               ON CONFLICT(flow_id, subject_id) DO UPDATE SET
                   current_step = excluded.current_step,
                   status = 'active',
                   next_run_at = excluded.next_run_at,
                   updated_at = excluded.updated_at"#,
        )
        .bind(flow_id)
        .bind(subject_id)
        .bind(next_step_id)
        .bind(&next_run_at)
        .bind(&now_str)
        .bind(&now_str)
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(())
    }

    async fn finalize(
        &self,
        flow_id: FlowId,
        subject_id: SubjectId,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let now_str = format_datetime(&now);

        sqlx::query(
            r#"INSERT INTO flow_executions
                   (flow_id, subject_id, current_step, status, next_run_at, created_at, updated_at)
               VALUES (?, ?, NULL, 'finished', NULL, ?, ?)
               ON CONFLICT(flow_id, subject_id) DO UPDATE SET
                   status = 'finished',
                   next_run_at = NULL,
                   updated_at = excluded.updated_at"#,
        )
        .bind(flow_id)
        .bind(subject_id)
        .bind(&now_str)
        .bind(&now_str)
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(())
    }

    async fn list_for_flow(&self, flow_id: FlowId) -> Result<Vec<ExecutionState>, RepositoryError> {
        let sql = format!("{SELECT_COLUMNS} WHERE flow_id = ? ORDER BY subject_id");
        let rows = sqlx::query(&sql)
            .bind(flow_id)
            .fetch_all(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        rows.iter()
            .map(|r| {
                ExecutionRow::from_row(r)
                    .map_err(|e| RepositoryError::Query(e.to_string()))?
                    .into_state()
            })
            .collect()
    }
}
