//! SQLite flow repository implementation.
//!
//! Flows live in `flows`; legacy linear steps in `flow_steps`. Both are read
//! together so the graph loader can fall back to the legacy rows.

use chrono::Utc;
use dripflow_core::repository::flow::FlowRepository;
use dripflow_types::error::RepositoryError;
use dripflow_types::flow::{FlowDefinition, FlowId, FlowStatus, LegacyStepRow};
use sqlx::Row;

use super::format_datetime;
use super::pool::DatabasePool;

/// SQLite-backed implementation of `FlowRepository`.
pub struct SqliteFlowRepository {
    pool: DatabasePool,
}

impl SqliteFlowRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    /// Next unused flow id, for imports that do not pick one.
    pub async fn next_id(&self) -> Result<FlowId, RepositoryError> {
        let row = sqlx::query("SELECT COALESCE(MAX(id), 0) + 1 AS next_id FROM flows")
            .fetch_one(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;
        row.try_get("next_id")
            .map_err(|e| RepositoryError::Query(e.to_string()))
    }

    async fn load_legacy_steps(&self, flow_id: FlowId) -> Result<Vec<LegacyStepRow>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT step_order, step_type, template_slug, delay_minutes \
             FROM flow_steps WHERE flow_id = ? ORDER BY step_order, id",
        )
        .bind(flow_id)
        .fetch_all(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        rows.iter()
            .map(|row| {
                Ok(LegacyStepRow {
                    position: row.try_get("step_order")?,
                    step_type: row.try_get("step_type")?,
                    template_slug: row.try_get("template_slug")?,
                    delay_minutes: row.try_get("delay_minutes")?,
                })
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()
            .map_err(|e| RepositoryError::Query(e.to_string()))
    }

    async fn with_legacy_steps(&self, row: FlowRow) -> Result<FlowDefinition, RepositoryError> {
        let legacy_steps = self.load_legacy_steps(row.id).await?;
        let mut flow = row.into_flow()?;
        flow.legacy_steps = legacy_steps;
        Ok(flow)
    }
}

// ---------------------------------------------------------------------------
// Internal row type
// ---------------------------------------------------------------------------

struct FlowRow {
    id: i64,
    name: String,
    status: String,
    target_segment: Option<String>,
    definition_json: Option<String>,
}

impl FlowRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            status: row.try_get("status")?,
            target_segment: row.try_get("target_segment")?,
            definition_json: row.try_get("definition_json")?,
        })
    }

    fn into_flow(self) -> Result<FlowDefinition, RepositoryError> {
        let status: FlowStatus = self.status.parse().map_err(RepositoryError::Query)?;
        Ok(FlowDefinition {
            id: self.id,
            name: self.name,
            status,
            target_segment: self.target_segment.filter(|s| !s.trim().is_empty()),
            definition_json: self.definition_json.filter(|s| !s.trim().is_empty()),
            legacy_steps: Vec::new(),
        })
    }
}

// Panel databases store the Portuguese label.
const ACTIVE_STATUSES: &str = "('active', 'ativo')";

impl FlowRepository for SqliteFlowRepository {
    async fn list_active(&self) -> Result<Vec<FlowDefinition>, RepositoryError> {
        let sql = format!(
            "SELECT id, name, status, target_segment, definition_json \
             FROM flows WHERE lower(status) IN {ACTIVE_STATUSES} ORDER BY id"
        );
        let rows = sqlx::query(&sql)
            .fetch_all(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let mut flows = Vec::with_capacity(rows.len());
        for row in &rows {
            let flow_row =
                FlowRow::from_row(row).map_err(|e| RepositoryError::Query(e.to_string()))?;
            flows.push(self.with_legacy_steps(flow_row).await?);
        }
        Ok(flows)
    }

    async fn get(&self, id: FlowId) -> Result<Option<FlowDefinition>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, name, status, target_segment, definition_json FROM flows WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        match row {
            Some(r) => {
                let flow_row =
                    FlowRow::from_row(&r).map_err(|e| RepositoryError::Query(e.to_string()))?;
                Ok(Some(self.with_legacy_steps(flow_row).await?))
            }
            None => Ok(None),
        }
    }

    async fn save(&self, flow: &FlowDefinition) -> Result<(), RepositoryError> {
        let now = format_datetime(&Utc::now());
        sqlx::query(
            r#"INSERT INTO flows (id, name, status, target_segment, definition_json, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(id) DO UPDATE SET
                   name = excluded.name,
                   status = excluded.status,
                   target_segment = excluded.target_segment,
                   definition_json = excluded.definition_json,
                   updated_at = excluded.updated_at"#,
        )
        .bind(flow.id)
        .bind(&flow.name)
        .bind(flow.status.as_str())
        .bind(&flow.target_segment)
        .bind(&flow.definition_json)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        tracing::debug!(flow_id = flow.id, status = %flow.status, "flow saved");
        Ok(())
    }
}
