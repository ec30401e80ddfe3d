//! SQLite flow version repository.
//!
//! Each published version is one immutable row holding the definition as
//! JSON; `(flow_id, version)` is the primary key, so republishing an
//! existing version fails with `Conflict`.

use sqlx::Row;
use switchboard_core::repository::flow::FlowRepository;
use switchboard_types::error::RepositoryError;
use switchboard_types::flow::FlowDefinition;

use super::pool::DatabasePool;
use super::{db_err, format_datetime, is_unique_violation};

pub struct SqliteFlowRepository {
    pool: DatabasePool,
}

impl SqliteFlowRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

fn decode(row: &sqlx::sqlite::SqliteRow) -> Result<FlowDefinition, RepositoryError> {
    let json: String = row.try_get("definition").map_err(db_err)?;
    serde_json::from_str(&json)
        .map_err(|e| RepositoryError::Query(format!("invalid flow definition JSON: {e}")))
}

impl FlowRepository for SqliteFlowRepository {
    async fn save_version(&self, flow: &FlowDefinition) -> Result<(), RepositoryError> {
        let json =
            serde_json::to_string(flow).map_err(|e| RepositoryError::Query(e.to_string()))?;

        let result = sqlx::query(
            "INSERT INTO flow_versions (flow_id, version, definition, published_at) VALUES (?, ?, ?, ?)",
        )
        .bind(&flow.id)
        .bind(i64::from(flow.version))
        .bind(&json)
        .bind(flow.published_at.as_ref().map(format_datetime))
        .execute(&self.pool.writer)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => Err(RepositoryError::Conflict(format!(
                "flow '{}' version {} already exists",
                flow.id, flow.version
            ))),
            Err(e) => Err(db_err(e)),
        }
    }

    async fn get_version(
        &self,
        flow_id: &str,
        version: u32,
    ) -> Result<Option<FlowDefinition>, RepositoryError> {
        let row = sqlx::query("SELECT definition FROM flow_versions WHERE flow_id = ? AND version = ?")
            .bind(flow_id)
            .bind(i64::from(version))
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(db_err)?;
        row.as_ref().map(decode).transpose()
    }

    async fn get_latest(&self, flow_id: &str) -> Result<Option<FlowDefinition>, RepositoryError> {
        let row = sqlx::query(
            "SELECT definition FROM flow_versions WHERE flow_id = ? ORDER BY version DESC LIMIT 1",
        )
        .bind(flow_id)
        .fetch_optional(&self.pool.reader)
        .await
        .map_err(db_err)?;
        row.as_ref().map(decode).transpose()
    }

    async fn list_versions(&self, flow_id: &str) -> Result<Vec<u32>, RepositoryError> {
        let rows: Vec<(i64,)> =
            sqlx::query_as("SELECT version FROM flow_versions WHERE flow_id = ? ORDER BY version")
                .bind(flow_id)
                .fetch_all(&self.pool.reader)
                .await
                .map_err(db_err)?;
        rows.into_iter()
            .map(|(v,)| {
                u32::try_from(v).map_err(|_| RepositoryError::Query(format!("invalid version {v}")))
            })
            .collect()
    }

    async fn list_flows(&self) -> Result<Vec<String>, RepositoryError> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT DISTINCT flow_id FROM flow_versions ORDER BY flow_id")
                .fetch_all(&self.pool.reader)
                .await
                .map_err(db_err)?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }
}
