//! SQLite triage audit log.
//!
//! Append-only; `seq` preserves insertion order for entries sharing a
//! timestamp.

use sqlx::Row;
use switchboard_core::repository::triage_log::TriageLogRepository;
use switchboard_types::audit::TriageLogEntry;
use switchboard_types::error::RepositoryError;
use uuid::Uuid;

use super::pool::DatabasePool;
use super::{db_err, format_datetime, is_unique_violation, parse_datetime, parse_enum, parse_uuid};

pub struct SqliteTriageLogRepository {
    pool: DatabasePool,
}

impl SqliteTriageLogRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

fn decode(row: &sqlx::sqlite::SqliteRow) -> Result<TriageLogEntry, RepositoryError> {
    let id: String = row.try_get("id").map_err(db_err)?;
    let session_id: String = row.try_get("session_id").map_err(db_err)?;
    let direction: String = row.try_get("direction").map_err(db_err)?;
    let timestamp: String = row.try_get("timestamp").map_err(db_err)?;
    Ok(TriageLogEntry {
        id: parse_uuid(&id, "log entry")?,
        session_id: parse_uuid(&session_id, "session")?,
        tenant_id: row.try_get("tenant_id").map_err(db_err)?,
        step_id: row.try_get("step_id").map_err(db_err)?,
        direction: parse_enum(&direction)?,
        raw_input: row.try_get("raw_input").map_err(db_err)?,
        matched_option: row.try_get("matched_option").map_err(db_err)?,
        timestamp: parse_datetime(&timestamp)?,
    })
}

impl TriageLogRepository for SqliteTriageLogRepository {
    async fn append(&self, entry: &TriageLogEntry) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            "INSERT INTO triage_log (id, session_id, tenant_id, step_id, direction, raw_input, matched_option, timestamp)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(entry.id.to_string())
        .bind(entry.session_id.to_string())
        .bind(&entry.tenant_id)
        .bind(&entry.step_id)
        .bind(entry.direction.as_str())
        .bind(&entry.raw_input)
        .bind(&entry.matched_option)
        .bind(format_datetime(&entry.timestamp))
        .execute(&self.pool.writer)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => {
                Err(RepositoryError::Conflict(format!("log entry {} exists", entry.id)))
            }
            Err(e) => Err(db_err(e)),
        }
    }

    async fn list_by_session(&self, session_id: &Uuid) -> Result<Vec<TriageLogEntry>, RepositoryError> {
        let rows = sqlx::query("SELECT * FROM triage_log WHERE session_id = ? ORDER BY seq")
            .bind(session_id.to_string())
            .fetch_all(&self.pool.reader)
            .await
            .map_err(db_err)?;
        rows.iter().map(decode).collect()
    }

    async fn list_by_tenant(
        &self,
        tenant_id: &str,
        limit: u32,
    ) -> Result<Vec<TriageLogEntry>, RepositoryError> {
        let rows = sqlx::query("SELECT * FROM triage_log WHERE tenant_id = ? ORDER BY seq DESC LIMIT ?")
            .bind(tenant_id)
            .bind(i64::from(limit))
            .fetch_all(&self.pool.reader)
            .await
            .map_err(db_err)?;
        rows.iter().map(decode).collect()
    }
}
