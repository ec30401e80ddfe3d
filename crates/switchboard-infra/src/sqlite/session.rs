//! SQLite session repository.
//!
//! The single-active-session rule is a partial unique index on
//! `contact_id` over the non-terminal states, so a racing second insert
//! fails with `Conflict`. Updates are conditional on the stored version.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use sqlx::Row;
use switchboard_core::repository::session::SessionRepository;
use switchboard_types::error::RepositoryError;
use switchboard_types::session::Session;
use uuid::Uuid;

use super::pool::DatabasePool;
use super::{db_err, format_datetime, is_unique_violation, parse_datetime, parse_enum, parse_uuid};

const ACTIVE_STATES: &str = "('ATIVA', 'AGUARDANDO_INPUT')";

pub struct SqliteSessionRepository {
    pool: DatabasePool,
}

impl SqliteSessionRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    async fn stored_version(&self, id: &Uuid) -> Result<Option<i64>, RepositoryError> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT version FROM sessions WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool.writer)
            .await
            .map_err(db_err)?;
        Ok(row.map(|(v,)| v))
    }
}

/// Internal row type for mapping SQLite rows to [`Session`].
struct SessionRow {
    id: String,
    contact_id: String,
    tenant_id: String,
    channel: String,
    flow_id: String,
    flow_version: i64,
    current_step: String,
    context: String,
    state: String,
    started_at: String,
    last_activity_at: String,
    version: i64,
    last_message_key: Option<String>,
}

impl SessionRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            contact_id: row.try_get("contact_id")?,
            tenant_id: row.try_get("tenant_id")?,
            channel: row.try_get("channel")?,
            flow_id: row.try_get("flow_id")?,
            flow_version: row.try_get("flow_version")?,
            current_step: row.try_get("current_step")?,
            context: row.try_get("context")?,
            state: row.try_get("state")?,
            started_at: row.try_get("started_at")?,
            last_activity_at: row.try_get("last_activity_at")?,
            version: row.try_get("version")?,
            last_message_key: row.try_get("last_message_key")?,
        })
    }

    fn into_session(self) -> Result<Session, RepositoryError> {
        let context: BTreeMap<String, String> = serde_json::from_str(&self.context)
            .map_err(|e| RepositoryError::Query(format!("invalid context JSON: {e}")))?;
        Ok(Session {
            id: parse_uuid(&self.id, "session")?,
            contact_id: self.contact_id,
            tenant_id: self.tenant_id,
            channel: self.channel,
            flow_id: self.flow_id,
            flow_version: u32::try_from(self.flow_version)
                .map_err(|_| RepositoryError::Query("invalid flow version".to_string()))?,
            current_step: self.current_step,
            context,
            state: parse_enum(&self.state)?,
            started_at: parse_datetime(&self.started_at)?,
            last_activity_at: parse_datetime(&self.last_activity_at)?,
            version: u64::try_from(self.version)
                .map_err(|_| RepositoryError::Query("invalid session version".to_string()))?,
            last_message_key: self.last_message_key,
        })
    }
}

fn decode(row: &sqlx::sqlite::SqliteRow) -> Result<Session, RepositoryError> {
    SessionRow::from_row(row).map_err(db_err)?.into_session()
}

fn context_json(session: &Session) -> Result<String, RepositoryError> {
    serde_json::to_string(&session.context).map_err(|e| RepositoryError::Query(e.to_string()))
}

impl SessionRepository for SqliteSessionRepository {
    async fn insert_session(&self, session: &Session) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            "INSERT INTO sessions (id, contact_id, tenant_id, channel, flow_id, flow_version, current_step, context, state, started_at, last_activity_at, version, last_message_key)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(session.id.to_string())
        .bind(&session.contact_id)
        .bind(&session.tenant_id)
        .bind(&session.channel)
        .bind(&session.flow_id)
        .bind(i64::from(session.flow_version))
        .bind(&session.current_step)
        .bind(context_json(session)?)
        .bind(session.state.as_str())
        .bind(format_datetime(&session.started_at))
        .bind(format_datetime(&session.last_activity_at))
        .bind(session.version as i64)
        .bind(&session.last_message_key)
        .execute(&self.pool.writer)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => Err(RepositoryError::Conflict(format!(
                "contact '{}' already has an active session",
                session.contact_id
            ))),
            Err(e) => Err(db_err(e)),
        }
    }

    async fn get_session(&self, id: &Uuid) -> Result<Option<Session>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM sessions WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(db_err)?;
        row.as_ref().map(decode).transpose()
    }

    async fn get_active_session(&self, contact_id: &str) -> Result<Option<Session>, RepositoryError> {
        let sql = format!("SELECT * FROM sessions WHERE contact_id = ? AND state IN {ACTIVE_STATES}");
        let row = sqlx::query(&sql)
            .bind(contact_id)
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(db_err)?;
        row.as_ref().map(decode).transpose()
    }

    async fn compare_and_swap(
        &self,
        session: &Session,
        expected_version: u64,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            "UPDATE sessions SET current_step = ?, context = ?, state = ?, last_activity_at = ?, version = ?, last_message_key = ?
             WHERE id = ? AND version = ?",
        )
        .bind(&session.current_step)
        .bind(context_json(session)?)
        .bind(session.state.as_str())
        .bind(format_datetime(&session.last_activity_at))
        .bind(session.version as i64)
        .bind(&session.last_message_key)
        .bind(session.id.to_string())
        .bind(expected_version as i64)
        .execute(&self.pool.writer)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 1 {
            return Ok(());
        }
        match self.stored_version(&session.id).await? {
            Some(_) => Err(RepositoryError::StaleVersion {
                expected: expected_version,
            }),
            None => Err(RepositoryError::NotFound),
        }
    }

    async fn list_active_sessions(&self) -> Result<Vec<Session>, RepositoryError> {
        let sql = format!("SELECT * FROM sessions WHERE state IN {ACTIVE_STATES} ORDER BY last_activity_at");
        let rows = sqlx::query(&sql)
            .fetch_all(&self.pool.reader)
            .await
            .map_err(db_err)?;
        rows.iter().map(decode).collect()
    }

    async fn message_applied(&self, contact_id: &str, message_key: &str) -> Result<bool, RepositoryError> {
        let row: Option<(i64,)> = sqlx::query_as(
            "SELECT seq FROM applied_messages WHERE contact_id = ? AND message_key = ?",
        )
        .bind(contact_id)
        .bind(message_key)
        .fetch_optional(&self.pool.reader)
        .await
        .map_err(db_err)?;
        Ok(row.is_some())
    }

    async fn record_applied_message(
        &self,
        contact_id: &str,
        message_key: &str,
        applied_at: DateTime<Utc>,
        keep: usize,
    ) -> Result<(), RepositoryError> {
        let mut tx = self.pool.writer.begin().await.map_err(db_err)?;
        sqlx::query(
            "INSERT OR IGNORE INTO applied_messages (contact_id, message_key, applied_at) VALUES (?, ?, ?)",
        )
        .bind(contact_id)
        .bind(message_key)
        .bind(format_datetime(&applied_at))
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;
        sqlx::query(
            "DELETE FROM applied_messages WHERE contact_id = ? AND seq NOT IN
                (SELECT seq FROM applied_messages WHERE contact_id = ? ORDER BY seq DESC LIMIT ?)",
        )
        .bind(contact_id)
        .bind(contact_id)
        .bind(keep.max(1) as i64)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;
        tx.commit().await.map_err(db_err)?;
        Ok(())
    }
}
