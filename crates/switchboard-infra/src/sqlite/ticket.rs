//! SQLite queue and ticket repository.

use std::collections::{BTreeMap, HashMap};

use sqlx::Row;
use switchboard_core::repository::ticket::TicketRepository;
use switchboard_types::error::RepositoryError;
use switchboard_types::ticket::{AssignmentRecord, Queue, Ticket};
use uuid::Uuid;

use super::pool::DatabasePool;
use super::{
    db_err, format_datetime, is_unique_violation, parse_datetime, parse_enum,
    parse_optional_datetime, parse_uuid,
};

const UPDATE_TICKET: &str = "UPDATE tickets SET queue_id = ?, status = ?, severity = ?, assigned_level = ?, sla_target_at = ?, escalated_at = ?, assignee_id = ?, triage_context = ?, last_activity_at = ?, inactivity_warned_at = ?, closed_at = ?, version = ?
     WHERE id = ? AND version = ?";

pub struct SqliteTicketRepository {
    pool: DatabasePool,
}

impl SqliteTicketRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

struct QueueRow {
    id: String,
    name: String,
    strategy: String,
    capacity_per_attendant: Option<i64>,
    members: String,
    cursor: i64,
    version: i64,
}

impl QueueRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            strategy: row.try_get("strategy")?,
            capacity_per_attendant: row.try_get("capacity_per_attendant")?,
            members: row.try_get("members")?,
            cursor: row.try_get("cursor")?,
            version: row.try_get("version")?,
        })
    }

    fn into_queue(self) -> Result<Queue, RepositoryError> {
        let members: Vec<String> = serde_json::from_str(&self.members)
            .map_err(|e| RepositoryError::Query(format!("invalid members JSON: {e}")))?;
        Ok(Queue {
            id: self.id,
            name: self.name,
            strategy: parse_enum(&self.strategy)?,
            capacity_per_attendant: self
                .capacity_per_attendant
                .map(|c| c.clamp(0, i64::from(u32::MAX)) as u32),
            members,
            cursor: self.cursor.max(0) as u64,
            version: self.version.max(0) as u64,
        })
    }
}

struct TicketRow {
    id: String,
    queue_id: String,
    contact_id: String,
    tenant_id: String,
    session_id: Option<String>,
    status: String,
    severity: String,
    assigned_level: String,
    sla_target_at: Option<String>,
    escalated_at: Option<String>,
    assignee_id: Option<String>,
    triage_context: String,
    created_at: String,
    last_activity_at: String,
    inactivity_warned_at: Option<String>,
    closed_at: Option<String>,
    version: i64,
}

impl TicketRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            queue_id: row.try_get("queue_id")?,
            contact_id: row.try_get("contact_id")?,
            tenant_id: row.try_get("tenant_id")?,
            session_id: row.try_get("session_id")?,
            status: row.try_get("status")?,
            severity: row.try_get("severity")?,
            assigned_level: row.try_get("assigned_level")?,
            sla_target_at: row.try_get("sla_target_at")?,
            escalated_at: row.try_get("escalated_at")?,
            assignee_id: row.try_get("assignee_id")?,
            triage_context: row.try_get("triage_context")?,
            created_at: row.try_get("created_at")?,
            last_activity_at: row.try_get("last_activity_at")?,
            inactivity_warned_at: row.try_get("inactivity_warned_at")?,
            closed_at: row.try_get("closed_at")?,
            version: row.try_get("version")?,
        })
    }

    fn into_ticket(self) -> Result<Ticket, RepositoryError> {
        let triage_context: BTreeMap<String, String> = serde_json::from_str(&self.triage_context)
            .map_err(|e| RepositoryError::Query(format!("invalid triage context JSON: {e}")))?;
        Ok(Ticket {
            id: parse_uuid(&self.id, "ticket")?,
            queue_id: self.queue_id,
            contact_id: self.contact_id,
            tenant_id: self.tenant_id,
            session_id: self
                .session_id
                .as_deref()
                .map(|s| parse_uuid(s, "session"))
                .transpose()?,
            status: parse_enum(&self.status)?,
            severity: parse_enum(&self.severity)?,
            assigned_level: parse_enum(&self.assigned_level)?,
            sla_target_at: parse_optional_datetime(self.sla_target_at.as_deref())?,
            escalated_at: parse_optional_datetime(self.escalated_at.as_deref())?,
            assignee_id: self.assignee_id,
            triage_context,
            created_at: parse_datetime(&self.created_at)?,
            last_activity_at: parse_datetime(&self.last_activity_at)?,
            inactivity_warned_at: parse_optional_datetime(self.inactivity_warned_at.as_deref())?,
            closed_at: parse_optional_datetime(self.closed_at.as_deref())?,
            version: self.version.max(0) as u64,
        })
    }
}

fn decode_assignment(row: &sqlx::sqlite::SqliteRow) -> Result<AssignmentRecord, RepositoryError> {
    let id: String = row.try_get("id").map_err(db_err)?;
    let ticket_id: String = row.try_get("ticket_id").map_err(db_err)?;
    let strategy: String = row.try_get("strategy").map_err(db_err)?;
    let kind: String = row.try_get("kind").map_err(db_err)?;
    let assignee_load: i64 = row.try_get("assignee_load").map_err(db_err)?;
    let assigned_at: String = row.try_get("assigned_at").map_err(db_err)?;
    Ok(AssignmentRecord {
        id: parse_uuid(&id, "assignment")?,
        ticket_id: parse_uuid(&ticket_id, "ticket")?,
        queue_id: row.try_get("queue_id").map_err(db_err)?,
        assignee_id: row.try_get("assignee_id").map_err(db_err)?,
        previous_assignee_id: row.try_get("previous_assignee_id").map_err(db_err)?,
        strategy: parse_enum(&strategy)?,
        kind: parse_enum(&kind)?,
        reason: row.try_get("reason").map_err(db_err)?,
        assignee_load: assignee_load.clamp(0, i64::from(u32::MAX)) as u32,
        assigned_at: parse_datetime(&assigned_at)?,
    })
}

fn decode_queue(row: &sqlx::sqlite::SqliteRow) -> Result<Queue, RepositoryError> {
    QueueRow::from_row(row).map_err(db_err)?.into_queue()
}

fn decode_ticket(row: &sqlx::sqlite::SqliteRow) -> Result<Ticket, RepositoryError> {
    TicketRow::from_row(row).map_err(db_err)?.into_ticket()
}

fn json<T: serde::Serialize>(value: &T) -> Result<String, RepositoryError> {
    serde_json::to_string(value).map_err(|e| RepositoryError::Query(e.to_string()))
}

/// Bind the mutable ticket columns in [`UPDATE_TICKET`] order.
fn bind_ticket_update<'q>(
    ticket: &'q Ticket,
    context: String,
    expected_version: u64,
) -> sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>> {
    sqlx::query(UPDATE_TICKET)
        .bind(&ticket.queue_id)
        .bind(ticket.status.as_str())
        .bind(ticket.severity.as_str())
        .bind(ticket.assigned_level.as_str())
        .bind(ticket.sla_target_at.as_ref().map(format_datetime))
        .bind(ticket.escalated_at.as_ref().map(format_datetime))
        .bind(&ticket.assignee_id)
        .bind(context)
        .bind(format_datetime(&ticket.last_activity_at))
        .bind(ticket.inactivity_warned_at.as_ref().map(format_datetime))
        .bind(ticket.closed_at.as_ref().map(format_datetime))
        .bind(ticket.version as i64)
        .bind(ticket.id.to_string())
        .bind(expected_version as i64)
}

impl TicketRepository for SqliteTicketRepository {
    async fn save_queue(&self, queue: &Queue) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO queues (id, name, strategy, capacity_per_attendant, members, cursor, version)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT (id) DO UPDATE SET
                name = excluded.name,
                strategy = excluded.strategy,
                capacity_per_attendant = excluded.capacity_per_attendant,
                members = excluded.members,
                cursor = excluded.cursor,
                version = excluded.version",
        )
        .bind(&queue.id)
        .bind(&queue.name)
        .bind(queue.strategy.as_str())
        .bind(queue.capacity_per_attendant.map(i64::from))
        .bind(json(&queue.members)?)
        .bind(queue.cursor as i64)
        .bind(queue.version as i64)
        .execute(&self.pool.writer)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn get_queue(&self, id: &str) -> Result<Option<Queue>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM queues WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(db_err)?;
        row.as_ref().map(decode_queue).transpose()
    }

    async fn list_queues(&self) -> Result<Vec<Queue>, RepositoryError> {
        let rows = sqlx::query("SELECT * FROM queues ORDER BY id")
            .fetch_all(&self.pool.reader)
            .await
            .map_err(db_err)?;
        rows.iter().map(decode_queue).collect()
    }

    async fn create_ticket(&self, ticket: &Ticket) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            "INSERT INTO tickets (id, queue_id, contact_id, tenant_id, session_id, status, severity, assigned_level, sla_target_at, escalated_at, assignee_id, triage_context, created_at, last_activity_at, inactivity_warned_at, closed_at, version)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(ticket.id.to_string())
        .bind(&ticket.queue_id)
        .bind(&ticket.contact_id)
        .bind(&ticket.tenant_id)
        .bind(ticket.session_id.map(|id| id.to_string()))
        .bind(ticket.status.as_str())
        .bind(ticket.severity.as_str())
        .bind(ticket.assigned_level.as_str())
        .bind(ticket.sla_target_at.as_ref().map(format_datetime))
        .bind(ticket.escalated_at.as_ref().map(format_datetime))
        .bind(&ticket.assignee_id)
        .bind(json(&ticket.triage_context)?)
        .bind(format_datetime(&ticket.created_at))
        .bind(format_datetime(&ticket.last_activity_at))
        .bind(ticket.inactivity_warned_at.as_ref().map(format_datetime))
        .bind(ticket.closed_at.as_ref().map(format_datetime))
        .bind(ticket.version as i64)
        .execute(&self.pool.writer)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => {
                Err(RepositoryError::Conflict(format!("ticket {} exists", ticket.id)))
            }
            Err(e) => Err(db_err(e)),
        }
    }

    async fn get_ticket(&self, id: &Uuid) -> Result<Option<Ticket>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM tickets WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(db_err)?;
        row.as_ref().map(decode_ticket).transpose()
    }

    async fn find_open_by_session(&self, session_id: &Uuid) -> Result<Option<Ticket>, RepositoryError> {
        let row = sqlx::query(
            "SELECT * FROM tickets WHERE session_id = ? AND status != 'ENCERRADO' LIMIT 1",
        )
        .bind(session_id.to_string())
        .fetch_optional(&self.pool.reader)
        .await
        .map_err(db_err)?;
        row.as_ref().map(decode_ticket).transpose()
    }

    async fn compare_and_swap_ticket(
        &self,
        ticket: &Ticket,
        expected_version: u64,
    ) -> Result<(), RepositoryError> {
        let result = bind_ticket_update(ticket, json(&ticket.triage_context)?, expected_version)
            .execute(&self.pool.writer)
            .await
            .map_err(db_err)?;
        if result.rows_affected() == 1 {
            return Ok(());
        }

        let exists: Option<(i64,)> = sqlx::query_as("SELECT version FROM tickets WHERE id = ?")
            .bind(ticket.id.to_string())
            .fetch_optional(&self.pool.writer)
            .await
            .map_err(db_err)?;
        match exists {
            Some(_) => Err(RepositoryError::StaleVersion {
                expected: expected_version,
            }),
            None => Err(RepositoryError::NotFound),
        }
    }

    async fn list_open_tickets(&self) -> Result<Vec<Ticket>, RepositoryError> {
        let rows = sqlx::query("SELECT * FROM tickets WHERE status != 'ENCERRADO' ORDER BY created_at, id")
            .fetch_all(&self.pool.reader)
            .await
            .map_err(db_err)?;
        rows.iter().map(decode_ticket).collect()
    }

    async fn list_queued(&self, queue_id: &str) -> Result<Vec<Ticket>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT * FROM tickets WHERE queue_id = ? AND status = 'FILA' ORDER BY created_at, id",
        )
        .bind(queue_id)
        .fetch_all(&self.pool.reader)
        .await
        .map_err(db_err)?;
        rows.iter().map(decode_ticket).collect()
    }

    async fn active_load(&self, queue_id: &str) -> Result<HashMap<String, u32>, RepositoryError> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT assignee_id, COUNT(*) FROM tickets
             WHERE queue_id = ? AND status != 'ENCERRADO' AND assignee_id IS NOT NULL
             GROUP BY assignee_id",
        )
        .bind(queue_id)
        .fetch_all(&self.pool.reader)
        .await
        .map_err(db_err)?;
        Ok(rows
            .into_iter()
            .map(|(assignee, count)| (assignee, count.clamp(0, i64::from(u32::MAX)) as u32))
            .collect())
    }

    async fn commit_assignment(
        &self,
        queue: &Queue,
        expected_queue_version: u64,
        ticket: &Ticket,
        expected_ticket_version: u64,
    ) -> Result<(), RepositoryError> {
        let context = json(&ticket.triage_context)?;
        let mut tx = self.pool.writer.begin().await.map_err(db_err)?;

        let moved = sqlx::query("UPDATE queues SET cursor = ?, version = ? WHERE id = ? AND version = ?")
            .bind(queue.cursor as i64)
            .bind(queue.version as i64)
            .bind(&queue.id)
            .bind(expected_queue_version as i64)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        if moved.rows_affected() != 1 {
            tx.rollback().await.map_err(db_err)?;
            return Err(RepositoryError::StaleVersion {
                expected: expected_queue_version,
            });
        }

        let assigned = bind_ticket_update(ticket, context, expected_ticket_version)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        if assigned.rows_affected() != 1 {
            tx.rollback().await.map_err(db_err)?;
            return Err(RepositoryError::StaleVersion {
                expected: expected_ticket_version,
            });
        }

        tx.commit().await.map_err(db_err)?;
        Ok(())
    }

    async fn append_assignment(&self, record: &AssignmentRecord) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO ticket_assignments (id, ticket_id, queue_id, assignee_id, previous_assignee_id, strategy, kind, reason, assignee_load, assigned_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(record.id.to_string())
        .bind(record.ticket_id.to_string())
        .bind(&record.queue_id)
        .bind(&record.assignee_id)
        .bind(&record.previous_assignee_id)
        .bind(record.strategy.as_str())
        .bind(record.kind.as_str())
        .bind(&record.reason)
        .bind(i64::from(record.assignee_load))
        .bind(format_datetime(&record.assigned_at))
        .execute(&self.pool.writer)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn list_assignments(
        &self,
        ticket_id: &Uuid,
    ) -> Result<Vec<AssignmentRecord>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT * FROM ticket_assignments WHERE ticket_id = ? ORDER BY assigned_at ASC, id ASC",
        )
        .bind(ticket_id.to_string())
        .fetch_all(&self.pool.reader)
        .await
        .map_err(db_err)?;
        rows.iter().map(decode_assignment).collect()
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use switchboard_types::ticket::{
        AssignedLevel, AssignmentKind, DistributionStrategy, Severity, TicketStatus,
    };

    use super::*;
    use crate::sqlite::pool::tests::temp_pool;

    fn queue() -> Queue {
        Queue::new(
            "Q1",
            "Suporte",
            DistributionStrategy::RoundRobin,
            Some(2),
            vec!["A".to_string(), "B".to_string()],
        )
    }

    fn ticket(offset_secs: i64) -> Ticket {
        let now = Utc::now() + Duration::seconds(offset_secs);
        Ticket {
            id: Uuid::now_v7(),
            queue_id: "Q1".to_string(),
            contact_id: "5511".to_string(),
            tenant_id: "t1".to_string(),
            session_id: Some(Uuid::now_v7()),
            status: TicketStatus::Fila,
            severity: Severity::Alta,
            assigned_level: AssignedLevel::N1,
            sla_target_at: Some(now + Duration::hours(4)),
            escalated_at: None,
            assignee_id: None,
            triage_context: BTreeMap::from([("prioridade".to_string(), "alta".to_string())]),
            created_at: now,
            last_activity_at: now,
            inactivity_warned_at: None,
            closed_at: None,
            version: 1,
        }
    }

    async fn repo(dir: &tempfile::TempDir) -> SqliteTicketRepository {
        let repo = SqliteTicketRepository::new(temp_pool(dir).await);
        repo.save_queue(&queue()).await.unwrap();
        repo
    }

    #[tokio::test]
    async fn assignment_log_lists_a_ticket_history_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let repo = repo(&dir).await;
        let t = ticket(0);
        repo.create_ticket(&t).await.unwrap();

        let first = AssignmentRecord {
            id: Uuid::now_v7(),
            ticket_id: t.id,
            queue_id: "Q1".to_string(),
            assignee_id: "A".to_string(),
            previous_assignee_id: None,
            strategy: DistributionStrategy::RoundRobin,
            kind: AssignmentKind::Distribution,
            reason: "route".to_string(),
            assignee_load: 0,
            assigned_at: t.created_at,
        };
        let second = AssignmentRecord {
            id: Uuid::now_v7(),
            assignee_id: "B".to_string(),
            previous_assignee_id: Some("A".to_string()),
            kind: AssignmentKind::Reassignment,
            reason: "ferias".to_string(),
            assignee_load: 1,
            assigned_at: t.created_at + Duration::minutes(5),
            ..first.clone()
        };
        repo.append_assignment(&second).await.unwrap();
        repo.append_assignment(&first).await.unwrap();

        let history = repo.list_assignments(&t.id).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].assignee_id, "A");
        assert_eq!(history[1].kind, AssignmentKind::Reassignment);
        assert_eq!(history[1].previous_assignee_id.as_deref(), Some("A"));
        assert_eq!(history[1].assignee_load, 1);
        assert!(repo.list_assignments(&Uuid::now_v7()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn queue_upsert_replaces_definition() {
        let dir = tempfile::tempdir().unwrap();
        let repo = repo(&dir).await;

        let mut q = queue();
        q.members.push("C".to_string());
        q.strategy = DistributionStrategy::LeastLoad;
        repo.save_queue(&q).await.unwrap();

        let loaded = repo.get_queue("Q1").await.unwrap().unwrap();
        assert_eq!(loaded.members, vec!["A", "B", "C"]);
        assert_eq!(loaded.strategy, DistributionStrategy::LeastLoad);
        assert_eq!(loaded.capacity_per_attendant, Some(2));
        assert_eq!(repo.list_queues().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn ticket_round_trips_and_queues_oldest_first() {
        let dir = tempfile::tempdir().unwrap();
        let repo = repo(&dir).await;
        let newer = ticket(10);
        let older = ticket(0);
        repo.create_ticket(&newer).await.unwrap();
        repo.create_ticket(&older).await.unwrap();

        let loaded = repo.get_ticket(&older.id).await.unwrap().unwrap();
        assert_eq!(loaded.severity, Severity::Alta);
        assert_eq!(loaded.triage_context.get("prioridade").map(String::as_str), Some("alta"));
        assert_eq!(loaded.session_id, older.session_id);

        let queued: Vec<Uuid> = repo.list_queued("Q1").await.unwrap().iter().map(|t| t.id).collect();
        assert_eq!(queued, vec![older.id, newer.id]);
        assert_eq!(
            repo.find_open_by_session(&older.session_id.unwrap()).await.unwrap().unwrap().id,
            older.id
        );

        let dup = repo.create_ticket(&older).await;
        assert!(matches!(dup, Err(RepositoryError::Conflict(_))));
    }

    #[tokio::test]
    async fn commit_assignment_is_all_or_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let repo = repo(&dir).await;
        let t = ticket(0);
        repo.create_ticket(&t).await.unwrap();

        let mut advanced = queue();
        advanced.cursor = 1;
        advanced.version = 2;
        let mut assigned = t.clone();
        assigned.status = TicketStatus::EmAtendimento;
        assigned.assignee_id = Some("A".to_string());
        assigned.version = 2;

        let err = repo.commit_assignment(&advanced, 1, &assigned, 9).await.unwrap_err();
        assert!(matches!(err, RepositoryError::StaleVersion { expected: 9 }));
        assert_eq!(repo.get_queue("Q1").await.unwrap().unwrap().cursor, 0);

        repo.commit_assignment(&advanced, 1, &assigned, 1).await.unwrap();
        assert_eq!(repo.get_queue("Q1").await.unwrap().unwrap().version, 2);
        assert_eq!(repo.active_load("Q1").await.unwrap().get("A"), Some(&1));
        assert!(repo.list_queued("Q1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn closed_tickets_leave_load_and_open_list() {
        let dir = tempfile::tempdir().unwrap();
        let repo = repo(&dir).await;
        let mut t = ticket(0);
        t.status = TicketStatus::EmAtendimento;
        t.assignee_id = Some("B".to_string());
        repo.create_ticket(&t).await.unwrap();
        assert_eq!(repo.list_open_tickets().await.unwrap().len(), 1);

        let mut closed = t.clone();
        closed.status = TicketStatus::Encerrado;
        closed.closed_at = Some(Utc::now());
        closed.version = 2;
        repo.compare_and_swap_ticket(&closed, 1).await.unwrap();

        assert!(repo.active_load("Q1").await.unwrap().is_empty());
        assert!(repo.list_open_tickets().await.unwrap().is_empty());
        let stale = repo.compare_and_swap_ticket(&closed, 1).await;
        assert!(matches!(stale, Err(RepositoryError::StaleVersion { .. })));
    }
}
