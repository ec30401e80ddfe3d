//! SQLite storage layer.
//!
//! Repository implementations backed by SQLite with WAL mode and split
//! read/write connection pools.

pub mod flow;
pub mod pool;
pub mod session;
pub mod ticket;
pub mod triage_log;

use chrono::{DateTime, SecondsFormat, Utc};
use switchboard_types::error::RepositoryError;

pub use flow::SqliteFlowRepository;
pub use pool::DatabasePool;
pub use session::SqliteSessionRepository;
pub use ticket::SqliteTicketRepository;
pub use triage_log::SqliteTriageLogRepository;

/// Map a sqlx error onto the repository taxonomy. Lock contention and pool
/// exhaustion are transient; everything else is a query error.
pub(crate) fn db_err(e: sqlx::Error) -> RepositoryError {
    match e {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            RepositoryError::Connection
        }
        sqlx::Error::Database(ref db) if db.message().contains("database is locked") => {
            RepositoryError::Connection
        }
        other => RepositoryError::Query(other.to_string()),
    }
}

/// Whether `e` is a UNIQUE or PRIMARY KEY violation.
pub(crate) fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.message().contains("UNIQUE"))
}

pub(crate) fn parse_datetime(s: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Query(format!("invalid datetime: {e}")))
}

pub(crate) fn parse_optional_datetime(
    s: Option<&str>,
) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    s.map(parse_datetime).transpose()
}

/// Fixed-width RFC 3339 so stored timestamps sort lexically.
pub(crate) fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_uuid(s: &str, what: &str) -> Result<uuid::Uuid, RepositoryError> {
    s.parse()
        .map_err(|e| RepositoryError::Query(format!("invalid {what} id: {e}")))
}

pub(crate) fn parse_enum<T>(s: &str) -> Result<T, RepositoryError>
where
    T: std::str::FromStr<Err = String>,
{
    s.parse().map_err(RepositoryError::Query)
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn datetimes_round_trip_at_fixed_width() {
        let a = Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap();
        let b = a + chrono::Duration::milliseconds(1500);
        let (fa, fb) = (format_datetime(&a), format_datetime(&b));
        assert_eq!(fa.len(), fb.len());
        assert!(fa < fb);
        assert_eq!(parse_datetime(&fb).unwrap(), b);
    }
}
