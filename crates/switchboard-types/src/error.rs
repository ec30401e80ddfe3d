use thiserror::Error;
use uuid::Uuid;

/// Errors from repository operations (used by trait definitions in switchboard-core).
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database connection error")]
    Connection,

    #[error("query error: {0}")]
    Query(String),

    #[error("entity not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),

    /// Compare-and-swap lost: the stored record moved past the expected version.
    #[error("stale version: expected {expected}")]
    StaleVersion { expected: u64 },
}

impl RepositoryError {
    /// Whether retrying the same operation after a re-read may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Connection | Self::StaleVersion { .. })
    }
}

/// Errors related to flow definitions (parsing, validation, lookup).
#[derive(Debug, Error)]
pub enum FlowError {
    #[error("flow parse error: {0}")]
    Parse(String),

    #[error("flow validation error: {0}")]
    Validation(String),

    #[error("step '{step}' references unknown step '{target}'")]
    DanglingReference { step: String, target: String },

    #[error("flow '{0}' not found")]
    UnknownFlow(String),

    #[error("step '{step}' not found in flow '{flow_id}' v{version}")]
    UnknownStep {
        flow_id: String,
        version: u32,
        step: String,
    },

    #[error("flow '{flow_id}' version {version} already published")]
    VersionConflict { flow_id: String, version: u32 },

    #[error("unsupported step type '{0}'")]
    UnsupportedStepKind(String),

    #[error("unsupported option action '{0}'")]
    UnsupportedAction(String),

    #[error("storage error: {0}")]
    Storage(String),
}

/// Errors related to queues, tickets and assignment.
#[derive(Debug, Error)]
pub enum RoutingError {
    #[error("queue '{0}' not found")]
    QueueNotFound(String),

    #[error("ticket {0} not found")]
    TicketNotFound(Uuid),

    #[error("ticket {0} is closed")]
    TicketClosed(Uuid),

    #[error("invalid ticket transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("invalid queue: {0}")]
    InvalidQueue(String),

    #[error("'{attendant}' is not a member of queue '{queue_id}'")]
    NotAMember { queue_id: String, attendant: String },

    #[error("'{attendant}' has no free capacity in queue '{queue_id}'")]
    AttendantAtCapacity { queue_id: String, attendant: String },

    #[error("gave up after {attempts} conflicting writes")]
    ConflictRetriesExhausted { attempts: u32 },

    #[error("storage error: {0}")]
    Storage(String),
}

/// Errors raised by outbound channel senders.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("delivery failed: {0}")]
    Delivery(String),

    #[error("channel rejected message with status {status}")]
    Rejected { status: u16 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repository_error_display() {
        let err = RepositoryError::Query("syntax error".to_string());
        assert_eq!(err.to_string(), "query error: syntax error");
    }

    #[test]
    fn test_repository_error_transient() {
        assert!(RepositoryError::Connection.is_transient());
        assert!(RepositoryError::StaleVersion { expected: 3 }.is_transient());
        assert!(!RepositoryError::NotFound.is_transient());
        assert!(!RepositoryError::Conflict("dup".into()).is_transient());
    }

    #[test]
    fn test_flow_error_display() {
        let err = FlowError::DanglingReference {
            step: "boas-vindas".to_string(),
            target: "nowhere".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "step 'boas-vindas' references unknown step 'nowhere'"
        );
    }

    #[test]
    fn test_routing_error_display() {
        let err = RoutingError::InvalidTransition {
            from: "ENCERRADO".to_string(),
            to: "FILA".to_string(),
        };
        assert!(err.to_string().contains("ENCERRADO"));
        assert!(err.to_string().contains("FILA"));
    }
}
