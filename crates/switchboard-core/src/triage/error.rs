use switchboard_types::error::{FlowError, RepositoryError, RoutingError};
use thiserror::Error;
use uuid::Uuid;

/// Errors surfaced by the triage engine to the inbound handler.
///
/// [`EngineError::is_recoverable`] marks failures after which the channel
/// adapter may safely redeliver the same message.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Flow(#[from] FlowError),

    #[error(transparent)]
    Routing(#[from] RoutingError),

    #[error("session {0} not found")]
    SessionNotFound(Uuid),

    #[error("session {0} is closed")]
    SessionClosed(Uuid),

    #[error("gave up after {attempts} conflicting session writes")]
    ConflictRetriesExhausted { attempts: u32 },

    /// A transient store failure outlived the retry budget.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl EngineError {
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::ConflictRetriesExhausted { .. }
                | Self::Unavailable(_)
                | Self::Routing(RoutingError::ConflictRetriesExhausted { .. })
        )
    }
}

impl From<RepositoryError> for EngineError {
    fn from(e: RepositoryError) -> Self {
        if e.is_transient() {
            EngineError::Unavailable(e.to_string())
        } else {
            EngineError::Storage(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exhausted_retries_are_recoverable() {
        assert!(EngineError::ConflictRetriesExhausted { attempts: 5 }.is_recoverable());
        assert!(
            EngineError::Routing(RoutingError::ConflictRetriesExhausted { attempts: 2 })
                .is_recoverable()
        );
        assert!(EngineError::from(RepositoryError::Connection).is_recoverable());
        assert!(!EngineError::from(RepositoryError::Query("bad".into())).is_recoverable());
    }
}
