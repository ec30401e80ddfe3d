//! Application error type mapping to HTTP status codes and envelope format.

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use serde_json::json;

use switchboard_core::runtime::DispatchError;
use switchboard_core::triage::EngineError;
use switchboard_types::error::{FlowError, RepositoryError, RoutingError};

/// Application-level error that maps to HTTP responses.
#[derive(Debug)]
pub enum AppError {
    /// Flow definition errors.
    Flow(FlowError),
    /// Queue and ticket errors.
    Routing(RoutingError),
    /// Triage engine errors.
    Engine(EngineError),
    /// Inbound dispatch errors.
    Dispatch(DispatchError),
    /// Raw store errors (log queries).
    Repository(RepositoryError),
    /// Bad or missing webhook signature.
    Unauthorized(String),
    /// Validation error.
    Validation(String),
    /// Resource not found.
    NotFound(String),
}

impl From<FlowError> for AppError {
    fn from(e: FlowError) -> Self {
        AppError::Flow(e)
    }
}

impl From<RoutingError> for AppError {
    fn from(e: RoutingError) -> Self {
        AppError::Routing(e)
    }
}

impl From<EngineError> for AppError {
    fn from(e: EngineError) -> Self {
        AppError::Engine(e)
    }
}

impl From<DispatchError> for AppError {
    fn from(e: DispatchError) -> Self {
        AppError::Dispatch(e)
    }
}

impl From<RepositoryError> for AppError {
    fn from(e: RepositoryError) -> Self {
        AppError::Repository(e)
    }
}

fn flow_parts(e: &FlowError) -> (StatusCode, &'static str) {
    match e {
        FlowError::UnknownFlow(_) => (StatusCode::NOT_FOUND, "FLOW_NOT_FOUND"),
        FlowError::VersionConflict { .. } => (StatusCode::CONFLICT, "VERSION_CONFLICT"),
        FlowError::Storage(_) => (StatusCode::INTERNAL_SERVER_ERROR, "FLOW_ERROR"),
        FlowError::Parse(_)
        | FlowError::Validation(_)
        | FlowError::DanglingReference { .. }
        | FlowError::UnknownStep { .. }
        | FlowError::UnsupportedStepKind(_)
        | FlowError::UnsupportedAction(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
    }
}

fn routing_parts(e: &RoutingError) -> (StatusCode, &'static str) {
    match e {
        RoutingError::QueueNotFound(_) => (StatusCode::NOT_FOUND, "QUEUE_NOT_FOUND"),
        RoutingError::TicketNotFound(_) => (StatusCode::NOT_FOUND, "TICKET_NOT_FOUND"),
        RoutingError::TicketClosed(_) => (StatusCode::CONFLICT, "TICKET_CLOSED"),
        RoutingError::InvalidTransition { .. } => (StatusCode::CONFLICT, "INVALID_TRANSITION"),
        RoutingError::InvalidQueue(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
        RoutingError::NotAMember { .. } => (StatusCode::BAD_REQUEST, "NOT_A_MEMBER"),
        RoutingError::AttendantAtCapacity { .. } => (StatusCode::CONFLICT, "AT_CAPACITY"),
        RoutingError::ConflictRetriesExhausted { .. } => {
            (StatusCode::SERVICE_UNAVAILABLE, "UNAVAILABLE")
        }
        RoutingError::Storage(_) => (StatusCode::INTERNAL_SERVER_ERROR, "ROUTING_ERROR"),
    }
}

fn engine_parts(e: &EngineError) -> (StatusCode, &'static str) {
    match e {
        EngineError::Flow(inner) => flow_parts(inner),
        EngineError::Routing(inner) => routing_parts(inner),
        EngineError::SessionNotFound(_) => (StatusCode::NOT_FOUND, "SESSION_NOT_FOUND"),
        EngineError::SessionClosed(_) => (StatusCode::CONFLICT, "SESSION_CLOSED"),
        e if e.is_recoverable() => (StatusCode::SERVICE_UNAVAILABLE, "UNAVAILABLE"),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, "ENGINE_ERROR"),
    }
}

impl AppError {
    /// Status and machine-readable code for this error.
    pub fn parts(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::Flow(e) => flow_parts(e),
            AppError::Routing(e) => routing_parts(e),
            AppError::Engine(e) => engine_parts(e),
            AppError::Dispatch(DispatchError::Engine(e)) => engine_parts(e),
            AppError::Dispatch(_) => (StatusCode::SERVICE_UNAVAILABLE, "UNAVAILABLE"),
            AppError::Repository(e) if e.is_transient() => {
                (StatusCode::SERVICE_UNAVAILABLE, "UNAVAILABLE")
            }
            AppError::Repository(RepositoryError::NotFound) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            AppError::Repository(_) => (StatusCode::INTERNAL_SERVER_ERROR, "STORAGE_ERROR"),
            AppError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
            AppError::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
        }
    }

    fn message(&self) -> String {
        match self {
            AppError::Flow(e) => e.to_string(),
            AppError::Routing(e) => e.to_string(),
            AppError::Engine(e) => e.to_string(),
            AppError::Dispatch(e) => e.to_string(),
            AppError::Repository(e) => e.to_string(),
            AppError::Unauthorized(msg) | AppError::Validation(msg) | AppError::NotFound(msg) => {
                msg.clone()
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.parts();
        let message = self.message();

        if status.is_server_error() {
            tracing::warn!(%status, code, error = %message, "request failed");
        }

        let body = json!({
            "data": null,
            "meta": {
                "request_id": "",
                "timestamp": chrono::Utc::now().to_rfc3339(),
                "response_time_ms": 0
            },
            "errors": [{
                "code": code,
                "message": message,
            }]
        });

        let mut response = (
            status,
            [(header::CONTENT_TYPE, "application/json")],
            body.to_string(),
        )
            .into_response();
        // Channel adapters redeliver on 503.
        if status == StatusCode::SERVICE_UNAVAILABLE {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from_static("1"));
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;

    #[test]
    fn routing_errors_map_to_client_statuses() {
        let id = Uuid::now_v7();
        assert_eq!(
            AppError::from(RoutingError::TicketNotFound(id)).parts(),
            (StatusCode::NOT_FOUND, "TICKET_NOT_FOUND")
        );
        assert_eq!(
            AppError::from(RoutingError::TicketClosed(id)).parts().0,
            StatusCode::CONFLICT
        );
        assert_eq!(
            AppError::from(RoutingError::InvalidTransition {
                from: "FILA".into(),
                to: "ENVIO_ATIVO".into(),
            })
            .parts()
            .1,
            "INVALID_TRANSITION"
        );
    }

    #[test]
    fn recoverable_failures_are_service_unavailable() {
        let err = AppError::from(EngineError::ConflictRetriesExhausted { attempts: 5 });
        assert_eq!(err.parts().0, StatusCode::SERVICE_UNAVAILABLE);

        let err = AppError::from(DispatchError::MailboxFull {
            contact_id: "c1".into(),
        });
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.headers()[header::RETRY_AFTER], "1");

        let err = AppError::from(RepositoryError::Connection);
        assert_eq!(err.parts().0, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn engine_wraps_keep_inner_mapping() {
        let err = AppError::from(EngineError::Flow(FlowError::UnknownFlow("x".into())));
        assert_eq!(err.parts(), (StatusCode::NOT_FOUND, "FLOW_NOT_FOUND"));

        let err = AppError::from(DispatchError::Engine(EngineError::Storage("disk".into())));
        assert_eq!(err.parts().0, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn parse_failures_are_bad_requests() {
        let err = AppError::from(FlowError::Parse("expected value".into()));
        assert_eq!(err.parts(), (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"));
        let err = AppError::from(FlowError::VersionConflict {
            flow_id: "f".into(),
            version: 2,
        });
        assert_eq!(err.parts().0, StatusCode::CONFLICT);
    }
}
