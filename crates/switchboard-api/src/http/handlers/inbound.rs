//! Channel webhook and health handlers.

use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;

use switchboard_core::triage::Reply;
use switchboard_infra::webhook::{SIGNATURE_HEADER, verify_signature};
use switchboard_types::message::InboundMessage;

use crate::http::error::AppError;
use crate::http::response::{ApiResponse, RequestClock};
use crate::state::AppState;

/// GET /api/v1/health - Liveness plus the sizes of in-memory indexes.
pub async fn health(State(state): State<AppState>) -> Json<ApiResponse<serde_json::Value>> {
    let clock = RequestClock::start();
    let (sessions, tickets, slas) = state.deadlines.counts();
    let body = serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "backend": state.backend,
        "transport": state.sender.transport(),
        "mailboxes": state.dispatcher.active_mailboxes(),
        "event_subscribers": state.events.subscriber_count(),
        "tracked": { "sessions": sessions, "tickets": tickets, "sla": slas },
    });
    Json(clock.respond(body))
}

/// POST /api/v1/inbound - Feed one channel message to the triage engine.
///
/// When `channel.inbound_secret` is configured the raw body must carry a
/// valid `X-Signature-256`. The response carries the texts sent to the
/// contact and the outcome; 503 means the adapter may redeliver.
pub async fn receive(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<ApiResponse<Reply>>, AppError> {
    let clock = RequestClock::start();

    if let Some(secret) = state.config.channel.inbound_secret.as_deref() {
        let header = headers
            .get(SIGNATURE_HEADER)
            .and_then(|value| value.to_str().ok());
        verify_signature(secret.as_bytes(), &body, header)
            .map_err(|e| AppError::Unauthorized(e.to_string()))?;
    }

    let message: InboundMessage = serde_json::from_slice(&body)
        .map_err(|e| AppError::Validation(format!("invalid inbound message: {e}")))?;
    if message.contact_id.trim().is_empty() {
        return Err(AppError::Validation("contactId must not be empty".to_string()));
    }

    tracing::debug!(
        request_id = clock.request_id(),
        contact_id = %message.contact_id,
        channel = %message.channel,
        "inbound message"
    );

    let reply = state.dispatcher.dispatch(message).await?;
    let mut resp = clock.respond(reply);
    if let Some(session_id) = resp.data.session_id {
        resp = resp.with_link("session", format!("/api/v1/sessions/{session_id}"));
    }
    Ok(Json(resp))
}
