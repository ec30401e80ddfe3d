//! Session and triage log handlers.

use axum::Json;
use axum::extract::{Path, Query, State};
use serde::Deserialize;
use uuid::Uuid;

use switchboard_types::audit::TriageLogEntry;
use switchboard_types::session::Session;

use crate::http::error::AppError;
use crate::http::response::{ApiResponse, RequestClock};
use crate::state::AppState;

const DEFAULT_LOG_LIMIT: u32 = 50;
const MAX_LOG_LIMIT: u32 = 500;

#[derive(Debug, Default, Deserialize)]
pub struct LogQuery {
    pub limit: Option<u32>,
}

fn parse_session_id(raw: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(raw)
        .map_err(|_| AppError::Validation(format!("'{raw}' is not a valid session id")))
}

/// GET /api/v1/sessions/{id}
pub async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<Session>>, AppError> {
    let clock = RequestClock::start();
    let id = parse_session_id(&id)?;
    let session = state
        .sessions
        .get(&id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("session {id} not found")))?;
    Ok(Json(
        clock
            .respond(session)
            .with_link("log", format!("/api/v1/sessions/{id}/log")),
    ))
}

/// GET /api/v1/sessions/{id}/log - The session's path, oldest first.
pub async fn session_log(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<Vec<TriageLogEntry>>>, AppError> {
    let clock = RequestClock::start();
    let id = parse_session_id(&id)?;
    let entries = state.logger.session_log(&id).await?;
    Ok(Json(clock.respond(entries)))
}

/// GET /api/v1/tenants/{tenant}/log?limit=N - Latest entries, newest first.
pub async fn tenant_log(
    State(state): State<AppState>,
    Path(tenant): Path<String>,
    Query(query): Query<LogQuery>,
) -> Result<Json<ApiResponse<Vec<TriageLogEntry>>>, AppError> {
    let clock = RequestClock::start();
    let limit = query.limit.unwrap_or(DEFAULT_LOG_LIMIT).clamp(1, MAX_LOG_LIMIT);
    let entries = state.logger.tenant_log(&tenant, limit).await?;
    Ok(Json(clock.respond(entries)))
}
