//! Ticket handlers: lookup, SLA position and lifecycle updates.

use axum::Json;
use axum::extract::{Path, Query, State};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use switchboard_core::routing::sla::{SlaReport, sla_report};
use switchboard_types::ticket::{AssignmentRecord, Ticket, TicketStatus};

use crate::http::error::AppError;
use crate::http::response::{ApiResponse, RequestClock};
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct TicketListQuery {
    pub queue: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CloseRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StatusRequest {
    pub status: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReassignRequest {
    pub attendant_id: String,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TicketSla {
    pub ticket_id: Uuid,
    /// `None` when the ticket carries no SLA target.
    pub sla: Option<SlaReport>,
}

fn parse_ticket_id(raw: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(raw).map_err(|_| AppError::Validation(format!("'{raw}' is not a valid ticket id")))
}

fn ticket_links(resp: ApiResponse<Ticket>) -> ApiResponse<Ticket> {
    let id = resp.data.id;
    resp.with_link("self", format!("/api/v1/tickets/{id}"))
        .with_link("sla", format!("/api/v1/tickets/{id}/sla"))
        .with_link("assignments", format!("/api/v1/tickets/{id}/assignments"))
}

/// GET /api/v1/tickets - Open tickets, optionally of one queue.
pub async fn list_tickets(
    State(state): State<AppState>,
    Query(query): Query<TicketListQuery>,
) -> Result<Json<ApiResponse<Vec<Ticket>>>, AppError> {
    let clock = RequestClock::start();
    let mut tickets = state.router.list_open_tickets().await?;
    if let Some(queue) = query.queue.as_deref() {
        tickets.retain(|t| t.queue_id == queue);
    }
    Ok(Json(clock.respond(tickets)))
}

/// GET /api/v1/tickets/{id}
pub async fn get_ticket(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<Ticket>>, AppError> {
    let clock = RequestClock::start();
    let id = parse_ticket_id(&id)?;
    let ticket = state
        .router
        .get_ticket(&id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("ticket {id} not found")))?;
    Ok(Json(ticket_links(clock.respond(ticket))))
}

/// GET /api/v1/tickets/{id}/sla - Classification at request time.
pub async fn get_sla(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<TicketSla>>, AppError> {
    let clock = RequestClock::start();
    let id = parse_ticket_id(&id)?;
    let ticket = state
        .router
        .get_ticket(&id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("ticket {id} not found")))?;
    let sla = sla_report(
        &ticket,
        Utc::now(),
        state.router.sla_config().at_risk_percent,
    );
    Ok(Json(clock.respond(TicketSla { ticket_id: id, sla })))
}

/// POST /api/v1/tickets/{id}/close
pub async fn close_ticket(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<CloseRequest>,
) -> Result<Json<ApiResponse<Ticket>>, AppError> {
    let clock = RequestClock::start();
    let id = parse_ticket_id(&id)?;
    let reason = body.reason.as_deref().unwrap_or("manual");
    let ticket = state.router.close_ticket(id, reason, Utc::now()).await?;
    Ok(Json(ticket_links(clock.respond(ticket))))
}

/// POST /api/v1/tickets/{id}/status - Move along the ticket lifecycle.
pub async fn update_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<StatusRequest>,
) -> Result<Json<ApiResponse<Ticket>>, AppError> {
    let clock = RequestClock::start();
    let id = parse_ticket_id(&id)?;
    let status = body
        .status
        .trim()
        .to_ascii_uppercase()
        .parse::<TicketStatus>()
        .map_err(AppError::Validation)?;
    let ticket = state.router.update_status(id, status, Utc::now()).await?;
    Ok(Json(ticket_links(clock.respond(ticket))))
}

/// POST /api/v1/tickets/{id}/reassign - Hand the ticket to another member
/// of its queue.
pub async fn reassign(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<ReassignRequest>,
) -> Result<Json<ApiResponse<Ticket>>, AppError> {
    let clock = RequestClock::start();
    let id = parse_ticket_id(&id)?;
    let attendant = body.attendant_id.trim();
    if attendant.is_empty() {
        return Err(AppError::Validation("attendantId must not be empty".to_string()));
    }
    let reason = body.reason.as_deref().unwrap_or("manual");
    let ticket = state.router.reassign(id, attendant, reason, Utc::now()).await?;
    Ok(Json(ticket_links(clock.respond(ticket))))
}

/// GET /api/v1/tickets/{id}/assignments - Distribution log, oldest first.
pub async fn list_assignments(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<Vec<AssignmentRecord>>>, AppError> {
    let clock = RequestClock::start();
    let id = parse_ticket_id(&id)?;
    if state.router.get_ticket(&id).await?.is_none() {
        return Err(AppError::NotFound(format!("ticket {id} not found")));
    }
    let history = state.router.assignment_history(&id).await?;
    Ok(Json(clock.respond(history)))
}

/// POST /api/v1/tickets/{id}/activity - Record attendant or contact
/// activity, resetting the inactivity clock.
pub async fn touch(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<Ticket>>, AppError> {
    let clock = RequestClock::start();
    let id = parse_ticket_id(&id)?;
    let ticket = state.router.touch(id, Utc::now()).await?;
    Ok(Json(ticket_links(clock.respond(ticket))))
}
