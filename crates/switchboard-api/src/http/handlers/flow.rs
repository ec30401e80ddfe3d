//! Flow definition handlers.

use axum::Json;
use axum::extract::{Path, State};
use serde::Serialize;

use switchboard_types::flow::FlowDefinition;

use crate::http::error::AppError;
use crate::http::response::{ApiResponse, RequestClock};
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct FlowSummary {
    pub id: String,
    pub versions: Vec<u32>,
    pub is_default: bool,
}

/// GET /api/v1/flows - Every flow id with its published versions.
pub async fn list_flows(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Vec<FlowSummary>>>, AppError> {
    let clock = RequestClock::start();
    let default_flow = state.flows.default_flow_id();

    let mut flows = Vec::new();
    for id in state.flows.list_flows().await? {
        let versions = state.flows.list_versions(&id).await?;
        flows.push(FlowSummary {
            is_default: default_flow == Some(id.as_str()),
            id,
            versions,
        });
    }

    Ok(Json(clock.respond(flows).with_link("self", "/api/v1/flows")))
}

/// POST /api/v1/flows/{id}/versions - Publish a JSON or YAML document as
/// the next version.
pub async fn publish(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: String,
) -> Result<Json<ApiResponse<FlowDefinition>>, AppError> {
    let clock = RequestClock::start();
    if id.trim().is_empty() {
        return Err(AppError::Validation("flow id must not be empty".to_string()));
    }

    let flow = state.flows.publish_document(&id, &body).await?;
    let href = format!("/api/v1/flows/{id}/versions/{}", flow.version);
    Ok(Json(
        clock
            .respond(flow.as_ref().clone())
            .with_link("self", href),
    ))
}

/// GET /api/v1/flows/{id} - Latest version.
pub async fn get_latest(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<FlowDefinition>>, AppError> {
    let clock = RequestClock::start();
    let flow = state
        .flows
        .get_latest(&id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("flow '{id}' not found")))?;
    Ok(Json(
        clock
            .respond(flow.as_ref().clone())
            .with_link("versions", format!("/api/v1/flows/{id}/versions")),
    ))
}

/// GET /api/v1/flows/{id}/versions - Published version numbers, ascending.
pub async fn list_versions(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<Vec<u32>>>, AppError> {
    let clock = RequestClock::start();
    let versions = state.flows.list_versions(&id).await?;
    if versions.is_empty() {
        return Err(AppError::NotFound(format!("flow '{id}' not found")));
    }
    Ok(Json(clock.respond(versions)))
}

/// GET /api/v1/flows/{id}/versions/{version} - One immutable version.
pub async fn get_version(
    State(state): State<AppState>,
    Path((id, version)): Path<(String, u32)>,
) -> Result<Json<ApiResponse<FlowDefinition>>, AppError> {
    let clock = RequestClock::start();
    let flow = state
        .flows
        .get_version(&id, version)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("flow '{id}' has no version {version}")))?;
    Ok(Json(clock.respond(flow.as_ref().clone())))
}
