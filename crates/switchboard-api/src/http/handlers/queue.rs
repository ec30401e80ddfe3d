//! Queue handlers.

use axum::Json;
use axum::extract::{Path, State};
use serde::Deserialize;

use switchboard_types::ticket::{DistributionStrategy, Queue, Ticket};

use crate::http::error::AppError;
use crate::http::response::{ApiResponse, RequestClock};
use crate::state::AppState;

/// Body of `POST /queues`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateQueueRequest {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub strategy: Option<String>,
    #[serde(default)]
    pub capacity_per_attendant: Option<u32>,
    #[serde(default)]
    pub members: Vec<String>,
}

/// POST /api/v1/queues - Create a queue.
pub async fn create_queue(
    State(state): State<AppState>,
    Json(body): Json<CreateQueueRequest>,
) -> Result<Json<ApiResponse<Queue>>, AppError> {
    let clock = RequestClock::start();

    let strategy = match body.strategy.as_deref() {
        Some(s) => s.parse::<DistributionStrategy>().map_err(AppError::Validation)?,
        None => DistributionStrategy::RoundRobin,
    };
    let name = body.name.unwrap_or_else(|| body.id.clone());
    let queue = Queue::new(
        &body.id,
        &name,
        strategy,
        body.capacity_per_attendant,
        body.members,
    );

    let queue = state.router.create_queue(queue).await?;
    let href = format!("/api/v1/queues/{}", queue.id);
    Ok(Json(clock.respond(queue).with_link("self", href)))
}

/// GET /api/v1/queues - All queues.
pub async fn list_queues(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Vec<Queue>>>, AppError> {
    let clock = RequestClock::start();
    let queues = state.router.list_queues().await?;
    Ok(Json(clock.respond(queues).with_link("self", "/api/v1/queues")))
}

/// GET /api/v1/queues/{id}
pub async fn get_queue(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<Queue>>, AppError> {
    let clock = RequestClock::start();
    let queue = state
        .router
        .get_queue(&id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("queue '{id}' not found")))?;
    Ok(Json(clock.respond(queue).with_link(
        "tickets",
        format!("/api/v1/tickets?queue={id}"),
    )))
}

/// POST /api/v1/queues/{id}/redistribute - Assign waiting tickets oldest
/// first while attendants have room. Returns the tickets assigned.
pub async fn redistribute(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<Vec<Ticket>>>, AppError> {
    let clock = RequestClock::start();
    let assigned = state.router.redistribute(&id).await?;
    tracing::info!(queue_id = %id, assigned = assigned.len(), "queue redistributed");
    Ok(Json(clock.respond(assigned)))
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use axum::response::IntoResponse;

    use super::*;
    use crate::http::handlers::test_support;

    fn request(id: &str, strategy: Option<&str>, members: &[&str]) -> CreateQueueRequest {
        CreateQueueRequest {
            id: id.to_string(),
            name: None,
            strategy: strategy.map(str::to_string),
            capacity_per_attendant: Some(2),
            members: members.iter().map(|m| m.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn created_queue_is_listed_and_fetched() {
        let state = test_support::state();
        let Json(created) = create_queue(
            State(state.clone()),
            Json(request("suporte", Some("least_load"), &["ana", "bia"])),
        )
        .await
        .unwrap();
        assert_eq!(created.data.strategy, DistributionStrategy::LeastLoad);
        assert_eq!(created.data.name, "suporte");

        let Json(all) = list_queues(State(state.clone())).await.unwrap();
        assert_eq!(all.data.len(), 1);

        let Json(one) = get_queue(State(state), Path("suporte".to_string()))
            .await
            .unwrap();
        assert_eq!(one.data.members, vec!["ana", "bia"]);
    }

    #[tokio::test]
    async fn unknown_strategy_is_a_validation_error() {
        let state = test_support::state();
        let err = create_queue(State(state), Json(request("q", Some("lottery"), &["ana"])))
            .await
            .unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn redistributing_unknown_queue_is_not_found() {
        let state = test_support::state();
        let err = redistribute(State(state), Path("nope".to_string()))
            .await
            .unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::NOT_FOUND);
    }
}
