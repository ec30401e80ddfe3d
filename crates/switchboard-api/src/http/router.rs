//! Axum router configuration with middleware.
//!
//! All routes are under `/api/v1/`.
//! Middleware: CORS, tracing.

use axum::Router;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::http::handlers;
use crate::state::AppState;

/// Build the complete API router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        .route("/health", get(handlers::inbound::health))
        // Channel webhook
        .route("/inbound", post(handlers::inbound::receive))
        // Flows
        .route("/flows", get(handlers::flow::list_flows))
        .route("/flows/{id}", get(handlers::flow::get_latest))
        .route(
            "/flows/{id}/versions",
            get(handlers::flow::list_versions).post(handlers::flow::publish),
        )
        .route(
            "/flows/{id}/versions/{version}",
            get(handlers::flow::get_version),
        )
        // Queues
        .route(
            "/queues",
            get(handlers::queue::list_queues).post(handlers::queue::create_queue),
        )
        .route("/queues/{id}", get(handlers::queue::get_queue))
        .route(
            "/queues/{id}/redistribute",
            post(handlers::queue::redistribute),
        )
        // Tickets
        .route("/tickets", get(handlers::ticket::list_tickets))
        .route("/tickets/{id}", get(handlers::ticket::get_ticket))
        .route("/tickets/{id}/sla", get(handlers::ticket::get_sla))
        .route("/tickets/{id}/close", post(handlers::ticket::close_ticket))
        .route("/tickets/{id}/status", post(handlers::ticket::update_status))
        .route("/tickets/{id}/activity", post(handlers::ticket::touch))
        .route("/tickets/{id}/reassign", post(handlers::ticket::reassign))
        .route(
            "/tickets/{id}/assignments",
            get(handlers::ticket::list_assignments),
        )
        // Sessions and the triage log
        .route("/sessions/{id}", get(handlers::session::get_session))
        .route("/sessions/{id}/log", get(handlers::session::session_log))
        .route("/tenants/{tenant}/log", get(handlers::session::tenant_log));

    Router::new()
        .nest("/api/v1", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
