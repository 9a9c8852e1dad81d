//! Route table for the control plane's HTTP surface (SPEC_FULL.md §2):
//! agent registration, the agent streaming endpoint, and the minimal
//! session CRUD surface standing in for the external caller boundary.

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::Level;

use crate::handlers::{agents, sessions, stream};
use crate::state::AppState;

pub fn create_router(state: AppState) -> Router {
    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_request(DefaultOnRequest::new().level(Level::INFO))
        .on_response(DefaultOnResponse::new().level(Level::INFO));

    let agent_routes = Router::new()
        .route("/api/agents/register", post(agents::register))
        .route("/api/agents/stream", get(stream::stream_handler));

    let session_routes = Router::new()
        .route("/api/sessions", post(sessions::create_session))
        .route("/api/sessions/{session_id}", get(sessions::get_session))
        .route(
            "/api/sessions/{session_id}/hibernate",
            post(sessions::hibernate_session),
        )
        .route(
            "/api/sessions/{session_id}/wake",
            post(sessions::wake_session),
        )
        .route(
            "/api/sessions/{session_id}",
            axum::routing::delete(sessions::terminate_session),
        )
        .route(
            "/api/users/{user_id}/sessions",
            get(sessions::list_sessions_for_user),
        );

    Router::new()
        .merge(agent_routes)
        .merge(session_routes)
        .route("/healthz", get(health))
        .layer(trace_layer)
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}
