//! Minimal session CRUD surface standing in for the external caller
//! boundary (SPEC_FULL.md §2): the authenticated-user / quota / template-
//! catalog machinery in front of this is explicitly out of scope
//! (spec.md §1), so these handlers accept an already-validated request
//! body and drive the Session State Engine directly.

use axum::extract::{Path, State};
use axum::Json;
use streamspace_core::session::models::{CreateSessionRequest, Session};
use tracing::info;

use crate::error::ApiResult;
use crate::state::AppState;

pub async fn create_session(
    State(state): State<AppState>,
    Json(req): Json<CreateSessionRequest>,
) -> ApiResult<Json<Session>> {
    let (session, command) = state.engine.create_session(req, state.hub.as_ref()).await?;
    state.dispatcher.notify(command);
    info!(session_id = %session.id, agent_id = ?session.agent_id, "session created");
    Ok(Json(session))
}

pub async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<Session>> {
    let session = state.engine.sessions().require(&session_id).await?;
    Ok(Json(session))
}

pub async fn list_sessions_for_user(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> ApiResult<Json<Vec<Session>>> {
    let sessions = state.engine.sessions().list_by_user(&user_id).await?;
    Ok(Json(sessions))
}

pub async fn hibernate_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<Session>> {
    let command = state.engine.request_hibernate(&session_id).await?;
    state.dispatcher.notify(command);
    let session = state.engine.sessions().require(&session_id).await?;
    Ok(Json(session))
}

pub async fn wake_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<Session>> {
    let command = state.engine.request_wake(&session_id).await?;
    state.dispatcher.notify(command);
    let session = state.engine.sessions().require(&session_id).await?;
    Ok(Json(session))
}

pub async fn terminate_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<Session>> {
    let command = state.engine.request_terminate(&session_id).await?;
    state.dispatcher.notify(command);
    let session = state.engine.sessions().require(&session_id).await?;
    Ok(Json(session))
}
