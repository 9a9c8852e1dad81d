//! `POST /api/agents/register` (spec.md §6.2): the one-shot handshake an
//! agent replica completes before opening its streaming connection.

use axum::extract::State;
use axum::Json;
use streamspace_core::agent::models::AgentRegistration;
use streamspace_protocol::{RegisterAgentRequest, RegisterAgentResponse};
use tracing::info;

use crate::error::ApiResult;
use crate::state::AppState;

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterAgentRequest>,
) -> ApiResult<Json<RegisterAgentResponse>> {
    let registration = AgentRegistration {
        agent_id: req.agent_id,
        platform: req.platform,
        region: req.region,
        cluster_id: req.cluster_id,
        max_cpu: req.capacity.max_cpu,
        max_memory: req.capacity.max_memory,
        max_sessions: req.capacity.max_sessions as i64,
        metadata: req.metadata,
    };

    let agent = state.agents.upsert(&registration).await?;
    info!(agent_id = %agent.agent_id, platform = %agent.platform, "agent registered");

    Ok(Json(RegisterAgentResponse {
        id: agent.agent_id.clone(),
        agent_id: agent.agent_id,
        platform: agent.platform,
        status: agent.status.to_string(),
        created_at: agent.created_at,
    }))
}
