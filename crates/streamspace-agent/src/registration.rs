//! Registration handshake: `POST /api/agents/register` before streaming.

use std::collections::HashMap;

use streamspace_protocol::{AgentCapacity, RegisterAgentRequest, RegisterAgentResponse};
use tracing::info;

use crate::config::AgentConfig;
use crate::error::{AgentError, AgentResult};

pub async fn register(client: &reqwest::Client, config: &AgentConfig) -> AgentResult<RegisterAgentResponse> {
    let url = format!("{}/api/agents/register", config.control_plane_url.trim_end_matches('/'));

    let req = RegisterAgentRequest {
        agent_id: config.agent_id.clone(),
        platform: config.platform.as_str().to_string(),
        region: config.region.clone(),
        cluster_id: config.cluster_id.clone(),
        capacity: AgentCapacity {
            max_cpu: config.max_cpu.clone(),
            max_memory: config.max_memory.clone(),
            max_sessions: config.max_sessions,
        },
        metadata: HashMap::new(),
    };

    let mut builder = client.post(&url).json(&req);
    if let Some(key) = &config.api_key {
        builder = builder.bearer_auth(key);
    }

    let resp = builder.send().await?;
    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        return Err(AgentError::RegistrationFailed(format!("{status}: {body}")));
    }

    let parsed: RegisterAgentResponse = resp.json().await?;
    info!(agent_id = %parsed.agent_id, status = %parsed.status, "registered with control plane");
    Ok(parsed)
}
