//! Agent registration endpoint contract (control plane HTTP boundary).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentCapacity {
    pub max_cpu: String,
    pub max_memory: String,
    pub max_sessions: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterAgentRequest {
    pub agent_id: String,
    pub platform: String,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub cluster_id: Option<String>,
    pub capacity: AgentCapacity,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterAgentResponse {
    pub id: String,
    pub agent_id: String,
    pub platform: String,
    pub status: String,
    pub created_at: String,
}
