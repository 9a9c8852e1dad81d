//! Agent registry row (spec.md §3 "Agent").

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum AgentStatus {
    Online,
    Offline,
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentStatus::Online => write!(f, "online"),
            AgentStatus::Offline => write!(f, "offline"),
        }
    }
}

impl std::str::FromStr for AgentStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "online" => Ok(AgentStatus::Online),
            "offline" => Ok(AgentStatus::Offline),
            other => Err(format!("unknown agent status: {other}")),
        }
    }
}

impl TryFrom<String> for AgentStatus {
    type Error = String;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Agent {
    pub agent_id: String,
    pub platform: String,
    pub region: Option<String>,
    pub cluster_id: Option<String>,
    pub max_cpu: String,
    pub max_memory: String,
    pub max_sessions: i64,
    #[sqlx(try_from = "String")]
    pub status: AgentStatus,
    /// JSON-encoded free-form registration metadata.
    pub metadata: String,
    pub last_heartbeat_at: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct AgentRegistration {
    pub agent_id: String,
    pub platform: String,
    pub region: Option<String>,
    pub cluster_id: Option<String>,
    pub max_cpu: String,
    pub max_memory: String,
    pub max_sessions: i64,
    pub metadata: std::collections::HashMap<String, String>,
}
