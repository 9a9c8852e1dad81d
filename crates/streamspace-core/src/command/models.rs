//! `AgentCommand`: the durable queue element and audit record (spec.md §3).

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use streamspace_protocol::actions::Action;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum CommandStatus {
    Pending,
    Sent,
    Acknowledged,
    Completed,
    Failed,
}

impl std::fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CommandStatus::Pending => "pending",
            CommandStatus::Sent => "sent",
            CommandStatus::Acknowledged => "acknowledged",
            CommandStatus::Completed => "completed",
            CommandStatus::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for CommandStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(CommandStatus::Pending),
            "sent" => Ok(CommandStatus::Sent),
            "acknowledged" => Ok(CommandStatus::Acknowledged),
            "completed" => Ok(CommandStatus::Completed),
            "failed" => Ok(CommandStatus::Failed),
            other => Err(format!("unknown command status: {other}")),
        }
    }
}

impl TryFrom<String> for CommandStatus {
    type Error = String;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl CommandStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, CommandStatus::Completed | CommandStatus::Failed)
    }

    /// Whether `self -> next` is a legal monotonic step (spec.md §3
    /// invariants: `pending -> sent -> acknowledged -> (completed|failed)`,
    /// plus `pending -> failed` on dispatch-time failure).
    pub fn can_advance_to(self, next: CommandStatus) -> bool {
        use CommandStatus::*;
        matches!(
            (self, next),
            (Pending, Sent)
                | (Pending, Failed)
                | (Sent, Acknowledged)
                | (Sent, Failed)
                | (Acknowledged, Completed)
                | (Acknowledged, Failed)
        )
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct AgentCommand {
    pub command_id: String,
    pub agent_id: String,
    pub session_id: String,
    pub action: String,
    /// Serialized `streamspace_protocol::actions::Action` (SPEC_FULL.md §4
    /// supplement: the row carries the real action, not an opaque blob,
    /// so recovery can replay it without re-deriving from the session).
    pub payload: String,
    #[sqlx(try_from = "String")]
    pub status: CommandStatus,
    pub error_message: Option<String>,
    pub created_at: String,
    pub sent_at: Option<String>,
    pub acknowledged_at: Option<String>,
    pub completed_at: Option<String>,
}

impl AgentCommand {
    pub fn new(agent_id: String, action: Action) -> Self {
        let now = chrono::Utc::now().to_rfc3339();
        Self {
            command_id: format!("cmd-{}", Uuid::new_v4()),
            agent_id,
            session_id: action.session_id().to_string(),
            action: action.name().to_string(),
            payload: serde_json::to_string(&action).expect("action is always serializable"),
            status: CommandStatus::Pending,
            error_message: None,
            created_at: now,
            sent_at: None,
            acknowledged_at: None,
            completed_at: None,
        }
    }

    pub fn decode_action(&self) -> serde_json::Result<Action> {
        serde_json::from_str(&self.payload)
    }
}
