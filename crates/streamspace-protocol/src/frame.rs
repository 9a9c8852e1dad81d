//! Frames exchanged on the agent <-> control plane bidirectional channel.
//!
//! Each frame is a self-describing JSON document tagged by `type`. The
//! control plane only ever writes `ControlFrame`s and reads `AgentFrame`s;
//! the agent is the mirror image. Keeping the two directions as distinct
//! enums makes it a compile error to send a frame on the wrong side of the
//! connection.

use serde::{Deserialize, Serialize};

use crate::actions::{Action, WorkloadInfo};

/// Maximum size of a single inbound frame, per the read pump's frame-size
/// guard. A frame larger than this terminates the connection.
pub const MAX_FRAME_BYTES: usize = 512 * 1024;

/// Control plane -> Agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlFrame {
    Command(CommandFrame),
    Ping,
    Shutdown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandFrame {
    pub command_id: String,
    #[serde(flatten)]
    pub action: Action,
}

/// Agent -> Control plane.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentFrame {
    Heartbeat(HeartbeatFrame),
    Pong(IdentityFrame),
    ShutdownAck(IdentityFrame),
    CommandResponse(CommandResponseFrame),
    CommandError(CommandErrorFrame),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityFrame {
    pub agent_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatFrame {
    pub agent_id: String,
    pub timestamp: i64,
    pub status: AgentHealthStatus,
    pub active_sessions: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentHealthStatus {
    Online,
    Degraded,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResponseFrame {
    pub command_id: String,
    pub session_id: String,
    pub success: bool,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, flatten)]
    pub workload: WorkloadInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandErrorFrame {
    pub command_id: String,
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::StopSessionAction;

    #[test]
    fn command_frame_serializes_tag_and_action() {
        let frame = ControlFrame::Command(CommandFrame {
            command_id: "cmd-1".into(),
            action: Action::StopSession(StopSessionAction {
                session_id: "s-1".into(),
            }),
        });
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "command");
        assert_eq!(json["commandId"], "cmd-1");
        assert_eq!(json["action"], "stop_session");
        assert_eq!(json["sessionId"], "s-1");
    }

    #[test]
    fn ping_and_shutdown_have_no_payload() {
        assert_eq!(
            serde_json::to_value(&ControlFrame::Ping).unwrap(),
            serde_json::json!({"type": "ping"})
        );
        assert_eq!(
            serde_json::to_value(&ControlFrame::Shutdown).unwrap(),
            serde_json::json!({"type": "shutdown"})
        );
    }

    #[test]
    fn command_response_roundtrip() {
        let frame = AgentFrame::CommandResponse(CommandResponseFrame {
            command_id: "cmd-1".into(),
            session_id: "s-1".into(),
            success: true,
            status: "completed".into(),
            error: None,
            workload: WorkloadInfo {
                url: Some("https://s-1.streamspace.internal".into()),
                ..Default::default()
            },
        });
        let json = serde_json::to_string(&frame).unwrap();
        let parsed: AgentFrame = serde_json::from_str(&json).unwrap();
        match parsed {
            AgentFrame::CommandResponse(r) => {
                assert!(r.success);
                assert_eq!(r.workload.url.as_deref(), Some("https://s-1.streamspace.internal"));
            }
            _ => panic!("wrong variant"),
        }
    }
}
