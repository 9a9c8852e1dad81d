//! Action payloads carried inside a `command` frame.
//!
//! Mirrors the action catalog in the control plane / agent wire contract:
//! each action names the fields a handler needs to drive the host driver.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// An action a command may carry, tagged by `action` on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    StartSession(StartSessionAction),
    StopSession(StopSessionAction),
    HibernateSession(HibernateSessionAction),
    WakeSession(WakeSessionAction),
    GetSessionStatus(GetSessionStatusAction),
}

impl Action {
    /// The session this action targets.
    pub fn session_id(&self) -> &str {
        match self {
            Action::StartSession(a) => &a.session_id,
            Action::StopSession(a) => &a.session_id,
            Action::HibernateSession(a) => &a.session_id,
            Action::WakeSession(a) => &a.session_id,
            Action::GetSessionStatus(a) => &a.session_id,
        }
    }

    /// The action's name, as it appears in `agent_commands.action`.
    pub fn name(&self) -> &'static str {
        match self {
            Action::StartSession(_) => "start_session",
            Action::StopSession(_) => "stop_session",
            Action::HibernateSession(_) => "hibernate_session",
            Action::WakeSession(_) => "wake_session",
            Action::GetSessionStatus(_) => "get_session_status",
        }
    }
}

/// Opaque host-driver workload spec: image, resources, mounts, network name.
/// The control plane treats this as opaque and passes it through unmodified;
/// only the host driver interprets its contents.
pub type TemplateManifest = serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartSessionAction {
    pub session_id: String,
    pub user: String,
    pub template: String,
    pub template_manifest: TemplateManifest,
    pub memory: String,
    pub cpu: String,
    pub persistent_home: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idle_timeout: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_session_duration: Option<u64>,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopSessionAction {
    pub session_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HibernateSessionAction {
    pub session_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WakeSessionAction {
    pub session_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetSessionStatusAction {
    pub session_id: String,
}

/// Workload details reported back by a successful `start_session` /
/// `wake_session` / `get_session_status` response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workload_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_id: Option<String>,
    #[serde(default)]
    pub extra: HashMap<String, serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_session_roundtrip() {
        let action = Action::StartSession(StartSessionAction {
            session_id: "alice-firefox-deadbeef".into(),
            user: "alice".into(),
            template: "firefox".into(),
            template_manifest: serde_json::json!({"image": "streamspace/firefox:latest"}),
            memory: "2Gi".into(),
            cpu: "1000m".into(),
            persistent_home: true,
            idle_timeout: Some(1800),
            max_session_duration: None,
            tags: vec!["browser".into()],
        });

        let json = serde_json::to_value(&action).unwrap();
        assert_eq!(json["action"], "start_session");
        assert_eq!(json["sessionId"], "alice-firefox-deadbeef");
        assert_eq!(json["templateManifest"]["image"], "streamspace/firefox:latest");

        let parsed: Action = serde_json::from_value(json).unwrap();
        assert_eq!(parsed.session_id(), "alice-firefox-deadbeef");
        assert_eq!(parsed.name(), "start_session");
    }

    #[test]
    fn stop_session_minimal_payload() {
        let json = serde_json::json!({"action": "stop_session", "sessionId": "s-1"});
        let parsed: Action = serde_json::from_value(json).unwrap();
        assert_eq!(parsed.name(), "stop_session");
        assert_eq!(parsed.session_id(), "s-1");
    }
}
