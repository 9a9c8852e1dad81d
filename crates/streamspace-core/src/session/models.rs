//! Session data model (spec.md §3).

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Runtime lifecycle state. Transitions are restricted to the graph in
/// spec.md §4.6; validity is enforced by [`super::engine::SessionEngine`],
/// not by this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum SessionState {
    Pending,
    Starting,
    Running,
    Hibernating,
    Hibernated,
    Waking,
    Terminating,
    Terminated,
    Failed,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SessionState::Pending => "pending",
            SessionState::Starting => "starting",
            SessionState::Running => "running",
            SessionState::Hibernating => "hibernating",
            SessionState::Hibernated => "hibernated",
            SessionState::Waking => "waking",
            SessionState::Terminating => "terminating",
            SessionState::Terminated => "terminated",
            SessionState::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for SessionState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(SessionState::Pending),
            "starting" => Ok(SessionState::Starting),
            "running" => Ok(SessionState::Running),
            "hibernating" => Ok(SessionState::Hibernating),
            "hibernated" => Ok(SessionState::Hibernated),
            "waking" => Ok(SessionState::Waking),
            "terminating" => Ok(SessionState::Terminating),
            "terminated" => Ok(SessionState::Terminated),
            "failed" => Ok(SessionState::Failed),
            other => Err(format!("unknown session state: {other}")),
        }
    }
}

impl SessionState {
    /// Invariant 1 (spec.md §8): these states require a routed agent.
    pub fn requires_agent(self) -> bool {
        matches!(
            self,
            SessionState::Starting
                | SessionState::Running
                | SessionState::Hibernating
                | SessionState::Hibernated
                | SessionState::Waking
                | SessionState::Terminating
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Terminated | SessionState::Failed)
    }

    /// States where recovery after a control-plane restart may need to
    /// re-dispatch or reconcile (spec.md §4.6 "Recovery").
    pub fn is_transitional(self) -> bool {
        matches!(
            self,
            SessionState::Starting
                | SessionState::Hibernating
                | SessionState::Waking
                | SessionState::Terminating
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Session {
    pub id: String,
    pub user_id: String,
    pub template_name: String,
    pub platform: String,
    pub agent_id: Option<String>,
    pub cluster_id: Option<String>,
    pub memory: String,
    pub cpu: String,
    pub persistent_home: bool,
    pub idle_timeout: Option<i64>,
    pub max_session_duration: Option<i64>,
    #[sqlx(try_from = "String")]
    #[serde(default)]
    pub tags: Tags,
    #[sqlx(try_from = "String")]
    pub state: SessionState,
    pub url: Option<String>,
    pub pod_name: Option<String>,
    pub container_id: Option<String>,
    pub error_message: Option<String>,
    pub last_activity: String,
    pub created_at: String,
    pub updated_at: String,
}

/// An ordered tag list with set semantics on comparison (spec.md §3 and
/// the "tags" supplement in SPEC_FULL.md §4): two sessions carrying the
/// same tags in different order must compare equal.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Tags(pub Vec<String>);

impl PartialEq for Tags {
    fn eq(&self, other: &Self) -> bool {
        let a: HashSet<&str> = self.0.iter().map(String::as_str).collect();
        let b: HashSet<&str> = other.0.iter().map(String::as_str).collect();
        a == b
    }
}
impl Eq for Tags {}

impl TryFrom<String> for Tags {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        serde_json::from_str(&value).map(Tags).map_err(|e| e.to_string())
    }
}

impl Tags {
    pub fn to_json(&self) -> String {
        serde_json::to_string(&self.0).unwrap_or_else(|_| "[]".to_string())
    }
}

impl TryFrom<String> for SessionState {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Caller-supplied parameters for a new session (spec.md §3 Attributes).
#[derive(Debug, Clone, Deserialize)]
pub struct CreateSessionRequest {
    pub user_id: String,
    pub template_name: String,
    pub platform: String,
    pub memory: String,
    pub cpu: String,
    #[serde(default)]
    pub persistent_home: bool,
    #[serde(default)]
    pub idle_timeout: Option<i64>,
    #[serde(default)]
    pub max_session_duration: Option<i64>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub cluster_id: Option<String>,
    /// Opaque host-driver spec, passed through unmodified to the agent.
    pub template_manifest: serde_json::Value,
}

/// Generates `{user}-{template}-{8 hex}` per spec.md §3.
pub fn generate_session_id(user_id: &str, template_name: &str) -> String {
    let suffix: String = {
        use rand::Rng;
        let mut rng = rand::rng();
        (0..8)
            .map(|_| std::char::from_digit(rng.random_range(0..16), 16).unwrap())
            .collect()
    };
    format!("{user_id}-{template_name}-{suffix}")
}

impl Session {
    pub fn is_active(&self) -> bool {
        !self.state.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_compare_as_sets() {
        let a = Tags(vec!["b".into(), "a".into()]);
        let b = Tags(vec!["a".into(), "b".into()]);
        assert_eq!(a, b);
    }

    #[test]
    fn generated_session_id_has_expected_shape() {
        let id = generate_session_id("alice", "firefox");
        let parts: Vec<&str> = id.rsplitn(2, '-').collect();
        assert_eq!(parts[0].len(), 8);
        assert!(id.starts_with("alice-firefox-"));
    }

    #[test]
    fn state_round_trips_through_display_and_parse() {
        for s in [
            SessionState::Pending,
            SessionState::Running,
            SessionState::Hibernated,
            SessionState::Failed,
        ] {
            let parsed: SessionState = s.to_string().parse().unwrap();
            assert_eq!(parsed, s);
        }
    }
}
