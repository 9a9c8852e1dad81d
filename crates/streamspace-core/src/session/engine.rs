//! The Session State Engine (spec.md §4.6): owns the session record and
//! its transitions, composes command payloads, and recovers in-flight
//! state after a crash.
//!
//! The engine never talks to the Hub or the Dispatcher directly — it
//! only ever writes `sessions` and `agent_commands` rows. Dispatch is a
//! separate concern (`streamspace-hub`) that drains `agent_commands`
//! rows the engine leaves behind; this is the "database as durable
//! queue" design from spec.md §9.

use chrono::Utc;
use streamspace_protocol::actions::{
    Action, GetSessionStatusAction, HibernateSessionAction, StartSessionAction, StopSessionAction,
    WakeSessionAction, WorkloadInfo,
};

use crate::agent::repository::AgentRepository;
use crate::command::models::AgentCommand;
use crate::command::repository::CommandRepository;
use crate::error::{CoreError, CoreResult};
use crate::selector::{AgentSelector, ConnectionObserver, SelectionCriteria};
use crate::session::models::{generate_session_id, CreateSessionRequest, Session, SessionState, Tags};
use crate::session::repository::SessionRepository;

pub struct SessionEngine {
    sessions: SessionRepository,
    commands: CommandRepository,
    agents: AgentRepository,
}

/// Outcome of a command reply, as reported by `command_response` /
/// `command_error` frames (spec.md §6.1) and consumed by
/// [`SessionEngine::apply_command_result`].
#[derive(Debug, Clone)]
pub struct CommandOutcome {
    pub command_id: String,
    pub success: bool,
    pub error: Option<String>,
    pub workload: WorkloadInfo,
}

fn now() -> String {
    Utc::now().to_rfc3339()
}

impl SessionEngine {
    pub fn new(sessions: SessionRepository, commands: CommandRepository, agents: AgentRepository) -> Self {
        Self {
            sessions,
            commands,
            agents,
        }
    }

    pub fn sessions(&self) -> &SessionRepository {
        &self.sessions
    }

    pub fn commands(&self) -> &CommandRepository {
        &self.commands
    }

    /// `create` (spec.md §4.6 rules): requires an available agent. On
    /// agent-unavailable the session is NOT created and the caller sees
    /// [`CoreError::NoAgentsAvailable`] (service-unavailable equivalent).
    pub async fn create_session(
        &self,
        req: CreateSessionRequest,
        observer: &dyn ConnectionObserver,
    ) -> CoreResult<(Session, AgentCommand)> {
        let criteria = SelectionCriteria {
            platform: req.platform.clone(),
            region: req.region.clone(),
            cluster_id: req.cluster_id.clone(),
            prefer_low_load: true,
            require_connected: true,
        };
        let selector = AgentSelector::new(&self.agents, &self.sessions);
        let agent_id = selector.select(&criteria, observer).await?;

        let session_id = generate_session_id(&req.user_id, &req.template_name);
        let ts = now();

        let session = Session {
            id: session_id.clone(),
            user_id: req.user_id.clone(),
            template_name: req.template_name.clone(),
            platform: req.platform.clone(),
            agent_id: Some(agent_id.clone()),
            cluster_id: req.cluster_id.clone(),
            memory: req.memory.clone(),
            cpu: req.cpu.clone(),
            persistent_home: req.persistent_home,
            idle_timeout: req.idle_timeout,
            max_session_duration: req.max_session_duration,
            tags: Tags(req.tags.clone()),
            state: SessionState::Starting,
            url: None,
            pod_name: None,
            container_id: None,
            error_message: None,
            last_activity: ts.clone(),
            created_at: ts.clone(),
            updated_at: ts,
        };
        self.sessions.insert(&session).await?;

        let action = Action::StartSession(StartSessionAction {
            session_id: session_id.clone(),
            user: req.user_id,
            template: req.template_name,
            template_manifest: req.template_manifest,
            memory: req.memory,
            cpu: req.cpu,
            persistent_home: req.persistent_home,
            idle_timeout: req.idle_timeout.map(|v| v as u64),
            max_session_duration: req.max_session_duration.map(|v| v as u64),
            tags: req.tags,
        });
        let command = AgentCommand::new(agent_id, action);
        self.commands.insert(&command).await?;

        Ok((session, command))
    }

    /// Hibernate from anything but `running` is forbidden (spec.md §4.6).
    pub async fn request_hibernate(&self, session_id: &str) -> CoreResult<AgentCommand> {
        self.request_transition(
            session_id,
            SessionState::Running,
            SessionState::Hibernating,
            |id| Action::HibernateSession(HibernateSessionAction { session_id: id }),
        )
        .await
    }

    /// Wake from anything but `hibernated` is forbidden.
    pub async fn request_wake(&self, session_id: &str) -> CoreResult<AgentCommand> {
        self.request_transition(
            session_id,
            SessionState::Hibernated,
            SessionState::Waking,
            |id| Action::WakeSession(WakeSessionAction { session_id: id }),
        )
        .await
    }

    /// Delete from `pending` without an agent is forbidden; any other
    /// active state may terminate.
    pub async fn request_terminate(&self, session_id: &str) -> CoreResult<AgentCommand> {
        let session = self.sessions.require(session_id).await?;
        if session.state == SessionState::Pending {
            return Err(CoreError::StateConflict(
                session.state.to_string(),
                SessionState::Terminating.to_string(),
            ));
        }
        if session.state.is_terminal() {
            return Err(CoreError::StateConflict(
                session.state.to_string(),
                SessionState::Terminating.to_string(),
            ));
        }
        let agent_id = session
            .agent_id
            .clone()
            .ok_or_else(|| CoreError::StateConflict(session.state.to_string(), "terminating".into()))?;

        self.transition_session(&session, SessionState::Terminating).await?;

        let action = Action::StopSession(StopSessionAction {
            session_id: session_id.to_string(),
        });
        let command = AgentCommand::new(agent_id, action);
        self.commands.insert(&command).await?;
        Ok(command)
    }

    async fn request_transition(
        &self,
        session_id: &str,
        required_from: SessionState,
        transitional: SessionState,
        make_action: impl FnOnce(String) -> Action,
    ) -> CoreResult<AgentCommand> {
        let session = self.sessions.require(session_id).await?;
        if session.state != required_from {
            return Err(CoreError::StateConflict(
                session.state.to_string(),
                transitional.to_string(),
            ));
        }
        let agent_id = session
            .agent_id
            .clone()
            .ok_or_else(|| CoreError::StateConflict(session.state.to_string(), transitional.to_string()))?;

        self.transition_session(&session, transitional).await?;

        let action = make_action(session_id.to_string());
        let command = AgentCommand::new(agent_id, action);
        self.commands.insert(&command).await?;
        Ok(command)
    }

    /// Marks the session with its new transitional state before the
    /// command row is written, so a crash/recovery sees the session
    /// "owning" an in-flight command (spec.md §4.6).
    async fn transition_session(&self, session: &Session, new_state: SessionState) -> CoreResult<()> {
        let mut updated = session.clone();
        updated.state = new_state;
        updated.updated_at = now();
        self.sessions.update(&updated).await
    }

    /// Applies a `command_response` / `command_error` reply (spec.md
    /// §4.6 "On command reply"). Tolerates a duplicate terminal status
    /// (§4.5 "At-least-once").
    pub async fn apply_command_result(&self, outcome: CommandOutcome) -> CoreResult<()> {
        let command = self.commands.require(&outcome.command_id).await?;
        if command.status.is_terminal() {
            return Ok(());
        }

        self.commands.mark_acknowledged(&command.command_id).await.ok();

        let mut session = self.sessions.require(&command.session_id).await?;

        if outcome.success {
            self.commands.mark_completed(&command.command_id).await?;
            match command.action.as_str() {
                "start_session" => {
                    session.state = SessionState::Running;
                    session.url = outcome.workload.url;
                    session.pod_name = outcome.workload.pod_name;
                    session.container_id = outcome.workload.container_id;
                }
                "stop_session" => {
                    session.state = SessionState::Terminated;
                }
                "hibernate_session" => {
                    session.state = SessionState::Hibernated;
                    session.url = None;
                }
                "wake_session" => {
                    session.state = SessionState::Running;
                    if outcome.workload.url.is_some() {
                        session.url = outcome.workload.url;
                    }
                }
                "get_session_status" => {
                    // Reconciliation reply; adopt reported fields without
                    // forcing a state change unless one was reported.
                    if outcome.workload.url.is_some() {
                        session.url = outcome.workload.url;
                    }
                }
                _ => {}
            }
        } else {
            self.commands
                .mark_failed(&command.command_id, outcome.error.as_deref().unwrap_or("unknown error"))
                .await?;
            if command.action == "start_session" {
                session.state = SessionState::Failed;
            }
            session.error_message = outcome.error;
        }

        session.last_activity = now();
        session.updated_at = now();
        self.sessions.update(&session).await
    }

    /// Recovery after control-plane restart or leader gain (spec.md
    /// §4.6). Sessions in a transitional state with an open command are
    /// left for the Dispatcher's own recovery scan; sessions with none
    /// are the "corruption / impossible state" case from spec.md §7 and
    /// are either reconciled via `get_session_status` (if an agent is
    /// known) or marked `failed`.
    pub async fn recover(&self, grace_seconds: i64) -> CoreResult<Vec<AgentCommand>> {
        let stale = self.sessions.list_stale_transitional(grace_seconds).await?;
        let mut issued = Vec::new();

        for session in stale {
            if self
                .commands
                .latest_open_for_session(&session.id)
                .await?
                .is_some()
            {
                continue;
            }

            match session.agent_id.clone() {
                Some(agent_id) => {
                    let action = Action::GetSessionStatus(GetSessionStatusAction {
                        session_id: session.id.clone(),
                    });
                    let command = AgentCommand::new(agent_id, action);
                    self.commands.insert(&command).await?;
                    issued.push(command);
                }
                None => {
                    let mut failed = session.clone();
                    failed.state = SessionState::Failed;
                    failed.error_message =
                        Some("transitional session has no agent and no recoverable command".into());
                    failed.updated_at = now();
                    self.sessions.update(&failed).await?;
                }
            }
        }

        Ok(issued)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::models::AgentRegistration;
    use crate::db::Database;
    use crate::selector::AlwaysConnected;
    use std::collections::HashMap;

    async fn engine_with_agent(agent_id: &str, platform: &str) -> SessionEngine {
        let db = Database::in_memory().await.unwrap();
        let agents = AgentRepository::new(db.pool().clone());
        agents
            .upsert(&AgentRegistration {
                agent_id: agent_id.to_string(),
                platform: platform.to_string(),
                region: None,
                cluster_id: None,
                max_cpu: "4000m".into(),
                max_memory: "8Gi".into(),
                max_sessions: 10,
                metadata: HashMap::new(),
            })
            .await
            .unwrap();
        agents.mark_online(agent_id).await.unwrap();

        SessionEngine::new(
            SessionRepository::new(db.pool().clone()),
            CommandRepository::new(db.pool().clone()),
            agents,
        )
    }

    fn sample_request() -> CreateSessionRequest {
        CreateSessionRequest {
            user_id: "alice".into(),
            template_name: "firefox".into(),
            platform: "docker".into(),
            memory: "2Gi".into(),
            cpu: "1000m".into(),
            persistent_home: true,
            idle_timeout: Some(1800),
            max_session_duration: None,
            tags: vec!["browser".into()],
            region: None,
            cluster_id: None,
            template_manifest: serde_json::json!({"image": "streamspace/firefox:latest"}),
        }
    }

    #[tokio::test]
    async fn happy_path_create_starts_session_and_commands_agent() {
        let engine = engine_with_agent("docker-prod-1", "docker").await;
        let (session, command) = engine
            .create_session(sample_request(), &AlwaysConnected)
            .await
            .unwrap();

        assert_eq!(session.state, SessionState::Starting);
        assert_eq!(session.agent_id.as_deref(), Some("docker-prod-1"));
        assert_eq!(command.action, "start_session");
        assert_eq!(command.agent_id, "docker-prod-1");
    }

    #[tokio::test]
    async fn agent_absent_at_create_does_not_persist_session() {
        let db = Database::in_memory().await.unwrap();
        let engine = SessionEngine::new(
            SessionRepository::new(db.pool().clone()),
            CommandRepository::new(db.pool().clone()),
            AgentRepository::new(db.pool().clone()),
        );

        let err = engine
            .create_session(sample_request(), &AlwaysConnected)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::NoAgentsAvailable));
        assert!(engine.sessions().list_by_user("alice").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn start_session_success_marks_running_with_url() {
        let engine = engine_with_agent("docker-prod-1", "docker").await;
        let (session, command) = engine
            .create_session(sample_request(), &AlwaysConnected)
            .await
            .unwrap();

        engine
            .apply_command_result(CommandOutcome {
                command_id: command.command_id.clone(),
                success: true,
                error: None,
                workload: WorkloadInfo {
                    url: Some("https://alice-firefox.streamspace.internal".into()),
                    workload_id: Some("wl-1".into()),
                    ..Default::default()
                },
            })
            .await
            .unwrap();

        let updated = engine.sessions().require(&session.id).await.unwrap();
        assert_eq!(updated.state, SessionState::Running);
        assert_eq!(
            updated.url.as_deref(),
            Some("https://alice-firefox.streamspace.internal")
        );

        let cmd = engine.commands().require(&command.command_id).await.unwrap();
        assert_eq!(cmd.status.to_string(), "completed");
    }

    #[tokio::test]
    async fn hibernate_then_wake_returns_to_running() {
        let engine = engine_with_agent("docker-prod-1", "docker").await;
        let (session, start_cmd) = engine
            .create_session(sample_request(), &AlwaysConnected)
            .await
            .unwrap();
        engine
            .apply_command_result(CommandOutcome {
                command_id: start_cmd.command_id,
                success: true,
                error: None,
                workload: WorkloadInfo {
                    url: Some("https://first.example".into()),
                    ..Default::default()
                },
            })
            .await
            .unwrap();

        let hibernate_cmd = engine.request_hibernate(&session.id).await.unwrap();
        let mid = engine.sessions().require(&session.id).await.unwrap();
        assert_eq!(mid.state, SessionState::Hibernating);

        engine
            .apply_command_result(CommandOutcome {
                command_id: hibernate_cmd.command_id,
                success: true,
                error: None,
                workload: WorkloadInfo::default(),
            })
            .await
            .unwrap();
        let hibernated = engine.sessions().require(&session.id).await.unwrap();
        assert_eq!(hibernated.state, SessionState::Hibernated);
        assert!(hibernated.url.is_none());

        let wake_cmd = engine.request_wake(&session.id).await.unwrap();
        engine
            .apply_command_result(CommandOutcome {
                command_id: wake_cmd.command_id,
                success: true,
                error: None,
                workload: WorkloadInfo {
                    url: Some("https://second.example".into()),
                    ..Default::default()
                },
            })
            .await
            .unwrap();

        let woken = engine.sessions().require(&session.id).await.unwrap();
        assert_eq!(woken.state, SessionState::Running);
        assert_eq!(woken.url.as_deref(), Some("https://second.example"));
    }

    #[tokio::test]
    async fn wake_from_non_hibernated_is_a_state_conflict() {
        let engine = engine_with_agent("docker-prod-1", "docker").await;
        let (session, _) = engine
            .create_session(sample_request(), &AlwaysConnected)
            .await
            .unwrap();

        let err = engine.request_wake(&session.id).await.unwrap_err();
        assert!(matches!(err, CoreError::StateConflict(_, _)));
    }

    #[tokio::test]
    async fn recover_reconciles_transitional_session_with_no_open_command() {
        let engine = engine_with_agent("docker-prod-1", "docker").await;
        let (session, start_cmd) = engine
            .create_session(sample_request(), &AlwaysConnected)
            .await
            .unwrap();
        // Simulate the command completing but the session update being
        // lost (crash between the two writes is not otherwise possible
        // through this API, so we force it directly for the test).
        engine.commands().mark_completed(&start_cmd.command_id).await.unwrap();
        let mut stuck = engine.sessions().require(&session.id).await.unwrap();
        stuck.updated_at = "2000-01-01T00:00:00Z".to_string();
        engine.sessions().update(&stuck).await.unwrap();

        let issued = engine.recover(600).await.unwrap();
        assert_eq!(issued.len(), 1);
        assert_eq!(issued[0].action, "get_session_status");
    }
}
