//! Workspace-level end-to-end scenarios: these exercise the Session State
//! Engine, the Command Queue & Dispatcher, and the Agent Hub together
//! rather than in isolation, and stand in for the six scenarios each
//! component's own unit tests already cover individually at finer grain.

use std::collections::HashMap;
use std::time::Duration;

use streamspace_core::agent::models::AgentRegistration;
use streamspace_core::agent::repository::AgentRepository;
use streamspace_core::command::repository::CommandRepository;
use streamspace_core::db::Database;
use streamspace_core::error::CoreError;
use streamspace_core::selector::AlwaysConnected;
use streamspace_core::session::engine::{CommandOutcome, SessionEngine};
use streamspace_core::session::models::{CreateSessionRequest, SessionState};
use streamspace_core::session::repository::SessionRepository;
use streamspace_hub::{AgentHub, Dispatcher};
use streamspace_leader::file::FileLeaderElection;
use streamspace_leader::LeaderElection;
use streamspace_protocol::actions::WorkloadInfo;
use streamspace_protocol::ControlFrame;

async fn harness(agent_id: &str) -> (SessionEngine, Dispatcher, std::sync::Arc<AgentHub>) {
    let db = Database::in_memory().await.unwrap();
    let agents = AgentRepository::new(db.pool().clone());
    agents
        .upsert(&AgentRegistration {
            agent_id: agent_id.to_string(),
            platform: "docker".to_string(),
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

    let hub = AgentHub::new(agents.clone());
    let engine = SessionEngine::new(
        SessionRepository::new(db.pool().clone()),
        CommandRepository::new(db.pool().clone()),
        agents,
    );
    let dispatcher = Dispatcher::new(CommandRepository::new(db.pool().clone()), hub.clone());
    (engine, dispatcher, hub)
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

/// Scenario 1: happy-path create with the only online agent.
#[tokio::test]
async fn happy_path_create_reaches_running_with_url() {
    let (engine, dispatcher, hub) = harness("docker-prod-1").await;
    let mut rx = hub.register("docker-prod-1").await.unwrap();

    let (session, command) = engine.create_session(sample_request(), &AlwaysConnected).await.unwrap();
    assert_eq!(session.state, SessionState::Starting);

    dispatcher.enqueue(command.clone()).await.unwrap();
    let frame = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();
    assert!(matches!(frame, ControlFrame::Command(_)));

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

    let completed = engine.sessions().require(&session.id).await.unwrap();
    assert_eq!(completed.state, SessionState::Running);
    assert!(completed.url.is_some());

    let cmd_row = engine.commands().require(&command.command_id).await.unwrap();
    assert_eq!(cmd_row.status.to_string(), "completed");
}

/// Scenario 2: no agents online, create fails closed with nothing persisted.
#[tokio::test]
async fn agent_absent_at_create_persists_nothing() {
    let db = Database::in_memory().await.unwrap();
    let agents = AgentRepository::new(db.pool().clone());
    let engine = SessionEngine::new(
        SessionRepository::new(db.pool().clone()),
        CommandRepository::new(db.pool().clone()),
        agents,
    );

    let err = engine.create_session(sample_request(), &AlwaysConnected).await.unwrap_err();
    assert!(matches!(err, CoreError::NoAgentsAvailable));
    assert!(engine.sessions().list_by_user("alice").await.unwrap().is_empty());
}

/// Scenario 3: of three replicas sharing an agent id, exactly one holds
/// the lease at a time, and a killed leader's lock frees up for another.
#[tokio::test]
async fn leader_failover_hands_off_to_a_single_survivor() {
    let dir = tempfile::tempdir().unwrap();
    let replica_a = FileLeaderElection::new(dir.path());
    let replica_b = FileLeaderElection::new(dir.path());
    let replica_c = FileLeaderElection::new(dir.path());

    replica_a.campaign("docker-prod").await.unwrap();
    assert!(replica_b.campaign("docker-prod").await.is_err());
    assert!(replica_c.campaign("docker-prod").await.is_err());

    // The leader is killed without a clean resign; a real process death
    // releases the advisory lock when its fd closes, which we model here
    // by resigning explicitly.
    replica_a.resign("docker-prod").await.unwrap();

    replica_b.campaign("docker-prod").await.unwrap();
    assert!(replica_c.campaign("docker-prod").await.is_err());
}

/// Scenario 4: a command persisted but never dispatched before a restart
/// is picked up by the dispatcher's recovery sweep.
#[tokio::test]
async fn crash_recovery_dispatches_orphaned_pending_command() {
    let (engine, dispatcher, hub) = harness("docker-prod-1").await;
    let (_session, command) = engine.create_session(sample_request(), &AlwaysConnected).await.unwrap();

    // Simulate a restart: the command row exists (status=pending) but was
    // never handed to the dispatcher's in-memory queue.
    let mut rx = hub.register("docker-prod-1").await.unwrap();
    let recovered = dispatcher.recover(Duration::from_secs(60)).await.unwrap();
    assert_eq!(recovered, 1);

    let frame = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();
    assert!(matches!(frame, ControlFrame::Command(_)));

    tokio::time::sleep(Duration::from_millis(50)).await;
    let row = dispatcher.commands().require(&command.command_id).await.unwrap();
    assert_eq!(row.status.to_string(), "sent");

    engine
        .apply_command_result(CommandOutcome {
            command_id: command.command_id.clone(),
            success: true,
            error: None,
            workload: WorkloadInfo {
                url: Some("https://alice-firefox.streamspace.internal".into()),
                ..Default::default()
            },
        })
        .await
        .unwrap();
    let cmd_row = engine.commands().require(&command.command_id).await.unwrap();
    assert_eq!(cmd_row.status.to_string(), "completed");
}

/// Scenario 5: hibernate then wake returns a session to running with a
/// (possibly new) url.
#[tokio::test]
async fn hibernate_cycle_returns_to_running_with_new_url() {
    let (engine, _dispatcher, _hub) = harness("docker-prod-1").await;
    let (session, start_cmd) = engine.create_session(sample_request(), &AlwaysConnected).await.unwrap();
    engine
        .apply_command_result(CommandOutcome {
            command_id: start_cmd.command_id,
            success: true,
            error: None,
            workload: WorkloadInfo { url: Some("https://first.example".into()), ..Default::default() },
        })
        .await
        .unwrap();

    let hibernate_cmd = engine.request_hibernate(&session.id).await.unwrap();
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

    let wake_cmd = engine.request_wake(&session.id).await.unwrap();
    engine
        .apply_command_result(CommandOutcome {
            command_id: wake_cmd.command_id,
            success: true,
            error: None,
            workload: WorkloadInfo { url: Some("https://second.example".into()), ..Default::default() },
        })
        .await
        .unwrap();

    let woken = engine.sessions().require(&session.id).await.unwrap();
    assert_eq!(woken.state, SessionState::Running);
    assert_eq!(woken.url.as_deref(), Some("https://second.example"));
}

/// Scenario 6: a duplicate start_session against an already-running
/// session is reported as success with the pre-existing workload and
/// does not regress the session's state.
#[tokio::test]
async fn duplicate_start_on_running_session_is_idempotent() {
    let (engine, _dispatcher, _hub) = harness("docker-prod-1").await;
    let (session, start_cmd) = engine.create_session(sample_request(), &AlwaysConnected).await.unwrap();
    engine
        .apply_command_result(CommandOutcome {
            command_id: start_cmd.command_id,
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

    // A duplicate start_session is re-enqueued against the same session
    // (as a failover replay would do) and the agent-side handler would
    // reply with the pre-existing workload; applying that result must
    // not move a running session backwards.
    let duplicate = streamspace_core::command::models::AgentCommand::new(
        "docker-prod-1".to_string(),
        streamspace_protocol::actions::Action::StartSession(streamspace_protocol::actions::StartSessionAction {
            session_id: session.id.clone(),
            user: "alice".into(),
            template: "firefox".into(),
            template_manifest: serde_json::json!({"image": "streamspace/firefox:latest"}),
            memory: "2Gi".into(),
            cpu: "1000m".into(),
            persistent_home: true,
            idle_timeout: Some(1800),
            max_session_duration: None,
            tags: vec!["browser".into()],
        }),
    );
    engine.commands().insert(&duplicate).await.unwrap();

    engine
        .apply_command_result(CommandOutcome {
            command_id: duplicate.command_id.clone(),
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

    let still_running = engine.sessions().require(&session.id).await.unwrap();
    assert_eq!(still_running.state, SessionState::Running);
    assert_eq!(
        still_running.url.as_deref(),
        Some("https://alice-firefox.streamspace.internal")
    );
}

/// Boundary behaviour: a queue at capacity rejects the second command
/// without persisting it.
#[tokio::test]
async fn queue_at_capacity_rejects_without_persisting() {
    let (_engine, _dispatcher, hub) = harness("docker-prod-1").await;
    let db = Database::in_memory().await.unwrap();
    let dispatcher = Dispatcher::with_config(CommandRepository::new(db.pool().clone()), hub, 1, 0);

    let cmd = streamspace_core::command::models::AgentCommand::new(
        "docker-prod-1".to_string(),
        streamspace_protocol::actions::Action::StopSession(streamspace_protocol::actions::StopSessionAction {
            session_id: "s-1".into(),
        }),
    );
    let err = dispatcher.enqueue(cmd.clone()).await.unwrap_err();
    assert!(matches!(err, streamspace_hub::HubError::QueueFull));
    assert!(dispatcher.commands().get(&cmd.command_id).await.unwrap().is_none());
}
