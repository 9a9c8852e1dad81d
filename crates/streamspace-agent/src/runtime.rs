//! Top-level agent runtime: register, connect, serve commands, reconnect.
//!
//! Connection lifecycle is a simple state machine driven by one task:
//! register -> connect -> serve until disconnect -> backoff -> retry.
//! Each inbound command is dispatched onto its own task so a slow
//! `start_session` never blocks heartbeats or other commands sharing the
//! connection.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex as SyncMutex;
use streamspace_driver::driver::HostDriver;
use streamspace_leader::file::FileLeaderElection;
use streamspace_leader::orchestrator::OrchestratorLeaderElection;
use streamspace_leader::redis_backend::RedisLeaderElection;
use streamspace_leader::{ElectionTimings, LeadershipDriver};
use streamspace_protocol::{AgentFrame, AgentHealthStatus, ControlFrame, HeartbeatFrame, IdentityFrame};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::{AgentConfig, LeaderBackend};
use crate::connection::{self, ConnectionHandles};
use crate::handlers::CommandHandlers;
use crate::registration;

const INITIAL_BACKOFF: Duration = Duration::from_secs(2);
const MAX_BACKOFF: Duration = Duration::from_secs(32);

pub struct AgentRuntime {
    config: AgentConfig,
    http: reqwest::Client,
    handlers: Arc<CommandHandlers>,
    active_sessions: Arc<AtomicU32>,
}

impl AgentRuntime {
    pub fn new(config: AgentConfig, driver: Arc<dyn HostDriver>) -> Self {
        let handlers = Arc::new(CommandHandlers::new(driver, config.network.clone()));
        Self {
            http: reqwest::Client::new(),
            config,
            handlers,
            active_sessions: Arc::new(AtomicU32::new(0)),
        }
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let shutdown = shutdown_watch();
        if self.config.enable_ha {
            self.run_with_leader_election(shutdown).await
        } else {
            self.run_supervised(shutdown).await
        }
    }

    /// Reconnect loop with capped exponential backoff. Runs until
    /// `shutdown` fires, at which point it returns cleanly.
    async fn run_supervised(&self, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        let mut backoff = INITIAL_BACKOFF;

        loop {
            if *shutdown.borrow() {
                return Ok(());
            }

            match self.connect_once().await {
                Ok(handles) => {
                    backoff = INITIAL_BACKOFF;
                    self.serve_connection(handles, shutdown.clone()).await;
                }
                Err(e) => {
                    warn!(error = %e, "connect attempt failed");
                }
            }

            if *shutdown.borrow() {
                return Ok(());
            }

            tokio::select! {
                _ = tokio::time::sleep(backoff) => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return Ok(());
                    }
                }
            }
            backoff = (backoff * 2).min(MAX_BACKOFF);
        }
    }

    async fn connect_once(&self) -> anyhow::Result<ConnectionHandles> {
        registration::register(&self.http, &self.config).await?;
        let ws = connection::connect(&self.config.control_plane_url, &self.config.agent_id).await?;
        Ok(connection::spawn_pumps(ws))
    }

    /// Drives one live connection: heartbeats out, commands/pings in.
    /// Returns once the connection drops or shutdown is requested.
    async fn serve_connection(&self, mut handles: ConnectionHandles, mut shutdown: watch::Receiver<bool>) {
        info!(agent_id = %self.config.agent_id, "connection established");
        let heartbeat = self.spawn_heartbeat(handles.outbound_tx.clone());

        loop {
            tokio::select! {
                frame = handles.inbound_rx.recv() => {
                    match frame {
                        Some(ControlFrame::Command(cmd)) => {
                            let handlers = self.handlers.clone();
                            let outbound = handles.outbound_tx.clone();
                            let active = self.active_sessions.clone();
                            tokio::spawn(async move {
                                active.fetch_add(1, Ordering::Relaxed);
                                let response = handlers.handle(cmd.command_id, cmd.action).await;
                                active.fetch_sub(1, Ordering::Relaxed);
                                let _ = outbound.send(response).await;
                            });
                        }
                        Some(ControlFrame::Ping) => {
                            let _ = handles.outbound_tx.send(AgentFrame::Pong(IdentityFrame {
                                agent_id: self.config.agent_id.clone(),
                            })).await;
                        }
                        Some(ControlFrame::Shutdown) => {
                            info!("received shutdown frame from control plane");
                            let _ = handles.outbound_tx.send(AgentFrame::ShutdownAck(IdentityFrame {
                                agent_id: self.config.agent_id.clone(),
                            })).await;
                            break;
                        }
                        None => {
                            warn!("inbound channel closed");
                            break;
                        }
                    }
                }
                _ = &mut handles.closed => {
                    warn!("connection pumps tore down");
                    break;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("shutdown requested, closing connection");
                        break;
                    }
                }
            }
        }

        heartbeat.abort();
        drop(handles.outbound_tx);
    }

    fn spawn_heartbeat(&self, outbound_tx: tokio::sync::mpsc::Sender<AgentFrame>) -> JoinHandle<()> {
        let agent_id = self.config.agent_id.clone();
        let interval = self.config.heartbeat_interval();
        let active_sessions = self.active_sessions.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let frame = AgentFrame::Heartbeat(HeartbeatFrame {
                    agent_id: agent_id.clone(),
                    timestamp: Utc::now().timestamp_millis(),
                    status: AgentHealthStatus::Online,
                    active_sessions: active_sessions.load(Ordering::Relaxed),
                });
                if outbound_tx.send(frame).await.is_err() {
                    return;
                }
            }
        })
    }

    /// HA supervisor: the connection loop only runs while this replica
    /// holds leadership. Losing leadership aborts it immediately so the
    /// 500 ms stop-issuing-messages budget is met without waiting on a
    /// graceful drain.
    async fn run_with_leader_election(self, shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        let runtime = Arc::new(self);
        let conn_task: Arc<SyncMutex<Option<JoinHandle<()>>>> = Arc::new(SyncMutex::new(None));
        let timings = ElectionTimings::default();

        let (election_shutdown_tx, election_shutdown_rx) = oneshot::channel();
        let mut watch_for_election = shutdown.clone();
        tokio::spawn(async move {
            loop {
                if *watch_for_election.borrow() {
                    let _ = election_shutdown_tx.send(());
                    return;
                }
                if watch_for_election.changed().await.is_err() {
                    return;
                }
            }
        });

        let become_runtime = runtime.clone();
        let become_task = conn_task.clone();
        let become_shutdown = shutdown.clone();
        let on_become_leader = move || {
            info!("became leader, starting agent connection");
            let rt = become_runtime.clone();
            let sd = become_shutdown.clone();
            let handle = tokio::spawn(async move {
                if let Err(e) = rt.run_supervised(sd).await {
                    error!(error = %e, "connection loop exited with error");
                }
            });
            *become_task.lock() = Some(handle);
        };

        let lose_task = conn_task.clone();
        let on_lose_leadership = move || {
            warn!("lost leadership, tearing down agent connection");
            if let Some(handle) = lose_task.lock().take() {
                handle.abort();
            }
        };

        let agent_id = runtime.config.agent_id.clone();
        let result = match runtime.config.leader_election_backend {
            LeaderBackend::File => {
                let election = FileLeaderElection::new(runtime.config.lock_file_path.clone());
                LeadershipDriver::new(election, timings)
                    .run(&agent_id, on_become_leader, on_lose_leadership, election_shutdown_rx)
                    .await
            }
            LeaderBackend::Redis => {
                let url = runtime
                    .config
                    .redis_url
                    .clone()
                    .ok_or_else(|| anyhow::anyhow!("--redis-url is required when leader-election-backend=redis"))?;
                let election = RedisLeaderElection::connect(&url, "streamspace-agent", timings.ttl).await?;
                LeadershipDriver::new(election, timings)
                    .run(&agent_id, on_become_leader, on_lose_leadership, election_shutdown_rx)
                    .await
            }
            LeaderBackend::Orchestrator => {
                let client = kube::Client::try_default().await?;
                let namespace = runtime.config.cluster_id.clone().unwrap_or_else(|| "default".to_string());
                let replica_id = format!("{}-{}", agent_id, std::process::id());
                let election = OrchestratorLeaderElection::new(client, namespace, replica_id);
                LeadershipDriver::new(election, timings)
                    .run(&agent_id, on_become_leader, on_lose_leadership, election_shutdown_rx)
                    .await
            }
        };

        if let Some(handle) = conn_task.lock().take() {
            handle.abort();
        }
        result.map_err(anyhow::Error::from)
    }
}

fn shutdown_watch() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = tx.send(true);
        }
    });
    rx
}
