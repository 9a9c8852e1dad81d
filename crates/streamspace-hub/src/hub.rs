//! Agent Hub (spec.md §4.4): the process-wide registry of live agent
//! connections, keyed by `agent_id`.
//!
//! The Hub does not own a socket. It hands the control-plane's WebSocket
//! handler a bounded outbound channel to drain (the write pump's single
//! writer, per spec.md §9) and records the last ping time the handler's
//! read pump observes, so a separate reaper task can evict agents that
//! have gone quiet without anyone telling it explicitly (spec.md §4.4
//! "Liveness reaper" — "the only path to passive disconnection").

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use streamspace_core::agent::repository::AgentRepository;
use streamspace_core::selector::ConnectionObserver;
use streamspace_protocol::ControlFrame;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::error::{HubError, HubResult};

/// Per-connection outbound buffer size. A `send_to` against a full
/// buffer is reported as an error rather than blocking the caller
/// (spec.md §4.4 "Send-to ... returns error if ... buffer full").
const SEND_BUFFER_SIZE: usize = 256;

struct AgentConnection {
    outbound: mpsc::Sender<ControlFrame>,
    /// Unix millis of the last ping/pong activity observed for this
    /// connection; an `AtomicI64` so the reaper can read it without
    /// taking the map's per-entry lock.
    last_ping_millis: AtomicI64,
}

/// Registry of live agent connections plus the channel fabric used to
/// reach them. Cheap to clone (wraps an `Arc` internally via `DashMap`),
/// so it can be handed to every WebSocket handler task and the
/// dispatcher alike.
pub struct AgentHub {
    connections: DashMap<String, AgentConnection>,
    agents: AgentRepository,
}

impl AgentHub {
    pub fn new(agents: AgentRepository) -> Arc<Self> {
        Arc::new(Self {
            connections: DashMap::new(),
            agents,
        })
    }

    /// Register a new connection for `agent_id`, replacing (and
    /// implicitly closing, by dropping its sender) any prior connection
    /// for the same identity — the HA failover case where a new leader
    /// replica reconnects while the old one's socket hasn't yet noticed
    /// it's dead. Persists `agent.status=online`.
    ///
    /// Returns the receiver the caller's write pump should drain.
    pub async fn register(&self, agent_id: &str) -> HubResult<mpsc::Receiver<ControlFrame>> {
        let (tx, rx) = mpsc::channel(SEND_BUFFER_SIZE);
        if let Some((_, old)) = self.connections.remove(agent_id) {
            drop(old);
            info!(agent_id, "replacing existing agent connection");
        }
        self.connections.insert(
            agent_id.to_string(),
            AgentConnection {
                outbound: tx,
                last_ping_millis: AtomicI64::new(Utc::now().timestamp_millis()),
            },
        );
        self.agents.mark_online(agent_id).await?;
        info!(agent_id, "agent registered");
        Ok(rx)
    }

    /// Unregister a connection, idempotent. Persists `status=offline`.
    pub async fn unregister(&self, agent_id: &str) -> HubResult<()> {
        self.connections.remove(agent_id);
        self.agents.mark_offline(agent_id).await?;
        info!(agent_id, "agent unregistered");
        Ok(())
    }

    pub fn is_connected(&self, agent_id: &str) -> bool {
        self.connections.contains_key(agent_id)
    }

    /// Record inbound ping/pong/heartbeat activity for the liveness
    /// reaper.
    pub fn touch_ping(&self, agent_id: &str) {
        if let Some(conn) = self.connections.get(agent_id) {
            conn.last_ping_millis
                .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
        }
    }

    /// Enqueue a frame on the connection's outbound buffer.
    pub async fn send_to(&self, agent_id: &str, frame: ControlFrame) -> HubResult<()> {
        let conn = self
            .connections
            .get(agent_id)
            .ok_or_else(|| HubError::NotConnected(agent_id.to_string()))?;
        conn.outbound
            .try_send(frame)
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => HubError::SendBufferFull(agent_id.to_string()),
                mpsc::error::TrySendError::Closed(_) => HubError::NotConnected(agent_id.to_string()),
            })
    }

    /// Evict connections whose last ping is older than `deadline` and
    /// persist them offline. This is the only path to passive
    /// disconnection (spec.md §4.4).
    pub async fn reap(&self, deadline: Duration) -> Vec<String> {
        let now = Utc::now().timestamp_millis();
        let deadline_millis = deadline.as_millis() as i64;

        let stale: Vec<String> = self
            .connections
            .iter()
            .filter(|entry| now - entry.last_ping_millis.load(Ordering::Relaxed) > deadline_millis)
            .map(|entry| entry.key().clone())
            .collect();

        for agent_id in &stale {
            self.connections.remove(agent_id);
            if let Err(e) = self.agents.mark_offline(agent_id).await {
                warn!(agent_id, error = %e, "failed to persist reaped agent as offline");
            } else {
                info!(agent_id, "reaped stale agent connection");
            }
        }
        stale
    }

    pub fn connected_count(&self) -> usize {
        self.connections.len()
    }
}

/// Lets `streamspace-core`'s Selector apply `require_connected` without
/// the core crate depending on this one (spec.md §4.7).
impl ConnectionObserver for AgentHub {
    fn is_connected(&self, agent_id: &str) -> bool {
        AgentHub::is_connected(self, agent_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use streamspace_core::agent::models::AgentRegistration;
    use streamspace_core::db::Database;

    async fn hub_with_agent(agent_id: &str) -> Arc<AgentHub> {
        let db = Database::in_memory().await.unwrap();
        let agents = AgentRepository::new(db.pool().clone());
        agents
            .upsert(&AgentRegistration {
                agent_id: agent_id.to_string(),
                platform: "docker".into(),
                region: None,
                cluster_id: None,
                max_cpu: "4000m".into(),
                max_memory: "8Gi".into(),
                max_sessions: 10,
                metadata: HashMap::new(),
            })
            .await
            .unwrap();
        AgentHub::new(agents)
    }

    #[tokio::test]
    async fn register_marks_online_and_is_connected() {
        let hub = hub_with_agent("docker-prod-1").await;
        let _rx = hub.register("docker-prod-1").await.unwrap();
        assert!(hub.is_connected("docker-prod-1"));
        assert_eq!(hub.connected_count(), 1);
    }

    #[tokio::test]
    async fn registering_twice_replaces_the_old_connection() {
        let hub = hub_with_agent("docker-prod-1").await;
        let mut rx1 = hub.register("docker-prod-1").await.unwrap();
        let _rx2 = hub.register("docker-prod-1").await.unwrap();

        // The old receiver's sender was dropped, so recv() resolves to None.
        assert!(rx1.recv().await.is_none());
        assert_eq!(hub.connected_count(), 1);
    }

    #[tokio::test]
    async fn unregister_is_idempotent() {
        let hub = hub_with_agent("docker-prod-1").await;
        let _rx = hub.register("docker-prod-1").await.unwrap();
        hub.unregister("docker-prod-1").await.unwrap();
        hub.unregister("docker-prod-1").await.unwrap();
        assert!(!hub.is_connected("docker-prod-1"));
    }

    #[tokio::test]
    async fn send_to_unconnected_agent_errors() {
        let hub = hub_with_agent("docker-prod-1").await;
        let err = hub.send_to("docker-prod-1", ControlFrame::Ping).await.unwrap_err();
        assert!(matches!(err, HubError::NotConnected(_)));
    }

    #[tokio::test]
    async fn send_to_delivers_frame_to_receiver() {
        let hub = hub_with_agent("docker-prod-1").await;
        let mut rx = hub.register("docker-prod-1").await.unwrap();
        hub.send_to("docker-prod-1", ControlFrame::Ping).await.unwrap();
        assert!(matches!(rx.recv().await, Some(ControlFrame::Ping)));
    }

    #[tokio::test]
    async fn reap_evicts_stale_connections_and_marks_offline() {
        let hub = hub_with_agent("docker-prod-1").await;
        let _rx = hub.register("docker-prod-1").await.unwrap();
        if let Some(conn) = hub.connections.get("docker-prod-1") {
            conn.last_ping_millis.store(0, Ordering::Relaxed);
        }

        let evicted = hub.reap(Duration::from_secs(60)).await;
        assert_eq!(evicted, vec!["docker-prod-1".to_string()]);
        assert!(!hub.is_connected("docker-prod-1"));
    }
}
