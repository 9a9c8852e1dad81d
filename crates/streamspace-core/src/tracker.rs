//! Connection Tracker (spec.md §4.8): volatile, in-memory map of
//! `session_id -> set<Connection>`. Never persisted; feeds an external
//! idle-timeout decision this crate doesn't make itself.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;

#[derive(Debug, Clone)]
pub struct Connection {
    pub connection_id: String,
    pub session_id: String,
    pub user_id: String,
    pub client_ip: String,
    pub connected_at: Instant,
    pub last_heartbeat: Instant,
}

/// In-memory map `session_id -> set<connection_id>` plus the connection
/// records themselves, keyed by `connection_id` for O(1) heartbeat
/// updates.
#[derive(Default)]
pub struct ConnectionTracker {
    by_session: DashMap<String, HashSet<String>>,
    by_id: DashMap<String, Connection>,
}

impl ConnectionTracker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add(&self, connection_id: &str, session_id: &str, user_id: &str, client_ip: &str) {
        let now = Instant::now();
        self.by_session
            .entry(session_id.to_string())
            .or_default()
            .insert(connection_id.to_string());
        self.by_id.insert(
            connection_id.to_string(),
            Connection {
                connection_id: connection_id.to_string(),
                session_id: session_id.to_string(),
                user_id: user_id.to_string(),
                client_ip: client_ip.to_string(),
                connected_at: now,
                last_heartbeat: now,
            },
        );
    }

    pub fn remove(&self, connection_id: &str) {
        if let Some((_, conn)) = self.by_id.remove(connection_id) {
            if let Some(mut set) = self.by_session.get_mut(&conn.session_id) {
                set.remove(connection_id);
            }
            self.by_session.retain(|_, v| !v.is_empty());
        }
    }

    pub fn update_heartbeat(&self, connection_id: &str) -> bool {
        if let Some(mut conn) = self.by_id.get_mut(connection_id) {
            conn.last_heartbeat = Instant::now();
            true
        } else {
            false
        }
    }

    pub fn count(&self, session_id: &str) -> usize {
        self.by_session.get(session_id).map(|s| s.len()).unwrap_or(0)
    }

    /// Evicts connections whose `last_heartbeat` is older than `deadline`.
    /// Returns the set of sessions that dropped to zero connections as a
    /// result — the signal an idle-timeout policy (out of scope here)
    /// would act on.
    pub fn reap(&self, deadline: Duration) -> Vec<String> {
        let now = Instant::now();
        let stale: Vec<String> = self
            .by_id
            .iter()
            .filter(|entry| now.duration_since(entry.last_heartbeat) > deadline)
            .map(|entry| entry.connection_id.clone())
            .collect();

        let mut emptied = Vec::new();
        for connection_id in &stale {
            if let Some((_, conn)) = self.by_id.remove(connection_id) {
                if let Some(mut set) = self.by_session.get_mut(&conn.session_id) {
                    set.remove(connection_id);
                    if set.is_empty() {
                        emptied.push(conn.session_id.clone());
                    }
                }
            }
        }
        self.by_session.retain(|_, v| !v.is_empty());
        emptied
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn add_remove_and_count() {
        let tracker = ConnectionTracker::new();
        tracker.add("c1", "s1", "alice", "10.0.0.1");
        tracker.add("c2", "s1", "alice", "10.0.0.2");
        assert_eq!(tracker.count("s1"), 2);

        tracker.remove("c1");
        assert_eq!(tracker.count("s1"), 1);
    }

    #[test]
    fn reap_evicts_stale_and_reports_emptied_sessions() {
        let tracker = ConnectionTracker::new();
        tracker.add("c1", "s1", "alice", "10.0.0.1");
        sleep(Duration::from_millis(20));

        let emptied = tracker.reap(Duration::from_millis(5));
        assert_eq!(emptied, vec!["s1".to_string()]);
        assert_eq!(tracker.count("s1"), 0);
    }

    #[test]
    fn update_heartbeat_keeps_connection_alive() {
        let tracker = ConnectionTracker::new();
        tracker.add("c1", "s1", "alice", "10.0.0.1");
        assert!(tracker.update_heartbeat("c1"));
        assert!(!tracker.update_heartbeat("missing"));
    }
}
