//! Agent Selector / Router (spec.md §4.7).
//!
//! Picks the online agent matching platform/region/cluster filters with
//! the lowest active-session count, not exceeding its declared
//! `max_sessions` (SPEC_FULL.md §4 capacity supplement). Ties break
//! lexicographically on `agent_id` for determinism.

use crate::agent::repository::AgentRepository;
use crate::error::{CoreError, CoreResult};
use crate::session::repository::SessionRepository;

#[derive(Debug, Clone, Default)]
pub struct SelectionCriteria {
    pub platform: String,
    pub region: Option<String>,
    pub cluster_id: Option<String>,
    pub prefer_low_load: bool,
    pub require_connected: bool,
}

/// Implemented by the Hub so the selector can apply `require_connected`
/// without the core crate depending on the hub crate.
pub trait ConnectionObserver: Send + Sync {
    fn is_connected(&self, agent_id: &str) -> bool;
}

/// No-op observer for callers that don't need the `require_connected`
/// filter (e.g. tests exercising selection logic alone).
pub struct AlwaysConnected;
impl ConnectionObserver for AlwaysConnected {
    fn is_connected(&self, _agent_id: &str) -> bool {
        true
    }
}

pub struct AgentSelector<'a> {
    agents: &'a AgentRepository,
    sessions: &'a SessionRepository,
}

impl<'a> AgentSelector<'a> {
    pub fn new(agents: &'a AgentRepository, sessions: &'a SessionRepository) -> Self {
        Self { agents, sessions }
    }

    pub async fn select(
        &self,
        criteria: &SelectionCriteria,
        observer: &dyn ConnectionObserver,
    ) -> CoreResult<String> {
        let candidates = self.agents.list_online().await?;

        let mut filtered = Vec::new();
        for agent in candidates {
            if agent.platform != criteria.platform {
                continue;
            }
            if let Some(region) = &criteria.region {
                if agent.region.as_deref() != Some(region.as_str()) {
                    continue;
                }
            }
            if let Some(cluster_id) = &criteria.cluster_id {
                if agent.cluster_id.as_deref() != Some(cluster_id.as_str()) {
                    continue;
                }
            }
            if criteria.require_connected && !observer.is_connected(&agent.agent_id) {
                continue;
            }

            let active = self.sessions.count_active_for_agent(&agent.agent_id).await?;
            if active >= agent.max_sessions {
                continue;
            }

            filtered.push((agent.agent_id, active));
        }

        if filtered.is_empty() {
            return Err(CoreError::NoAgentsAvailable);
        }

        filtered.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        Ok(filtered.into_iter().next().unwrap().0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::models::AgentRegistration;
    use crate::db::Database;
    use std::collections::HashMap;

    async fn make_agent(repo: &AgentRepository, id: &str, platform: &str, max_sessions: i64) {
        repo.upsert(&AgentRegistration {
            agent_id: id.to_string(),
            platform: platform.to_string(),
            region: None,
            cluster_id: None,
            max_cpu: "4000m".into(),
            max_memory: "8Gi".into(),
            max_sessions,
            metadata: HashMap::new(),
        })
        .await
        .unwrap();
        repo.mark_online(id).await.unwrap();
    }

    #[tokio::test]
    async fn picks_lowest_active_load_with_lexicographic_tiebreak() {
        let db = Database::in_memory().await.unwrap();
        let agents = AgentRepository::new(db.pool().clone());
        let sessions = SessionRepository::new(db.pool().clone());

        make_agent(&agents, "b-agent", "docker", 10).await;
        make_agent(&agents, "a-agent", "docker", 10).await;

        let selector = AgentSelector::new(&agents, &sessions);
        let criteria = SelectionCriteria {
            platform: "docker".into(),
            ..Default::default()
        };
        let picked = selector.select(&criteria, &AlwaysConnected).await.unwrap();
        assert_eq!(picked, "a-agent");
    }

    #[tokio::test]
    async fn returns_no_agents_available_when_filtered_set_is_empty() {
        let db = Database::in_memory().await.unwrap();
        let agents = AgentRepository::new(db.pool().clone());
        let sessions = SessionRepository::new(db.pool().clone());
        let selector = AgentSelector::new(&agents, &sessions);

        let criteria = SelectionCriteria {
            platform: "kubernetes".into(),
            ..Default::default()
        };
        let err = selector.select(&criteria, &AlwaysConnected).await.unwrap_err();
        assert!(matches!(err, CoreError::NoAgentsAvailable));
    }
}
