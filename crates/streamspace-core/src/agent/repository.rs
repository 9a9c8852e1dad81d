//! Agent registry persistence.
//!
//! A row's `status` is only ever `online` for the current leader replica
//! of a given `agent_id` (spec.md §3 "Ownership") — the Hub is what
//! flips it, on register/unregister, not the agent itself.

use sqlx::SqlitePool;

use crate::error::{CoreError, CoreResult};

use super::models::{Agent, AgentRegistration, AgentStatus};

const COLUMNS: &str = "agent_id, platform, region, cluster_id, max_cpu, max_memory, \
     max_sessions, status, metadata, last_heartbeat_at, created_at";

#[derive(Debug, Clone)]
pub struct AgentRepository {
    pool: SqlitePool,
}

impl AgentRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Register (or re-register) an agent. Idempotent: replaying the
    /// same registration updates declared capacity in place.
    pub async fn upsert(&self, reg: &AgentRegistration) -> CoreResult<Agent> {
        let now = chrono::Utc::now().to_rfc3339();
        let metadata = serde_json::to_string(&reg.metadata)?;

        sqlx::query(
            r#"
            INSERT INTO agents (agent_id, platform, region, cluster_id, max_cpu, max_memory,
                max_sessions, status, metadata, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, 'offline', ?, ?)
            ON CONFLICT(agent_id) DO UPDATE SET
                platform = excluded.platform,
                region = excluded.region,
                cluster_id = excluded.cluster_id,
                max_cpu = excluded.max_cpu,
                max_memory = excluded.max_memory,
                max_sessions = excluded.max_sessions,
                metadata = excluded.metadata
            "#,
        )
        .bind(&reg.agent_id)
        .bind(&reg.platform)
        .bind(&reg.region)
        .bind(&reg.cluster_id)
        .bind(&reg.max_cpu)
        .bind(&reg.max_memory)
        .bind(reg.max_sessions)
        .bind(&metadata)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        self.require(&reg.agent_id).await
    }

    pub async fn get(&self, agent_id: &str) -> CoreResult<Option<Agent>> {
        let row = sqlx::query_as::<_, Agent>(&format!(
            "SELECT {COLUMNS} FROM agents WHERE agent_id = ?"
        ))
        .bind(agent_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn require(&self, agent_id: &str) -> CoreResult<Agent> {
        self.get(agent_id)
            .await?
            .ok_or_else(|| CoreError::AgentNotFound(agent_id.to_string()))
    }

    pub async fn list_online(&self) -> CoreResult<Vec<Agent>> {
        let rows = sqlx::query_as::<_, Agent>(&format!(
            "SELECT {COLUMNS} FROM agents WHERE status = 'online' ORDER BY agent_id ASC"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn mark_online(&self, agent_id: &str) -> CoreResult<()> {
        let now = chrono::Utc::now().to_rfc3339();
        sqlx::query("UPDATE agents SET status = 'online', last_heartbeat_at = ? WHERE agent_id = ?")
            .bind(&now)
            .bind(agent_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn mark_offline(&self, agent_id: &str) -> CoreResult<()> {
        sqlx::query("UPDATE agents SET status = 'offline' WHERE agent_id = ?")
            .bind(agent_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn touch_heartbeat(&self, agent_id: &str) -> CoreResult<()> {
        let now = chrono::Utc::now().to_rfc3339();
        sqlx::query("UPDATE agents SET last_heartbeat_at = ?, status = 'online' WHERE agent_id = ?")
            .bind(&now)
            .bind(agent_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// The reaper's side of liveness: agents whose last heartbeat is
    /// older than `deadline_seconds` are demoted to offline.
    pub async fn reap_stale(&self, deadline_seconds: i64) -> CoreResult<Vec<String>> {
        let cutoff = (chrono::Utc::now() - chrono::Duration::seconds(deadline_seconds)).to_rfc3339();
        let stale: Vec<(String,)> = sqlx::query_as(
            "SELECT agent_id FROM agents WHERE status = 'online' \
             AND (last_heartbeat_at IS NULL OR last_heartbeat_at < ?)",
        )
        .bind(&cutoff)
        .fetch_all(&self.pool)
        .await?;

        for (agent_id,) in &stale {
            self.mark_offline(agent_id).await?;
        }

        Ok(stale.into_iter().map(|(id,)| id).collect())
    }
}
