//! Session persistence. The database row is the authoritative truth;
//! this repository is the only thing allowed to touch the `sessions`
//! table directly.

use chrono::Utc;
use sqlx::SqlitePool;

use crate::error::{CoreError, CoreResult};

use super::models::{Session, SessionState};

const COLUMNS: &str = "id, user_id, template_name, platform, agent_id, cluster_id, memory, cpu, \
     persistent_home, idle_timeout, max_session_duration, tags, state, url, pod_name, \
     container_id, error_message, last_activity, created_at, updated_at";

#[derive(Debug, Clone)]
pub struct SessionRepository {
    pool: SqlitePool,
}

impl SessionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, session: &Session) -> CoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO sessions (
                id, user_id, template_name, platform, agent_id, cluster_id, memory, cpu,
                persistent_home, idle_timeout, max_session_duration, tags, state, url,
                pod_name, container_id, error_message, last_activity, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&session.id)
        .bind(&session.user_id)
        .bind(&session.template_name)
        .bind(&session.platform)
        .bind(&session.agent_id)
        .bind(&session.cluster_id)
        .bind(&session.memory)
        .bind(&session.cpu)
        .bind(session.persistent_home)
        .bind(session.idle_timeout)
        .bind(session.max_session_duration)
        .bind(session.tags.to_json())
        .bind(session.state.to_string())
        .bind(&session.url)
        .bind(&session.pod_name)
        .bind(&session.container_id)
        .bind(&session.error_message)
        .bind(&session.last_activity)
        .bind(&session.created_at)
        .bind(&session.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get(&self, id: &str) -> CoreResult<Option<Session>> {
        let row = sqlx::query_as::<_, Session>(&format!(
            "SELECT {COLUMNS} FROM sessions WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn require(&self, id: &str) -> CoreResult<Session> {
        self.get(id)
            .await?
            .ok_or_else(|| CoreError::SessionNotFound(id.to_string()))
    }

    pub async fn list_by_user(&self, user_id: &str) -> CoreResult<Vec<Session>> {
        let rows = sqlx::query_as::<_, Session>(&format!(
            "SELECT {COLUMNS} FROM sessions WHERE user_id = ? ORDER BY created_at DESC"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn list_by_agent(&self, agent_id: &str) -> CoreResult<Vec<Session>> {
        let rows = sqlx::query_as::<_, Session>(&format!(
            "SELECT {COLUMNS} FROM sessions WHERE agent_id = ? ORDER BY created_at DESC"
        ))
        .bind(agent_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Active (non-terminal) session count for an agent, used by the
    /// Selector's "lowest active load" tie-break (spec.md §4.7).
    pub async fn count_active_for_agent(&self, agent_id: &str) -> CoreResult<i64> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sessions WHERE agent_id = ? AND state NOT IN ('terminated', 'failed')",
        )
        .bind(agent_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    /// Sessions stuck in a transitional state older than `grace`, the
    /// set the recovery task must re-dispatch or reconcile on startup.
    pub async fn list_stale_transitional(&self, grace_seconds: i64) -> CoreResult<Vec<Session>> {
        let cutoff = (Utc::now() - chrono::Duration::seconds(grace_seconds)).to_rfc3339();
        let rows = sqlx::query_as::<_, Session>(&format!(
            "SELECT {COLUMNS} FROM sessions \
             WHERE state IN ('starting', 'hibernating', 'waking', 'terminating') \
             AND updated_at < ? ORDER BY created_at ASC"
        ))
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn update(&self, session: &Session) -> CoreResult<()> {
        sqlx::query(
            r#"
            UPDATE sessions SET
                agent_id = ?, cluster_id = ?, state = ?, url = ?, pod_name = ?,
                container_id = ?, error_message = ?, last_activity = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&session.agent_id)
        .bind(&session.cluster_id)
        .bind(session.state.to_string())
        .bind(&session.url)
        .bind(&session.pod_name)
        .bind(&session.container_id)
        .bind(&session.error_message)
        .bind(&session.last_activity)
        .bind(&session.updated_at)
        .bind(&session.id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn touch_activity(&self, id: &str) -> CoreResult<()> {
        let now = Utc::now().to_rfc3339();
        sqlx::query("UPDATE sessions SET last_activity = ? WHERE id = ?")
            .bind(&now)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn delete(&self, id: &str) -> CoreResult<()> {
        sqlx::query("DELETE FROM sessions WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    #[cfg(test)]
    pub async fn set_state_for_test(&self, id: &str, state: SessionState) -> CoreResult<()> {
        sqlx::query("UPDATE sessions SET state = ? WHERE id = ?")
            .bind(state.to_string())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
