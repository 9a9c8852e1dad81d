//! Durable command queue persistence. `status` *is* the queue position
//! (spec.md §9): there is no broker, the database row is the
//! failure-survivable truth and an in-memory worker pool is only a
//! performance layer on top of it.

use chrono::Utc;
use sqlx::SqlitePool;

use crate::error::{CoreError, CoreResult};

use super::models::{AgentCommand, CommandStatus};

const COLUMNS: &str = "command_id, agent_id, session_id, action, payload, status, \
     error_message, created_at, sent_at, acknowledged_at, completed_at";

#[derive(Debug, Clone)]
pub struct CommandRepository {
    pool: SqlitePool,
}

impl CommandRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, cmd: &AgentCommand) -> CoreResult<()> {
        if cmd.command_id.is_empty() || cmd.agent_id.is_empty() {
            return Err(CoreError::InvalidCommand(
                "command_id and agent_id must be non-empty".into(),
            ));
        }
        sqlx::query(
            r#"
            INSERT INTO agent_commands (
                command_id, agent_id, session_id, action, payload, status,
                error_message, created_at, sent_at, acknowledged_at, completed_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&cmd.command_id)
        .bind(&cmd.agent_id)
        .bind(&cmd.session_id)
        .bind(&cmd.action)
        .bind(&cmd.payload)
        .bind(cmd.status.to_string())
        .bind(&cmd.error_message)
        .bind(&cmd.created_at)
        .bind(&cmd.sent_at)
        .bind(&cmd.acknowledged_at)
        .bind(&cmd.completed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get(&self, command_id: &str) -> CoreResult<Option<AgentCommand>> {
        let row = sqlx::query_as::<_, AgentCommand>(&format!(
            "SELECT {COLUMNS} FROM agent_commands WHERE command_id = ?"
        ))
        .bind(command_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn require(&self, command_id: &str) -> CoreResult<AgentCommand> {
        self.get(command_id)
            .await?
            .ok_or_else(|| CoreError::CommandNotFound(command_id.to_string()))
    }

    pub async fn list_pending(&self) -> CoreResult<Vec<AgentCommand>> {
        let rows = sqlx::query_as::<_, AgentCommand>(&format!(
            "SELECT {COLUMNS} FROM agent_commands WHERE status = 'pending' ORDER BY created_at ASC"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// `pending` plus `sent`-without-ack older than `stale_after_seconds`
    /// (SPEC_FULL.md §4 supplement to spec.md §4.5.2's recovery scan).
    pub async fn list_recoverable(&self, stale_after_seconds: i64) -> CoreResult<Vec<AgentCommand>> {
        let cutoff = (Utc::now() - chrono::Duration::seconds(stale_after_seconds)).to_rfc3339();
        let rows = sqlx::query_as::<_, AgentCommand>(&format!(
            "SELECT {COLUMNS} FROM agent_commands \
             WHERE status = 'pending' OR (status = 'sent' AND sent_at < ?) \
             ORDER BY created_at ASC"
        ))
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// The latest non-terminal command for a session, used by recovery
    /// to decide whether to re-dispatch or fall back to reconciliation.
    pub async fn latest_open_for_session(&self, session_id: &str) -> CoreResult<Option<AgentCommand>> {
        let row = sqlx::query_as::<_, AgentCommand>(&format!(
            "SELECT {COLUMNS} FROM agent_commands \
             WHERE session_id = ? AND status NOT IN ('completed', 'failed') \
             ORDER BY created_at DESC LIMIT 1"
        ))
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// Commands for a session in insertion order, oldest first — the
    /// ordering the dispatcher must preserve per spec.md §4.5 "Ordering
    /// guarantees".
    pub async fn list_open_for_session_ordered(&self, session_id: &str) -> CoreResult<Vec<AgentCommand>> {
        let rows = sqlx::query_as::<_, AgentCommand>(&format!(
            "SELECT {COLUMNS} FROM agent_commands \
             WHERE session_id = ? AND status NOT IN ('completed', 'failed') \
             ORDER BY created_at ASC"
        ))
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Guarded by `status = 'pending'` so a late duplicate dispatch can't
    /// regress a command that already advanced to `acknowledged` or a
    /// terminal status (spec.md §3 "Status transitions are monotonic").
    pub async fn mark_sent(&self, command_id: &str) -> CoreResult<()> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "UPDATE agent_commands SET status = 'sent', sent_at = ? WHERE command_id = ? AND status = 'pending'",
        )
        .bind(&now)
        .bind(command_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn mark_acknowledged(&self, command_id: &str) -> CoreResult<()> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "UPDATE agent_commands SET status = 'acknowledged', acknowledged_at = ? WHERE command_id = ?",
        )
        .bind(&now)
        .bind(command_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn mark_completed(&self, command_id: &str) -> CoreResult<()> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "UPDATE agent_commands SET status = 'completed', completed_at = ? WHERE command_id = ?",
        )
        .bind(&now)
        .bind(command_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn mark_failed(&self, command_id: &str, error: &str) -> CoreResult<()> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "UPDATE agent_commands SET status = 'failed', completed_at = ?, error_message = ? \
             WHERE command_id = ?",
        )
        .bind(&now)
        .bind(error)
        .bind(command_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Treats a repeated `completed` as a no-op (spec.md §4.5 "At-least-once").
    pub async fn ack_status(&self, command_id: &str, status: CommandStatus) -> CoreResult<()> {
        let current = self.require(command_id).await?;
        if current.status == status || current.status.is_terminal() {
            return Ok(());
        }
        if !current.status.can_advance_to(status) {
            return Err(CoreError::InvalidCommand(format!(
                "cannot advance command {command_id} from {} to {status}",
                current.status
            )));
        }
        match status {
            CommandStatus::Acknowledged => self.mark_acknowledged(command_id).await,
            CommandStatus::Completed => self.mark_completed(command_id).await,
            CommandStatus::Failed => self.mark_failed(command_id, "").await,
            CommandStatus::Sent => self.mark_sent(command_id).await,
            CommandStatus::Pending => Ok(()),
        }
    }
}
