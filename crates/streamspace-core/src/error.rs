//! Domain errors raised by the session state engine and its repositories.
//!
//! Maps onto the error kinds of spec.md §7: state conflicts and
//! not-found are distinguished from plain I/O failure so callers can
//! translate them into the right HTTP-equivalent status without string
//! matching.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("agent not found: {0}")]
    AgentNotFound(String),

    #[error("command not found: {0}")]
    CommandNotFound(String),

    #[error("invalid transition: {0} -> {1}")]
    StateConflict(String, String),

    #[error("no agents available matching criteria")]
    NoAgentsAvailable,

    #[error("command queue is full")]
    QueueFull,

    #[error("invalid command: {0}")]
    InvalidCommand(String),

    #[error(transparent)]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

pub type CoreResult<T> = Result<T, CoreError>;
