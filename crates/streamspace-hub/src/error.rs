//! Errors raised by the Hub and Dispatcher (spec.md §7 "Transient I/O").

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HubError {
    #[error("agent not connected: {0}")]
    NotConnected(String),

    #[error("agent send buffer full: {0}")]
    SendBufferFull(String),

    #[error("dispatcher queue is full")]
    QueueFull,

    #[error("invalid command: {0}")]
    InvalidCommand(String),

    #[error(transparent)]
    Core(#[from] streamspace_core::CoreError),
}

pub type HubResult<T> = Result<T, HubError>;
