//! Error type for the agent runtime's non-driver failure modes.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("registration failed: {0}")]
    RegistrationFailed(String),

    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    #[error("frame too large: {0} bytes")]
    FrameTooLarge(usize),

    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    #[error(transparent)]
    Driver(#[from] streamspace_driver::types::DriverError),

    #[error(transparent)]
    Election(#[from] streamspace_leader::ElectionError),

    #[error(transparent)]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

pub type AgentResult<T> = Result<T, AgentError>;
