//! Shared types for the host driver capability set.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

/// Opaque identity of a workload on the host substrate (container ID, pod
/// name, VM instance ID, ...). The control plane never interprets this
/// value; it only stores and replays it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkloadId(pub String);

impl std::fmt::Display for WorkloadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for WorkloadId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourceLimits {
    pub memory: String,
    pub cpu: String,
}

#[derive(Debug, Clone)]
pub struct Mount {
    pub host_path: String,
    pub container_path: String,
}

/// Everything `create_workload` needs: the spec named in the spec.md Host
/// Driver table, plus the `session_id` label every driver must attach so
/// `find_by_session` is reliable after a restart.
#[derive(Debug, Clone)]
pub struct CreateWorkloadRequest {
    pub session_id: String,
    pub image: String,
    pub limits: ResourceLimits,
    pub env: HashMap<String, String>,
    pub mounts: Vec<Mount>,
    pub network: String,
}

/// Observed state of a workload after `wait_running`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkloadState {
    Running,
    Crashed,
}

#[derive(Debug, Clone)]
pub struct RunningWorkload {
    pub state: WorkloadState,
    pub address: Option<String>,
}

/// How long `wait_running` should poll before giving up.
#[derive(Debug, Clone, Copy)]
pub struct WaitDeadline(pub Duration);

impl Default for WaitDeadline {
    fn default() -> Self {
        Self(Duration::from_secs(300))
    }
}

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("network {0} unreachable")]
    NetworkUnreachable(String),

    #[error("image pull failed: {0}")]
    ImagePullFailed(String),

    #[error("resource denied: {0}")]
    ResourceDenied(String),

    #[error("workload not found: {0}")]
    NotFound(String),

    #[error("workload in conflicting state: {0}")]
    StateConflict(String),

    #[error("timed out waiting for workload to become ready")]
    Timeout,

    #[error("workload crashed: {0}")]
    Crashed(String),

    #[error("driver command failed: {0}")]
    CommandFailed(String),
}

pub type DriverResult<T> = Result<T, DriverError>;
