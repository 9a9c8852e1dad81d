//! The `HostDriver` trait: the only place platform-specific code lives.
//!
//! One implementation per platform (Docker/Podman CLI today, Kubernetes
//! behind the `kubernetes` feature). The agent runtime depends only on this
//! trait, never on a concrete backend.

use async_trait::async_trait;

use crate::types::{CreateWorkloadRequest, DriverResult, RunningWorkload, WaitDeadline, WorkloadId};

#[async_trait]
pub trait HostDriver: Send + Sync {
    /// Ensure the named network exists. Idempotent; fatal if the substrate
    /// itself is unreachable.
    async fn ensure_network(&self, name: &str) -> DriverResult<()>;

    /// Create (but do not start) a workload. Returns an opaque workload id.
    async fn create_workload(&self, req: CreateWorkloadRequest) -> DriverResult<WorkloadId>;

    async fn start_workload(&self, id: &WorkloadId) -> DriverResult<()>;

    /// Poll until the workload is observably running (or the deadline
    /// elapses), returning its reachable address.
    async fn wait_running(&self, id: &WorkloadId, deadline: WaitDeadline) -> DriverResult<RunningWorkload>;

    async fn stop_workload(&self, id: &WorkloadId) -> DriverResult<()>;

    /// Non-fatal if the workload is already gone.
    async fn remove_workload(&self, id: &WorkloadId) -> DriverResult<()>;

    /// Hibernate (`replicas = 0`) / wake (`replicas = 1`) primitive.
    async fn scale(&self, id: &WorkloadId, replicas: u32) -> DriverResult<()>;

    /// Recover a workload's identity by its `session_id` label after a
    /// restart. `Ok(None)` means no matching workload exists.
    async fn find_by_session(&self, session_id: &str) -> DriverResult<Option<WorkloadId>>;
}
