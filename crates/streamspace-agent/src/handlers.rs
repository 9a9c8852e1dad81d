//! Command handler registry: one function per `Action` variant, each
//! driving the configured `HostDriver` and idempotent against replay.

use std::sync::Arc;
use std::time::Duration;

use streamspace_driver::driver::HostDriver;
use streamspace_driver::types::{CreateWorkloadRequest, DriverError, DriverResult, ResourceLimits, WaitDeadline};
use streamspace_protocol::{
    Action, AgentFrame, CommandResponseFrame, GetSessionStatusAction, HibernateSessionAction,
    StartSessionAction, StopSessionAction, WakeSessionAction, WorkloadInfo,
};
use tracing::warn;

/// Per-action wall-clock budget. `create_workload`/`start_workload` may
/// need to pull an image; everything else operates on an existing
/// workload and should be quick.
const CREATE_DEADLINE: Duration = Duration::from_secs(300);
const MUTATE_DEADLINE: Duration = Duration::from_secs(120);

pub struct CommandHandlers {
    driver: Arc<dyn HostDriver>,
    network: String,
}

impl CommandHandlers {
    pub fn new(driver: Arc<dyn HostDriver>, network: String) -> Self {
        Self { driver, network }
    }

    pub async fn handle(&self, command_id: String, action: Action) -> AgentFrame {
        let session_id = action.session_id().to_string();

        let outcome = match action {
            Action::StartSession(a) => {
                tokio::time::timeout(CREATE_DEADLINE, self.start_session(a)).await
            }
            Action::StopSession(a) => tokio::time::timeout(MUTATE_DEADLINE, self.stop_session(a)).await,
            Action::HibernateSession(a) => {
                tokio::time::timeout(MUTATE_DEADLINE, self.hibernate_session(a)).await
            }
            Action::WakeSession(a) => tokio::time::timeout(CREATE_DEADLINE, self.wake_session(a)).await,
            Action::GetSessionStatus(a) => {
                tokio::time::timeout(MUTATE_DEADLINE, self.get_session_status(a)).await
            }
        };

        match outcome {
            Ok(Ok(workload)) => AgentFrame::CommandResponse(CommandResponseFrame {
                command_id,
                session_id,
                success: true,
                status: "completed".to_string(),
                error: None,
                workload,
            }),
            Ok(Err(e)) => {
                warn!(session_id, error = %e, "command failed");
                AgentFrame::CommandResponse(CommandResponseFrame {
                    command_id,
                    session_id,
                    success: false,
                    status: "failed".to_string(),
                    error: Some(e.to_string()),
                    workload: WorkloadInfo::default(),
                })
            }
            Err(_elapsed) => {
                warn!(session_id, "command timed out");
                AgentFrame::CommandResponse(CommandResponseFrame {
                    command_id,
                    session_id,
                    success: false,
                    status: "failed".to_string(),
                    error: Some("operation timed out".to_string()),
                    workload: WorkloadInfo::default(),
                })
            }
        }
    }

    /// Idempotent: a workload already carrying `session_id`'s label is
    /// reused rather than recreated.
    async fn start_session(&self, action: StartSessionAction) -> DriverResult<WorkloadInfo> {
        self.driver.ensure_network(&self.network).await?;

        let workload_id = match self.driver.find_by_session(&action.session_id).await? {
            Some(id) => id,
            None => {
                let image = action
                    .template_manifest
                    .get("image")
                    .and_then(|v| v.as_str())
                    .unwrap_or(&action.template)
                    .to_string();
                self.driver
                    .create_workload(CreateWorkloadRequest {
                        session_id: action.session_id.clone(),
                        image,
                        limits: ResourceLimits {
                            memory: action.memory.clone(),
                            cpu: action.cpu.clone(),
                        },
                        env: Default::default(),
                        mounts: Vec::new(),
                        network: self.network.clone(),
                    })
                    .await?
            }
        };

        match self.driver.start_workload(&workload_id).await {
            Ok(()) | Err(DriverError::StateConflict(_)) => {}
            Err(e) => return Err(e),
        }

        let running = self.driver.wait_running(&workload_id, WaitDeadline::default()).await?;
        Ok(WorkloadInfo {
            workload_id: Some(workload_id.0),
            url: running.address,
            ..Default::default()
        })
    }

    /// Non-fatal if the workload is already gone; the control plane's
    /// session is being torn down regardless.
    async fn stop_session(&self, action: StopSessionAction) -> DriverResult<WorkloadInfo> {
        match self.driver.find_by_session(&action.session_id).await? {
            Some(id) => {
                if let Err(e) = self.driver.stop_workload(&id).await {
                    warn!(session_id = %action.session_id, error = %e, "stop_workload failed, removing anyway");
                }
                self.driver.remove_workload(&id).await?;
            }
            None => {
                warn!(session_id = %action.session_id, "stop_session: workload already gone");
            }
        }
        Ok(WorkloadInfo::default())
    }

    async fn hibernate_session(&self, action: HibernateSessionAction) -> DriverResult<WorkloadInfo> {
        let workload_id = self
            .driver
            .find_by_session(&action.session_id)
            .await?
            .ok_or_else(|| DriverError::NotFound(action.session_id.clone()))?;
        self.driver.scale(&workload_id, 0).await?;
        Ok(WorkloadInfo {
            workload_id: Some(workload_id.0),
            ..Default::default()
        })
    }

    async fn wake_session(&self, action: WakeSessionAction) -> DriverResult<WorkloadInfo> {
        let workload_id = self
            .driver
            .find_by_session(&action.session_id)
            .await?
            .ok_or_else(|| DriverError::NotFound(action.session_id.clone()))?;
        self.driver.scale(&workload_id, 1).await?;
        let running = self.driver.wait_running(&workload_id, WaitDeadline::default()).await?;
        Ok(WorkloadInfo {
            workload_id: Some(workload_id.0),
            url: running.address,
            ..Default::default()
        })
    }

    /// Reconciliation hook: the control plane calls this after a restart
    /// to learn whether a session it has no fresh state for still has a
    /// live workload underneath it.
    async fn get_session_status(&self, action: GetSessionStatusAction) -> DriverResult<WorkloadInfo> {
        let workload_id = self
            .driver
            .find_by_session(&action.session_id)
            .await?
            .ok_or_else(|| DriverError::NotFound(action.session_id.clone()))?;
        let running = self
            .driver
            .wait_running(&workload_id, WaitDeadline(Duration::from_secs(5)))
            .await?;
        Ok(WorkloadInfo {
            workload_id: Some(workload_id.0),
            url: running.address,
            ..Default::default()
        })
    }
}
