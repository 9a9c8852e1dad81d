//! Docker/Podman host driver: shells out to the container CLI.
//!
//! Mirrors the CLI-wrapping approach of container runtimes elsewhere in
//! this codebase: build an argument vector, run it, parse stdout. No
//! bindings to the daemon's HTTP API — this keeps the driver usable with
//! either `docker` or `podman` without a feature flag per backend.

use std::process::Stdio;
use std::time::Instant;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::time::{sleep, Duration};
use tracing::{debug, warn};

use crate::driver::HostDriver;
use crate::types::{
    CreateWorkloadRequest, DriverError, DriverResult, RunningWorkload, WaitDeadline, WorkloadId,
    WorkloadState,
};

const SESSION_LABEL: &str = "streamspace.session_id";

/// Which CLI binary fronts the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerEngine {
    Docker,
    Podman,
}

impl ContainerEngine {
    fn binary(self) -> &'static str {
        match self {
            ContainerEngine::Docker => "docker",
            ContainerEngine::Podman => "podman",
        }
    }

    fn needs_selinux_label(self) -> bool {
        matches!(self, ContainerEngine::Podman)
    }
}

#[derive(Debug, Clone)]
pub struct DockerDriverConfig {
    pub engine: ContainerEngine,
    pub binary: String,
}

impl Default for DockerDriverConfig {
    fn default() -> Self {
        Self {
            engine: ContainerEngine::Docker,
            binary: ContainerEngine::Docker.binary().to_string(),
        }
    }
}

/// Host driver backed by the `docker`/`podman` CLI.
pub struct DockerDriver {
    config: DockerDriverConfig,
}

impl DockerDriver {
    pub fn new(config: DockerDriverConfig) -> Self {
        Self { config }
    }

    pub fn auto_detect() -> Self {
        Self::new(DockerDriverConfig::default())
    }

    async fn run(&self, args: &[String]) -> DriverResult<String> {
        let output = Command::new(&self.config.binary)
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| DriverError::CommandFailed(e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(DriverError::CommandFailed(stderr));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[async_trait]
impl HostDriver for DockerDriver {
    async fn ensure_network(&self, name: &str) -> DriverResult<()> {
        let exists = self
            .run(&["network".into(), "inspect".into(), name.into()])
            .await
            .is_ok();
        if exists {
            return Ok(());
        }

        self.run(&["network".into(), "create".into(), name.into()])
            .await
            .map(|_| ())
            .or_else(|e| {
                // Two drivers racing to create the same network both see
                // "already exists" from the CLI; treat that as success.
                if e.to_string().contains("already exists") {
                    Ok(())
                } else {
                    Err(DriverError::NetworkUnreachable(e.to_string()))
                }
            })
    }

    async fn create_workload(&self, req: CreateWorkloadRequest) -> DriverResult<WorkloadId> {
        let mut args = vec!["create".to_string()];
        args.push("--label".into());
        args.push(format!("{}={}", SESSION_LABEL, req.session_id));
        args.push("--network".into());
        args.push(req.network.clone());

        if !req.limits.memory.is_empty() {
            args.push("--memory".into());
            args.push(req.limits.memory.clone());
        }
        if !req.limits.cpu.is_empty() {
            args.push("--cpus".into());
            args.push(req.limits.cpu.clone());
        }

        for mount in &req.mounts {
            args.push("-v".into());
            if self.config.engine.needs_selinux_label() {
                args.push(format!("{}:{}:Z", mount.host_path, mount.container_path));
            } else {
                args.push(format!("{}:{}", mount.host_path, mount.container_path));
            }
        }

        for (key, value) in &req.env {
            args.push("-e".into());
            args.push(format!("{}={}", key, value));
        }

        args.push(req.image.clone());

        let id = self.run(&args).await.map_err(|e| {
            let msg = e.to_string();
            if msg.contains("pull") || msg.contains("No such image") {
                DriverError::ImagePullFailed(msg)
            } else if msg.contains("memory") || msg.contains("cpu") {
                DriverError::ResourceDenied(msg)
            } else {
                DriverError::CommandFailed(msg)
            }
        })?;

        Ok(WorkloadId(id))
    }

    async fn start_workload(&self, id: &WorkloadId) -> DriverResult<()> {
        self.run(&["start".into(), id.0.clone()])
            .await
            .map(|_| ())
            .map_err(|e| classify_missing(e, id))
    }

    async fn wait_running(&self, id: &WorkloadId, deadline: WaitDeadline) -> DriverResult<RunningWorkload> {
        let start = Instant::now();
        loop {
            let status = self
                .run(&[
                    "inspect".into(),
                    "--format".into(),
                    "{{.State.Status}}".into(),
                    id.0.clone(),
                ])
                .await?;

            match status.as_str() {
                "running" => {
                    let address = self
                        .run(&[
                            "inspect".into(),
                            "--format".into(),
                            "{{.NetworkSettings.IPAddress}}".into(),
                            id.0.clone(),
                        ])
                        .await
                        .ok()
                        .filter(|a| !a.is_empty());
                    return Ok(RunningWorkload { state: WorkloadState::Running, address });
                }
                "exited" | "dead" => {
                    return Err(DriverError::Crashed(format!("workload {} exited", id.0)));
                }
                _ => {}
            }

            if start.elapsed() >= deadline.0 {
                return Err(DriverError::Timeout);
            }
            sleep(Duration::from_millis(500)).await;
        }
    }

    async fn stop_workload(&self, id: &WorkloadId) -> DriverResult<()> {
        match self.run(&["stop".into(), id.0.clone()]).await {
            Ok(_) => Ok(()),
            Err(e) => Err(classify_missing(e, id)),
        }
    }

    async fn remove_workload(&self, id: &WorkloadId) -> DriverResult<()> {
        match self.run(&["rm".into(), "-f".into(), id.0.clone()]).await {
            Ok(_) => Ok(()),
            Err(e) if e.to_string().contains("No such container") => {
                debug!(workload = %id, "workload already removed");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn scale(&self, id: &WorkloadId, replicas: u32) -> DriverResult<()> {
        match replicas {
            0 => match self.stop_workload(id).await {
                Ok(()) => Ok(()),
                Err(DriverError::StateConflict(_)) => Ok(()),
                Err(e) => Err(e),
            },
            1 => match self.start_workload(id).await {
                Ok(()) => Ok(()),
                Err(DriverError::StateConflict(_)) => Ok(()),
                Err(e) => Err(e),
            },
            other => Err(DriverError::CommandFailed(format!(
                "unsupported replica count {other}, only 0/1 are valid for hibernate/wake"
            ))),
        }
    }

    async fn find_by_session(&self, session_id: &str) -> DriverResult<Option<WorkloadId>> {
        let output = self
            .run(&[
                "ps".into(),
                "-a".into(),
                "--filter".into(),
                format!("label={}={}", SESSION_LABEL, session_id),
                "--format".into(),
                "{{.ID}}".into(),
            ])
            .await?;

        let id = output.lines().next().map(|s| s.trim().to_string());
        match id {
            Some(id) if !id.is_empty() => Ok(Some(WorkloadId(id))),
            _ => Ok(None),
        }
    }
}

fn classify_missing(err: DriverError, id: &WorkloadId) -> DriverError {
    let msg = err.to_string();
    if msg.contains("No such container") {
        DriverError::NotFound(id.0.clone())
    } else if msg.contains("is already") || msg.contains("not running") {
        warn!(workload = %id, "driver reported state conflict: {msg}");
        DriverError::StateConflict(msg)
    } else {
        err
    }
}
