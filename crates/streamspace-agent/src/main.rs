//! `streamspace-agent`: the outbound long-lived connection to the control
//! plane, command intake, and local execution against a host driver
//! (spec.md §4.3, §6.4).

mod config;
mod connection;
mod error;
mod handlers;
mod registration;
mod runtime;

use std::sync::Arc;

use clap::Parser;
use streamspace_driver::HostDriver;
#[cfg(feature = "kubernetes")]
use streamspace_driver::{KubernetesDriver, KubernetesDriverConfig};
use streamspace_driver::DockerDriver;
use tracing::{error, info};

use crate::config::{AgentConfig, Platform};
use crate::runtime::AgentRuntime;

fn main() {
    let config = AgentConfig::parse();
    config::init_logging(config.log_json);

    let rt = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("failed to start async runtime: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = rt.block_on(run(config)) {
        error!(error = %e, "agent exited with error");
        std::process::exit(1);
    }
}

async fn run(config: AgentConfig) -> anyhow::Result<()> {
    info!(
        agent_id = %config.agent_id,
        platform = config.platform.as_str(),
        control_plane_url = %config.control_plane_url,
        "starting streamspace-agent"
    );

    let driver = build_driver(&config).await?;
    driver.ensure_network(&config.network).await?;

    let runtime = AgentRuntime::new(config, driver);
    runtime.run().await
}

async fn build_driver(config: &AgentConfig) -> anyhow::Result<Arc<dyn HostDriver>> {
    match config.platform {
        Platform::Docker => Ok(Arc::new(DockerDriver::auto_detect())),
        Platform::Podman => Ok(Arc::new(DockerDriver::new(
            streamspace_driver::DockerDriverConfig {
                engine: streamspace_driver::ContainerEngine::Podman,
                binary: "podman".to_string(),
            },
        ))),
        #[cfg(feature = "kubernetes")]
        Platform::Kubernetes => {
            let namespace = config.cluster_id.clone().unwrap_or_else(|| "default".to_string());
            let driver = KubernetesDriver::connect(KubernetesDriverConfig { namespace }).await?;
            Ok(Arc::new(driver))
        }
        #[cfg(not(feature = "kubernetes"))]
        Platform::Kubernetes => {
            anyhow::bail!("this build was compiled without the `kubernetes` feature")
        }
    }
}
