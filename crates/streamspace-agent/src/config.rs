//! CLI surface for the agent binary.
//!
//! Every flag doubles as an environment variable (`STREAMSPACE_AGENT_*`) so
//! the binary runs unmodified under an orchestrator that injects env rather
//! than argv.

use std::time::Duration;

use clap::{Parser, ValueEnum};

#[derive(Debug, Parser, Clone)]
#[command(
    name = "streamspace-agent",
    author,
    version,
    about = "StreamSpace agent runtime: drives a host substrate on behalf of the control plane."
)]
pub struct AgentConfig {
    /// Stable identity this replica registers and streams under. Shared
    /// across every HA replica of the same agent.
    #[arg(long, env = "STREAMSPACE_AGENT_ID")]
    pub agent_id: String,

    /// Base URL (http/https) of the control plane.
    #[arg(long, env = "STREAMSPACE_CONTROL_PLANE_URL")]
    pub control_plane_url: String,

    /// Host substrate this agent drives.
    #[arg(long, env = "STREAMSPACE_PLATFORM", value_enum, default_value_t = Platform::Docker)]
    pub platform: Platform,

    #[arg(long, env = "STREAMSPACE_REGION")]
    pub region: Option<String>,

    #[arg(long, env = "STREAMSPACE_CLUSTER_ID")]
    pub cluster_id: Option<String>,

    /// Network name passed to `HostDriver::ensure_network` / `create_workload`.
    #[arg(long, env = "STREAMSPACE_NETWORK", default_value = "streamspace")]
    pub network: String,

    #[arg(long, env = "STREAMSPACE_MAX_CPU", default_value = "4000m")]
    pub max_cpu: String,

    #[arg(long, env = "STREAMSPACE_MAX_MEMORY", default_value = "8Gi")]
    pub max_memory: String,

    #[arg(long, env = "STREAMSPACE_MAX_SESSIONS", default_value_t = 20)]
    pub max_sessions: u32,

    /// Heartbeat cadence, in seconds.
    #[arg(long, env = "STREAMSPACE_HEARTBEAT_INTERVAL", default_value_t = 30)]
    pub heartbeat_interval: u64,

    #[arg(long, env = "STREAMSPACE_API_KEY")]
    pub api_key: Option<String>,

    /// Run multiple replicas of this agent id behind a leader election.
    #[arg(long, env = "STREAMSPACE_ENABLE_HA", default_value_t = false)]
    pub enable_ha: bool,

    #[arg(long, env = "STREAMSPACE_LEADER_ELECTION_BACKEND", value_enum, default_value_t = LeaderBackend::File)]
    pub leader_election_backend: LeaderBackend,

    #[arg(long, env = "STREAMSPACE_LOCK_FILE_PATH", default_value = "/var/run/streamspace/agent.lock")]
    pub lock_file_path: String,

    #[arg(long, env = "STREAMSPACE_REDIS_URL")]
    pub redis_url: Option<String>,

    /// Emit logs as JSON instead of the default human-readable format.
    #[arg(long, env = "STREAMSPACE_LOG_JSON", default_value_t = false)]
    pub log_json: bool,
}

impl AgentConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "lowercase")]
pub enum Platform {
    Docker,
    Podman,
    Kubernetes,
}

impl Platform {
    pub fn as_str(self) -> &'static str {
        match self {
            Platform::Docker => "docker",
            Platform::Podman => "podman",
            Platform::Kubernetes => "kubernetes",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "kebab-case")]
pub enum LeaderBackend {
    File,
    Redis,
    Orchestrator,
}

pub fn init_logging(json: bool) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("streamspace_agent=info,streamspace_driver=info,streamspace_leader=info"));

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
            .ok();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init()
            .ok();
    }
}
