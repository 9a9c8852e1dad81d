//! CLI surface for the control plane binary.
//!
//! Every flag doubles as an environment variable (`STREAMSPACE_CP_*`) so the
//! binary runs unmodified under an orchestrator that injects env rather than
//! argv.

use std::time::Duration;

use clap::Parser;

#[derive(Debug, Parser, Clone)]
#[command(
    name = "streamspace-control-plane",
    author,
    version,
    about = "StreamSpace control plane: session state authority and agent fabric hub."
)]
pub struct ControlPlaneConfig {
    /// Address the HTTP/WebSocket listener binds to.
    #[arg(long, env = "STREAMSPACE_CP_BIND_ADDR", default_value = "0.0.0.0:7800")]
    pub bind_addr: String,

    /// SQLite database file. `:memory:` is accepted for tests and demos but
    /// loses all state on restart.
    #[arg(long, env = "STREAMSPACE_CP_DATABASE_PATH", default_value = "streamspace.db")]
    pub database_path: String,

    /// Worker pool size for the per-session command dispatcher.
    #[arg(long, env = "STREAMSPACE_CP_DISPATCHER_WORKERS", default_value_t = 10)]
    pub dispatcher_workers: usize,

    /// Maximum in-flight (not yet acknowledged) commands before `enqueue`
    /// starts rejecting new work.
    #[arg(long, env = "STREAMSPACE_CP_QUEUE_CAPACITY", default_value_t = 1000)]
    pub queue_capacity: usize,

    /// Grace period, in seconds, a session may sit in a transitional state
    /// before startup recovery treats it as stuck.
    #[arg(long, env = "STREAMSPACE_CP_RECOVERY_GRACE_SECONDS", default_value_t = 60)]
    pub recovery_grace_seconds: i64,

    /// Age, in seconds, past which a "sent" command is considered stale and
    /// eligible for re-dispatch.
    #[arg(long, env = "STREAMSPACE_CP_STALE_SENT_SECONDS", default_value_t = 30)]
    pub stale_sent_seconds: u64,

    /// How often the hub connection reaper sweeps for silent agent sockets.
    #[arg(long, env = "STREAMSPACE_CP_HUB_REAP_INTERVAL_SECONDS", default_value_t = 30)]
    pub hub_reap_interval_seconds: u64,

    /// Age past which a hub connection with no ping is evicted.
    #[arg(long, env = "STREAMSPACE_CP_HUB_REAP_DEADLINE_SECONDS", default_value_t = 90)]
    pub hub_reap_deadline_seconds: u64,

    /// How often the client connection tracker sweeps for dead heartbeats.
    #[arg(long, env = "STREAMSPACE_CP_TRACKER_REAP_INTERVAL_SECONDS", default_value_t = 30)]
    pub tracker_reap_interval_seconds: u64,

    /// Age past which a tracked client connection is considered dead.
    #[arg(long, env = "STREAMSPACE_CP_TRACKER_REAP_DEADLINE_SECONDS", default_value_t = 90)]
    pub tracker_reap_deadline_seconds: u64,

    /// How often the agent heartbeat reaper marks silent agents offline.
    #[arg(long, env = "STREAMSPACE_CP_AGENT_REAP_INTERVAL_SECONDS", default_value_t = 30)]
    pub agent_reap_interval_seconds: u64,

    /// Age, in seconds, past which an agent's last heartbeat is considered
    /// stale.
    #[arg(long, env = "STREAMSPACE_CP_AGENT_REAP_DEADLINE_SECONDS", default_value_t = 90)]
    pub agent_reap_deadline_seconds: i64,

    /// Emit logs as JSON instead of the default human-readable format.
    #[arg(long, env = "STREAMSPACE_CP_LOG_JSON", default_value_t = false)]
    pub log_json: bool,
}

impl ControlPlaneConfig {
    pub fn stale_sent_after(&self) -> Duration {
        Duration::from_secs(self.stale_sent_seconds)
    }

    pub fn hub_reap_interval(&self) -> Duration {
        Duration::from_secs(self.hub_reap_interval_seconds)
    }

    pub fn hub_reap_deadline(&self) -> Duration {
        Duration::from_secs(self.hub_reap_deadline_seconds)
    }

    pub fn tracker_reap_interval(&self) -> Duration {
        Duration::from_secs(self.tracker_reap_interval_seconds)
    }

    pub fn tracker_reap_deadline(&self) -> Duration {
        Duration::from_secs(self.tracker_reap_deadline_seconds)
    }

    pub fn agent_reap_interval(&self) -> Duration {
        Duration::from_secs(self.agent_reap_interval_seconds)
    }
}

pub fn init_logging(json: bool) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("streamspace_control_plane=info,streamspace_core=info,streamspace_hub=info")
    });

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
