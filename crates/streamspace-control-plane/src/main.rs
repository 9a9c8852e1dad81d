mod background;
mod config;
mod error;
mod handlers;
mod routes;
mod state;

use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use streamspace_core::agent::repository::AgentRepository;
use streamspace_core::command::repository::CommandRepository;
use streamspace_core::session::engine::SessionEngine;
use streamspace_core::session::repository::SessionRepository;
use streamspace_core::tracker::ConnectionTracker;
use streamspace_core::Database;
use streamspace_hub::{AgentHub, Dispatcher};
use tracing::info;

use crate::config::{init_logging, ControlPlaneConfig};
use crate::state::AppState;

fn main() -> anyhow::Result<()> {
    let config = ControlPlaneConfig::parse();
    init_logging(config.log_json);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(async_main(config))
}

async fn async_main(config: ControlPlaneConfig) -> anyhow::Result<()> {
    let db = Database::connect(Path::new(&config.database_path)).await?;
    let pool = db.pool().clone();

    let sessions = SessionRepository::new(pool.clone());
    let commands = CommandRepository::new(pool.clone());
    let agents = AgentRepository::new(pool.clone());

    let engine = Arc::new(SessionEngine::new(sessions, commands.clone(), agents.clone()));
    let hub = AgentHub::new(agents.clone());
    let dispatcher = Arc::new(Dispatcher::with_config(
        commands,
        hub.clone(),
        config.dispatcher_workers,
        config.queue_capacity,
    ));
    let tracker = ConnectionTracker::new();

    let state = AppState::new(engine, hub, dispatcher, tracker, agents);

    background::run_startup_recovery(&state, config.recovery_grace_seconds, config.stale_sent_after()).await;
    background::spawn_hub_reaper(state.clone(), config.hub_reap_interval(), config.hub_reap_deadline());
    background::spawn_tracker_reaper(
        state.clone(),
        config.tracker_reap_interval(),
        config.tracker_reap_deadline(),
    );
    background::spawn_agent_reaper(
        state.clone(),
        config.agent_reap_interval(),
        config.agent_reap_deadline_seconds,
    );

    let router = routes::create_router(state);
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!(addr = %config.bind_addr, "streamspace-control-plane listening");

    axum::serve(listener, router).await?;
    Ok(())
}
