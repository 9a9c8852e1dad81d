//! Independently-rooted maintenance loops (spec.md §9: "two independent
//! contexts"): one-shot startup recovery, plus periodic reapers for the
//! in-memory state the durable store doesn't own (hub connections, client
//! connection tracking, stale agent heartbeats).

use std::time::Duration;

use tracing::{info, warn};

use crate::state::AppState;

/// Runs once at startup before the HTTP listener accepts connections:
/// reconciles transitional sessions left over from a prior process and
/// re-dispatches commands stuck mid-flight.
pub async fn run_startup_recovery(state: &AppState, grace_seconds: i64, stale_sent_after: Duration) {
    match state.engine.recover(grace_seconds).await {
        Ok(commands) => {
            let count = commands.len();
            for command in commands {
                state.dispatcher.notify(command);
            }
            if count > 0 {
                info!(reissued = count, "recovered transitional sessions on startup");
            }
        }
        Err(err) => warn!(error = %err, "startup session recovery failed"),
    }

    match state.dispatcher.recover(stale_sent_after).await {
        Ok(count) if count > 0 => info!(count, "recovered stale in-flight commands on startup"),
        Ok(_) => {}
        Err(err) => warn!(error = %err, "startup dispatcher recovery failed"),
    }
}

/// Evicts agent hub connections that have gone silent past `deadline` and
/// marks the owning agent offline, on a fixed interval for the lifetime of
/// the process.
pub fn spawn_hub_reaper(state: AppState, interval: Duration, deadline: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let evicted = state.hub.reap(deadline).await;
            if !evicted.is_empty() {
                info!(count = evicted.len(), agents = ?evicted, "reaped stale agent connections");
            }
        }
    });
}

/// Evicts client connection-tracker entries that stopped heartbeating, on a
/// fixed interval.
pub fn spawn_tracker_reaper(state: AppState, interval: Duration, deadline: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let emptied = state.tracker.reap(deadline);
            if !emptied.is_empty() {
                info!(count = emptied.len(), sessions = ?emptied, "reaped client connections, sessions now empty");
            }
        }
    });
}

/// Marks agents offline whose heartbeat row has gone stale past `deadline`,
/// catching agents whose socket never cleanly closed.
pub fn spawn_agent_reaper(state: AppState, interval: Duration, deadline_seconds: i64) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            match state.agents.reap_stale(deadline_seconds).await {
                Ok(reaped) if !reaped.is_empty() => {
                    info!(count = reaped.len(), agents = ?reaped, "marked stale agents offline");
                }
                Ok(_) => {}
                Err(err) => warn!(error = %err, "agent reap sweep failed"),
            }
        }
    });
}
