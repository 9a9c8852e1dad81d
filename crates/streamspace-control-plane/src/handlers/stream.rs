//! `GET /api/agents/stream?agentId=` (spec.md §6.1): the single bidirectional
//! connection an agent replica holds open for the lifetime of its process.
//! Mirrors the teacher's `ws::handler::handle_ws_connection` split: one
//! write pump draining a per-agent channel, one read loop parsing inbound
//! frames, both torn down together on either side closing.

use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use streamspace_core::session::engine::CommandOutcome;
use streamspace_protocol::{AgentFrame, MAX_FRAME_BYTES};
use tracing::{debug, info, warn};

use crate::state::AppState;

/// Interval on which the control plane pings an idle agent connection.
/// Comfortably inside the agent's own read deadline so a quiet but healthy
/// link never gets mistaken for a dead one.
const PING_INTERVAL_SECS: u64 = 45;

#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    #[serde(rename = "agentId")]
    agent_id: String,
}

pub async fn stream_handler(
    State(state): State<AppState>,
    Query(query): Query<StreamQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let agent_id = query.agent_id;
    ws.on_upgrade(move |socket| handle_agent_connection(socket, state, agent_id))
}

async fn handle_agent_connection(socket: WebSocket, state: AppState, agent_id: String) {
    let mut outbound = match state.hub.register(&agent_id).await {
        Ok(rx) => rx,
        Err(err) => {
            warn!(%agent_id, error = %err, "rejecting agent stream registration");
            return;
        }
    };
    info!(%agent_id, "agent stream connected");

    let (mut sender, mut receiver) = socket.split();

    let write_agent_id = agent_id.clone();
    let write_task = tokio::spawn(async move {
        let mut ping_interval = tokio::time::interval(Duration::from_secs(PING_INTERVAL_SECS));
        ping_interval.tick().await;

        loop {
            tokio::select! {
                frame = outbound.recv() => {
                    let Some(frame) = frame else { break };
                    let json = match serde_json::to_string(&frame) {
                        Ok(j) => j,
                        Err(err) => {
                            warn!(agent_id = %write_agent_id, error = %err, "failed to serialize control frame");
                            continue;
                        }
                    };
                    if sender.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                }
                _ = ping_interval.tick() => {
                    if sender.send(Message::Text(r#"{"type":"ping"}"#.into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    while let Some(msg) = receiver.next().await {
        let msg = match msg {
            Ok(msg) => msg,
            Err(err) => {
                warn!(%agent_id, error = %err, "agent stream error");
                break;
            }
        };

        match msg {
            Message::Text(text) => {
                if text.len() > MAX_FRAME_BYTES {
                    warn!(%agent_id, size = text.len(), "agent frame exceeds max size, closing connection");
                    break;
                }
                match serde_json::from_str::<AgentFrame>(&text) {
                    Ok(frame) => handle_agent_frame(&state, &agent_id, frame).await,
                    Err(err) => warn!(%agent_id, error = %err, "failed to parse agent frame"),
                }
            }
            Message::Binary(data) => {
                if data.len() > MAX_FRAME_BYTES {
                    warn!(%agent_id, size = data.len(), "agent frame exceeds max size, closing connection");
                    break;
                }
                debug!(%agent_id, "ignoring binary frame from agent");
            }
            Message::Ping(_) | Message::Pong(_) => {
                state.hub.touch_ping(&agent_id);
            }
            Message::Close(_) => {
                info!(%agent_id, "agent closed stream");
                break;
            }
        }
    }

    write_task.abort();
    if let Err(err) = state.hub.unregister(&agent_id).await {
        warn!(%agent_id, error = %err, "failed to unregister agent on disconnect");
    }
    info!(%agent_id, "agent stream disconnected");
}

async fn handle_agent_frame(state: &AppState, agent_id: &str, frame: AgentFrame) {
    match frame {
        AgentFrame::Heartbeat(hb) => {
            state.hub.touch_ping(agent_id);
            if let Err(err) = state.agents.touch_heartbeat(agent_id).await {
                warn!(%agent_id, error = %err, "failed to record heartbeat");
            }
            debug!(%agent_id, active_sessions = hb.active_sessions, status = ?hb.status, "heartbeat");
        }
        AgentFrame::Pong(_) => {
            state.hub.touch_ping(agent_id);
        }
        AgentFrame::ShutdownAck(_) => {
            info!(%agent_id, "agent acknowledged shutdown");
        }
        AgentFrame::CommandResponse(resp) => {
            let outcome = CommandOutcome {
                command_id: resp.command_id.clone(),
                success: resp.success,
                error: resp.error.clone(),
                workload: resp.workload.clone(),
            };
            if let Err(err) = state.engine.apply_command_result(outcome).await {
                warn!(agent_id = %agent_id, command_id = %resp.command_id, error = %err, "failed to apply command result");
            }
        }
        AgentFrame::CommandError(err_frame) => {
            let outcome = CommandOutcome {
                command_id: err_frame.command_id.clone(),
                success: false,
                error: Some(err_frame.error.clone()),
                workload: Default::default(),
            };
            if let Err(err) = state.engine.apply_command_result(outcome).await {
                warn!(agent_id = %agent_id, command_id = %err_frame.command_id, error = %err, "failed to apply command error");
            }
        }
    }
}
