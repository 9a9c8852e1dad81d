//! WebSocket transport: one read pump, one write pump, single writer.
//!
//! The write pump is the only task that ever calls `.send()` on the
//! socket — every outbound frame, heartbeat included, goes through the
//! same `mpsc::Sender<AgentFrame>` so ordering on the wire matches
//! enqueue order. The read pump owns the socket's read half exclusively
//! and treats a read timeout the same as a read error: the connection is
//! presumed dead and both pumps tear down.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use streamspace_protocol::{AgentFrame, ControlFrame, MAX_FRAME_BYTES};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::warn;

use crate::error::AgentResult;

/// No frame observed in this long means the control plane is gone even if
/// the TCP socket hasn't noticed yet.
const READ_DEADLINE: Duration = Duration::from_secs(60);
/// A single outbound frame must land on the wire within this long or the
/// connection is considered stuck.
const WRITE_DEADLINE: Duration = Duration::from_secs(10);
const OUTBOUND_BUFFER: usize = 256;
const INBOUND_BUFFER: usize = 64;

pub struct ConnectionHandles {
    pub outbound_tx: mpsc::Sender<AgentFrame>,
    pub inbound_rx: mpsc::Receiver<ControlFrame>,
    /// Resolves once either pump has torn down.
    pub closed: oneshot::Receiver<()>,
}

fn to_ws_url(control_plane_url: &str, agent_id: &str) -> String {
    let swapped = if let Some(rest) = control_plane_url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = control_plane_url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        control_plane_url.to_string()
    };
    format!("{}/api/agents/stream?agentId={}", swapped.trim_end_matches('/'), agent_id)
}

pub async fn connect(
    control_plane_url: &str,
    agent_id: &str,
) -> AgentResult<WebSocketStream<MaybeTlsStream<TcpStream>>> {
    let url = to_ws_url(control_plane_url, agent_id);
    let (stream, _response) = tokio_tungstenite::connect_async(url).await?;
    Ok(stream)
}

/// Splits `ws` into read/write halves and spawns the two pumps. Returns
/// immediately; the caller drives the connection through the returned
/// channels until `closed` resolves.
pub fn spawn_pumps(ws: WebSocketStream<MaybeTlsStream<TcpStream>>) -> ConnectionHandles {
    let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_BUFFER);
    let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_BUFFER);
    let (closed_tx, closed_rx) = oneshot::channel();
    let (write, read) = ws.split();

    tokio::spawn(write_pump(write, outbound_rx));
    tokio::spawn(async move {
        read_pump(read, inbound_tx).await;
        let _ = closed_tx.send(());
    });

    ConnectionHandles {
        outbound_tx,
        inbound_rx,
        closed: closed_rx,
    }
}

async fn write_pump(
    mut write: futures::stream::SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>,
    mut outbound_rx: mpsc::Receiver<AgentFrame>,
) {
    while let Some(frame) = outbound_rx.recv().await {
        let text = match serde_json::to_string(&frame) {
            Ok(t) => t,
            Err(e) => {
                warn!(error = %e, "failed to encode outbound frame, dropping");
                continue;
            }
        };
        match tokio::time::timeout(WRITE_DEADLINE, write.send(Message::Text(text.into()))).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(error = %e, "write pump send failed, closing connection");
                break;
            }
            Err(_elapsed) => {
                warn!("write deadline exceeded, closing connection");
                break;
            }
        }
    }
    let _ = write.close().await;
}

async fn read_pump(
    mut read: futures::stream::SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>,
    inbound_tx: mpsc::Sender<ControlFrame>,
) {
    loop {
        let next = tokio::time::timeout(READ_DEADLINE, read.next()).await;
        match next {
            Ok(Some(Ok(Message::Text(text)))) => {
                if text.len() > MAX_FRAME_BYTES {
                    warn!(bytes = text.len(), "inbound frame exceeds limit, closing connection");
                    break;
                }
                match serde_json::from_str::<ControlFrame>(&text) {
                    Ok(frame) => {
                        if inbound_tx.send(frame).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!(error = %e, "malformed control frame, ignoring"),
                }
            }
            Ok(Some(Ok(Message::Close(_)))) | Ok(None) => break,
            Ok(Some(Ok(_))) => continue,
            Ok(Some(Err(e))) => {
                warn!(error = %e, "websocket read error, closing connection");
                break;
            }
            Err(_elapsed) => {
                warn!("no frame within read deadline, treating connection as dead");
                break;
            }
        }
    }
}
