//! The Agent Hub and Command Dispatcher (spec.md §4.4, §4.5).
//!
//! `streamspace-hub` is the control-plane-side transport layer sitting
//! between `streamspace-core`'s durable state and the wire: it tracks
//! which agents are actually connected, gives callers a single-writer
//! outbound channel per agent, and drains `agent_commands` rows onto
//! those channels with same-session ordering. It never owns a socket
//! itself — the control-plane binary's axum WebSocket handler is the
//! read/write pump that calls into [`AgentHub`], the same split the
//! teacher draws between `ws::hub::WsHub` (registry) and
//! `ws::handler` (the actual pumps).

mod dispatcher;
mod error;
mod hub;

pub use dispatcher::Dispatcher;
pub use error::{HubError, HubResult};
pub use hub::AgentHub;
