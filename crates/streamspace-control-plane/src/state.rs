//! Application state shared across handlers (grounded in the teacher's
//! `api::state::AppState`): `Arc`-wrapped services, cheap to clone per
//! request.

use std::sync::Arc;

use streamspace_core::agent::repository::AgentRepository;
use streamspace_core::session::engine::SessionEngine;
use streamspace_core::tracker::ConnectionTracker;
use streamspace_hub::{AgentHub, Dispatcher};

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<SessionEngine>,
    pub hub: Arc<AgentHub>,
    pub dispatcher: Arc<Dispatcher>,
    pub tracker: Arc<ConnectionTracker>,
    pub agents: AgentRepository,
}

impl AppState {
    pub fn new(
        engine: Arc<SessionEngine>,
        hub: Arc<AgentHub>,
        dispatcher: Arc<Dispatcher>,
        tracker: Arc<ConnectionTracker>,
        agents: AgentRepository,
    ) -> Self {
        Self {
            engine,
            hub,
            dispatcher,
            tracker,
            agents,
        }
    }
}
