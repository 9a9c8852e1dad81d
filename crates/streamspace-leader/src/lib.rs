//! Pluggable HA leader election for agent replicas (spec.md §4.2).
//!
//! Given a stable `agent_id`, ensures at most one replica sharing that
//! id is in the leader state at any wall-clock moment. Backends are
//! variants of one interface (`campaign`, `renew`, `resign`, and a
//! blocking leadership-change stream) so the agent runtime never leaks
//! backend-specific types (spec.md §9 "Pluggable leader election").

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio_stream::wrappers::WatchStream;

#[cfg(feature = "file")]
pub mod file;
#[cfg(feature = "orchestrator")]
pub mod orchestrator;
#[cfg(feature = "redis-backend")]
pub mod redis_backend;

#[derive(Debug, Error)]
pub enum ElectionError {
    #[error("lock contended: {0}")]
    Contended(String),

    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("not currently leader")]
    NotLeader,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type ElectionResult<T> = Result<T, ElectionError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeadershipState {
    Leader,
    Standby,
}

/// Renewal/failover timings shared by every backend (spec.md §4.2
/// "Timings"): renewal period should be at most a third of the lease
/// TTL, and a standby retries on an interval shorter than the TTL.
#[derive(Debug, Clone, Copy)]
pub struct ElectionTimings {
    pub ttl: Duration,
    pub renew_interval: Duration,
    pub retry_interval: Duration,
}

impl ElectionTimings {
    pub fn for_ttl(ttl: Duration) -> Self {
        Self {
            ttl,
            renew_interval: ttl / 3,
            retry_interval: ttl / 2,
        }
    }
}

impl Default for ElectionTimings {
    fn default() -> Self {
        Self::for_ttl(Duration::from_secs(10))
    }
}

/// One interface, three backends (file / Redis / orchestrator-native).
/// `campaign` blocks until this replica acquires leadership or the
/// provided cancellation observes a shutdown; `renew` must be called on
/// `renew_interval` by the caller while leading; `resign` releases
/// leadership promptly so `on_lose_leadership`'s 500 ms budget (spec.md
/// §4.2) is achievable.
#[async_trait]
pub trait LeaderElection: Send + Sync {
    /// Attempt to become leader for `agent_id`. Returns once this
    /// replica holds the lease; callers retry on `Contended` using
    /// `timings.retry_interval`.
    async fn campaign(&self, agent_id: &str) -> ElectionResult<()>;

    /// Renew the lease. Must be called before `timings.ttl` elapses.
    async fn renew(&self, agent_id: &str) -> ElectionResult<()>;

    /// Give up leadership voluntarily (graceful shutdown).
    async fn resign(&self, agent_id: &str) -> ElectionResult<()>;

    /// A stream of leadership transitions this replica observes for
    /// `agent_id`, for runtimes that prefer to react rather than poll.
    fn observe_leadership_change(&self, agent_id: &str) -> WatchStream<LeadershipState>;
}

/// Drives `campaign`/`renew` on an owned background loop and invokes the
/// callback pair the spec requires: `on_become_leader` /
/// `on_lose_leadership`. This is the piece the agent runtime actually
/// embeds; backends only implement [`LeaderElection`].
pub struct LeadershipDriver<E: LeaderElection> {
    election: E,
    timings: ElectionTimings,
}

impl<E: LeaderElection> LeadershipDriver<E> {
    pub fn new(election: E, timings: ElectionTimings) -> Self {
        Self { election, timings }
    }

    /// Runs until `shutdown` resolves. `on_become_leader` and
    /// `on_lose_leadership` are invoked on every transition; the
    /// runtime's side of spec.md §4.2's invariants (stop issuing
    /// outbound messages within 500 ms of losing leadership; finish
    /// registration before accepting commands after becoming leader) is
    /// the caller's responsibility inside those callbacks.
    pub async fn run<F1, F2>(
        &self,
        agent_id: &str,
        mut on_become_leader: F1,
        mut on_lose_leadership: F2,
        mut shutdown: tokio::sync::oneshot::Receiver<()>,
    ) -> ElectionResult<()>
    where
        F1: FnMut() + Send,
        F2: FnMut() + Send,
    {
        let mut is_leader = false;

        loop {
            if !matches!(shutdown.try_recv(), Err(tokio::sync::oneshot::error::TryRecvError::Empty)) {
                if is_leader {
                    self.election.resign(agent_id).await.ok();
                }
                return Ok(());
            }

            if !is_leader {
                match self.election.campaign(agent_id).await {
                    Ok(()) => {
                        is_leader = true;
                        on_become_leader();
                    }
                    Err(ElectionError::Contended(_)) => {
                        tokio::select! {
                            _ = tokio::time::sleep(self.timings.retry_interval) => continue,
                            _ = &mut shutdown => return Ok(()),
                        }
                    }
                    Err(e) => return Err(e),
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.timings.renew_interval) => {
                    if let Err(e) = self.election.renew(agent_id).await {
                        tracing::warn!(agent_id, error = %e, "lost leadership lease");
                        is_leader = false;
                        on_lose_leadership();
                    }
                }
                _ = &mut shutdown => {
                    if is_leader {
                        self.election.resign(agent_id).await.ok();
                    }
                    return Ok(());
                }
            }
        }
    }
}
