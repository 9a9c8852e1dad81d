//! Command Queue & Dispatcher (spec.md §4.5): drains durable
//! `agent_commands` rows over the Hub with same-session ordering and
//! at-least-once delivery.
//!
//! Ordering is implemented as one drain loop per session rather than a
//! flat worker pool racing a shared channel: a flat pool gives no way to
//! guarantee that command N for a session is *processed* before command
//! N+1 for the same session even if both are dequeued in order, since
//! two workers could pick them up concurrently. Keying the drain loop by
//! `session_id` and bounding how many of those loops may run at once
//! with a semaphore gives the same "worker pool sized independently of
//! agent count" property (spec.md §9) while making per-session ordering
//! structural instead of locked.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use streamspace_core::command::models::AgentCommand;
use streamspace_core::command::repository::CommandRepository;
use streamspace_protocol::{CommandFrame, ControlFrame};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use crate::error::{HubError, HubResult};
use crate::hub::AgentHub;

/// Default worker pool size (spec.md §4.5 "a pool of N worker tasks
/// (default 10)") — here, the maximum number of sessions whose commands
/// may be draining concurrently.
pub const DEFAULT_WORKER_POOL_SIZE: usize = 10;

/// Default in-memory queue capacity (spec.md §4.5 "buffered queue
/// (capacity 1000)").
pub const DEFAULT_QUEUE_CAPACITY: usize = 1000;

/// Per-session FIFO of not-yet-dispatched commands. Guarded by a plain
/// (non-async) mutex: every operation on it is synchronous, so no lock
/// is ever held across an `.await`.
struct SessionQueue {
    pending: VecDeque<AgentCommand>,
    draining: bool,
}

pub struct Dispatcher {
    commands: CommandRepository,
    hub: Arc<AgentHub>,
    queues: Arc<DashMap<String, Mutex<SessionQueue>>>,
    semaphore: Arc<Semaphore>,
    queue_capacity: usize,
    inflight: Arc<AtomicUsize>,
}

impl Dispatcher {
    pub fn new(commands: CommandRepository, hub: Arc<AgentHub>) -> Self {
        Self::with_config(commands, hub, DEFAULT_WORKER_POOL_SIZE, DEFAULT_QUEUE_CAPACITY)
    }

    pub fn with_config(
        commands: CommandRepository,
        hub: Arc<AgentHub>,
        worker_pool_size: usize,
        queue_capacity: usize,
    ) -> Self {
        Self {
            commands,
            hub,
            queues: Arc::new(DashMap::new()),
            semaphore: Arc::new(Semaphore::new(worker_pool_size)),
            queue_capacity,
            inflight: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn commands(&self) -> &CommandRepository {
        &self.commands
    }

    /// Enqueue a freshly constructed, not-yet-persisted command (spec.md
    /// §4.5 point 1): validates `command_id`/`agent_id`, rejects if the
    /// in-memory queue is at capacity *before* writing anything, then
    /// persists and schedules it for dispatch.
    pub async fn enqueue(&self, command: AgentCommand) -> HubResult<()> {
        if command.command_id.is_empty() || command.agent_id.is_empty() {
            return Err(HubError::InvalidCommand(
                "command_id and agent_id must be non-empty".into(),
            ));
        }
        if self.inflight.load(Ordering::SeqCst) >= self.queue_capacity {
            return Err(HubError::QueueFull);
        }
        self.commands.insert(&command).await?;
        self.notify(command);
        Ok(())
    }

    /// Schedule an already-persisted command for dispatch — the fast
    /// path used right after `SessionEngine` writes a command row, so
    /// callers don't wait for the next recovery sweep. If the in-memory
    /// queue is saturated the command is left for recovery to pick up
    /// later; the durable row already exists either way.
    pub fn notify(&self, command: AgentCommand) {
        if self.inflight.load(Ordering::SeqCst) >= self.queue_capacity {
            debug!(command_id = %command.command_id, "dispatcher queue saturated, deferring to recovery sweep");
            return;
        }
        self.inflight.fetch_add(1, Ordering::SeqCst);

        let session_id = command.session_id.clone();
        let needs_drain = {
            let entry = self
                .queues
                .entry(session_id.clone())
                .or_insert_with(|| Mutex::new(SessionQueue { pending: VecDeque::new(), draining: false }));
            let mut guard = entry.lock();
            guard.pending.push_back(command);
            let was_draining = guard.draining;
            guard.draining = true;
            !was_draining
        };

        if needs_drain {
            self.spawn_drain(session_id);
        }
    }

    fn spawn_drain(&self, session_id: String) {
        let commands = self.commands.clone();
        let hub = self.hub.clone();
        let queues = self.queues.clone();
        let semaphore = self.semaphore.clone();
        let inflight = self.inflight.clone();

        tokio::spawn(async move {
            let _permit = semaphore.acquire().await.expect("semaphore never closed");
            loop {
                let next = match queues.get(&session_id) {
                    Some(queue) => {
                        let mut guard = queue.lock();
                        match guard.pending.pop_front() {
                            Some(cmd) => Some(cmd),
                            None => {
                                guard.draining = false;
                                None
                            }
                        }
                    }
                    None => None,
                };

                let Some(command) = next else { break };
                Self::process_one(&commands, &hub, command).await;
                inflight.fetch_sub(1, Ordering::SeqCst);
            }
            queues.remove_if(&session_id, |_, q| {
                let guard = q.lock();
                guard.pending.is_empty() && !guard.draining
            });
        });
    }

    /// spec.md §4.5 point 3: check connectivity, marshal and send, or
    /// fail the row if the agent isn't reachable.
    async fn process_one(commands: &CommandRepository, hub: &Arc<AgentHub>, command: AgentCommand) {
        if !hub.is_connected(&command.agent_id) {
            if let Err(e) = commands
                .mark_failed(&command.command_id, "agent not connected")
                .await
            {
                error!(command_id = %command.command_id, error = %e, "failed to record dispatch failure");
            }
            warn!(command_id = %command.command_id, agent_id = %command.agent_id, "agent not connected, command failed");
            return;
        }

        let action = match command.decode_action() {
            Ok(action) => action,
            Err(e) => {
                error!(command_id = %command.command_id, error = %e, "undecodable command payload");
                commands.mark_failed(&command.command_id, &e.to_string()).await.ok();
                return;
            }
        };

        let frame = ControlFrame::Command(CommandFrame {
            command_id: command.command_id.clone(),
            action,
        });

        match hub.send_to(&command.agent_id, frame).await {
            Ok(()) => {
                if let Err(e) = commands.mark_sent(&command.command_id).await {
                    error!(command_id = %command.command_id, error = %e, "failed to record dispatch");
                }
            }
            Err(e) => {
                warn!(command_id = %command.command_id, error = %e, "send failed, marking command failed");
                commands
                    .mark_failed(&command.command_id, &e.to_string())
                    .await
                    .ok();
            }
        }
    }

    /// Recover on startup / leader gain (spec.md §4.5 point 2): re-enqueue
    /// every durable row that is `pending`, or `sent` without an ack
    /// older than `stale_sent_after`. This is the durability guarantee —
    /// every persisted command will eventually be attempted.
    pub async fn recover(&self, stale_sent_after: Duration) -> HubResult<usize> {
        let rows = self
            .commands
            .list_recoverable(stale_sent_after.as_secs() as i64)
            .await?;
        let count = rows.len();
        info!(count, "dispatcher recovery: re-enqueuing commands");
        for row in rows {
            self.notify(row);
        }
        Ok(count)
    }

    pub fn inflight_count(&self) -> usize {
        self.inflight.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use streamspace_core::agent::models::AgentRegistration;
    use streamspace_core::agent::repository::AgentRepository;
    use streamspace_core::command::models::CommandStatus;
    use streamspace_core::db::Database;
    use streamspace_protocol::actions::{Action, StopSessionAction};

    async fn setup(agent_id: &str) -> (Dispatcher, Arc<AgentHub>) {
        let db = Database::in_memory().await.unwrap();
        let agents = AgentRepository::new(db.pool().clone());
        agents
            .upsert(&AgentRegistration {
                agent_id: agent_id.to_string(),
                platform: "docker".into(),
                region: None,
                cluster_id: None,
                max_cpu: "4000m".into(),
                max_memory: "8Gi".into(),
                max_sessions: 10,
                metadata: HashMap::new(),
            })
            .await
            .unwrap();
        let hub = AgentHub::new(agents);
        let commands = CommandRepository::new(db.pool().clone());
        (Dispatcher::new(commands, hub.clone()), hub)
    }

    fn stop_command(agent_id: &str, session_id: &str) -> AgentCommand {
        AgentCommand::new(
            agent_id.to_string(),
            Action::StopSession(StopSessionAction { session_id: session_id.to_string() }),
        )
    }

    #[tokio::test]
    async fn enqueue_rejects_empty_ids_without_persisting() {
        let (dispatcher, _hub) = setup("docker-prod-1").await;
        let mut bad = stop_command("docker-prod-1", "s-1");
        bad.command_id.clear();
        let err = dispatcher.enqueue(bad.clone()).await.unwrap_err();
        assert!(matches!(err, HubError::InvalidCommand(_)));
        assert!(dispatcher.commands().get(&bad.command_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn enqueue_at_capacity_rejects_and_does_not_persist() {
        let (dispatcher, _hub) = setup("docker-prod-1").await;
        let dispatcher = Dispatcher::with_config(
            dispatcher.commands().clone(),
            dispatcher.hub.clone(),
            1,
            0,
        );
        let cmd = stop_command("docker-prod-1", "s-1");
        let err = dispatcher.enqueue(cmd.clone()).await.unwrap_err();
        assert!(matches!(err, HubError::QueueFull));
        assert!(dispatcher.commands().get(&cmd.command_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn dispatch_to_disconnected_agent_marks_failed() {
        let (dispatcher, _hub) = setup("docker-prod-1").await;
        let cmd = stop_command("docker-prod-1", "s-1");
        dispatcher.enqueue(cmd.clone()).await.unwrap();

        // Give the spawned drain task a chance to run.
        tokio::time::sleep(Duration::from_millis(50)).await;

        let row = dispatcher.commands().require(&cmd.command_id).await.unwrap();
        assert_eq!(row.status, CommandStatus::Failed);
    }

    #[tokio::test]
    async fn dispatch_to_connected_agent_marks_sent() {
        let (dispatcher, hub) = setup("docker-prod-1").await;
        let mut rx = hub.register("docker-prod-1").await.unwrap();

        let cmd = stop_command("docker-prod-1", "s-1");
        dispatcher.enqueue(cmd.clone()).await.unwrap();

        let frame = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(frame, ControlFrame::Command(_)));

        tokio::time::sleep(Duration::from_millis(50)).await;
        let row = dispatcher.commands().require(&cmd.command_id).await.unwrap();
        assert_eq!(row.status, CommandStatus::Sent);
    }

    #[tokio::test]
    async fn same_session_commands_are_delivered_in_order() {
        let (dispatcher, hub) = setup("docker-prod-1").await;
        let mut rx = hub.register("docker-prod-1").await.unwrap();

        let first = stop_command("docker-prod-1", "s-1");
        let second = AgentCommand::new(
            "docker-prod-1".to_string(),
            Action::GetSessionStatus(streamspace_protocol::actions::GetSessionStatusAction {
                session_id: "s-1".to_string(),
            }),
        );
        dispatcher.enqueue(first.clone()).await.unwrap();
        dispatcher.enqueue(second.clone()).await.unwrap();

        let f1 = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();
        let f2 = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();

        let id_of = |f: &ControlFrame| match f {
            ControlFrame::Command(c) => c.command_id.clone(),
            _ => panic!("expected command frame"),
        };
        assert_eq!(id_of(&f1), first.command_id);
        assert_eq!(id_of(&f2), second.command_id);
    }

    #[tokio::test]
    async fn recover_re_enqueues_pending_rows() {
        let (dispatcher, hub) = setup("docker-prod-1").await;
        let cmd = stop_command("docker-prod-1", "s-1");
        dispatcher.commands().insert(&cmd).await.unwrap();

        let mut rx = hub.register("docker-prod-1").await.unwrap();
        let recovered = dispatcher.recover(Duration::from_secs(60)).await.unwrap();
        assert_eq!(recovered, 1);

        let frame = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();
        assert!(matches!(frame, ControlFrame::Command(_)));
    }
}
