//! Redis-backed leader election (spec.md §4.2): a single key per
//! `agent_id`, set with conditional-create semantics (`SET NX PX`) and a
//! TTL. The leader renews before the TTL expires; a standby attempting
//! to acquire retries on `ElectionTimings::retry_interval`, which is
//! shorter than the TTL by construction.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use uuid::Uuid;

use crate::{ElectionError, ElectionResult, LeaderElection, LeadershipState};

pub struct RedisLeaderElection {
    conn: ConnectionManager,
    key_prefix: String,
    owner_token: String,
    ttl: Duration,
    watches: Mutex<HashMap<String, watch::Sender<LeadershipState>>>,
}

impl RedisLeaderElection {
    pub async fn connect(redis_url: &str, key_prefix: impl Into<String>, ttl: Duration) -> ElectionResult<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| ElectionError::BackendUnavailable(e.to_string()))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| ElectionError::BackendUnavailable(e.to_string()))?;
        Ok(Self {
            conn,
            key_prefix: key_prefix.into(),
            owner_token: Uuid::new_v4().to_string(),
            ttl,
            watches: Mutex::new(HashMap::new()),
        })
    }

    fn key(&self, agent_id: &str) -> String {
        format!("{}:leader:{}", self.key_prefix, agent_id)
    }

    fn watch_for(&self, agent_id: &str) -> watch::Sender<LeadershipState> {
        let mut watches = self.watches.lock().unwrap();
        watches
            .entry(agent_id.to_string())
            .or_insert_with(|| watch::channel(LeadershipState::Standby).0)
            .clone()
    }
}

#[async_trait]
impl LeaderElection for RedisLeaderElection {
    async fn campaign(&self, agent_id: &str) -> ElectionResult<()> {
        let mut conn = self.conn.clone();
        let key = self.key(agent_id);
        let ttl_ms = self.ttl.as_millis() as u64;

        let acquired: bool = redis::cmd("SET")
            .arg(&key)
            .arg(&self.owner_token)
            .arg("NX")
            .arg("PX")
            .arg(ttl_ms)
            .query_async::<Option<String>>(&mut conn)
            .await
            .map_err(|e| ElectionError::BackendUnavailable(e.to_string()))?
            .is_some();

        if acquired {
            let _ = self.watch_for(agent_id).send(LeadershipState::Leader);
            Ok(())
        } else {
            Err(ElectionError::Contended(format!("key held: {key}")))
        }
    }

    async fn renew(&self, agent_id: &str) -> ElectionResult<()> {
        let mut conn = self.conn.clone();
        let key = self.key(agent_id);

        // Only renew if we still own the key: compare-and-extend via a
        // Lua script keeps the check-then-act atomic.
        const RENEW_SCRIPT: &str = r#"
            if redis.call("GET", KEYS[1]) == ARGV[1] then
                return redis.call("PEXPIRE", KEYS[1], ARGV[2])
            else
                return 0
            end
        "#;

        let renewed: i64 = redis::Script::new(RENEW_SCRIPT)
            .key(&key)
            .arg(&self.owner_token)
            .arg(self.ttl.as_millis() as u64)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| ElectionError::BackendUnavailable(e.to_string()))?;

        if renewed == 1 {
            Ok(())
        } else {
            let _ = self.watch_for(agent_id).send(LeadershipState::Standby);
            Err(ElectionError::NotLeader)
        }
    }

    async fn resign(&self, agent_id: &str) -> ElectionResult<()> {
        let mut conn = self.conn.clone();
        let key = self.key(agent_id);

        const RESIGN_SCRIPT: &str = r#"
            if redis.call("GET", KEYS[1]) == ARGV[1] then
                return redis.call("DEL", KEYS[1])
            else
                return 0
            end
        "#;

        let _: i64 = redis::Script::new(RESIGN_SCRIPT)
            .key(&key)
            .arg(&self.owner_token)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| ElectionError::BackendUnavailable(e.to_string()))?;

        let _ = self.watch_for(agent_id).send(LeadershipState::Standby);
        Ok(())
    }

    fn observe_leadership_change(&self, agent_id: &str) -> WatchStream<LeadershipState> {
        WatchStream::new(self.watch_for(agent_id).subscribe())
    }
}
