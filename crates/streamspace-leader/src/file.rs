//! Filesystem advisory-lock backend (spec.md §4.2): safe only when all
//! replicas of an agent identity share the same local filesystem (a
//! single-host HA setup, e.g. systemd-managed failover pairs on shared
//! storage).

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use fs2::FileExt;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

use crate::{ElectionError, ElectionResult, LeaderElection, LeadershipState};

struct Held {
    file: File,
}

pub struct FileLeaderElection {
    lock_dir: PathBuf,
    held: Mutex<HashMap<String, Held>>,
    watches: Mutex<HashMap<String, watch::Sender<LeadershipState>>>,
}

impl FileLeaderElection {
    pub fn new(lock_dir: impl Into<PathBuf>) -> Self {
        Self {
            lock_dir: lock_dir.into(),
            held: Mutex::new(HashMap::new()),
            watches: Mutex::new(HashMap::new()),
        }
    }

    fn lock_path(&self, agent_id: &str) -> PathBuf {
        self.lock_dir.join(format!("{agent_id}.lock"))
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
impl LeaderElection for FileLeaderElection {
    async fn campaign(&self, agent_id: &str) -> ElectionResult<()> {
        std::fs::create_dir_all(&self.lock_dir)?;
        let path = self.lock_path(agent_id);
        let file = OpenOptions::new().create(true).write(true).open(&path)?;

        match file.try_lock_exclusive() {
            Ok(()) => {
                self.held.lock().unwrap().insert(agent_id.to_string(), Held { file });
                let _ = self.watch_for(agent_id).send(LeadershipState::Leader);
                Ok(())
            }
            Err(_) => Err(ElectionError::Contended(format!(
                "lock held by another replica: {}",
                path.display()
            ))),
        }
    }

    async fn renew(&self, agent_id: &str) -> ElectionResult<()> {
        // The advisory lock has no TTL to refresh; holding the fd open
        // is sufficient. Confirm we still hold it.
        if self.held.lock().unwrap().contains_key(agent_id) {
            Ok(())
        } else {
            Err(ElectionError::NotLeader)
        }
    }

    async fn resign(&self, agent_id: &str) -> ElectionResult<()> {
        if let Some(held) = self.held.lock().unwrap().remove(agent_id) {
            fs2::FileExt::unlock(&held.file)?;
        }
        let _ = self.watch_for(agent_id).send(LeadershipState::Standby);
        Ok(())
    }

    fn observe_leadership_change(&self, agent_id: &str) -> WatchStream<LeadershipState> {
        WatchStream::new(self.watch_for(agent_id).subscribe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn second_campaign_is_contended_until_first_resigns() {
        let dir = tempfile::tempdir().unwrap();
        let a = FileLeaderElection::new(dir.path());
        let b = FileLeaderElection::new(dir.path());

        a.campaign("docker-prod").await.unwrap();
        let err = b.campaign("docker-prod").await.unwrap_err();
        assert!(matches!(err, ElectionError::Contended(_)));

        a.resign("docker-prod").await.unwrap();
        b.campaign("docker-prod").await.unwrap();
    }
}
