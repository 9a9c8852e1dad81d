//! Orchestrator-native leader election (spec.md §4.2): leadership
//! follows ownership of a label on a Kubernetes `Service` record, swapped
//! atomically via a server-side apply. No extra coordination primitive
//! beyond what the orchestrator already offers.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Service;
use kube::api::{Api, Patch, PatchParams};
use kube::Client;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

use crate::{ElectionError, ElectionResult, LeaderElection, LeadershipState};

const OWNER_LABEL: &str = "streamspace.io/leader-replica";
const FIELD_MANAGER: &str = "streamspace-agent";

pub struct OrchestratorLeaderElection {
    client: Client,
    namespace: String,
    replica_id: String,
    watches: Mutex<HashMap<String, watch::Sender<LeadershipState>>>,
}

impl OrchestratorLeaderElection {
    pub fn new(client: Client, namespace: impl Into<String>, replica_id: impl Into<String>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
            replica_id: replica_id.into(),
            watches: Mutex::new(HashMap::new()),
        }
    }

    fn service_name(&self, agent_id: &str) -> String {
        format!("streamspace-agent-{agent_id}")
    }

    fn watch_for(&self, agent_id: &str) -> watch::Sender<LeadershipState> {
        let mut watches = self.watches.lock().unwrap();
        watches
            .entry(agent_id.to_string())
            .or_insert_with(|| watch::channel(LeadershipState::Standby).0)
            .clone()
    }

    async fn current_owner(&self, agent_id: &str) -> ElectionResult<Option<String>> {
        let services: Api<Service> = Api::namespaced(self.client.clone(), &self.namespace);
        let svc = services
            .get_opt(&self.service_name(agent_id))
            .await
            .map_err(|e| ElectionError::BackendUnavailable(e.to_string()))?;
        Ok(svc
            .and_then(|s| s.metadata.labels)
            .and_then(|labels| labels.get(OWNER_LABEL).cloned()))
    }
}

#[async_trait]
impl LeaderElection for OrchestratorLeaderElection {
    async fn campaign(&self, agent_id: &str) -> ElectionResult<()> {
        if let Some(owner) = self.current_owner(agent_id).await? {
            if owner != self.replica_id {
                return Err(ElectionError::Contended(format!(
                    "service label owned by replica {owner}"
                )));
            }
            let _ = self.watch_for(agent_id).send(LeadershipState::Leader);
            return Ok(());
        }

        let services: Api<Service> = Api::namespaced(self.client.clone(), &self.namespace);
        let mut labels = BTreeMap::new();
        labels.insert(OWNER_LABEL.to_string(), self.replica_id.clone());

        let patch = serde_json::json!({
            "apiVersion": "v1",
            "kind": "Service",
            "metadata": {
                "name": self.service_name(agent_id),
                "labels": labels,
            },
        });

        services
            .patch(
                &self.service_name(agent_id),
                &PatchParams::apply(FIELD_MANAGER).force(),
                &Patch::Apply(&patch),
            )
            .await
            .map_err(|e| ElectionError::BackendUnavailable(e.to_string()))?;

        let _ = self.watch_for(agent_id).send(LeadershipState::Leader);
        Ok(())
    }

    async fn renew(&self, agent_id: &str) -> ElectionResult<()> {
        match self.current_owner(agent_id).await? {
            Some(owner) if owner == self.replica_id => Ok(()),
            _ => {
                let _ = self.watch_for(agent_id).send(LeadershipState::Standby);
                Err(ElectionError::NotLeader)
            }
        }
    }

    async fn resign(&self, agent_id: &str) -> ElectionResult<()> {
        if matches!(self.current_owner(agent_id).await?, Some(owner) if owner == self.replica_id) {
            let services: Api<Service> = Api::namespaced(self.client.clone(), &self.namespace);
            let patch = serde_json::json!({
                "apiVersion": "v1",
                "kind": "Service",
                "metadata": {
                    "name": self.service_name(agent_id),
                    "labels": { OWNER_LABEL: serde_json::Value::Null },
                },
            });
            services
                .patch(
                    &self.service_name(agent_id),
                    &PatchParams::apply(FIELD_MANAGER).force(),
                    &Patch::Apply(&patch),
                )
                .await
                .map_err(|e| ElectionError::BackendUnavailable(e.to_string()))?;
        }
        let _ = self.watch_for(agent_id).send(LeadershipState::Standby);
        Ok(())
    }

    fn observe_leadership_change(&self, agent_id: &str) -> WatchStream<LeadershipState> {
        WatchStream::new(self.watch_for(agent_id).subscribe())
    }
}
