use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_std::sync::{Arc, Mutex};
use bytes::Bytes;
use tokio::time::sleep;
use tracing::trace;

use crate::cluster::{ExperimentError, ExperimentResult, FlexibleQuorum, RunConfig};
use crate::local::store::{MapStore, Store, Versioned};
use crate::workload::{NodeId, ReadConsistency};

// The result of a single read against the simulated cluster.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadResult {
    pub value: Option<Versioned>,
    // Whether a newer write had already been acknowledged when the read was served.
    pub stale: bool,
}

// A stand-in for a replicated cluster. Every server holds a full replica; the
// leader orders writes and acknowledges them once a write quorum has applied
// them, and the remaining replicas catch up after a fixed lag. Reads are
// served according to the client's consistency level.
pub struct SimulatedCluster {
    leader: NodeId,
    quorum: FlexibleQuorum,
    replication_lag: Duration,
    replicas: BTreeMap<NodeId, Arc<Mutex<MapStore>>>,
    // Latest acknowledged version of every key, used to detect stale reads.
    committed: Mutex<MapStore>,
    next_version: AtomicU64,
}

impl SimulatedCluster {
    pub fn new(config: &RunConfig, replication_lag: Duration) -> ExperimentResult<Self> {
        let spec = &config.cluster;
        let quorum = config.quorum();
        quorum.validate(spec.cluster_size)?;
        if !spec.servers.contains_key(&spec.initial_leader) {
            return Err(ExperimentError::UnknownServer(spec.initial_leader));
        }

        let replicas = spec
            .servers
            .keys()
            .map(|id| (*id, Arc::new(Mutex::new(MapStore::new()))))
            .collect();
        Ok(SimulatedCluster {
            leader: spec.initial_leader,
            quorum,
            replication_lag,
            replicas,
            committed: Mutex::new(MapStore::new()),
            next_version: AtomicU64::new(1),
        })
    }

    pub fn leader(&self) -> NodeId {
        self.leader
    }

    pub fn quorum(&self) -> FlexibleQuorum {
        self.quorum
    }

    // Replicas in the order the leader contacts them: itself first, then the
    // others by ascending id.
    fn contact_order(&self) -> Vec<NodeId> {
        std::iter::once(self.leader)
            .chain(self.replicas.keys().copied().filter(|id| *id != self.leader))
            .collect()
    }

    // Writes the value through the leader. Returns the version once a write
    // quorum holds it.
    pub async fn write(&self, key: Bytes, value: Bytes) -> u64 {
        let version = self.next_version.fetch_add(1, Ordering::SeqCst);
        let entry = Versioned { version, value };

        let order = self.contact_order();
        let (quorum, rest) = order.split_at(self.quorum.write_quorum_size);
        for id in quorum {
            self.replicas[id].lock().await.apply(key.clone(), entry.clone());
        }
        self.committed.lock().await.apply(key.clone(), entry.clone());

        for id in rest {
            let replica = self.replicas[id].clone();
            let (key, entry, lag) = (key.clone(), entry.clone(), self.replication_lag);
            tokio::spawn(async move {
                sleep(lag).await;
                replica.lock().await.apply(key, entry);
            });
        }
        trace!(version, "write acknowledged");
        version
    }

    // Reads a key on behalf of the client co-located with `client`.
    pub async fn read(&self, client: NodeId, key: &Bytes, consistency: ReadConsistency) -> ReadResult {
        let latest = self.committed.lock().await.get(key).map(|v| v.version);
        let value = match consistency {
            ReadConsistency::Leader => self.replicas[&self.leader].lock().await.get(key),
            ReadConsistency::Local => {
                let replica = self.replicas.get(&client).unwrap_or(&self.replicas[&self.leader]);
                replica.lock().await.get(key)
            }
            ReadConsistency::Linearizable => {
                let mut newest: Option<Versioned> = None;
                for id in self.contact_order().iter().take(self.quorum.read_quorum_size) {
                    let candidate = self.replicas[id].lock().await.get(key);
                    if candidate.as_ref().map(|c| c.version) > newest.as_ref().map(|n| n.version) {
                        newest = candidate;
                    }
                }
                newest
            }
        };
        let seen = value.as_ref().map(|v| v.version);
        ReadResult {
            value,
            stale: seen < latest,
        }
    }
}
