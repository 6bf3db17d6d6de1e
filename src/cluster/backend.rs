use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::cluster::{ClusterSpec, RunConfig};
use crate::workload::NodeId;

// The collaborator which actually stands up servers and clients and executes
// runs. A handle owns exactly one backend for its whole lifetime.
#[async_trait]
pub trait ClusterBackend {
    // Acquires whatever resources the cluster needs. Called once, by build().
    async fn provision(&mut self, spec: &ClusterSpec) -> Result<(), String>;

    // Executes a single run with the supplied configuration, writing artifacts
    // below the run's log directory. The directory exists when this is called.
    async fn run(&mut self, config: &RunConfig) -> Result<RunSummary, String>;

    // Releases all resources. Called exactly once.
    async fn shutdown(&mut self) -> Result<(), String>;
}

// Per-client counters collected during a single run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClientSummary {
    pub requests: usize,
    pub responses: usize,
    pub reads: usize,
    pub writes: usize,
    pub stale_reads: usize,
    pub mean_latency_us: Option<f64>,
}

// The outcome of a completed run, as reported by the backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub started_at: String,
    pub clients: BTreeMap<NodeId, ClientSummary>,
}

impl RunSummary {
    pub fn total_requests(&self) -> usize {
        self.clients.values().map(|c| c.requests).sum()
    }

    pub fn total_responses(&self) -> usize {
        self.clients.values().map(|c| c.responses).sum()
    }
}
