// An in-process cluster backend. Every declared server becomes a replica held
// in memory and every declared client a task replaying its workload, so that
// experiments can be exercised end-to-end on a single machine.

use std::path::Path;
use std::time::Duration;

use async_std::fs;
use async_std::sync::Arc;
use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use tracing::{Instrument, info, info_span};

use crate::cluster::{ClusterBackend, ClusterSpec, RunConfig, RunSummary};

mod client;
pub use client::SimulatedClient;

mod replica;
pub use replica::{ReadResult, SimulatedCluster};

mod results;
pub use results::{ClientData, RequestRecord};

mod store;
pub use store::{MapStore, Store, Versioned};

const SUMMARY_FILE: &str = "summary.json";

// Tunables for the local backend.
#[derive(Debug, Clone)]
pub struct LocalOptions {
    // How long replicas outside the write quorum take to apply a write.
    pub replication_lag: Duration,

    // How long clients wait for outstanding responses after their last interval.
    pub drain: Duration,

    // Multiplier applied to every interval duration.
    pub time_scale: f64,

    // Number of distinct keys clients spread their requests over.
    pub key_space: usize,
}

impl Default for LocalOptions {
    fn default() -> Self {
        LocalOptions {
            replication_lag: Duration::from_millis(50),
            drain: Duration::from_secs(5),
            time_scale: 1.0,
            key_space: 100,
        }
    }
}

impl LocalOptions {
    // Consumes this instance and returns an instance with the replication lag set.
    pub fn with_replication_lag(self, replication_lag: Duration) -> Self {
        Self {
            replication_lag,
            ..self
        }
    }

    // Consumes this instance and returns an instance with the drain period set.
    pub fn with_drain(self, drain: Duration) -> Self {
        Self { drain, ..self }
    }

    // Consumes this instance and returns an instance with the time scale set.
    pub fn with_time_scale(self, time_scale: f64) -> Self {
        Self { time_scale, ..self }
    }

    pub fn with_key_space(self, key_space: usize) -> Self {
        Self { key_space, ..self }
    }
}

pub struct LocalCluster {
    options: LocalOptions,
    provisioned: Option<ClusterSpec>,
}

impl LocalCluster {
    pub fn new(options: LocalOptions) -> Self {
        LocalCluster {
            options,
            provisioned: None,
        }
    }
}

#[async_trait]
impl ClusterBackend for LocalCluster {
    async fn provision(&mut self, spec: &ClusterSpec) -> Result<(), String> {
        let time_scale = self.options.time_scale;
        if !(time_scale > 0.0) || !time_scale.is_finite() {
            return Err(format!("time scale must be positive and finite, got {}", time_scale));
        }
        info!(replicas = spec.servers.len(), "provisioned in-process replicas");
        self.provisioned = Some(spec.clone());
        Ok(())
    }

    async fn run(&mut self, config: &RunConfig) -> Result<RunSummary, String> {
        if self.provisioned.is_none() {
            return Err("cluster has not been provisioned".to_string());
        }
        let started_at = Utc::now().to_rfc3339();

        // Every run starts from empty replicas.
        let cluster = Arc::new(
            SimulatedCluster::new(config, self.options.replication_lag).map_err(|e| e.to_string())?,
        );
        let quorum = cluster.quorum();
        info!(
            leader = cluster.leader(),
            read_quorum = quorum.read_quorum_size,
            write_quorum = quorum.write_quorum_size,
            "starting clients"
        );

        let clients = config.cluster.clients.values().map(|spec| {
            let intervals = spec
                .requests
                .iter()
                .map(|i| i.scaled(self.options.time_scale))
                .collect();
            let client = SimulatedClient::new(
                spec.id,
                cluster.clone(),
                intervals,
                spec.read_consistency,
                self.options.key_space,
                self.options.drain,
            );
            let span = info_span!("client", id = spec.id, zone = %spec.zone);
            client.run().instrument(span)
        });
        let collected = join_all(clients).await;

        let mut summary = RunSummary {
            started_at,
            ..RunSummary::default()
        };
        for data in &collected {
            data.save(&config.log_directory)
                .await
                .map_err(|e| format!("failed to save results of client {}: {}", data.client(), e))?;
            summary.clients.insert(data.client(), data.summary());
        }
        write_summary(&config.log_directory, &summary)
            .await
            .map_err(|e| format!("failed to save run summary: {}", e))?;
        Ok(summary)
    }

    async fn shutdown(&mut self) -> Result<(), String> {
        if self.provisioned.take().is_none() {
            return Err("cluster has not been provisioned".to_string());
        }
        info!("released in-process replicas");
        Ok(())
    }
}

async fn write_summary(directory: &Path, summary: &RunSummary) -> std::io::Result<()> {
    let contents = serde_json::to_string_pretty(summary).map_err(std::io::Error::other)?;
    let path = async_std::path::PathBuf::from(directory.join(SUMMARY_FILE));
    fs::write(path, contents).await
}
