use std::fmt::Write as _;
use std::path::Path;

use async_std::fs;
use serde::Serialize;

use crate::cluster::ClientSummary;
use crate::workload::{NodeId, ReadConsistency};

// Everything recorded about one request issued by a simulated client.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RequestRecord {
    pub request_id: usize,
    pub is_write: bool,
    pub consistency: ReadConsistency,
    // Milliseconds since the client started its first interval.
    pub sent_ms: u128,
    pub latency_us: u128,
    pub stale: bool,
}

// Collects the requests and responses of a single client during a run.
pub struct ClientData {
    client: NodeId,
    requests: usize,
    responses: Vec<RequestRecord>,
}

impl ClientData {
    pub fn new(client: NodeId) -> Self {
        ClientData {
            client,
            requests: 0,
            responses: Vec::new(),
        }
    }

    pub fn client(&self) -> NodeId {
        self.client
    }

    pub fn new_request(&mut self) -> usize {
        let id = self.requests;
        self.requests += 1;
        id
    }

    pub fn new_response(&mut self, record: RequestRecord) {
        self.responses.push(record);
    }

    pub fn request_count(&self) -> usize {
        self.requests
    }

    pub fn response_count(&self) -> usize {
        self.responses.len()
    }

    pub fn summary(&self) -> ClientSummary {
        let writes = self.responses.iter().filter(|r| r.is_write).count();
        let mean_latency_us = if self.responses.is_empty() {
            None
        } else {
            let total: u128 = self.responses.iter().map(|r| r.latency_us).sum();
            Some(total as f64 / self.responses.len() as f64)
        };
        ClientSummary {
            requests: self.requests,
            responses: self.responses.len(),
            reads: self.responses.len() - writes,
            writes,
            stale_reads: self.responses.iter().filter(|r| r.stale).count(),
            mean_latency_us,
        }
    }

    // One line per answered request, ordered by send time.
    pub fn to_csv(&self) -> String {
        let mut out = String::from("request_id,is_write,consistency,sent_ms,latency_us,stale\n");
        let mut sorted: Vec<&RequestRecord> = self.responses.iter().collect();
        sorted.sort_by_key(|r| r.request_id);
        for r in sorted {
            // Writing into a String cannot fail.
            let _ = writeln!(
                out,
                "{},{},{},{},{},{}",
                r.request_id, r.is_write, r.consistency, r.sent_ms, r.latency_us, r.stale
            );
        }
        out
    }

    // Writes client-<id>.csv and client-<id>.json into the supplied directory.
    pub async fn save(&self, directory: &Path) -> std::io::Result<()> {
        let directory = async_std::path::PathBuf::from(directory.to_path_buf());
        fs::write(
            directory.join(format!("client-{}.csv", self.client)),
            self.to_csv(),
        )
        .await?;
        let summary = serde_json::to_string_pretty(&self.summary()).map_err(std::io::Error::other)?;
        fs::write(directory.join(format!("client-{}.json", self.client)), summary).await?;
        Ok(())
    }
}
