use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::cluster::{ExperimentError, ExperimentResult};
use crate::workload::{NodeId, ReadConsistency, RequestInterval};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerSpec {
    pub id: NodeId,
    // Opaque placement label, e.g. a cloud zone.
    pub zone: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientSpec {
    pub id: NodeId,
    pub zone: String,
    pub requests: Vec<RequestInterval>,
    pub read_consistency: ReadConsistency,
}

// A quorum policy where reads and writes may require different numbers of
// acknowledgements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FlexibleQuorum {
    pub read_quorum_size: usize,
    pub write_quorum_size: usize,
}

impl FlexibleQuorum {
    pub const fn new(read_quorum_size: usize, write_quorum_size: usize) -> Self {
        Self {
            read_quorum_size,
            write_quorum_size,
        }
    }

    // The default policy: a simple majority for both reads and writes.
    pub const fn majority(cluster_size: usize) -> Self {
        let majority = cluster_size / 2 + 1;
        Self::new(majority, majority)
    }

    // Checks that both quorums fit in the cluster and that every read quorum
    // intersects every write quorum.
    pub fn validate(&self, cluster_size: usize) -> ExperimentResult<()> {
        let (read, write) = (self.read_quorum_size, self.write_quorum_size);
        let fits = read >= 1 && write >= 1 && read <= cluster_size && write <= cluster_size;
        if !fits || read + write <= cluster_size {
            return Err(ExperimentError::InvalidQuorum {
                read,
                write,
                cluster_size,
            });
        }
        Ok(())
    }
}

// The frozen description of a cluster produced by the builder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterSpec {
    pub cluster_size: usize,
    pub initial_leader: NodeId,
    pub servers: BTreeMap<NodeId, ServerSpec>,
    pub clients: BTreeMap<NodeId, ClientSpec>,
    pub initial_flexible_quorum: Option<FlexibleQuorum>,
}

impl ClusterSpec {
    // The quorum in effect, falling back to majority when none is configured.
    pub fn effective_quorum(&self) -> FlexibleQuorum {
        self.initial_flexible_quorum
            .unwrap_or(FlexibleQuorum::majority(self.cluster_size))
    }
}

// Everything a backend needs to know to execute one run. Written to the run
// directory before the run starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    pub log_directory: PathBuf,
    pub cluster: ClusterSpec,
}

impl RunConfig {
    pub fn quorum(&self) -> FlexibleQuorum {
        self.cluster.effective_quorum()
    }
}
