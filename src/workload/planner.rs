use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::cluster::{ExperimentError, ExperimentResult};
use crate::workload::{ReadConsistency, RequestInterval};

// Identifies a server or client within a single experiment.
pub type NodeId = u64;

// The requests a single client replays, along with the consistency it reads at.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeWorkload {
    pub requests: Vec<RequestInterval>,
    pub read_consistency: ReadConsistency,
}

// Maps each node to the load phases its client replays.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Workload {
    nodes: BTreeMap<NodeId, NodeWorkload>,
}

impl Workload {
    pub fn get(&self, node: NodeId) -> Option<&NodeWorkload> {
        self.nodes.get(&node)
    }

    // Returns the request phases for the supplied node, failing if the node
    // was not part of the plan.
    pub fn requests(&self, node: NodeId) -> ExperimentResult<Vec<RequestInterval>> {
        self.nodes
            .get(&node)
            .map(|w| w.requests.clone())
            .ok_or(ExperimentError::UnknownClient(node))
    }

    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &NodeWorkload)> {
        self.nodes.iter().map(|(id, w)| (*id, w))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

// Produces per-node load schedules where one group of nodes runs one phase
// sequence and everybody else runs another. The usual shape is a geographic
// peak shift: the fast group starts under high load and then calms down,
// while the rest of the nodes see the reverse.
#[derive(Debug, Clone)]
pub struct WorkloadPlanner {
    fast_group_phases: Vec<RequestInterval>,
    other_phases: Vec<RequestInterval>,
}

impl WorkloadPlanner {
    pub fn new(fast_group_phases: Vec<RequestInterval>, other_phases: Vec<RequestInterval>) -> Self {
        Self {
            fast_group_phases,
            other_phases,
        }
    }

    // Fast group gets [high, low], the others [low, high].
    pub fn peak_shift(high_load: RequestInterval, low_load: RequestInterval) -> Self {
        Self::new(vec![high_load, low_load], vec![low_load, high_load])
    }

    pub fn plan(
        &self,
        node_ids: &[NodeId],
        fast_group: &[NodeId],
        read_consistency: ReadConsistency,
    ) -> ExperimentResult<Workload> {
        self.validate_phases()?;

        let mut all = BTreeSet::new();
        for id in node_ids {
            if !all.insert(*id) {
                return Err(ExperimentError::invalid_workload(format!(
                    "node {} listed more than once",
                    id
                )));
            }
        }

        let fast: BTreeSet<NodeId> = fast_group.iter().copied().collect();
        if let Some(stray) = fast.difference(&all).next() {
            return Err(ExperimentError::invalid_workload(format!(
                "fast group member {} is not a known node",
                stray
            )));
        }

        let mut nodes = BTreeMap::new();
        for id in node_ids {
            let requests = if fast.contains(id) {
                self.fast_group_phases.clone()
            } else {
                self.other_phases.clone()
            };
            nodes.insert(
                *id,
                NodeWorkload {
                    requests,
                    read_consistency,
                },
            );
        }

        debug!(
            nodes = nodes.len(),
            fast = fast.len(),
            consistency = %read_consistency,
            "planned workload"
        );
        Ok(Workload { nodes })
    }

    fn validate_phases(&self) -> ExperimentResult<()> {
        if self.fast_group_phases.is_empty() || self.other_phases.is_empty() {
            return Err(ExperimentError::invalid_workload(
                "phase sequences must not be empty",
            ));
        }
        self.fast_group_phases
            .iter()
            .chain(self.other_phases.iter())
            .try_for_each(|i| i.validate())
    }
}
