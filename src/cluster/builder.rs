use std::collections::BTreeMap;

use tracing::info;

use crate::cluster::{
    ClientSpec, ClusterBackend, ClusterHandle, ClusterSpec, ExperimentError, ExperimentResult,
    FlexibleQuorum, ServerSpec,
};
use crate::workload::{NodeId, ReadConsistency, RequestInterval};

// Used to capture the topology of a cluster while it is being declared. Staging
// calls consume the builder and hand it back, so declarations chain with `?`:
//
//   ClusterBuilder::new(3).server(1, "a")?.server(2, "b")?.initial_leader(1)
//
// Nothing outside this struct is touched until build() is called.
#[derive(Debug, Clone)]
pub struct ClusterBuilder {
    cluster_size: usize,
    initial_leader: Option<NodeId>,
    servers: BTreeMap<NodeId, ServerSpec>,
    clients: BTreeMap<NodeId, ClientSpec>,
    initial_flexible_quorum: Option<FlexibleQuorum>,
}

impl ClusterBuilder {
    pub fn new(cluster_size: usize) -> Self {
        Self {
            cluster_size,
            initial_leader: None,
            servers: BTreeMap::new(),
            clients: BTreeMap::new(),
            initial_flexible_quorum: None,
        }
    }

    pub fn server(mut self, id: NodeId, zone: &str) -> ExperimentResult<Self> {
        if self.servers.contains_key(&id) {
            return Err(ExperimentError::DuplicateId { kind: "server", id });
        }
        self.servers.insert(
            id,
            ServerSpec {
                id,
                zone: zone.to_string(),
            },
        );
        Ok(self)
    }

    // Records the starting leader. Whether it names a staged server is only
    // checked by build(), since servers may be declared afterwards.
    pub fn initial_leader(mut self, id: NodeId) -> Self {
        self.initial_leader = Some(id);
        self
    }

    // Stages a client reading at the default consistency level. Use
    // ClusterHandle::change_client_config to pick another one.
    pub fn client(
        self,
        id: NodeId,
        zone: &str,
        requests: Vec<RequestInterval>,
    ) -> ExperimentResult<Self> {
        self.client_with_consistency(id, zone, requests, ReadConsistency::default())
    }

    pub fn client_with_consistency(
        mut self,
        id: NodeId,
        zone: &str,
        requests: Vec<RequestInterval>,
        read_consistency: ReadConsistency,
    ) -> ExperimentResult<Self> {
        if self.clients.contains_key(&id) {
            return Err(ExperimentError::DuplicateId { kind: "client", id });
        }
        if requests.is_empty() {
            return Err(ExperimentError::invalid_workload(format!(
                "client {} has no request intervals",
                id
            )));
        }
        for interval in &requests {
            interval.validate()?;
        }
        self.clients.insert(
            id,
            ClientSpec {
                id,
                zone: zone.to_string(),
                requests,
                read_consistency,
            },
        );
        Ok(self)
    }

    pub fn initial_flexible_quorum(mut self, quorum: FlexibleQuorum) -> Self {
        self.initial_flexible_quorum = Some(quorum);
        self
    }

    // Validates the staged declarations and freezes them into a spec.
    pub fn freeze(self) -> ExperimentResult<ClusterSpec> {
        let leader = self
            .initial_leader
            .ok_or_else(|| ExperimentError::incomplete("no initial leader set"))?;
        if !self.servers.contains_key(&leader) {
            return Err(ExperimentError::incomplete(format!(
                "initial leader {} is not a declared server",
                leader
            )));
        }
        if self.servers.len() != self.cluster_size {
            return Err(ExperimentError::incomplete(format!(
                "cluster size is {} but {} servers were declared",
                self.cluster_size,
                self.servers.len()
            )));
        }
        // Clients are associated with the server sharing their id.
        if let Some(orphan) = self.clients.keys().find(|id| !self.servers.contains_key(*id)) {
            return Err(ExperimentError::UnknownServer(*orphan));
        }
        if let Some(quorum) = &self.initial_flexible_quorum {
            quorum.validate(self.cluster_size)?;
        }

        Ok(ClusterSpec {
            cluster_size: self.cluster_size,
            initial_leader: leader,
            servers: self.servers,
            clients: self.clients,
            initial_flexible_quorum: self.initial_flexible_quorum,
        })
    }

    // Validates the spec, provisions the backend and returns a runnable handle.
    pub async fn build<B>(self, mut backend: B) -> ExperimentResult<ClusterHandle<B>>
    where
        B: ClusterBackend + Send,
    {
        let spec = self.freeze()?;
        backend
            .provision(&spec)
            .await
            .map_err(ExperimentError::Provisioning)?;
        info!(
            servers = spec.servers.len(),
            clients = spec.clients.len(),
            leader = spec.initial_leader,
            "cluster provisioned"
        );
        Ok(ClusterHandle::new(spec, backend))
    }
}
