// This module describes a cluster under test: its topology, the clients
// driving it and the quorum policy it enforces. A ClusterBuilder collects the
// declarations and hands them to a ClusterBackend, which does the actual work
// of standing the cluster up and executing runs.

mod error;
pub use error::{ExperimentError, ExperimentResult};

mod spec;
pub use spec::{ClientSpec, ClusterSpec, FlexibleQuorum, RunConfig, ServerSpec};

mod backend;
pub use backend::{ClientSummary, ClusterBackend, RunSummary};

mod builder;
pub use builder::ClusterBuilder;

mod handle;
pub use handle::ClusterHandle;
