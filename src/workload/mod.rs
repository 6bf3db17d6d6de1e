// Describes the load clients put on the cluster over the course of a run.

mod interval;
pub use interval::{MIN_REQUEST_DELAY, ReadConsistency, RequestInterval};

mod planner;
pub use planner::{NodeId, NodeWorkload, Workload, WorkloadPlanner};
