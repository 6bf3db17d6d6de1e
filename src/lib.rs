// Specifies and runs reproducible benchmark experiments against a replicated
// cluster: which servers exist and where, what load each client applies over
// time, which consistency clients read at and which quorum policy the cluster
// enforces. An experiment is then repeated under several quorum policies, each
// run logging into its own directory.

pub mod cluster;
pub mod local;
pub mod orchestrator;
pub mod workload;

#[cfg(test)]
mod testing;
