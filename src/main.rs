extern crate structopt;
extern crate tracing;

use std::error::Error;
use std::path::PathBuf;

use structopt::StructOpt;
use tracing::info;
use tracing_subscriber::EnvFilter;

use quorumbench::cluster::{ClusterBuilder, ExperimentError, ExperimentResult, FlexibleQuorum};
use quorumbench::local::{LocalCluster, LocalOptions};
use quorumbench::orchestrator::{ExperimentOrchestrator, QuorumConfig};
use quorumbench::workload::{NodeId, ReadConsistency, RequestInterval, Workload, WorkloadPlanner};

const EXPERIMENT_DURATION_SECS: f64 = 10.0;
const READ_RATIO: f64 = 0.5;

// Server placement of the example experiment. Clients sit next to the server
// sharing their id.
const ZONES: [(NodeId, &str); 5] = [
    (1, "us-west2-a"),
    (2, "us-south1-a"),
    (3, "us-east4-a"),
    (4, "europe-southwest1-a"),
    (5, "europe-west4-a"),
];
const US_NODES: [NodeId; 3] = [1, 2, 3];
const INITIAL_LEADER: NodeId = 5;

#[derive(Debug, StructOpt, Clone)]
struct Arguments {
    #[structopt(long = "experiment_root", default_value = "./logs/example-experiment")]
    experiment_root: PathBuf,

    #[structopt(short = "n", long = "num_runs", default_value = "3")]
    num_runs: usize,

    #[structopt(short = "t", long = "time_scale", default_value = "1.0")]
    time_scale: f64,

    #[structopt(short = "c", long = "read_consistency", default_value = "local")]
    read_consistency: ReadConsistency,
}

// The US nodes peak first while the European nodes are quiet, then the load
// shifts over to Europe.
fn example_workload(read_consistency: ReadConsistency) -> ExperimentResult<Workload> {
    let high_load = RequestInterval::new(EXPERIMENT_DURATION_SECS, 100.0, READ_RATIO);
    let low_load = RequestInterval::new(EXPERIMENT_DURATION_SECS, 10.0, READ_RATIO);
    let nodes: Vec<NodeId> = ZONES.iter().map(|(id, _)| *id).collect();
    WorkloadPlanner::peak_shift(high_load, low_load).plan(&nodes, &US_NODES, read_consistency)
}

fn example_cluster(workload: &Workload) -> ExperimentResult<ClusterBuilder> {
    let mut builder = ClusterBuilder::new(ZONES.len()).initial_leader(INITIAL_LEADER);
    for (id, zone) in ZONES {
        builder = builder.server(id, zone)?;
    }
    for (id, zone) in ZONES {
        let planned = workload
            .get(id)
            .ok_or(ExperimentError::UnknownClient(id))?;
        builder = builder.client_with_consistency(
            id,
            zone,
            planned.requests.clone(),
            planned.read_consistency,
        )?;
    }
    Ok(builder)
}

fn quorum_configs() -> Vec<QuorumConfig> {
    vec![
        QuorumConfig::new("MajorityQuorum", FlexibleQuorum::new(3, 3)),
        QuorumConfig::new("FlexQuorum", FlexibleQuorum::new(4, 2)),
    ]
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // This allows configuring the filters using the RUST_LOG env variable.
    // Example:
    // > RUST_LOG=info,quorumbench::local=debug cargo run
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or(EnvFilter::from("quorumbench=info"));

    tracing_subscriber::FmtSubscriber::builder()
        .with_target(false)
        .with_env_filter(env_filter)
        .init();
    let arguments = Arguments::from_args();

    let workload = example_workload(arguments.read_consistency)?;
    let builder = example_cluster(&workload)?;
    let backend = LocalCluster::new(LocalOptions::default().with_time_scale(arguments.time_scale));

    let mut orchestrator = ExperimentOrchestrator::new(
        &arguments.experiment_root,
        arguments.num_runs,
        quorum_configs(),
    )?;
    let report = orchestrator.execute(builder, backend).await?;

    info!(
        completed = report.completed(),
        failed = report.failed(),
        root = %arguments.experiment_root.display(),
        "All done, exiting"
    );
    Ok(())
}
