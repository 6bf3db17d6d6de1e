use std::collections::HashSet;
use std::ffi::OsStr;
use std::panic::AssertUnwindSafe;
use std::path::{Component, Path, PathBuf};

use futures::FutureExt;
use tracing::{error, info, warn};

use crate::cluster::{
    ClusterBackend, ClusterBuilder, ClusterHandle, ExperimentError, ExperimentResult,
    FlexibleQuorum, RunSummary,
};

// A named quorum policy. The name becomes a directory in the experiment's log tree.
#[derive(Debug, Clone, PartialEq)]
pub struct QuorumConfig {
    pub name: String,
    pub quorum: FlexibleQuorum,
}

impl QuorumConfig {
    pub fn new(name: &str, quorum: FlexibleQuorum) -> Self {
        Self {
            name: name.to_string(),
            quorum,
        }
    }
}

// Where the orchestrator is in its lifecycle. Shutdown is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorState {
    Building,
    Ready,
    Configuring,
    Running,
    ShutDown,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Completed(RunSummary),
    Failed(String),
}

// One cell of the run matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct RunRecord {
    pub config_name: String,
    pub repetition: usize,
    pub log_directory: PathBuf,
    pub outcome: RunOutcome,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExperimentReport {
    pub runs: Vec<RunRecord>,
}

impl ExperimentReport {
    pub fn completed(&self) -> usize {
        self.runs
            .iter()
            .filter(|r| matches!(r.outcome, RunOutcome::Completed(_)))
            .count()
    }

    pub fn failed(&self) -> usize {
        self.runs.len() - self.completed()
    }
}

// Runs the same cluster repeatedly under a list of quorum policies. Runs are
// ordered repetition-major: every config is run once for repetition 0, then
// every config again for repetition 1, and so on. Each run logs into
// <root>/<config-name>/run-<repetition>.
pub struct ExperimentOrchestrator {
    experiment_root: PathBuf,
    num_runs: usize,
    configs: Vec<QuorumConfig>,
    state: OrchestratorState,
}

impl ExperimentOrchestrator {
    // Fails if two configs share a name, or a name is not usable as a single
    // directory name, since either would make run directories collide.
    pub fn new(
        experiment_root: impl AsRef<Path>,
        num_runs: usize,
        configs: Vec<QuorumConfig>,
    ) -> ExperimentResult<Self> {
        let mut names = HashSet::new();
        for config in &configs {
            check_config_name(&config.name)?;
            if !names.insert(config.name.as_str()) {
                return Err(ExperimentError::InvalidExperiment(format!(
                    "config name '{}' is used more than once",
                    config.name
                )));
            }
        }
        Ok(Self {
            experiment_root: experiment_root.as_ref().to_path_buf(),
            num_runs,
            configs,
            state: OrchestratorState::Building,
        })
    }

    pub fn state(&self) -> OrchestratorState {
        self.state
    }

    pub fn run_directory(&self, config_name: &str, repetition: usize) -> PathBuf {
        self.experiment_root
            .join(config_name)
            .join(format!("run-{}", repetition))
    }

    // Returns the directories of all runs, in the order they are executed.
    pub fn run_directories(&self) -> Vec<PathBuf> {
        self.matrix()
            .map(|(r, config)| self.run_directory(&config.name, r))
            .collect()
    }

    // Builds the cluster and then executes the full run matrix against it.
    pub async fn execute<B>(
        &mut self,
        builder: ClusterBuilder,
        backend: B,
    ) -> ExperimentResult<ExperimentReport>
    where
        B: ClusterBackend + Send,
    {
        self.check_not_shut_down()?;
        self.state = OrchestratorState::Building;
        let handle = builder.build(backend).await?;
        self.execute_on(handle).await
    }

    // Executes the full run matrix against an already built cluster and shuts
    // it down afterwards. The cluster is shut down on every path out of here,
    // including configuration errors and panics inside a run; a failed run is
    // recorded and the matrix carries on. Once shut down, the orchestrator
    // refuses to run again and only releases the handle it is given.
    pub async fn execute_on<B>(
        &mut self,
        mut handle: ClusterHandle<B>,
    ) -> ExperimentResult<ExperimentReport>
    where
        B: ClusterBackend + Send,
    {
        if let Err(e) = self.check_not_shut_down() {
            if let Err(shutdown_error) = handle.shutdown().await {
                error!("releasing rejected cluster failed: {}", shutdown_error);
            }
            return Err(e);
        }
        self.state = OrchestratorState::Ready;
        let matrix = AssertUnwindSafe(self.run_matrix(&mut handle))
            .catch_unwind()
            .await;

        self.state = OrchestratorState::ShutDown;
        let shutdown = handle.shutdown().await;

        match matrix {
            Err(panic) => {
                if let Err(e) = shutdown {
                    error!("shutdown after panic failed: {}", e);
                }
                std::panic::resume_unwind(panic)
            }
            Ok(Err(e)) => {
                if let Err(shutdown_error) = shutdown {
                    error!("shutdown after abort failed: {}", shutdown_error);
                }
                Err(e)
            }
            Ok(Ok(report)) => {
                shutdown?;
                info!(
                    completed = report.completed(),
                    failed = report.failed(),
                    "experiment finished"
                );
                Ok(report)
            }
        }
    }

    async fn run_matrix<B>(
        &mut self,
        handle: &mut ClusterHandle<B>,
    ) -> ExperimentResult<ExperimentReport>
    where
        B: ClusterBackend + Send,
    {
        let cells: Vec<(usize, QuorumConfig)> =
            self.matrix().map(|(r, c)| (r, c.clone())).collect();

        let mut report = ExperimentReport::default();
        for (repetition, config) in cells {
            self.state = OrchestratorState::Configuring;
            handle.change_cluster_config(config.quorum)?;

            let log_directory = self.run_directory(&config.name, repetition);
            info!("RUNNING: {}", log_directory.display());
            self.state = OrchestratorState::Running;

            let outcome = match handle.run(&log_directory).await {
                Ok(summary) => RunOutcome::Completed(summary),
                Err(e) if e.is_run_failure() => {
                    warn!(config = %config.name, repetition, "skipping failed run: {}", e);
                    RunOutcome::Failed(e.to_string())
                }
                Err(e) => return Err(e),
            };
            report.runs.push(RunRecord {
                config_name: config.name.clone(),
                repetition,
                log_directory,
                outcome,
            });
        }
        Ok(report)
    }

    fn matrix(&self) -> impl Iterator<Item = (usize, &QuorumConfig)> + '_ {
        (0..self.num_runs).flat_map(move |r| self.configs.iter().map(move |c| (r, c)))
    }

    fn check_not_shut_down(&self) -> ExperimentResult<()> {
        if self.state == OrchestratorState::ShutDown {
            return Err(ExperimentError::ClusterShutDown);
        }
        Ok(())
    }
}

// A config name must be exactly one plain path component.
fn check_config_name(name: &str) -> ExperimentResult<()> {
    let mut components = Path::new(name).components();
    let single = match (components.next(), components.next()) {
        (Some(Component::Normal(part)), None) => part == OsStr::new(name),
        _ => false,
    };
    if !single {
        return Err(ExperimentError::InvalidExperiment(format!(
            "config name '{}' is not a plain directory name",
            name
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeBackend;
    use crate::workload::RequestInterval;
    use async_tempfile::TempDir;

    const PHASE: RequestInterval = RequestInterval::new(1.0, 10.0, 0.5);

    fn configs() -> Vec<QuorumConfig> {
        vec![
            QuorumConfig::new("MajorityQuorum", FlexibleQuorum::new(3, 3)),
            QuorumConfig::new("FlexQuorum", FlexibleQuorum::new(4, 2)),
        ]
    }

    fn builder() -> ClusterBuilder {
        let mut builder = ClusterBuilder::new(5).initial_leader(5);
        for id in 1..=5 {
            builder = builder
                .server(id, "zone")
                .and_then(|b| b.client(id, "zone", vec![PHASE]))
                .expect("declare");
        }
        builder
    }

    #[test]
    fn test_run_directories_unique_and_ordered() {
        let orchestrator =
            ExperimentOrchestrator::new("logs/exp", 3, configs()).expect("orchestrator");
        let dirs = orchestrator.run_directories();

        assert_eq!(dirs.len(), 6);
        let unique: HashSet<&PathBuf> = dirs.iter().collect();
        assert_eq!(unique.len(), 6);
        assert_eq!(
            dirs,
            vec![
                PathBuf::from("logs/exp/MajorityQuorum/run-0"),
                PathBuf::from("logs/exp/FlexQuorum/run-0"),
                PathBuf::from("logs/exp/MajorityQuorum/run-1"),
                PathBuf::from("logs/exp/FlexQuorum/run-1"),
                PathBuf::from("logs/exp/MajorityQuorum/run-2"),
                PathBuf::from("logs/exp/FlexQuorum/run-2"),
            ]
        );
    }

    #[tokio::test]
    async fn test_execute_visits_every_cell_once() {
        let root = TempDir::new().await.expect("tempdir");
        let backend = FakeBackend::new();
        let calls = backend.calls();
        let mut orchestrator =
            ExperimentOrchestrator::new(root.dir_path(), 3, configs()).expect("orchestrator");

        let report = orchestrator.execute(builder(), backend).await.expect("execute");

        assert_eq!(report.completed(), 6);
        assert_eq!(orchestrator.state(), OrchestratorState::ShutDown);

        let calls = calls.lock().await;
        let visited: Vec<PathBuf> = calls.runs.iter().map(|r| r.log_directory.clone()).collect();
        assert_eq!(visited, orchestrator.run_directories());
        assert_eq!(calls.runs[0].quorum(), FlexibleQuorum::new(3, 3));
        assert_eq!(calls.runs[1].quorum(), FlexibleQuorum::new(4, 2));
        assert_eq!(calls.provisioned, 1);
        assert_eq!(calls.shutdowns, 1);
    }

    #[tokio::test]
    async fn test_failed_runs_do_not_abort() {
        let root = TempDir::new().await.expect("tempdir");
        let backend = FakeBackend::failing_runs(&[0, 3]);
        let calls = backend.calls();
        let mut orchestrator =
            ExperimentOrchestrator::new(root.dir_path(), 3, configs()).expect("orchestrator");

        let report = orchestrator.execute(builder(), backend).await.expect("execute");

        assert_eq!(report.runs.len(), 6);
        assert_eq!(report.failed(), 2);
        assert!(matches!(report.runs[0].outcome, RunOutcome::Failed(_)));
        assert!(matches!(report.runs[3].outcome, RunOutcome::Failed(_)));
        assert_eq!(calls.lock().await.shutdowns, 1);
    }

    #[tokio::test]
    async fn test_config_error_aborts_but_shuts_down() {
        let root = TempDir::new().await.expect("tempdir");
        let backend = FakeBackend::new();
        let calls = backend.calls();
        let broken = vec![
            QuorumConfig::new("MajorityQuorum", FlexibleQuorum::new(3, 3)),
            QuorumConfig::new("Disjoint", FlexibleQuorum::new(2, 2)),
        ];
        let mut orchestrator =
            ExperimentOrchestrator::new(root.dir_path(), 3, broken).expect("orchestrator");

        let result = orchestrator.execute(builder(), backend).await;

        assert!(matches!(result, Err(ExperimentError::InvalidQuorum { .. })));
        let calls = calls.lock().await;
        assert_eq!(calls.runs.len(), 1);
        assert_eq!(calls.shutdowns, 1);
        assert_eq!(orchestrator.state(), OrchestratorState::ShutDown);
    }

    #[tokio::test]
    async fn test_panic_still_shuts_down() {
        let root = TempDir::new().await.expect("tempdir");
        let backend = FakeBackend::panicking_runs(&[1]);
        let calls = backend.calls();
        let mut orchestrator =
            ExperimentOrchestrator::new(root.dir_path(), 1, configs()).expect("orchestrator");

        let result = AssertUnwindSafe(orchestrator.execute(builder(), backend))
            .catch_unwind()
            .await;

        assert!(result.is_err());
        assert_eq!(calls.lock().await.shutdowns, 1);
    }

    #[tokio::test]
    async fn test_build_error_touches_nothing() {
        let backend = FakeBackend::new();
        let calls = backend.calls();
        let mut orchestrator =
            ExperimentOrchestrator::new("unused", 1, configs()).expect("orchestrator");

        let result = orchestrator
            .execute(ClusterBuilder::new(5), backend)
            .await;

        assert!(matches!(result, Err(ExperimentError::IncompleteSpec(_))));
        let calls = calls.lock().await;
        assert_eq!(calls.provisioned, 0);
        assert_eq!(calls.shutdowns, 0);
    }

    #[test]
    fn test_rejects_colliding_config_names() {
        let duplicate = vec![
            QuorumConfig::new("Q", FlexibleQuorum::new(3, 3)),
            QuorumConfig::new("Q", FlexibleQuorum::new(4, 2)),
        ];
        assert!(matches!(
            ExperimentOrchestrator::new("logs/exp", 3, duplicate),
            Err(ExperimentError::InvalidExperiment(_))
        ));

        for name in ["", ".", "..", "a/b", "../escape", "/abs", "Flex/"] {
            let configs = vec![QuorumConfig::new(name, FlexibleQuorum::new(3, 3))];
            assert!(
                matches!(
                    ExperimentOrchestrator::new("logs/exp", 1, configs),
                    Err(ExperimentError::InvalidExperiment(_))
                ),
                "accepted '{}'",
                name
            );
        }
    }

    #[tokio::test]
    async fn test_no_second_experiment_after_shutdown() {
        let root = TempDir::new().await.expect("tempdir");
        let mut orchestrator =
            ExperimentOrchestrator::new(root.dir_path(), 1, configs()).expect("orchestrator");
        orchestrator
            .execute(builder(), FakeBackend::new())
            .await
            .expect("first execute");

        let backend = FakeBackend::new();
        let calls = backend.calls();
        let result = orchestrator.execute(builder(), backend).await;
        assert!(matches!(result, Err(ExperimentError::ClusterShutDown)));
        assert_eq!(calls.lock().await.provisioned, 0);

        let backend = FakeBackend::new();
        let calls = backend.calls();
        let handle = builder().build(backend).await.expect("build");
        let result = orchestrator.execute_on(handle).await;
        assert!(matches!(result, Err(ExperimentError::ClusterShutDown)));
        let calls = calls.lock().await;
        assert!(calls.runs.is_empty());
        assert_eq!(calls.shutdowns, 1);
        assert_eq!(orchestrator.state(), OrchestratorState::ShutDown);
    }
}
