use std::collections::HashSet;
use std::path::{Path, PathBuf};

use async_std::fs;
use tracing::{Instrument, debug, error, info, info_span};

use crate::cluster::{
    ClusterBackend, ClusterSpec, ExperimentError, ExperimentResult, FlexibleQuorum, RunConfig,
    RunSummary,
};
use crate::workload::{NodeId, ReadConsistency};

const RUN_CONFIG_FILE: &str = "run-config.json";

// A built cluster. The topology is fixed at this point, but the consistency
// each client reads at and the quorum policy can change between runs without
// giving up the provisioned resources.
pub struct ClusterHandle<B> {
    spec: ClusterSpec,
    backend: B,
    used_directories: HashSet<PathBuf>,
    shut_down: bool,
}

impl<B> ClusterHandle<B>
where
    B: ClusterBackend + Send,
{
    pub(crate) fn new(spec: ClusterSpec, backend: B) -> Self {
        Self {
            spec,
            backend,
            used_directories: HashSet::new(),
            shut_down: false,
        }
    }

    // Returns the current configuration, including any changes made since build.
    pub fn spec(&self) -> &ClusterSpec {
        &self.spec
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }

    // Changes the read consistency used by a client in subsequent runs.
    pub fn change_client_config(
        &mut self,
        client_id: NodeId,
        read_consistency: ReadConsistency,
    ) -> ExperimentResult<()> {
        self.check_live()?;
        let client = self
            .spec
            .clients
            .get_mut(&client_id)
            .ok_or(ExperimentError::UnknownClient(client_id))?;
        client.read_consistency = read_consistency;
        debug!(client = client_id, consistency = %read_consistency, "changed client config");
        Ok(())
    }

    // Changes the quorum policy applied from the next run onwards.
    pub fn change_cluster_config(&mut self, quorum: FlexibleQuorum) -> ExperimentResult<()> {
        self.check_live()?;
        quorum.validate(self.spec.cluster_size)?;
        self.spec.initial_flexible_quorum = Some(quorum);
        debug!(
            read = quorum.read_quorum_size,
            write = quorum.write_quorum_size,
            "changed cluster config"
        );
        Ok(())
    }

    // Executes one full run with the current configuration and returns once it
    // has finished. Artifacts go below `log_directory`, which must not have been
    // used by an earlier run of this handle. A failed run leaves the cluster
    // usable for the next one.
    pub async fn run(&mut self, log_directory: impl AsRef<Path>) -> ExperimentResult<RunSummary> {
        self.check_live()?;
        let log_directory = log_directory.as_ref().to_path_buf();
        if !self.used_directories.insert(log_directory.clone()) {
            return Err(ExperimentError::LogDirectoryReused(log_directory));
        }

        let config = RunConfig {
            log_directory: log_directory.clone(),
            cluster: self.spec.clone(),
        };
        if let Err(e) = write_run_config(&config).await {
            error!(dir = %log_directory.display(), "could not prepare run: {}", e);
            return Err(ExperimentError::RunFailed {
                log_directory,
                reason: format!("writing {} failed: {}", RUN_CONFIG_FILE, e),
            });
        }

        let span = info_span!("run", dir = %log_directory.display());
        let result = self.backend.run(&config).instrument(span).await;
        match result {
            Ok(summary) => {
                info!(
                    dir = %log_directory.display(),
                    requests = summary.total_requests(),
                    responses = summary.total_responses(),
                    "run completed"
                );
                Ok(summary)
            }
            Err(reason) => {
                error!(dir = %log_directory.display(), "run failed: {}", reason);
                Err(ExperimentError::RunFailed {
                    log_directory,
                    reason,
                })
            }
        }
    }

    // Releases everything held by the cluster. Every call after the first one,
    // to this or any other operation, fails with ClusterShutDown.
    pub async fn shutdown(&mut self) -> ExperimentResult<()> {
        self.check_live()?;
        self.shut_down = true;
        self.backend
            .shutdown()
            .await
            .map_err(ExperimentError::Shutdown)?;
        info!("cluster shut down");
        Ok(())
    }

    fn check_live(&self) -> ExperimentResult<()> {
        if self.shut_down {
            return Err(ExperimentError::ClusterShutDown);
        }
        Ok(())
    }
}

async fn write_run_config(config: &RunConfig) -> ExperimentResult<()> {
    let directory = async_std::path::PathBuf::from(config.log_directory.clone());
    fs::create_dir_all(&directory).await?;
    let contents = serde_json::to_string_pretty(config).map_err(std::io::Error::other)?;
    fs::write(directory.join(RUN_CONFIG_FILE), contents).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::ClusterBuilder;
    use crate::testing::FakeBackend;
    use crate::workload::RequestInterval;
    use async_tempfile::TempDir;

    const PHASE: RequestInterval = RequestInterval::new(1.0, 10.0, 0.5);

    struct Fixture {
        dir: TempDir,
        handle: ClusterHandle<FakeBackend>,
    }

    impl Fixture {
        async fn new(backend: FakeBackend) -> Self {
            let handle = ClusterBuilder::new(5)
                .initial_leader(5)
                .server(1, "us-west2-a")
                .and_then(|b| b.server(2, "us-south1-a"))
                .and_then(|b| b.server(3, "us-east4-a"))
                .and_then(|b| b.server(4, "europe-southwest1-a"))
                .and_then(|b| b.server(5, "europe-west4-a"))
                .and_then(|b| b.client(1, "us-west2-a", vec![PHASE]))
                .and_then(|b| b.client(4, "europe-southwest1-a", vec![PHASE]))
                .expect("declarations")
                .build(backend)
                .await
                .expect("build");
            Fixture {
                dir: TempDir::new().await.expect("tempdir"),
                handle,
            }
        }

        fn path(&self, name: &str) -> PathBuf {
            self.dir.dir_path().join(name)
        }
    }

    #[tokio::test]
    async fn test_change_client_config() {
        let mut f = Fixture::new(FakeBackend::new()).await;

        f.handle
            .change_client_config(4, ReadConsistency::Local)
            .expect("change");
        assert_eq!(
            f.handle.spec().clients[&4].read_consistency,
            ReadConsistency::Local
        );

        let result = f.handle.change_client_config(2, ReadConsistency::Local);
        assert!(matches!(result, Err(ExperimentError::UnknownClient(2))));
    }

    #[tokio::test]
    async fn test_change_cluster_config_applies_to_next_run() {
        let backend = FakeBackend::new();
        let calls = backend.calls();
        let mut f = Fixture::new(backend).await;

        let (first, second) = (f.path("first"), f.path("second"));
        f.handle.run(&first).await.expect("first run");
        f.handle
            .change_cluster_config(FlexibleQuorum::new(4, 2))
            .expect("change");
        f.handle.run(&second).await.expect("second run");

        let calls = calls.lock().await;
        assert_eq!(calls.runs.len(), 2);
        assert_eq!(calls.runs[0].quorum(), FlexibleQuorum::majority(5));
        assert_eq!(calls.runs[1].quorum(), FlexibleQuorum::new(4, 2));
    }

    #[tokio::test]
    async fn test_invalid_quorum_rejected() {
        let mut f = Fixture::new(FakeBackend::new()).await;
        let result = f.handle.change_cluster_config(FlexibleQuorum::new(2, 2));
        assert!(matches!(result, Err(ExperimentError::InvalidQuorum { .. })));
        assert!(f.handle.spec().initial_flexible_quorum.is_none());
    }

    #[tokio::test]
    async fn test_run_writes_config() {
        let mut f = Fixture::new(FakeBackend::new()).await;
        let dir = f.path("MajorityQuorum/run-0");

        f.handle.run(&dir).await.expect("run");

        let contents = std::fs::read_to_string(dir.join(RUN_CONFIG_FILE)).expect("read");
        let parsed: RunConfig = serde_json::from_str(&contents).expect("parse");
        assert_eq!(parsed.log_directory, dir);
        assert_eq!(parsed.cluster.initial_leader, 5);
    }

    #[tokio::test]
    async fn test_reused_directory() {
        let mut f = Fixture::new(FakeBackend::new()).await;
        let dir = f.path("run-0");

        f.handle.run(&dir).await.expect("run");
        let result = f.handle.run(&dir).await;
        assert!(matches!(result, Err(ExperimentError::LogDirectoryReused(_))));
    }

    #[tokio::test]
    async fn test_failed_run_keeps_cluster_usable() {
        let mut f = Fixture::new(FakeBackend::failing_runs(&[0])).await;

        let (first, second) = (f.path("run-0"), f.path("run-1"));
        let result = f.handle.run(&first).await;
        assert!(matches!(result, Err(ExperimentError::RunFailed { .. })));

        f.handle.run(&second).await.expect("second run");
    }

    #[tokio::test]
    async fn test_unwritable_directory_fails_only_that_run() {
        let backend = FakeBackend::new();
        let calls = backend.calls();
        let mut f = Fixture::new(backend).await;

        // A directory cannot be created below a regular file.
        let blocker = f.path("blocker");
        std::fs::write(&blocker, "not a directory").expect("write blocker");
        let (blocked, next) = (blocker.join("run-0"), f.path("run-1"));

        let result = f.handle.run(&blocked).await;
        assert!(matches!(result, Err(ExperimentError::RunFailed { .. })));
        assert!(calls.lock().await.runs.is_empty());

        f.handle.run(&next).await.expect("next run");
        assert_eq!(calls.lock().await.runs.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_backend_shutdown() {
        let mut f = Fixture::new(FakeBackend::failing_shutdown()).await;

        let result = f.handle.shutdown().await;
        assert!(matches!(result, Err(ExperimentError::Shutdown(_))));
        assert!(f.handle.is_shut_down());
    }

    #[tokio::test]
    async fn test_operations_after_shutdown() {
        let backend = FakeBackend::new();
        let calls = backend.calls();
        let mut f = Fixture::new(backend).await;

        let dir = f.path("run-0");
        f.handle.shutdown().await.expect("shutdown");
        assert!(f.handle.is_shut_down());
        assert_eq!(calls.lock().await.shutdowns, 1);

        assert!(matches!(
            f.handle.run(&dir).await,
            Err(ExperimentError::ClusterShutDown)
        ));
        assert!(matches!(
            f.handle.change_client_config(1, ReadConsistency::Leader),
            Err(ExperimentError::ClusterShutDown)
        ));
        assert!(matches!(
            f.handle.change_cluster_config(FlexibleQuorum::new(3, 3)),
            Err(ExperimentError::ClusterShutDown)
        ));
        assert!(matches!(
            f.handle.shutdown().await,
            Err(ExperimentError::ClusterShutDown)
        ));
        assert_eq!(calls.lock().await.shutdowns, 1);
    }
}
