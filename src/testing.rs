use std::collections::BTreeSet;

use async_std::sync::{Arc, Mutex};
use async_trait::async_trait;

use crate::cluster::{ClusterBackend, ClusterSpec, RunConfig, RunSummary};

// Everything a FakeBackend has been asked to do, in order.
#[derive(Default)]
pub struct FakeCalls {
    pub provisioned: usize,
    pub runs: Vec<RunConfig>,
    pub shutdowns: usize,
}

// A fake implementation of the ClusterBackend trait for testing purposes.
// Records every call and fails the runs whose (zero-based) index it was told
// to fail.
pub struct FakeBackend {
    calls: Arc<Mutex<FakeCalls>>,
    failing_runs: BTreeSet<usize>,
    panicking_runs: BTreeSet<usize>,
    failing_shutdown: bool,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::failing_runs(&[])
    }

    pub fn failing_runs(indexes: &[usize]) -> Self {
        FakeBackend {
            calls: Arc::new(Mutex::new(FakeCalls::default())),
            failing_runs: indexes.iter().copied().collect(),
            panicking_runs: BTreeSet::new(),
            failing_shutdown: false,
        }
    }

    pub fn panicking_runs(indexes: &[usize]) -> Self {
        FakeBackend {
            panicking_runs: indexes.iter().copied().collect(),
            ..Self::new()
        }
    }

    pub fn failing_shutdown() -> Self {
        FakeBackend {
            failing_shutdown: true,
            ..Self::new()
        }
    }

    pub fn calls(&self) -> Arc<Mutex<FakeCalls>> {
        self.calls.clone()
    }
}

#[async_trait]
impl ClusterBackend for FakeBackend {
    async fn provision(&mut self, _spec: &ClusterSpec) -> Result<(), String> {
        self.calls.lock().await.provisioned += 1;
        Ok(())
    }

    async fn run(&mut self, config: &RunConfig) -> Result<RunSummary, String> {
        let index = {
            let mut calls = self.calls.lock().await;
            calls.runs.push(config.clone());
            calls.runs.len() - 1
        };
        if self.panicking_runs.contains(&index) {
            panic!("injected panic in run {}", index);
        }
        if self.failing_runs.contains(&index) {
            return Err(format!("injected failure in run {}", index));
        }
        Ok(RunSummary::default())
    }

    async fn shutdown(&mut self) -> Result<(), String> {
        self.calls.lock().await.shutdowns += 1;
        if self.failing_shutdown {
            return Err("injected shutdown failure".to_string());
        }
        Ok(())
    }
}
