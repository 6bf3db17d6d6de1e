use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cluster::{ExperimentError, ExperimentResult};

// Rates too high to space requests by whole nanoseconds are sent back to back.
pub const MIN_REQUEST_DELAY: Duration = Duration::from_nanos(1);

// One phase of a piecewise-constant load curve. Clients replay their
// intervals in order, each for its full duration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RequestInterval {
    duration_secs: f64,
    requests_per_sec: f64,
    read_ratio: f64,
}

impl RequestInterval {
    // Values are checked by validate(), which both the planner and the cluster
    // builder call before accepting an interval.
    pub const fn new(duration_secs: f64, requests_per_sec: f64, read_ratio: f64) -> Self {
        Self {
            duration_secs,
            requests_per_sec,
            read_ratio,
        }
    }

    // Saturates for lengths too long to represent, which validate() rejects.
    pub fn duration(&self) -> Duration {
        Duration::try_from_secs_f64(self.duration_secs).unwrap_or(Duration::MAX)
    }

    pub fn duration_secs(&self) -> f64 {
        self.duration_secs
    }

    pub fn requests_per_sec(&self) -> f64 {
        self.requests_per_sec
    }

    pub fn read_ratio(&self) -> f64 {
        self.read_ratio
    }

    // Time between two consecutive requests, never below MIN_REQUEST_DELAY.
    // None if the interval is idle, or the rate is so low that the delay does
    // not fit into a Duration.
    pub fn request_delay(&self) -> Option<Duration> {
        if !(self.requests_per_sec > 0.0) {
            return None;
        }
        let delay = Duration::try_from_secs_f64(1.0 / self.requests_per_sec).ok()?;
        Some(delay.max(MIN_REQUEST_DELAY))
    }

    // Returns a copy of this interval lasting `factor` times as long.
    pub fn scaled(&self, factor: f64) -> Self {
        Self {
            duration_secs: self.duration_secs * factor,
            ..*self
        }
    }

    pub fn validate(&self) -> ExperimentResult<()> {
        if !(self.duration_secs > 0.0) || !self.duration_secs.is_finite() {
            return Err(ExperimentError::invalid_workload(format!(
                "interval duration must be positive, got {}",
                self.duration_secs
            )));
        }
        if Duration::try_from_secs_f64(self.duration_secs).is_err() {
            return Err(ExperimentError::invalid_workload(format!(
                "interval duration {} is too long",
                self.duration_secs
            )));
        }
        if !(self.requests_per_sec >= 0.0) || !self.requests_per_sec.is_finite() {
            return Err(ExperimentError::invalid_workload(format!(
                "request rate must be non-negative, got {}",
                self.requests_per_sec
            )));
        }
        if !(0.0..=1.0).contains(&self.read_ratio) {
            return Err(ExperimentError::invalid_workload(format!(
                "read ratio must be within [0, 1], got {}",
                self.read_ratio
            )));
        }
        Ok(())
    }
}

// The guarantee a client read gets relative to the latest committed write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadConsistency {
    #[default]
    Linearizable,
    Leader,
    Local,
}

impl ReadConsistency {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReadConsistency::Linearizable => "linearizable",
            ReadConsistency::Leader => "leader",
            ReadConsistency::Local => "local",
        }
    }
}

impl fmt::Display for ReadConsistency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReadConsistency {
    type Err = ExperimentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "linearizable" => Ok(ReadConsistency::Linearizable),
            "leader" => Ok(ReadConsistency::Leader),
            "local" => Ok(ReadConsistency::Local),
            other => Err(ExperimentError::invalid_workload(format!(
                "unknown read consistency '{}'",
                other
            ))),
        }
    }
}
