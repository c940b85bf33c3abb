use std::time::Duration;

use stampede_metrics::{CheckSummary, MetricSeriesSummary};

use crate::thresholds_eval::ThresholdResult;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhaseOutcome {
    /// The scenario does not override the phase, or it returned `Ok`.
    Completed,
    Failed(String),
}

impl PhaseOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, PhaseOutcome::Failed(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownStatus {
    Complete,
    /// Some workers were still inside an iteration when the drain timeout hit.
    Incomplete { abandoned: usize },
}

/// Everything a finished run produced.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub metrics: Vec<MetricSeriesSummary>,
    pub checks: Vec<CheckSummary>,
    pub thresholds: Vec<ThresholdResult>,
    /// AND of every threshold result.
    pub passed: bool,
    pub total_requests: u64,
    pub total_iterations: u64,
    pub duration: Duration,
    pub setup: PhaseOutcome,
    pub teardown: PhaseOutcome,
    pub shutdown: ShutdownStatus,
}

impl RunReport {
    pub fn failed_thresholds(&self) -> impl Iterator<Item = &ThresholdResult> {
        self.thresholds.iter().filter(|t| !t.passed)
    }

    pub fn metric(&self, name: &str) -> Option<&MetricSeriesSummary> {
        self.metrics.iter().find(|m| m.name == name)
    }
}
