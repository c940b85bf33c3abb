use std::sync::Arc;
use std::time::Duration;

use crate::schedule::StageSnapshot;
use crate::thresholds_eval::ThresholdResult;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageProgress {
    /// 1-based stage index.
    pub stage: usize,
    pub stages: usize,
    pub stage_elapsed: Duration,
    pub stage_remaining: Duration,
    pub start_target: u64,
    pub end_target: u64,
    pub current_target: u64,
}

impl From<StageSnapshot> for StageProgress {
    fn from(st: StageSnapshot) -> Self {
        Self {
            stage: st.index + 1,
            stages: st.count,
            stage_elapsed: st.stage_elapsed,
            stage_remaining: st.stage_remaining,
            start_target: st.start_target,
            end_target: st.end_target,
            current_target: st.current_target,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProgressUpdate {
    /// Monotonic tick counter (1-based) for progress emissions.
    pub tick: u64,
    pub elapsed: Duration,
    pub total_duration: Duration,
    pub live_vus: u64,
    pub target_vus: u64,
    /// `None` for fixed-VU runs.
    pub stage: Option<StageProgress>,
    pub requests_total: u64,
    /// Requests/sec observed since the previous update.
    pub requests_per_sec: f64,
    pub iterations_total: u64,
    pub failed_requests: u64,
    /// Live threshold status against everything recorded so far.
    pub thresholds: Vec<ThresholdResult>,
}

pub type ProgressFn = Arc<dyn Fn(ProgressUpdate) + Send + Sync + 'static>;
