use std::sync::Arc;
use std::time::Duration;

use stampede_metrics::{Collector, MetricHandle, MetricKind, MetricValue};

pub const HTTP_REQS: &str = "http_reqs";
pub const HTTP_REQ_DURATION: &str = "http_req_duration";
pub const HTTP_REQ_FAILED: &str = "http_req_failed";
pub const DATA_SENT: &str = "data_sent";
pub const DATA_RECEIVED: &str = "data_received";
pub const CHECKS: &str = "checks";
pub const ITERATIONS: &str = "iterations";
pub const ITERATION_DURATION: &str = "iteration_duration";
pub const ITERATION_FAILED: &str = "iteration_failed";
pub const SCENARIO_ERRORS: &str = "scenario_errors";
pub const GROUP_DURATION: &str = "group_duration";
pub const VUS: &str = "vus";
pub const VUS_MAX: &str = "vus_max";

pub const ALL: &[(&str, MetricKind)] = &[
    (HTTP_REQS, MetricKind::Counter),
    (HTTP_REQ_DURATION, MetricKind::Trend),
    (HTTP_REQ_FAILED, MetricKind::Rate),
    (DATA_SENT, MetricKind::Counter),
    (DATA_RECEIVED, MetricKind::Counter),
    (CHECKS, MetricKind::Rate),
    (ITERATIONS, MetricKind::Counter),
    (ITERATION_DURATION, MetricKind::Trend),
    (ITERATION_FAILED, MetricKind::Rate),
    (SCENARIO_ERRORS, MetricKind::Counter),
    (GROUP_DURATION, MetricKind::Trend),
    (VUS, MetricKind::Gauge),
    (VUS_MAX, MetricKind::Gauge),
];

pub(crate) fn millis(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

/// Handles to every built-in series, resolved once per run.
#[derive(Debug, Clone)]
pub struct BuiltinMetrics {
    collector: Arc<Collector>,
    http_reqs: MetricHandle,
    http_req_duration: MetricHandle,
    http_req_failed: MetricHandle,
    data_sent: MetricHandle,
    data_received: MetricHandle,
    checks: MetricHandle,
    iterations: MetricHandle,
    iteration_duration: MetricHandle,
    iteration_failed: MetricHandle,
    scenario_errors: MetricHandle,
    group_duration: MetricHandle,
    vus: MetricHandle,
    vus_max: MetricHandle,
}

// Every handle's kind was fixed by `register`, so recording cannot mismatch.
fn put(handle: &MetricHandle, value: MetricValue) {
    let _ = handle.record(value);
}

impl BuiltinMetrics {
    pub fn register(collector: Arc<Collector>) -> stampede_metrics::Result<Self> {
        let h = |name: &str, kind: MetricKind| collector.handle(name, kind);
        Ok(Self {
            http_reqs: h(HTTP_REQS, MetricKind::Counter)?,
            http_req_duration: h(HTTP_REQ_DURATION, MetricKind::Trend)?,
            http_req_failed: h(HTTP_REQ_FAILED, MetricKind::Rate)?,
            data_sent: h(DATA_SENT, MetricKind::Counter)?,
            data_received: h(DATA_RECEIVED, MetricKind::Counter)?,
            checks: h(CHECKS, MetricKind::Rate)?,
            iterations: h(ITERATIONS, MetricKind::Counter)?,
            iteration_duration: h(ITERATION_DURATION, MetricKind::Trend)?,
            iteration_failed: h(ITERATION_FAILED, MetricKind::Rate)?,
            scenario_errors: h(SCENARIO_ERRORS, MetricKind::Counter)?,
            group_duration: h(GROUP_DURATION, MetricKind::Trend)?,
            vus: h(VUS, MetricKind::Gauge)?,
            vus_max: h(VUS_MAX, MetricKind::Gauge)?,
            collector,
        })
    }

    pub fn collector(&self) -> &Arc<Collector> {
        &self.collector
    }

    /// `duration` is `None` when no response arrived.
    pub fn request(&self, duration: Option<Duration>, failed: bool, sent: u64, received: u64) {
        put(&self.http_reqs, MetricValue::Counter(1));
        if let Some(d) = duration {
            put(&self.http_req_duration, MetricValue::Trend(millis(d)));
        }
        put(&self.http_req_failed, MetricValue::Rate(failed));
        put(&self.data_sent, MetricValue::Counter(sent));
        put(&self.data_received, MetricValue::Counter(received));
    }

    pub fn iteration(&self, duration: Duration, failed: bool) {
        put(&self.iterations, MetricValue::Counter(1));
        put(&self.iteration_duration, MetricValue::Trend(millis(duration)));
        put(&self.iteration_failed, MetricValue::Rate(failed));
        if failed {
            put(&self.scenario_errors, MetricValue::Counter(1));
        }
    }

    pub fn check(&self, group: &str, name: &str, passed: bool) {
        put(&self.checks, MetricValue::Rate(passed));
        self.collector.record_check(group, name, passed);
    }

    pub fn group(&self, duration: Duration) {
        put(&self.group_duration, MetricValue::Trend(millis(duration)));
    }

    pub fn vus(&self, live: u64) {
        put(&self.vus, MetricValue::Gauge(live.min(i64::MAX as u64) as i64));
    }

    pub fn vus_max(&self, max: u64) {
        put(&self.vus_max, MetricValue::Gauge(max.min(i64::MAX as u64) as i64));
    }
}
