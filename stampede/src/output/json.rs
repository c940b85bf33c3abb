use serde::Serialize;
use std::collections::BTreeMap;
use std::io::Write as _;
use std::sync::Arc;

use stampede_core::{
    PhaseOutcome, ProgressFn, ProgressUpdate, RunConfig, RunReport, ShutdownStatus,
    ThresholdResult,
};
use stampede_metrics::SummaryValues;

use super::OutputFormatter;
use crate::scenarios::ScenarioName;

/// NDJSON progress records followed by one summary document, all on stdout.
pub(crate) struct JsonOutput;

impl OutputFormatter for JsonOutput {
    fn print_header(&self, _scenario: ScenarioName, _config: &RunConfig) {}

    fn progress(&self) -> Option<ProgressFn> {
        Some(Arc::new(move |u| {
            let line = build_progress_line(&u);
            emit_json_line(&line);
        }))
    }

    fn print_summary(&self, report: &RunReport) -> anyhow::Result<()> {
        let line = build_summary_line(report);
        emit_json_line(&line);
        Ok(())
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonThreshold {
    pub metric: String,
    pub expression: String,
    pub passed: bool,
    pub observed: Option<f64>,
}

impl From<&ThresholdResult> for JsonThreshold {
    fn from(t: &ThresholdResult) -> Self {
        Self {
            metric: t.metric.clone(),
            expression: t.expression.clone(),
            passed: t.passed,
            observed: t.observed,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonStage {
    pub stage: usize,
    pub stages: usize,
    pub target: u64,
    pub remaining_secs: f64,
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonProgressLine {
    pub kind: &'static str,
    pub tick: u64,
    pub elapsed_secs: f64,
    pub total_secs: f64,
    pub vus: u64,
    pub target_vus: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<JsonStage>,
    pub requests_total: u64,
    pub requests_per_sec: f64,
    pub iterations_total: u64,
    pub failed_requests_total: u64,
    pub thresholds: Vec<JsonThreshold>,
}

fn build_progress_line(u: &ProgressUpdate) -> JsonProgressLine {
    JsonProgressLine {
        kind: "progress",
        tick: u.tick,
        elapsed_secs: u.elapsed.as_secs_f64(),
        total_secs: u.total_duration.as_secs_f64(),
        vus: u.live_vus,
        target_vus: u.target_vus,
        stage: u.stage.as_ref().map(|s| JsonStage {
            stage: s.stage,
            stages: s.stages,
            target: s.current_target,
            remaining_secs: s.stage_remaining.as_secs_f64(),
        }),
        requests_total: u.requests_total,
        requests_per_sec: u.requests_per_sec,
        iterations_total: u.iterations_total,
        failed_requests_total: u.failed_requests,
        thresholds: u.thresholds.iter().map(JsonThreshold::from).collect(),
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub(crate) enum JsonPhase {
    Completed,
    Failed { error: String },
}

impl From<&PhaseOutcome> for JsonPhase {
    fn from(p: &PhaseOutcome) -> Self {
        match p {
            PhaseOutcome::Completed => Self::Completed,
            PhaseOutcome::Failed(error) => Self::Failed {
                error: error.clone(),
            },
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonShutdown {
    pub complete: bool,
    pub abandoned: usize,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub(crate) enum JsonMetric {
    Counter {
        total: u64,
    },
    Gauge {
        value: Option<i64>,
        peak: Option<i64>,
    },
    Rate {
        hits: u64,
        total: u64,
        rate: Option<f64>,
    },
    Trend {
        count: u64,
        min: Option<f64>,
        max: Option<f64>,
        avg: Option<f64>,
        med: Option<f64>,
        p90: Option<f64>,
        p95: Option<f64>,
        p99: Option<f64>,
    },
}

impl From<&SummaryValues> for JsonMetric {
    fn from(v: &SummaryValues) -> Self {
        match v {
            SummaryValues::Counter { total } => Self::Counter { total: *total },
            SummaryValues::Gauge { value, peak } => Self::Gauge {
                value: *value,
                peak: *peak,
            },
            SummaryValues::Rate { hits, total, rate } => Self::Rate {
                hits: *hits,
                total: *total,
                rate: *rate,
            },
            SummaryValues::Trend(t) => Self::Trend {
                count: t.count,
                min: t.min,
                max: t.max,
                avg: t.avg,
                med: t.med,
                p90: t.p90,
                p95: t.p95,
                p99: t.p99,
            },
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonCheck {
    pub group: String,
    pub name: String,
    pub passes: u64,
    pub fails: u64,
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonSummaryLine {
    pub kind: &'static str,
    pub passed: bool,
    pub duration_secs: f64,
    pub requests_total: u64,
    pub iterations_total: u64,
    pub setup: JsonPhase,
    pub teardown: JsonPhase,
    pub shutdown: JsonShutdown,
    pub thresholds: Vec<JsonThreshold>,
    pub checks: Vec<JsonCheck>,
    pub metrics: BTreeMap<String, JsonMetric>,
}

fn build_summary_line(report: &RunReport) -> JsonSummaryLine {
    let shutdown = match report.shutdown {
        ShutdownStatus::Complete => JsonShutdown {
            complete: true,
            abandoned: 0,
        },
        ShutdownStatus::Incomplete { abandoned } => JsonShutdown {
            complete: false,
            abandoned,
        },
    };

    JsonSummaryLine {
        kind: "summary",
        passed: report.passed,
        duration_secs: report.duration.as_secs_f64(),
        requests_total: report.total_requests,
        iterations_total: report.total_iterations,
        setup: JsonPhase::from(&report.setup),
        teardown: JsonPhase::from(&report.teardown),
        shutdown,
        thresholds: report.thresholds.iter().map(JsonThreshold::from).collect(),
        checks: report
            .checks
            .iter()
            .map(|c| JsonCheck {
                group: c.group.clone(),
                name: c.name.clone(),
                passes: c.passes,
                fails: c.fails,
            })
            .collect(),
        metrics: report
            .metrics
            .iter()
            .map(|m| (m.name.clone(), JsonMetric::from(&m.values)))
            .collect(),
    }
}

fn emit_json_line<T: Serialize>(line: &T) {
    let mut out = std::io::stdout().lock();
    if serde_json::to_writer(&mut out, line).is_ok() {
        let _ = writeln!(out);
    }
}
