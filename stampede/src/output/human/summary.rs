use std::fmt::Write as _;

use stampede_core::{PhaseOutcome, RunReport, ShutdownStatus, builtin};
use stampede_metrics::{CheckSummary, MetricSeriesSummary, SummaryValues};

use super::format::*;

pub(crate) fn render(report: &RunReport) -> String {
    let mut out = String::new();

    out.push_str("summary\n");
    writeln!(out, "  duration: {}", format_elapsed(report.duration)).ok();
    writeln!(out, "  setup: {}", phase(&report.setup)).ok();
    writeln!(out, "  teardown: {}", phase(&report.teardown)).ok();
    match report.shutdown {
        ShutdownStatus::Complete => out.push_str("  shutdown: complete\n"),
        ShutdownStatus::Incomplete { abandoned } => {
            writeln!(out, "  shutdown: incomplete ({abandoned} workers abandoned)").ok();
        }
    }

    let failed = report
        .metric(builtin::HTTP_REQ_FAILED)
        .and_then(|m| match m.values {
            SummaryValues::Rate { hits, .. } => Some(hits),
            _ => None,
        })
        .unwrap_or(0);
    writeln!(
        out,
        "  requests: {} (failed {failed})",
        report.total_requests
    )
    .ok();
    writeln!(out, "  iterations: {}", report.total_iterations).ok();

    let secs = report.duration.as_secs_f64().max(1e-9);
    writeln!(
        out,
        "  rates: rps={} iters/s={}",
        format_rate(report.total_requests as f64 / secs),
        format_rate(report.total_iterations as f64 / secs)
    )
    .ok();

    render_checks(&report.checks, &mut out);
    render_metrics(&report.metrics, &mut out);
    render_thresholds(report, &mut out);

    out
}

fn phase(outcome: &PhaseOutcome) -> String {
    match outcome {
        PhaseOutcome::Completed => "ok".to_string(),
        PhaseOutcome::Failed(reason) => format!("failed: {reason}"),
    }
}

fn render_checks(checks: &[CheckSummary], out: &mut String) {
    if checks.is_empty() {
        return;
    }

    out.push_str("\nchecks\n");

    let mut rows: Vec<&CheckSummary> = checks.iter().collect();
    rows.sort_by(|a, b| a.group.cmp(&b.group).then_with(|| a.name.cmp(&b.name)));

    let mut current_group: Option<&str> = None;
    for c in rows {
        if current_group != Some(c.group.as_str()) {
            current_group = Some(c.group.as_str());
            if c.group.is_empty() {
                out.push_str("  group: -\n");
            } else {
                writeln!(out, "  group: {}", c.group).ok();
            }
        }

        let status = if c.fails > 0 { "FAIL" } else { "OK" };
        writeln!(
            out,
            "    {}: pass={}/{} fail={} [{status}]",
            c.name,
            c.passes,
            c.total(),
            c.fails
        )
        .ok();
    }
}

fn render_metrics(metrics: &[MetricSeriesSummary], out: &mut String) {
    if metrics.is_empty() {
        return;
    }

    out.push_str("\nmetrics\n");

    let mut rows: Vec<&MetricSeriesSummary> = metrics.iter().collect();
    rows.sort_by(|a, b| a.name.cmp(&b.name));

    for m in rows {
        // `vus` ends at 0; `vus_max` already carries the peak.
        if m.name == builtin::VUS_MAX {
            continue;
        }
        let name = &m.name;

        match &m.values {
            SummaryValues::Counter { total }
                if name == builtin::DATA_SENT || name == builtin::DATA_RECEIVED =>
            {
                writeln!(out, "    {name} = {}", format_bytes(*total)).ok();
            }
            SummaryValues::Counter { total } => {
                writeln!(out, "    {name} = {total}").ok();
            }
            SummaryValues::Gauge { value, peak } => {
                let show = |v: &Option<i64>| v.map_or_else(|| "-".to_string(), |v| v.to_string());
                writeln!(out, "    {name} = end={} peak={}", show(value), show(peak)).ok();
            }
            SummaryValues::Rate { hits, total, rate } => match rate {
                Some(rate) => {
                    writeln!(
                        out,
                        "    {name} = {:.2}% ({hits}/{total})",
                        rate * 100.0
                    )
                    .ok();
                }
                None => {
                    writeln!(out, "    {name} = no data").ok();
                }
            },
            SummaryValues::Trend(t) if t.count == 0 => {
                writeln!(out, "    {name} = no data").ok();
            }
            SummaryValues::Trend(t) => {
                writeln!(
                    out,
                    "    {name} = avg={} min={} med={} max={} p(90)={} p(95)={} (n={})",
                    format_millis(t.avg),
                    format_millis(t.min),
                    format_millis(t.med),
                    format_millis(t.max),
                    format_millis(t.p90),
                    format_millis(t.p95),
                    t.count
                )
                .ok();
            }
        }
    }
}

fn render_thresholds(report: &RunReport, out: &mut String) {
    if report.thresholds.is_empty() {
        return;
    }

    out.push_str("\nthresholds\n");
    for t in &report.thresholds {
        let status = if t.passed { "PASS" } else { "FAIL" };
        writeln!(
            out,
            "    {}: {} [{status}] (observed {})",
            t.metric,
            t.expression,
            format_observed(t.observed)
        )
        .ok();
    }
}
