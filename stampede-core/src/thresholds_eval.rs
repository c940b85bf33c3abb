use stampede_metrics::{Collector, MetricKind, MetricValues, Snapshot};

use crate::config::EmptySeriesPolicy;
use crate::error::{Error, Result};
use crate::thresholds::{ThresholdAgg, ThresholdExpr, ThresholdSet, parse_threshold_expr};

#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdResult {
    pub metric: String,
    /// Expression text as configured.
    pub expression: String,
    pub passed: bool,
    /// `None` when the series had no data.
    pub observed: Option<f64>,
}

#[derive(Debug, Clone)]
struct CompiledThreshold {
    metric: String,
    raw: String,
    expr: ThresholdExpr,
}

/// Thresholds parsed and checked against the declared metric kinds.
#[derive(Debug, Clone, Default)]
pub struct CompiledThresholds {
    items: Vec<CompiledThreshold>,
}

fn supports(kind: MetricKind, agg: ThresholdAgg) -> bool {
    match kind {
        MetricKind::Counter => matches!(agg, ThresholdAgg::Count),
        MetricKind::Gauge => matches!(agg, ThresholdAgg::Max),
        MetricKind::Rate => matches!(agg, ThresholdAgg::Rate | ThresholdAgg::Count),
        MetricKind::Trend => !matches!(agg, ThresholdAgg::Rate),
    }
}

impl CompiledThresholds {
    /// Parses every expression and validates it against the metrics already
    /// declared in `collector`.
    pub fn compile(sets: &[ThresholdSet], collector: &Collector) -> Result<Self> {
        let mut items = Vec::new();
        for set in sets {
            let kind = collector
                .kind_of(&set.metric)
                .ok_or_else(|| Error::UnknownThresholdMetric(set.metric.clone()))?;

            for raw in &set.expressions {
                let expr = parse_threshold_expr(raw).map_err(|reason| Error::InvalidThreshold {
                    metric: set.metric.clone(),
                    expression: raw.clone(),
                    reason,
                })?;
                if !supports(kind, expr.agg) {
                    return Err(Error::IncompatibleAggregator {
                        metric: set.metric.clone(),
                        expression: raw.clone(),
                        kind,
                    });
                }
                items.push(CompiledThreshold {
                    metric: set.metric.clone(),
                    raw: raw.clone(),
                    expr,
                });
            }
        }
        Ok(Self { items })
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// One result per expression, in configuration order.
    pub fn evaluate(&self, snapshot: &Snapshot, empty: EmptySeriesPolicy) -> Vec<ThresholdResult> {
        self.items
            .iter()
            .map(|t| {
                let observed = snapshot
                    .get(&t.metric)
                    .and_then(|values| observed_value(values, t.expr.agg));
                let passed = match observed {
                    Some(v) => t.expr.passes(v),
                    None => empty == EmptySeriesPolicy::Pass,
                };
                ThresholdResult {
                    metric: t.metric.clone(),
                    expression: t.raw.clone(),
                    passed,
                    observed,
                }
            })
            .collect()
    }
}

pub fn all_passed(results: &[ThresholdResult]) -> bool {
    results.iter().all(|r| r.passed)
}

fn observed_value(values: &MetricValues, agg: ThresholdAgg) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    match (values, agg) {
        (MetricValues::Counter(n), ThresholdAgg::Count) => Some(*n as f64),
        (MetricValues::Gauge { peak, .. }, ThresholdAgg::Max) => peak.map(|v| v as f64),
        (MetricValues::Rate(r), ThresholdAgg::Rate) => r.rate(),
        (MetricValues::Rate(r), ThresholdAgg::Count) => Some(r.total as f64),
        (MetricValues::Trend(t), ThresholdAgg::Count) => Some(t.count() as f64),
        (MetricValues::Trend(t), ThresholdAgg::Avg) => t.mean(),
        (MetricValues::Trend(t), ThresholdAgg::Min) => t.min(),
        (MetricValues::Trend(t), ThresholdAgg::Max) => t.max(),
        (MetricValues::Trend(t), ThresholdAgg::Med) => t.median(),
        (MetricValues::Trend(t), ThresholdAgg::P(p)) => t.percentile(p),
        _ => None,
    }
}
