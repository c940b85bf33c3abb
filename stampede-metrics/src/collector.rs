use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;

use crate::checks::{CheckCounts, CheckKey, CheckSummary};
use crate::metrics::{MetricKind, MetricSample, MetricSeriesSummary, MetricValue, MetricValues, Series};
use crate::{Error, Result};

const MAX_NAME_LEN: usize = 128;

pub fn is_valid_metric_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_NAME_LEN
        && name.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_')
}

/// Thread-safe sink for every sample produced during a run.
///
/// The series map is sharded, and each series carries its own synchronization,
/// so concurrent workers recording into different series never block each other.
#[derive(Debug, Default)]
pub struct Collector {
    series: DashMap<Arc<str>, Arc<Series>>,
    checks: DashMap<CheckKey, Arc<CheckCounts>>,
}

impl Collector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `name` with `kind` without recording a sample.
    ///
    /// Declaring an existing series with the same kind is a no-op.
    pub fn declare(&self, name: &str, kind: MetricKind) -> Result<()> {
        self.series_for(name, kind).map(|_| ())
    }

    pub fn kind_of(&self, name: &str) -> Option<MetricKind> {
        self.series.get(name).map(|s| s.kind())
    }

    pub fn record(&self, sample: MetricSample) -> Result<()> {
        self.record_value(&sample.name, sample.value)
    }

    pub fn record_value(&self, name: &str, value: MetricValue) -> Result<()> {
        self.series_for(name, value.kind())?.apply(value);
        Ok(())
    }

    pub fn add_counter(&self, name: &str, n: u64) -> Result<()> {
        self.record_value(name, MetricValue::Counter(n))
    }

    pub fn add_rate(&self, name: &str, hit: bool) -> Result<()> {
        self.record_value(name, MetricValue::Rate(hit))
    }

    pub fn add_trend(&self, name: &str, value: f64) -> Result<()> {
        self.record_value(name, MetricValue::Trend(value))
    }

    pub fn set_gauge(&self, name: &str, value: i64) -> Result<()> {
        self.record_value(name, MetricValue::Gauge(value))
    }

    /// Resolves a series once so hot paths can skip the map lookup.
    pub fn handle(&self, name: &str, kind: MetricKind) -> Result<MetricHandle> {
        let series = self.series_for(name, kind)?;
        Ok(MetricHandle {
            name: Arc::from(name),
            series,
        })
    }

    /// Counts one check outcome under `group` (the `::`-joined group path).
    pub fn record_check(&self, group: &str, name: &str, passed: bool) {
        let key = CheckKey {
            group: group.to_string(),
            name: name.to_string(),
        };

        if let Some(counts) = self.checks.get(&key) {
            counts.record(passed);
            return;
        }

        let counts = self.checks.entry(key).or_default().clone();
        counts.record(passed);
    }

    pub fn snapshot(&self) -> Snapshot {
        let series = self
            .series
            .iter()
            .map(|e| (e.key().to_string(), e.value().snapshot()))
            .collect();

        let mut checks: Vec<CheckSummary> = self
            .checks
            .iter()
            .map(|e| e.value().summary(e.key()))
            .collect();
        checks.sort_by(|a, b| (&a.group, &a.name).cmp(&(&b.group, &b.name)));

        Snapshot { series, checks }
    }

    fn series_for(&self, name: &str, kind: MetricKind) -> Result<Arc<Series>> {
        if let Some(existing) = self.series.get(name) {
            return ensure_kind(name, existing.value(), kind);
        }

        if !is_valid_metric_name(name) {
            return Err(Error::InvalidName(name.to_string()));
        }

        let entry = self
            .series
            .entry(Arc::from(name))
            .or_insert_with(|| Arc::new(Series::new(kind)));
        ensure_kind(name, entry.value(), kind)
    }
}

fn ensure_kind(name: &str, series: &Arc<Series>, requested: MetricKind) -> Result<Arc<Series>> {
    let existing = series.kind();
    if existing != requested {
        return Err(Error::KindMismatch {
            name: name.to_string(),
            existing,
            requested,
        });
    }
    Ok(series.clone())
}

/// Pre-resolved writer for a single series.
#[derive(Debug, Clone)]
pub struct MetricHandle {
    name: Arc<str>,
    series: Arc<Series>,
}

impl MetricHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> MetricKind {
        self.series.kind()
    }

    pub fn record(&self, value: MetricValue) -> Result<()> {
        if self.series.apply(value) {
            return Ok(());
        }
        Err(Error::KindMismatch {
            name: self.name.to_string(),
            existing: self.series.kind(),
            requested: value.kind(),
        })
    }
}

/// Every series and check, each read under its own lock.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    series: BTreeMap<String, MetricValues>,
    checks: Vec<CheckSummary>,
}

impl Snapshot {
    pub fn get(&self, name: &str) -> Option<&MetricValues> {
        self.series.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &MetricValues)> {
        self.series.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn counter(&self, name: &str) -> u64 {
        match self.series.get(name) {
            Some(MetricValues::Counter(n)) => *n,
            _ => 0,
        }
    }

    pub fn checks(&self) -> &[CheckSummary] {
        &self.checks
    }

    pub fn summaries(&self) -> Vec<MetricSeriesSummary> {
        self.series
            .iter()
            .map(|(name, values)| MetricSeriesSummary {
                name: name.clone(),
                kind: values.kind(),
                values: values.into(),
            })
            .collect()
    }
}
