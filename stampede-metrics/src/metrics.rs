use std::sync::atomic::{AtomicU64, Ordering};

use hdrhistogram::Histogram;
use parking_lot::Mutex;

use crate::agg::RunningStats;

/// Trend values are stored in thousandths so that sub-millisecond latencies keep
/// three decimal places inside an integer histogram.
const TREND_SCALE: f64 = 1000.0;

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    strum::Display,
    strum::EnumString,
    strum::IntoStaticStr,
)]
#[strum(serialize_all = "lowercase")]
pub enum MetricKind {
    Counter,
    Gauge,
    Rate,
    Trend,
}

/// A single observation submitted by a worker.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricValue {
    Counter(u64),
    Gauge(i64),
    Rate(bool),
    Trend(f64),
}

impl MetricValue {
    pub fn kind(&self) -> MetricKind {
        match self {
            MetricValue::Counter(_) => MetricKind::Counter,
            MetricValue::Gauge(_) => MetricKind::Gauge,
            MetricValue::Rate(_) => MetricKind::Rate,
            MetricValue::Trend(_) => MetricKind::Trend,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MetricSample {
    pub name: String,
    pub value: MetricValue,
}

impl MetricSample {
    pub fn new(name: impl Into<String>, value: MetricValue) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

pub(crate) fn new_trend_histogram() -> Histogram<u64> {
    // Auto-resizing, so no upper bound has to be guessed up front.
    match Histogram::<u64>::new(3) {
        Ok(h) => h,
        Err(err) => panic!("failed to create histogram: {err}"),
    }
}

/// Magnitude in thousandths; the sign picks the histogram.
fn scale_trend(value: f64) -> u64 {
    if !value.is_finite() {
        return 0;
    }
    (value.abs() * TREND_SCALE).round() as u64
}

#[derive(Debug)]
pub(crate) struct GaugeState {
    value: i64,
    peak: i64,
    set: bool,
}

#[derive(Debug, Default)]
pub(crate) struct RateState {
    hits: u64,
    total: u64,
}

#[derive(Debug)]
pub(crate) struct TrendState {
    hist: Histogram<u64>,
    negative: Histogram<u64>,
    stats: RunningStats,
    sum: f64,
    min: f64,
    max: f64,
}

impl TrendState {
    fn new() -> Self {
        Self {
            hist: new_trend_histogram(),
            negative: new_trend_histogram(),
            stats: RunningStats::default(),
            sum: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
        }
    }

    fn push(&mut self, value: f64) {
        if !value.is_finite() {
            return;
        }
        // Auto-resize means record only fails on u64 overflow of the count.
        let hist = if value < 0.0 {
            &mut self.negative
        } else {
            &mut self.hist
        };
        let _ = hist.record(scale_trend(value));
        self.stats.push(value);
        self.sum += value;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }
}

/// Accumulated state of one metric series.
///
/// Counters are a bare atomic; every other kind owns its own lock so unrelated
/// series never contend.
#[derive(Debug)]
pub(crate) enum Series {
    Counter(AtomicU64),
    Gauge(Mutex<GaugeState>),
    Rate(Mutex<RateState>),
    Trend(Mutex<TrendState>),
}

impl Series {
    pub(crate) fn new(kind: MetricKind) -> Self {
        match kind {
            MetricKind::Counter => Series::Counter(AtomicU64::new(0)),
            MetricKind::Gauge => Series::Gauge(Mutex::new(GaugeState {
                value: 0,
                peak: 0,
                set: false,
            })),
            MetricKind::Rate => Series::Rate(Mutex::new(RateState::default())),
            MetricKind::Trend => Series::Trend(Mutex::new(TrendState::new())),
        }
    }

    pub(crate) fn kind(&self) -> MetricKind {
        match self {
            Series::Counter(_) => MetricKind::Counter,
            Series::Gauge(_) => MetricKind::Gauge,
            Series::Rate(_) => MetricKind::Rate,
            Series::Trend(_) => MetricKind::Trend,
        }
    }

    /// Applies `value`. Returns `false` when the value's kind does not match.
    pub(crate) fn apply(&self, value: MetricValue) -> bool {
        match (self, value) {
            (Series::Counter(c), MetricValue::Counter(n)) => {
                c.fetch_add(n, Ordering::Relaxed);
            }
            (Series::Gauge(g), MetricValue::Gauge(v)) => {
                let mut g = g.lock();
                g.value = v;
                if !g.set || v > g.peak {
                    g.peak = v;
                }
                g.set = true;
            }
            (Series::Rate(r), MetricValue::Rate(hit)) => {
                let mut r = r.lock();
                r.total += 1;
                if hit {
                    r.hits += 1;
                }
            }
            (Series::Trend(t), MetricValue::Trend(v)) => t.lock().push(v),
            _ => return false,
        }
        true
    }

    pub(crate) fn snapshot(&self) -> MetricValues {
        match self {
            Series::Counter(c) => MetricValues::Counter(c.load(Ordering::Relaxed)),
            Series::Gauge(g) => {
                let g = g.lock();
                MetricValues::Gauge {
                    value: g.set.then_some(g.value),
                    peak: g.set.then_some(g.peak),
                }
            }
            Series::Rate(r) => {
                let r = r.lock();
                MetricValues::Rate(RateSnapshot {
                    hits: r.hits,
                    total: r.total,
                })
            }
            Series::Trend(t) => {
                let t = t.lock();
                MetricValues::Trend(TrendSnapshot {
                    hist: t.hist.clone(),
                    negative: t.negative.clone(),
                    stats: t.stats,
                    sum: t.sum,
                    min: t.min,
                    max: t.max,
                })
            }
        }
    }
}

/// Point-in-time values of one series.
#[derive(Debug, Clone)]
pub enum MetricValues {
    Counter(u64),
    Gauge {
        value: Option<i64>,
        peak: Option<i64>,
    },
    Rate(RateSnapshot),
    Trend(TrendSnapshot),
}

impl MetricValues {
    pub fn kind(&self) -> MetricKind {
        match self {
            MetricValues::Counter(_) => MetricKind::Counter,
            MetricValues::Gauge { .. } => MetricKind::Gauge,
            MetricValues::Rate(_) => MetricKind::Rate,
            MetricValues::Trend(_) => MetricKind::Trend,
        }
    }

    /// True when nothing has been recorded into the series yet.
    pub fn is_empty(&self) -> bool {
        match self {
            MetricValues::Counter(_) => false,
            MetricValues::Gauge { value, .. } => value.is_none(),
            MetricValues::Rate(r) => r.total == 0,
            MetricValues::Trend(t) => t.count() == 0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RateSnapshot {
    pub hits: u64,
    pub total: u64,
}

impl RateSnapshot {
    pub fn rate(&self) -> Option<f64> {
        (self.total > 0).then(|| self.hits as f64 / self.total as f64)
    }

    pub fn misses(&self) -> u64 {
        self.total.saturating_sub(self.hits)
    }
}

#[derive(Debug, Clone)]
pub struct TrendSnapshot {
    hist: Histogram<u64>,
    negative: Histogram<u64>,
    stats: RunningStats,
    sum: f64,
    min: f64,
    max: f64,
}

impl TrendSnapshot {
    pub fn count(&self) -> u64 {
        self.hist.len() + self.negative.len()
    }

    pub fn sum(&self) -> f64 {
        self.sum
    }

    pub fn min(&self) -> Option<f64> {
        (self.count() > 0).then_some(self.min)
    }

    pub fn max(&self) -> Option<f64> {
        (self.count() > 0).then_some(self.max)
    }

    pub fn mean(&self) -> Option<f64> {
        (self.count() > 0).then(|| self.sum / self.count() as f64)
    }

    pub fn stdev(&self) -> Option<f64> {
        (self.count() > 0).then(|| self.stats.stdev())
    }

    pub fn median(&self) -> Option<f64> {
        self.percentile(50.0)
    }

    /// Percentile `p` in `[0, 100]`, linearly interpolated between the two
    /// closest ranks (`rank = p/100 * (n-1)`).
    pub fn percentile(&self, p: f64) -> Option<f64> {
        let n = self.count();
        if n == 0 || !(0.0..=100.0).contains(&p) {
            return None;
        }

        let pos = p / 100.0 * (n - 1) as f64;
        let lower = pos.floor() as u64;
        let upper = pos.ceil() as u64;
        let (lo, hi) = self.values_at_ranks(lower, upper);
        Some(lo + (hi - lo) * (pos - lower as f64))
    }

    /// Recorded buckets in ascending value order: negative magnitudes from
    /// largest to smallest, then the non-negative histogram.
    fn ascending_buckets(&self) -> impl Iterator<Item = (f64, u64)> + '_ {
        let negative: Vec<(f64, u64)> = self
            .negative
            .iter_recorded()
            .map(|v| {
                let magnitude = self.negative.median_equivalent(v.value_iterated_to());
                (-(magnitude as f64) / TREND_SCALE, v.count_at_value())
            })
            .collect();
        let positive = self.hist.iter_recorded().map(|v| {
            let value = self.hist.median_equivalent(v.value_iterated_to());
            (value as f64 / TREND_SCALE, v.count_at_value())
        });
        negative.into_iter().rev().chain(positive)
    }

    /// Values at 0-based ranks `a <= b`, found in a single pass.
    fn values_at_ranks(&self, a: u64, b: u64) -> (f64, f64) {
        let last = self.count() - 1;
        let mut found_a = None;
        let mut seen = 0u64;

        for (value, count) in self.ascending_buckets() {
            seen += count;
            let value = value.clamp(self.min, self.max);
            if found_a.is_none() && seen > a {
                found_a = Some(value);
            }
            if seen > b {
                let lo = if a == 0 { self.min } else { found_a.unwrap_or(value) };
                let hi = if b == last { self.max } else { value };
                return (lo, hi);
            }
        }

        (self.max, self.max)
    }

    pub fn summary(&self) -> TrendSummary {
        TrendSummary {
            count: self.count(),
            min: self.min(),
            max: self.max(),
            avg: self.mean(),
            stdev: self.stdev(),
            med: self.median(),
            p90: self.percentile(90.0),
            p95: self.percentile(95.0),
            p99: self.percentile(99.0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrendSummary {
    pub count: u64,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub avg: Option<f64>,
    pub stdev: Option<f64>,
    pub med: Option<f64>,
    pub p90: Option<f64>,
    pub p95: Option<f64>,
    pub p99: Option<f64>,
}

/// Report-friendly view of a series, without the histogram.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricSeriesSummary {
    pub name: String,
    pub kind: MetricKind,
    pub values: SummaryValues,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SummaryValues {
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
    Trend(TrendSummary),
}

impl From<&MetricValues> for SummaryValues {
    fn from(v: &MetricValues) -> Self {
        match v {
            MetricValues::Counter(total) => SummaryValues::Counter { total: *total },
            MetricValues::Gauge { value, peak } => SummaryValues::Gauge {
                value: *value,
                peak: *peak,
            },
            MetricValues::Rate(r) => SummaryValues::Rate {
                hits: r.hits,
                total: r.total,
                rate: r.rate(),
            },
            MetricValues::Trend(t) => SummaryValues::Trend(t.summary()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trend(values: impl IntoIterator<Item = f64>) -> TrendSnapshot {
        let s = Series::new(MetricKind::Trend);
        for v in values {
            assert!(s.apply(MetricValue::Trend(v)));
        }
        match s.snapshot() {
            MetricValues::Trend(t) => t,
            other => panic!("expected trend, got {other:?}"),
        }
    }

    #[test]
    fn metric_kind_parses_lowercase() {
        assert_eq!("trend".parse::<MetricKind>().ok(), Some(MetricKind::Trend));
        assert_eq!(MetricKind::Rate.to_string(), "rate");
    }

    #[test]
    fn empty_trend_has_no_stats() {
        let t = trend([]);
        let s = t.summary();
        assert_eq!(s.count, 0);
        assert!(s.min.is_none());
        assert!(s.avg.is_none());
        assert!(s.p95.is_none());
    }

    #[test]
    fn trend_exact_stats() {
        let t = trend([10.0, 20.0, 30.0]);
        assert_eq!(t.count(), 3);
        assert_eq!(t.min(), Some(10.0));
        assert_eq!(t.max(), Some(30.0));
        assert_eq!(t.mean(), Some(20.0));
        assert!((t.sum() - 60.0).abs() < 1e-9);
        assert!((t.stdev().unwrap_or_default() - 10.0).abs() < 1e-9);
    }

    #[test]
    fn trend_p95_interpolates_between_ranks() {
        let t = trend((1..=10).map(|i| f64::from(i) * 100.0));
        let p95 = t.percentile(95.0).unwrap_or_else(|| panic!("expected p95"));
        assert!((954.0..=956.0).contains(&p95), "p95 = {p95}");

        let p0 = t.percentile(0.0).unwrap_or_else(|| panic!("expected p0"));
        let p100 = t.percentile(100.0).unwrap_or_else(|| panic!("expected p100"));
        assert_eq!(p0, 100.0);
        assert_eq!(p100, 1000.0);
    }

    #[test]
    fn negative_trend_samples_keep_their_order() {
        fn near(actual: Option<f64>, expected: f64) {
            let actual = actual.unwrap_or_else(|| panic!("expected a value near {expected}"));
            assert!(
                (actual - expected).abs() <= expected.abs() * 0.001 + 1e-9,
                "{actual} != {expected}"
            );
        }

        let t = trend([-5.0, -4.0, -3.0]);
        assert_eq!(t.count(), 3);
        near(t.median(), -4.0);
        assert_eq!(t.percentile(0.0), Some(-5.0));
        near(t.percentile(100.0), -3.0);

        let t = trend([-30.0, -20.0, -10.0, 0.0, 10.0]);
        near(t.percentile(25.0), -20.0);
        near(t.median(), -10.0);
        near(t.percentile(75.0), 0.0);
        near(t.percentile(10.0), -26.0);
    }

    #[test]
    fn trend_median_of_single_value_is_exact() {
        let t = trend([42.5]);
        assert_eq!(t.median(), Some(42.5));
    }

    #[test]
    fn percentile_out_of_range_is_none() {
        let t = trend([1.0]);
        assert!(t.percentile(100.5).is_none());
        assert!(t.percentile(-1.0).is_none());
    }

    #[test]
    fn rate_counts_hits_over_total() {
        let s = Series::new(MetricKind::Rate);
        for i in 0..10 {
            assert!(s.apply(MetricValue::Rate(i < 7)));
        }
        let MetricValues::Rate(r) = s.snapshot() else {
            panic!("expected rate");
        };
        assert_eq!(r.rate(), Some(0.7));
        assert_eq!(r.misses(), 3);
        assert_eq!(RateSnapshot::default().rate(), None);
    }

    #[test]
    fn gauge_tracks_current_and_peak() {
        let s = Series::new(MetricKind::Gauge);
        assert!(s.snapshot().is_empty());
        for v in [3, 9, 4] {
            assert!(s.apply(MetricValue::Gauge(v)));
        }
        let MetricValues::Gauge { value, peak } = s.snapshot() else {
            panic!("expected gauge");
        };
        assert_eq!(value, Some(4));
        assert_eq!(peak, Some(9));
    }

    #[test]
    fn series_rejects_other_kinds() {
        let s = Series::new(MetricKind::Counter);
        assert!(!s.apply(MetricValue::Trend(1.0)));
        assert!(s.apply(MetricValue::Counter(2)));
        assert!(matches!(s.snapshot(), MetricValues::Counter(2)));
    }
}
