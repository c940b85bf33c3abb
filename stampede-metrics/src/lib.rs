pub mod agg;
pub mod checks;
pub mod collector;
pub mod error;
pub mod metrics;

pub use checks::CheckSummary;
pub use collector::{Collector, MetricHandle, Snapshot, is_valid_metric_name};
pub use error::{Error, Result};
pub use metrics::{
    MetricKind, MetricSample, MetricSeriesSummary, MetricValue, MetricValues, RateSnapshot,
    SummaryValues, TrendSnapshot, TrendSummary,
};
