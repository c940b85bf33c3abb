pub mod builtin;
mod config;
mod error;
mod http;
mod options;
mod pacing;
mod pool;
mod progress;
mod report;
mod run;
mod scenario;
mod schedule;
mod thresholds;
mod thresholds_eval;

pub use builtin::BuiltinMetrics;
pub use config::{
    AfterStages, DEFAULT_DRAIN_TIMEOUT, DEFAULT_REQUEST_TIMEOUT, DEFAULT_TICK, EmptySeriesPolicy,
    Executor, Pacing, RunConfig, SetupFailurePolicy, Stage,
};
pub use error::{Error, Result};
pub use http::{Http, Response};
pub use options::{RunOptions, process_env_snapshot, resolve_run_config};
pub use pool::{DrainOutcome, VuPool};
pub use progress::{ProgressFn, ProgressUpdate, StageProgress};
pub use report::{PhaseOutcome, RunReport, ShutdownStatus};
pub use run::run;
pub use scenario::{GROUP_SEPARATOR, MetricDecl, Scenario, ScenarioError, Vu};
pub use schedule::{SchedulerState, StageScheduler, StageSnapshot};
pub use thresholds::{ThresholdAgg, ThresholdExpr, ThresholdOp, ThresholdSet, parse_threshold_expr};
pub use thresholds_eval::{CompiledThresholds, ThresholdResult, all_passed};

pub use stampede_http::{HttpRequest, HttpResponse};
pub use stampede_metrics::{Collector, MetricKind};
