use stampede_metrics::MetricKind;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid stages: {0}")]
    InvalidStages(String),

    #[error("`vus` must be a positive integer")]
    InvalidVus,

    #[error("invalid duration: {0}")]
    InvalidDuration(String),

    #[error("`tick` must be a positive duration")]
    InvalidTick,

    #[error("invalid pacing: {0}")]
    InvalidPacing(String),

    #[error("`stages` and `vus` cannot be set together in one configuration layer")]
    ConflictingShape,

    #[error("invalid threshold `{expression}` for metric `{metric}`: {reason}")]
    InvalidThreshold {
        metric: String,
        expression: String,
        reason: String,
    },

    #[error("threshold references unknown metric `{0}`")]
    UnknownThresholdMetric(String),

    #[error("threshold `{expression}` cannot be applied to `{metric}` ({kind} metric)")]
    IncompatibleAggregator {
        metric: String,
        expression: String,
        kind: MetricKind,
    },

    #[error("metric registration failed: {0}")]
    Metrics(#[from] stampede_metrics::Error),

    #[error("setup failed: {0}")]
    SetupFailed(String),
}

impl Error {
    /// True for errors detected before the run starts.
    pub fn is_config(&self) -> bool {
        !matches!(self, Error::SetupFailed(_))
    }
}
