use crate::MetricKind;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("metric `{name}` is a {existing}, cannot record a {requested} sample into it")]
    KindMismatch {
        name: String,
        existing: MetricKind,
        requested: MetricKind,
    },

    #[error("invalid metric name `{0}` (expected 1-128 chars of [A-Za-z0-9_])")]
    InvalidName(String),
}
