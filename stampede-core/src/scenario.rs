use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use stampede_metrics::{Collector, MetricKind};
use tokio::time::Instant;

use crate::builtin::BuiltinMetrics;
use crate::http::Http;

/// Separator between nested group names in a check's group path.
pub const GROUP_SEPARATOR: &str = "::";

#[derive(Debug, thiserror::Error)]
pub enum ScenarioError {
    #[error(transparent)]
    Http(#[from] stampede_http::Error),

    #[error(transparent)]
    Metrics(#[from] stampede_metrics::Error),

    #[error("{0}")]
    Failed(String),
}

impl ScenarioError {
    pub fn msg(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// A custom metric a scenario records into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricDecl {
    pub name: String,
    pub kind: MetricKind,
}

impl MetricDecl {
    pub fn new(name: impl Into<String>, kind: MetricKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }

    pub fn counter(name: impl Into<String>) -> Self {
        Self::new(name, MetricKind::Counter)
    }

    pub fn gauge(name: impl Into<String>) -> Self {
        Self::new(name, MetricKind::Gauge)
    }

    pub fn rate(name: impl Into<String>) -> Self {
        Self::new(name, MetricKind::Rate)
    }

    pub fn trend(name: impl Into<String>) -> Self {
        Self::new(name, MetricKind::Trend)
    }
}

/// User code driven by the engine.
///
/// `setup` runs once before any virtual user starts and may return data shared
/// read-only by every iteration. `teardown` runs once after the workers have
/// drained and sees the same data through [`Vu::data`].
pub trait Scenario: Send + Sync + 'static {
    type Data: Send + Sync + 'static;

    /// Custom metrics, declared before thresholds are compiled.
    fn metrics(&self) -> Vec<MetricDecl> {
        Vec::new()
    }

    fn setup(
        &self,
        _ctx: &Vu<Self::Data>,
    ) -> impl Future<Output = Result<Option<Self::Data>, ScenarioError>> + Send {
        async { Ok(None) }
    }

    fn iteration(
        &self,
        vu: &Vu<Self::Data>,
    ) -> impl Future<Output = Result<(), ScenarioError>> + Send;

    fn teardown(
        &self,
        _ctx: &Vu<Self::Data>,
    ) -> impl Future<Output = Result<(), ScenarioError>> + Send {
        async { Ok(()) }
    }
}

pub(crate) struct VuShared<D> {
    pub(crate) env: Arc<BTreeMap<String, String>>,
    pub(crate) data: Option<D>,
    pub(crate) http: Http,
    pub(crate) metrics: BuiltinMetrics,
}

/// Per-iteration view of the run handed to scenario code.
pub struct Vu<D> {
    id: u64,
    iteration: u64,
    group: Arc<str>,
    shared: Arc<VuShared<D>>,
}

impl<D> Clone for Vu<D> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            iteration: self.iteration,
            group: self.group.clone(),
            shared: self.shared.clone(),
        }
    }
}

impl<D> fmt::Debug for Vu<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Vu")
            .field("id", &self.id)
            .field("iteration", &self.iteration)
            .field("group", &self.group)
            .finish_non_exhaustive()
    }
}

impl<D> Vu<D> {
    pub(crate) fn new(id: u64, iteration: u64, shared: Arc<VuShared<D>>) -> Self {
        Self {
            id,
            iteration,
            group: Arc::from(""),
            shared,
        }
    }

    /// 1-based worker id; `0` inside setup and teardown.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// 0-based iteration number of this worker.
    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    /// Group path of the current code, empty at the top level.
    pub fn group_path(&self) -> &str {
        &self.group
    }

    pub fn env(&self, key: &str) -> Option<&str> {
        self.shared.env.get(key).map(String::as_str)
    }

    pub fn env_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.env(key).unwrap_or(default)
    }

    /// Data returned by setup. `None` when setup returned nothing or failed.
    pub fn data(&self) -> Option<&D> {
        self.shared.data.as_ref()
    }

    pub fn collector(&self) -> &Collector {
        self.shared.metrics.collector()
    }

    pub fn http(&self) -> &Http {
        &self.shared.http
    }

    /// Records a named assertion under the current group and returns `passed`.
    ///
    /// A failed check never fails the iteration.
    pub fn check(&self, name: &str, passed: bool) -> bool {
        self.shared.metrics.check(&self.group, name, passed);
        passed
    }

    /// Runs `f` inside a named group and records its `group_duration`.
    ///
    /// The duration is recorded even when `f` fails; the error is returned
    /// unchanged so it reaches the iteration boundary.
    pub async fn group<T, F, Fut>(&self, name: &str, f: F) -> Result<T, ScenarioError>
    where
        F: FnOnce(Vu<D>) -> Fut,
        Fut: Future<Output = Result<T, ScenarioError>>,
    {
        let group: Arc<str> = if self.group.is_empty() {
            Arc::from(name)
        } else {
            Arc::from(format!("{}{GROUP_SEPARATOR}{name}", self.group))
        };
        let nested = Vu {
            id: self.id,
            iteration: self.iteration,
            group,
            shared: self.shared.clone(),
        };

        let started = Instant::now();
        let res = f(nested).await;
        self.shared.metrics.group(started.elapsed());
        res
    }
}
