use std::sync::Arc;
use std::time::Duration;

use stampede_metrics::agg::CounterSnapshot;
use stampede_metrics::{Collector, MetricValues, Snapshot};
use tokio::time::{Instant, MissedTickBehavior};

use crate::builtin::{self, BuiltinMetrics};
use crate::config::{Executor, RunConfig, SetupFailurePolicy};
use crate::error::{Error, Result};
use crate::http::Http;
use crate::pool::VuPool;
use crate::progress::{ProgressFn, ProgressUpdate, StageProgress};
use crate::report::{PhaseOutcome, RunReport, ShutdownStatus};
use crate::scenario::{Scenario, ScenarioError, Vu, VuShared};
use crate::schedule::{SchedulerState, StageScheduler};
use crate::thresholds_eval::{CompiledThresholds, all_passed};

const PROGRESS_INTERVAL: Duration = Duration::from_secs(1);

/// Desired VU count over time.
enum Shape {
    Staged(StageScheduler),
    Fixed(u64),
}

impl Shape {
    fn new(executor: &Executor) -> Self {
        match executor {
            Executor::Staged {
                start_vus,
                stages,
                after_stages,
                ..
            } => Shape::Staged(StageScheduler::new(
                *start_vus,
                stages.clone(),
                *after_stages,
            )),
            Executor::Fixed { vus, .. } => Shape::Fixed(*vus),
        }
    }

    fn start(&mut self, now: Instant) {
        if let Shape::Staged(s) = self {
            s.start(now);
        }
    }

    fn target(&self, now: Instant) -> u64 {
        match self {
            Shape::Staged(s) => s.target(now),
            Shape::Fixed(vus) => *vus,
        }
    }

    /// Staged runs end once the scheduler has completed and any explicit
    /// duration has elapsed.
    fn finished(&self, now: Instant, elapsed: Duration, run_duration: Duration) -> bool {
        match self {
            Shape::Staged(s) => {
                s.state(now) == SchedulerState::Completed && elapsed >= run_duration
            }
            Shape::Fixed(_) => elapsed >= run_duration,
        }
    }

    fn stage(&self, elapsed: Duration) -> Option<StageProgress> {
        match self {
            Shape::Staged(s) => s.stage_snapshot_at(elapsed).map(StageProgress::from),
            Shape::Fixed(_) => None,
        }
    }
}

struct ProgressReporter {
    emit: ProgressFn,
    tick: u64,
    last_at: Instant,
    last_requests: Option<CounterSnapshot>,
}

impl ProgressReporter {
    fn new(emit: ProgressFn, started: Instant) -> Self {
        Self {
            emit,
            tick: 0,
            last_at: started,
            last_requests: None,
        }
    }

    fn due(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.last_at) >= PROGRESS_INTERVAL
    }

    fn emit(&mut self, now: Instant, snap: &Snapshot, mut update: ProgressUpdate) {
        let dt = now.saturating_duration_since(self.last_at);
        self.last_at = now;
        self.tick = self.tick.saturating_add(1);

        let requests = CounterSnapshot::new(snap.counter(builtin::HTTP_REQS));
        update.tick = self.tick;
        update.requests_total = requests.total;
        update.requests_per_sec = requests.per_sec_since(self.last_requests, dt.as_secs_f64());
        update.iterations_total = snap.counter(builtin::ITERATIONS);
        update.failed_requests = match snap.get(builtin::HTTP_REQ_FAILED) {
            Some(MetricValues::Rate(r)) => r.hits,
            _ => 0,
        };
        self.last_requests = Some(requests);

        (self.emit)(update);
    }
}

async fn run_phase<S, T, F, Fut>(
    scenario: &Arc<S>,
    ctx: Vu<S::Data>,
    phase: F,
) -> std::result::Result<T, String>
where
    S: Scenario,
    T: Send + 'static,
    F: FnOnce(Arc<S>, Vu<S::Data>) -> Fut,
    Fut: Future<Output = std::result::Result<T, ScenarioError>> + Send + 'static,
{
    match tokio::spawn(phase(scenario.clone(), ctx)).await {
        Ok(Ok(v)) => Ok(v),
        Ok(Err(err)) => Err(err.to_string()),
        Err(err) => Err(format!("panicked: {err}")),
    }
}

/// Runs `scenario` to completion under `config`.
///
/// Configuration problems are returned before any worker starts. Iteration,
/// transport and teardown failures are recorded in the report instead.
pub async fn run<S: Scenario>(
    scenario: S,
    config: RunConfig,
    progress: Option<ProgressFn>,
) -> Result<RunReport> {
    config.validate()?;

    let collector = Arc::new(Collector::new());
    let metrics = BuiltinMetrics::register(collector.clone())?;
    for decl in scenario.metrics() {
        collector.declare(&decl.name, decl.kind)?;
    }
    let thresholds = CompiledThresholds::compile(&config.thresholds, &collector)?;

    let scenario = Arc::new(scenario);
    let env = Arc::new(config.env.clone());
    let http = Http::new(config.request_timeout, metrics.clone());

    let setup_ctx = Arc::new(VuShared {
        env: env.clone(),
        data: None,
        http: http.clone(),
        metrics: metrics.clone(),
    });
    let (data, setup) = match run_phase(&scenario, Vu::new(0, 0, setup_ctx), |s, vu| async move {
        s.setup(&vu).await
    })
    .await
    {
        Ok(data) => (data, PhaseOutcome::Completed),
        Err(reason) => {
            tracing::warn!(error = %reason, policy = %config.on_setup_error, "setup failed");
            if config.on_setup_error == SetupFailurePolicy::Abort {
                return Err(Error::SetupFailed(reason));
            }
            (None, PhaseOutcome::Failed(reason))
        }
    };

    let shared = Arc::new(VuShared {
        env,
        data,
        http,
        metrics: metrics.clone(),
    });
    let mut pool = VuPool::new(scenario.clone(), shared.clone(), config.pacing);

    let run_duration = config.executor.run_duration();
    let mut shape = Shape::new(&config.executor);
    tracing::info!(
        duration = ?run_duration,
        max_vus = config.executor.max_vus(),
        thresholds = thresholds.len(),
        "run started"
    );

    let started = Instant::now();
    shape.start(started);
    let mut reporter = progress.map(|emit| ProgressReporter::new(emit, started));
    let mut interval = tokio::time::interval(config.tick);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut vus_max: u64 = 0;

    loop {
        interval.tick().await;
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(started);
        if shape.finished(now, elapsed, run_duration) {
            break;
        }

        let target = shape.target(now);
        pool.set_target(target);
        let live = pool.live() as u64;
        vus_max = vus_max.max(live);
        metrics.vus(live);
        metrics.vus_max(vus_max);

        if let Some(reporter) = reporter.as_mut().filter(|r| r.due(now)) {
            let snap = collector.snapshot();
            let update = ProgressUpdate {
                tick: 0,
                elapsed,
                total_duration: run_duration,
                live_vus: live,
                target_vus: target,
                stage: shape.stage(elapsed),
                requests_total: 0,
                requests_per_sec: 0.0,
                iterations_total: 0,
                failed_requests: 0,
                thresholds: thresholds.evaluate(&snap, config.empty_thresholds),
            };
            reporter.emit(now, &snap, update);
        }
    }

    let drained = pool.drain(config.drain_timeout).await;
    metrics.vus(0);
    let shutdown = if drained.abandoned == 0 {
        ShutdownStatus::Complete
    } else {
        tracing::warn!(
            abandoned = drained.abandoned,
            timeout = ?config.drain_timeout,
            "drain timed out; workers left running"
        );
        ShutdownStatus::Incomplete {
            abandoned: drained.abandoned,
        }
    };
    let duration = started.elapsed();

    let teardown = match run_phase(&scenario, Vu::new(0, 0, shared), |s, vu| async move {
        s.teardown(&vu).await
    })
    .await
    {
        Ok(()) => PhaseOutcome::Completed,
        Err(reason) => {
            tracing::warn!(error = %reason, "teardown failed");
            PhaseOutcome::Failed(reason)
        }
    };

    let snap = collector.snapshot();
    let results = thresholds.evaluate(&snap, config.empty_thresholds);
    let passed = all_passed(&results);
    tracing::info!(
        passed,
        requests = snap.counter(builtin::HTTP_REQS),
        iterations = snap.counter(builtin::ITERATIONS),
        elapsed = ?duration,
        "run finished"
    );

    Ok(RunReport {
        metrics: snap.summaries(),
        checks: snap.checks().to_vec(),
        total_requests: snap.counter(builtin::HTTP_REQS),
        total_iterations: snap.counter(builtin::ITERATIONS),
        thresholds: results,
        passed,
        duration,
        setup,
        teardown,
        shutdown,
    })
}
