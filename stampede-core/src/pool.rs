use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::Pacing;
use crate::scenario::{Scenario, Vu, VuShared};

/// Cooperative stop flag observed by a worker between iterations.
#[derive(Debug, Default)]
struct RetireSignal {
    retired: AtomicBool,
    notify: Notify,
}

impl RetireSignal {
    fn retire(&self) {
        self.retired.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    fn is_retired(&self) -> bool {
        self.retired.load(Ordering::Acquire)
    }

    async fn wait(&self) {
        loop {
            // Register interest before reading the flag so a concurrent
            // `retire` cannot slip between the two.
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_retired() {
                return;
            }
            notified.await;
        }
    }
}

struct Worker {
    id: u64,
    signal: Arc<RetireSignal>,
    handle: JoinHandle<()>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainOutcome {
    pub completed: usize,
    /// Workers still inside an iteration when the timeout hit. Their tasks are
    /// detached, not aborted.
    pub abandoned: usize,
}

/// Set of virtual-user workers whose size follows the scheduler's target.
pub struct VuPool<S: Scenario> {
    scenario: Arc<S>,
    shared: Arc<VuShared<S::Data>>,
    pacing: Pacing,
    workers: Vec<Worker>,
    retired: Vec<JoinHandle<()>>,
    retired_finished: usize,
    next_id: u64,
}

impl<S: Scenario> VuPool<S> {
    pub(crate) fn new(scenario: Arc<S>, shared: Arc<VuShared<S::Data>>, pacing: Pacing) -> Self {
        Self {
            scenario,
            shared,
            pacing,
            workers: Vec::new(),
            retired: Vec::new(),
            retired_finished: 0,
            next_id: 1,
        }
    }

    /// Workers that have not been asked to retire.
    pub fn live(&self) -> usize {
        self.workers.len()
    }

    /// Spawns or retires workers until [`Self::live`] equals `target`.
    ///
    /// Retired workers finish their current iteration before exiting.
    pub fn set_target(&mut self, target: u64) {
        let target = usize::try_from(target).unwrap_or(usize::MAX);
        let live = self.workers.len();

        if target > live {
            self.workers.reserve(target - live);
            for _ in live..target {
                let id = self.next_id;
                self.next_id = self.next_id.saturating_add(1);
                self.workers.push(self.spawn(id));
            }
            tracing::debug!(from = live, to = target, "scaled up virtual users");
        } else if target < live {
            // Most recently spawned first.
            for worker in self.workers.drain(target..).rev() {
                tracing::trace!(vu = worker.id, "retiring virtual user");
                worker.signal.retire();
                self.retired.push(worker.handle);
            }
            tracing::debug!(from = live, to = target, "scaled down virtual users");
        }

        let before = self.retired.len();
        self.retired.retain(|h| !h.is_finished());
        self.retired_finished += before - self.retired.len();
    }

    pub fn retire_all(&mut self) {
        self.set_target(0);
    }

    /// Retires every worker and waits up to `timeout` for them to exit.
    pub async fn drain(&mut self, timeout: Duration) -> DrainOutcome {
        self.retire_all();

        let deadline = Instant::now() + timeout;
        let mut outcome = DrainOutcome {
            completed: std::mem::take(&mut self.retired_finished),
            abandoned: 0,
        };
        for handle in self.retired.drain(..) {
            // A handle that already finished is polled before the deadline check.
            match tokio::time::timeout_at(deadline, handle).await {
                Ok(_) => outcome.completed += 1,
                Err(_) => outcome.abandoned += 1,
            }
        }
        outcome
    }

    fn spawn(&self, id: u64) -> Worker {
        let signal = Arc::new(RetireSignal::default());
        let handle = tokio::spawn(worker_loop(
            id,
            self.scenario.clone(),
            self.shared.clone(),
            self.pacing,
            signal.clone(),
        ));
        Worker { id, signal, handle }
    }
}

async fn worker_loop<S: Scenario>(
    id: u64,
    scenario: Arc<S>,
    shared: Arc<VuShared<S::Data>>,
    pacing: Pacing,
    signal: Arc<RetireSignal>,
) {
    let mut iteration: u64 = 0;
    while !signal.is_retired() {
        let vu = Vu::new(id, iteration, shared.clone());
        let scenario = scenario.clone();
        let started = Instant::now();

        // Own task, so a panic surfaces as a JoinError instead of killing the worker.
        let res = tokio::spawn(async move { scenario.iteration(&vu).await }).await;
        let failed = match res {
            Ok(Ok(())) => false,
            Ok(Err(err)) => {
                tracing::debug!(vu = id, iteration, error = %err, "iteration failed");
                true
            }
            Err(err) => {
                tracing::warn!(vu = id, iteration, error = %err, "iteration panicked");
                true
            }
        };
        shared.metrics.iteration(started.elapsed(), failed);
        iteration = iteration.wrapping_add(1);

        let delay = pacing.next_delay();
        if delay.is_zero() {
            tokio::task::yield_now().await;
            continue;
        }
        tokio::select! {
            _ = signal.wait() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}
