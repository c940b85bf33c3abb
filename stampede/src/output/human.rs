use std::sync::Arc;

use stampede_core::{Executor, ProgressFn, ProgressUpdate, RunConfig, RunReport};

mod format;
mod progress;
mod summary;

use format::{format_elapsed, format_observed, format_rate};
use progress::HumanProgress;
use summary::render;

use super::OutputFormatter;
use crate::scenarios::ScenarioName;

pub(crate) struct HumanReadableOutput {
    progress: Arc<HumanProgress>,
}

impl HumanReadableOutput {
    pub(crate) fn new() -> Self {
        Self {
            progress: Arc::new(HumanProgress::new()),
        }
    }
}

fn progress_message(u: &ProgressUpdate) -> String {
    let mut msg = format!("vus={}/{}", u.live_vus, u.target_vus);
    if let Some(stage) = &u.stage {
        msg.push_str(&format!(
            " stage={}/{} stage_remaining={}",
            stage.stage,
            stage.stages,
            format_elapsed(stage.stage_remaining)
        ));
    }
    msg.push_str(&format!(
        " elapsed={} reqs={} rps={} iters={} failed={}",
        format_elapsed(u.elapsed),
        u.requests_total,
        format_rate(u.requests_per_sec),
        u.iterations_total,
        u.failed_requests
    ));

    let failing: Vec<&str> = u
        .thresholds
        .iter()
        .filter(|t| !t.passed)
        .map(|t| t.metric.as_str())
        .collect();
    if !failing.is_empty() {
        msg.push_str(&format!(" failing={}", failing.join(",")));
    }
    msg
}

impl OutputFormatter for HumanReadableOutput {
    fn print_header(&self, scenario: ScenarioName, config: &RunConfig) {
        println!("scenario: {}", scenario.as_str());
        match &config.executor {
            Executor::Staged {
                start_vus, stages, ..
            } => {
                let stages = stages
                    .iter()
                    .map(|s| format!("{}:{}", format_elapsed(s.duration), s.target))
                    .collect::<Vec<_>>()
                    .join(" ");
                println!("executor: staged start_vus={start_vus} stages=[{stages}]");
            }
            Executor::Fixed { vus, duration } => {
                println!("executor: fixed vus={vus} duration={}", format_elapsed(*duration));
            }
        }
        println!(
            "run: duration={} max_vus={} thresholds={}",
            format_elapsed(config.executor.run_duration()),
            config.executor.max_vus(),
            config.thresholds.len()
        );
        println!();
    }

    fn progress(&self) -> Option<ProgressFn> {
        let progress = self.progress.clone();
        Some(Arc::new(move |u| {
            progress.update(u.total_duration, u.elapsed, progress_message(&u));
        }))
    }

    fn print_summary(&self, report: &RunReport) -> anyhow::Result<()> {
        self.progress.finish();
        print!("{}", render(report));

        let failed: Vec<_> = report.failed_thresholds().collect();
        if !failed.is_empty() {
            eprintln!("thresholds failed:");
            for t in failed {
                eprintln!(
                    "  {}: {} (observed {})",
                    t.metric,
                    t.expression,
                    format_observed(t.observed)
                );
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use stampede_core::{StageProgress, ThresholdResult};

    #[test]
    fn progress_message_lists_stage_and_failing_thresholds() {
        let u = ProgressUpdate {
            tick: 16,
            elapsed: Duration::from_secs(16),
            total_duration: Duration::from_secs(60),
            live_vus: 3,
            target_vus: 3,
            stage: Some(StageProgress {
                stage: 1,
                stages: 2,
                stage_elapsed: Duration::from_secs(16),
                stage_remaining: Duration::from_secs(14),
                start_target: 0,
                end_target: 5,
                current_target: 3,
            }),
            requests_total: 120,
            requests_per_sec: 9.6,
            iterations_total: 40,
            failed_requests: 1,
            thresholds: vec![ThresholdResult {
                metric: "errors".to_string(),
                expression: "rate<0.1".to_string(),
                passed: false,
                observed: Some(0.5),
            }],
        };

        assert_eq!(
            progress_message(&u),
            "vus=3/3 stage=1/2 stage_remaining=14s elapsed=16s reqs=120 rps=10 iters=40 failed=1 failing=errors"
        );
    }
}
