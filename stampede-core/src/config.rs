use std::collections::BTreeMap;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::thresholds::ThresholdSet;

pub const DEFAULT_TICK: Duration = Duration::from_millis(100);
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stage {
    pub duration: Duration,
    pub target: u64,
}

impl Stage {
    pub fn new(duration: Duration, target: u64) -> Self {
        Self { duration, target }
    }
}

/// What the scheduler asks for once every stage has elapsed.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, strum::Display, strum::EnumString,
)]
#[strum(serialize_all = "lowercase")]
pub enum AfterStages {
    /// Scale to zero and end the run.
    #[default]
    Stop,
    /// Keep the last stage's target until the run duration elapses.
    Hold,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Executor {
    Staged {
        start_vus: u64,
        stages: Vec<Stage>,
        after_stages: AfterStages,
        /// Total run time. Only meaningful with [`AfterStages::Hold`].
        duration: Option<Duration>,
    },
    Fixed {
        vus: u64,
        duration: Duration,
    },
}

impl Executor {
    pub fn stages_total(stages: &[Stage]) -> Duration {
        stages
            .iter()
            .fold(Duration::ZERO, |acc, s| acc.saturating_add(s.duration))
    }

    /// Wall time of the main loop.
    pub fn run_duration(&self) -> Duration {
        match self {
            Executor::Staged {
                stages, duration, ..
            } => {
                let total = Self::stages_total(stages);
                duration.map_or(total, |d| d.max(total))
            }
            Executor::Fixed { duration, .. } => *duration,
        }
    }

    /// Highest concurrency the executor can ever ask for.
    pub fn max_vus(&self) -> u64 {
        match self {
            Executor::Staged {
                start_vus, stages, ..
            } => stages
                .iter()
                .map(|s| s.target)
                .max()
                .unwrap_or(0)
                .max(*start_vus),
            Executor::Fixed { vus, .. } => *vus,
        }
    }

    fn validate(&self) -> Result<()> {
        match self {
            Executor::Staged {
                stages,
                after_stages,
                duration,
                ..
            } => {
                if stages.is_empty() {
                    return Err(Error::InvalidStages("at least one stage is required".into()));
                }
                if let Some(i) = stages.iter().position(|s| s.duration.is_zero()) {
                    return Err(Error::InvalidStages(format!(
                        "stage {} has a zero duration",
                        i + 1
                    )));
                }
                if self.max_vus() == 0 {
                    return Err(Error::InvalidVus);
                }
                if let Some(d) = duration {
                    if *after_stages != AfterStages::Hold {
                        return Err(Error::InvalidDuration(
                            "a run duration with stages requires `afterStages: hold`".into(),
                        ));
                    }
                    let total = Self::stages_total(stages);
                    if *d < total {
                        return Err(Error::InvalidDuration(format!(
                            "run duration {d:?} is shorter than the stages ({total:?})"
                        )));
                    }
                }
            }
            Executor::Fixed { vus, duration } => {
                if *vus == 0 {
                    return Err(Error::InvalidVus);
                }
                if duration.is_zero() {
                    return Err(Error::InvalidDuration("duration must be positive".into()));
                }
            }
        }
        Ok(())
    }
}

/// Delay between two iterations of the same virtual user.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Pacing {
    #[default]
    None,
    Fixed(Duration),
    /// Uniformly distributed in `[min, max]`.
    Random {
        min: Duration,
        max: Duration,
    },
}

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, strum::Display, strum::EnumString,
)]
#[strum(serialize_all = "lowercase")]
pub enum SetupFailurePolicy {
    /// Report the failure and run without setup data.
    #[default]
    Continue,
    /// Skip the main loop and fail the run.
    Abort,
}

/// Outcome of a threshold whose metric never received a sample.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, strum::Display, strum::EnumString,
)]
#[strum(serialize_all = "lowercase")]
pub enum EmptySeriesPolicy {
    #[default]
    Pass,
    Fail,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    pub executor: Executor,
    pub thresholds: Vec<ThresholdSet>,
    pub env: BTreeMap<String, String>,
    pub tick: Duration,
    pub pacing: Pacing,
    pub drain_timeout: Duration,
    /// `None` disables the per-request timeout.
    pub request_timeout: Option<Duration>,
    pub on_setup_error: SetupFailurePolicy,
    pub empty_thresholds: EmptySeriesPolicy,
}

impl RunConfig {
    pub fn new(executor: Executor) -> Self {
        Self {
            executor,
            thresholds: Vec::new(),
            env: BTreeMap::new(),
            tick: DEFAULT_TICK,
            pacing: Pacing::None,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
            request_timeout: Some(DEFAULT_REQUEST_TIMEOUT),
            on_setup_error: SetupFailurePolicy::Continue,
            empty_thresholds: EmptySeriesPolicy::Pass,
        }
    }

    pub fn staged(start_vus: u64, stages: Vec<Stage>) -> Self {
        Self::new(Executor::Staged {
            start_vus,
            stages,
            after_stages: AfterStages::Stop,
            duration: None,
        })
    }

    pub fn fixed(vus: u64, duration: Duration) -> Self {
        Self::new(Executor::Fixed { vus, duration })
    }

    #[must_use]
    pub fn with_threshold(mut self, metric: &str, expressions: &[&str]) -> Self {
        self.thresholds.push(ThresholdSet {
            metric: metric.to_string(),
            expressions: expressions.iter().map(|e| e.to_string()).collect(),
        });
        self
    }

    /// Checks everything that can be checked without the scenario's metric set.
    pub fn validate(&self) -> Result<()> {
        self.executor.validate()?;

        if self.tick.is_zero() {
            return Err(Error::InvalidTick);
        }
        if let Pacing::Random { min, max } = self.pacing
            && min > max
        {
            return Err(Error::InvalidPacing(format!(
                "random pacing min {min:?} exceeds max {max:?}"
            )));
        }
        if self.request_timeout.is_some_and(|t| t.is_zero()) {
            return Err(Error::InvalidDuration(
                "request timeout must be positive".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    #[test]
    fn staged_run_duration_is_stage_total_unless_held_longer() {
        let mut cfg = RunConfig::staged(0, vec![Stage::new(secs(30), 5), Stage::new(secs(30), 5)]);
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.executor.run_duration(), secs(60));
        assert_eq!(cfg.executor.max_vus(), 5);

        cfg.executor = Executor::Staged {
            start_vus: 0,
            stages: vec![Stage::new(secs(30), 5)],
            after_stages: AfterStages::Hold,
            duration: Some(secs(90)),
        };
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.executor.run_duration(), secs(90));
    }

    #[test]
    fn rejects_invalid_stage_lists() {
        assert!(matches!(
            RunConfig::staged(0, vec![]).validate(),
            Err(Error::InvalidStages(_))
        ));
        assert!(matches!(
            RunConfig::staged(0, vec![Stage::new(secs(1), 1), Stage::new(Duration::ZERO, 2)])
                .validate(),
            Err(Error::InvalidStages(msg)) if msg.contains("stage 2")
        ));
        assert!(matches!(
            RunConfig::staged(0, vec![Stage::new(secs(1), 0)]).validate(),
            Err(Error::InvalidVus)
        ));
    }

    #[test]
    fn duration_with_stop_or_shorter_than_stages_is_rejected() {
        let mut cfg = RunConfig::staged(0, vec![Stage::new(secs(10), 1)]);
        cfg.executor = Executor::Staged {
            start_vus: 0,
            stages: vec![Stage::new(secs(10), 1)],
            after_stages: AfterStages::Stop,
            duration: Some(secs(20)),
        };
        assert!(matches!(cfg.validate(), Err(Error::InvalidDuration(_))));

        cfg.executor = Executor::Staged {
            start_vus: 0,
            stages: vec![Stage::new(secs(10), 1)],
            after_stages: AfterStages::Hold,
            duration: Some(secs(5)),
        };
        assert!(matches!(cfg.validate(), Err(Error::InvalidDuration(_))));
    }

    #[test]
    fn fixed_mode_requires_vus_and_duration() {
        assert!(matches!(
            RunConfig::fixed(0, secs(1)).validate(),
            Err(Error::InvalidVus)
        ));
        assert!(matches!(
            RunConfig::fixed(1, Duration::ZERO).validate(),
            Err(Error::InvalidDuration(_))
        ));
        assert!(RunConfig::fixed(1, secs(30)).validate().is_ok());
    }

    #[test]
    fn rejects_zero_tick_and_inverted_pacing() {
        let mut cfg = RunConfig::fixed(1, secs(1));
        cfg.tick = Duration::ZERO;
        assert!(matches!(cfg.validate(), Err(Error::InvalidTick)));

        let mut cfg = RunConfig::fixed(1, secs(1));
        cfg.pacing = Pacing::Random {
            min: secs(2),
            max: secs(1),
        };
        assert!(matches!(cfg.validate(), Err(Error::InvalidPacing(_))));
    }

    #[test]
    fn policies_parse_from_lowercase() {
        assert_eq!("hold".parse::<AfterStages>().ok(), Some(AfterStages::Hold));
        assert_eq!(
            "abort".parse::<SetupFailurePolicy>().ok(),
            Some(SetupFailurePolicy::Abort)
        );
        assert_eq!(
            "fail".parse::<EmptySeriesPolicy>().ok(),
            Some(EmptySeriesPolicy::Fail)
        );
    }
}
