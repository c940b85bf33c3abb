use std::collections::BTreeMap;
use std::time::Duration;

use crate::config::{
    AfterStages, EmptySeriesPolicy, Executor, Pacing, RunConfig, SetupFailurePolicy, Stage,
};
use crate::error::{Error, Result};
use crate::thresholds::ThresholdSet;

/// One configuration layer (scenario defaults, a config file, CLI flags).
///
/// Every field is optional so a layer only overrides what it names.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunOptions {
    pub vus: Option<u64>,
    pub duration: Option<Duration>,
    pub stages: Option<Vec<Stage>>,
    pub start_vus: Option<u64>,
    pub after_stages: Option<AfterStages>,
    /// Replaces lower layers per metric.
    pub thresholds: Vec<ThresholdSet>,
    /// Merged key by key.
    pub env: BTreeMap<String, String>,
    pub tick: Option<Duration>,
    pub pacing: Option<Pacing>,
    pub drain_timeout: Option<Duration>,
    pub request_timeout: Option<Duration>,
    pub on_setup_error: Option<SetupFailurePolicy>,
    pub empty_thresholds: Option<EmptySeriesPolicy>,
}

impl RunOptions {
    fn sets_shape(&self) -> bool {
        self.stages.is_some() || self.vus.is_some() || self.duration.is_some()
    }
}

/// Folds `layers`, lowest precedence first, into a validated [`RunConfig`].
///
/// The run shape comes from the highest layer that sets `stages`, `vus` or
/// `duration`: stages there make a staged run, otherwise the run uses a fixed
/// number of VUs, filling `vus` and `duration` from that layer downwards.
pub fn resolve_run_config(layers: &[RunOptions]) -> Result<RunConfig> {
    let executor = resolve_executor(layers)?;
    let mut cfg = RunConfig::new(executor);

    for layer in layers {
        for set in &layer.thresholds {
            match cfg.thresholds.iter_mut().find(|t| t.metric == set.metric) {
                Some(existing) => existing.expressions = set.expressions.clone(),
                None => cfg.thresholds.push(set.clone()),
            }
        }
        cfg.env
            .extend(layer.env.iter().map(|(k, v)| (k.clone(), v.clone())));

        if let Some(tick) = layer.tick {
            cfg.tick = tick;
        }
        if let Some(pacing) = layer.pacing {
            cfg.pacing = pacing;
        }
        if let Some(d) = layer.drain_timeout {
            cfg.drain_timeout = d;
        }
        if let Some(t) = layer.request_timeout {
            cfg.request_timeout = Some(t);
        }
        if let Some(p) = layer.on_setup_error {
            cfg.on_setup_error = p;
        }
        if let Some(p) = layer.empty_thresholds {
            cfg.empty_thresholds = p;
        }
    }

    cfg.validate()?;
    Ok(cfg)
}

fn resolve_executor(layers: &[RunOptions]) -> Result<Executor> {
    let Some(pos) = layers.iter().rposition(RunOptions::sets_shape) else {
        return Err(Error::InvalidDuration(
            "no run shape configured (set `stages`, or `vus` and `duration`)".into(),
        ));
    };
    let layer = &layers[pos];
    let below = || layers[..=pos].iter().rev();

    if let Some(stages) = &layer.stages {
        if layer.vus.is_some() {
            return Err(Error::ConflictingShape);
        }
        let after_stages = layers
            .iter()
            .rev()
            .find_map(|l| l.after_stages)
            .unwrap_or_default();
        return Ok(Executor::Staged {
            start_vus: below().find_map(|l| l.start_vus).unwrap_or(0),
            stages: stages.clone(),
            after_stages,
            duration: layer.duration,
        });
    }

    let vus = below().find_map(|l| l.vus).unwrap_or(1);
    let duration = below().find_map(|l| l.duration).ok_or_else(|| {
        Error::InvalidDuration("a fixed-VU run requires a duration".into())
    })?;
    Ok(Executor::Fixed { vus, duration })
}

/// Current process environment, used as the lowest `env` layer.
pub fn process_env_snapshot() -> BTreeMap<String, String> {
    std::env::vars().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    fn staged(stages: &[(u64, u64)]) -> RunOptions {
        RunOptions {
            stages: Some(stages.iter().map(|(d, t)| Stage::new(secs(*d), *t)).collect()),
            ..Default::default()
        }
    }

    fn threshold(metric: &str, exprs: &[&str]) -> ThresholdSet {
        ThresholdSet {
            metric: metric.into(),
            expressions: exprs.iter().map(|e| e.to_string()).collect(),
        }
    }

    #[test]
    fn stages_from_the_only_layer() {
        let cfg = resolve_run_config(&[staged(&[(30, 5), (30, 5)])])
            .unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(
            cfg.executor,
            Executor::Staged {
                start_vus: 0,
                stages: vec![Stage::new(secs(30), 5), Stage::new(secs(30), 5)],
                after_stages: AfterStages::Stop,
                duration: None,
            }
        );
    }

    #[test]
    fn higher_fixed_layer_overrides_lower_stages() {
        let defaults = staged(&[(120, 10), (300, 10)]);
        let cli = RunOptions {
            vus: Some(3),
            duration: Some(secs(10)),
            ..Default::default()
        };
        let cfg = resolve_run_config(&[defaults, cli]).unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(
            cfg.executor,
            Executor::Fixed {
                vus: 3,
                duration: secs(10)
            }
        );
    }

    #[test]
    fn fixed_fields_fill_in_from_lower_layers() {
        let defaults = RunOptions {
            vus: Some(1),
            duration: Some(secs(30)),
            ..Default::default()
        };
        let cli = RunOptions {
            vus: Some(4),
            ..Default::default()
        };
        let cfg = resolve_run_config(&[defaults, cli]).unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(
            cfg.executor,
            Executor::Fixed {
                vus: 4,
                duration: secs(30)
            }
        );
    }

    #[test]
    fn stages_and_vus_in_one_layer_conflict() {
        let mut layer = staged(&[(10, 1)]);
        layer.vus = Some(2);
        assert!(matches!(
            resolve_run_config(&[layer]),
            Err(Error::ConflictingShape)
        ));
    }

    #[test]
    fn missing_shape_or_duration_is_rejected() {
        assert!(matches!(
            resolve_run_config(&[RunOptions::default()]),
            Err(Error::InvalidDuration(_))
        ));
        let vus_only = RunOptions {
            vus: Some(2),
            ..Default::default()
        };
        assert!(matches!(
            resolve_run_config(&[vus_only]),
            Err(Error::InvalidDuration(_))
        ));
    }

    #[test]
    fn thresholds_replace_per_metric_and_env_merges() {
        let mut defaults = staged(&[(10, 2)]);
        defaults.thresholds = vec![
            threshold("http_req_duration", &["p(95)<500"]),
            threshold("http_req_failed", &["rate<0.1"]),
        ];
        defaults.env = BTreeMap::from([
            ("BASE_URL".to_string(), "http://localhost:8080".to_string()),
            ("USERNAME".to_string(), "john_tech".to_string()),
        ]);
        defaults.pacing = Some(Pacing::Fixed(secs(1)));

        let file = RunOptions {
            thresholds: vec![threshold("http_req_duration", &["p(99)<1500"])],
            env: BTreeMap::from([("BASE_URL".to_string(), "http://api:9000".to_string())]),
            on_setup_error: Some(SetupFailurePolicy::Abort),
            ..Default::default()
        };

        let cfg = resolve_run_config(&[defaults, file]).unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(
            cfg.thresholds,
            vec![
                threshold("http_req_duration", &["p(99)<1500"]),
                threshold("http_req_failed", &["rate<0.1"]),
            ]
        );
        assert_eq!(cfg.env["BASE_URL"], "http://api:9000");
        assert_eq!(cfg.env["USERNAME"], "john_tech");
        assert_eq!(cfg.pacing, Pacing::Fixed(secs(1)));
        assert_eq!(cfg.on_setup_error, SetupFailurePolicy::Abort);
        assert_eq!(cfg.empty_thresholds, EmptySeriesPolicy::Pass);
    }

    #[test]
    fn hold_duration_belongs_to_the_stage_layer() {
        let mut layer = staged(&[(10, 2)]);
        layer.after_stages = Some(AfterStages::Hold);
        layer.duration = Some(secs(60));
        let cfg = resolve_run_config(&[layer]).unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(cfg.executor.run_duration(), secs(60));
    }

    #[test]
    fn invalid_resolved_config_is_reported() {
        let mut layer = staged(&[(10, 2)]);
        layer.tick = Some(Duration::ZERO);
        assert!(matches!(resolve_run_config(&[layer]), Err(Error::InvalidTick)));
    }
}
