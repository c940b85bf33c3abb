use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use anyhow::Context as _;
use serde::Deserialize;
use stampede_core::{
    AfterStages, EmptySeriesPolicy, Pacing, RunOptions, SetupFailurePolicy, Stage, ThresholdSet,
};

/// Run configuration document. Every key is optional; unset keys fall through
/// to the scenario defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct RunConfigYaml {
    #[serde(default)]
    pub stages: Option<Vec<StageYaml>>,
    #[serde(default)]
    pub vus: Option<u64>,
    #[serde(default)]
    pub duration: Option<YamlDuration>,

    #[serde(rename = "startVUs", default)]
    pub start_vus: Option<u64>,
    /// stop | hold
    #[serde(default)]
    pub after_stages: Option<String>,

    #[serde(default)]
    pub thresholds: BTreeMap<String, ThresholdExprYaml>,

    #[serde(default, deserialize_with = "deserialize_env")]
    pub env: BTreeMap<String, String>,

    #[serde(default)]
    pub tick: Option<YamlDuration>,
    #[serde(default)]
    pub pacing: Option<PacingYaml>,
    #[serde(default)]
    pub drain_timeout: Option<YamlDuration>,
    #[serde(default)]
    pub request_timeout: Option<YamlDuration>,
    /// continue | abort
    #[serde(default)]
    pub on_setup_error: Option<String>,
    /// pass | fail
    #[serde(default)]
    pub empty_thresholds: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct StageYaml {
    pub duration: YamlDuration,
    pub target: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum ThresholdExprYaml {
    One(String),
    Many(Vec<String>),
}

impl ThresholdExprYaml {
    fn into_vec(self) -> Vec<String> {
        match self {
            Self::One(s) => vec![s],
            Self::Many(v) => v,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum PacingYaml {
    Fixed(YamlDuration),
    Random { min: YamlDuration, max: YamlDuration },
}

impl From<PacingYaml> for Pacing {
    fn from(value: PacingYaml) -> Self {
        match value {
            PacingYaml::Fixed(d) if d.0.is_zero() => Pacing::None,
            PacingYaml::Fixed(d) => Pacing::Fixed(d.0),
            PacingYaml::Random { min, max } => Pacing::Random {
                min: min.0,
                max: max.0,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct YamlDuration(Duration);

impl<'de> Deserialize<'de> for YamlDuration {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct V;

        impl<'de> serde::de::Visitor<'de> for V {
            type Value = YamlDuration;

            fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                f.write_str("duration as string (e.g. 10s), integer seconds, or float seconds")
            }

            fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                Ok(YamlDuration(Duration::from_secs(v)))
            }

            fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                u64::try_from(v)
                    .map(|v| YamlDuration(Duration::from_secs(v)))
                    .map_err(|_| E::custom("duration cannot be negative"))
            }

            fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                Duration::try_from_secs_f64(v)
                    .map(YamlDuration)
                    .map_err(|_| E::custom("duration must be a non-negative, finite number"))
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                let d = humantime::parse_duration(v.trim()).map_err(E::custom)?;
                Ok(YamlDuration(d))
            }

            fn visit_string<E>(self, v: String) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                self.visit_str(&v)
            }
        }

        deserializer.deserialize_any(V)
    }
}

fn deserialize_env<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = BTreeMap::<String, serde_yaml::Value>::deserialize(deserializer)?;
    let mut out = BTreeMap::new();

    for (k, v) in raw {
        let s = match v {
            serde_yaml::Value::Null => continue,
            serde_yaml::Value::Bool(b) => b.to_string(),
            serde_yaml::Value::Number(n) => n.to_string(),
            serde_yaml::Value::String(s) => s,
            _ => {
                return Err(serde::de::Error::custom(format!(
                    "env `{k}` must be a scalar value"
                )));
            }
        };
        out.insert(k, s);
    }

    Ok(out)
}

fn parse_policy<T: std::str::FromStr>(
    key: &str,
    raw: Option<String>,
    allowed: &str,
) -> anyhow::Result<Option<T>> {
    raw.map(|s| {
        s.trim()
            .to_ascii_lowercase()
            .parse::<T>()
            .map_err(|_| anyhow::anyhow!("invalid `{key}: {s}` (expected {allowed})"))
    })
    .transpose()
}

impl RunConfigYaml {
    pub(crate) fn into_options(self) -> anyhow::Result<RunOptions> {
        let RunConfigYaml {
            stages,
            vus,
            duration,
            start_vus,
            after_stages,
            thresholds,
            env,
            tick,
            pacing,
            drain_timeout,
            request_timeout,
            on_setup_error,
            empty_thresholds,
        } = self;

        Ok(RunOptions {
            vus,
            duration: duration.map(|d| d.0),
            stages: stages.map(|stages| {
                stages
                    .into_iter()
                    .map(|s| Stage::new(s.duration.0, s.target))
                    .collect()
            }),
            start_vus,
            after_stages: parse_policy::<AfterStages>("afterStages", after_stages, "stop | hold")?,
            thresholds: thresholds
                .into_iter()
                .map(|(metric, exprs)| ThresholdSet {
                    metric,
                    expressions: exprs.into_vec(),
                })
                .collect(),
            env,
            tick: tick.map(|d| d.0),
            pacing: pacing.map(Pacing::from),
            drain_timeout: drain_timeout.map(|d| d.0),
            request_timeout: request_timeout.map(|d| d.0),
            on_setup_error: parse_policy::<SetupFailurePolicy>(
                "onSetupError",
                on_setup_error,
                "continue | abort",
            )?,
            empty_thresholds: parse_policy::<EmptySeriesPolicy>(
                "emptyThresholds",
                empty_thresholds,
                "pass | fail",
            )?,
        })
    }
}

pub(crate) fn parse_run_options(text: &str) -> anyhow::Result<RunOptions> {
    // An empty document is a valid config that overrides nothing.
    if text.trim().is_empty() {
        return Ok(RunOptions::default());
    }
    let doc: RunConfigYaml = serde_yaml::from_str(text)?;
    doc.into_options()
}

pub(crate) async fn load_run_options(path: &Path) -> anyhow::Result<RunOptions> {
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read config: {}", path.display()))?;

    parse_run_options(&text).with_context(|| format!("failed to parse config: {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> RunOptions {
        parse_run_options(text).unwrap_or_else(|e| panic!("parse failed: {e:#}"))
    }

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    #[test]
    fn parses_staged_document() {
        let opts = parse(
            r#"
stages:
  - { duration: 2m, target: 10 }
  - { duration: 30, target: 0 }
startVUs: 1
afterStages: hold
duration: 10m
thresholds:
  http_req_duration: ["p(95)<500", "p(99)<1500"]
  http_req_failed: "rate<0.1"
tick: 250ms
pacing: 1s
drainTimeout: 1.5
requestTimeout: 10s
onSetupError: abort
emptyThresholds: fail
env:
  BASE_URL: http://localhost:8080
  RETRIES: 3
  VERBOSE: true
  UNSET: ~
"#,
        );

        assert_eq!(
            opts.stages,
            Some(vec![Stage::new(secs(120), 10), Stage::new(secs(30), 0)])
        );
        assert_eq!(opts.start_vus, Some(1));
        assert_eq!(opts.after_stages, Some(AfterStages::Hold));
        assert_eq!(opts.duration, Some(secs(600)));
        assert_eq!(
            opts.thresholds,
            vec![
                ThresholdSet {
                    metric: "http_req_duration".into(),
                    expressions: vec!["p(95)<500".into(), "p(99)<1500".into()],
                },
                ThresholdSet {
                    metric: "http_req_failed".into(),
                    expressions: vec!["rate<0.1".into()],
                },
            ]
        );
        assert_eq!(opts.tick, Some(Duration::from_millis(250)));
        assert_eq!(opts.pacing, Some(Pacing::Fixed(secs(1))));
        assert_eq!(opts.drain_timeout, Some(Duration::from_millis(1500)));
        assert_eq!(opts.request_timeout, Some(secs(10)));
        assert_eq!(opts.on_setup_error, Some(SetupFailurePolicy::Abort));
        assert_eq!(opts.empty_thresholds, Some(EmptySeriesPolicy::Fail));
        assert_eq!(opts.env["BASE_URL"], "http://localhost:8080");
        assert_eq!(opts.env["RETRIES"], "3");
        assert_eq!(opts.env["VERBOSE"], "true");
        assert!(!opts.env.contains_key("UNSET"));
    }

    #[test]
    fn parses_fixed_document_with_random_pacing() {
        let opts = parse("vus: 5\nduration: 1m\npacing: { min: 500ms, max: 1500ms }\n");
        assert_eq!(opts.vus, Some(5));
        assert_eq!(opts.duration, Some(secs(60)));
        assert_eq!(opts.stages, None);
        assert_eq!(
            opts.pacing,
            Some(Pacing::Random {
                min: Duration::from_millis(500),
                max: Duration::from_millis(1500),
            })
        );
    }

    #[test]
    fn empty_document_overrides_nothing() {
        assert_eq!(parse(""), RunOptions::default());
        assert_eq!(parse("# nothing here\n"), RunOptions::default());
    }

    #[test]
    fn rejects_unknown_keys_and_bad_values() {
        assert!(parse_run_options("vus: 2\nramp: fast\n").is_err());
        assert!(parse_run_options("duration: soon\n").is_err());
        assert!(parse_run_options("duration: -5\n").is_err());
        assert!(parse_run_options("stages: [{ duration: 10s }]\n").is_err());

        let err = parse_run_options("onSetupError: retry\n")
            .err()
            .unwrap_or_else(|| panic!("expected an error"));
        assert!(err.to_string().contains("continue | abort"), "{err}");
    }

    #[test]
    fn policies_are_case_insensitive() {
        let opts = parse("afterStages: Stop\nonSetupError: ABORT\n");
        assert_eq!(opts.after_stages, Some(AfterStages::Stop));
        assert_eq!(opts.on_setup_error, Some(SetupFailurePolicy::Abort));
    }

    #[tokio::test]
    async fn load_reports_missing_file_with_path() {
        let err = load_run_options(Path::new("/definitely/not/here.yaml"))
            .await
            .err()
            .unwrap_or_else(|| panic!("expected an error"));
        assert!(format!("{err:#}").contains("/definitely/not/here.yaml"));
    }

    #[tokio::test]
    async fn load_reads_file_from_disk() {
        let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("tempdir: {e}"));
        let path = dir.path().join("run.yaml");
        std::fs::write(&path, "vus: 3\nduration: 5s\n").unwrap_or_else(|e| panic!("write: {e}"));

        let opts = load_run_options(&path)
            .await
            .unwrap_or_else(|e| panic!("load failed: {e:#}"));
        assert_eq!(opts.vus, Some(3));
        assert_eq!(opts.duration, Some(secs(5)));
    }
}
