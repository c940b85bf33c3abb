use anyhow::Context as _;
use std::collections::BTreeMap;

use stampede_core::{
    ProgressFn, RunConfig, RunOptions, RunReport, Scenario, process_env_snapshot,
    resolve_run_config,
};

use crate::cli::RunArgs;
use crate::config_yaml;
use crate::exit_codes::ExitCode;
use crate::output;
use crate::run_error::RunError;
use crate::scenarios::{LoadTest, ScenarioName, SmokeTest};

pub async fn run(args: RunArgs) -> Result<ExitCode, RunError> {
    let out = output::formatter(args.output);
    let config = resolve_config(&args).await?;

    out.print_header(args.scenario, &config);
    let progress = out.progress();

    let report = match args.scenario {
        ScenarioName::Smoke => execute(SmokeTest, config, progress).await?,
        ScenarioName::Load => execute(LoadTest, config, progress).await?,
    };

    out.print_summary(&report).map_err(RunError::RuntimeError)?;
    Ok(ExitCode::from_report(report.passed))
}

async fn execute<S: Scenario>(
    scenario: S,
    config: RunConfig,
    progress: Option<ProgressFn>,
) -> Result<RunReport, RunError> {
    Ok(stampede_core::run(scenario, config, progress).await?)
}

/// Layers, lowest first: process env, scenario defaults, `--config`, CLI flags.
pub(crate) async fn resolve_config(args: &RunArgs) -> Result<RunConfig, RunError> {
    let mut layers = vec![
        RunOptions {
            env: process_env_snapshot(),
            ..Default::default()
        },
        args.scenario.defaults(),
    ];

    if let Some(path) = &args.config {
        let file = config_yaml::load_run_options(path)
            .await
            .map_err(RunError::InvalidInput)?;
        layers.push(file);
    }
    layers.push(cli_options(args).map_err(RunError::InvalidInput)?);

    let config = resolve_run_config(&layers)?;
    tracing::debug!(
        scenario = args.scenario.as_str(),
        duration = ?config.executor.run_duration(),
        max_vus = config.executor.max_vus(),
        "resolved run configuration"
    );
    Ok(config)
}

fn cli_options(args: &RunArgs) -> anyhow::Result<RunOptions> {
    let mut env = BTreeMap::new();
    for raw in &args.env {
        let (k, v) = parse_env_override(raw)?;
        env.insert(k, v);
    }

    Ok(RunOptions {
        vus: args.vus,
        duration: args.duration,
        stages: (!args.stages.is_empty()).then(|| args.stages.clone()),
        env,
        ..Default::default()
    })
}

fn parse_env_override(s: &str) -> anyhow::Result<(String, String)> {
    let (k, v) = s
        .split_once('=')
        .with_context(|| format!("invalid --env (expected KEY=VALUE): {s}"))?;
    if k.is_empty() {
        anyhow::bail!("invalid --env (empty KEY): {s}");
    }
    Ok((k.to_string(), v.to_string()))
}
