use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use stampede_core::Stage;

use crate::scenarios::ScenarioName;

const DURATION_HINT: &str = "expected e.g. 30s, 250ms, 2m, 1h 30m or plain seconds";

/// Humantime durations (`30s`, `2m`, `1h 30m`) or plain integer seconds.
pub(crate) fn parse_duration(input: &str) -> Result<Duration, String> {
    let s = input.trim();
    if s.is_empty() {
        return Err(format!("duration cannot be empty ({DURATION_HINT})"));
    }
    if let Ok(secs) = s.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }
    humantime::parse_duration(s).map_err(|_| format!("invalid duration '{s}' ({DURATION_HINT})"))
}

/// `DURATION:TARGET`, e.g. `2m:10`.
pub(crate) fn parse_stage(input: &str) -> Result<Stage, String> {
    let (d, t) = input
        .rsplit_once(':')
        .ok_or_else(|| format!("invalid stage '{input}' (expected DURATION:TARGET, e.g. 2m:10)"))?;
    let duration = parse_duration(d)?;
    let target = t
        .trim()
        .parse::<u64>()
        .map_err(|_| format!("invalid stage target '{t}' (expected a non-negative integer)"))?;
    Ok(Stage::new(duration, target))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Progress line on stderr and a summary on stdout.
    HumanReadable,
    /// NDJSON progress records and a final summary document on stdout.
    Json,
}

#[derive(Debug, Parser)]
#[command(
    name = "stampede",
    author,
    version,
    about = "Virtual-user load generator for HTTP APIs",
    long_about = "stampede drives virtual users through timed stages against an HTTP API, records latency and error metrics, and fails the run when a threshold is not met.\n\nThe target API is read from BASE_URL, USERNAME and PASSWORD in the environment; `env:` in the config file and `--env KEY=VALUE` override the process environment.",
    after_help = "Examples:\n  stampede run smoke\n  stampede run load --config load.yaml\n  stampede run load --stage 30s:5 --stage 1m:5 --stage 30s:0\n  stampede run smoke --vus 5 --duration 1m --env BASE_URL=http://localhost:8080 --output json\n\nExit codes: 0 pass, 11 thresholds failed, 20 setup failed (onSetupError: abort), 30 invalid input, 40 runtime error."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run a built-in scenario
    #[command(
        long_about = "Run a built-in scenario.\n\nCLI flags override the config file, which overrides the scenario's defaults."
    )]
    Run(RunArgs),
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Scenario to run
    #[arg(value_enum)]
    pub scenario: ScenarioName,

    /// YAML run configuration
    #[arg(long, short = 'c', value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Fixed number of virtual users (cannot be combined with --stage)
    #[arg(long, conflicts_with = "stages")]
    pub vus: Option<u64>,

    /// Run duration (e.g. 30s, 2m)
    #[arg(long, value_parser = parse_duration)]
    pub duration: Option<Duration>,

    /// Ramp stage as DURATION:TARGET (repeatable, in order)
    #[arg(long = "stage", value_name = "DURATION:TARGET", value_parser = parse_stage)]
    pub stages: Vec<Stage>,

    /// Add/override env vars visible to the scenario (repeatable, KEY=VALUE)
    #[arg(long = "env", value_name = "KEY=VALUE")]
    pub env: Vec<String>,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::HumanReadable)]
    pub output: OutputFormat,

    /// Log filter (e.g. info, debug, stampede_core=trace); falls back to RUST_LOG
    #[arg(long, value_name = "LEVEL")]
    pub log_level: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_duration_accepts_humantime_and_seconds() {
        assert_eq!(parse_duration("250ms"), Ok(Duration::from_millis(250)));
        assert_eq!(parse_duration("30s"), Ok(Duration::from_secs(30)));
        assert_eq!(parse_duration("2m"), Ok(Duration::from_secs(120)));
        assert_eq!(parse_duration("1h 30m"), Ok(Duration::from_secs(5400)));
        assert_eq!(parse_duration("45"), Ok(Duration::from_secs(45)));
    }

    #[test]
    fn parse_duration_rejects_invalid_values() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("abc").is_err());
        assert!(parse_duration("10x").is_err());
    }

    #[test]
    fn parse_stage_splits_on_the_last_colon() {
        assert_eq!(
            parse_stage("2m:10"),
            Ok(Stage::new(Duration::from_secs(120), 10))
        );
        assert!(parse_stage("2m").is_err());
        assert!(parse_stage("2m:-1").is_err());
        assert!(parse_stage("xx:3").is_err());
    }

    #[test]
    fn cli_parses_run_with_stages_and_env() {
        let parsed = Cli::try_parse_from([
            "stampede",
            "run",
            "load",
            "--config",
            "load.yaml",
            "--stage",
            "30s:5",
            "--stage",
            "1m:0",
            "--env",
            "BASE_URL=http://localhost:8080",
            "--env",
            "EMPTY=",
            "--output",
            "json",
            "--log-level",
            "debug",
        ]);

        let cli = match parsed {
            Ok(v) => v,
            Err(err) => panic!("failed to parse args: {err}"),
        };

        let Command::Run(args) = cli.command;
        assert_eq!(args.scenario, ScenarioName::Load);
        assert_eq!(args.config, Some(PathBuf::from("load.yaml")));
        assert_eq!(
            args.stages,
            vec![
                Stage::new(Duration::from_secs(30), 5),
                Stage::new(Duration::from_secs(60), 0)
            ]
        );
        assert_eq!(
            args.env,
            vec!["BASE_URL=http://localhost:8080".to_string(), "EMPTY=".to_string()]
        );
        assert_eq!(args.output, OutputFormat::Json);
        assert_eq!(args.log_level.as_deref(), Some("debug"));
    }

    #[test]
    fn vus_and_stages_conflict() {
        let parsed = Cli::try_parse_from([
            "stampede", "run", "smoke", "--vus", "2", "--stage", "10s:2",
        ]);
        assert!(parsed.is_err());
    }

    #[test]
    fn unknown_scenario_is_rejected() {
        assert!(Cli::try_parse_from(["stampede", "run", "soak"]).is_err());
    }
}
