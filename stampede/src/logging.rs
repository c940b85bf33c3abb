use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "warn";

/// Picks the filter: `--log-level`, then `RUST_LOG`, then `warn`.
fn env_filter(level: Option<&str>) -> EnvFilter {
    level
        .map(EnvFilter::try_new)
        .and_then(Result::ok)
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_FILTER))
}

/// Installs the global subscriber. Logs go to stderr so `--output json` keeps
/// stdout machine-readable.
pub(crate) fn init(level: Option<&str>) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter(level))
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
