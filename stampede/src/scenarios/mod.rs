//! Built-in scenarios against the task-management API.
//!
//! Both read `BASE_URL`, `USERNAME` and `PASSWORD` from the run environment.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde_json::{Value, json};
use stampede_core::{HttpRequest, Response, RunOptions, ScenarioError, ThresholdSet, Vu, builtin};

mod load;
mod smoke;

pub(crate) use load::LoadTest;
pub(crate) use smoke::SmokeTest;

pub(crate) const DEFAULT_BASE_URL: &str = "http://localhost:8080";
pub(crate) const DEFAULT_USERNAME: &str = "john_tech";
pub(crate) const DEFAULT_PASSWORD: &str = "password123";

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ScenarioName {
    /// One VU for 30s; verifies health, login and the task endpoints.
    Smoke,
    /// Staged ramp to 20 VUs over 16m with a custom error rate.
    Load,
}

impl ScenarioName {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Smoke => "smoke",
            Self::Load => "load",
        }
    }

    /// Lowest-precedence run options for this scenario.
    pub fn defaults(self) -> RunOptions {
        match self {
            Self::Smoke => smoke::defaults(),
            Self::Load => load::defaults(),
        }
    }
}

fn threshold(metric: &str, expr: &str) -> ThresholdSet {
    ThresholdSet {
        metric: metric.to_string(),
        expressions: vec![expr.to_string()],
    }
}

/// Latency and failure thresholds shared by both scenarios.
fn http_thresholds() -> Vec<ThresholdSet> {
    vec![
        threshold(builtin::HTTP_REQ_DURATION, "p(95)<500"),
        threshold(builtin::HTTP_REQ_FAILED, "rate<0.1"),
    ]
}

/// API location and credentials.
#[derive(Debug, Clone)]
pub(crate) struct Target {
    base_url: String,
    username: String,
    password: String,
}

impl Target {
    pub(crate) fn from_env<D>(vu: &Vu<D>) -> Self {
        Self {
            base_url: vu
                .env_or("BASE_URL", DEFAULT_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            username: vu.env_or("USERNAME", DEFAULT_USERNAME).to_string(),
            password: vu.env_or("PASSWORD", DEFAULT_PASSWORD).to_string(),
        }
    }

    pub(crate) fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    pub(crate) fn login_request(&self) -> Result<HttpRequest, ScenarioError> {
        Ok(HttpRequest::post(self.url("/login")).json(&json!({
            "username": self.username,
            "password": self.password,
        }))?)
    }
}

/// A response, or `None` when the request never got one.
///
/// Checks against a missing response fail instead of aborting the iteration.
#[derive(Debug)]
pub(crate) struct Reply(Option<Response>);

impl Reply {
    pub(crate) fn status_is(&self, code: u16) -> bool {
        self.0.as_ref().is_some_and(|r| r.status == code)
    }

    pub(crate) fn faster_than(&self, limit: Duration) -> bool {
        self.0.as_ref().is_some_and(|r| r.duration() < limit)
    }

    pub(crate) fn duration(&self) -> Option<Duration> {
        self.0.as_ref().map(Response::duration)
    }

    pub(crate) fn json(&self) -> Option<Value> {
        self.0.as_ref()?.json().ok()
    }

    pub(crate) fn field(&self, key: &str) -> Option<Value> {
        self.json()?.get(key).filter(|v| !v.is_null()).cloned()
    }

    pub(crate) fn str_field(&self, key: &str) -> Option<String> {
        match self.field(key)? {
            Value::String(s) => Some(s),
            other => Some(other.to_string()),
        }
    }

    pub(crate) fn describe(&self) -> String {
        match &self.0 {
            Some(r) => format!("status {}", r.status),
            None => "no response".to_string(),
        }
    }
}

/// Sends `req` through the VU's metric-recording client.
pub(crate) async fn send<D>(vu: &Vu<D>, req: HttpRequest) -> Reply {
    Reply(vu.http().request(req).await.ok())
}

/// Logs in and records the `login successful` and `token received` checks.
///
/// Returns the token only when both checks pass.
pub(crate) async fn login<D>(
    vu: &Vu<D>,
    target: &Target,
) -> Result<(Reply, Option<String>), ScenarioError> {
    let reply = send(vu, target.login_request()?).await;
    let ok = vu.check("login successful", reply.status_is(200));
    let token = reply.str_field("token");
    let received = vu.check("token received", token.is_some());
    Ok((reply, token.filter(|_| ok && received)))
}

pub(crate) fn task_payload(summary: impl Into<String>) -> Value {
    json!({
        "summary": summary.into(),
        "performed_at": humantime::format_rfc3339_millis(SystemTime::now()).to_string(),
    })
}

pub(crate) fn unix_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use stampede_core::resolve_run_config;

    #[test]
    fn defaults_resolve_to_valid_configs() {
        let smoke = resolve_run_config(&[ScenarioName::Smoke.defaults()])
            .unwrap_or_else(|e| panic!("smoke: {e}"));
        assert_eq!(smoke.executor.max_vus(), 1);
        assert_eq!(smoke.executor.run_duration(), Duration::from_secs(30));

        let load = resolve_run_config(&[ScenarioName::Load.defaults()])
            .unwrap_or_else(|e| panic!("load: {e}"));
        assert_eq!(load.executor.max_vus(), 20);
        assert_eq!(load.executor.run_duration(), Duration::from_secs(16 * 60));
        assert!(load.thresholds.iter().any(|t| t.metric == load::ERRORS));
    }

    #[test]
    fn missing_reply_fails_every_check() {
        let reply = Reply(None);
        assert!(!reply.status_is(200));
        assert!(!reply.faster_than(Duration::from_secs(1)));
        assert_eq!(reply.duration(), None);
        assert_eq!(reply.field("id"), None);
        assert_eq!(reply.describe(), "no response");
    }

    #[test]
    fn task_payload_carries_an_rfc3339_timestamp() {
        let payload = task_payload("Smoke test task");
        assert_eq!(payload["summary"], "Smoke test task");
        let performed_at = payload["performed_at"]
            .as_str()
            .unwrap_or_else(|| panic!("performed_at missing"));
        assert!(humantime::parse_rfc3339(performed_at).is_ok(), "{performed_at}");
    }
}
