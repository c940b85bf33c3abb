use std::time::Duration;

use stampede_core::{
    HttpRequest, MetricDecl, Pacing, RunOptions, Scenario, ScenarioError, Stage, Vu,
};

use super::{Reply, Target, http_thresholds, login, send, task_payload, threshold, unix_millis};

/// Share of steps whose checks did not all pass.
pub(crate) const ERRORS: &str = "errors";
/// Duration of every step's request, in milliseconds.
pub(crate) const RESPONSE_TIME: &str = "response_time";

pub(crate) fn defaults() -> RunOptions {
    let m = |n: u64| Duration::from_secs(n * 60);
    let mut thresholds = http_thresholds();
    thresholds.push(threshold(ERRORS, "rate<0.1"));

    RunOptions {
        stages: Some(vec![
            Stage::new(m(2), 10),
            Stage::new(m(5), 10),
            Stage::new(m(2), 20),
            Stage::new(m(5), 20),
            Stage::new(m(2), 0),
        ]),
        thresholds,
        pacing: Some(Pacing::Fixed(Duration::from_secs(1))),
        ..Default::default()
    }
}

/// Logs in once during setup, then every iteration lists, creates, updates
/// and health-checks under the `API Load Testing` group.
#[derive(Debug, Default)]
pub(crate) struct LoadTest;

impl Scenario for LoadTest {
    /// Bearer token.
    type Data = String;

    fn metrics(&self) -> Vec<MetricDecl> {
        vec![MetricDecl::rate(ERRORS), MetricDecl::trend(RESPONSE_TIME)]
    }

    async fn setup(&self, ctx: &Vu<String>) -> Result<Option<String>, ScenarioError> {
        let target = Target::from_env(ctx);
        match login(ctx, &target).await? {
            (_, Some(token)) => Ok(Some(token)),
            (reply, None) => Err(ScenarioError::msg(format!(
                "login failed ({})",
                reply.describe()
            ))),
        }
    }

    async fn iteration(&self, vu: &Vu<String>) -> Result<(), ScenarioError> {
        let target = Target::from_env(vu);
        let token = vu.data().cloned().unwrap_or_default();

        vu.group("API Load Testing", |vu| async move {
            get_tasks(&vu, &target, &token).await?;
            create_task(&vu, &target, &token).await?;
            health_check(&vu, &target).await
        })
        .await
    }

    async fn teardown(&self, _ctx: &Vu<String>) -> Result<(), ScenarioError> {
        tracing::info!("load test completed");
        Ok(())
    }
}

fn record(vu: &Vu<String>, reply: &Reply, success: bool) -> Result<(), ScenarioError> {
    vu.collector().add_rate(ERRORS, !success)?;
    if let Some(d) = reply.duration() {
        vu.collector()
            .add_trend(RESPONSE_TIME, d.as_secs_f64() * 1000.0)?;
    }
    Ok(())
}

async fn get_tasks(vu: &Vu<String>, target: &Target, token: &str) -> Result<(), ScenarioError> {
    vu.group("Get Tasks", |vu| async move {
        let reply = send(&vu, HttpRequest::get(target.url("/tasks")).bearer(token)).await;
        let status = vu.check("get tasks status is 200", reply.status_is(200));
        let fast = vu.check(
            "get tasks response time < 500ms",
            reply.faster_than(Duration::from_millis(500)),
        );
        record(&vu, &reply, status && fast)
    })
    .await
}

async fn create_task(vu: &Vu<String>, target: &Target, token: &str) -> Result<(), ScenarioError> {
    vu.group("Create Task", |vu| async move {
        let req = HttpRequest::post(target.url("/tasks"))
            .bearer(token)
            .json(&task_payload(format!("Load test task {}", unix_millis())))?;
        let reply = send(&vu, req).await;
        let status = vu.check("create task status is 201", reply.status_is(201));
        let fast = vu.check(
            "create task response time < 1000ms",
            reply.faster_than(Duration::from_millis(1000)),
        );
        let success = status && fast;
        record(&vu, &reply, success)?;

        let Some(id) = reply.str_field("id").filter(|_| success) else {
            return Ok(());
        };
        vu.group("Update Task", |vu| async move {
            let req = HttpRequest::put(target.url(&format!("/tasks/{id}")))
                .bearer(token)
                .json(&task_payload(format!(
                    "Updated load test task {}",
                    unix_millis()
                )))?;
            let reply = send(&vu, req).await;
            let status = vu.check("update task status is 200", reply.status_is(200));
            let fast = vu.check(
                "update task response time < 1000ms",
                reply.faster_than(Duration::from_millis(1000)),
            );
            record(&vu, &reply, status && fast)
        })
        .await
    })
    .await
}

async fn health_check(vu: &Vu<String>, target: &Target) -> Result<(), ScenarioError> {
    vu.group("Health Check", |vu| async move {
        let reply = send(&vu, HttpRequest::get(target.url("/health/ready"))).await;
        let status = vu.check("health check status is 200", reply.status_is(200));
        let fast = vu.check(
            "health check response time < 200ms",
            reply.faster_than(Duration::from_millis(200)),
        );
        record(&vu, &reply, status && fast)
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use stampede_core::{PhaseOutcome, RunConfig, RunReport, SetupFailurePolicy, run};
    use stampede_testserver::TestServer;

    fn config(base_url: &str, password: &str) -> RunConfig {
        let mut cfg = RunConfig::fixed(2, Duration::from_secs(2));
        cfg.thresholds = defaults().thresholds;
        cfg.pacing = Pacing::Fixed(Duration::from_millis(100));
        cfg.env.insert("BASE_URL".into(), base_url.to_string());
        cfg.env.insert("PASSWORD".into(), password.to_string());
        cfg
    }

    fn fails(report: &RunReport, group: &str, name: &str) -> u64 {
        report
            .checks
            .iter()
            .find(|c| c.group == group && c.name == name)
            .map(|c| c.fails)
            .unwrap_or_else(|| panic!("check {group}::{name} missing"))
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn load_iterations_walk_every_group_against_the_api() {
        let server = TestServer::start()
            .await
            .unwrap_or_else(|e| panic!("start server: {e}"));

        let report = run(LoadTest, config(server.base_url(), "password123"), None)
            .await
            .unwrap_or_else(|e| panic!("run failed: {e}"));

        assert_eq!(report.setup, PhaseOutcome::Completed);
        assert!(report.passed, "{:?}", report.thresholds);
        assert!(report.total_iterations > 0);
        assert_eq!(server.stats().tasks_created(), report.total_iterations);

        assert_eq!(fails(&report, "", "login successful"), 0);
        assert_eq!(
            fails(&report, "API Load Testing::Get Tasks", "get tasks status is 200"),
            0
        );
        assert_eq!(
            fails(
                &report,
                "API Load Testing::Create Task::Update Task",
                "update task status is 200"
            ),
            0
        );
        assert_eq!(
            fails(
                &report,
                "API Load Testing::Health Check",
                "health check status is 200"
            ),
            0
        );

        server.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn rejected_login_fails_setup_and_the_error_rate() {
        let server = TestServer::start()
            .await
            .unwrap_or_else(|e| panic!("start server: {e}"));

        let report = run(LoadTest, config(server.base_url(), "wrong"), None)
            .await
            .unwrap_or_else(|e| panic!("run failed: {e}"));

        assert_eq!(
            report.setup,
            PhaseOutcome::Failed("login failed (status 401)".to_string())
        );
        assert!(!report.passed);
        assert!(report.failed_thresholds().any(|t| t.metric == ERRORS));
        assert_eq!(server.stats().tasks_created(), 0);

        let mut cfg = config(server.base_url(), "wrong");
        cfg.on_setup_error = SetupFailurePolicy::Abort;
        let err = run(LoadTest, cfg, None)
            .await
            .err()
            .unwrap_or_else(|| panic!("expected setup to abort"));
        assert!(matches!(err, stampede_core::Error::SetupFailed(_)));

        server.shutdown().await;
    }
}
