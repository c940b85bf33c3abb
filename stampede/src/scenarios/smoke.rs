use std::time::Duration;

use stampede_core::{HttpRequest, Pacing, RunOptions, Scenario, ScenarioError, Vu};

use super::{Target, http_thresholds, login, send, task_payload};

pub(crate) fn defaults() -> RunOptions {
    RunOptions {
        vus: Some(1),
        duration: Some(Duration::from_secs(30)),
        thresholds: http_thresholds(),
        pacing: Some(Pacing::Fixed(Duration::from_secs(1))),
        ..Default::default()
    }
}

/// Health check, then login and the task endpoints with a fresh token every
/// iteration.
#[derive(Debug, Default)]
pub(crate) struct SmokeTest;

impl Scenario for SmokeTest {
    type Data = ();

    async fn iteration(&self, vu: &Vu<()>) -> Result<(), ScenarioError> {
        let target = &Target::from_env(vu);

        vu.group("Health Check", |vu| async move {
            let reply = send(&vu, HttpRequest::get(target.url("/health/ready"))).await;
            vu.check("health check status is 200", reply.status_is(200));
            vu.check(
                "health check response time < 200ms",
                reply.faster_than(Duration::from_millis(200)),
            );
            Ok(())
        })
        .await?;

        vu.group("Authentication", |vu| async move {
            let (reply, token) = login(&vu, target).await?;
            if !reply.status_is(200) {
                return Ok(());
            }
            let token = token.unwrap_or_default();
            let token = token.as_str();

            vu.group("Get Tasks", |vu| async move {
                let req = HttpRequest::get(target.url("/tasks")).bearer(token);
                let reply = send(&vu, req).await;
                vu.check("get tasks status is 200", reply.status_is(200));
                vu.check(
                    "tasks response is array",
                    reply.json().is_some_and(|v| v.is_array()),
                );
                Ok(())
            })
            .await?;

            vu.group("Create Task", |vu| async move {
                let req = HttpRequest::post(target.url("/tasks"))
                    .bearer(token)
                    .json(&task_payload("Smoke test task"))?;
                let reply = send(&vu, req).await;
                vu.check("create task status is 201", reply.status_is(201));
                vu.check("task has id", reply.field("id").is_some());
                Ok(())
            })
            .await
        })
        .await
    }
}
