use std::time::Duration;

use serde::Deserialize;
use stampede_http::{ClientOptions, Error, HttpClient, HttpRequest};
use stampede_testserver::{DEFAULT_PASSWORD, DEFAULT_USERNAME, ServerOptions, TestServer};

#[derive(Debug, Deserialize)]
struct Token {
    token: String,
}

#[derive(Debug, Deserialize)]
struct Task {
    id: String,
    summary: String,
}

async fn login(client: &HttpClient, base: &str) -> String {
    let req = HttpRequest::post(format!("{base}/login"))
        .json(&serde_json::json!({
            "username": DEFAULT_USERNAME,
            "password": DEFAULT_PASSWORD,
        }))
        .unwrap_or_else(|e| panic!("{e}"));
    let res = client
        .request(req)
        .await
        .unwrap_or_else(|e| panic!("login failed: {e}"));
    assert_eq!(res.status, 200);
    res.json::<Token>()
        .unwrap_or_else(|e| panic!("bad login body: {e}"))
        .token
}

#[tokio::test]
async fn login_create_update_and_list_tasks() {
    let server = TestServer::start()
        .await
        .unwrap_or_else(|e| panic!("start server: {e}"));
    let base = server.base_url().to_string();
    let client = HttpClient::default();

    let token = login(&client, &base).await;

    let create = HttpRequest::post(format!("{base}/tasks"))
        .bearer(&token)
        .json(&serde_json::json!({
            "summary": "replaced filter",
            "performed_at": "2024-01-01T00:00:00Z",
        }))
        .unwrap_or_else(|e| panic!("{e}"));
    let res = client
        .request(create)
        .await
        .unwrap_or_else(|e| panic!("{e}"));
    assert_eq!(res.status, 201);
    assert!(res.bytes_sent > 0);
    assert!(res.bytes_received >= res.body.len() as u64);
    let task: Task = res.json().unwrap_or_else(|e| panic!("{e}"));

    let update = HttpRequest::put(format!("{base}/tasks/{}", task.id))
        .bearer(&token)
        .json(&serde_json::json!({
            "summary": "replaced filter twice",
            "performed_at": "2024-01-02T00:00:00Z",
        }))
        .unwrap_or_else(|e| panic!("{e}"));
    let res = client
        .request(update)
        .await
        .unwrap_or_else(|e| panic!("{e}"));
    assert_eq!(res.status, 200);

    let res = client
        .request(HttpRequest::get(format!("{base}/tasks")).bearer(&token))
        .await
        .unwrap_or_else(|e| panic!("{e}"));
    assert_eq!(res.status, 200);
    assert_eq!(res.header("content-type"), Some("application/json"));
    let tasks: Vec<Task> = res.json().unwrap_or_else(|e| panic!("{e}"));
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].summary, "replaced filter twice");

    assert_eq!(server.stats().tasks_created(), 1);
    server.shutdown().await;
}

#[tokio::test]
async fn non_2xx_statuses_are_responses_not_errors() {
    let server = TestServer::start()
        .await
        .unwrap_or_else(|e| panic!("start server: {e}"));
    let client = HttpClient::default();

    let res = client
        .get(&format!("{}/tasks", server.base_url()))
        .await
        .unwrap_or_else(|e| panic!("{e}"));
    assert_eq!(res.status, 401);
    assert!(!res.is_success());

    server.shutdown().await;
}

#[tokio::test]
async fn slow_responses_hit_the_request_timeout() {
    let server = TestServer::start_with(ServerOptions {
        latency: Duration::from_millis(500),
        ..ServerOptions::default()
    })
    .await
    .unwrap_or_else(|e| panic!("start server: {e}"));

    let client = HttpClient::new(ClientOptions {
        request_timeout: Some(Duration::from_millis(50)),
        ..ClientOptions::default()
    });

    match client
        .get(&format!("{}/health/ready", server.base_url()))
        .await
    {
        Err(Error::Timeout(t)) => assert_eq!(t, Duration::from_millis(50)),
        other => panic!("expected timeout, got {other:?}"),
    }

    // A per-request timeout wins over the client default.
    let res = client
        .request(
            HttpRequest::get(format!("{}/health/ready", server.base_url()))
                .timeout(Duration::from_secs(5)),
        )
        .await
        .unwrap_or_else(|e| panic!("{e}"));
    assert_eq!(res.status, 200);

    server.shutdown().await;
}
