use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::Json;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio::time::{Duration, sleep};

const MAX_SUMMARY_LEN: usize = 2500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Technician,
    Manager,
}

#[derive(Debug, Clone)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub password: String,
    pub role: Role,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub technician_id: i64,
    pub summary: String,
    pub performed_at: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct LoginRequest {
    username: String,
    password: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct TaskRequest {
    #[serde(default)]
    summary: String,
    #[serde(default)]
    performed_at: String,
}

#[derive(Debug, Clone, Default)]
pub struct TestServerStats {
    requests_total: Arc<AtomicU64>,
    logins: Arc<AtomicU64>,
    tasks_created: Arc<AtomicU64>,
}

impl TestServerStats {
    pub fn requests_total(&self) -> u64 {
        self.requests_total.load(Ordering::Relaxed)
    }

    pub fn logins(&self) -> u64 {
        self.logins.load(Ordering::Relaxed)
    }

    pub fn tasks_created(&self) -> u64 {
        self.tasks_created.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Default)]
struct Store {
    tokens: BTreeMap<String, i64>,
    tasks: BTreeMap<String, Task>,
    next_id: u64,
}

#[derive(Debug, Clone)]
pub struct AppState {
    users: Arc<Vec<User>>,
    store: Arc<RwLock<Store>>,
    stats: TestServerStats,
    latency: Duration,
    issue_tokens: bool,
}

impl AppState {
    pub fn new(users: Vec<User>, latency: Duration, stats: TestServerStats) -> Self {
        Self {
            users: Arc::new(users),
            store: Arc::default(),
            stats,
            latency,
            issue_tokens: true,
        }
    }

    /// With `false`, successful logins answer 200 with an empty body object.
    pub fn issue_tokens(mut self, issue: bool) -> Self {
        self.issue_tokens = issue;
        self
    }

    async fn enter(&self) {
        self.stats.requests_total.fetch_add(1, Ordering::Relaxed);
        if !self.latency.is_zero() {
            sleep(self.latency).await;
        }
    }

    async fn authenticate(&self, headers: &HeaderMap) -> Result<&User, Response> {
        let token = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .ok_or_else(|| error(StatusCode::UNAUTHORIZED, "missing bearer token"))?;

        let user_id = self.store.read().await.tokens.get(token).copied();
        user_id
            .and_then(|id| self.users.iter().find(|u| u.id == id))
            .ok_or_else(|| error(StatusCode::UNAUTHORIZED, "invalid token"))
    }
}

fn error(status: StatusCode, msg: &str) -> Response {
    (status, Json(serde_json::json!({ "error": msg }))).into_response()
}

fn validate(req: &TaskRequest) -> Result<(), Response> {
    if req.summary.is_empty() {
        return Err(error(StatusCode::BAD_REQUEST, "summary is required"));
    }
    if req.summary.chars().count() > MAX_SUMMARY_LEN {
        return Err(error(
            StatusCode::BAD_REQUEST,
            "summary must not exceed 2500 characters",
        ));
    }
    if req.performed_at.is_empty() {
        return Err(error(StatusCode::BAD_REQUEST, "performed_at is required"));
    }
    Ok(())
}

pub(crate) async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Response {
    state.enter().await;

    let Some(user) = state
        .users
        .iter()
        .find(|u| u.username == req.username && u.password == req.password)
    else {
        return error(StatusCode::UNAUTHORIZED, "invalid credentials");
    };

    state.stats.logins.fetch_add(1, Ordering::Relaxed);
    if !state.issue_tokens {
        return Json(serde_json::json!({})).into_response();
    }

    let mut store = state.store.write().await;
    store.next_id += 1;
    let token = format!("token-{}-{}", user.id, store.next_id);
    store.tokens.insert(token.clone(), user.id);

    Json(serde_json::json!({ "token": token })).into_response()
}

pub(crate) async fn list_tasks(State(state): State<AppState>, headers: HeaderMap) -> Response {
    state.enter().await;
    let user = match state.authenticate(&headers).await {
        Ok(u) => u,
        Err(res) => return res,
    };

    let store = state.store.read().await;
    let tasks: Vec<&Task> = store
        .tasks
        .values()
        .filter(|t| user.role == Role::Manager || t.technician_id == user.id)
        .collect();
    Json(tasks).into_response()
}

pub(crate) async fn create_task(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<TaskRequest>,
) -> Response {
    state.enter().await;
    let user = match state.authenticate(&headers).await {
        Ok(u) => u,
        Err(res) => return res,
    };
    if user.role != Role::Technician {
        return error(StatusCode::FORBIDDEN, "only technicians can create tasks");
    }
    if let Err(res) = validate(&req) {
        return res;
    }

    let mut store = state.store.write().await;
    store.next_id += 1;
    let task = Task {
        id: format!("task-{}", store.next_id),
        technician_id: user.id,
        summary: req.summary,
        performed_at: req.performed_at,
    };
    store.tasks.insert(task.id.clone(), task.clone());
    state.stats.tasks_created.fetch_add(1, Ordering::Relaxed);

    (StatusCode::CREATED, Json(task)).into_response()
}

pub(crate) async fn update_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<TaskRequest>,
) -> Response {
    state.enter().await;
    let user = match state.authenticate(&headers).await {
        Ok(u) => u,
        Err(res) => return res,
    };
    if let Err(res) = validate(&req) {
        return res;
    }

    let mut store = state.store.write().await;
    let Some(task) = store.tasks.get_mut(&id) else {
        return error(StatusCode::NOT_FOUND, "task not found");
    };
    if task.technician_id != user.id {
        return error(StatusCode::FORBIDDEN, "task belongs to another technician");
    }
    task.summary = req.summary;
    task.performed_at = req.performed_at;

    Json(task.clone()).into_response()
}

pub(crate) async fn delete_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    state.enter().await;
    let user = match state.authenticate(&headers).await {
        Ok(u) => u,
        Err(res) => return res,
    };
    if user.role != Role::Manager {
        return error(StatusCode::FORBIDDEN, "only managers can delete tasks");
    }

    match state.store.write().await.tasks.remove(&id) {
        Some(_) => StatusCode::NO_CONTENT.into_response(),
        None => error(StatusCode::NOT_FOUND, "task not found"),
    }
}

pub(crate) async fn health(State(state): State<AppState>) -> Response {
    state.enter().await;
    Json(serde_json::json!({ "status": "ok" })).into_response()
}
