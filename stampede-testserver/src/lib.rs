//! In-process task-management API used as a load target in tests.

use std::net::SocketAddr;

use axum::Router;
use axum::routing::{get, post, put};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::time::Duration;

mod api;

pub use api::{AppState, Role, Task, TestServerStats, User};

pub const PATH_LOGIN: &str = "/login";
pub const PATH_TASKS: &str = "/tasks";
pub const PATH_TASK: &str = "/tasks/{id}";
pub const PATH_HEALTH: &str = "/health";
pub const PATH_HEALTH_READY: &str = "/health/ready";
pub const PATH_HEALTH_LIVE: &str = "/health/live";

pub const DEFAULT_USERNAME: &str = "john_tech";
pub const DEFAULT_PASSWORD: &str = "password123";

#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Added to every response.
    pub latency: Duration,
    pub users: Vec<User>,
    pub issue_tokens: bool,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            latency: Duration::ZERO,
            users: default_users(),
            issue_tokens: true,
        }
    }
}

pub fn default_users() -> Vec<User> {
    vec![
        User {
            id: 1,
            username: DEFAULT_USERNAME.to_string(),
            password: DEFAULT_PASSWORD.to_string(),
            role: Role::Technician,
        },
        User {
            id: 2,
            username: "jane_manager".to_string(),
            password: DEFAULT_PASSWORD.to_string(),
            role: Role::Manager,
        },
    ]
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route(PATH_LOGIN, post(api::login))
        .route(PATH_TASKS, get(api::list_tasks).post(api::create_task))
        .route(PATH_TASK, put(api::update_task).delete(api::delete_task))
        .route(PATH_HEALTH, get(api::health))
        .route(PATH_HEALTH_READY, get(api::health))
        .route(PATH_HEALTH_LIVE, get(api::health))
        .with_state(state)
}

pub struct TestServer {
    addr: SocketAddr,
    base_url: String,
    stats: TestServerStats,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl TestServer {
    pub async fn start() -> std::io::Result<Self> {
        Self::start_with(ServerOptions::default()).await
    }

    pub async fn start_with(opts: ServerOptions) -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let stats = TestServerStats::default();
        let state = AppState::new(opts.users, opts.latency, stats.clone())
            .issue_tokens(opts.issue_tokens);
        let app = router(state);

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let serve = axum::serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            });
            let _ = serve.await;
        });

        Ok(Self {
            addr,
            base_url: format!("http://{addr}"),
            stats,
            shutdown_tx: Some(shutdown_tx),
            task: Some(task),
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn stats(&self) -> &TestServerStats {
        &self.stats
    }

    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if self.shutdown_tx.is_some()
            && let Some(task) = self.task.take()
        {
            task.abort();
        }
    }
}
