use std::net::SocketAddr;

use stampede_testserver::{AppState, ServerOptions, TestServerStats};
use tokio::net::TcpListener;
use tokio::time::Duration;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let mut bind_addr: SocketAddr = "127.0.0.1:8080".parse()?;
    let mut opts = ServerOptions::default();

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--bind" => {
                let addr = args.next().ok_or_else(|| {
                    anyhow::anyhow!("--bind requires an address, e.g. 127.0.0.1:8080")
                })?;
                bind_addr = addr.parse()?;
            }
            "--latency-ms" => {
                let ms = args
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("--latency-ms requires a number"))?;
                opts.latency = Duration::from_millis(ms.parse()?);
            }
            "-h" | "--help" => {
                eprintln!(
                    "stampede-testserver\n\nUSAGE:\n  stampede-testserver [--bind 127.0.0.1:8080] [--latency-ms N]\n\nOUTPUT:\n  Prints BASE_URL=<url> to stdout once ready."
                );
                return Ok(());
            }
            other => {
                return Err(anyhow::anyhow!("unknown argument: {other}"));
            }
        }
    }

    let listener = TcpListener::bind(bind_addr).await?;
    let addr = listener.local_addr()?;

    let state = AppState::new(opts.users, opts.latency, TestServerStats::default());
    let app = stampede_testserver::router(state);

    println!("BASE_URL=http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    Ok(())
}
