use std::time::Duration;

use anyhow::Context;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use zkr_backend::{app_router, AppState};
use zkr_operator::{Operator, OperatorConfig};

const TASK_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "zkr_operator=info,zkr_backend=info".into());
    if std::env::var("ZKR_LOG_JSON").is_ok_and(|value| value == "1") {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let config = OperatorConfig::from_env()?;
    let listen_addr = config.listen_addr;
    let mut operator = Operator::build(config).await?;

    let handles = operator.spawn();
    let stop = operator.shutdown_trigger();

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);
    let app = app_router(AppState::from_operator(&operator)).layer(cors);

    let listener = TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("Failed to bind {listen_addr}"))?;
    info!(%listen_addr, "zkr operator listening");

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async move {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(%err, "failed to install ctrl-c handler");
            }
            info!("shutdown requested");
            stop.send_replace(true);
        })
        .await
        .context("HTTP server failed")?;

    operator.shutdown();
    for handle in handles {
        let abort = handle.abort_handle();
        if tokio::time::timeout(TASK_DRAIN_TIMEOUT, handle).await.is_err() {
            abort.abort();
        }
    }

    operator.close().await?;
    info!("zkr operator stopped");
    Ok(())
}
