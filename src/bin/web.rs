//! taskbot HTTP 服务
//!
//! 启动: cargo run --bin taskbot-web --features web
//! 监听地址由 TASKBOT_WEB_ADDR 指定，默认 127.0.0.1:8080

#![cfg(feature = "web")]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use taskbot::config::load_config;
use taskbot::core::{RuntimeBuilder, ShutdownManager};
use taskbot::web::{create_router, WebState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    taskbot::observability::init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = load_config(config_path).context("Failed to load config")?;

    let runtime = RuntimeBuilder::new(config)
        .build()
        .await
        .context("Failed to start runtime")?;

    let state = Arc::new(WebState {
        hub: Arc::clone(&runtime.hub),
        dedup: Arc::clone(&runtime.dedup),
    });
    let app = create_router(state);

    let addr = std::env::var("TASKBOT_WEB_ADDR").unwrap_or_else(|_| "127.0.0.1:8080".to_string());
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!("taskbot-web listening on http://{}", addr);

    let shutdown = ShutdownManager::new();
    shutdown.install_signal_handlers();
    let token = shutdown.token();

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { token.cancelled().await })
        .await
        .context("Server error")?;

    tracing::info!("Shutting down ({:?})", shutdown.reason());
    runtime.shutdown();
    Ok(())
}
