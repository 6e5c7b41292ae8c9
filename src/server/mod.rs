//! HTTP server exposing push channels as server-sent events.
//!
//! Routes:
//! - `GET /api/watch?path=&basePath=&recursive=` directory watch
//! - `GET /api/watch/file?filePath=&basePath=` single-file watch
//! - `GET /api/watch/status` open sessions
//! - `GET /health`

mod error;
mod routes;

pub use error::ServerError;
pub use routes::{AppState, resolve_target, router};

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::Settings;
use crate::watcher::{ChannelOptions, NotifySource, WatchRegistry};

/// Run the watch server until Ctrl+C.
pub async fn serve(config: Settings, bind: String) -> anyhow::Result<()> {
    crate::logging::init_with_config(&config.logging);

    let registry = WatchRegistry::new(Arc::new(NotifySource::new(config.watch.ignore.clone())));
    let state = AppState {
        registry: registry.clone(),
        options: ChannelOptions::from_config(&config.server),
        default_recursive: config.watch.recursive,
    };

    let ct = CancellationToken::new();
    let signal_ct = ct.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("[http] failed to listen for ctrl+c: {e}");
            return;
        }
        crate::log_event!("http", "shutdown signal");
        signal_ct.cancel();
    });

    let listener = tokio::net::TcpListener::bind(&bind).await?;
    crate::log_event!("http", "listening", "http://{bind}");
    eprintln!("Watch server listening on http://{bind}");
    eprintln!("Directory watch: http://{bind}/api/watch?basePath=<abs>&path=<rel>");
    eprintln!("Health check: http://{bind}/health");
    eprintln!("Press Ctrl+C to stop the server");

    let shutdown_registry = registry.clone();
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            ct.cancelled().await;
            // Ends every SSE stream so graceful shutdown can complete
            shutdown_registry.shutdown();
        })
        .await?;

    eprintln!("Watch server shut down gracefully");
    Ok(())
}
