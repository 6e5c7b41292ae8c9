//! Route handlers.

use std::path::{Component, Path, PathBuf};

use axum::Router;
use axum::extract::{Query, State};
use axum::response::Sse;
use axum::response::sse::Event;
use axum::routing::get;
use futures::{Stream, StreamExt};
use serde::Deserialize;
use tower_http::cors::CorsLayer;

use super::error::ServerError;
use crate::watcher::{ChannelOptions, ChannelRequest, PushChannel, WatchRegistry};

#[derive(Clone)]
pub struct AppState {
    pub registry: WatchRegistry,
    pub options: ChannelOptions,
    pub default_recursive: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DirectoryWatchQuery {
    #[serde(default)]
    path: String,
    base_path: PathBuf,
    recursive: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileWatchQuery {
    file_path: String,
    base_path: PathBuf,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/watch", get(watch_directory))
        .route("/api/watch/file", get(watch_file))
        .route("/api/watch/status", get(status))
        .route("/health", get(health_check))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health_check() -> &'static str {
    "OK"
}

async fn status(State(state): State<AppState>) -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "success": true,
        "sessions": state.registry.session_count(),
    }))
}

type SseStream = Sse<std::pin::Pin<Box<dyn Stream<Item = Result<Event, axum::Error>> + Send>>>;

fn into_sse(stream: crate::watcher::ChannelStream) -> SseStream {
    Sse::new(stream.map(|event| Event::default().json_data(event)).boxed())
}

async fn watch_directory(
    State(state): State<AppState>,
    Query(query): Query<DirectoryWatchQuery>,
) -> Result<SseStream, ServerError> {
    let target = resolve_target(&query.base_path, &query.path)?;
    if !target.is_dir() {
        return Err(ServerError::NotFound(target));
    }

    let recursive = query.recursive.unwrap_or(state.default_recursive);
    crate::log_event!(
        "http",
        "watch",
        "{} (recursive: {recursive})",
        target.display()
    );

    let stream = PushChannel::open(
        &state.registry,
        ChannelRequest::directory(target, recursive),
        state.options,
    )
    .await?;
    Ok(into_sse(stream))
}

async fn watch_file(
    State(state): State<AppState>,
    Query(query): Query<FileWatchQuery>,
) -> Result<SseStream, ServerError> {
    let target = resolve_target(&query.base_path, &query.file_path)?;
    if !target.is_file() {
        return Err(ServerError::NotFound(target));
    }

    crate::log_event!("http", "watch file", "{}", target.display());

    let stream =
        PushChannel::open(&state.registry, ChannelRequest::file(target), state.options).await?;
    Ok(into_sse(stream))
}

/// Join `relative` onto `base` without leaving `base`.
pub fn resolve_target(base: &Path, relative: &str) -> Result<PathBuf, ServerError> {
    if !base.is_absolute() {
        return Err(ServerError::RelativeBase(base.to_path_buf()));
    }

    let mut resolved = base.to_path_buf();
    let mut depth = 0usize;
    for component in Path::new(relative).components() {
        match component {
            Component::Normal(part) => {
                resolved.push(part);
                depth += 1;
            }
            Component::ParentDir => {
                if depth == 0 {
                    return Err(ServerError::OutsideBase(relative.to_string()));
                }
                resolved.pop();
                depth -= 1;
            }
            Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
        }
    }
    Ok(resolved)
}
