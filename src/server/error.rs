//! Errors returned by HTTP handlers.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use std::path::PathBuf;
use thiserror::Error;

use crate::watcher::WatchError;

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("basePath must be absolute: {0}")]
    RelativeBase(PathBuf),

    #[error("Path escapes base directory: {0}")]
    OutsideBase(String),

    #[error("Path not found: {0}")]
    NotFound(PathBuf),

    #[error(transparent)]
    Watch(#[from] WatchError),
}

impl ServerError {
    pub fn status(&self) -> StatusCode {
        match self {
            ServerError::RelativeBase(_) => StatusCode::BAD_REQUEST,
            ServerError::OutsideBase(_) => StatusCode::FORBIDDEN,
            ServerError::NotFound(_) => StatusCode::NOT_FOUND,
            ServerError::Watch(WatchError::RegistryClosed) => StatusCode::SERVICE_UNAVAILABLE,
            ServerError::Watch(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("[http] {self}");
        } else {
            crate::debug_event!("http", "rejected", "{self}");
        }
        let body = Json(serde_json::json!({
            "success": false,
            "error": self.to_string(),
        }));
        (status, body).into_response()
    }
}
