//! Transports that consume a server push channel.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use sse_stream::SseStream;

use super::error::ClientError;
use crate::watcher::WatchEvent;

/// Identity of a client-side subscription. Equal requests share one
/// transport connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum WatchRequest {
    Directory {
        base_path: PathBuf,
        path: String,
        recursive: bool,
    },
    File {
        base_path: PathBuf,
        file_path: String,
    },
}

impl WatchRequest {
    pub fn directory(base_path: impl Into<PathBuf>, path: impl Into<String>, recursive: bool) -> Self {
        WatchRequest::Directory {
            base_path: base_path.into(),
            path: path.into(),
            recursive,
        }
    }

    pub fn file(base_path: impl Into<PathBuf>, file_path: impl Into<String>) -> Self {
        WatchRequest::File {
            base_path: base_path.into(),
            file_path: file_path.into(),
        }
    }

    pub fn base_path(&self) -> &Path {
        match self {
            WatchRequest::Directory { base_path, .. } | WatchRequest::File { base_path, .. } => {
                base_path
            }
        }
    }

    /// Absolute path the server will report as watched.
    pub fn watched_path(&self) -> PathBuf {
        let relative = match self {
            WatchRequest::Directory { path, .. } => path,
            WatchRequest::File { file_path, .. } => file_path,
        };
        let relative = relative.trim_start_matches('/');
        if relative.is_empty() {
            self.base_path().to_path_buf()
        } else {
            self.base_path().join(relative)
        }
    }

    fn endpoint(&self) -> &'static str {
        match self {
            WatchRequest::Directory { .. } => "/api/watch",
            WatchRequest::File { .. } => "/api/watch/file",
        }
    }

    fn query(&self) -> Vec<(&'static str, String)> {
        match self {
            WatchRequest::Directory {
                base_path,
                path,
                recursive,
            } => vec![
                ("path", path.clone()),
                ("basePath", base_path.display().to_string()),
                ("recursive", recursive.to_string()),
            ],
            WatchRequest::File {
                base_path,
                file_path,
            } => vec![
                ("filePath", file_path.clone()),
                ("basePath", base_path.display().to_string()),
            ],
        }
    }
}

pub type EventStream = BoxStream<'static, Result<WatchEvent, ClientError>>;

/// Opens one push-channel consumption per call.
#[async_trait]
pub trait WatchTransport: Send + Sync {
    async fn connect(&self, request: &WatchRequest) -> Result<EventStream, ClientError>;
}

/// Server-sent events over HTTP.
#[derive(Debug, Clone)]
pub struct SseTransport {
    client: reqwest::Client,
    base_url: String,
}

impl SseTransport {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl WatchTransport for SseTransport {
    async fn connect(&self, request: &WatchRequest) -> Result<EventStream, ClientError> {
        let url = format!("{}{}", self.base_url, request.endpoint());

        let response = self
            .client
            .get(&url)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .query(&request.query())
            .send()
            .await
            .map_err(|e| ClientError::Connect {
                url: url.clone(),
                reason: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(ClientError::Status {
                status: response.status().as_u16(),
                url,
            });
        }

        crate::debug_event!("transport", "connected", "{url}");

        let events = SseStream::from_byte_stream(response.bytes_stream())
            .map_err(|e| ClientError::Stream(e.to_string()))
            .try_filter_map(|sse| {
                // Comment lines carry no data
                let decoded = match sse.data {
                    Some(data) => serde_json::from_str::<WatchEvent>(&data)
                        .map(Some)
                        .map_err(ClientError::from),
                    None => Ok(None),
                };
                futures::future::ready(decoded)
            });

        Ok(events.boxed())
    }
}
