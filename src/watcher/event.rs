//! Wire protocol for push channels.
//!
//! One [`WatchEvent`] is serialized per message:
//!
//! ```json
//! { "type": "add", "path": "/proj/src/main.rs", "relativePath": "src/main.rs",
//!   "stats": { "isFile": true, "isDirectory": false, "size": 120 },
//!   "timestamp": 1760000000000 }
//! ```

use std::fs::Metadata;
use std::path::{Component, Path};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Event types carried on the wire.
///
/// File channels only ever see `connected`, `change`, `unlink`, `add`,
/// `error` and `heartbeat`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EventType {
    Connected,
    Add,
    AddDir,
    Change,
    Unlink,
    UnlinkDir,
    Error,
    Heartbeat,
}

impl EventType {
    /// Add, change and removal events. These are the ones that touch the tree.
    pub fn is_mutation(self) -> bool {
        matches!(
            self,
            EventType::Add
                | EventType::AddDir
                | EventType::Change
                | EventType::Unlink
                | EventType::UnlinkDir
        )
    }

    pub fn is_removal(self) -> bool {
        matches!(self, EventType::Unlink | EventType::UnlinkDir)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EventType::Connected => "connected",
            EventType::Add => "add",
            EventType::AddDir => "addDir",
            EventType::Change => "change",
            EventType::Unlink => "unlink",
            EventType::UnlinkDir => "unlinkDir",
            EventType::Error => "error",
            EventType::Heartbeat => "heartbeat",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

/// Stat summary attached to add/change events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileStats {
    pub is_file: bool,
    pub is_directory: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified: Option<DateTime<Utc>>,
}

impl FileStats {
    pub fn from_metadata(metadata: &Metadata) -> Self {
        Self {
            is_file: metadata.is_file(),
            is_directory: metadata.is_dir(),
            size: metadata.is_file().then(|| metadata.len()),
            modified: metadata.modified().ok().map(DateTime::<Utc>::from),
        }
    }

    /// Stat a path, `None` when it no longer exists.
    pub fn stat(path: &Path) -> Option<Self> {
        std::fs::metadata(path).ok().map(|m| Self::from_metadata(&m))
    }

    pub fn directory() -> Self {
        Self {
            is_file: false,
            is_directory: true,
            size: None,
            modified: None,
        }
    }
}

/// A single push-channel message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchEvent {
    #[serde(rename = "type")]
    pub kind: EventType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relative_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<FileStats>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
}

impl WatchEvent {
    fn bare(kind: EventType) -> Self {
        Self {
            kind,
            path: None,
            relative_path: None,
            stats: None,
            error: None,
            timestamp: Utc::now().timestamp_millis(),
        }
    }

    pub fn connected(watched: &Path) -> Self {
        Self {
            path: Some(watched.display().to_string()),
            ..Self::bare(EventType::Connected)
        }
    }

    pub fn heartbeat() -> Self {
        Self::bare(EventType::Heartbeat)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Self::bare(EventType::Error)
        }
    }

    /// A filesystem change, with `relativePath` computed against `root`.
    pub fn change(kind: EventType, path: &Path, root: &Path, stats: Option<FileStats>) -> Self {
        Self {
            path: Some(path.display().to_string()),
            relative_path: Some(relative_key(path, root)),
            stats,
            ..Self::bare(kind)
        }
    }

    pub fn is_heartbeat(&self) -> bool {
        self.kind == EventType::Heartbeat
    }

    pub fn path_is(&self, other: &Path) -> bool {
        self.path.as_deref().map(Path::new) == Some(other)
    }
}

/// `/`-separated path of `path` below `root`; empty for the root itself.
///
/// Paths outside `root` fall back to their full display form.
pub fn relative_key(path: &Path, root: &Path) -> String {
    match path.strip_prefix(root) {
        Ok(rel) => rel
            .components()
            .filter_map(|c| match c {
                Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("/"),
        Err(_) => path.display().to_string(),
    }
}
