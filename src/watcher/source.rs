//! Raw watch sources.
//!
//! A [`WatchSource`] opens one OS-level watch per [`WatchIdentity`] and
//! reports coarse add/change/unlink events through a channel. The
//! [`NotifySource`] implementation translates `notify` events into that
//! vocabulary.

use std::collections::HashSet;
use std::ffi::OsStr;
use std::fmt;
use std::path::{Path, PathBuf};

use notify::event::{CreateKind, ModifyKind, RemoveKind, RenameMode};
use notify::{Event, EventKind, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use super::error::WatchError;
use super::event::{EventType, FileStats};

/// Dedup key of the registry: one live source per identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WatchIdentity {
    pub path: PathBuf,
    pub recursive: bool,
}

impl WatchIdentity {
    pub fn new(path: impl Into<PathBuf>, recursive: bool) -> Self {
        Self {
            path: path.into(),
            recursive,
        }
    }
}

impl fmt::Display for WatchIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mode = if self.recursive { "recursive" } else { "shallow" };
        write!(f, "{} ({mode})", self.path.display())
    }
}

/// Filesystem change kinds a source can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Add,
    AddDir,
    Change,
    Unlink,
    UnlinkDir,
}

impl ChangeKind {
    pub fn event_type(self) -> EventType {
        match self {
            ChangeKind::Add => EventType::Add,
            ChangeKind::AddDir => EventType::AddDir,
            ChangeKind::Change => EventType::Change,
            ChangeKind::Unlink => EventType::Unlink,
            ChangeKind::UnlinkDir => EventType::UnlinkDir,
        }
    }
}

/// What a source pushes into its sink.
#[derive(Debug, Clone, PartialEq)]
pub enum RawEvent {
    Changed {
        kind: ChangeKind,
        path: PathBuf,
        stats: Option<FileStats>,
    },
    /// The source hit a fault; it may still recover.
    Error { message: String },
}

pub type RawSender = mpsc::UnboundedSender<RawEvent>;

/// An open OS watch. Closing releases the underlying handle.
pub trait SourceHandle: Send {
    fn close(self: Box<Self>);
}

/// Something that can open watches.
pub trait WatchSource: Send + Sync {
    fn open(
        &self,
        identity: &WatchIdentity,
        sink: RawSender,
    ) -> Result<Box<dyn SourceHandle>, WatchError>;
}

/// Watch source backed by `notify::RecommendedWatcher`.
#[derive(Debug, Clone, Default)]
pub struct NotifySource {
    ignore: Vec<String>,
}

impl NotifySource {
    pub fn new(ignore: Vec<String>) -> Self {
        Self { ignore }
    }
}

struct NotifyHandle {
    watcher: notify::RecommendedWatcher,
    root: PathBuf,
}

impl SourceHandle for NotifyHandle {
    fn close(mut self: Box<Self>) {
        if let Err(e) = self.watcher.unwatch(&self.root) {
            // Root already gone, the watch died with it
            crate::debug_event!("source", "unwatch", "{}: {e}", self.root.display());
        }
        crate::debug_event!("source", "closed", "{}", self.root.display());
    }
}

impl WatchSource for NotifySource {
    fn open(
        &self,
        identity: &WatchIdentity,
        sink: RawSender,
    ) -> Result<Box<dyn SourceHandle>, WatchError> {
        let root = identity.path.clone();
        let mut translator = EventTranslator::new(&root, identity.recursive, self.ignore.clone());

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let raw_events = match res {
                Ok(event) => translator.translate(event),
                Err(e) => vec![RawEvent::Error {
                    message: e.to_string(),
                }],
            };
            for raw in raw_events {
                // Receiver gone means the session is tearing down
                if sink.send(raw).is_err() {
                    break;
                }
            }
        })?;

        let mode = if identity.recursive {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        };
        watcher
            .watch(&root, mode)
            .map_err(|e| WatchError::PathWatchFailed {
                path: root.clone(),
                reason: e.to_string(),
            })?;

        crate::debug_event!("source", "opened", "{identity}");
        Ok(Box::new(NotifyHandle { watcher, root }))
    }
}

const MAX_SPLIT_RENAMES: usize = 1024;

fn is_ignored(ignore: &[String], name: &OsStr) -> bool {
    ignore.iter().any(|i| name == i.as_str())
}

/// Turns `notify` events into raw add/change/unlink events.
///
/// `notify` does not always say whether a removed path was a directory, so
/// directories seen under the root are remembered.
pub(crate) struct EventTranslator {
    root: PathBuf,
    recursive: bool,
    ignore: Vec<String>,
    known_dirs: HashSet<PathBuf>,
    /// Trackers of renames already reported as separate From/To halves
    split_renames: HashSet<usize>,
}

impl EventTranslator {
    pub(crate) fn new(root: &Path, recursive: bool, ignore: Vec<String>) -> Self {
        let mut known_dirs = HashSet::new();
        if root.is_dir() {
            let depth = if recursive { usize::MAX } else { 1 };
            for entry in walkdir::WalkDir::new(root)
                .max_depth(depth)
                .into_iter()
                .filter_entry(|e| e.depth() == 0 || !is_ignored(&ignore, e.file_name()))
                .filter_map(Result::ok)
                .filter(|e| e.file_type().is_dir())
            {
                known_dirs.insert(entry.into_path());
            }
        }

        Self {
            root: root.to_path_buf(),
            recursive,
            ignore,
            known_dirs,
            split_renames: HashSet::new(),
        }
    }

    pub(crate) fn translate(&mut self, event: Event) -> Vec<RawEvent> {
        let mut out = Vec::new();

        match event.kind {
            EventKind::Create(kind) => {
                for path in &event.paths {
                    self.creation(path, kind == CreateKind::Folder, &mut out);
                }
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)) if event.paths.len() == 2 => {
                // inotify follows From and To with a Both for the same cookie
                let reported = event
                    .tracker()
                    .is_some_and(|t| self.split_renames.remove(&t));
                if !reported {
                    self.removal(&event.paths[0], None, &mut out);
                    self.creation(&event.paths[1], false, &mut out);
                }
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
                if let Some(tracker) = event.tracker() {
                    if self.split_renames.len() >= MAX_SPLIT_RENAMES {
                        self.split_renames.clear();
                    }
                    self.split_renames.insert(tracker);
                }
                for path in &event.paths {
                    self.removal(path, None, &mut out);
                }
            }
            EventKind::Modify(ModifyKind::Name(_)) => {
                for path in &event.paths {
                    if path.exists() {
                        self.creation(path, false, &mut out);
                    } else {
                        self.removal(path, None, &mut out);
                    }
                }
            }
            EventKind::Modify(_) => {
                for path in &event.paths {
                    self.modification(path, &mut out);
                }
            }
            EventKind::Remove(kind) => {
                let is_dir = match kind {
                    RemoveKind::File => Some(false),
                    RemoveKind::Folder => Some(true),
                    _ => None,
                };
                for path in &event.paths {
                    self.removal(path, is_dir, &mut out);
                }
            }
            EventKind::Access(_) | EventKind::Any | EventKind::Other => {}
        }

        out
    }

    fn in_scope(&self, path: &Path) -> bool {
        let Ok(rel) = path.strip_prefix(&self.root) else {
            return false;
        };
        if rel
            .components()
            .any(|c| is_ignored(&self.ignore, c.as_os_str()))
        {
            return false;
        }
        self.recursive || rel.components().count() <= 1
    }

    fn creation(&mut self, path: &Path, hinted_dir: bool, out: &mut Vec<RawEvent>) {
        if !self.in_scope(path) {
            return;
        }
        // Gone again before we could stat it; the removal event follows
        let Some(stats) = FileStats::stat(path) else {
            return;
        };
        let kind = if stats.is_directory || (hinted_dir && !stats.is_file) {
            self.known_dirs.insert(path.to_path_buf());
            ChangeKind::AddDir
        } else {
            ChangeKind::Add
        };
        out.push(RawEvent::Changed {
            kind,
            path: path.to_path_buf(),
            stats: Some(stats),
        });
    }

    fn modification(&mut self, path: &Path, out: &mut Vec<RawEvent>) {
        if !self.in_scope(path) {
            return;
        }
        match FileStats::stat(path) {
            // Directory metadata churn is not reported
            Some(stats) if stats.is_directory => {}
            Some(stats) => out.push(RawEvent::Changed {
                kind: ChangeKind::Change,
                path: path.to_path_buf(),
                stats: Some(stats),
            }),
            None => self.removal(path, None, out),
        }
    }

    fn removal(&mut self, path: &Path, is_dir: Option<bool>, out: &mut Vec<RawEvent>) {
        if path != self.root && !self.in_scope(path) {
            return;
        }
        let was_known_dir = self.known_dirs.remove(path);
        if was_known_dir {
            self.known_dirs.retain(|d| !d.starts_with(path));
        }
        let kind = if is_dir.unwrap_or(was_known_dir) {
            ChangeKind::UnlinkDir
        } else {
            ChangeKind::Unlink
        };
        out.push(RawEvent::Changed {
            kind,
            path: path.to_path_buf(),
            stats: None,
        });
    }
}
