//! Client-side subscription sharing.
//!
//! Every distinct [`WatchRequest`] owns at most one transport connection;
//! any number of callbacks hang off it. The connection is opened when the
//! first callback attaches and cancelled when the last one leaves.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry as MapEntry;
use futures::StreamExt;
use parking_lot::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use super::correlate::{Emitter, FileEvent, MoveCorrelator};
use super::error::ClientError;
use super::transport::{SseTransport, WatchRequest, WatchTransport};
use crate::config::Settings;
use crate::watcher::WatchEvent;

pub type Callback<E> = Arc<dyn Fn(&E) + Send + Sync>;

const DEFAULT_MOVE_WINDOW: Duration = Duration::from_millis(500);

struct Entry<E> {
    callbacks: RwLock<Vec<(u64, Callback<E>)>>,
    cancel: CancellationToken,
    /// Set once the connection has ended on its own
    finished: AtomicBool,
}

impl<E> Entry<E> {
    fn new() -> Self {
        Self {
            callbacks: RwLock::new(Vec::new()),
            cancel: CancellationToken::new(),
            finished: AtomicBool::new(false),
        }
    }

    fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    fn dispatch(&self, event: &E) {
        // Callbacks may subscribe or unsubscribe from inside
        let snapshot: Vec<Callback<E>> = self
            .callbacks
            .read()
            .iter()
            .map(|(_, callback)| Arc::clone(callback))
            .collect();
        for callback in snapshot {
            callback(event);
        }
    }

    fn is_empty(&self) -> bool {
        self.callbacks.read().is_empty()
    }
}

struct MuxInner {
    transport: Arc<dyn WatchTransport>,
    directories: DashMap<WatchRequest, Arc<Entry<WatchEvent>>>,
    files: DashMap<WatchRequest, Arc<Entry<FileEvent>>>,
    next_id: AtomicU64,
    move_window: Duration,
}

/// Shares one push-channel connection among all callbacks that asked for
/// the same watch.
///
/// Must be used from within a tokio runtime; connections run on spawned
/// tasks.
#[derive(Clone)]
pub struct SubscriptionMultiplexer {
    inner: Arc<MuxInner>,
}

impl SubscriptionMultiplexer {
    pub fn new(transport: Arc<dyn WatchTransport>) -> Self {
        Self::with_move_window(transport, DEFAULT_MOVE_WINDOW)
    }

    pub fn with_move_window(transport: Arc<dyn WatchTransport>, move_window: Duration) -> Self {
        Self {
            inner: Arc::new(MuxInner {
                transport,
                directories: DashMap::new(),
                files: DashMap::new(),
                next_id: AtomicU64::new(1),
                move_window,
            }),
        }
    }

    /// SSE transport against `client.server_url`.
    pub fn from_config(config: &Settings) -> Self {
        Self::with_move_window(
            Arc::new(SseTransport::new(config.client.server_url.clone())),
            config.watch.move_window(),
        )
    }

    /// Receive every change under `base_path/path`. Heartbeats are not
    /// delivered; transport failures arrive as `error` events.
    pub fn watch_directory(
        &self,
        base_path: impl Into<PathBuf>,
        path: impl Into<String>,
        recursive: bool,
        callback: impl Fn(&WatchEvent) + Send + Sync + 'static,
    ) -> Subscription {
        let request = WatchRequest::directory(base_path, path, recursive);
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);

        let (entry, created) = attach(&self.inner.directories, &request, id, Arc::new(callback));
        if created {
            crate::debug_event!("mux", "open", "{request:?}");
            self.spawn_directory_pump(request.clone(), Arc::clone(&entry));
        }

        let inner = Arc::clone(&self.inner);
        Subscription::new(move || detach(&inner.directories, &request, &entry, id))
    }

    /// Receive logical events for one file, with unlink/add pairs folded
    /// into moves.
    pub fn watch_file(
        &self,
        base_path: impl Into<PathBuf>,
        file_path: impl Into<String>,
        callback: impl Fn(&FileEvent) + Send + Sync + 'static,
    ) -> Subscription {
        let request = WatchRequest::file(base_path, file_path);
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);

        let (entry, created) = attach(&self.inner.files, &request, id, Arc::new(callback));
        if created {
            crate::debug_event!("mux", "open", "{request:?}");
            self.spawn_file_pump(request.clone(), Arc::clone(&entry));
        }

        let inner = Arc::clone(&self.inner);
        Subscription::new(move || detach(&inner.files, &request, &entry, id))
    }

    /// Number of live transport connections.
    pub fn connection_count(&self) -> usize {
        self.inner.directories.len() + self.inner.files.len()
    }

    /// Callbacks attached to `request`.
    pub fn subscriber_count(&self, request: &WatchRequest) -> usize {
        let directories = self
            .inner
            .directories
            .get(request)
            .map(|entry| entry.callbacks.read().len());
        let files = self
            .inner
            .files
            .get(request)
            .map(|entry| entry.callbacks.read().len());
        directories.or(files).unwrap_or(0)
    }

    /// Cancel every connection. Outstanding [`Subscription`]s become no-ops.
    pub fn shutdown(&self) {
        for entry in self.inner.directories.iter() {
            entry.cancel.cancel();
        }
        for entry in self.inner.files.iter() {
            entry.cancel.cancel();
        }
        self.inner.directories.clear();
        self.inner.files.clear();
    }

    fn spawn_directory_pump(&self, request: WatchRequest, entry: Arc<Entry<WatchEvent>>) {
        let inner = Arc::clone(&self.inner);
        let cancel = entry.cancel.clone();

        tokio::spawn(async move {
            let sink = |item: Result<WatchEvent, ClientError>| match item {
                Ok(event) if event.is_heartbeat() => {}
                Ok(event) => entry.dispatch(&event),
                Err(e) => entry.dispatch(&WatchEvent::error(e.to_string())),
            };
            if let Some(e) = pump(Arc::clone(&inner.transport), &request, cancel, &sink).await {
                retire(&inner.directories, &request, &entry);
                sink(Err(e));
            }
        });
    }

    fn spawn_file_pump(&self, request: WatchRequest, entry: Arc<Entry<FileEvent>>) {
        let inner = Arc::clone(&self.inner);
        let cancel = entry.cancel.clone();

        let emit: Emitter = {
            let entry = Arc::downgrade(&entry);
            Arc::new(move |event: FileEvent| {
                if let Some(entry) = entry.upgrade() {
                    entry.dispatch(&event);
                }
            })
        };
        let correlator = MoveCorrelator::new(
            request.watched_path(),
            inner.move_window,
            emit,
            cancel.clone(),
        );

        tokio::spawn(async move {
            let sink = |item: Result<WatchEvent, ClientError>| match item {
                Ok(event) => correlator.handle(&event),
                Err(e) => correlator.handle(&WatchEvent::error(e.to_string())),
            };
            match pump(Arc::clone(&inner.transport), &request, cancel, &sink).await {
                Some(e) => {
                    retire(&inner.files, &request, &entry);
                    sink(Err(e));
                }
                None => correlator.shutdown(),
            }
        });
    }
}

impl fmt::Debug for SubscriptionMultiplexer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionMultiplexer")
            .field("directories", &self.inner.directories.len())
            .field("files", &self.inner.files.len())
            .field("move_window", &self.inner.move_window)
            .finish()
    }
}

/// Add a callback under the map's shard lock so it cannot race the last
/// detach of the same request. An entry whose connection already ended is
/// replaced. Returns the entry and whether it is new.
fn attach<E>(
    map: &DashMap<WatchRequest, Arc<Entry<E>>>,
    request: &WatchRequest,
    id: u64,
    callback: Callback<E>,
) -> (Arc<Entry<E>>, bool) {
    match map.entry(request.clone()) {
        MapEntry::Occupied(occupied) if !occupied.get().is_finished() => {
            let entry = Arc::clone(occupied.get());
            entry.callbacks.write().push((id, callback));
            (entry, false)
        }
        MapEntry::Occupied(mut occupied) => {
            let entry = Arc::new(Entry::new());
            entry.callbacks.write().push((id, callback));
            occupied.insert(Arc::clone(&entry));
            (entry, true)
        }
        MapEntry::Vacant(vacant) => {
            let entry = Arc::new(Entry::new());
            entry.callbacks.write().push((id, callback));
            vacant.insert(Arc::clone(&entry));
            (entry, true)
        }
    }
}

fn detach<E>(
    map: &DashMap<WatchRequest, Arc<Entry<E>>>,
    request: &WatchRequest,
    entry: &Arc<Entry<E>>,
    id: u64,
) {
    entry.callbacks.write().retain(|(callback_id, _)| *callback_id != id);

    let removed = map.remove_if(request, |_, current| {
        Arc::ptr_eq(current, entry) && current.is_empty()
    });
    if removed.is_some() {
        crate::debug_event!("mux", "close", "{request:?}");
        entry.cancel.cancel();
    }
}

/// Forget a connection that ended on its own so the next subscriber
/// reconnects. Current subscribers get the final error and nothing after.
fn retire<E>(map: &DashMap<WatchRequest, Arc<Entry<E>>>, request: &WatchRequest, entry: &Arc<Entry<E>>) {
    entry.finished.store(true, Ordering::Release);
    map.remove_if(request, |_, current| Arc::ptr_eq(current, entry));
}

/// Drive one connection into `sink` until cancelled or the connection
/// ends. Returns the failure that ended it, `None` when cancelled.
async fn pump(
    transport: Arc<dyn WatchTransport>,
    request: &WatchRequest,
    cancel: CancellationToken,
    sink: &impl Fn(Result<WatchEvent, ClientError>),
) -> Option<ClientError> {
    let connected = tokio::select! {
        _ = cancel.cancelled() => return None,
        result = transport.connect(request) => result,
    };

    let mut events = match connected {
        Ok(events) => events,
        Err(e) => {
            tracing::warn!("[mux] connect failed: {e}");
            return Some(e);
        }
    };

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return None,
            item = events.next() => match item {
                Some(Err(ClientError::Decode(e))) => {
                    tracing::warn!("[mux] skipping malformed event: {e}");
                }
                Some(Err(e)) => {
                    tracing::warn!("[mux] stream failed: {e}");
                    return Some(e);
                }
                Some(Ok(event)) => sink(Ok(event)),
                None => {
                    crate::debug_event!("mux", "stream ended", "{request:?}");
                    return Some(ClientError::Stream("event stream ended".to_string()));
                }
            }
        }
    }
}

/// Handle returned by the `watch_*` methods. Dropping it unsubscribes.
pub struct Subscription {
    release: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl Subscription {
    fn new(release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            release: Mutex::new(Some(Box::new(release))),
        }
    }

    /// Detach the callback. Calling this more than once has no effect.
    pub fn unsubscribe(&self) {
        let release = self.release.lock().take();
        if let Some(release) = release {
            release();
        }
    }

    pub fn is_active(&self) -> bool {
        self.release.lock().is_some()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop() -> Callback<WatchEvent> {
        Arc::new(|_: &WatchEvent| {})
    }

    #[test]
    fn test_attach_shares_live_entry() {
        let map = DashMap::new();
        let request = WatchRequest::directory("/proj", "", true);

        let (first, created) = attach(&map, &request, 1, noop());
        assert!(created);
        let (second, created) = attach(&map, &request, 2, noop());
        assert!(!created);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.callbacks.read().len(), 2);
    }

    #[test]
    fn test_attach_replaces_finished_entry() {
        let map = DashMap::new();
        let request = WatchRequest::directory("/proj", "", true);

        let (old, _) = attach(&map, &request, 1, noop());
        // Stream ended, entry not yet retired
        old.finished.store(true, Ordering::Release);

        let (fresh, created) = attach(&map, &request, 2, noop());
        assert!(created);
        assert!(!Arc::ptr_eq(&old, &fresh));
        assert_eq!(old.callbacks.read().len(), 1);

        // Retiring the old entry leaves the replacement in place
        retire(&map, &request, &old);
        assert!(map.get(&request).is_some_and(|e| Arc::ptr_eq(e.value(), &fresh)));

        // Neither does a late detach from the old entry
        detach(&map, &request, &old, 1);
        assert_eq!(map.len(), 1);
        assert!(!fresh.cancel.is_cancelled());
    }
}
