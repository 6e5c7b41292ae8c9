//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use treesync::client::{ClientError, EventStream, WatchRequest, WatchTransport};
use treesync::watcher::{EventType, WatchEvent};

type Sender = mpsc::UnboundedSender<Result<WatchEvent, ClientError>>;

/// Counts open streams; decremented when the stream is dropped.
struct ActiveGuard(Arc<AtomicUsize>);

impl ActiveGuard {
    fn touch(&self) {}
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Transport whose streams are fed by the test.
#[derive(Default)]
pub struct MockTransport {
    connects: AtomicUsize,
    active: Arc<AtomicUsize>,
    senders: Mutex<HashMap<WatchRequest, Vec<Sender>>>,
    refuse: Mutex<Option<String>>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Total `connect` calls so far.
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Streams handed out and not yet dropped.
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Make the next connects fail.
    pub fn refuse(&self, reason: &str) {
        *self.refuse.lock() = Some(reason.to_string());
    }

    /// Push `event` to every open stream for `request`. Returns how many
    /// streams took it.
    pub fn emit(&self, request: &WatchRequest, event: WatchEvent) -> usize {
        let mut senders = self.senders.lock();
        let Some(list) = senders.get_mut(request) else {
            return 0;
        };
        list.retain(|tx| !tx.is_closed());
        list.iter()
            .filter(|tx| tx.send(Ok(event.clone())).is_ok())
            .count()
    }

    /// Break every stream for `request` with a stream error.
    pub fn fail(&self, request: &WatchRequest, message: &str) {
        if let Some(list) = self.senders.lock().get_mut(request) {
            for tx in list.drain(..) {
                let _ = tx.send(Err(ClientError::Stream(message.to_string())));
            }
        }
    }
}

#[async_trait]
impl WatchTransport for MockTransport {
    async fn connect(&self, request: &WatchRequest) -> Result<EventStream, ClientError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if let Some(reason) = self.refuse.lock().clone() {
            return Err(ClientError::Connect {
                url: "mock://".to_string(),
                reason,
            });
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(Ok(WatchEvent::connected(&request.watched_path())));
        self.senders
            .lock()
            .entry(request.clone())
            .or_default()
            .push(tx);

        self.active.fetch_add(1, Ordering::SeqCst);
        let guard = ActiveGuard(self.active.clone());
        let stream = UnboundedReceiverStream::new(rx).map(move |item| {
            guard.touch();
            item
        });
        Ok(stream.boxed())
    }
}

pub fn wire(kind: EventType, path: &str, root: &str) -> WatchEvent {
    WatchEvent::change(kind, Path::new(path), Path::new(root), None)
}

/// Poll `condition` until it holds or two seconds pass.
pub async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

/// Collects whatever a callback receives.
pub struct Recorder<E> {
    seen: Arc<Mutex<Vec<E>>>,
}

impl<E: Clone + Send + 'static> Recorder<E> {
    pub fn new() -> Self {
        Self {
            seen: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn callback(&self) -> impl Fn(&E) + Send + Sync + 'static {
        let seen = self.seen.clone();
        move |event: &E| seen.lock().push(event.clone())
    }

    pub fn events(&self) -> Vec<E> {
        self.seen.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.seen.lock().len()
    }
}
