//! Watch registry: one raw source per identity, fanned out to channels.
//!
//! The subscriber set of a [`WatchSession`] is its only reference count.
//! The session is created by the first subscribe for an identity and torn
//! down (source closed) when its last channel unsubscribes.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Weak};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use super::channel::{ChannelId, CloseReason, PushChannel, PushError};
use super::error::WatchError;
use super::event::WatchEvent;
use super::source::{RawEvent, SourceHandle, WatchIdentity, WatchSource};

/// Shared, owned registry of live watch sessions.
#[derive(Clone)]
pub struct WatchRegistry {
    inner: Arc<RegistryInner>,
}

pub(crate) struct RegistryInner {
    source: Arc<dyn WatchSource>,
    sessions: Mutex<HashMap<WatchIdentity, Arc<WatchSession>>>,
    next_channel_id: AtomicU64,
    shut_down: AtomicBool,
}

impl WatchRegistry {
    pub fn new(source: Arc<dyn WatchSource>) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                source,
                sessions: Mutex::new(HashMap::new()),
                next_channel_id: AtomicU64::new(1),
                shut_down: AtomicBool::new(false),
            }),
        }
    }

    pub(crate) fn from_inner(inner: Arc<RegistryInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn downgrade(&self) -> Weak<RegistryInner> {
        Arc::downgrade(&self.inner)
    }

    pub(crate) fn next_channel_id(&self) -> ChannelId {
        self.inner.next_channel_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Attach `channel` to the session for `identity`, opening the raw
    /// source if this is the first subscriber.
    ///
    /// The source is opened on the blocking pool with the session map
    /// unlocked. Subscribers that arrive meanwhile join the pending session
    /// and start receiving once it is open.
    pub async fn subscribe(
        &self,
        identity: &WatchIdentity,
        channel: Arc<PushChannel>,
    ) -> Result<Arc<WatchSession>, WatchError> {
        if self.inner.shut_down.load(Ordering::Acquire) {
            return Err(WatchError::RegistryClosed);
        }

        let session = {
            let mut sessions = self.inner.sessions.lock();
            if let Some(session) = sessions.get(identity) {
                session.attach(channel);
                crate::debug_event!(
                    "registry",
                    "attached",
                    "{identity} ({} subscribers)",
                    session.subscriber_count()
                );
                return Ok(session.clone());
            }
            let session = Arc::new(WatchSession::new(identity.clone()));
            session.attach(channel);
            sessions.insert(identity.clone(), session.clone());
            session
        };

        // Runs to completion even if the caller goes away
        let (ready_tx, ready_rx) = oneshot::channel();
        tokio::spawn(open_session(
            self.inner.source.clone(),
            self.downgrade(),
            session.clone(),
            ready_tx,
        ));

        match ready_rx.await {
            Ok(Ok(())) => Ok(session),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(WatchError::InitFailed {
                reason: format!("opening {identity} was interrupted"),
            }),
        }
    }

    /// Detach a channel. Closes the session when it was the last one.
    ///
    /// Unknown identities and channels are ignored.
    pub fn unsubscribe(&self, identity: &WatchIdentity, channel_id: ChannelId) {
        let mut sessions = self.inner.sessions.lock();
        let Some(session) = sessions.get(identity) else {
            return;
        };
        if !session.detach(channel_id) {
            return;
        }
        if session.subscriber_count() == 0 {
            if let Some(session) = sessions.remove(identity) {
                session.teardown();
                crate::log_event!("registry", "closed", "{identity}");
            }
        }
    }

    /// Close every channel and session. New subscriptions are refused.
    pub fn shutdown(&self) {
        self.inner.shut_down.store(true, Ordering::Release);
        let sessions: Vec<Arc<WatchSession>> =
            self.inner.sessions.lock().values().cloned().collect();
        for session in &sessions {
            session.close_all(CloseReason::Shutdown);
        }
        crate::log_event!("registry", "shut down", "{} sessions", sessions.len());
    }

    pub fn session_count(&self) -> usize {
        self.inner.sessions.lock().len()
    }

    pub fn subscriber_count(&self, identity: &WatchIdentity) -> usize {
        self.inner
            .sessions
            .lock()
            .get(identity)
            .map_or(0, |s| s.subscriber_count())
    }
}

/// One raw source and the channels listening to it.
pub struct WatchSession {
    identity: WatchIdentity,
    channels: RwLock<Vec<Arc<PushChannel>>>,
    handle: Mutex<Option<Box<dyn SourceHandle>>>,
    cancel: CancellationToken,
}

impl WatchSession {
    fn new(identity: WatchIdentity) -> Self {
        Self {
            identity,
            channels: RwLock::new(Vec::new()),
            handle: Mutex::new(None),
            cancel: CancellationToken::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.identity.path
    }

    pub fn subscriber_count(&self) -> usize {
        self.channels.read().len()
    }

    fn attach(&self, channel: Arc<PushChannel>) {
        self.channels.write().push(channel);
    }

    fn detach(&self, channel_id: ChannelId) -> bool {
        let mut channels = self.channels.write();
        let before = channels.len();
        channels.retain(|c| c.id() != channel_id);
        channels.len() != before
    }

    /// Hand over the opened source. Gives it back if the session was torn
    /// down while it was opening.
    fn install(&self, handle: Box<dyn SourceHandle>) -> Result<(), Box<dyn SourceHandle>> {
        let mut slot = self.handle.lock();
        if self.cancel.is_cancelled() {
            return Err(handle);
        }
        *slot = Some(handle);
        Ok(())
    }

    fn teardown(&self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.lock().take() {
            handle.close();
        }
    }

    fn snapshot(&self) -> Vec<Arc<PushChannel>> {
        self.channels.read().clone()
    }

    fn close_all(&self, reason: CloseReason) {
        for channel in self.snapshot() {
            channel.close(reason);
        }
    }

    fn to_wire(&self, raw: RawEvent) -> WatchEvent {
        match raw {
            RawEvent::Changed { kind, path, stats } => {
                WatchEvent::change(kind.event_type(), &path, self.root(), stats)
            }
            RawEvent::Error { message } => WatchEvent::error(message),
        }
    }

    /// Push one event to every channel. Dead channels are closed after the
    /// delivery pass so they never hold up the others.
    fn broadcast(&self, event: &WatchEvent) {
        let channels = self.snapshot();
        let mut dead = Vec::new();

        for channel in &channels {
            let Some(adapted) = channel.scope().adapt(event, self.root()) else {
                continue;
            };
            match channel.push(adapted) {
                Ok(()) => {}
                Err(PushError::Full) => {
                    tracing::warn!(
                        "[session] channel {} is full, dropped {} event",
                        channel.id(),
                        event.kind
                    );
                }
                Err(PushError::Closed) => dead.push(channel.clone()),
            }
        }

        crate::debug_event!(
            "session",
            "fan-out",
            "{} {} to {} channels",
            event.kind,
            event.relative_path.as_deref().unwrap_or(""),
            channels.len() - dead.len()
        );

        for channel in dead {
            channel.close(CloseReason::SinkClosed);
        }
    }
}

fn is_root_removal(event: &WatchEvent, root: &Path) -> bool {
    event.kind.is_removal() && event.path_is(root)
}

/// Open the source for a pending session, then run its fan-out.
async fn open_session(
    source: Arc<dyn WatchSource>,
    registry: Weak<RegistryInner>,
    session: Arc<WatchSession>,
    ready: oneshot::Sender<Result<(), WatchError>>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    let identity = session.identity.clone();
    let opened = tokio::task::spawn_blocking(move || source.open(&identity, tx))
        .await
        .unwrap_or_else(|e| {
            Err(WatchError::InitFailed {
                reason: e.to_string(),
            })
        });

    let handle = match opened {
        Ok(handle) => handle,
        Err(e) => {
            tracing::warn!("[registry] cannot open {}: {e}", session.identity);
            if let Some(inner) = registry.upgrade() {
                let mut sessions = inner.sessions.lock();
                if sessions
                    .get(&session.identity)
                    .is_some_and(|current| Arc::ptr_eq(current, &session))
                {
                    sessions.remove(&session.identity);
                }
            }
            session.cancel.cancel();
            // Subscribers that joined while opening learn why they are closed
            session.broadcast(&WatchEvent::error(e.to_string()));
            session.close_all(CloseReason::SourceFailed);
            let _ = ready.send(Err(e));
            return;
        }
    };

    if let Err(handle) = session.install(handle) {
        handle.close();
        crate::debug_event!("registry", "open abandoned", "{}", session.identity);
        let _ = ready.send(Err(WatchError::RegistryClosed));
        return;
    }

    crate::log_event!("registry", "opened", "{}", session.identity);
    let _ = ready.send(Ok(()));
    run_fanout(session, rx).await;
}

/// Delivers raw events of one session in source order.
async fn run_fanout(session: Arc<WatchSession>, mut rx: mpsc::UnboundedReceiver<RawEvent>) {
    loop {
        let raw = tokio::select! {
            _ = session.cancel.cancelled() => break,
            raw = rx.recv() => match raw {
                Some(raw) => raw,
                None => break,
            },
        };

        if let RawEvent::Error { message } = &raw {
            tracing::warn!("[session] {} source error: {message}", session.identity);
        }

        let event = session.to_wire(raw);
        let root_removed = is_root_removal(&event, &session.identity.path);
        session.broadcast(&event);

        if root_removed {
            crate::log_event!("session", "root removed", "{}", session.identity);
            session.close_all(CloseReason::RootRemoved);
            break;
        }
    }
    crate::debug_event!("session", "fan-out stopped", "{}", session.identity);
}
