//! Push channels: one per client subscription.
//!
//! A channel emits `connected` on open, a `heartbeat` every interval, and
//! whatever its [`WatchSession`](super::WatchSession) fans out to it. It
//! leaves the session exactly once, whichever way it ends: client abort
//! (the [`ChannelStream`] is dropped), heartbeat failure, a dead sink found
//! during fan-out, root removal, or server shutdown.

use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use std::time::Duration;

use futures::Stream;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;

use super::error::WatchError;
use super::event::{EventType, WatchEvent};
use super::registry::{RegistryInner, WatchRegistry};
use super::source::WatchIdentity;
use crate::config::ServerConfig;

pub type ChannelId = u64;

/// Which events of a session a channel wants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelScope {
    /// Everything the session reports.
    Directory,
    /// A single file, watched through a shallow watch of its parent.
    /// Adds of siblings are kept so the client can spot renames.
    File { target: PathBuf },
}

impl ChannelScope {
    /// Narrow a session event to this scope, `None` to skip it.
    pub fn adapt(&self, event: &WatchEvent, root: &Path) -> Option<WatchEvent> {
        let ChannelScope::File { target } = self else {
            return Some(event.clone());
        };

        match event.kind {
            EventType::Connected | EventType::Heartbeat | EventType::Error | EventType::Add => {
                Some(event.clone())
            }
            EventType::Change | EventType::Unlink => {
                event.path_is(target).then(|| event.clone())
            }
            EventType::AddDir => None,
            // Parent directory gone, so is the file
            EventType::UnlinkDir => event
                .path_is(root)
                .then(|| WatchEvent::change(EventType::Unlink, target, root, None)),
        }
    }
}

/// What a client asked to watch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelRequest {
    pub identity: WatchIdentity,
    pub scope: ChannelScope,
    /// Absolute path reported in the `connected` event
    pub watched: PathBuf,
}

impl ChannelRequest {
    pub fn directory(path: impl Into<PathBuf>, recursive: bool) -> Self {
        let path = path.into();
        Self {
            identity: WatchIdentity::new(path.clone(), recursive),
            scope: ChannelScope::Directory,
            watched: path,
        }
    }

    pub fn file(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let parent = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("/"));
        Self {
            identity: WatchIdentity::new(parent, false),
            scope: ChannelScope::File {
                target: path.clone(),
            },
            watched: path,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ChannelOptions {
    pub heartbeat_interval: Duration,
    pub capacity: usize,
}

impl ChannelOptions {
    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            heartbeat_interval: config.heartbeat_interval(),
            capacity: config.channel_capacity,
        }
    }
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self::from_config(&ServerConfig::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    ClientAborted,
    HeartbeatFailed,
    SinkClosed,
    RootRemoved,
    SourceFailed,
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushError {
    /// Buffer full, event dropped for this channel only
    Full,
    /// Receiver gone or channel already closed
    Closed,
}

pub struct PushChannel {
    id: ChannelId,
    request: ChannelRequest,
    sender: Mutex<Option<mpsc::Sender<WatchEvent>>>,
    heartbeat: Mutex<Option<JoinHandle<()>>>,
    registry: Weak<RegistryInner>,
    closed: AtomicBool,
    close_reason: Mutex<Option<CloseReason>>,
}

impl PushChannel {
    /// Open a channel, subscribe it to the registry and start its heartbeat.
    pub async fn open(
        registry: &WatchRegistry,
        request: ChannelRequest,
        options: ChannelOptions,
    ) -> Result<ChannelStream, WatchError> {
        let (tx, rx) = mpsc::channel(options.capacity.max(2));
        let channel = Arc::new(PushChannel {
            id: registry.next_channel_id(),
            request,
            sender: Mutex::new(Some(tx)),
            heartbeat: Mutex::new(None),
            registry: registry.downgrade(),
            closed: AtomicBool::new(false),
            close_reason: Mutex::new(None),
        });

        // Fresh buffer, cannot fail
        let _ = channel.push(WatchEvent::connected(&channel.request.watched));

        // Leaves the session if this future is dropped while subscribing
        let guard = OpenGuard(Some(channel.clone()));
        if let Err(e) = registry
            .subscribe(&channel.request.identity, channel.clone())
            .await
        {
            guard.disarm();
            channel.close(match e {
                WatchError::RegistryClosed => CloseReason::Shutdown,
                _ => CloseReason::SourceFailed,
            });
            return Err(e);
        }
        guard.disarm();

        let heartbeat = spawn_heartbeat(Arc::downgrade(&channel), options.heartbeat_interval);
        *channel.heartbeat.lock() = Some(heartbeat);

        crate::debug_event!(
            "channel",
            "opened",
            "#{} {}",
            channel.id,
            channel.request.watched.display()
        );
        Ok(ChannelStream {
            channel,
            receiver: Some(rx),
            armed: true,
        })
    }

    pub fn id(&self) -> ChannelId {
        self.id
    }

    pub fn scope(&self) -> &ChannelScope {
        &self.request.scope
    }

    pub fn request(&self) -> &ChannelRequest {
        &self.request
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn close_reason(&self) -> Option<CloseReason> {
        *self.close_reason.lock()
    }

    /// Queue an event without waiting.
    pub fn push(&self, event: WatchEvent) -> Result<(), PushError> {
        let sender = self.sender.lock();
        let Some(tx) = sender.as_ref() else {
            return Err(PushError::Closed);
        };
        tx.try_send(event).map_err(|e| match e {
            TrySendError::Full(_) => PushError::Full,
            TrySendError::Closed(_) => PushError::Closed,
        })
    }

    /// Stop the heartbeat, drop the sink and leave the session. Only the
    /// first call has any effect.
    pub fn close(&self, reason: CloseReason) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        *self.close_reason.lock() = Some(reason);

        if let Some(heartbeat) = self.heartbeat.lock().take() {
            heartbeat.abort();
        }
        self.sender.lock().take();

        if let Some(inner) = self.registry.upgrade() {
            WatchRegistry::from_inner(inner).unsubscribe(&self.request.identity, self.id);
        }

        crate::debug_event!("channel", "closed", "#{} {reason:?}", self.id);
    }
}

struct OpenGuard(Option<Arc<PushChannel>>);

impl OpenGuard {
    fn disarm(mut self) {
        self.0 = None;
    }
}

impl Drop for OpenGuard {
    fn drop(&mut self) {
        if let Some(channel) = self.0.take() {
            channel.close(CloseReason::ClientAborted);
        }
    }
}

fn spawn_heartbeat(channel: Weak<PushChannel>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
        loop {
            ticker.tick().await;
            let Some(channel) = channel.upgrade() else {
                break;
            };
            match channel.push(WatchEvent::heartbeat()) {
                // A slow reader is still alive
                Ok(()) | Err(PushError::Full) => {}
                Err(PushError::Closed) => {
                    channel.close(CloseReason::HeartbeatFailed);
                    break;
                }
            }
        }
    })
}

/// Receiving end of a channel. Dropping it counts as a client abort.
pub struct ChannelStream {
    channel: Arc<PushChannel>,
    receiver: Option<mpsc::Receiver<WatchEvent>>,
    armed: bool,
}

impl ChannelStream {
    pub fn channel(&self) -> &Arc<PushChannel> {
        &self.channel
    }

    /// Split off the receiver. The channel then stays open until its
    /// heartbeat or a fan-out finds the receiver gone.
    pub fn into_parts(mut self) -> (Arc<PushChannel>, mpsc::Receiver<WatchEvent>) {
        self.armed = false;
        let receiver = self
            .receiver
            .take()
            .unwrap_or_else(|| mpsc::channel(1).1);
        (self.channel.clone(), receiver)
    }
}

impl Stream for ChannelStream {
    type Item = WatchEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match self.receiver.as_mut() {
            Some(rx) => rx.poll_recv(cx),
            None => Poll::Ready(None),
        }
    }
}

impl Drop for ChannelStream {
    fn drop(&mut self) {
        if self.armed {
            self.channel.close(CloseReason::ClientAborted);
        }
    }
}
