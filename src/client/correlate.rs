//! Move correlation for single-file watches.
//!
//! The wire reports `unlink` and `add` independently. An `unlink` of the
//! watched file opens a bounded window; an `add` inside the window turns the
//! pair into one logical event (`Moved`, or `Changed` when the file came
//! back at the same path, which is how many editors save). When the window
//! runs out the removal is reported as `Deleted`.
//!
//! ```text
//! Idle --unlink--> PendingDelete --add(other path)--> Idle  => Moved
//!                               --add(same path)---> Idle  => Changed
//!                               --window expires---> Idle  => Deleted
//! ```
//!
//! Both exits take the state lock and only the one that still finds its
//! pending generation emits, so a removal ends in exactly one event.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::watcher::{EventType, WatchEvent};

/// Logical events delivered to file-watch callbacks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileEvent {
    Connected { path: PathBuf },
    Added { path: PathBuf },
    Changed { path: PathBuf },
    Moved { old_path: PathBuf, new_path: PathBuf },
    Deleted { path: PathBuf },
    /// The watch is broken, possibly temporarily
    Error { message: String },
}

impl FileEvent {
    /// The watched resource is gone; content shown for it is stale.
    pub fn is_terminal(&self) -> bool {
        matches!(self, FileEvent::Moved { .. } | FileEvent::Deleted { .. })
    }
}

pub type Emitter = Arc<dyn Fn(FileEvent) + Send + Sync>;

enum CorrelationState {
    Idle,
    PendingDelete {
        generation: u64,
        timer: JoinHandle<()>,
    },
}

pub struct MoveCorrelator {
    watched: Mutex<PathBuf>,
    window: Duration,
    state: Mutex<CorrelationState>,
    next_generation: AtomicU64,
    emit: Emitter,
    cancel: CancellationToken,
}

impl MoveCorrelator {
    /// `cancel` stops any pending timer without emitting.
    pub fn new(
        watched: PathBuf,
        window: Duration,
        emit: Emitter,
        cancel: CancellationToken,
    ) -> Arc<Self> {
        Arc::new(Self {
            watched: Mutex::new(watched),
            window,
            state: Mutex::new(CorrelationState::Idle),
            next_generation: AtomicU64::new(1),
            emit,
            cancel,
        })
    }

    pub fn watched(&self) -> PathBuf {
        self.watched.lock().clone()
    }

    pub fn is_pending(&self) -> bool {
        matches!(*self.state.lock(), CorrelationState::PendingDelete { .. })
    }

    /// Feed one wire event.
    pub fn handle(self: &Arc<Self>, event: &WatchEvent) {
        let watched = self.watched();

        match event.kind {
            EventType::Connected => {
                // The server's view of the path wins over ours
                let path = event.path.as_deref().map(PathBuf::from).unwrap_or(watched);
                *self.watched.lock() = path.clone();
                (self.emit)(FileEvent::Connected { path });
            }
            EventType::Error => {
                let message = event
                    .error
                    .clone()
                    .unwrap_or_else(|| "watch error".to_string());
                (self.emit)(FileEvent::Error { message });
            }
            EventType::Unlink if event.path_is(&watched) => self.begin_pending(),
            EventType::Change if event.path_is(&watched) => {
                self.take_pending();
                (self.emit)(FileEvent::Changed { path: watched });
            }
            EventType::Add => {
                let Some(path) = event.path.as_deref().map(PathBuf::from) else {
                    return;
                };
                if self.take_pending() {
                    if path == watched {
                        (self.emit)(FileEvent::Changed { path });
                    } else {
                        crate::debug_event!(
                            "correlate",
                            "moved",
                            "{} -> {}",
                            watched.display(),
                            path.display()
                        );
                        (self.emit)(FileEvent::Moved {
                            old_path: watched,
                            new_path: path,
                        });
                    }
                } else if path == watched {
                    (self.emit)(FileEvent::Added { path });
                }
                // Otherwise an unrelated sibling appeared
            }
            _ => {}
        }
    }

    /// Drop any pending removal without emitting.
    pub fn shutdown(&self) {
        self.take_pending();
    }

    fn begin_pending(self: &Arc<Self>) {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let mut state = self.state.lock();
        if let CorrelationState::PendingDelete { timer, .. } = &*state {
            // A second removal restarts the window instead of stacking
            timer.abort();
            crate::debug_event!("correlate", "window extended");
        }
        let timer = self.spawn_timer(generation);
        *state = CorrelationState::PendingDelete { generation, timer };
    }

    fn spawn_timer(self: &Arc<Self>, generation: u64) -> JoinHandle<()> {
        let correlator = Arc::clone(self);
        let cancel = self.cancel.clone();
        let window = self.window;

        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(window) => correlator.expire(generation),
            }
        })
    }

    /// Leave `PendingDelete`, cancelling its timer. True if there was one.
    fn take_pending(&self) -> bool {
        let previous = std::mem::replace(&mut *self.state.lock(), CorrelationState::Idle);
        match previous {
            CorrelationState::PendingDelete { timer, .. } => {
                timer.abort();
                true
            }
            CorrelationState::Idle => false,
        }
    }

    fn expire(&self, generation: u64) {
        {
            let mut state = self.state.lock();
            let current = matches!(
                &*state,
                CorrelationState::PendingDelete { generation: g, .. } if *g == generation
            );
            if !current {
                return;
            }
            *state = CorrelationState::Idle;
        }

        let path = self.watched();
        crate::debug_event!("correlate", "deleted", "{}", path.display());
        (self.emit)(FileEvent::Deleted { path });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    const WINDOW: Duration = Duration::from_millis(500);

    fn collector() -> (Emitter, Arc<Mutex<Vec<FileEvent>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let emit: Emitter = Arc::new(move |event| sink.lock().push(event));
        (emit, seen)
    }

    fn correlator(emit: Emitter) -> Arc<MoveCorrelator> {
        MoveCorrelator::new(
            PathBuf::from("/d/a.txt"),
            WINDOW,
            emit,
            CancellationToken::new(),
        )
    }

    fn wire(kind: EventType, path: &str) -> WatchEvent {
        WatchEvent::change(kind, Path::new(path), Path::new("/d"), None)
    }

    async fn wait(ms: u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_unlink_then_add_is_one_move() {
        let (emit, seen) = collector();
        let c = correlator(emit);

        c.handle(&wire(EventType::Unlink, "/d/a.txt"));
        wait(100).await;
        c.handle(&wire(EventType::Add, "/d/b.txt"));
        wait(1000).await;

        assert_eq!(
            *seen.lock(),
            vec![FileEvent::Moved {
                old_path: PathBuf::from("/d/a.txt"),
                new_path: PathBuf::from("/d/b.txt"),
            }]
        );
        assert!(!c.is_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn test_lone_unlink_becomes_delete() {
        let (emit, seen) = collector();
        let c = correlator(emit);

        c.handle(&wire(EventType::Unlink, "/d/a.txt"));
        wait(400).await;
        assert!(seen.lock().is_empty());
        wait(200).await;
        assert_eq!(
            *seen.lock(),
            vec![FileEvent::Deleted {
                path: PathBuf::from("/d/a.txt")
            }]
        );

        // A late add for another file is just a sibling now
        c.handle(&wire(EventType::Add, "/d/b.txt"));
        wait(1000).await;
        assert_eq!(seen.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recreate_at_same_path_is_change() {
        let (emit, seen) = collector();
        let c = correlator(emit);

        c.handle(&wire(EventType::Unlink, "/d/a.txt"));
        c.handle(&wire(EventType::Add, "/d/a.txt"));
        wait(1000).await;

        assert_eq!(
            *seen.lock(),
            vec![FileEvent::Changed {
                path: PathBuf::from("/d/a.txt")
            }]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_unlink_extends_window() {
        let (emit, seen) = collector();
        let c = correlator(emit);

        c.handle(&wire(EventType::Unlink, "/d/a.txt"));
        wait(300).await;
        c.handle(&wire(EventType::Unlink, "/d/a.txt"));
        wait(300).await;
        assert!(seen.lock().is_empty());
        assert!(c.is_pending());

        wait(300).await;
        assert_eq!(seen.lock().len(), 1);
        assert!(matches!(seen.lock()[0], FileEvent::Deleted { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_change_error_and_siblings_while_idle() {
        let (emit, seen) = collector();
        let c = correlator(emit);

        c.handle(&wire(EventType::Add, "/d/other.txt"));
        c.handle(&wire(EventType::Change, "/d/other.txt"));
        c.handle(&wire(EventType::Change, "/d/a.txt"));
        c.handle(&WatchEvent::error("inotify limit reached"));
        c.handle(&WatchEvent::heartbeat());

        assert_eq!(
            *seen.lock(),
            vec![
                FileEvent::Changed {
                    path: PathBuf::from("/d/a.txt")
                },
                FileEvent::Error {
                    message: "inotify limit reached".to_string()
                },
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_does_not_resolve_pending() {
        let (emit, seen) = collector();
        let c = correlator(emit);

        c.handle(&wire(EventType::Unlink, "/d/a.txt"));
        c.handle(&WatchEvent::error("transient"));
        assert!(c.is_pending());

        wait(600).await;
        let seen = seen.lock();
        assert_eq!(seen.len(), 2);
        assert!(matches!(seen[1], FileEvent::Deleted { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_frees_pending_timer() {
        let (emit, seen) = collector();
        let cancel = CancellationToken::new();
        let c = MoveCorrelator::new(PathBuf::from("/d/a.txt"), WINDOW, emit, cancel.clone());

        c.handle(&wire(EventType::Unlink, "/d/a.txt"));
        cancel.cancel();
        c.shutdown();
        wait(1000).await;

        assert!(seen.lock().is_empty());
        assert!(!c.is_pending());
    }

    #[tokio::test]
    async fn test_connected_adopts_server_path() {
        let (emit, seen) = collector();
        let c = correlator(emit);

        c.handle(&WatchEvent::connected(Path::new("/real/a.txt")));

        assert_eq!(c.watched(), PathBuf::from("/real/a.txt"));
        assert!(seen.lock()[0].eq(&FileEvent::Connected {
            path: PathBuf::from("/real/a.txt")
        }));
        assert!(!seen.lock()[0].is_terminal());
    }
}
