mod common;

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use common::{MockTransport, Recorder, wait_until, wire};
use treesync::client::{FileEvent, SubscriptionMultiplexer, WatchRequest};
use treesync::watcher::{EventType, WatchEvent};

fn changes(events: &[WatchEvent]) -> usize {
    events.iter().filter(|e| e.kind == EventType::Change).count()
}

#[tokio::test]
async fn test_same_request_shares_one_connection() {
    let transport = MockTransport::new();
    let mux = SubscriptionMultiplexer::new(transport.clone());
    let first = Recorder::new();
    let second = Recorder::new();

    let _a = mux.watch_directory("/proj", "src", true, first.callback());
    let _b = mux.watch_directory("/proj", "src", true, second.callback());

    assert!(wait_until(|| transport.active() == 1).await);
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(transport.connects(), 1);
    assert_eq!(mux.connection_count(), 1);
    assert_eq!(
        mux.subscriber_count(&WatchRequest::directory("/proj", "src", true)),
        2
    );
}

#[tokio::test]
async fn test_recursive_flag_separates_connections() {
    let transport = MockTransport::new();
    let mux = SubscriptionMultiplexer::new(transport.clone());
    let recorder = Recorder::<WatchEvent>::new();

    let _a = mux.watch_directory("/proj", "", true, recorder.callback());
    let _b = mux.watch_directory("/proj", "", false, recorder.callback());

    assert!(wait_until(|| transport.connects() == 2).await);
    assert_eq!(mux.connection_count(), 2);
}

#[tokio::test]
async fn test_fan_out_delivers_once_per_callback() {
    let transport = MockTransport::new();
    let mux = SubscriptionMultiplexer::new(transport.clone());
    let request = WatchRequest::directory("/proj", "", true);
    let first = Recorder::new();
    let second = Recorder::new();

    let _a = mux.watch_directory("/proj", "", true, first.callback());
    let _b = mux.watch_directory("/proj", "", true, second.callback());
    assert!(wait_until(|| transport.active() == 1).await);

    assert_eq!(
        transport.emit(&request, wire(EventType::Change, "/proj/a.txt", "/proj")),
        1
    );

    assert!(wait_until(|| changes(&first.events()) == 1 && changes(&second.events()) == 1).await);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(changes(&first.events()), 1);
    assert_eq!(changes(&second.events()), 1);
}

#[tokio::test]
async fn test_last_unsubscribe_closes_connection() {
    let transport = MockTransport::new();
    let mux = SubscriptionMultiplexer::new(transport.clone());
    let request = WatchRequest::directory("/proj", "", true);
    let first = Recorder::new();
    let second = Recorder::new();

    let a = mux.watch_directory("/proj", "", true, first.callback());
    let b = mux.watch_directory("/proj", "", true, second.callback());
    assert!(wait_until(|| transport.active() == 1).await);

    a.unsubscribe();
    a.unsubscribe();
    assert!(!a.is_active());
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(transport.active(), 1);

    transport.emit(&request, wire(EventType::Add, "/proj/new.rs", "/proj"));
    assert!(
        wait_until(|| second
            .events()
            .iter()
            .any(|e| e.kind == EventType::Add))
        .await
    );
    assert!(!first.events().iter().any(|e| e.kind == EventType::Add));

    drop(b);
    assert!(wait_until(|| transport.active() == 0).await);
    assert_eq!(mux.connection_count(), 0);

    // A fresh subscriber opens a new connection
    let _c = mux.watch_directory("/proj", "", true, first.callback());
    assert!(wait_until(|| transport.connects() == 2).await);
}

#[tokio::test]
async fn test_heartbeats_filtered_and_failures_surface() {
    let transport = MockTransport::new();
    let mux = SubscriptionMultiplexer::new(transport.clone());
    let request = WatchRequest::directory("/proj", "", true);
    let recorder = Recorder::new();

    let _sub = mux.watch_directory("/proj", "", true, recorder.callback());
    assert!(wait_until(|| recorder.len() == 1).await);
    assert_eq!(recorder.events()[0].kind, EventType::Connected);

    transport.emit(&request, WatchEvent::heartbeat());
    transport.fail(&request, "connection reset");

    assert!(
        wait_until(|| recorder
            .events()
            .iter()
            .any(|e| e.kind == EventType::Error))
        .await
    );
    assert!(!recorder.events().iter().any(|e| e.is_heartbeat()));

    // The broken connection is forgotten; no automatic reconnect
    assert!(wait_until(|| mux.connection_count() == 0).await);
    assert_eq!(transport.connects(), 1);

    // The next subscriber gets a fresh connection
    let late = Recorder::new();
    let _again = mux.watch_directory("/proj", "", true, late.callback());
    assert!(wait_until(|| late.len() == 1).await);
    assert_eq!(late.events()[0].kind, EventType::Connected);
    assert_eq!(transport.connects(), 2);
}

#[tokio::test]
async fn test_connection_is_retired_before_final_error() {
    let transport = MockTransport::new();
    transport.refuse("connection refused");
    let mux = SubscriptionMultiplexer::new(transport.clone());

    let seen = Arc::new(AtomicUsize::new(usize::MAX));
    let _sub = mux.watch_directory("/proj", "", true, {
        let mux = mux.clone();
        let seen = seen.clone();
        move |event: &WatchEvent| {
            if event.kind == EventType::Error {
                seen.store(mux.connection_count(), Ordering::SeqCst);
            }
        }
    });

    assert!(wait_until(|| seen.load(Ordering::SeqCst) != usize::MAX).await);
    assert_eq!(seen.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_connect_failure_is_an_error_event() {
    let transport = MockTransport::new();
    transport.refuse("connection refused");
    let mux = SubscriptionMultiplexer::new(transport.clone());
    let recorder = Recorder::new();

    let _sub = mux.watch_directory("/proj", "", true, recorder.callback());

    assert!(wait_until(|| recorder.len() == 1).await);
    let event: WatchEvent = recorder.events().remove(0);
    assert_eq!(event.kind, EventType::Error);
    assert!(event.error.unwrap().contains("connection refused"));
}

#[tokio::test]
async fn test_file_watch_reports_move() {
    let transport = MockTransport::new();
    let mux = SubscriptionMultiplexer::with_move_window(transport.clone(), Duration::from_millis(100));
    let request = WatchRequest::file("/proj", "a.txt");
    let recorder = Recorder::new();

    let _sub = mux.watch_file("/proj", "a.txt", recorder.callback());
    assert!(wait_until(|| recorder.len() == 1).await);

    transport.emit(&request, wire(EventType::Unlink, "/proj/a.txt", "/proj"));
    transport.emit(&request, wire(EventType::Add, "/proj/b.txt", "/proj"));
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(
        recorder.events(),
        vec![
            FileEvent::Connected {
                path: PathBuf::from("/proj/a.txt")
            },
            FileEvent::Moved {
                old_path: PathBuf::from("/proj/a.txt"),
                new_path: PathBuf::from("/proj/b.txt"),
            },
        ]
    );
}

#[tokio::test]
async fn test_file_watch_reports_delete_after_window() {
    let transport = MockTransport::new();
    let mux = SubscriptionMultiplexer::with_move_window(transport.clone(), Duration::from_millis(100));
    let request = WatchRequest::file("/proj", "a.txt");
    let recorder = Recorder::new();

    let _sub = mux.watch_file("/proj", "a.txt", recorder.callback());
    assert!(wait_until(|| recorder.len() == 1).await);

    transport.emit(&request, wire(EventType::Unlink, "/proj/a.txt", "/proj"));
    assert!(wait_until(|| recorder.len() == 2).await);
    tokio::time::sleep(Duration::from_millis(200)).await;

    let events = recorder.events();
    assert_eq!(events.len(), 2);
    assert!(events[1].is_terminal());
    assert!(matches!(events[1], FileEvent::Deleted { .. }));
}

#[tokio::test]
async fn test_two_file_callbacks_each_see_one_change() {
    let transport = MockTransport::new();
    let mux = SubscriptionMultiplexer::new(transport.clone());
    let request = WatchRequest::file("/proj", "notes.md");
    let first = Recorder::new();
    let second = Recorder::new();

    let _a = mux.watch_file("/proj", "notes.md", first.callback());
    let _b = mux.watch_file("/proj", "notes.md", second.callback());
    assert!(wait_until(|| transport.active() == 1).await);

    transport.emit(&request, wire(EventType::Change, "/proj/notes.md", "/proj"));

    let changed = |events: Vec<FileEvent>| {
        events
            .iter()
            .filter(|e| matches!(e, FileEvent::Changed { .. }))
            .count()
    };
    assert!(wait_until(|| changed(first.events()) == 1 && changed(second.events()) == 1).await);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(changed(first.events()), 1);
    assert_eq!(changed(second.events()), 1);
    assert_eq!(transport.connects(), 1);
}

#[tokio::test]
async fn test_unsubscribe_frees_pending_correlation() {
    let transport = MockTransport::new();
    let mux = SubscriptionMultiplexer::with_move_window(transport.clone(), Duration::from_millis(100));
    let request = WatchRequest::file("/proj", "a.txt");
    let recorder = Recorder::new();

    let sub = mux.watch_file("/proj", "a.txt", recorder.callback());
    assert!(wait_until(|| recorder.len() == 1).await);

    transport.emit(&request, wire(EventType::Unlink, "/proj/a.txt", "/proj"));
    tokio::time::sleep(Duration::from_millis(20)).await;
    sub.unsubscribe();

    assert!(wait_until(|| transport.active() == 0).await);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(recorder.len(), 1);
}
