//! Filesystem change notification and live directory-tree synchronization.
//!
//! The server half ([`watcher`], [`server`]) shares one OS watch per
//! `(path, recursive)` among any number of push channels. The client half
//! ([`client`], [`tree`], [`cache`]) shares one connection per request among
//! callbacks, folds unlink/add pairs into moves and keeps a lazily loaded
//! tree current.

pub mod cache;
pub mod cli;
pub mod client;
pub mod config;
pub mod logging;
#[cfg(feature = "http-server")]
pub mod server;
pub mod tree;
pub mod watcher;

pub use client::{FileEvent, Subscription, SubscriptionMultiplexer, WatchRequest};
pub use config::Settings;
pub use tree::{FileTree, NodeData, TreeSync};
pub use watcher::{EventType, WatchError, WatchEvent, WatchRegistry};
