//! Server side of the change-notification core.
//!
//! # Architecture
//!
//! ```text
//! WatchSource (notify)          one per (path, recursive)
//!        |
//! WatchRegistry / WatchSession  fan-out in source order
//!        |
//!   +----+----+
//!   |    |    |
//! PushChannel ...               one per client, heartbeat, close-once
//! ```

mod channel;
mod error;
mod event;
mod registry;
mod source;

pub use channel::{
    ChannelId, ChannelOptions, ChannelRequest, ChannelScope, ChannelStream, CloseReason,
    PushChannel, PushError,
};
pub use error::WatchError;
pub use event::{EventType, FileStats, WatchEvent, relative_key};
pub use registry::{WatchRegistry, WatchSession};
pub use source::{
    ChangeKind, NotifySource, RawEvent, RawSender, SourceHandle, WatchIdentity, WatchSource,
};
