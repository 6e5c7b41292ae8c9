//! Client side: consume push channels and fan them out to callbacks.
//!
//! ```text
//! WatchTransport (SSE)    one connection per WatchRequest
//!        |
//! SubscriptionMultiplexer callbacks share the connection
//!        |
//! MoveCorrelator          file watches only: unlink+add => moved
//! ```

mod correlate;
mod error;
mod multiplexer;
mod transport;

pub use correlate::{Emitter, FileEvent, MoveCorrelator};
pub use error::ClientError;
pub use multiplexer::{Callback, Subscription, SubscriptionMultiplexer};
pub use transport::{EventStream, SseTransport, WatchRequest, WatchTransport};
