//! Error types for the watch client.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Failed to connect to {url}: {reason}")]
    Connect { url: String, reason: String },

    #[error("Server answered {status} for {url}")]
    Status { status: u16, url: String },

    #[error("Event stream failed: {0}")]
    Stream(String),

    #[error("Malformed event: {0}")]
    Decode(#[from] serde_json::Error),
}
