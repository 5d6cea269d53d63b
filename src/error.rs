//! Error types for the chat server
//!
//! Configuration and listen errors surface to the caller. Per-connection
//! and per-recipient errors stay inside the task that hit them and are
//! only logged.

use thiserror::Error;

/// Application-level errors
#[derive(Debug, Error)]
pub enum ChatError {
    /// Rejected server configuration (non-positive port, zero line limit, ...)
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Could not bind the listening socket (fatal at startup)
    #[error("Failed to listen on {addr}: {source}")]
    Listen {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// The accept loop failed; the server shuts down
    #[error("Failed to accept connection: {0}")]
    Accept(#[source] std::io::Error),

    /// Writing a broadcast line to one recipient failed
    #[error("Write to '{username}' failed: {source}")]
    RecipientWrite {
        username: String,
        #[source]
        source: std::io::Error,
    },

    /// The peer's connection broke while reading
    #[error("Peer '{username}' disconnected: {source}")]
    PeerDisconnect {
        username: String,
        #[source]
        source: std::io::Error,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file could not be parsed
    #[error("JSON configuration error: {0}")]
    Json(#[from] serde_json::Error),

    /// Channel send error (the coordinator is gone)
    #[error("Channel send error")]
    ChannelSend,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recipient_write_display() {
        let err = ChatError::RecipientWrite {
            username: "bob".to_string(),
            source: std::io::ErrorKind::BrokenPipe.into(),
        };
        assert!(err.to_string().starts_with("Write to 'bob' failed"));
    }
}
