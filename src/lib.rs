//! Multi-user line chat server library
//!
//! Clients connect over plain TCP, send a username as their first line, and
//! every line after that is broadcast to the other connected clients.
//!
//! # Architecture
//! Uses the Actor pattern with `mpsc` channels:
//! - `Coordinator` is the single actor owning the session registry
//! - `ChatServer` accepts connections and runs the username handshake
//! - Each session has a connection worker task that forwards its lines
//! - No locks needed - registration, teardown and fanout all go through
//!   the coordinator one event at a time
//!
//! # Example
//! ```ignore
//! use line_chat::{BroadcastPolicy, ChatServer, ServerConfig};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), line_chat::ChatError> {
//!     let config = ServerConfig::new(8080).with_policy(BroadcastPolicy::raw());
//!     let server = ChatServer::bind(config).await?;
//!     server.run(CancellationToken::new()).await
//! }
//! ```

pub mod codec;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod handler;
pub mod message;
pub mod server;
pub mod session;

// Re-export main types for convenience
pub use codec::LineCodec;
pub use config::{BroadcastPolicy, DuplicateUsernames, ServerConfig, DEFAULT_PORT, EXIT_COMMAND};
pub use coordinator::{Coordinator, CoordinatorHandle, Roster};
pub use error::ChatError;
pub use handler::{handshake, run_worker};
pub use message::{ConnectionEvent, Message};
pub use server::ChatServer;
pub use session::{PendingSession, Session, SessionId};
