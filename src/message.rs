//! Events flowing from connection workers into the coordinator

use crate::session::SessionId;

/// One chat line sent by a registered session
///
/// Ephemeral: consumed once by the coordinator and never stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Session that read the line
    pub session_id: SessionId,
    /// Sender's username
    pub username: String,
    /// Line contents with the line ending stripped
    pub body: String,
}

impl Message {
    pub fn new(session_id: SessionId, username: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            session_id,
            username: username.into(),
            body: body.into(),
        }
    }
}

/// Connection worker → coordinator events
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// A line arrived from the session
    Message(Message),
    /// The peer closed the connection or a read failed
    Closed {
        session_id: SessionId,
        username: String,
    },
}
