//! Session definitions
//!
//! A connection is split once, right after accept. The read half stays with
//! the connection worker, the write half ends up in the coordinator's
//! registry.

use futures_util::SinkExt;
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio::sync::oneshot;
use tokio_util::codec::{FramedRead, FramedWrite};
use uuid::Uuid;

use crate::codec::LineCodec;
use crate::error::ChatError;

/// Tags one registration of a username
///
/// A name can be registered again after its holder leaves or is replaced;
/// events carrying an older id are stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

/// Framed read side of a connection
pub type LineReader<S> = FramedRead<ReadHalf<S>, LineCodec>;

/// Framed write side of a connection
pub type LineWriter<S> = FramedWrite<WriteHalf<S>, LineCodec>;

/// Split a stream into framed line reader and writer halves
pub fn split_lines<S>(stream: S, max_line_length: usize) -> (LineReader<S>, LineWriter<S>)
where
    S: AsyncRead + AsyncWrite,
{
    let (read_half, write_half) = tokio::io::split(stream);
    let codec = LineCodec::new(max_line_length);
    (
        FramedRead::new(read_half, codec.clone()),
        FramedWrite::new(write_half, codec),
    )
}

/// A connection that finished the username handshake
///
/// Carries the framed reader rather than the raw half so that lines the
/// client sent right after its username are not lost.
pub struct PendingSession<S> {
    pub username: String,
    pub peer: String,
    pub lines: LineReader<S>,
    pub writer: LineWriter<S>,
}

impl<S> std::fmt::Debug for PendingSession<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingSession")
            .field("username", &self.username)
            .field("peer", &self.peer)
            .finish_non_exhaustive()
    }
}

/// Registered session, owned by the coordinator
///
/// Dropping a session drops `close_tx`, which stops its connection worker.
pub struct Session<S> {
    /// Unique identifier for this registration
    pub id: SessionId,
    /// Registry key
    pub username: String,
    /// Coordinator → client line sink
    writer: LineWriter<S>,
    /// Held only for its drop
    _close_tx: oneshot::Sender<()>,
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite,
{
    /// Create a session and the close signal its worker listens on
    pub fn new(
        id: SessionId,
        username: String,
        writer: LineWriter<S>,
    ) -> (Self, oneshot::Receiver<()>) {
        let (close_tx, close_rx) = oneshot::channel();
        let session = Self {
            id,
            username,
            writer,
            _close_tx: close_tx,
        };
        (session, close_rx)
    }

    /// Write one already formatted line to this client
    pub async fn send(&mut self, line: String) -> Result<(), ChatError> {
        self.writer
            .send(line)
            .await
            .map_err(|source| ChatError::RecipientWrite {
                username: self.username.clone(),
                source,
            })
    }

    /// Shut down the write side and stop the worker
    pub async fn close(mut self) {
        let _ = self.writer.close().await;
    }
}

impl<S> std::fmt::Debug for Session<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    #[test]
    fn test_session_ids_differ() {
        assert_ne!(SessionId::new(), SessionId::new());
    }

    #[tokio::test]
    async fn test_session_send() {
        let (server, client) = tokio::io::duplex(256);
        let (_lines, writer) = split_lines(server, 64);
        let (mut client_lines, _client_writer) = split_lines(client, 64);

        let (mut session, _close_rx) = Session::new(SessionId::new(), "alice".to_string(), writer);
        session.send("hi there\n".to_string()).await.unwrap();

        assert_eq!(client_lines.next().await.unwrap().unwrap(), "hi there");
    }

    #[tokio::test]
    async fn test_drop_signals_worker() {
        let (server, _client) = tokio::io::duplex(256);
        let (_lines, writer) = split_lines(server, 64);

        let (session, close_rx) = Session::new(SessionId::new(), "alice".to_string(), writer);
        session.close().await;

        assert!(close_rx.await.is_err());
    }
}
