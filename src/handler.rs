//! Per-connection tasks
//!
//! `handshake` runs once per accepted connection and collects the username.
//! `run_worker` then turns the connection's incoming lines into events for
//! the coordinator until the peer goes away or the coordinator drops the
//! session.

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::ChatError;
use crate::message::{ConnectionEvent, Message};
use crate::session::{split_lines, LineReader, PendingSession, SessionId};

/// Prompt written to every new connection
pub fn prompt(online: usize) -> String {
    format!("Total users: {}\nusername: ", online)
}

/// Perform the username handshake on a fresh connection
///
/// Returns `Ok(None)` when the peer hangs up before naming itself.
pub async fn handshake<S>(
    stream: S,
    peer: String,
    online: usize,
    max_line_length: usize,
) -> Result<Option<PendingSession<S>>, ChatError>
where
    S: AsyncRead + AsyncWrite,
{
    let (mut lines, mut writer) = split_lines(stream, max_line_length);
    writer.send(prompt(online)).await?;

    while let Some(line) = lines.next().await {
        let username = line?;
        if username.is_empty() {
            continue;
        }

        debug!("Connection {} identified as '{}'", peer, username);
        return Ok(Some(PendingSession {
            username,
            peer,
            lines,
            writer,
        }));
    }

    debug!("Connection {} closed before sending a username", peer);
    Ok(None)
}

/// Read lines from one session and forward them to the coordinator
///
/// Every line is forwarded, blank ones included. When the peer closes or a read fails a
/// `Closed` event is sent so the coordinator can reap the session. When the
/// coordinator drops the session first, the worker just stops.
pub async fn run_worker<S>(
    session_id: SessionId,
    username: String,
    mut lines: LineReader<S>,
    mut close_rx: oneshot::Receiver<()>,
    events: mpsc::Sender<ConnectionEvent>,
) -> Result<(), ChatError>
where
    S: AsyncRead + AsyncWrite,
{
    let result = loop {
        tokio::select! {
            _ = &mut close_rx => {
                debug!("Worker for '{}' stopped by coordinator", username);
                return Ok(());
            }
            next = lines.next() => match next {
                Some(Ok(body)) => {
                    let event = ConnectionEvent::Message(Message::new(session_id, username.clone(), body));
                    if events.send(event).await.is_err() {
                        debug!("Coordinator closed, ending worker for '{}'", username);
                        return Err(ChatError::ChannelSend);
                    }
                }
                Some(Err(source)) => {
                    break Err(ChatError::PeerDisconnect {
                        username: username.clone(),
                        source,
                    });
                }
                None => {
                    info!("'{}' closed the connection", username);
                    break Ok(());
                }
            }
        }
    };

    let _ = events
        .send(ConnectionEvent::Closed {
            session_id,
            username,
        })
        .await;

    result
}

/// Spawn the connection worker task for a registered session
pub fn spawn_worker<S>(
    session_id: SessionId,
    username: String,
    lines: LineReader<S>,
    close_rx: oneshot::Receiver<()>,
    events: mpsc::Sender<ConnectionEvent>,
) -> JoinHandle<()>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    tokio::spawn(async move {
        if let Err(e) = run_worker(session_id, username, lines, close_rx, events).await {
            warn!("Connection worker error: {}", e);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_handshake_reads_username() {
        let (server, mut client) = tokio::io::duplex(256);
        let task = tokio::spawn(handshake(server, "test".to_string(), 2, 64));

        let mut prompt_buf = vec![0u8; prompt(2).len()];
        client.read_exact(&mut prompt_buf).await.unwrap();
        assert_eq!(prompt_buf, b"Total users: 2\nusername: ");

        client.write_all(b"\r\n alice\0\0\r\n").await.unwrap();
        let pending = task.await.unwrap().unwrap().unwrap();
        // Only line endings and NUL padding are stripped
        assert_eq!(pending.username, " alice");
    }

    #[tokio::test]
    async fn test_handshake_keeps_early_lines() {
        let (server, mut client) = tokio::io::duplex(256);
        client.write_all(b"alice\nfirst message\n").await.unwrap();

        let mut pending = handshake(server, "test".to_string(), 0, 64)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(pending.lines.next().await.unwrap().unwrap(), "first message");
    }

    #[tokio::test]
    async fn test_handshake_peer_gone() {
        let (server, client) = tokio::io::duplex(256);
        drop(client);

        // The prompt write fails or the read sees EOF; either way no session
        let result = handshake(server, "test".to_string(), 0, 64).await;
        assert!(!matches!(result, Ok(Some(_))));
    }

    #[tokio::test]
    async fn test_worker_forwards_lines_and_reports_close() {
        let (server, mut client) = tokio::io::duplex(256);
        let (lines, _writer) = split_lines(server, 64);
        let (_close_tx, close_rx) = oneshot::channel();
        let (tx, mut rx) = mpsc::channel(8);
        let id = SessionId::new();

        let worker = spawn_worker(id, "alice".to_string(), lines, close_rx, tx);

        client.write_all(b"hello\n\r\nworld\r\n").await.unwrap();
        drop(client);

        assert_eq!(
            rx.recv().await.unwrap(),
            ConnectionEvent::Message(Message::new(id, "alice", "hello"))
        );
        assert_eq!(
            rx.recv().await.unwrap(),
            ConnectionEvent::Message(Message::new(id, "alice", ""))
        );
        assert_eq!(
            rx.recv().await.unwrap(),
            ConnectionEvent::Message(Message::new(id, "alice", "world"))
        );
        assert_eq!(
            rx.recv().await.unwrap(),
            ConnectionEvent::Closed {
                session_id: id,
                username: "alice".to_string()
            }
        );
        worker.await.unwrap();
    }

    #[tokio::test]
    async fn test_worker_stops_on_close_signal() {
        let (server, _client) = tokio::io::duplex(256);
        let (lines, _writer) = split_lines(server, 64);
        let (close_tx, close_rx) = oneshot::channel::<()>();
        let (tx, mut rx) = mpsc::channel(8);

        let worker = spawn_worker(SessionId::new(), "alice".to_string(), lines, close_rx, tx);
        drop(close_tx);
        worker.await.unwrap();

        // No Closed event for a coordinator-initiated stop
        assert!(rx.recv().await.is_none());
    }
}
