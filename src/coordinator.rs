//! Coordinator actor implementation
//!
//! The single owner of the session registry. Two inbound streams feed it:
//! new sessions from the acceptor and connection events from the workers.
//! Events are handled one at a time, so registration, teardown and fanout
//! never interleave and no locks are needed.

use std::collections::HashMap;

use futures_util::SinkExt;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{BroadcastPolicy, DuplicateUsernames};
use crate::error::ChatError;
use crate::handler::spawn_worker;
use crate::message::{ConnectionEvent, Message};
use crate::session::{PendingSession, Session, SessionId};

/// Channel buffer size for both inbound streams
pub const CHANNEL_BUFFER_SIZE: usize = 256;

/// Sorted usernames of the registered sessions, republished after every change
pub type Roster = watch::Receiver<Vec<String>>;

/// Cloneable sending side of the coordinator
pub struct CoordinatorHandle<S> {
    sessions_tx: mpsc::Sender<PendingSession<S>>,
    roster: Roster,
}

impl<S> CoordinatorHandle<S> {
    /// Hand a connection that finished its handshake to the coordinator
    pub async fn submit(&self, pending: PendingSession<S>) -> Result<(), ChatError> {
        self.sessions_tx
            .send(pending)
            .await
            .map_err(|_| ChatError::ChannelSend)
    }

    /// Watch the registered usernames
    pub fn roster(&self) -> Roster {
        self.roster.clone()
    }

    /// Number of registered sessions at the last registry change
    pub fn online(&self) -> usize {
        self.roster.borrow().len()
    }
}

impl<S> Clone for CoordinatorHandle<S> {
    fn clone(&self) -> Self {
        Self {
            sessions_tx: self.sessions_tx.clone(),
            roster: self.roster.clone(),
        }
    }
}

/// The coordinator actor
pub struct Coordinator<S> {
    policy: BroadcastPolicy,
    duplicates: DuplicateUsernames,
    /// Registered sessions: username -> Session
    sessions: HashMap<String, Session<S>>,
    /// New-session stream
    session_rx: mpsc::Receiver<PendingSession<S>>,
    /// Message stream
    event_rx: mpsc::Receiver<ConnectionEvent>,
    /// Cloned into every worker
    event_tx: mpsc::Sender<ConnectionEvent>,
    roster_tx: watch::Sender<Vec<String>>,
}

impl<S> Coordinator<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    /// Create a coordinator and the handle used to feed it sessions
    pub fn new(
        policy: BroadcastPolicy,
        duplicates: DuplicateUsernames,
    ) -> (Self, CoordinatorHandle<S>) {
        let (sessions_tx, session_rx) = mpsc::channel(CHANNEL_BUFFER_SIZE);
        let (event_tx, event_rx) = mpsc::channel(CHANNEL_BUFFER_SIZE);
        let (roster_tx, roster) = watch::channel(Vec::new());

        let coordinator = Self {
            policy,
            duplicates,
            sessions: HashMap::new(),
            session_rx,
            event_rx,
            event_tx,
            roster_tx,
        };
        let handle = CoordinatorHandle { sessions_tx, roster };
        (coordinator, handle)
    }

    /// Run the event loop
    ///
    /// Handles one event at a time until `shutdown` fires or every handle
    /// is dropped, then closes all sessions.
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!("Coordinator started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                pending = self.session_rx.recv() => match pending {
                    Some(pending) => {
                        self.register(pending).await;
                    }
                    None => break,
                },
                Some(event) = self.event_rx.recv() => {
                    self.handle_event(event).await;
                }
            }
        }

        self.shutdown().await;
        info!("Coordinator shutting down");
    }

    /// Process a single connection event
    pub async fn handle_event(&mut self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Message(message) => self.dispatch(message).await,
            ConnectionEvent::Closed {
                session_id,
                username,
            } => self.deregister(session_id, &username).await,
        }
    }

    /// Register a session and start its connection worker
    ///
    /// Returns the new session id, or `None` when the username was refused.
    pub async fn register(&mut self, pending: PendingSession<S>) -> Option<SessionId> {
        let PendingSession {
            username,
            peer,
            lines,
            mut writer,
        } = pending;

        if self.duplicates == DuplicateUsernames::Reject && self.sessions.contains_key(&username) {
            warn!("Rejecting duplicate username '{}' from {}", username, peer);
            let _ = writer
                .send(format!("username '{}' is already taken\n", username))
                .await;
            let _ = writer.close().await;
            return None;
        }

        let session_id = SessionId::new();
        let (session, close_rx) = Session::new(session_id, username.clone(), writer);

        match self.sessions.insert(username.clone(), session) {
            Some(displaced) => {
                info!(
                    "'{}' registered again from {}, closing session {}",
                    username, peer, displaced.id
                );
                displaced.close().await;
            }
            None => {
                info!("'{}' joined from {} (session {})", username, peer, session_id);
            }
        }

        spawn_worker(session_id, username, lines, close_rx, self.event_tx.clone());
        self.publish_roster();

        debug!("Total sessions: {}", self.sessions.len());
        Some(session_id)
    }

    /// Apply one message: exit command or fanout
    pub async fn dispatch(&mut self, message: Message) {
        if !self.is_current(&message.username, message.session_id) {
            debug!(
                "Dropping message from stale session {} ('{}')",
                message.session_id, message.username
            );
            return;
        }

        if self.policy.is_exit(&message.body) {
            if let Some(session) = self.sessions.remove(&message.username) {
                info!("'{}' exited", message.username);
                session.close().await;
                self.publish_roster();
            }
            return;
        }

        let line = self.policy.format(&message.username, &message.body);
        let mut failed = Vec::new();

        for (username, session) in self.sessions.iter_mut() {
            if !self.policy.include_sender && *username == message.username {
                continue;
            }

            if let Err(e) = session.send(line.clone()).await {
                warn!("{}", e);
                failed.push(username.clone());
            }
        }

        if failed.is_empty() {
            return;
        }

        for username in failed {
            if let Some(session) = self.sessions.remove(&username) {
                debug!("Removing '{}' after failed write", username);
                session.close().await;
            }
        }
        self.publish_roster();
    }

    /// Remove a session whose worker saw the connection end
    pub async fn deregister(&mut self, session_id: SessionId, username: &str) {
        if !self.is_current(username, session_id) {
            return;
        }

        if let Some(session) = self.sessions.remove(username) {
            info!("'{}' disconnected", username);
            session.close().await;
            self.publish_roster();
        }
    }

    /// Close every session
    pub async fn shutdown(&mut self) {
        for (_, session) in self.sessions.drain() {
            session.close().await;
        }
        self.publish_roster();
    }

    /// Registered usernames, sorted
    pub fn usernames(&self) -> Vec<String> {
        let mut names: Vec<String> = self.sessions.keys().cloned().collect();
        names.sort();
        names
    }

    /// Whether a username is registered
    pub fn contains(&self, username: &str) -> bool {
        self.sessions.contains_key(username)
    }

    /// Number of registered sessions
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether no session is registered
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Helper: the event comes from the session currently holding `username`
    fn is_current(&self, username: &str, session_id: SessionId) -> bool {
        self.sessions
            .get(username)
            .is_some_and(|session| session.id == session_id)
    }

    fn publish_roster(&self) {
        self.roster_tx.send_replace(self.usernames());
    }
}
