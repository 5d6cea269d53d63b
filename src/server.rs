//! Acceptor: the listening side of the chat server
//!
//! Accepts TCP connections, runs the username handshake for each one in
//! its own task and hands the result to the coordinator.

use std::net::SocketAddr;

use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::ServerConfig;
use crate::coordinator::{Coordinator, CoordinatorHandle, Roster};
use crate::error::ChatError;
use crate::handler::handshake;

/// A bound chat server, ready to [`run`](Self::run)
pub struct ChatServer {
    listener: TcpListener,
    config: ServerConfig,
    coordinator: Coordinator<TcpStream>,
    handle: CoordinatorHandle<TcpStream>,
}

impl ChatServer {
    /// Validate the configuration and bind the listening socket
    pub async fn bind(config: ServerConfig) -> Result<Self, ChatError> {
        let addr = config.bind_addr()?;
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ChatError::Listen {
                addr: addr.clone(),
                source,
            })?;

        info!("Listening for connections on {}", addr);
        Self::from_listener(listener, config)
    }

    /// Serve on an already bound listener
    ///
    /// The configured host and port are ignored.
    pub fn from_listener(listener: TcpListener, config: ServerConfig) -> Result<Self, ChatError> {
        config.validate_limits()?;
        let (coordinator, handle) =
            Coordinator::new(config.policy, config.duplicate_usernames);

        Ok(Self {
            listener,
            config,
            coordinator,
            handle,
        })
    }

    /// Address the listener is bound to
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Watch the registered usernames
    pub fn roster(&self) -> Roster {
        self.handle.roster()
    }

    /// Run the coordinator and the accept loop
    ///
    /// Returns when `shutdown` is cancelled or accepting fails. Either way
    /// the listener is closed and every session is closed before returning.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), ChatError> {
        let Self {
            listener,
            config,
            coordinator,
            handle,
        } = self;

        let coordinator_shutdown = shutdown.child_token();
        let coordinator_task = tokio::spawn(coordinator.run(coordinator_shutdown.clone()));

        let result = loop {
            tokio::select! {
                _ = shutdown.cancelled() => break Ok(()),
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        info!("New connection: {}", addr);
                        spawn_handshake(stream, addr, &config, &handle, &coordinator_shutdown);
                    }
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                        break Err(ChatError::Accept(e));
                    }
                }
            }
        };

        drop(listener);
        coordinator_shutdown.cancel();
        if let Err(e) = coordinator_task.await {
            error!("Coordinator task failed: {}", e);
        }

        info!("Server stopped");
        result
    }
}

/// Spawn the handshake task for one accepted connection
fn spawn_handshake(
    stream: TcpStream,
    addr: SocketAddr,
    config: &ServerConfig,
    handle: &CoordinatorHandle<TcpStream>,
    shutdown: &CancellationToken,
) {
    let handle = handle.clone();
    let shutdown = shutdown.clone();
    let max_line_length = config.max_line_length;

    tokio::spawn(async move {
        let online = handle.online();
        let result = tokio::select! {
            _ = shutdown.cancelled() => return,
            result = handshake(stream, addr.to_string(), online, max_line_length) => result,
        };

        match result {
            Ok(Some(pending)) => {
                if let Err(e) = handle.submit(pending).await {
                    debug!("Could not register {}: {}", addr, e);
                }
            }
            Ok(None) => {}
            Err(e) => debug!("Handshake with {} failed: {}", addr, e),
        }
    });
}
