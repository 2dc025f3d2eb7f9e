//! TCP server for the NetChat daemon.
//!
//! The server:
//! - Listens on a TCP port for client connections
//! - Spawns a ConnectionHandler for each client
//! - Forwards broker delivery to every connected session (the broadcast
//!   callback of the pipeline)
//! - Turns registry events into system messages and closes evicted sessions
//! - Supports graceful shutdown via CancellationToken
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │    ChatServer   │
//! │   TcpListener   │
//! └───────┬─────────┘
//!         │ accept()
//!         ▼
//! ┌─────────────────┐    admit/touch    ┌─────────────────┐
//! │ConnectionHandler│──────────────────▶│  RegistryHandle │
//! │  (per client)   │                   └─────────────────┘
//! └───────┬─────────┘
//!         │ submit()                    ┌─────────────────┐
//!         └──────────────────────────▶  │  BrokerHandle   │
//!                                       └────────┬────────┘
//!                  delivery broadcast            │
//!         ┌──────────────────────────────────────┘
//!         ▼
//! ┌─────────────────┐
//! │  all sessions   │ (writer per connection, failures isolated)
//! └─────────────────┘
//! ```

mod connection;

pub use connection::{ClientConnection, ClientWriter, ConnectionError, ConnectionHandler, SubscribersMap};

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, RwLock};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use netchat_core::{ChatMessage, Username};
use netchat_protocol::render_line;

use crate::broker::BrokerHandle;
use crate::config::ServerConfig;
use crate::registry::{RegistryEvent, RegistryHandle};

/// Write timeout for broadcast delivery to one recipient.
const DELIVERY_TIMEOUT: Duration = Duration::from_secs(10);

/// TCP server for the NetChat daemon.
pub struct ChatServer {
    config: Arc<ServerConfig>,

    /// Handle to the session registry
    registry: RegistryHandle,

    /// Handle to the message broker
    broker: BrokerHandle,

    /// Cancellation token for graceful shutdown
    cancel: CancellationToken,

    /// Bound listener, created in `bind`
    listener: TcpListener,

    /// Connection counter for log correlation
    connection_counter: AtomicU64,

    /// Writers of connected sessions, keyed by username
    subscribers: SubscribersMap,
}

impl ChatServer {
    /// Binds the listen socket.
    ///
    /// Binding is separate from [`run`](Self::run) so callers (and tests)
    /// can learn the bound address before the accept loop starts.
    pub async fn bind(
        config: Arc<ServerConfig>,
        registry: RegistryHandle,
        broker: BrokerHandle,
        cancel: CancellationToken,
    ) -> Result<Self, ServerError> {
        let port = config.port;
        let listener = TcpListener::bind(("0.0.0.0", port))
            .await
            .map_err(|e| ServerError::Bind {
                port,
                error: e.to_string(),
            })?;

        Ok(Self {
            config,
            registry,
            broker,
            cancel,
            listener,
            connection_counter: AtomicU64::new(0),
            subscribers: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    /// Returns the bound listen address.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        self.listener.local_addr().map_err(|e| ServerError::Bind {
            port: self.config.port,
            error: e.to_string(),
        })
    }

    /// Runs the server.
    ///
    /// Accepts connections until the cancellation token is triggered.
    /// This method does not return until shutdown.
    pub async fn run(&self) -> Result<(), ServerError> {
        info!(
            addr = %self.local_addr().map(|a| a.to_string()).unwrap_or_default(),
            max_sessions = self.config.max_sessions,
            "chat server listening"
        );

        self.spawn_broadcaster();
        self.spawn_registry_event_task();

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("server shutdown requested");
                    break;
                }

                result = self.listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let conn_num = self.connection_counter.fetch_add(1, Ordering::Relaxed);
                            debug!(connection = conn_num, peer = %addr, "accepted connection");
                            self.handle_connection(stream, conn_num);
                        }
                        Err(e) => {
                            error!(error = %e, "failed to accept connection");
                            // Continue accepting other connections
                        }
                    }
                }
            }
        }

        self.cleanup().await;
        Ok(())
    }

    /// Spawns the handler task for a new client connection.
    fn handle_connection(&self, stream: tokio::net::TcpStream, connection_number: u64) {
        let handler = ConnectionHandler::new(
            stream,
            Arc::clone(&self.config),
            self.registry.clone(),
            self.broker.clone(),
            Arc::clone(&self.subscribers),
            self.cancel.child_token(),
            connection_number,
        );

        tokio::spawn(handler.run());
    }

    /// Spawns the delivery broadcaster.
    ///
    /// This task is the broadcast callback of the pipeline: it receives
    /// every outbound message from the broker and writes the rendered line
    /// to every connected session.
    fn spawn_broadcaster(&self) {
        let mut delivery_rx = self.broker.subscribe();
        let subscribers = Arc::clone(&self.subscribers);
        let cancel = self.cancel.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("delivery broadcaster shutting down");
                        break;
                    }

                    result = delivery_rx.recv() => {
                        match result {
                            Ok(msg) => broadcast_message(&subscribers, &msg).await,
                            Err(broadcast::error::RecvError::Lagged(n)) => {
                                warn!(skipped = n, "delivery broadcaster lagged, messages skipped");
                            }
                            Err(broadcast::error::RecvError::Closed) => {
                                debug!("delivery channel closed");
                                break;
                            }
                        }
                    }
                }
            }
        });
    }

    /// Spawns the registry event task.
    ///
    /// Joins and leaves become system messages; evictions additionally close
    /// the session's connection.
    fn spawn_registry_event_task(&self) {
        let mut event_rx = self.registry.subscribe();
        let broker = self.broker.clone();
        let subscribers = Arc::clone(&self.subscribers);
        let cancel = self.cancel.clone();

        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("registry event task shutting down");
                        break;
                    }

                    result = event_rx.recv() => match result {
                        Ok(event) => event,
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!(skipped = n, "registry event task lagged");
                            continue;
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            debug!("registry event channel closed");
                            break;
                        }
                    },
                };

                let announcement = match event {
                    RegistryEvent::Joined { username } => {
                        format!("{username} joined the chat.")
                    }
                    RegistryEvent::Left { username } => {
                        format!("{username} left the chat.")
                    }
                    RegistryEvent::Evicted { username, idle } => {
                        close_connection(&subscribers, &username).await;
                        format!(
                            "{username} was disconnected after {}s of inactivity.",
                            idle.as_secs()
                        )
                    }
                };

                // Best-effort: during shutdown the announcement is dropped
                if let Err(e) = broker.submit(ChatMessage::system(announcement)).await {
                    debug!(error = %e, "dropping registry announcement");
                }
            }
        });
    }

    /// Performs cleanup on shutdown: closes every connection.
    async fn cleanup(&self) {
        let mut subs = self.subscribers.write().await;
        let count = subs.len();
        for (_, conn) in subs.drain() {
            conn.cancel.cancel();
        }
        if count > 0 {
            info!(connections = count, "closed client connections");
        }
        info!("server cleanup complete");
    }
}

/// Removes a session's writer and cancels its connection task.
async fn close_connection(subscribers: &SubscribersMap, username: &Username) {
    let conn = subscribers.write().await.remove(username);
    if let Some(conn) = conn {
        conn.cancel.cancel();
        debug!(user = %username, "closed evicted session connection");
    }
}

/// Writes one message to every connected session.
///
/// A failed or timed-out write is isolated to its recipient: the writer is
/// removed (and the connection closed) without affecting delivery to the
/// rest of the pool.
async fn broadcast_message(subscribers: &SubscribersMap, msg: &ChatMessage) {
    let line = render_line(msg);

    let subs = subscribers.read().await;
    let mut failed: Vec<Username> = Vec::new();

    for (username, conn) in subs.iter() {
        let mut writer = conn.writer.lock().await;
        let send_result = timeout(DELIVERY_TIMEOUT, async {
            writer.write_all(line.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            writer.flush().await?;
            Ok::<(), std::io::Error>(())
        })
        .await;

        match send_result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                debug!(user = %username, error = %e, "failed to deliver message");
                failed.push(username.clone());
            }
            Err(_) => {
                debug!(user = %username, "delivery timed out");
                failed.push(username.clone());
            }
        }
    }

    // Remove failed recipients (need to drop the read lock first)
    drop(subs);

    if !failed.is_empty() {
        let mut subs = subscribers.write().await;
        for username in failed {
            if let Some(conn) = subs.remove(&username) {
                conn.cancel.cancel();
                debug!(user = %username, "removed failed recipient");
            }
        }
    }
}

/// Errors that can occur in server operations.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to bind port {port}: {error}")]
    Bind { port: u16, error: String },
}
