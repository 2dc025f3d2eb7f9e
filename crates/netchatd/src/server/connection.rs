//! Connection handler for individual client sessions.
//!
//! Each client connection gets its own `ConnectionHandler` that:
//! - Prompts for and registers a unique name
//! - Reads line-delimited text and classifies it (chat text vs. command)
//! - Applies the length check and the per-user rate limit before submission
//! - Deregisters on disconnect
//!
//! Admission failures (bad name, over-long message, rate limit) are
//! reported back to the session as plain-text diagnostics and are never
//! fatal to the connection.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, RwLock};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use netchat_core::Username;
use netchat_protocol::classify_line;

use crate::broker::BrokerHandle;
use crate::config::ServerConfig;
use crate::registry::RegistryHandle;

/// Type alias for a session's shared writer handle
pub type ClientWriter = Arc<Mutex<BufWriter<OwnedWriteHalf>>>;

/// A connected session as the broadcaster sees it.
pub struct ClientConnection {
    /// Writer for delivering broadcast messages
    pub writer: ClientWriter,

    /// Token that closes this session's connection when cancelled
    pub cancel: CancellationToken,
}

/// Type alias for the connected-sessions map
pub type SubscribersMap = Arc<RwLock<HashMap<Username, ClientConnection>>>;

/// Prompt sent before the name is read.
const NAME_PROMPT: &str = "Enter your name:";

/// How long a client gets to send its name.
const LOGIN_TIMEOUT: Duration = Duration::from_secs(60);

/// Write timeout for direct replies to this session.
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Hard cap on a single wire line (64 KB). Lines beyond this close the
/// connection; the polite per-message limit is configuration.
const MAX_LINE_BYTES: usize = 65_536;

/// Connection handler for a single client session.
pub struct ConnectionHandler {
    /// Buffered reader for incoming lines
    reader: BufReader<OwnedReadHalf>,

    /// Buffered writer, shared with the broadcaster once registered
    writer: ClientWriter,

    config: Arc<ServerConfig>,

    /// Handle to the session registry
    registry: RegistryHandle,

    /// Handle to the message broker
    broker: BrokerHandle,

    /// Shared map of connected sessions
    subscribers: SubscribersMap,

    /// Cancelled on eviction and on server shutdown
    cancel: CancellationToken,

    /// Connection number for log correlation
    connection_number: u64,
}

impl ConnectionHandler {
    pub fn new(
        stream: TcpStream,
        config: Arc<ServerConfig>,
        registry: RegistryHandle,
        broker: BrokerHandle,
        subscribers: SubscribersMap,
        cancel: CancellationToken,
        connection_number: u64,
    ) -> Self {
        let (reader, writer) = stream.into_split();
        Self {
            reader: BufReader::new(reader),
            writer: Arc::new(Mutex::new(BufWriter::new(writer))),
            config,
            registry,
            broker,
            subscribers,
            cancel,
            connection_number,
        }
    }

    /// Runs the connection: login, message loop, deregistration.
    pub async fn run(mut self) {
        let username = match self.handle_login().await {
            Ok(username) => username,
            Err(e) => {
                debug!(
                    connection = self.connection_number,
                    error = %e,
                    "login failed"
                );
                return;
            }
        };

        // Expose the writer to the broadcaster
        {
            let mut subs = self.subscribers.write().await;
            subs.insert(
                username.clone(),
                ClientConnection {
                    writer: Arc::clone(&self.writer),
                    cancel: self.cancel.clone(),
                },
            );
        }

        info!(
            user = %username,
            connection = self.connection_number,
            "client joined"
        );

        if let Err(e) = self.message_loop(&username).await {
            match e {
                ConnectionError::Eof => debug!(user = %username, "client sent EOF"),
                other => debug!(user = %username, error = %other, "connection closed"),
            }
        }

        self.disconnect(&username).await;
    }

    /// Prompts for a name, validates it, and registers the session.
    async fn handle_login(&mut self) -> Result<Username, ConnectionError> {
        self.send_line(NAME_PROMPT).await?;

        let line = match timeout(LOGIN_TIMEOUT, self.read_line()).await {
            Ok(result) => result?,
            Err(_) => {
                let _ = self.send_line("Login timed out. Connection closed.").await;
                return Err(ConnectionError::LoginTimeout);
            }
        };

        let username = match Username::parse(&line) {
            Ok(username) => username,
            Err(e) => {
                let _ = self
                    .send_line(&format!("{}. Connection closed.", capitalize(&e.to_string())))
                    .await;
                return Err(ConnectionError::Rejected(e.to_string()));
            }
        };

        if let Err(e) = self.registry.register(username.clone()).await {
            let _ = self
                .send_line(&format!("{}. Connection closed.", capitalize(&e.to_string())))
                .await;
            return Err(ConnectionError::Rejected(e.to_string()));
        }

        let welcome = format!(
            "Welcome to {}, {}! Type /help for commands.",
            self.config.server_name, username
        );
        if let Err(e) = self.send_line(&welcome).await {
            // Registered but unreachable: roll the registration back
            self.registry.unregister(username).await;
            return Err(e);
        }

        Ok(username)
    }

    /// Main read loop: check, classify, and submit each line.
    async fn message_loop(&mut self, username: &Username) -> Result<(), ConnectionError> {
        let cancel = self.cancel.clone();

        loop {
            let line = tokio::select! {
                biased;

                _ = cancel.cancelled() => return Ok(()),

                result = read_trimmed_line(&mut self.reader) => result?,
            };

            let text = line.trim();
            if text.is_empty() {
                continue;
            }

            if text.chars().count() > self.config.max_message_len {
                self.send_line(&format!(
                    "Message is too long (max {} characters).",
                    self.config.max_message_len
                ))
                .await?;
                continue;
            }

            if !self.registry.admit(username.clone()).await {
                self.send_line(&format!(
                    "Rate limit exceeded: max {} messages per {} seconds. Please slow down.",
                    self.config.rate_limit, self.config.rate_window_secs
                ))
                .await?;
                continue;
            }

            self.registry.touch(username.clone()).await;

            let msg = classify_line(username, text);
            if self.broker.submit(msg).await.is_err() {
                let _ = self.send_line("The server is shutting down.").await;
                return Ok(());
            }
        }
    }

    /// Deregisters the session and removes its writer.
    async fn disconnect(&self, username: &Username) {
        {
            let mut subs = self.subscribers.write().await;
            subs.remove(username);
        }

        // Idempotent: evicted sessions are already gone from the registry,
        // and their departure was announced by the sweep.
        let removed = self.registry.unregister(username.clone()).await;
        if removed {
            info!(user = %username, "client disconnected");
        } else {
            debug!(user = %username, "connection closed for deregistered session");
        }
    }

    async fn read_line(&mut self) -> Result<String, ConnectionError> {
        read_trimmed_line(&mut self.reader).await
    }

    /// Sends a single line directly to this session.
    async fn send_line(&self, line: &str) -> Result<(), ConnectionError> {
        let mut writer = self.writer.lock().await;

        match timeout(WRITE_TIMEOUT, async {
            writer.write_all(line.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            writer.flush().await?;
            Ok::<(), std::io::Error>(())
        })
        .await
        {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(ConnectionError::Io(e.to_string())),
            Err(_) => Err(ConnectionError::WriteTimeout),
        }
    }
}

/// Reads one line, stripped of its terminator.
async fn read_trimmed_line(
    reader: &mut BufReader<OwnedReadHalf>,
) -> Result<String, ConnectionError> {
    let mut line = String::new();

    let bytes_read = reader
        .read_line(&mut line)
        .await
        .map_err(|e| ConnectionError::Io(e.to_string()))?;

    if bytes_read == 0 {
        return Err(ConnectionError::Eof);
    }

    if line.len() > MAX_LINE_BYTES {
        return Err(ConnectionError::LineTooLarge {
            size: line.len(),
            max: MAX_LINE_BYTES,
        });
    }

    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

/// Upper-cases the first character of a diagnostic for client display.
fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

/// Errors that can occur during connection handling.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("i/o error: {0}")]
    Io(String),

    #[error("connection closed")]
    Eof,

    #[error("login timed out")]
    LoginTimeout,

    #[error("write timed out")]
    WriteTimeout,

    #[error("line too large: {size} bytes (max {max})")]
    LineTooLarge { size: usize, max: usize },

    #[error("registration rejected: {0}")]
    Rejected(String),
}
