//! Registry actor - owns all session state and processes commands.
//!
//! The actor is the single owner of session entries. It runs in one task
//! and processes commands sequentially, so every operation is atomic with
//! respect to every other and snapshot reads can never tear.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use netchat_core::Username;

use crate::limiter::RateLimiter;

use super::commands::{RegistryCommand, RegistryError, RegistryEvent};

/// State held for one registered session.
///
/// The rate limiter is owned exclusively by the entry; it is created at
/// registration and dropped with it.
struct SessionEntry {
    last_activity: DateTime<Utc>,
    limiter: RateLimiter,
}

/// The registry actor - owns all session state.
///
/// Receives commands via an mpsc channel, processes them sequentially, and
/// publishes events to subscribers.
pub struct RegistryActor {
    /// Command receiver
    receiver: mpsc::Receiver<RegistryCommand>,

    /// Session storage keyed by the unique username
    sessions: HashMap<Username, SessionEntry>,

    /// Event publisher for the server layer
    event_publisher: broadcast::Sender<RegistryEvent>,

    /// Capacity cap for registrations
    max_sessions: usize,

    /// Rate-limiter parameters for new entries
    rate_limit: u32,
    rate_window: Duration,
}

impl RegistryActor {
    pub fn new(
        receiver: mpsc::Receiver<RegistryCommand>,
        event_publisher: broadcast::Sender<RegistryEvent>,
        max_sessions: usize,
        rate_limit: u32,
        rate_window: Duration,
    ) -> Self {
        Self {
            receiver,
            sessions: HashMap::new(),
            event_publisher,
            max_sessions,
            rate_limit,
            rate_window,
        }
    }

    /// Runs the actor event loop.
    ///
    /// Processes commands until the channel closes (all handles dropped).
    pub async fn run(mut self) {
        info!(max_sessions = self.max_sessions, "registry actor starting");

        while let Some(cmd) = self.receiver.recv().await {
            self.handle_command(cmd);
        }

        info!(sessions = self.sessions.len(), "registry actor stopped");
    }

    /// Dispatches a command to the appropriate handler.
    fn handle_command(&mut self, cmd: RegistryCommand) {
        match cmd {
            RegistryCommand::Register {
                username,
                respond_to,
            } => {
                let result = self.handle_register(username);
                // Ignore send error - caller may have dropped the receiver
                let _ = respond_to.send(result);
            }
            RegistryCommand::Unregister {
                username,
                respond_to,
            } => {
                let removed = self.handle_unregister(&username);
                let _ = respond_to.send(removed);
            }
            RegistryCommand::Touch { username } => {
                self.handle_touch(&username);
            }
            RegistryCommand::Admit {
                username,
                respond_to,
            } => {
                let admitted = self.handle_admit(&username);
                let _ = respond_to.send(admitted);
            }
            RegistryCommand::Snapshot { respond_to } => {
                let _ = respond_to.send(self.sessions.keys().cloned().collect());
            }
            RegistryCommand::Count { respond_to } => {
                let _ = respond_to.send(self.sessions.len());
            }
            RegistryCommand::SweepIdle { timeout } => {
                self.handle_sweep_idle(timeout);
            }
        }
    }

    // ========================================================================
    // Command Handlers
    // ========================================================================

    fn handle_register(&mut self, username: Username) -> Result<(), RegistryError> {
        if self.sessions.contains_key(&username) {
            debug!(user = %username, "name already registered, rejecting");
            return Err(RegistryError::AlreadyRegistered(username));
        }

        if self.sessions.len() >= self.max_sessions {
            warn!(
                user = %username,
                current = self.sessions.len(),
                max = self.max_sessions,
                "registry is full, rejecting registration"
            );
            return Err(RegistryError::ServerFull {
                max: self.max_sessions,
            });
        }

        self.sessions.insert(
            username.clone(),
            SessionEntry {
                last_activity: Utc::now(),
                limiter: RateLimiter::new(self.rate_limit, self.rate_window),
            },
        );

        info!(
            user = %username,
            total_sessions = self.sessions.len(),
            "session registered"
        );

        // Publish event (ignore if no subscribers)
        let _ = self.event_publisher.send(RegistryEvent::Joined { username });

        Ok(())
    }

    fn handle_unregister(&mut self, username: &Username) -> bool {
        if self.sessions.remove(username).is_none() {
            debug!(user = %username, "unregister for unknown name, ignoring");
            return false;
        }

        info!(
            user = %username,
            remaining_sessions = self.sessions.len(),
            "session removed"
        );

        let _ = self.event_publisher.send(RegistryEvent::Left {
            username: username.clone(),
        });

        true
    }

    fn handle_touch(&mut self, username: &Username) {
        if let Some(entry) = self.sessions.get_mut(username) {
            entry.last_activity = Utc::now();
        }
    }

    fn handle_admit(&mut self, username: &Username) -> bool {
        match self.sessions.get(username) {
            Some(entry) => entry.limiter.admit(),
            None => {
                debug!(user = %username, "admit check for unregistered name");
                false
            }
        }
    }

    /// Removes every entry idle longer than `timeout`.
    ///
    /// Each eviction is logged and published so the server layer can notify
    /// the chat and close the connection.
    fn handle_sweep_idle(&mut self, timeout: Duration) {
        let now = Utc::now();

        let expired: Vec<(Username, Duration)> = self
            .sessions
            .iter()
            .filter_map(|(name, entry)| {
                let idle = now
                    .signed_duration_since(entry.last_activity)
                    .to_std()
                    .unwrap_or_default();
                (idle > timeout).then(|| (name.clone(), idle))
            })
            .collect();

        if expired.is_empty() {
            debug!("no idle sessions to evict");
            return;
        }

        for (username, idle) in expired {
            self.sessions.remove(&username);

            warn!(
                user = %username,
                idle_secs = idle.as_secs(),
                remaining_sessions = self.sessions.len(),
                "session evicted by idle sweep"
            );

            let _ = self
                .event_publisher
                .send(RegistryEvent::Evicted { username, idle });
        }
    }

    // ========================================================================
    // Accessors (for testing)
    // ========================================================================

    /// Returns the number of sessions currently registered.
    #[cfg(test)]
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}
