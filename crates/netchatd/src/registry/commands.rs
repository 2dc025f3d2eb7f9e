//! Registry actor commands, errors, and events.
//!
//! Message types for communicating with the `RegistryActor`:
//! - `RegistryCommand`: commands sent to the actor
//! - `RegistryError`: errors registry operations can produce
//! - `RegistryEvent`: events published for subscribers

use netchat_core::Username;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;

/// Commands sent to the registry actor.
///
/// Request-response commands carry a oneshot channel for the reply;
/// fire-and-forget commands (touch, sweep) carry none.
#[derive(Debug)]
pub enum RegistryCommand {
    /// Register a new session under a unique name.
    ///
    /// # Errors
    /// - `RegistryError::AlreadyRegistered` if the name is taken
    /// - `RegistryError::ServerFull` at maximum capacity
    Register {
        username: Username,
        respond_to: oneshot::Sender<Result<(), RegistryError>>,
    },

    /// Remove a session. Idempotent: removing an absent name is a no-op.
    ///
    /// Responds with whether an entry was actually removed.
    Unregister {
        username: Username,
        respond_to: oneshot::Sender<bool>,
    },

    /// Update a session's last-activity timestamp.
    ///
    /// Fire-and-forget; silently ignored for unknown names.
    Touch { username: Username },

    /// Check the session's rate limiter for one message admission.
    ///
    /// Responds `false` for unknown names - messages from an unregistered
    /// identity are never routed.
    Admit {
        username: Username,
        respond_to: oneshot::Sender<bool>,
    },

    /// Get a point-in-time copy of all registered names.
    Snapshot {
        respond_to: oneshot::Sender<Vec<Username>>,
    },

    /// Number of registered sessions.
    Count { respond_to: oneshot::Sender<usize> },

    /// Remove every session idle longer than `timeout`.
    ///
    /// Fire-and-forget; evictions surface as `RegistryEvent::Evicted`.
    SweepIdle { timeout: Duration },
}

/// Errors that can occur during registry operations.
#[derive(Debug, Clone, Error)]
pub enum RegistryError {
    /// A session with this name already exists.
    #[error("name already taken: {0}")]
    AlreadyRegistered(Username),

    /// The registry has reached its session capacity.
    #[error("server is full (max {max} sessions)")]
    ServerFull { max: usize },

    /// The actor has shut down.
    #[error("registry channel closed")]
    ChannelClosed,
}

/// Events published by the registry to subscribers.
///
/// The server layer turns these into system messages for the chat and,
/// for evictions, closes the session's connection.
#[derive(Debug, Clone)]
pub enum RegistryEvent {
    /// A session registered successfully.
    Joined { username: Username },

    /// A session deregistered (explicit disconnect).
    Left { username: Username },

    /// A session was removed by the idle sweep.
    Evicted { username: Username, idle: Duration },
}
