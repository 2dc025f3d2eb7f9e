//! Session registry using the actor pattern.
//!
//! The registry is the single owner of connected-session state: who is
//! registered, when they were last active, and each session's rate-limiter
//! budget. It receives commands via a tokio mpsc channel and publishes
//! join/leave/eviction events via broadcast.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐     ┌──────────────────┐
//! │ ConnectionHandler│───▶│  RegistryActor  │────▶│ Broadcast Channel│
//! └─────────────────┘     └─────────────────┘     └──────────────────┘
//!         │                       │                        │
//!         │   RegistryCommand     │   RegistryEvent        ▼
//!         │   (mpsc channel)      │   (broadcast)     ChatServer turns
//!         ▼                       ▼                   events into
//!    register / admit /      HashMap<Username,       system messages
//!    touch / unregister        SessionEntry>
//! ```
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()` or `.expect()` in production code
//! - All fallible operations return `Result` or `Option`
//! - Channel operations handle closure gracefully

use std::time::Duration;
use tokio::sync::{broadcast, mpsc};

mod actor;
mod commands;
mod handle;

pub use actor::RegistryActor;
pub use commands::{RegistryCommand, RegistryError, RegistryEvent};
pub use handle::RegistryHandle;

/// Channel buffer sizes
const COMMAND_BUFFER: usize = 100;
const EVENT_BUFFER: usize = 100;

/// Spawns the registry actor and returns a handle for interaction.
///
/// # Arguments
///
/// * `max_sessions` - capacity cap; registrations beyond it are rejected
/// * `rate_limit` / `rate_window` - per-session rate-limiter parameters,
///   applied to the limiter created for each new entry
///
/// The idle sweep is driven externally (the broker's sweeper sends
/// [`RegistryCommand::SweepIdle`] through the handle on its interval).
pub fn spawn_registry(
    max_sessions: usize,
    rate_limit: u32,
    rate_window: Duration,
) -> RegistryHandle {
    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
    let (event_tx, _) = broadcast::channel(EVENT_BUFFER);

    let actor = RegistryActor::new(cmd_rx, event_tx.clone(), max_sessions, rate_limit, rate_window);
    tokio::spawn(actor.run());

    RegistryHandle::new(cmd_tx, event_tx)
}
