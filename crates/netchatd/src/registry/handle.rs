//! Client interface for interacting with the RegistryActor.
//!
//! The `RegistryHandle` is a cheap-to-clone interface for sending commands
//! to the registry actor and subscribing to registry events. Channel errors
//! are mapped to `RegistryError::ChannelClosed` or to conservative defaults
//! (deny admission, empty snapshot) - the handle never panics.

use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot};

use netchat_core::Username;

use super::commands::{RegistryCommand, RegistryError, RegistryEvent};

/// Handle for interacting with the registry actor.
///
/// Clone freely and share across tasks; all methods communicate with the
/// actor via channels.
#[derive(Clone)]
pub struct RegistryHandle {
    /// Command sender to the actor
    sender: mpsc::Sender<RegistryCommand>,

    /// Event broadcaster for subscribing to updates
    event_sender: broadcast::Sender<RegistryEvent>,
}

impl RegistryHandle {
    pub fn new(
        sender: mpsc::Sender<RegistryCommand>,
        event_sender: broadcast::Sender<RegistryEvent>,
    ) -> Self {
        Self {
            sender,
            event_sender,
        }
    }

    /// Registers a new session under a unique name.
    ///
    /// # Errors
    ///
    /// - `RegistryError::AlreadyRegistered` if the name is taken
    /// - `RegistryError::ServerFull` at maximum capacity
    /// - `RegistryError::ChannelClosed` if the actor has shut down
    pub async fn register(&self, username: Username) -> Result<(), RegistryError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(RegistryCommand::Register {
                username,
                respond_to: tx,
            })
            .await
            .map_err(|_| RegistryError::ChannelClosed)?;

        rx.await.map_err(|_| RegistryError::ChannelClosed)?
    }

    /// Removes a session. Idempotent - removing an absent name is a no-op.
    ///
    /// Returns whether an entry was actually removed; `false` also covers a
    /// shut-down actor.
    pub async fn unregister(&self, username: Username) -> bool {
        let (tx, rx) = oneshot::channel();

        if self
            .sender
            .send(RegistryCommand::Unregister {
                username,
                respond_to: tx,
            })
            .await
            .is_err()
        {
            return false;
        }

        rx.await.unwrap_or(false)
    }

    /// Updates a session's last-activity timestamp.
    ///
    /// Fire-and-forget; unknown names are silently ignored.
    pub async fn touch(&self, username: Username) {
        let _ = self.sender.send(RegistryCommand::Touch { username }).await;
    }

    /// Checks the session's rate limiter for one message admission.
    ///
    /// Returns `false` for unknown names and when the actor has shut down.
    pub async fn admit(&self, username: Username) -> bool {
        let (tx, rx) = oneshot::channel();

        if self
            .sender
            .send(RegistryCommand::Admit {
                username,
                respond_to: tx,
            })
            .await
            .is_err()
        {
            return false;
        }

        rx.await.unwrap_or(false)
    }

    /// Point-in-time copy of all registered names.
    ///
    /// Returns an empty vector when the actor has shut down.
    pub async fn snapshot_active(&self) -> Vec<Username> {
        let (tx, rx) = oneshot::channel();

        if self
            .sender
            .send(RegistryCommand::Snapshot { respond_to: tx })
            .await
            .is_err()
        {
            return Vec::new();
        }

        rx.await.unwrap_or_default()
    }

    /// Number of registered sessions.
    pub async fn count(&self) -> usize {
        let (tx, rx) = oneshot::channel();

        if self
            .sender
            .send(RegistryCommand::Count { respond_to: tx })
            .await
            .is_err()
        {
            return 0;
        }

        rx.await.unwrap_or(0)
    }

    /// Removes every session idle longer than `timeout`.
    ///
    /// Fire-and-forget; evictions surface as [`RegistryEvent::Evicted`].
    pub async fn sweep_idle(&self, timeout: Duration) {
        let _ = self
            .sender
            .send(RegistryCommand::SweepIdle { timeout })
            .await;
    }

    /// Subscribes to registry events (joins, leaves, evictions).
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.event_sender.subscribe()
    }

    /// Checks if the actor is still running.
    pub fn is_connected(&self) -> bool {
        !self.sender.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_handle() -> (RegistryHandle, mpsc::Receiver<RegistryCommand>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(16);
        let (event_tx, _event_rx) = broadcast::channel(16);
        let handle = RegistryHandle::new(cmd_tx, event_tx);
        (handle, cmd_rx)
    }

    #[tokio::test]
    async fn test_register_sends_command() {
        let (handle, mut rx) = create_test_handle();

        let cmd_handler = tokio::spawn(async move {
            if let Some(RegistryCommand::Register {
                username,
                respond_to,
            }) = rx.recv().await
            {
                assert_eq!(username.as_str(), "alice");
                let _ = respond_to.send(Ok(()));
                return true;
            }
            false
        });

        let result = handle.register(Username::new("alice")).await;
        assert!(result.is_ok());
        assert!(cmd_handler.await.unwrap());
    }

    #[tokio::test]
    async fn test_register_channel_closed_error() {
        let (handle, rx) = create_test_handle();
        drop(rx);

        let result = handle.register(Username::new("alice")).await;
        assert!(matches!(result, Err(RegistryError::ChannelClosed)));
    }

    #[tokio::test]
    async fn test_admit_denies_on_closed_channel() {
        let (handle, rx) = create_test_handle();
        drop(rx);

        assert!(!handle.admit(Username::new("alice")).await);
    }

    #[tokio::test]
    async fn test_snapshot_empty_on_closed_channel() {
        let (handle, rx) = create_test_handle();
        drop(rx);

        assert!(handle.snapshot_active().await.is_empty());
    }

    #[tokio::test]
    async fn test_touch_ignores_closed_channel() {
        let (handle, rx) = create_test_handle();
        drop(rx);

        // Should not panic or error
        handle.touch(Username::new("alice")).await;
    }

    #[tokio::test]
    async fn test_sweep_idle_fire_and_forget() {
        let (handle, mut rx) = create_test_handle();

        let cmd_handler = tokio::spawn(async move {
            matches!(
                rx.recv().await,
                Some(RegistryCommand::SweepIdle { timeout }) if timeout == Duration::from_secs(300)
            )
        });

        handle.sweep_idle(Duration::from_secs(300)).await;
        assert!(cmd_handler.await.unwrap());
    }

    #[tokio::test]
    async fn test_subscribe_returns_receiver() {
        let (handle, _rx) = create_test_handle();
        let _subscriber = handle.subscribe();
    }

    #[tokio::test]
    async fn test_is_connected() {
        let (handle, rx) = create_test_handle();
        assert!(handle.is_connected());

        drop(rx);
        // Need a send attempt to observe closure
        let _ = handle
            .sender
            .send(RegistryCommand::Touch {
                username: Username::new("alice"),
            })
            .await;
        assert!(!handle.is_connected());
    }
}
