//! Chat message value type.

use crate::user::Username;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Sender name used for server-generated system notifications.
pub const SYSTEM_NAME: &str = "Server";

/// Sender name used for bot-generated statistics and command replies.
pub const BOT_NAME: &str = "StatBot";

/// Classification of a message flowing through the routing pipeline.
///
/// The kind decides how the broker routes the message: user messages go to
/// both the broadcast and analytics paths, commands go to analytics only,
/// and system/statistics messages go to broadcast only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// Ordinary chat text from a connected user.
    User,
    /// Server-generated notification (joined, left, evicted).
    System,
    /// Bot command from a user (marker-prefixed line).
    Command,
    /// Bot reply carrying statistics or command output.
    Statistics,
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::System => write!(f, "system"),
            Self::Command => write!(f, "command"),
            Self::Statistics => write!(f, "statistics"),
        }
    }
}

/// An immutable chat message.
///
/// Created once at the point of ingestion (session read, system event, or
/// bot reply) and never mutated afterwards; queue stages pass it by value
/// and clone it for fan-out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Routing classification
    pub kind: MessageKind,

    /// Identity of the sender
    pub sender: Username,

    /// Message body (UTF-8, length-bounded at the transport)
    pub text: String,

    /// When the message was created
    pub sent_at: DateTime<Utc>,
}

impl ChatMessage {
    fn create(kind: MessageKind, sender: Username, text: impl Into<String>) -> Self {
        Self {
            kind,
            sender,
            text: text.into(),
            sent_at: Utc::now(),
        }
    }

    /// Creates an ordinary user chat message.
    pub fn user(sender: Username, text: impl Into<String>) -> Self {
        Self::create(MessageKind::User, sender, text)
    }

    /// Creates a bot command message.
    pub fn command(sender: Username, text: impl Into<String>) -> Self {
        Self::create(MessageKind::Command, sender, text)
    }

    /// Creates a server-generated system notification.
    pub fn system(text: impl Into<String>) -> Self {
        Self::create(MessageKind::System, Username::new(SYSTEM_NAME), text)
    }

    /// Creates a bot statistics reply.
    pub fn statistics(text: impl Into<String>) -> Self {
        Self::create(MessageKind::Statistics, Username::new(BOT_NAME), text)
    }
}

impl fmt::Display for ChatMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.sent_at, self.sender, self.text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_message_fields() {
        let msg = ChatMessage::user(Username::new("alice"), "hello world");
        assert_eq!(msg.kind, MessageKind::User);
        assert_eq!(msg.sender.as_str(), "alice");
        assert_eq!(msg.text, "hello world");
    }

    #[test]
    fn test_system_message_sender() {
        let msg = ChatMessage::system("alice joined the chat.");
        assert_eq!(msg.kind, MessageKind::System);
        assert_eq!(msg.sender.as_str(), SYSTEM_NAME);
    }

    #[test]
    fn test_statistics_message_sender() {
        let msg = ChatMessage::statistics("report");
        assert_eq!(msg.kind, MessageKind::Statistics);
        assert_eq!(msg.sender.as_str(), BOT_NAME);
    }

    #[test]
    fn test_command_message() {
        let msg = ChatMessage::command(Username::new("bob"), "/help");
        assert_eq!(msg.kind, MessageKind::Command);
        assert_eq!(msg.text, "/help");
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(MessageKind::User.to_string(), "user");
        assert_eq!(MessageKind::System.to_string(), "system");
        assert_eq!(MessageKind::Command.to_string(), "command");
        assert_eq!(MessageKind::Statistics.to_string(), "statistics");
    }
}
