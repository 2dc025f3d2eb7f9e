//! Outbound line rendering.

use netchat_core::{ChatMessage, MessageKind};

/// Renders a message as the line written to clients (without the trailing
/// newline).
///
/// System notifications and bot replies carry fixed prefixes so clients can
/// tell them apart from chat text; everything else is prefixed with the
/// sender's name.
pub fn render_line(msg: &ChatMessage) -> String {
    match msg.kind {
        MessageKind::System => format!("[SYSTEM] {}", msg.text),
        MessageKind::Statistics => format!("[BOT] {}", msg.text),
        MessageKind::User | MessageKind::Command => {
            format!("[{}] {}", msg.sender, msg.text)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netchat_core::Username;

    #[test]
    fn test_render_user_message() {
        let msg = ChatMessage::user(Username::new("alice"), "hello");
        assert_eq!(render_line(&msg), "[alice] hello");
    }

    #[test]
    fn test_render_system_message() {
        let msg = ChatMessage::system("alice joined the chat.");
        assert_eq!(render_line(&msg), "[SYSTEM] alice joined the chat.");
    }

    #[test]
    fn test_render_statistics_message() {
        let msg = ChatMessage::statistics("Total messages: 5");
        assert_eq!(render_line(&msg), "[BOT] Total messages: 5");
    }

    #[test]
    fn test_render_multiline_statistics() {
        let msg = ChatMessage::statistics("line one\nline two");
        assert_eq!(render_line(&msg), "[BOT] line one\nline two");
    }
}
