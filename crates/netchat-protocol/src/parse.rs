//! Inbound line classification and command parsing.

use netchat_core::{ChatMessage, Username};
use thiserror::Error;

/// Marker prefix that turns a line into a bot command.
pub const COMMAND_MARKER: char = '/';

/// Maximum length of a command argument in bytes.
pub const MAX_COMMAND_ARG_LEN: usize = 128;

/// A command line split into its parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCommand {
    /// Command name, lower-cased (matching is case-insensitive)
    pub name: String,

    /// Everything after the name, trimmed. Empty when absent.
    pub args: String,
}

/// Errors that can occur while parsing a command line.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandParseError {
    /// The argument exceeds [`MAX_COMMAND_ARG_LEN`].
    #[error("command argument is too long: {len} bytes (max {max})")]
    ArgumentTooLong { len: usize, max: usize },
}

/// Returns true when the line is a bot command.
pub fn is_command(line: &str) -> bool {
    line.starts_with(COMMAND_MARKER)
}

/// Wraps an inbound line as a typed message for the given sender.
///
/// Marker-prefixed lines become commands, everything else ordinary user
/// messages. The line is taken as-is; length checks happen at the transport
/// before this call.
pub fn classify_line(sender: &Username, line: &str) -> ChatMessage {
    if is_command(line) {
        ChatMessage::command(sender.clone(), line)
    } else {
        ChatMessage::user(sender.clone(), line)
    }
}

/// Splits a command line into its name and single argument string.
///
/// The leading marker is stripped if present, the first whitespace-delimited
/// token becomes the (lower-cased) name, and the trimmed remainder the
/// argument. Arguments longer than [`MAX_COMMAND_ARG_LEN`] are rejected so a
/// hostile line cannot be echoed back at full size.
pub fn parse_command(text: &str) -> Result<ParsedCommand, CommandParseError> {
    let body = text.strip_prefix(COMMAND_MARKER).unwrap_or(text);

    let mut parts = body.trim().splitn(2, char::is_whitespace);
    let name = parts.next().unwrap_or("").to_lowercase();
    let args = parts.next().unwrap_or("").trim().to_string();

    if args.len() > MAX_COMMAND_ARG_LEN {
        return Err(CommandParseError::ArgumentTooLong {
            len: args.len(),
            max: MAX_COMMAND_ARG_LEN,
        });
    }

    Ok(ParsedCommand { name, args })
}
