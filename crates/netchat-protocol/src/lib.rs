//! NetChat wire protocol.
//!
//! The wire format is plain newline-terminated UTF-8 text. This crate owns
//! the two boundaries of that format:
//!
//! - `parse` - classifying an inbound line as chat text or a bot command,
//!   and splitting a command into its name and bounded argument
//! - `format` - rendering an outbound [`ChatMessage`](netchat_core::ChatMessage)
//!   into the line written to every client

pub mod format;
pub mod parse;

pub use format::render_line;
pub use parse::{
    classify_line, is_command, parse_command, CommandParseError, ParsedCommand, COMMAND_MARKER,
    MAX_COMMAND_ARG_LEN,
};
