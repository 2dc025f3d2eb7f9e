//! NetChat Core - Shared domain types for the chat server
//!
//! This crate provides the domain types shared between the wire protocol
//! crate and the daemon (netchatd): chat messages, usernames, and domain
//! errors.
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()` in production paths.

pub mod error;
pub mod message;
pub mod user;

// Re-exports for convenience
pub use error::{DomainError, DomainResult};
pub use message::{ChatMessage, MessageKind, BOT_NAME, SYSTEM_NAME};
pub use user::{Username, MAX_USERNAME_CHARS};
