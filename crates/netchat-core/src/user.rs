//! Username value object.

use crate::error::{DomainError, DomainResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum length of a username in characters.
pub const MAX_USERNAME_CHARS: usize = 32;

/// The display name a connected session registers under.
///
/// A `Username` is the identity key for the session registry, the rate
/// limiter, and the statistics aggregator. Two constructors exist:
/// [`Username::parse`] validates user-supplied input at the transport
/// boundary, while [`Username::new`] is for internal identities (the system
/// and bot senders) that never come from the wire.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Username(String);

impl Username {
    /// Creates a username without validation.
    ///
    /// Only for identities that do not originate from client input.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Parses and validates a user-supplied name.
    ///
    /// The input is trimmed; empty or whitespace-only names, names longer
    /// than [`MAX_USERNAME_CHARS`] characters, and names containing control
    /// characters are rejected.
    pub fn parse(input: &str) -> DomainResult<Self> {
        let trimmed = input.trim();

        if trimmed.is_empty() {
            return Err(DomainError::EmptyUsername);
        }
        if trimmed.chars().count() > MAX_USERNAME_CHARS {
            return Err(DomainError::UsernameTooLong {
                max: MAX_USERNAME_CHARS,
            });
        }
        if trimmed.chars().any(char::is_control) {
            return Err(DomainError::InvalidUsername);
        }

        Ok(Self(trimmed.to_string()))
    }

    /// Returns the underlying string reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Username {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Username {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for Username {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for Username {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_name() {
        let name = Username::parse("alice").expect("valid name");
        assert_eq!(name.as_str(), "alice");
    }

    #[test]
    fn test_parse_trims_whitespace() {
        let name = Username::parse("  bob  ").expect("valid name");
        assert_eq!(name.as_str(), "bob");
    }

    #[test]
    fn test_parse_rejects_empty() {
        assert_eq!(Username::parse(""), Err(DomainError::EmptyUsername));
        assert_eq!(Username::parse("   "), Err(DomainError::EmptyUsername));
        assert_eq!(Username::parse("\t\n"), Err(DomainError::EmptyUsername));
    }

    #[test]
    fn test_parse_rejects_too_long() {
        let long = "x".repeat(MAX_USERNAME_CHARS + 1);
        assert_eq!(
            Username::parse(&long),
            Err(DomainError::UsernameTooLong {
                max: MAX_USERNAME_CHARS
            })
        );

        // Exactly at the limit is fine
        let limit = "x".repeat(MAX_USERNAME_CHARS);
        assert!(Username::parse(&limit).is_ok());
    }

    #[test]
    fn test_parse_rejects_control_characters() {
        assert_eq!(
            Username::parse("al\x07ice"),
            Err(DomainError::InvalidUsername)
        );
    }

    #[test]
    fn test_parse_accepts_cyrillic() {
        let name = Username::parse("вася").expect("cyrillic name");
        assert_eq!(name.as_str(), "вася");
    }

    #[test]
    fn test_display_and_as_ref() {
        let name = Username::new("carol");
        assert_eq!(name.to_string(), "carol");
        assert_eq!(name.as_ref(), "carol");
    }
}
