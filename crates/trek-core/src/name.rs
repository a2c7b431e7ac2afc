//! Participant identity: display names and variant tags.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{DomainError, DomainResult};

// ============================================================================
// Type-Safe Identifiers
// ============================================================================

/// Maximum length of a display name, in characters.
pub const MAX_NAME_LEN: usize = 64;

/// Display name of a chat participant.
///
/// Names are assigned by the server on join and never change afterwards.
/// They are unique across all currently registered participants.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantName(String);

impl ParticipantName {
    /// Creates a name without validation.
    ///
    /// Used for server-generated names (themed pool, synthetic names) and
    /// for recipient names taken verbatim from clients, which only ever
    /// serve as lookup keys.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Creates a validated name.
    ///
    /// Rejects empty names, names longer than [`MAX_NAME_LEN`] and names
    /// containing whitespace or control characters.
    pub fn parse(name: &str) -> DomainResult<Self> {
        if name.trim().is_empty() {
            return Err(DomainError::EmptyName);
        }

        let len = name.chars().count();
        if len > MAX_NAME_LEN {
            return Err(DomainError::NameTooLong {
                len,
                max: MAX_NAME_LEN,
            });
        }

        if name.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(DomainError::InvalidCharacters {
                name: name.to_string(),
            });
        }

        Ok(Self(name.to_string()))
    }

    /// Returns the underlying string reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true if the name starts with the given prefix.
    #[must_use]
    pub fn has_prefix(&self, prefix: &str) -> bool {
        self.0.starts_with(prefix)
    }
}

impl fmt::Display for ParticipantName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ParticipantName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ParticipantName {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for ParticipantName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::borrow::Borrow<str> for ParticipantName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

// ============================================================================
// Participant Kind
// ============================================================================

/// Which variant of participant sits behind a registry entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantKind {
    /// Interactive participant backed by a network connection
    Connection,
    /// Autonomous participant posting scripted messages on a timer
    Bot,
    /// Adversarial participant that periodically stalls the registry
    Stall,
}

impl ParticipantKind {
    /// Returns true for timer-driven participants with no connection.
    pub fn is_autonomous(self) -> bool {
        matches!(self, Self::Bot | Self::Stall)
    }
}

impl fmt::Display for ParticipantKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connection => write!(f, "connection"),
            Self::Bot => write!(f, "bot"),
            Self::Stall => write!(f, "stall"),
        }
    }
}
