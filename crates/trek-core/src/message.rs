//! Chat message value type.

use serde::{Deserialize, Serialize};

use crate::name::ParticipantName;

/// A unit of chat content as it travels through the router.
///
/// `sender` and `from_me` are never taken from clients: the router stamps
/// the authenticated sender onto every dispatched message, and `from_me`
/// is only set on the echo returned to the originator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Text body
    #[serde(default)]
    pub message: String,

    /// Whether this is a direct message to `recipient`
    #[serde(default)]
    pub private: bool,

    /// Target of a private message (ignored for broadcasts)
    #[serde(default)]
    pub recipient: ParticipantName,

    /// Server-assigned sender
    #[serde(default)]
    pub sender: ParticipantName,

    /// Set only on the copy echoed back to the sender
    #[serde(default)]
    pub from_me: bool,
}

impl ChatMessage {
    /// Creates a broadcast message.
    pub fn broadcast(text: impl Into<String>) -> Self {
        Self {
            message: text.into(),
            ..Self::default()
        }
    }

    /// Creates a private message for `recipient`.
    pub fn private_to(recipient: impl Into<ParticipantName>, text: impl Into<String>) -> Self {
        Self {
            message: text.into(),
            private: true,
            recipient: recipient.into(),
            ..Self::default()
        }
    }

    /// Returns a copy stamped with the authenticated sender.
    ///
    /// Clears `from_me` so a client cannot smuggle an echo flag through.
    #[must_use]
    pub fn stamped(mut self, sender: &ParticipantName) -> Self {
        self.sender = sender.clone();
        self.from_me = false;
        self
    }

    /// Returns the echo copy for the originating participant.
    #[must_use]
    pub fn echo(&self) -> Self {
        Self {
            from_me: true,
            ..self.clone()
        }
    }
}
