//! Protocol message types for chat connections.

use serde::{Deserialize, Serialize};
use std::fmt;
use trek_core::{ChatMessage, ParticipantName};

/// Raw envelope as read off the wire, before the command is recognized.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientEnvelope {
    /// Command name
    pub command: String,

    /// Command arguments, interpreted per command
    #[serde(default)]
    pub args: serde_json::Value,
}

/// Arguments of the `send_message` command.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendMessageArgs {
    /// Text body
    #[serde(default)]
    pub message: String,

    /// Whether this is a direct message
    #[serde(default)]
    pub private: bool,

    /// Target of a direct message
    #[serde(default)]
    pub recipient: String,
}

impl SendMessageArgs {
    /// Converts client arguments into a router message.
    ///
    /// The sender is left empty; the router stamps it.
    pub fn into_chat_message(self) -> ChatMessage {
        ChatMessage {
            message: self.message,
            private: self.private,
            recipient: ParticipantName::new(self.recipient),
            ..ChatMessage::default()
        }
    }
}

/// Commands a client may send to the daemon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", content = "args", rename_all = "snake_case")]
pub enum ClientCommand {
    /// Broadcast or direct chat message
    SendMessage(SendMessageArgs),
}

impl ClientCommand {
    /// Creates a broadcast message command.
    pub fn broadcast(message: impl Into<String>) -> Self {
        Self::SendMessage(SendMessageArgs {
            message: message.into(),
            ..SendMessageArgs::default()
        })
    }

    /// Creates a private message command.
    pub fn private(recipient: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SendMessage(SendMessageArgs {
            message: message.into(),
            private: true,
            recipient: recipient.into(),
        })
    }
}

/// Stable error codes reported to the originating client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Private message target is not in the chat room
    NoSuchRecipient,
    /// Recipient's connection failed while delivering
    DeliveryFailed,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoSuchRecipient => write!(f, "no_such_recipient"),
            Self::DeliveryFailed => write!(f, "delivery_failed"),
        }
    }
}

/// Commands sent from the daemon to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", content = "args", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Sent once, right after join
    Welcome {
        /// Name assigned to this participant
        name: ParticipantName,
    },

    /// Broadcast, direct message or sender echo
    Message(ChatMessage),

    /// Membership changed
    Users {
        /// Sorted list of current participants
        users: Vec<ParticipantName>,
    },

    /// Failure report for the originating sender
    Error {
        /// Stable machine-readable code
        error_code: ErrorCode,
        /// Human-readable explanation
        message: String,
    },
}

impl ServerMessage {
    /// Creates a welcome command.
    pub fn welcome(name: ParticipantName) -> Self {
        Self::Welcome { name }
    }

    /// Creates a message command.
    pub fn message(message: ChatMessage) -> Self {
        Self::Message(message)
    }

    /// Creates a membership command.
    pub fn users(users: Vec<ParticipantName>) -> Self {
        Self::Users { users }
    }

    /// Creates an error command.
    pub fn error(error_code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Error {
            error_code,
            message: message.into(),
        }
    }

    /// Returns the wire command name.
    pub fn command(&self) -> &'static str {
        match self {
            Self::Welcome { .. } => "welcome",
            Self::Message(_) => "message",
            Self::Users { .. } => "users",
            Self::Error { .. } => "error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_message_envelope_shape() {
        let msg = ServerMessage::welcome(ParticipantName::new("cadet#42"));
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["command"], "welcome");
        assert_eq!(json["args"]["name"], "cadet#42");
    }

    #[test]
    fn test_error_envelope_uses_stable_code() {
        let msg = ServerMessage::error(ErrorCode::NoSuchRecipient, "\"worf\" is not in the chat room.");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["command"], "error");
        assert_eq!(json["args"]["error_code"], "no_such_recipient");
        assert_eq!(msg.command(), "error");
    }

    #[test]
    fn test_message_envelope_carries_all_fields() {
        let chat = ChatMessage::private_to("data", "hello").stamped(&ParticipantName::new("geordi"));
        let json = serde_json::to_value(ServerMessage::message(chat.echo())).unwrap();
        assert_eq!(json["command"], "message");
        assert_eq!(json["args"]["sender"], "geordi");
        assert_eq!(json["args"]["recipient"], "data");
        assert_eq!(json["args"]["private"], true);
        assert_eq!(json["args"]["from_me"], true);
    }

    #[test]
    fn test_client_command_envelope_shape() {
        let json = serde_json::to_value(ClientCommand::private("worf", "qapla")).unwrap();
        assert_eq!(json["command"], "send_message");
        assert_eq!(json["args"]["recipient"], "worf");
        assert_eq!(json["args"]["private"], true);
    }

    #[test]
    fn test_error_code_display_matches_wire() {
        for code in [ErrorCode::NoSuchRecipient, ErrorCode::DeliveryFailed] {
            let wire = serde_json::to_value(code).unwrap();
            assert_eq!(wire, code.to_string());
        }
    }
}
