//! Line encoding and decoding of protocol envelopes.
//!
//! Decoding is two-staged on the server side: the envelope is parsed
//! first so an unknown command can be told apart from malformed JSON,
//! then the arguments are interpreted for the recognized command.

use serde::Serialize;
use thiserror::Error;

use crate::message::{ClientCommand, ClientEnvelope, SendMessageArgs, ServerMessage};

/// Errors that can occur while decoding or encoding envelopes.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// The line is not a JSON envelope
    #[error("Malformed envelope: {0}")]
    Malformed(String),

    /// The envelope names a command this server does not know
    #[error("Unrecognized command: {0}")]
    UnrecognizedCommand(String),

    /// The command is known but its arguments do not fit
    #[error("Invalid arguments for {command}: {reason}")]
    InvalidArgs { command: String, reason: String },

    /// Serialization failed
    #[error("Encoding failed: {0}")]
    Encode(String),
}

/// Decodes one line sent by a client.
pub fn decode_client_line(line: &str) -> Result<ClientCommand, ProtocolError> {
    let envelope: ClientEnvelope =
        serde_json::from_str(line.trim()).map_err(|e| ProtocolError::Malformed(e.to_string()))?;

    match envelope.command.as_str() {
        "send_message" => {
            // Missing args means "all defaults", like an empty object.
            let args = if envelope.args.is_null() {
                SendMessageArgs::default()
            } else {
                serde_json::from_value(envelope.args).map_err(|e| ProtocolError::InvalidArgs {
                    command: envelope.command.clone(),
                    reason: e.to_string(),
                })?
            };
            Ok(ClientCommand::SendMessage(args))
        }
        _ => Err(ProtocolError::UnrecognizedCommand(envelope.command)),
    }
}

/// Decodes one line sent by the daemon.
pub fn decode_server_line(line: &str) -> Result<ServerMessage, ProtocolError> {
    serde_json::from_str(line.trim()).map_err(|e| ProtocolError::Malformed(e.to_string()))
}

/// Encodes an envelope as a single line, without the trailing newline.
pub fn encode_line<T: Serialize>(msg: &T) -> Result<String, ProtocolError> {
    serde_json::to_string(msg).map_err(|e| ProtocolError::Encode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::ErrorCode;
    use trek_core::ParticipantName;

    #[test]
    fn test_decode_send_message() {
        let line = r#"{"command":"send_message","args":{"message":"Tea. Earl Grey. Hot.","private":true,"recipient":"data"}}"#;
        let cmd = decode_client_line(line).unwrap();
        assert_eq!(cmd, ClientCommand::private("data", "Tea. Earl Grey. Hot."));
    }

    #[test]
    fn test_decode_browser_style_broadcast() {
        // Browsers omit private/recipient for broadcasts.
        let line = r#"{"command":"send_message","args":{"message":"hello"}}"#;
        assert_eq!(
            decode_client_line(line).unwrap(),
            ClientCommand::broadcast("hello")
        );
    }

    #[test]
    fn test_decode_missing_args() {
        let cmd = decode_client_line(r#"{"command":"send_message"}"#).unwrap();
        assert_eq!(cmd, ClientCommand::SendMessage(SendMessageArgs::default()));
    }

    #[test]
    fn test_decode_unknown_command() {
        let err = decode_client_line(r#"{"command":"beam_me_up","args":{}}"#).unwrap_err();
        assert_eq!(err, ProtocolError::UnrecognizedCommand("beam_me_up".to_string()));
    }

    #[test]
    fn test_decode_malformed() {
        assert!(matches!(
            decode_client_line("not json"),
            Err(ProtocolError::Malformed(_))
        ));
        assert!(matches!(
            decode_client_line(r#"{"args":{}}"#),
            Err(ProtocolError::Malformed(_))
        ));
    }

    #[test]
    fn test_decode_invalid_args() {
        let err = decode_client_line(r#"{"command":"send_message","args":{"private":"yes"}}"#)
            .unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidArgs { ref command, .. } if command == "send_message"));
    }

    #[test]
    fn test_client_encoding_decodes_on_server() {
        let line = encode_line(&ClientCommand::broadcast("Make it so")).unwrap();
        assert!(!line.contains('\n'));
        assert_eq!(
            decode_client_line(&line).unwrap(),
            ClientCommand::broadcast("Make it so")
        );
    }

    #[test]
    fn test_decode_server_users() {
        let line = r#"{"command":"users","args":{"users":["data","worf"]}}"#;
        match decode_server_line(line).unwrap() {
            ServerMessage::Users { users } => {
                assert_eq!(users, vec![ParticipantName::new("data"), ParticipantName::new("worf")]);
            }
            other => panic!("Expected Users, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_server_error() {
        let line = r#"{"command":"error","args":{"error_code":"delivery_failed","message":"nope"}}"#;
        assert_eq!(
            decode_server_line(line).unwrap(),
            ServerMessage::error(ErrorCode::DeliveryFailed, "nope")
        );
    }
}
