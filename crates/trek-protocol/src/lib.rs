//! Chat Trek Protocol - Wire protocol for chat connections
//!
//! This crate provides the command envelopes exchanged between chat
//! clients and the daemon, plus line-oriented encoding and decoding.
//! Every envelope is one JSON object of the form
//! `{"command": ..., "args": ...}` terminated by a newline.

pub mod codec;
pub mod message;

pub use codec::{decode_client_line, decode_server_line, encode_line, ProtocolError};
pub use message::{ClientCommand, ClientEnvelope, ErrorCode, SendMessageArgs, ServerMessage};
