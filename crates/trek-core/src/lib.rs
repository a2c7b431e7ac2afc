//! Chat Trek Core - Shared types for the chat room
//!
//! This crate provides the domain types shared between the daemon
//! (trekd), the wire protocol and the terminal client (trek).
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod error;
pub mod message;
pub mod name;
pub mod stats;

// Re-exports for convenience
pub use error::{DomainError, DomainResult};
pub use message::ChatMessage;
pub use name::{ParticipantKind, ParticipantName, MAX_NAME_LEN};
pub use stats::{ParticipantStats, StatusSummary};
