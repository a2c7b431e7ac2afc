//! Participant capability shared by every chat room member.
//!
//! The router never knows what sits behind a name. It only asks a
//! participant for its identity and hands it commands to deliver:
//!
//! ```text
//! ┌──────────────┐  deliver(ServerMessage)  ┌────────────────────────┐
//! │    Router    │─────────────────────────▶│ dyn Participant        │
//! └──────────────┘                          ├────────────────────────┤
//!                                           │ ConnectionParticipant  │ line-JSON over TCP
//!                                           │ ScriptedBot            │ timer-driven, ignores input
//!                                           │ StallBot               │ pauses the registry
//!                                           └────────────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! This module follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Delivery failures are returned as `DeliveryError`, never raised

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use trek_core::{ParticipantKind, ParticipantName};
use trek_protocol::ServerMessage;

mod bot;
mod connection;

pub use bot::{spawn_bots, BotSchedule, ScriptedBot, StallBot, StallSchedule};
pub use connection::ConnectionParticipant;

/// Shared handle to a registered participant.
pub type ParticipantHandle = Arc<dyn Participant>;

/// A named, addressable member of the chat room.
#[async_trait]
pub trait Participant: Send + Sync {
    /// Display name, fixed for the participant's lifetime.
    fn name(&self) -> &ParticipantName;

    /// Variant tag.
    fn kind(&self) -> ParticipantKind;

    /// Delivers one command to this participant.
    ///
    /// Implementations serialize their own deliveries so concurrent
    /// callers never interleave output.
    async fn deliver(&self, message: &ServerMessage) -> Result<(), DeliveryError>;

    /// Ends the participant's session after an eviction.
    ///
    /// Default is a no-op for participants without a session.
    fn close(&self) {}
}

/// Returns true if both handles point at the same participant.
///
/// Compares data pointers only, so two handles to the same value match
/// even when they were coerced through different vtables.
pub fn same_participant(a: &ParticipantHandle, b: &ParticipantHandle) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

/// Errors a delivery sink can report.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("Write timeout")]
    Timeout,

    #[error("Encoding failed: {0}")]
    Encode(String),

    #[error("Participant closed")]
    Closed,
}
