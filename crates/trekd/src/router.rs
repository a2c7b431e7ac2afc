//! Message routing.
//!
//! The router decides between broadcast and private delivery, resolves
//! recipients through the [`Registry`], delivers outside the registry
//! lock and keeps the sender's statistics current. Membership changes go
//! through the router too, so every join, leave and eviction is followed
//! by a `users` broadcast once the registry lock has been released.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use trek_core::{ChatMessage, ParticipantName};
use trek_protocol::{ErrorCode, ServerMessage};

use crate::participant::{DeliveryError, Participant, ParticipantHandle};
use crate::registry::{Registry, RegistryError};

// ============================================================================
// Errors
// ============================================================================

/// Outcome of a failed dispatch, reported to the sender.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RouteError {
    /// Private message target is not registered.
    #[error("\"{0}\" is not in the chat room.")]
    NoSuchRecipient(ParticipantName),

    /// The recipient's sink failed.
    #[error("Your message to {recipient} could not be delivered.")]
    DeliveryFailed {
        recipient: ParticipantName,
        #[source]
        source: DeliveryError,
    },

    /// The sender is no longer registered (evicted or already left).
    #[error("sender {0} is not registered")]
    UnknownSender(ParticipantName),
}

impl RouteError {
    /// Wire code for errors that are reported back to the sender.
    pub fn error_code(&self) -> Option<ErrorCode> {
        match self {
            Self::NoSuchRecipient(_) => Some(ErrorCode::NoSuchRecipient),
            Self::DeliveryFailed { .. } => Some(ErrorCode::DeliveryFailed),
            Self::UnknownSender(_) => None,
        }
    }

    /// Returns true if the sender's loop must end.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::UnknownSender(_))
    }

    /// The `error` envelope for the sender, if this error has one.
    pub fn to_server_message(&self) -> Option<ServerMessage> {
        self.error_code()
            .map(|code| ServerMessage::error(code, self.to_string()))
    }
}

/// The tap already has a live subscriber.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("dispatch tap already has a subscriber")]
pub struct TapBusy;

// ============================================================================
// Tap
// ============================================================================

/// How a private dispatch ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TapOutcome {
    Delivered,
    NoSuchRecipient,
    DeliveryFailed,
}

impl fmt::Display for TapOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Delivered => write!(f, "delivered"),
            Self::NoSuchRecipient => write!(f, "no_such_recipient"),
            Self::DeliveryFailed => write!(f, "delivery_failed"),
        }
    }
}

/// One private dispatch as seen by the tap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TapEvent {
    pub at: DateTime<Utc>,
    pub sender: ParticipantName,
    pub recipient: ParticipantName,
    pub outcome: TapOutcome,
}

impl fmt::Display for TapEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} -> {} ({})",
            self.at.to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            self.sender,
            self.recipient,
            self.outcome
        )
    }
}

/// Result of a fan-out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanoutReport {
    pub delivered: usize,
    pub failed: usize,
}

// ============================================================================
// Router
// ============================================================================

/// Cloneable handle shared by sessions, bots and the admin surface.
#[derive(Clone)]
pub struct Router {
    registry: Registry,
    tap: Arc<Mutex<Option<mpsc::Sender<TapEvent>>>>,
}

impl Router {
    pub fn new(registry: Registry) -> Self {
        Self {
            registry,
            tap: Arc::new(Mutex::new(None)),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Routes `message` from `sender`.
    ///
    /// Returns the message as it was delivered, stamped with the sender.
    pub async fn dispatch(
        &self,
        sender: &ParticipantName,
        message: ChatMessage,
    ) -> Result<ChatMessage, RouteError> {
        let counters = self
            .registry
            .sender_counters(sender)
            .await
            .ok_or_else(|| RouteError::UnknownSender(sender.clone()))?;

        let message = message.stamped(sender);

        if !message.private {
            counters.record_broadcast();
            let report = self
                .broadcast_except(Some(sender), &ServerMessage::message(message.clone()))
                .await;
            debug!(
                sender = %sender,
                delivered = report.delivered,
                failed = report.failed,
                "Broadcast dispatched"
            );
            return Ok(message);
        }

        // Counted as an attempt, whatever happens next.
        counters.record_private();
        let recipient_name = message.recipient.clone();

        let Some(recipient) = self.registry.lookup(&recipient_name).await else {
            self.tap_event(sender, &recipient_name, TapOutcome::NoSuchRecipient)
                .await;
            debug!(sender = %sender, recipient = %recipient_name, "No such recipient");
            return Err(RouteError::NoSuchRecipient(recipient_name));
        };

        match recipient.deliver(&ServerMessage::message(message.clone())).await {
            Ok(()) => {
                self.tap_event(sender, &recipient_name, TapOutcome::Delivered)
                    .await;
                debug!(sender = %sender, recipient = %recipient_name, "Private message delivered");
                Ok(message)
            }
            Err(source) => {
                self.tap_event(sender, &recipient_name, TapOutcome::DeliveryFailed)
                    .await;
                warn!(
                    sender = %sender,
                    recipient = %recipient_name,
                    error = %source,
                    "Private delivery failed"
                );
                Err(RouteError::DeliveryFailed {
                    recipient: recipient_name,
                    source,
                })
            }
        }
    }

    /// Delivers `message` to every participant except `exclude`.
    ///
    /// The recipient set is snapshotted under the shared lock; deliveries
    /// run concurrently after it is released. Failures are logged and
    /// counted but never stop the fan-out.
    pub async fn broadcast_except(
        &self,
        exclude: Option<&ParticipantName>,
        message: &ServerMessage,
    ) -> FanoutReport {
        let targets = self.registry.participants_except(exclude).await;
        let message = Arc::new(message.clone());
        let mut report = FanoutReport::default();

        let mut deliveries = JoinSet::new();
        for target in targets {
            let message = Arc::clone(&message);
            deliveries.spawn(async move {
                let result = target.deliver(&message).await;
                (target.name().clone(), result)
            });
        }

        while let Some(joined) = deliveries.join_next().await {
            match joined {
                Ok((_, Ok(()))) => report.delivered += 1,
                Ok((name, Err(e))) => {
                    warn!(name = %name, command = message.command(), error = %e, "Broadcast delivery failed");
                    report.failed += 1;
                }
                Err(e) => {
                    warn!(error = %e, "Broadcast delivery task failed");
                    report.failed += 1;
                }
            }
        }

        report
    }

    /// Sends the sorted member list to everyone.
    pub async fn broadcast_membership(&self) -> FanoutReport {
        let users = self.registry.list_names().await;
        self.broadcast_except(None, &ServerMessage::users(users)).await
    }

    // ========================================================================
    // Membership
    // ========================================================================

    /// Joins a participant under a freshly allocated name.
    ///
    /// The new participant receives `welcome` before the membership
    /// broadcast.
    pub async fn join<P, F>(&self, build: F) -> Result<Arc<P>, RegistryError>
    where
        P: Participant + 'static,
        F: FnOnce(ParticipantName) -> P,
    {
        let participant = self.registry.join(build).await?;
        let name = participant.name().clone();

        if let Err(e) = participant.deliver(&ServerMessage::welcome(name.clone())).await {
            warn!(name = %name, error = %e, "Welcome delivery failed");
        }

        self.broadcast_membership().await;
        Ok(participant)
    }

    /// Registers a participant under its own name.
    pub async fn register<P>(&self, participant: Arc<P>) -> Result<(), RegistryError>
    where
        P: Participant + 'static,
    {
        self.registry.register(participant).await?;
        self.broadcast_membership().await;
        Ok(())
    }

    /// Removes a departing participant if it still owns its name.
    pub async fn leave(&self, participant: &ParticipantHandle) -> bool {
        let removed = self.registry.remove_if_same(participant).await;
        if removed {
            self.broadcast_membership().await;
        }
        removed
    }

    /// Removes `name` and closes its session.
    pub async fn evict(&self, name: &ParticipantName) -> Option<ParticipantHandle> {
        let evicted = self.registry.remove(name).await?;
        evicted.close();
        info!(name = %name, kind = %evicted.kind(), "Participant evicted");

        self.broadcast_membership().await;
        Some(evicted)
    }

    /// Holds the registry's exclusive lock for `duration`.
    pub async fn pause_registry(&self, duration: Duration) {
        self.registry.pause_for(duration).await;
    }

    // ========================================================================
    // Tap
    // ========================================================================

    /// Installs the dispatch tap.
    ///
    /// Fails while another subscriber is still listening. A subscriber
    /// that went away frees the slot.
    pub async fn install_tap(&self, capacity: usize) -> Result<mpsc::Receiver<TapEvent>, TapBusy> {
        let mut tap = self.tap.lock().await;
        if tap.as_ref().is_some_and(|tx| !tx.is_closed()) {
            return Err(TapBusy);
        }

        let (tx, rx) = mpsc::channel(capacity.max(1));
        *tap = Some(tx);
        info!("Dispatch tap installed");
        Ok(rx)
    }

    /// Drops the tap sender, ending the subscriber's stream.
    pub async fn close_tap(&self) {
        if self.tap.lock().await.take().is_some() {
            info!("Dispatch tap closed");
        }
    }

    async fn tap_event(&self, sender: &ParticipantName, recipient: &ParticipantName, outcome: TapOutcome) {
        let mut tap = self.tap.lock().await;
        let Some(tx) = tap.as_ref() else {
            return;
        };

        let event = TapEvent {
            at: Utc::now(),
            sender: sender.clone(),
            recipient: recipient.clone(),
            outcome,
        };

        match tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!("Dispatch tap full, dropping event");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                *tap = None;
                info!("Dispatch tap subscriber went away");
            }
        }
    }
}
