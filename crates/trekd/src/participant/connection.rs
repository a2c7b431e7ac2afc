//! Connection-backed participant.
//!
//! Owns the write half of a client connection. Every delivery takes the
//! writer mutex for the whole envelope, so a broadcast and a direct reply
//! racing for the same client are written one after the other.

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::{debug, warn};

use trek_core::{ParticipantKind, ParticipantName};
use trek_protocol::{encode_line, ServerMessage};

use super::{DeliveryError, Participant};

/// Participant that writes line-delimited JSON to a client connection.
pub struct ConnectionParticipant<W> {
    name: ParticipantName,

    /// Buffered writer, locked per envelope
    writer: Mutex<BufWriter<W>>,

    /// Upper bound for writing and flushing one envelope
    write_timeout: Duration,

    /// Cancelled when the participant is evicted
    closed: CancellationToken,
}

impl<W> ConnectionParticipant<W>
where
    W: AsyncWrite + Unpin + Send,
{
    /// Creates a participant around the write half of a connection.
    pub fn new(name: ParticipantName, writer: W, write_timeout: Duration) -> Self {
        Self {
            name,
            writer: Mutex::new(BufWriter::new(writer)),
            write_timeout,
            closed: CancellationToken::new(),
        }
    }

    /// Resolves once the participant has been evicted or poisoned by a
    /// failed write.
    pub fn closed(&self) -> WaitForCancellationFuture<'_> {
        self.closed.cancelled()
    }

    /// Returns true if the participant has been evicted or its stream
    /// was left mid-envelope.
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// A partial write leaves a truncated line on the wire and possibly
    /// buffered bytes behind it, so nothing more may be written.
    fn poison(&self, command: &str, reason: &dyn std::fmt::Display) {
        warn!(name = %self.name, command, reason = %reason, "Write failed, closing connection");
        self.closed.cancel();
    }
}

#[async_trait]
impl<W> Participant for ConnectionParticipant<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    fn name(&self) -> &ParticipantName {
        &self.name
    }

    fn kind(&self) -> ParticipantKind {
        ParticipantKind::Connection
    }

    async fn deliver(&self, message: &ServerMessage) -> Result<(), DeliveryError> {
        if self.is_closed() {
            return Err(DeliveryError::Closed);
        }

        let line = encode_line(message).map_err(|e| DeliveryError::Encode(e.to_string()))?;

        let mut writer = self.writer.lock().await;
        if self.is_closed() {
            return Err(DeliveryError::Closed);
        }

        match timeout(self.write_timeout, async {
            writer.write_all(line.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            writer.flush().await?;
            Ok::<(), std::io::Error>(())
        })
        .await
        {
            Ok(Ok(())) => {
                debug!(name = %self.name, command = message.command(), "Delivered");
                Ok(())
            }
            Ok(Err(e)) => {
                self.poison(message.command(), &e);
                Err(DeliveryError::Io(e.to_string()))
            }
            Err(_) => {
                self.poison(message.command(), &"write timed out");
                Err(DeliveryError::Timeout)
            }
        }
    }

    fn close(&self) {
        self.closed.cancel();
    }
}
