//! Session handler for one client connection.
//!
//! Each connection gets its own `ConnectionHandler` that:
//! - Joins the chat room under an allocated name (welcome, then users)
//! - Parses one `{"command", "args"}` object per line
//! - Dispatches messages through the router and reports the outcome
//! - Leaves the room when the connection ends, however it ends
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Every way out of the session loop is a `ConnectionError`
//! - `leave` runs on every exit path after a successful join

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use trek_core::ParticipantName;
use trek_protocol::{decode_client_line, ClientCommand, ProtocolError, ServerMessage};

use crate::flavor::Enhancer;
use crate::participant::{ConnectionParticipant, DeliveryError, Participant, ParticipantHandle};
use crate::registry::RegistryError;
use crate::router::Router;

/// Maximum inbound line size (64 KiB)
pub const MAX_MESSAGE_SIZE: usize = 65_536;

/// Per-session settings shared by all connections.
#[derive(Clone)]
pub struct SessionSettings {
    /// Upper bound for writing one envelope to the client
    pub write_timeout: Duration,

    /// Policy applied to every message this client sends
    pub enhancer: Arc<dyn Enhancer>,
}

/// Handler for a single client session.
pub struct ConnectionHandler<R, W> {
    /// Buffered reader for incoming lines
    reader: BufReader<R>,

    /// The registered participant owning the write half
    participant: Arc<ConnectionParticipant<W>>,

    router: Router,

    enhancer: Arc<dyn Enhancer>,

    /// Rotating index for scripted enhancement
    enhance_count: usize,

    /// Server-wide shutdown
    shutdown: CancellationToken,

    connection_number: u64,
}

impl<R, W> ConnectionHandler<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send + 'static,
{
    /// Joins the chat room and returns the ready handler.
    ///
    /// The client receives `welcome` and a `users` list before this
    /// returns. Fails only if the room could not register the session.
    pub async fn join(
        reader: R,
        writer: W,
        router: Router,
        settings: SessionSettings,
        shutdown: CancellationToken,
        connection_number: u64,
    ) -> Result<Self, ConnectionError> {
        let write_timeout = settings.write_timeout;
        let participant = router
            .join(|name| ConnectionParticipant::new(name, writer, write_timeout))
            .await?;

        info!(
            connection = connection_number,
            name = %participant.name(),
            "Client joined"
        );

        Ok(Self {
            reader: BufReader::new(reader),
            participant,
            router,
            enhancer: settings.enhancer,
            enhance_count: 0,
            shutdown,
            connection_number,
        })
    }

    /// Name assigned at join.
    pub fn name(&self) -> &ParticipantName {
        self.participant.name()
    }

    /// Runs the session until the client goes away, is evicted, or the
    /// server shuts down. Returns the session's name.
    pub async fn run(mut self) -> ParticipantName {
        let name = self.name().clone();

        match self.process_messages().await {
            Ok(()) => debug!(name = %name, "Client sent EOF"),
            Err(ConnectionError::Evicted) => info!(name = %name, "Session closed by eviction or failed write"),
            Err(ConnectionError::Shutdown) => debug!(name = %name, "Session closed by shutdown"),
            Err(e) => info!(name = %name, error = %e, "Session terminated"),
        }

        let handle: ParticipantHandle = Arc::clone(&self.participant) as ParticipantHandle;
        if self.router.leave(&handle).await {
            info!(connection = self.connection_number, name = %name, "Client left");
        }

        name
    }

    async fn process_messages(&mut self) -> Result<(), ConnectionError> {
        let participant = Arc::clone(&self.participant);
        let shutdown = self.shutdown.clone();

        loop {
            let line = tokio::select! {
                _ = participant.closed() => return Err(ConnectionError::Evicted),
                _ = shutdown.cancelled() => return Err(ConnectionError::Shutdown),
                result = self.read_line() => match result {
                    Ok(line) => line,
                    Err(ConnectionError::Eof) => return Ok(()),
                    Err(e) => return Err(e),
                },
            };

            if line.trim().is_empty() {
                continue;
            }

            let command = decode_client_line(&line)?;
            self.handle_command(command).await?;
        }
    }

    async fn handle_command(&mut self, command: ClientCommand) -> Result<(), ConnectionError> {
        match command {
            ClientCommand::SendMessage(args) => {
                let name = self.participant.name().clone();
                let mut message = args.into_chat_message();
                if self.enhancer.enhance(&name, &mut message, self.enhance_count) {
                    self.enhance_count += 1;
                }

                match self.router.dispatch(&name, message).await {
                    Ok(sent) => {
                        self.participant
                            .deliver(&ServerMessage::message(sent.echo()))
                            .await?;
                    }
                    Err(e) if e.is_terminal() => return Err(ConnectionError::Evicted),
                    Err(e) => {
                        debug!(name = %name, error = %e, "Dispatch failed");
                        if let Some(reply) = e.to_server_message() {
                            self.participant.deliver(&reply).await?;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Reads one line from the client.
    async fn read_line(&mut self) -> Result<String, ConnectionError> {
        let mut line = String::new();

        // One byte past the limit is enough to tell an oversized line apart.
        let bytes_read = (&mut self.reader)
            .take(MAX_MESSAGE_SIZE as u64 + 1)
            .read_line(&mut line)
            .await
            .map_err(|e| ConnectionError::Io(e.to_string()))?;

        if bytes_read == 0 {
            return Err(ConnectionError::Eof);
        }

        if line.len() > MAX_MESSAGE_SIZE {
            return Err(ConnectionError::MessageTooLarge {
                size: line.len(),
                max: MAX_MESSAGE_SIZE,
            });
        }

        Ok(line)
    }
}

/// Errors that end a session.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Connection closed")]
    Eof,

    #[error("Message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },

    #[error("Evicted")]
    Evicted,

    #[error("Server shutting down")]
    Shutdown,

    #[error("Delivery to client failed: {0}")]
    Delivery(#[from] DeliveryError),

    #[error("Join failed: {0}")]
    Join(#[from] RegistryError),
}
