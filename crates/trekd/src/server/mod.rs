//! TCP chat server.
//!
//! The server:
//! - Listens on a TCP socket for client connections
//! - Spawns a ConnectionHandler for each client, up to a connection limit
//! - Supports graceful shutdown via CancellationToken
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │   ChatServer    │
//! │                 │
//! │   TcpListener   │
//! └───────┬─────────┘
//!         │ accept()
//!         ▼
//! ┌─────────────────┐     ┌─────────────────┐     ┌──────────┐
//! │ConnectionHandler│────▶│     Router      │────▶│ Registry │
//! │   (per client)  │     │                 │     │          │
//! └─────────────────┘     └─────────────────┘     └──────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Accept errors are logged and the server keeps accepting

mod connection;

pub use connection::{ConnectionError, ConnectionHandler, SessionSettings, MAX_MESSAGE_SIZE};

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::router::Router;

/// How long shutdown waits for open sessions to leave.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// TCP server for chat clients.
pub struct ChatServer {
    /// Address to bind in [`ChatServer::run`]
    addr: SocketAddr,

    router: Router,

    settings: SessionSettings,

    /// Sessions accepted beyond this are refused
    max_connections: usize,

    /// Cancellation token for graceful shutdown
    cancel_token: CancellationToken,

    /// Connection counter for log correlation
    connection_counter: AtomicU64,

    /// Currently open sessions
    active: Arc<AtomicUsize>,

    sessions: TaskTracker,
}

impl ChatServer {
    pub fn new(
        addr: SocketAddr,
        router: Router,
        settings: SessionSettings,
        max_connections: usize,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            addr,
            router,
            settings,
            max_connections,
            cancel_token,
            connection_counter: AtomicU64::new(0),
            active: Arc::new(AtomicUsize::new(0)),
            sessions: TaskTracker::new(),
        }
    }

    /// Binds the configured address.
    pub async fn bind(&self) -> Result<TcpListener, ServerError> {
        TcpListener::bind(self.addr)
            .await
            .map_err(|e| ServerError::Bind {
                addr: self.addr,
                error: e.to_string(),
            })
    }

    /// Binds and serves until shutdown.
    pub async fn run(&self) -> Result<(), ServerError> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }

    /// Accepts connections on `listener` until the cancellation token is
    /// triggered, then waits briefly for open sessions to leave.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), ServerError> {
        let local_addr = listener.local_addr().map_err(|e| ServerError::Bind {
            addr: self.addr,
            error: e.to_string(),
        })?;
        info!(addr = %local_addr, "Chat server listening");

        loop {
            tokio::select! {
                _ = self.cancel_token.cancelled() => {
                    info!("Server shutdown requested");
                    break;
                }

                result = listener.accept() => {
                    match result {
                        Ok((stream, peer)) => self.handle_connection(stream, peer),
                        Err(e) => {
                            error!(error = %e, "Failed to accept connection");
                        }
                    }
                }
            }
        }

        self.cleanup().await;
        Ok(())
    }

    /// Number of sessions currently open.
    pub fn active_connections(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }

    fn handle_connection(&self, stream: TcpStream, peer: SocketAddr) {
        let connection_number = self.connection_counter.fetch_add(1, Ordering::Relaxed);

        let Some(slot) = ActiveSlot::acquire(&self.active, self.max_connections) else {
            warn!(
                connection = connection_number,
                peer = %peer,
                max = self.max_connections,
                "Connection limit reached, refusing client"
            );
            return;
        };

        if let Err(e) = stream.set_nodelay(true) {
            debug!(peer = %peer, error = %e, "Failed to set TCP_NODELAY");
        }

        let (reader, writer) = stream.into_split();
        let router = self.router.clone();
        let settings = self.settings.clone();
        let shutdown = self.cancel_token.clone();

        self.sessions.spawn(async move {
            let _slot = slot;
            debug!(connection = connection_number, peer = %peer, "New client connected");

            let handler = match ConnectionHandler::join(
                reader,
                writer,
                router,
                settings,
                shutdown,
                connection_number,
            )
            .await
            {
                Ok(handler) => handler,
                Err(e) => {
                    warn!(connection = connection_number, peer = %peer, error = %e, "Client could not join");
                    return;
                }
            };
            let name = handler.run().await;

            debug!(connection = connection_number, name = %name, "Client disconnected");
        });
    }

    async fn cleanup(&self) {
        self.sessions.close();
        if tokio::time::timeout(SHUTDOWN_GRACE, self.sessions.wait())
            .await
            .is_err()
        {
            warn!(open = self.active_connections(), "Sessions still open after shutdown grace");
        }
        info!("Server cleanup complete");
    }
}

/// Counts one open session for as long as it lives.
struct ActiveSlot(Arc<AtomicUsize>);

impl ActiveSlot {
    fn acquire(active: &Arc<AtomicUsize>, max: usize) -> Option<Self> {
        active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| (n < max).then_some(n + 1))
            .ok()
            .map(|_| Self(Arc::clone(active)))
    }
}

impl Drop for ActiveSlot {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Errors that can occur in server operations.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Failed to bind {addr}: {error}")]
    Bind { addr: SocketAddr, error: String },

    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),
}
