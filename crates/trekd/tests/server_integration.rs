//! Integration tests for the TCP chat server.
//!
//! These tests run a ChatServer on an ephemeral port and talk to it with
//! real sockets: joining, messaging, protocol violations, eviction
//! through the admin surface, the connection limit and shutdown.
//!
//! Tests CAN use `.unwrap()` and `.expect()`.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use trek_core::{ChatMessage, ParticipantName};
use trek_protocol::{decode_server_line, encode_line, ClientCommand, ErrorCode, ServerMessage};
use trekd::admin::admin_router;
use trekd::flavor::NoFlavor;
use trekd::naming::NameAllocator;
use trekd::registry::Registry;
use trekd::router::Router;
use trekd::server::{ChatServer, SessionSettings};

// ============================================================================
// Constants
// ============================================================================

/// Upper bound for any single expected server reply
const RECV_TIMEOUT: Duration = Duration::from_secs(2);

/// How long to listen when asserting that nothing arrives
const QUIET_PERIOD: Duration = Duration::from_millis(150);

// ============================================================================
// Test Helpers
// ============================================================================

/// Test server context that manages server lifecycle.
struct TestServer {
    addr: SocketAddr,
    router: Router,
    cancel_token: CancellationToken,
    task: JoinHandle<()>,
}

impl TestServer {
    async fn spawn() -> Self {
        Self::spawn_with(NameAllocator::default(), 64).await
    }

    async fn spawn_with(allocator: NameAllocator, max_connections: usize) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let router = Router::new(Registry::new(allocator));
        let cancel_token = CancellationToken::new();
        let settings = SessionSettings {
            write_timeout: Duration::from_secs(1),
            enhancer: Arc::new(NoFlavor),
        };

        let server = ChatServer::new(
            addr,
            router.clone(),
            settings,
            max_connections,
            cancel_token.clone(),
        );
        let task = tokio::spawn(async move {
            server.serve(listener).await.unwrap();
        });

        Self {
            addr,
            router,
            cancel_token,
            task,
        }
    }

    /// Connects and consumes the welcome, recording the assigned name.
    ///
    /// A membership list from a concurrent join may overtake the welcome.
    async fn join(&self) -> TestClient {
        let stream = TcpStream::connect(self.addr).await.unwrap();
        let mut client = TestClient::new(stream);

        match client.recv_non_users().await {
            Some(ServerMessage::Welcome { name }) => client.name = name,
            other => panic!("expected welcome, got {other:?}"),
        }
        client
    }

    async fn admin(&self, method: &str, uri: &str) -> StatusCode {
        admin_router(self.router.clone())
            .oneshot(Request::builder().method(method).uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
            .status()
    }

    async fn shutdown(self) {
        self.cancel_token.cancel();
        timeout(Duration::from_secs(10), self.task)
            .await
            .expect("server should stop after cancellation")
            .unwrap();
    }
}

/// Default allocator minus one pool name.
fn allocator_without(excluded: &str) -> NameAllocator {
    let pool = trekd::naming::DEFAULT_POOL
        .iter()
        .filter(|name| **name != excluded)
        .map(|name| ParticipantName::new(*name))
        .collect();
    NameAllocator::new(pool, 100, "cadet#", 10_000)
}

/// Test client connection with protocol helpers.
struct TestClient {
    name: ParticipantName,
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl TestClient {
    fn new(stream: TcpStream) -> Self {
        let (reader, writer) = stream.into_split();
        Self {
            name: ParticipantName::default(),
            reader: BufReader::new(reader),
            writer,
        }
    }

    async fn send_raw(&mut self, line: &str) {
        self.writer.write_all(line.as_bytes()).await.unwrap();
        self.writer.write_all(b"\n").await.unwrap();
        self.writer.flush().await.unwrap();
    }

    async fn send(&mut self, command: ClientCommand) {
        let line = encode_line(&command).unwrap();
        self.send_raw(&line).await;
    }

    /// Next command from the server, `None` on EOF.
    async fn recv(&mut self) -> Option<ServerMessage> {
        let mut line = String::new();
        let n = timeout(RECV_TIMEOUT, self.reader.read_line(&mut line))
            .await
            .expect("timed out waiting for the server")
            .unwrap_or(0);
        if n == 0 {
            return None;
        }
        Some(decode_server_line(&line).unwrap())
    }

    /// Next command that is not a membership list.
    async fn recv_non_users(&mut self) -> Option<ServerMessage> {
        loop {
            match self.recv().await {
                Some(ServerMessage::Users { .. }) => continue,
                other => return other,
            }
        }
    }

    /// Next chat message, skipping membership lists.
    async fn recv_chat(&mut self) -> ChatMessage {
        match self.recv_non_users().await {
            Some(ServerMessage::Message(msg)) => msg,
            other => panic!("{}: expected message, got {other:?}", self.name),
        }
    }

    /// Asserts that nothing but membership lists arrives for a while.
    async fn assert_quiet(&mut self) {
        let deadline = tokio::time::Instant::now() + QUIET_PERIOD;
        loop {
            let mut line = String::new();
            match tokio::time::timeout_at(deadline, self.reader.read_line(&mut line)).await {
                Err(_) => return,
                Ok(Ok(0)) => panic!("{}: connection closed unexpectedly", self.name),
                Ok(Ok(_)) => match decode_server_line(&line).unwrap() {
                    ServerMessage::Users { .. } => continue,
                    other => panic!("{}: expected silence, got {other:?}", self.name),
                },
                Ok(Err(e)) => panic!("{}: read failed: {e}", self.name),
            }
        }
    }

    /// Waits until the server closes the connection.
    async fn assert_closed(&mut self) {
        loop {
            let mut line = String::new();
            let n = timeout(RECV_TIMEOUT, self.reader.read_line(&mut line))
                .await
                .expect("connection should be closed by the server")
                .unwrap_or(0);
            if n == 0 {
                return;
            }
        }
    }
}

// ============================================================================
// Joining
// ============================================================================

#[tokio::test]
async fn test_join_receives_welcome_then_users() {
    let server = TestServer::spawn().await;
    let mut client = server.join().await;

    match client.recv().await {
        Some(ServerMessage::Users { users }) => assert_eq!(users, vec![client.name.clone()]),
        other => panic!("expected users, got {other:?}"),
    }
    assert!(server.router.registry().contains(&client.name).await);

    server.shutdown().await;
}

#[tokio::test]
async fn test_existing_members_see_newcomer() {
    let server = TestServer::spawn().await;
    let mut a = server.join().await;
    a.recv().await;

    let b = server.join().await;

    let mut expected = vec![a.name.clone(), b.name.clone()];
    expected.sort();
    assert_eq!(a.recv().await, Some(ServerMessage::users(expected)));

    server.shutdown().await;
}

// ============================================================================
// Messaging scenarios
// ============================================================================

#[tokio::test]
async fn test_private_and_broadcast_scenarios() {
    // "worf" must stay absent, so it is kept out of the name pool.
    let server = TestServer::spawn_with(allocator_without("worf"), 64).await;
    let mut a = server.join().await;
    let mut b = server.join().await;
    let mut c = server.join().await;

    // A -> B private
    a.send(ClientCommand::private(b.name.as_str(), "report to sickbay"))
        .await;

    let echo = a.recv_chat().await;
    assert!(echo.from_me);
    assert!(echo.private);
    assert_eq!(echo.sender, a.name);

    let at_b = b.recv_chat().await;
    assert!(!at_b.from_me);
    assert_eq!(at_b.sender, a.name);
    assert_eq!(at_b.message, "report to sickbay");
    c.assert_quiet().await;

    let registry = server.router.registry();
    assert_eq!(registry.stats_for(&a.name).await.unwrap().private_count, 1);
    assert_eq!(registry.stats_for(&b.name).await.unwrap().messages_sent(), 0);

    // A broadcasts
    a.send(ClientCommand::broadcast("all hands to battle stations"))
        .await;

    let echo = a.recv_chat().await;
    assert!(echo.from_me);
    assert!(!echo.private);
    for other in [&mut b, &mut c] {
        let got = other.recv_chat().await;
        assert_eq!(got.message, "all hands to battle stations");
        assert!(!got.from_me);
        other.assert_quiet().await;
    }
    a.assert_quiet().await;

    // A -> worf, who is not here
    a.send(ClientCommand::private("worf", "qapla'")).await;
    match a.recv_non_users().await {
        Some(ServerMessage::Error { error_code, message }) => {
            assert_eq!(error_code, ErrorCode::NoSuchRecipient);
            assert_eq!(message, "\"worf\" is not in the chat room.");
        }
        other => panic!("expected error, got {other:?}"),
    }
    b.assert_quiet().await;
    c.assert_quiet().await;

    server.shutdown().await;
}

#[tokio::test]
async fn test_forged_sender_is_overwritten() {
    let server = TestServer::spawn().await;
    let mut a = server.join().await;
    let mut b = server.join().await;

    a.send_raw(&format!(
        r#"{{"command":"send_message","args":{{"message":"hi","private":true,"recipient":"{}","sender":"picard","from_me":true}}}}"#,
        b.name
    ))
    .await;

    let got = b.recv_chat().await;
    assert_eq!(got.sender, a.name);
    assert!(!got.from_me);

    server.shutdown().await;
}

#[tokio::test]
async fn test_missing_args_default_to_empty_broadcast() {
    let server = TestServer::spawn().await;
    let mut a = server.join().await;
    let mut b = server.join().await;

    a.send_raw(r#"{"command":"send_message"}"#).await;

    let got = b.recv_chat().await;
    assert_eq!(got.message, "");
    assert!(!got.private);
    assert_eq!(got.sender, a.name);

    server.shutdown().await;
}

// ============================================================================
// Protocol violations
// ============================================================================

#[tokio::test]
async fn test_unknown_command_terminates_session() {
    let server = TestServer::spawn().await;
    let mut a = server.join().await;
    let mut b = server.join().await;

    a.send_raw(r#"{"command":"self_destruct","args":{}}"#).await;
    a.assert_closed().await;

    // B is told A left.
    loop {
        match b.recv().await {
            Some(ServerMessage::Users { users }) if users == vec![b.name.clone()] => break,
            Some(ServerMessage::Users { .. }) => continue,
            other => panic!("expected users, got {other:?}"),
        }
    }
    assert!(!server.router.registry().contains(&a.name).await);

    server.shutdown().await;
}

#[tokio::test]
async fn test_malformed_args_terminate_session() {
    let server = TestServer::spawn().await;
    let mut a = server.join().await;

    a.send_raw(r#"{"command":"send_message","args":{"private":"yes"}}"#)
        .await;
    a.assert_closed().await;

    server.shutdown().await;
}

// ============================================================================
// Administration
// ============================================================================

#[tokio::test]
async fn test_admin_kick_closes_connection() {
    let server = TestServer::spawn().await;
    let mut a = server.join().await;
    let mut b = server.join().await;

    let uri = format!("/debug/chat/user/{}", a.name.as_str().replace('#', "%23"));
    assert_eq!(server.admin("GET", &uri).await, StatusCode::OK);
    assert_eq!(server.admin("DELETE", &uri).await, StatusCode::OK);

    a.assert_closed().await;
    assert_eq!(server.admin("GET", &uri).await, StatusCode::NOT_FOUND);

    // B can no longer reach A.
    b.send(ClientCommand::private(a.name.as_str(), "hello?")).await;
    match b.recv_non_users().await {
        Some(ServerMessage::Error { error_code, .. }) => {
            assert_eq!(error_code, ErrorCode::NoSuchRecipient)
        }
        other => panic!("expected error, got {other:?}"),
    }

    server.shutdown().await;
}

#[tokio::test]
async fn test_rejoin_accumulates_connection_count() {
    // A one-name pool hands the same name out again once it is free.
    let allocator = NameAllocator::new(vec![ParticipantName::new("data")], 100, "cadet#", 10_000);
    let server = TestServer::spawn_with(allocator, 64).await;

    let a = server.join().await;
    let name = a.name.clone();
    assert_eq!(name.as_str(), "data");

    drop(a);
    timeout(RECV_TIMEOUT, async {
        while server.router.registry().contains(&name).await {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("session should leave after disconnect");

    let again = server.join().await;
    assert_eq!(again.name, name);
    let stats = server.router.registry().stats_for(&name).await.unwrap();
    assert_eq!(stats.connection_count, 2);

    server.shutdown().await;
}

// ============================================================================
// Limits and shutdown
// ============================================================================

#[tokio::test]
async fn test_connection_limit_refuses_extra_clients() {
    let server = TestServer::spawn_with(NameAllocator::default(), 1).await;
    let _a = server.join().await;

    let stream = TcpStream::connect(server.addr).await.unwrap();
    let mut refused = TestClient::new(stream);
    assert!(refused.recv().await.is_none());
    assert_eq!(server.router.registry().len().await, 1);

    server.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_closes_sessions() {
    let server = TestServer::spawn().await;
    let mut a = server.join().await;
    let router = server.router.clone();

    server.shutdown().await;

    a.assert_closed().await;
    assert!(router.registry().is_empty().await);
}
