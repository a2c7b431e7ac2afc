//! Administrative HTTP surface.
//!
//! Read-only views of the registry, eviction, and the live dispatch tap:
//!
//! | Method   | Path                      | Response                           |
//! |----------|---------------------------|------------------------------------|
//! | `GET`    | `/debug/chat/status`      | participant count, message totals  |
//! | `GET`    | `/debug/chat/users`       | joined name → stats                |
//! | `GET`    | `/debug/chat/user/{name}` | stats, 404 if not joined           |
//! | `DELETE` | `/debug/chat/user/{name}` | `kicked`, 404 if not joined        |
//! | `GET`    | `/debug/chat/tap`         | one text line per private dispatch |
//!
//! The tap admits one subscriber at a time; a second request gets
//! 409 Conflict until the first disconnects.

use std::collections::BTreeMap;
use std::convert::Infallible;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Json;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::info;

use trek_core::{ParticipantName, ParticipantStats, StatusSummary};

use crate::router::Router;

/// Events buffered for a slow tap reader before new ones are dropped.
const TAP_CAPACITY: usize = 256;

/// Errors reported by admin handlers.
#[derive(Debug, Error)]
pub enum AdminError {
    #[error("no such user: {0}")]
    NoSuchUser(ParticipantName),

    #[error("the dispatch tap already has a subscriber")]
    TapBusy,
}

impl IntoResponse for AdminError {
    fn into_response(self) -> Response {
        let status = match self {
            Self::NoSuchUser(_) => StatusCode::NOT_FOUND,
            Self::TapBusy => StatusCode::CONFLICT,
        };
        (status, self.to_string()).into_response()
    }
}

/// Builds the admin router.
pub fn admin_router(router: Router) -> axum::Router {
    axum::Router::new()
        .route("/debug/chat/status", get(status))
        .route("/debug/chat/users", get(users))
        .route("/debug/chat/user/{name}", get(user).delete(kick))
        .route("/debug/chat/tap", get(tap))
        .with_state(router)
}

/// Serves the admin surface until `shutdown` fires.
///
/// The tap is closed on shutdown so a streaming response does not hold
/// graceful shutdown open.
pub async fn serve_admin(
    listener: TcpListener,
    router: Router,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!(addr = %addr, "Admin server listening");
    }

    let app = admin_router(router.clone());
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown.cancelled().await;
            router.close_tap().await;
        })
        .await
}

async fn status(State(router): State<Router>) -> Json<StatusSummary> {
    let registry = router.registry();
    let participants = registry.len().await;
    let stats = registry.snapshot_stats().await;
    Json(StatusSummary::from_stats(participants, stats.values()))
}

async fn users(State(router): State<Router>) -> Json<BTreeMap<ParticipantName, ParticipantStats>> {
    Json(router.registry().active_stats().await)
}

async fn user(
    State(router): State<Router>,
    Path(name): Path<String>,
) -> Result<Json<ParticipantStats>, AdminError> {
    let name = ParticipantName::new(name);
    let registry = router.registry();

    if !registry.contains(&name).await {
        return Err(AdminError::NoSuchUser(name));
    }
    registry
        .stats_for(&name)
        .await
        .map(Json)
        .ok_or(AdminError::NoSuchUser(name))
}

async fn kick(
    State(router): State<Router>,
    Path(name): Path<String>,
) -> Result<&'static str, AdminError> {
    let name = ParticipantName::new(name);
    match router.evict(&name).await {
        Some(_) => {
            info!(name = %name, "Kicked via admin surface");
            Ok("kicked")
        }
        None => Err(AdminError::NoSuchUser(name)),
    }
}

async fn tap(State(router): State<Router>) -> Result<Response, AdminError> {
    let rx = router
        .install_tap(TAP_CAPACITY)
        .await
        .map_err(|_| AdminError::TapBusy)?;

    let lines = ReceiverStream::new(rx).map(|event| Ok::<_, Infallible>(format!("{event}\n")));

    Ok((
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        Body::from_stream(lines),
    )
        .into_response())
}
