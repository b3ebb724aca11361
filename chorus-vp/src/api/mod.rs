//! HTTP control API
//!
//! Axum router over the [`SessionManager`]. Every playback error maps to an
//! HTTP status and a JSON body `{ "status": "error", "kind", "message" }`.
//!
//! | Method | Path                                     | Handler                 |
//! |--------|------------------------------------------|-------------------------|
//! | GET    | `/health`                                | [`handlers::health`]    |
//! | GET    | `/sessions`                              | [`handlers::list_sessions`] |
//! | GET    | `/sessions/:id`                          | [`handlers::session_status`] |
//! | POST   | `/sessions/:id/play`                     | [`handlers::play`]      |
//! | POST   | `/sessions/:id/pause`, `resume`, `skip`, `stop` | control handlers |
//! | DELETE | `/sessions/:id/queue/:index?generation=N`| [`handlers::remove_entry`] |
//! | DELETE | `/sessions/:id`                          | [`handlers::release_session`] |
//! | GET    | `/events?session=ID`                     | [`sse::event_stream`]   |

pub mod handlers;
pub mod sse;

use crate::error::Error;
use crate::session::SessionManager;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::Serialize;
use std::net::SocketAddr;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Shared application context passed to all handlers
///
/// Clone gives `FromRef<AppContext>` for free via Axum's blanket impl.
#[derive(Clone)]
pub struct AppContext {
    pub manager: SessionManager,
}

/// Build the router with all routes
pub fn create_router(ctx: AppContext) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/sessions", get(handlers::list_sessions))
        .route(
            "/sessions/:id",
            get(handlers::session_status).delete(handlers::release_session),
        )
        .route("/sessions/:id/play", post(handlers::play))
        .route("/sessions/:id/pause", post(handlers::pause))
        .route("/sessions/:id/resume", post(handlers::resume))
        .route("/sessions/:id/skip", post(handlers::skip))
        .route("/sessions/:id/stop", post(handlers::stop))
        .route("/sessions/:id/queue/:index", delete(handlers::remove_entry))
        .route("/events", get(sse::event_stream))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(ctx)
}

/// Bind and serve until `shutdown` resolves
pub async fn serve<F>(ctx: AppContext, port: u16, shutdown: F) -> std::io::Result<()>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    let app = create_router(ctx);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("HTTP API listening on {}", addr);
    axum::serve(listener, app).with_graceful_shutdown(shutdown).await
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub status: &'static str,
    pub kind: &'static str,
    pub message: String,
}

/// Playback error rendered as an HTTP response
#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        ApiError(e)
    }
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match &self.0 {
            Error::SourceUnavailable(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Error::StaleIndex { .. } | Error::InvalidState(_) => StatusCode::CONFLICT,
            Error::InvalidIndex { .. } => StatusCode::BAD_REQUEST,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::SessionClosed(_) => StatusCode::GONE,
            Error::ConnectFailed { .. } | Error::SessionLost { .. } => StatusCode::BAD_GATEWAY,
            Error::QueueFull(_) => StatusCode::TOO_MANY_REQUESTS,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            warn!(kind = self.0.kind(), error = %self.0, "Request failed");
        }
        let body = ErrorBody {
            status: "error",
            kind: self.0.kind(),
            message: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}
