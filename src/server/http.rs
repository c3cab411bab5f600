//! HTTP endpoints
//!
//! | Path | Description |
//! |------|-------------|
//! | `/` | Index page rendered from the configured template |
//! | `/healthz` | Fixed `200 ok` |
//! | `/static/*` | Files from the configured static directory |
//! | `/stream` | Live Server-Sent Events feed of sampled messages |
//!
//! Each `/stream` request registers one subscriber. The response body owns
//! the subscriber handle, so when the client goes away and the body is
//! dropped the subscriber is unregistered.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::get,
    Router,
};
use bytes::Bytes;
use chrono::Datelike;
use futures::stream::{self, Stream};
use tower_http::services::ServeDir;

use crate::broadcast::{Broadcaster, SubscriberHandle};

use super::config::ServerConfig;
use super::sse;

/// Path of the event stream endpoint
pub const STREAM_PATH: &str = "/stream";

/// Shared state passed to all request handlers
#[derive(Clone)]
struct AppState {
    broadcaster: Arc<Broadcaster>,
    template_path: Arc<PathBuf>,
}

/// Build the router with every endpoint
///
/// Serve it with [`super::connection::serve`], which supplies the
/// `ConnectInfo` peer address the stream handler logs.
pub fn router(broadcaster: Arc<Broadcaster>, config: &ServerConfig) -> Router {
    let state = AppState {
        broadcaster,
        template_path: Arc::new(config.template_path.clone()),
    };

    Router::new()
        .route("/", get(handle_index))
        .route("/healthz", get(handle_health))
        .route(STREAM_PATH, get(handle_stream))
        .nest_service("/static", ServeDir::new(&config.static_dir))
        .with_state(state)
}

async fn handle_health() -> &'static str {
    "ok"
}

async fn handle_index(State(state): State<AppState>) -> Response {
    match tokio::fs::read_to_string(state.template_path.as_ref()).await {
        Ok(template) => Html(render_index(&template, chrono::Utc::now().year())).into_response(),
        Err(e) => {
            tracing::error!(
                path = %state.template_path.display(),
                error = %e,
                "Failed to read index template"
            );
            (StatusCode::INTERNAL_SERVER_ERROR, "template unavailable").into_response()
        }
    }
}

/// Substitute template placeholders
pub fn render_index(template: &str, year: i32) -> String {
    template
        .replace("{{ year }}", &year.to_string())
        .replace("{{ stream_path }}", STREAM_PATH)
}

async fn handle_stream(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Response {
    let handle = match state.broadcaster.subscribe() {
        Ok(handle) => handle,
        Err(e) => {
            tracing::warn!(peer = %peer, error = %e, "Stream rejected");
            return (StatusCode::SERVICE_UNAVAILABLE, e.to_string()).into_response();
        }
    };

    tracing::info!(
        peer = %peer,
        subscriber = %handle.id(),
        subscribers = state.broadcaster.subscriber_count(),
        "Client connected"
    );

    let origin = headers
        .get(header::ORIGIN)
        .cloned()
        .unwrap_or_else(|| HeaderValue::from_static("*"));

    let body = Body::from_stream(event_stream(ClientStream::new(handle, peer)));

    (
        [
            (header::CONTENT_TYPE, HeaderValue::from_static(sse::CONTENT_TYPE)),
            (header::CACHE_CONTROL, HeaderValue::from_static("no-cache")),
            (header::CONNECTION, HeaderValue::from_static("close")),
            (header::ACCESS_CONTROL_ALLOW_ORIGIN, origin),
        ],
        body,
    )
        .into_response()
}

/// Subscriber handle owned by one response body
///
/// The response is sent with `Connection: close`, so when the stream ends
/// because the subscriber was retired, the connection goes with it.
struct ClientStream {
    handle: SubscriberHandle,
    peer: SocketAddr,
    started: bool,
}

impl ClientStream {
    fn new(handle: SubscriberHandle, peer: SocketAddr) -> Self {
        Self {
            handle,
            peer,
            started: false,
        }
    }
}

impl Drop for ClientStream {
    fn drop(&mut self) {
        let stats = self.handle.stats();
        tracing::info!(
            peer = %self.peer,
            subscriber = %self.handle.id(),
            delivered = stats.delivered,
            dropped = stats.dropped,
            "Client disconnected"
        );
    }
}

/// Body stream: a connect comment, then one SSE event per message
///
/// The first poll means hyper is writing the response, which activates the
/// subscriber. The stream ends when the subscriber is retired.
fn event_stream(client: ClientStream) -> impl Stream<Item = Result<Bytes, Infallible>> {
    stream::unfold(client, |mut client| async move {
        if !client.started {
            client.started = true;
            if !client.handle.activate() {
                return None;
            }
            return Some((Ok(Bytes::from_static(sse::CONNECTED)), client));
        }

        let message = client.handle.recv().await?;
        Some((Ok(sse::frame(message.as_bytes())), client))
    })
}
