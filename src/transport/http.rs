//! Streamable HTTP transport.
//!
//! Two sub-variants share one session table and event store:
//!
//! - **Streamable** (`POST /mcp`, JSON per request): one request, one
//!   JSON-RPC envelope back. Notifications produced during a call surface in
//!   the result's `_meta.logs`.
//! - **SSE** (`GET /mcp` + `POST /mcp`): the GET opens an EventSource that
//!   first emits a `session_id` event, optionally replays events after
//!   `Last-Event-ID`, then streams the session's outbound queue with a 30s
//!   keepalive `ping`. POST responses are enqueued onto that stream.
//!
//! Inbound bodies over 1 MiB are rejected. Sessions idle past the timeout
//! are evicted; beyond the session cap, oldest-by-last-active go first.

use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tower_http::cors::{Any, CorsLayer};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::server::McpServer;
use crate::transport::event_store::{EventStore, InMemoryEventStore};
use crate::types::jsonrpc::JsonRpcResponse;

/// `Mcp-Session-Id` request/response header.
pub const MCP_SESSION_ID: &str = "mcp-session-id";
/// `mcp-protocol-version` request header.
pub const MCP_PROTOCOL_VERSION: &str = "mcp-protocol-version";
/// `Last-Event-ID` resumability header.
pub const LAST_EVENT_ID: &str = "last-event-id";

const MAX_BODY_BYTES: usize = 1024 * 1024;
const KEEPALIVE: Duration = Duration::from_secs(30);

/// Which HTTP sub-variant the transport speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMode {
    /// JSON envelope per POST; no server-to-client stream
    Streamable,
    /// Bidirectional: POST in, SSE out
    Sse,
}

type Receivers = Arc<Mutex<HashMap<String, mpsc::Receiver<Option<Value>>>>>;

#[derive(Clone)]
struct HttpState {
    server: Arc<McpServer>,
    event_store: Arc<dyn EventStore>,
    mode: HttpMode,
    // Outbound queue receivers parked until a GET stream claims them.
    receivers: Receivers,
}

/// Serves a [`McpServer`] over HTTP.
pub struct HttpTransport {
    state: HttpState,
    mount_path: String,
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("mode", &self.state.mode)
            .field("mount_path", &self.mount_path)
            .finish()
    }
}

impl HttpTransport {
    /// Build a transport in the given mode, mounted at `/mcp`.
    pub fn new(server: Arc<McpServer>, mode: HttpMode) -> Self {
        let event_store = Arc::new(InMemoryEventStore::new(
            server.settings().max_events_per_stream,
        ));
        Self {
            state: HttpState {
                server,
                event_store,
                mode,
                receivers: Arc::new(Mutex::new(HashMap::new())),
            },
            mount_path: "/mcp".to_string(),
        }
    }

    /// The event store backing SSE resumability.
    pub fn event_store(&self) -> Arc<dyn EventStore> {
        self.state.event_store.clone()
    }

    /// The axum router for this transport.
    pub fn router(&self) -> Router {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers(Any)
            .expose_headers([
                header::HeaderName::from_static(MCP_SESSION_ID),
                header::HeaderName::from_static(MCP_PROTOCOL_VERSION),
            ]);
        Router::new()
            .route(&self.mount_path, get(handle_get).post(handle_post))
            .layer(cors)
            .with_state(self.state.clone())
    }

    /// Bind an address and serve in a background task; returns the bound
    /// address and the task handle.
    pub async fn start(self, addr: SocketAddr) -> Result<(SocketAddr, tokio::task::JoinHandle<()>)> {
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| Error::Transport(format!("failed to bind {addr}: {e}")))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| Error::Transport(e.to_string()))?;
        let router = self.router();
        let state = self.state.clone();
        state.server.start();
        let cleanup = tokio::spawn(cleanup_loop(state.clone()));

        let task = tokio::spawn(async move {
            if let Err(err) = axum::serve(listener, router).await {
                tracing::error!(target: "mcp.transport.http", error = %err, "serve failed");
            }
            cleanup.abort();
        });
        tracing::info!(
            target: "mcp.transport.http",
            addr = %local_addr,
            mode = ?self.state.mode,
            "HTTP server listening"
        );
        Ok((local_addr, task))
    }

    /// Serve until a shutdown signal arrives, then stop the server.
    pub async fn serve(self, addr: SocketAddr) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| Error::Transport(format!("failed to bind {addr}: {e}")))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| Error::Transport(e.to_string()))?;
        let router = self.router();
        let state = self.state;
        state.server.start();
        let cleanup = tokio::spawn(cleanup_loop(state.clone()));

        tracing::info!(
            target: "mcp.transport.http",
            addr = %local_addr,
            mode = ?state.mode,
            "HTTP server listening"
        );
        let outcome = axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await;
        cleanup.abort();
        state.server.stop().await;
        outcome.map_err(|e| Error::Transport(e.to_string()))
    }
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(json!({"error": message.into(), "status": "error"})),
    )
        .into_response()
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Bearer check for worker endpoints, enforced when a worker secret is
/// configured and auth is enabled.
fn check_worker_auth(state: &HttpState, headers: &HeaderMap) -> std::result::Result<(), Response> {
    let settings = state.server.settings();
    if settings.auth_disabled {
        return Ok(());
    }
    let Some(secret) = &settings.worker_secret else {
        return Ok(());
    };
    let authorized = header_str(headers, header::AUTHORIZATION.as_str())
        .and_then(|v| v.strip_prefix("Bearer "))
        .is_some_and(|token| token == secret);
    if authorized {
        Ok(())
    } else {
        Err(error_response(
            StatusCode::UNAUTHORIZED,
            "Invalid or missing worker credentials",
        ))
    }
}

fn check_protocol_version(headers: &HeaderMap) -> std::result::Result<(), Response> {
    if let Some(version) = header_str(headers, MCP_PROTOCOL_VERSION) {
        if !crate::SUPPORTED_PROTOCOL_VERSIONS.contains(&version) {
            return Err(error_response(
                StatusCode::BAD_REQUEST,
                format!("Unsupported protocol version: {version}"),
            ));
        }
    }
    Ok(())
}

async fn handle_post(
    State(state): State<HttpState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Err(resp) = check_worker_auth(&state, &headers) {
        return resp;
    }

    let content_type = header_str(&headers, header::CONTENT_TYPE.as_str()).unwrap_or("");
    if !content_type.starts_with("application/json") {
        return error_response(
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            "Content-Type must be application/json",
        );
    }
    if body.len() > MAX_BODY_BYTES {
        return error_response(
            StatusCode::PAYLOAD_TOO_LARGE,
            "Request body too large (max 1MB)",
        );
    }
    if let Err(resp) = check_protocol_version(&headers) {
        return resp;
    }

    let payload: Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(err) => {
            return error_response(StatusCode::BAD_REQUEST, format!("Invalid JSON: {err}"));
        },
    };

    let is_initialize = payload.get("method").and_then(Value::as_str) == Some("initialize");
    if is_initialize {
        handle_initialize_post(&state, payload).await
    } else {
        handle_session_post(&state, &headers, payload).await
    }
}

async fn handle_initialize_post(state: &HttpState, payload: Value) -> Response {
    let session_id = Uuid::new_v4().to_string();
    let (session, rx) = state.server.create_session(&session_id);
    state.event_store.create_stream(&session_id).await;

    match state.mode {
        HttpMode::Sse => {
            // The GET stream will drain this queue.
            state.receivers.lock().insert(session_id.clone(), rx);
        },
        HttpMode::Streamable => {
            // No server-to-client stream; dropping the receiver makes queue
            // writes fail fast instead of filling up.
            drop(rx);
        },
    }

    let response = state.server.handle_value(payload, Some(&session)).await;
    let Some(response) = response else {
        state.server.remove_session(&session_id);
        state.receivers.lock().remove(&session_id);
        return error_response(StatusCode::BAD_REQUEST, "initialize must be a request");
    };

    let version = session
        .negotiated_version()
        .unwrap_or_else(|| crate::LATEST_PROTOCOL_VERSION.to_string());

    let mut http_response = match state.mode {
        HttpMode::Sse => {
            if session.send(to_wire(&response)).await {
                (
                    StatusCode::OK,
                    Json(json!({"status": "ok", "session_id": session_id})),
                )
                    .into_response()
            } else {
                state.server.remove_session(&session_id);
                state.receivers.lock().remove(&session_id);
                return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to initialize");
            }
        },
        HttpMode::Streamable => (StatusCode::OK, Json(to_wire(&response))).into_response(),
    };

    insert_session_headers(http_response.headers_mut(), &session_id, &version);
    http_response
}

async fn handle_session_post(state: &HttpState, headers: &HeaderMap, payload: Value) -> Response {
    let Some(session_id) = header_str(headers, MCP_SESSION_ID).map(str::to_string) else {
        return error_response(
            StatusCode::BAD_REQUEST,
            "Mcp-Session-Id header required for non-initialization requests",
        );
    };
    let Some(session) = state.server.session(&session_id) else {
        return error_response(StatusCode::NOT_FOUND, "Invalid or expired session ID");
    };
    session.touch();

    let response = state.server.handle_value(payload, Some(&session)).await;
    let version = session
        .negotiated_version()
        .unwrap_or_else(|| crate::LATEST_PROTOCOL_VERSION.to_string());

    let mut http_response = match response {
        // Notifications and routed responses produce no envelope.
        None => StatusCode::ACCEPTED.into_response(),
        Some(response) => match state.mode {
            HttpMode::Sse => {
                if session.send(to_wire(&response)).await {
                    (StatusCode::OK, Json(json!({"status": "ok"}))).into_response()
                } else {
                    error_response(StatusCode::INTERNAL_SERVER_ERROR, "Session stream closed")
                }
            },
            HttpMode::Streamable => (StatusCode::OK, Json(to_wire(&response))).into_response(),
        },
    };
    insert_session_headers(http_response.headers_mut(), &session_id, &version);
    http_response
}

async fn handle_get(State(state): State<HttpState>, headers: HeaderMap) -> Response {
    if state.mode != HttpMode::Sse {
        return error_response(
            StatusCode::METHOD_NOT_ALLOWED,
            "SSE not supported in streamable mode",
        );
    }

    let accept = header_str(&headers, header::ACCEPT.as_str()).unwrap_or("");
    if !accept.contains("text/event-stream") && !accept.contains("*/*") {
        return error_response(
            StatusCode::NOT_ACCEPTABLE,
            "Accept header must include text/event-stream",
        );
    }
    if let Err(resp) = check_protocol_version(&headers) {
        return resp;
    }

    // A session id header attaches to an existing session; otherwise the GET
    // opens a fresh one.
    let session_id = match header_str(&headers, MCP_SESSION_ID) {
        Some(sid) => {
            if state.server.session(sid).is_none() {
                return error_response(StatusCode::NOT_FOUND, "Unknown session ID");
            }
            sid.to_string()
        },
        None => {
            let session_id = Uuid::new_v4().to_string();
            let (session, rx) = state.server.create_session(&session_id);
            session.mark_initialized();
            state.event_store.create_stream(&session_id).await;
            state.receivers.lock().insert(session_id.clone(), rx);
            session_id
        },
    };

    let Some(rx) = state.receivers.lock().remove(&session_id) else {
        return error_response(
            StatusCode::CONFLICT,
            "SSE stream already exists for this session",
        );
    };

    let last_event_id = header_str(&headers, LAST_EVENT_ID).and_then(|v| v.parse::<u64>().ok());

    let (events_tx, events_rx) = mpsc::channel::<Event>(16);
    tokio::spawn(stream_session(
        state.clone(),
        session_id.clone(),
        rx,
        last_event_id,
        events_tx,
    ));

    let stream = ReceiverStream::new(events_rx).map(Ok::<_, Infallible>);
    let mut response = Sse::new(stream).into_response();
    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&session_id) {
        headers.insert(MCP_SESSION_ID, value);
    }
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("no-cache, no-transform"),
    );
    response
}

/// Feed one session's SSE stream: handshake, replay, then live messages
/// with keepalive pings. Ends on the close sentinel or client disconnect;
/// the session is removed either way.
async fn stream_session(
    state: HttpState,
    session_id: String,
    mut rx: mpsc::Receiver<Option<Value>>,
    last_event_id: Option<u64>,
    events: mpsc::Sender<Event>,
) {
    let handshake = Event::default()
        .event("session_id")
        .data(json!({"session_id": session_id}).to_string());
    if events.send(handshake).await.is_err() {
        finish_stream(&state, &session_id);
        return;
    }

    if last_event_id.is_some() {
        let replay = state
            .event_store
            .replay_events_after(&session_id, last_event_id, None)
            .await;
        for (event_id, payload) in replay {
            let event = Event::default()
                .id(event_id.to_string())
                .data(payload.to_string());
            if events.send(event).await.is_err() {
                finish_stream(&state, &session_id);
                return;
            }
        }
    }

    loop {
        match tokio::time::timeout(KEEPALIVE, rx.recv()).await {
            Ok(Some(Some(payload))) => {
                let event_id = state
                    .event_store
                    .store_event(&session_id, payload.clone())
                    .await;
                let event = Event::default()
                    .id(event_id.to_string())
                    .data(payload.to_string());
                if events.send(event).await.is_err() {
                    break;
                }
            },
            // Close sentinel or producer side dropped.
            Ok(Some(None)) | Ok(None) => break,
            Err(_) => {
                let ping = Event::default().event("ping").data("{}");
                if events.send(ping).await.is_err() {
                    break;
                }
            },
        }
    }
    finish_stream(&state, &session_id);
}

fn finish_stream(state: &HttpState, session_id: &str) {
    state.server.remove_session(session_id);
    state.receivers.lock().remove(session_id);
    tracing::debug!(target: "mcp.transport.http", session = %session_id, "SSE stream closed");
}

fn insert_session_headers(headers: &mut HeaderMap, session_id: &str, version: &str) {
    if let Ok(value) = HeaderValue::from_str(session_id) {
        headers.insert(MCP_SESSION_ID, value);
    }
    if let Ok(value) = HeaderValue::from_str(version) {
        headers.insert(MCP_PROTOCOL_VERSION, value);
    }
}

fn to_wire(response: &JsonRpcResponse) -> Value {
    serde_json::to_value(response).unwrap_or(Value::Null)
}

/// Evict idle sessions; past the cap, evict oldest-by-last-active first.
async fn cleanup_loop(state: HttpState) {
    let interval = state.server.settings().cleanup_interval;
    let timeout = state.server.settings().session_timeout;
    let max_sessions = state.server.settings().max_sessions;

    let mut tick = tokio::time::interval(interval);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tick.tick().await;

        let sessions = state.server.sessions();
        let mut evict: Vec<Arc<crate::server::Session>> = sessions
            .iter()
            .filter(|s| s.idle_for() > timeout)
            .cloned()
            .collect();

        if sessions.len() > max_sessions {
            let mut by_age = sessions.clone();
            by_age.sort_by_key(|s| s.last_active());
            let excess = sessions.len() - max_sessions;
            for session in by_age.into_iter().take(excess) {
                if !evict.iter().any(|s| s.session_id == session.session_id) {
                    evict.push(session);
                }
            }
        }

        for session in evict {
            tracing::info!(
                target: "mcp.transport.http",
                session = %session.session_id,
                "evicting session"
            );
            session.close().await;
            state.server.remove_session(&session.session_id);
            state.event_store.delete_stream(&session.session_id).await;
            state.receivers.lock().remove(&session.session_id);
        }
    }
}
