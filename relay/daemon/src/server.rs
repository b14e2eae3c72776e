//! Daemon Server Implementation
//!
//! HTTP and WebSocket front end for the relay:
//! - `GET /ws?user_id=` registers a hub connection per socket
//! - `POST /chat` streams one request as NDJSON
//! - `POST /chat/complete` returns one collected request
//! - `GET|PUT /params` reads or replaces the sampling parameters
//! - `GET /status`, `GET /health`, `GET /` for operators
//!
//! # Per-Socket Tasks
//!
//! ```text
//!                 ┌──────────── WebSocket ────────────┐
//!                 │                                   │
//!            reader task                         writer task
//!     (parses user_message, spawns      (drains the hub's OutboundQueue,
//!      one request worker each)          writes ai_response envelopes)
//!                 │                                   ▲
//!                 ▼                                   │
//!        StreamDriver::run_prompt ──► HubSink ──► ConnectionHub
//! ```
//!
//! When either side ends, the other is aborted, in-flight workers are
//! cancelled and the connection is unregistered.

use std::convert::Infallible;
use std::future::Future;

use anyhow::Result;
use axum::{
    body::Body,
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

use relay_core::{
    parse_directive, CallbackSink, ChatMessage, ConnectionHub, ConnectionId, ConnectionInfo,
    Delivery, ModelParams, RelayConfig, StageEvent, StreamDriver, StreamOutcome,
};

use crate::wire::{ChatBody, ChatLine, ChatMode, ClientMessage, CompleteBody, ServerEnvelope};

const INDEX_HTML: &str = include_str!("../static/index.html");

/// Protocol-level frame limit, as a multiple of `max_message_bytes`
///
/// Messages between the two limits are dropped by the reader with the
/// socket kept open; frames past this one end the socket.
const FRAME_CEILING_FACTOR: usize = 4;

/// Shared state for every route
#[derive(Clone, Debug)]
pub struct AppState {
    /// Live WebSocket connections
    pub hub: ConnectionHub,
    /// Upstream driver, shared by all requests
    pub driver: StreamDriver,
    /// Upstream base URL, for status output
    pub base_url: String,
    /// Largest accepted inbound message in bytes
    pub max_message_bytes: usize,
    /// Capacity of the per-request NDJSON channel
    pub stream_capacity: usize,
    /// When the daemon started
    pub started_at: DateTime<Utc>,
}

impl AppState {
    /// Build state from resolved configuration
    #[must_use]
    pub fn new(hub: ConnectionHub, driver: StreamDriver, config: &RelayConfig) -> Self {
        Self {
            hub,
            driver,
            base_url: config.upstream.base_url.clone(),
            max_message_bytes: config.max_message_bytes,
            stream_capacity: config.outbound_queue_capacity,
            started_at: Utc::now(),
        }
    }
}

/// Build the router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/status", get(status))
        .route("/params", get(get_params).put(put_params))
        .route("/chat", post(chat))
        .route("/chat/complete", post(chat_complete))
        .route("/ws", get(ws_handler))
        .with_state(state)
}

/// Serve until `shutdown` resolves
///
/// # Errors
///
/// Returns an error if the server fails while accepting connections.
pub async fn serve<F>(listener: TcpListener, state: AppState, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let address = listener.local_addr()?;
    let hub = state.hub.clone();
    info!(address = %address, "Relay daemon listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            shutdown.await;
            // Open sockets would otherwise hold the shutdown forever
            hub.close_all();
        })
        .await?;

    info!("Relay daemon stopped");
    Ok(())
}

// =============================================================================
// Operator Routes
// =============================================================================

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "healthy" }))
}

/// Body of `GET /status`
#[derive(Debug, Serialize)]
pub struct StatusBody {
    status: &'static str,
    backend: String,
    model: String,
    thinking_mode: bool,
    base_url: String,
    params: ModelParams,
    connections: Vec<ConnectionInfo>,
    started_at: DateTime<Utc>,
    uptime_secs: i64,
}

async fn status(State(state): State<AppState>) -> Json<StatusBody> {
    let backend = state.driver.backend();
    Json(StatusBody {
        status: "running",
        backend: backend.name().to_string(),
        model: backend.model().to_string(),
        thinking_mode: backend.supports_reasoning(),
        base_url: state.base_url.clone(),
        params: *state.driver.params().snapshot(),
        connections: state.hub.connections(),
        started_at: state.started_at,
        uptime_secs: (Utc::now() - state.started_at).num_seconds(),
    })
}

async fn get_params(State(state): State<AppState>) -> Json<ModelParams> {
    Json(*state.driver.params().snapshot())
}

async fn put_params(State(state): State<AppState>, Json(params): Json<ModelParams>) -> Response {
    match state.driver.params().replace(params) {
        Ok(_) => Json(params).into_response(),
        Err(e) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}

// =============================================================================
// HTTP Chat
// =============================================================================

fn chat_request(state: &AppState, body: &ChatBody) -> Result<(Vec<ChatMessage>, bool), Response> {
    let mode: ChatMode = body
        .mode
        .parse()
        .map_err(|e: crate::wire::InvalidMode| (StatusCode::BAD_REQUEST, e.to_string()).into_response())?;

    let default = mode.reasoning(state.driver.backend().supports_reasoning());
    let directive = parse_directive(&body.message, default);
    Ok((vec![ChatMessage::user(directive.text)], directive.reasoning))
}

/// Stream one request as NDJSON
///
/// The body ends with a `complete` or `error` line. A reader too slow for
/// the channel gets an `error` line once it catches up, and the upstream
/// call is dropped.
async fn chat(State(state): State<AppState>, Json(body): Json<ChatBody>) -> Response {
    let (messages, reasoning) = match chat_request(&state, &body) {
        Ok(request) => request,
        Err(response) => return response,
    };

    let (tx, rx) = mpsc::channel::<ChatLine>(state.stream_capacity.max(1));
    let driver = state.driver.clone();
    tokio::spawn(async move {
        let lines = tx.clone();
        let mut sink = CallbackSink(move |event: StageEvent| {
            match lines.try_send(ChatLine::from(event)) {
                Ok(()) => Delivery::Accepted,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!("NDJSON reader too slow, truncating stream");
                    Delivery::Closed
                }
                // A dropped response body closes the channel and stops the run
                Err(mpsc::error::TrySendError::Closed(_)) => Delivery::Closed,
            }
        });
        let report = driver.run(messages, reasoning, &mut sink).await;
        if report.outcome == StreamOutcome::Abandoned {
            let _ = tx.send(ChatLine::truncated(report.session_id)).await;
        }
    });

    let lines = ReceiverStream::new(rx).map(|line| Ok::<_, Infallible>(line.to_ndjson()));

    (
        [
            (header::CONTENT_TYPE, "application/x-ndjson"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        Body::from_stream(lines),
    )
        .into_response()
}

async fn chat_complete(State(state): State<AppState>, Json(body): Json<ChatBody>) -> Response {
    let (messages, reasoning) = match chat_request(&state, &body) {
        Ok(request) => request,
        Err(response) => return response,
    };

    match state.driver.complete(messages, reasoning).await {
        Ok(response) => Json(CompleteBody {
            reasoning_content: response.reasoning,
            answer_content: response.answer,
            is_complete: response.complete,
        })
        .into_response(),
        Err(e) => {
            warn!(error = %e, "Collected chat failed");
            (StatusCode::BAD_GATEWAY, format!("AI error: {e}")).into_response()
        }
    }
}

// =============================================================================
// WebSocket
// =============================================================================

/// Query string of `GET /ws`
#[derive(Debug, Deserialize)]
pub struct WsParams {
    user_id: Option<String>,
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsParams>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let user_id = params
        .user_id
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| "anonymous".to_string());

    ws.max_message_size(state.max_message_bytes.saturating_mul(FRAME_CEILING_FACTOR))
        .on_upgrade(move |socket| handle_socket(socket, user_id, state))
}

async fn handle_socket(socket: WebSocket, user_id: String, state: AppState) {
    let (id, mut queue) = state.hub.register(user_id);
    let (mut sender, mut receiver) = socket.split();

    let mut send_task = tokio::spawn(async move {
        while let Some(event) = queue.recv().await {
            let json = match serde_json::to_string(&ServerEnvelope::from(event)) {
                Ok(json) => json,
                Err(e) => {
                    warn!(connection_id = %id, error = %e, "Failed to encode envelope");
                    continue;
                }
            };
            if sender.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
        let _ = sender.send(Message::Close(None)).await;
    });

    let reader_state = state.clone();
    let mut recv_task = tokio::spawn(async move {
        // Dropping the set aborts every worker still running
        let mut workers = JoinSet::new();
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => {
                    if let Some(content) = accept_text(id, &text, reader_state.max_message_bytes) {
                        spawn_worker(&mut workers, &reader_state, id, content);
                    }
                }
                Message::Close(_) => break,
                _ => {}
            }
            while workers.try_join_next().is_some() {}
        }
    });

    // If either task exits, abort the other.
    tokio::select! {
        _ = (&mut send_task) => recv_task.abort(),
        _ = (&mut recv_task) => send_task.abort(),
    }

    state.hub.unregister(id);
    info!(connection_id = %id, "WebSocket connection closed");
}

/// Prompt text of an inbound frame, if it should start a request
fn accept_text(id: ConnectionId, text: &str, max_bytes: usize) -> Option<String> {
    if text.len() > max_bytes {
        warn!(connection_id = %id, len = text.len(), "Rejecting oversized message");
        return None;
    }
    match serde_json::from_str::<ClientMessage>(text) {
        Ok(msg) if msg.is_user_message() => Some(msg.content),
        Ok(msg) => {
            debug!(connection_id = %id, kind = %msg.kind, "Ignoring message");
            None
        }
        Err(e) => {
            warn!(connection_id = %id, error = %e, "Received invalid JSON message");
            None
        }
    }
}

fn spawn_worker(workers: &mut JoinSet<()>, state: &AppState, id: ConnectionId, content: String) {
    let driver = state.driver.clone();
    let mut sink = state.hub.sink(id);
    workers.spawn(async move {
        let report = driver.run_prompt(&content, Vec::new(), &mut sink).await;
        debug!(
            connection_id = %id,
            session_id = %report.session_id,
            outcome = ?report.outcome,
            "Request worker finished"
        );
    });
}
