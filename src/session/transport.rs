use std::convert::Infallible;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use axum::{
    http::{HeaderName, HeaderValue, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use serde_json::{json, Value};
use tokio::sync::{broadcast, watch};
use tokio_stream::{wrappers::BroadcastStream, StreamExt};
use uuid::Uuid;

use super::MCP_SESSION_ID_HEADER;
use crate::mcp::rpc::{json_rpc_error, session_error_envelope, NO_VALID_SESSION};
use crate::mcp::server::{handle_json_rpc_value, is_initialize_request};
use crate::AppState;

/// Buffered server-initiated messages per session before slow SSE readers lag.
const SERVER_EVENT_BUFFER: usize = 16;

const STATE_FRESH: u8 = 0;
const STATE_INITIALIZED: u8 = 1;
const STATE_CLOSED: u8 = 2;

/// Stateful protocol endpoint for one logical session.
///
/// The transport owns one full decode/dispatch/encode cycle per HTTP exchange
/// and the session's lifecycle state: it starts fresh, becomes initialized
/// after a successful `initialize` exchange (at which point the router
/// registers it), and is closed at most once. Closure is signalled through a
/// watch channel so the router can bind registry cleanup to it; liveness is
/// never inferred from the absence of errors.
pub struct SessionTransport {
    id: String,
    state: AtomicU8,
    events: broadcast::Sender<Value>,
    closed_tx: watch::Sender<bool>,
}

impl SessionTransport {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(SERVER_EVENT_BUFFER);
        let (closed_tx, _) = watch::channel(false);

        Self {
            id: Uuid::new_v4().to_string(),
            state: AtomicU8::new(STATE_FRESH),
            events,
            closed_tx,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_initialized(&self) -> bool {
        self.state.load(Ordering::SeqCst) == STATE_INITIALIZED
    }

    pub fn is_closed(&self) -> bool {
        self.state.load(Ordering::SeqCst) == STATE_CLOSED
    }

    /// Fires the close signal at most once; closing twice is a no-op.
    pub fn close(&self) {
        if self.state.swap(STATE_CLOSED, Ordering::SeqCst) != STATE_CLOSED {
            let _ = self.closed_tx.send(true);
        }
    }

    /// Observers see `true` exactly once the transport has closed.
    pub fn closed_signal(&self) -> watch::Receiver<bool> {
        self.closed_tx.subscribe()
    }

    /// One decode -> dispatch -> encode cycle for a POST exchange.
    ///
    /// Accepts a single JSON-RPC envelope or a batch array. A notification-only
    /// payload produces 204; everything else produces 200 with the encoded
    /// response(s). Every response carries the session id header.
    pub async fn handle_request(&self, state: &AppState, payload: Value) -> Response {
        if self.is_closed() {
            return (
                StatusCode::BAD_REQUEST,
                Json(session_error_envelope(NO_VALID_SESSION)),
            )
                .into_response();
        }

        if let Some(batch) = payload.as_array() {
            if batch.is_empty() {
                return self.with_session_header(
                    (
                        StatusCode::OK,
                        Json(json!([json_rpc_error(None, -32600, "Invalid Request")])),
                    )
                        .into_response(),
                );
            }

            let mut responses = Vec::new();
            for item in batch {
                if let Some(response) = handle_json_rpc_value(state, item.clone()).await {
                    responses.push(response);
                }
            }

            if responses.is_empty() {
                return self.with_session_header(StatusCode::NO_CONTENT.into_response());
            }

            return self
                .with_session_header((StatusCode::OK, Json(Value::Array(responses))).into_response());
        }

        let initialize = is_initialize_request(&payload);
        match handle_json_rpc_value(state, payload).await {
            Some(reply) => {
                if initialize && reply.get("error").is_none() {
                    self.mark_initialized();
                }
                self.with_session_header((StatusCode::OK, Json(reply)).into_response())
            }
            None => self.with_session_header(StatusCode::NO_CONTENT.into_response()),
        }
    }

    /// The session's streamed channel (HTTP GET): an SSE stream of
    /// server-initiated protocol messages that ends when the session closes.
    pub fn open_stream(&self) -> Sse<impl futures::Stream<Item = Result<Event, Infallible>>> {
        let messages = BroadcastStream::new(self.events.subscribe()).filter_map(|event| {
            match event {
                Ok(message) => Some(Ok(Event::default()
                    .event("message")
                    .data(message.to_string()))),
                // Lagged receiver; missed messages are dropped.
                Err(_) => None,
            }
        });

        let mut closed = self.closed_tx.subscribe();
        let until_closed = async move {
            let _ = closed.wait_for(|closed| *closed).await;
        };

        Sse::new(futures::StreamExt::take_until(messages, until_closed)).keep_alive(
            KeepAlive::new()
                .interval(Duration::from_secs(15))
                .text("keep-alive"),
        )
    }

    fn mark_initialized(&self) {
        let _ = self.state.compare_exchange(
            STATE_FRESH,
            STATE_INITIALIZED,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
    }

    /// Responses carry the session id only once the handshake has succeeded;
    /// a failed initialize leaves no identifier for the caller to replay.
    fn with_session_header(&self, mut response: Response) -> Response {
        if !self.is_initialized() {
            return response;
        }

        let value =
            HeaderValue::from_str(&self.id).expect("session id is a valid header value");
        response
            .headers_mut()
            .insert(HeaderName::from_static(MCP_SESSION_ID_HEADER), value);
        response
    }
}

impl Default for SessionTransport {
    fn default() -> Self {
        Self::new()
    }
}
