//! Axum HTTP handlers for the web server
//!
//! The `/mcp` handlers are the request router of the session layer: for every
//! exchange they decide, from the HTTP method, the `mcp-session-id` header,
//! and (for POST) the decoded body, whether the exchange creates a session,
//! reuses one, or is rejected. The registry is consulted per request and is
//! the only authority on session liveness.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::mcp::rpc::{session_error_envelope, NO_VALID_SESSION, TRANSPORT_MISMATCH};
use crate::mcp::server::is_initialize_request;
use crate::session::{SessionRegistry, SessionTransport, MCP_SESSION_ID_HEADER};
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub server: &'static str,
    pub version: &'static str,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "OK",
        server: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// POST /mcp: create, reuse, or reject, in that order of evaluation.
pub async fn mcp_post(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let Ok(payload) = serde_json::from_slice::<Value>(&body) else {
        // A body the transport cannot decode never reaches a session.
        return reject(TRANSPORT_MISMATCH);
    };

    match session_id(&headers) {
        Some(id) => match state.sessions.get(id) {
            Some(transport) => transport.handle_request(&state, payload).await,
            None => reject(NO_VALID_SESSION),
        },
        None if is_initialize_request(&payload) => {
            let transport = Arc::new(SessionTransport::new());
            let response = transport.handle_request(&state, payload).await;

            // The transport's own initialized state is the signal to register;
            // a failed handshake leaves no registry trace.
            if transport.is_initialized() {
                state
                    .sessions
                    .put(transport.id().to_string(), Arc::clone(&transport));
                remove_on_close(state.sessions.clone(), &transport);
                debug!(session_id = %transport.id(), "session established");
            }

            response
        }
        None => reject(NO_VALID_SESSION),
    }
}

/// GET /mcp: continue an established session over a streamed channel.
pub async fn mcp_get(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let Some(id) = session_id(&headers) else {
        return reject(NO_VALID_SESSION);
    };
    let Some(transport) = state.sessions.get(id) else {
        return reject(NO_VALID_SESSION);
    };

    if !accepts_event_stream(&headers) {
        return reject(TRANSPORT_MISMATCH);
    }

    transport.open_stream().into_response()
}

/// DELETE /mcp: explicit termination of an established session.
pub async fn mcp_delete(State(state): State<AppState>, headers: HeaderMap) -> Response {
    match session_id(&headers).and_then(|id| state.sessions.get(id)) {
        Some(transport) => {
            transport.close();
            // The close signal also triggers the bound cleanup task; removing
            // here as well makes termination synchronous with the response.
            state.sessions.remove(transport.id());
            StatusCode::OK.into_response()
        }
        None => reject(NO_VALID_SESSION),
    }
}

/// Binds the transport's close signal to removal of its registry entry.
fn remove_on_close(sessions: SessionRegistry, transport: &SessionTransport) {
    let mut closed = transport.closed_signal();
    let id = transport.id().to_string();

    tokio::spawn(async move {
        if closed.wait_for(|closed| *closed).await.is_ok() {
            sessions.remove(&id);
            debug!(session_id = %id, "session closed");
        }
    });
}

fn session_id(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(MCP_SESSION_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|id| !id.is_empty())
}

fn accepts_event_stream(headers: &HeaderMap) -> bool {
    headers
        .get(header::ACCEPT)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|accept| accept.contains("text/event-stream") || accept.contains("*/*"))
}

fn reject(message: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(session_error_envelope(message)),
    )
        .into_response()
}
