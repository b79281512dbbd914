use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;

pub mod config;
pub mod domain;
pub mod errors;
pub mod http;
pub mod logging;
pub mod mcp;
pub mod memory_store;
pub mod session;

use memory_store::MemoryStore;
use session::SessionRegistry;

#[derive(Clone)]
pub struct AppState {
    pub memory: Arc<dyn MemoryStore>,
    pub sessions: SessionRegistry,
}

impl AppState {
    pub fn new(memory: Arc<dyn MemoryStore>) -> Self {
        Self {
            memory,
            sessions: SessionRegistry::new(),
        }
    }
}

pub fn build_app(state: AppState) -> Router {
    Router::new()
        .route("/", get(http::handlers::health))
        .route("/health", get(http::handlers::health))
        .route(
            "/mcp",
            post(http::handlers::mcp_post)
                .get(http::handlers::mcp_get)
                .delete(http::handlers::mcp_delete),
        )
        .layer(CorsLayer::permissive())
        .layer(middleware::from_fn(logging::request_logging_middleware))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use axum::{
        body::Body,
        http::{header, Request, Response, StatusCode},
    };
    use http_body_util::BodyExt;
    use serde_json::json;
    use tower::ServiceExt;

    use crate::errors::AppError;
    use crate::memory_store::{MemoryHit, MemoryStore};

    use super::*;

    #[derive(Default)]
    struct MockStore {
        added: Mutex<Vec<(String, String)>>,
    }

    #[async_trait::async_trait]
    impl MemoryStore for MockStore {
        async fn add(&self, content: &str, user_id: &str) -> Result<(), AppError> {
            self.added
                .lock()
                .expect("mock store lock")
                .push((content.to_string(), user_id.to_string()));
            Ok(())
        }

        async fn search(&self, query: &str, _user_id: &str) -> Result<Vec<MemoryHit>, AppError> {
            if query == "coffee" {
                Ok(vec![
                    MemoryHit {
                        memory: "likes espresso".to_string(),
                        score: Some(0.91),
                    },
                    MemoryHit {
                        memory: "drinks two cups a day".to_string(),
                        score: Some(0.64),
                    },
                ])
            } else {
                Ok(vec![])
            }
        }
    }

    fn test_app() -> (Router, AppState, Arc<MockStore>) {
        let store = Arc::new(MockStore::default());
        let state = AppState::new(store.clone() as Arc<dyn MemoryStore>);
        (build_app(state.clone()), state, store)
    }

    async fn send(app: &Router, request: Request<Body>) -> Response<Body> {
        app.clone()
            .oneshot(request)
            .await
            .expect("request execution")
    }

    fn initialize_request() -> Request<Body> {
        Request::builder()
            .uri("/mcp")
            .method("POST")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(
                r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{"protocolVersion":"2024-11-05","clientInfo":{"name":"test-client","version":"1.0.0"},"capabilities":{}}}"#,
            ))
            .expect("request build")
    }

    fn post_with_session(session_id: &str, body: &str) -> Request<Body> {
        Request::builder()
            .uri("/mcp")
            .method("POST")
            .header(header::CONTENT_TYPE, "application/json")
            .header("mcp-session-id", session_id)
            .body(Body::from(body.to_string()))
            .expect("request build")
    }

    async fn body_json(response: Response<Body>) -> serde_json::Value {
        let body = response
            .into_body()
            .collect()
            .await
            .expect("collect body")
            .to_bytes();
        serde_json::from_slice(&body).expect("valid json response")
    }

    fn session_header(response: &Response<Body>) -> String {
        response
            .headers()
            .get("mcp-session-id")
            .expect("session id header")
            .to_str()
            .expect("ascii header value")
            .to_string()
    }

    fn assert_rejection_envelope(body_json: &serde_json::Value) {
        assert_eq!(body_json["jsonrpc"], json!("2.0"));
        assert_eq!(body_json["error"]["code"], json!(-32000));
        assert!(body_json["error"]["message"].is_string());
        assert_eq!(body_json["id"], json!(null));
    }

    #[tokio::test]
    async fn health_is_public() {
        let (app, _state, _store) = test_app();

        let response = send(
            &app,
            Request::builder()
                .uri("/health")
                .method("GET")
                .body(Body::empty())
                .expect("request build"),
        )
        .await;

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], json!("OK"));
        assert_eq!(body["server"], json!(env!("CARGO_PKG_NAME")));
        assert_eq!(body["version"], json!(env!("CARGO_PKG_VERSION")));
    }

    #[tokio::test]
    async fn root_serves_health() {
        let (app, _state, _store) = test_app();

        let response = send(
            &app,
            Request::builder()
                .uri("/")
                .method("GET")
                .body(Body::empty())
                .expect("request build"),
        )
        .await;

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], json!("OK"));
    }

    #[tokio::test]
    async fn post_without_session_and_non_initialize_body_is_rejected() {
        let (app, state, _store) = test_app();

        let response = send(
            &app,
            Request::builder()
                .uri("/mcp")
                .method("POST")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    r#"{"jsonrpc":"2.0","id":1,"method":"tools/list","params":{}}"#,
                ))
                .expect("request build"),
        )
        .await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_rejection_envelope(&body);
        assert_eq!(
            body["error"]["message"],
            json!("Bad Request: No valid session ID provided")
        );
        assert!(state.sessions.is_empty());
    }

    #[tokio::test]
    async fn malformed_post_body_is_rejected_without_a_session() {
        let (app, state, _store) = test_app();

        let response = send(
            &app,
            Request::builder()
                .uri("/mcp")
                .method("POST")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from("{"))
                .expect("request build"),
        )
        .await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_rejection_envelope(&body);
        assert!(state.sessions.is_empty());
    }

    #[tokio::test]
    async fn initialize_creates_a_session() {
        let (app, state, _store) = test_app();

        let response = send(&app, initialize_request()).await;

        assert_eq!(response.status(), StatusCode::OK);
        let session_id = session_header(&response);
        assert_eq!(state.sessions.len(), 1);
        assert!(state.sessions.get(&session_id).is_some());

        let body = body_json(response).await;
        assert_eq!(body["jsonrpc"], json!("2.0"));
        assert_eq!(body["id"], json!(1));
        assert_eq!(body["result"]["protocolVersion"], json!("2024-11-05"));
        assert_eq!(
            body["result"]["serverInfo"]["name"],
            json!(env!("CARGO_PKG_NAME"))
        );
        assert!(body["result"]["capabilities"]["tools"].is_object());
    }

    #[tokio::test]
    async fn initialize_with_unsupported_protocol_version_creates_no_session() {
        let (app, state, _store) = test_app();

        let response = send(
            &app,
            Request::builder()
                .uri("/mcp")
                .method("POST")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{"protocolVersion":"2026-01-01","clientInfo":{"name":"test-client","version":"1.0.0"},"capabilities":{}}}"#,
                ))
                .expect("request build"),
        )
        .await;

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get("mcp-session-id").is_none());
        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], json!(-32602));
        assert!(state.sessions.is_empty());
    }

    #[tokio::test]
    async fn post_with_unknown_session_id_is_rejected() {
        let (app, state, _store) = test_app();

        let response = send(
            &app,
            post_with_session(
                "e0f7a1d4-0000-4000-8000-123456789abc",
                r#"{"jsonrpc":"2.0","id":2,"method":"tools/list","params":{}}"#,
            ),
        )
        .await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_rejection_envelope(&body);
        assert!(state.sessions.is_empty());
    }

    #[tokio::test]
    async fn get_and_delete_without_session_are_rejected() {
        let (app, _state, _store) = test_app();

        for method in ["GET", "DELETE"] {
            let response = send(
                &app,
                Request::builder()
                    .uri("/mcp")
                    .method(method)
                    .header(header::ACCEPT, "text/event-stream")
                    .body(Body::empty())
                    .expect("request build"),
            )
            .await;

            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
            let body = body_json(response).await;
            assert_rejection_envelope(&body);
        }
    }

    #[tokio::test]
    async fn get_with_unknown_session_is_rejected_regardless_of_other_sessions() {
        let (app, state, _store) = test_app();

        let response = send(&app, initialize_request()).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(state.sessions.len(), 1);

        let response = send(
            &app,
            Request::builder()
                .uri("/mcp")
                .method("GET")
                .header(header::ACCEPT, "text/event-stream")
                .header("mcp-session-id", "11111111-2222-4333-8444-555555555555")
                .body(Body::empty())
                .expect("request build"),
        )
        .await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_rejection_envelope(&body);
        assert_eq!(state.sessions.len(), 1);
    }

    #[tokio::test]
    async fn get_with_session_opens_an_event_stream() {
        let (app, _state, _store) = test_app();

        let response = send(&app, initialize_request()).await;
        let session_id = session_header(&response);

        let response = send(
            &app,
            Request::builder()
                .uri("/mcp")
                .method("GET")
                .header(header::ACCEPT, "text/event-stream")
                .header("mcp-session-id", session_id)
                .body(Body::empty())
                .expect("request build"),
        )
        .await;

        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default();
        assert!(content_type.starts_with("text/event-stream"));
    }

    #[tokio::test]
    async fn get_without_event_stream_accept_is_rejected() {
        let (app, _state, _store) = test_app();

        let response = send(&app, initialize_request()).await;
        let session_id = session_header(&response);

        let response = send(
            &app,
            Request::builder()
                .uri("/mcp")
                .method("GET")
                .header(header::ACCEPT, "application/json")
                .header("mcp-session-id", session_id)
                .body(Body::empty())
                .expect("request build"),
        )
        .await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(
            body["error"]["message"],
            json!("Bad Request: Transport type mismatch")
        );
    }

    #[tokio::test]
    async fn session_lifecycle_initialize_reuse_then_delete() {
        let (app, state, _store) = test_app();

        let response = send(&app, initialize_request()).await;
        assert_eq!(response.status(), StatusCode::OK);
        let session_id = session_header(&response);
        assert_eq!(state.sessions.len(), 1);

        let response = send(
            &app,
            post_with_session(
                &session_id,
                r#"{"jsonrpc":"2.0","id":2,"method":"tools/list","params":{}}"#,
            ),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(session_header(&response), session_id);
        let body = body_json(response).await;
        assert_eq!(body["result"]["tools"][0]["name"], json!("add-memory"));
        assert_eq!(body["result"]["tools"][1]["name"], json!("search-memories"));
        assert_eq!(state.sessions.len(), 1);

        let response = send(
            &app,
            Request::builder()
                .uri("/mcp")
                .method("DELETE")
                .header("mcp-session-id", session_id.clone())
                .body(Body::empty())
                .expect("request build"),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(state.sessions.is_empty());

        let response = send(
            &app,
            Request::builder()
                .uri("/mcp")
                .method("GET")
                .header(header::ACCEPT, "text/event-stream")
                .header("mcp-session-id", session_id)
                .body(Body::empty())
                .expect("request build"),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn concurrent_initializes_create_distinct_sessions() {
        let (app, state, _store) = test_app();

        let (first, second) = tokio::join!(
            send(&app, initialize_request()),
            send(&app, initialize_request())
        );

        assert_eq!(first.status(), StatusCode::OK);
        assert_eq!(second.status(), StatusCode::OK);

        let first_id = session_header(&first);
        let second_id = session_header(&second);
        assert_ne!(first_id, second_id);
        assert_eq!(state.sessions.len(), 2);
        assert!(state.sessions.get(&first_id).is_some());
        assert!(state.sessions.get(&second_id).is_some());
    }

    #[tokio::test]
    async fn tools_call_add_memory_reaches_the_store() {
        let (app, _state, store) = test_app();

        let response = send(&app, initialize_request()).await;
        let session_id = session_header(&response);

        let response = send(
            &app,
            post_with_session(
                &session_id,
                r#"{"jsonrpc":"2.0","id":3,"method":"tools/call","params":{"name":"add-memory","arguments":{"content":"likes espresso","user_id":"user-1"}}}"#,
            ),
        )
        .await;

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(
            body["result"]["content"][0]["text"],
            json!("Memory added successfully")
        );

        let added = store.added.lock().expect("mock store lock");
        assert_eq!(
            *added,
            vec![("likes espresso".to_string(), "user-1".to_string())]
        );
    }

    #[tokio::test]
    async fn tools_call_search_memories_formats_results() {
        let (app, _state, _store) = test_app();

        let response = send(&app, initialize_request()).await;
        let session_id = session_header(&response);

        let response = send(
            &app,
            post_with_session(
                &session_id,
                r#"{"jsonrpc":"2.0","id":4,"method":"tools/call","params":{"name":"search-memories","arguments":{"query":"coffee","user_id":"user-1"}}}"#,
            ),
        )
        .await;

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        let text = body["result"]["content"][0]["text"]
            .as_str()
            .expect("text content");
        assert!(text.contains("Memory: likes espresso"));
        assert!(text.contains("Relevance: 0.91"));
        assert_eq!(
            body["result"]["structuredContent"]["memories"]
                .as_array()
                .map(Vec::len),
            Some(2)
        );
        assert_eq!(body["result"]["structuredContent"]["returned"], json!(2));
    }

    #[tokio::test]
    async fn tools_call_search_without_matches_reports_none() {
        let (app, _state, _store) = test_app();

        let response = send(&app, initialize_request()).await;
        let session_id = session_header(&response);

        let response = send(
            &app,
            post_with_session(
                &session_id,
                r#"{"jsonrpc":"2.0","id":5,"method":"tools/call","params":{"name":"search-memories","arguments":{"query":"unknown topic","user_id":"user-1"}}}"#,
            ),
        )
        .await;

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(
            body["result"]["content"][0]["text"],
            json!("No memories found")
        );
    }

    #[tokio::test]
    async fn notification_to_established_session_returns_no_content() {
        let (app, _state, _store) = test_app();

        let response = send(&app, initialize_request()).await;
        let session_id = session_header(&response);

        let response = send(
            &app,
            post_with_session(&session_id, r#"{"jsonrpc":"2.0","method":"ping"}"#),
        )
        .await;

        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn batch_mixed_requests_return_only_id_responses() {
        let (app, _state, _store) = test_app();

        let response = send(&app, initialize_request()).await;
        let session_id = session_header(&response);

        let response = send(
            &app,
            post_with_session(
                &session_id,
                r#"[{"jsonrpc":"2.0","method":"ping"},{"jsonrpc":"2.0","id":100,"method":"ping"},{"jsonrpc":"2.0","id":200,"method":"tools/list","params":{}}]"#,
            ),
        )
        .await;

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        let responses = body.as_array().expect("batch response array");
        assert_eq!(responses.len(), 2);
        let ids: Vec<i64> = responses
            .iter()
            .filter_map(|item| item["id"].as_i64())
            .collect();
        assert!(ids.contains(&100));
        assert!(ids.contains(&200));
    }
}
