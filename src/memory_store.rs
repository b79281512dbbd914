use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::errors::AppError;

const HTTP_REQUEST_TIMEOUT_SECS: u64 = 30;

/// One stored memory returned by a search, with its relevance score.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MemoryHit {
    pub memory: String,
    #[serde(default)]
    pub score: Option<f64>,
}

#[async_trait]
pub trait MemoryStore: Send + Sync {
    async fn add(&self, content: &str, user_id: &str) -> Result<(), AppError>;
    async fn search(&self, query: &str, user_id: &str) -> Result<Vec<MemoryHit>, AppError>;
}

/// REST client for the hosted mem0 memory service.
pub struct Mem0Client {
    http: Client,
    base_url: String,
    api_key: String,
}

impl Mem0Client {
    pub fn new(base_url: String, api_key: String) -> Result<Self, AppError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(HTTP_REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|err| AppError::upstream(format!("failed to build http client: {err}")))?;

        Ok(Self {
            http,
            base_url,
            api_key,
        })
    }

    async fn post_json(&self, path: &str, body: Value) -> Result<Value, AppError> {
        let response = self
            .http
            .post(format!("{}{}", self.base_url, path))
            .header("Authorization", format!("Token {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|err| AppError::upstream(format!("memory service unreachable: {err}")))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(AppError::upstream(format!(
                "memory service returned {status}: {detail}"
            )));
        }

        response
            .json()
            .await
            .map_err(|err| AppError::upstream(format!("invalid memory service response: {err}")))
    }
}

#[async_trait]
impl MemoryStore for Mem0Client {
    async fn add(&self, content: &str, user_id: &str) -> Result<(), AppError> {
        let body = json!({
            "messages": [
                { "role": "assistant", "content": "Memory storage system" },
                { "role": "user", "content": content },
            ],
            "user_id": user_id,
        });

        self.post_json("/v1/memories/", body).await.map(|_| ())
    }

    async fn search(&self, query: &str, user_id: &str) -> Result<Vec<MemoryHit>, AppError> {
        let body = json!({
            "query": query,
            "user_id": user_id,
        });

        let payload = self.post_json("/v1/memories/search/", body).await?;
        Ok(parse_search_results(payload))
    }
}

/// The service answers either a bare array or `{"results": [...]}` depending
/// on API version; entries missing a `memory` field are dropped.
fn parse_search_results(payload: Value) -> Vec<MemoryHit> {
    let entries = match payload {
        Value::Array(entries) => entries,
        Value::Object(mut object) => match object.remove("results") {
            Some(Value::Array(entries)) => entries,
            _ => return Vec::new(),
        },
        _ => return Vec::new(),
    };

    entries
        .into_iter()
        .filter_map(|entry| serde_json::from_value::<MemoryHit>(entry).ok())
        .collect()
}
