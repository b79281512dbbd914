//! Interactive tools exposed via Model Context Protocol
//!
//! Provides `add-memory` and `search-memories` implementations by delegating
//! to the configured `MemoryStore` dynamically.

use chrono::{SecondsFormat, Utc};
use rust_mcp_sdk::{
    macros,
    schema::{CallToolRequestParams, CallToolResult, ContentBlock, TextContent, Tool},
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::errors::AppError;
use crate::mcp::rpc::{json_rpc_error, json_rpc_error_with_data, json_rpc_result};
use crate::memory_store::MemoryHit;
use crate::AppState;

#[macros::mcp_tool(
    name = "add-memory",
    description = "Store a new memory for a user. Call this whenever the user shares information about themselves, their preferences, or anything worth recalling in future conversations."
)]
#[derive(Debug, Deserialize, Serialize, macros::JsonSchema)]
pub struct AddMemoryTool {
    /// The content to store in memory.
    pub content: String,
    /// User the memory belongs to.
    pub user_id: String,
}

#[macros::mcp_tool(
    name = "search-memories",
    description = "Search through memories stored for a user and return the most relevant ones."
)]
#[derive(Debug, Deserialize, Serialize, macros::JsonSchema)]
pub struct SearchMemoriesTool {
    /// Free-text query describing what to recall.
    pub query: String,
    /// User whose memories are searched.
    pub user_id: String,
}

pub fn build_tools_list() -> Vec<Tool> {
    vec![AddMemoryTool::tool(), SearchMemoriesTool::tool()]
}

pub async fn handle_tools_call(state: &AppState, id: Option<Value>, params: Option<Value>) -> Value {
    let Some(raw_params) = params else {
        return json_rpc_error(id, -32602, "Invalid params");
    };

    let tool_call: CallToolRequestParams = match serde_json::from_value(raw_params) {
        Ok(value) => value,
        Err(_) => return json_rpc_error(id, -32602, "Invalid params"),
    };

    match tool_call.name.as_str() {
        "add-memory" => {
            let args: AddMemoryTool =
                match serde_json::from_value(json!(tool_call.arguments.unwrap_or_default())) {
                    Ok(value) => value,
                    Err(_) => return json_rpc_error(id, -32602, "Invalid params"),
                };

            match state.memory.add(&args.content, &args.user_id).await {
                Ok(()) => json_rpc_result(
                    id,
                    serde_json::to_value(CallToolResult {
                        content: vec![ContentBlock::from(TextContent::new(
                            "Memory added successfully".to_string(),
                            None,
                            None,
                        ))],
                        is_error: None,
                        meta: None,
                        structured_content: None,
                    })
                    .expect("add-memory tool result serialization"),
                ),
                Err(err) => tool_failure(id, &err),
            }
        }
        "search-memories" => {
            let args: SearchMemoriesTool =
                match serde_json::from_value(json!(tool_call.arguments.unwrap_or_default())) {
                    Ok(value) => value,
                    Err(_) => return json_rpc_error(id, -32602, "Invalid params"),
                };

            match state.memory.search(&args.query, &args.user_id).await {
                Ok(hits) => {
                    let returned = hits.len();
                    let generated_at_utc = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);

                    json_rpc_result(
                        id,
                        serde_json::to_value(CallToolResult {
                            content: vec![ContentBlock::from(TextContent::new(
                                format_memories(&hits),
                                None,
                                None,
                            ))],
                            is_error: None,
                            meta: None,
                            structured_content: Some(serde_json::Map::from_iter([
                                ("memories".to_string(), json!(hits)),
                                ("returned".to_string(), json!(returned)),
                                ("generated_at_utc".to_string(), json!(generated_at_utc)),
                            ])),
                        })
                        .expect("search-memories tool result serialization"),
                    )
                }
                Err(err) => tool_failure(id, &err),
            }
        }
        _ => json_rpc_error_with_data(
            id,
            -32601,
            "Method not found",
            Some(json!({
                "code": "tool_not_found",
                "message": "unknown tool name",
                "details": {
                    "name": tool_call.name,
                },
            })),
        ),
    }
}

/// Store failures are reported inside a successful JSON-RPC response with
/// `isError` set, so the protocol exchange itself still completes.
fn tool_failure(id: Option<Value>, err: &AppError) -> Value {
    json_rpc_result(
        id,
        serde_json::to_value(CallToolResult {
            content: vec![ContentBlock::from(TextContent::new(
                format!("Error: {err}"),
                None,
                None,
            ))],
            is_error: Some(true),
            meta: None,
            structured_content: None,
        })
        .expect("tool failure result serialization"),
    )
}

pub fn format_memories(hits: &[MemoryHit]) -> String {
    if hits.is_empty() {
        return "No memories found".to_string();
    }

    hits.iter()
        .map(|hit| {
            let relevance = hit
                .score
                .map(|score| score.to_string())
                .unwrap_or_else(|| "n/a".to_string());
            format!("Memory: {}\nRelevance: {relevance}\n---", hit.memory)
        })
        .collect::<Vec<_>>()
        .join("\n")
}
