//! Model Context Protocol backend over streamable HTTP
//!
//! The MCP server owns the business tools (menu, events, reservations). The
//! chat model runs against the OpenAI-compatible endpoint with those tools
//! attached, and tool calls are executed through JSON-RPC on the server.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OnceCell};

use super::openai::{ChatCompletionClient, ChatMessage, ToolCall, ToolDefinition};
use super::sse::SseDecoder;
use super::{Generation, LlmService};
use crate::context::ContextMessage;
use crate::pipeline::{FrameSender, TokenUsage};
use crate::{Error, Result};

/// Protocol revision announced during `initialize`
pub const PROTOCOL_VERSION: &str = "2025-03-26";

const SESSION_HEADER: &str = "Mcp-Session-Id";

/// Tool rounds per turn before the model must answer without tools
const MAX_TOOL_ROUNDS: usize = 5;

/// JSON-RPC request
#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<u64>,
    method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<serde_json::Value>,
}

/// JSON-RPC response
#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    id: Option<serde_json::Value>,
    #[serde(default)]
    result: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<RpcError>,
}

/// JSON-RPC error
#[derive(Debug, Deserialize)]
struct RpcError {
    #[serde(default)]
    code: Option<i64>,
    #[serde(default)]
    message: Option<String>,
}

/// Tool advertised by the MCP server
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct McpTool {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "inputSchema", default = "empty_schema")]
    pub input_schema: serde_json::Value,
}

fn empty_schema() -> serde_json::Value {
    serde_json::json!({ "type": "object", "properties": {} })
}

impl McpTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::function(
            self.name.clone(),
            self.description.clone(),
            self.input_schema.clone(),
        )
    }
}

#[derive(Debug, Deserialize)]
struct ToolList {
    #[serde(default)]
    tools: Vec<McpTool>,
}

/// Extract the response to request `id` from a JSON or SSE body
///
/// # Errors
///
/// Returns error if no matching response is found or it carries an error
pub fn parse_rpc_response(content_type: &str, body: &str, id: u64) -> Result<serde_json::Value> {
    let candidates: Vec<String> = if content_type.starts_with("text/event-stream") {
        let mut decoder = SseDecoder::new();
        let mut events = decoder.feed(body.as_bytes());
        events.extend(decoder.finish());
        events
    } else {
        vec![body.to_string()]
    };

    for candidate in candidates {
        let Ok(response) = serde_json::from_str::<RpcResponse>(&candidate) else {
            continue;
        };
        if response.id.as_ref().and_then(serde_json::Value::as_u64) != Some(id) {
            // Server notifications share the stream
            continue;
        }
        if let Some(error) = response.error {
            return Err(Error::Mcp(format!(
                "rpc error {}: {}",
                error.code.unwrap_or_default(),
                error.message.unwrap_or_else(|| "unknown error".to_string())
            )));
        }
        return Ok(response.result.unwrap_or(serde_json::Value::Null));
    }

    Err(Error::Mcp(format!("no response for request {id}")))
}

/// Flatten a `tools/call` result to text for the model
#[must_use]
pub fn tool_result_text(result: &serde_json::Value) -> String {
    let text: Vec<&str> = result
        .get("content")
        .and_then(serde_json::Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter(|item| item.get("type").and_then(serde_json::Value::as_str) == Some("text"))
                .filter_map(|item| item.get("text").and_then(serde_json::Value::as_str))
                .collect()
        })
        .unwrap_or_default();

    let body = if text.is_empty() {
        result.to_string()
    } else {
        text.join("\n")
    };

    if result.get("isError").and_then(serde_json::Value::as_bool) == Some(true) {
        format!("Error: {body}")
    } else {
        body
    }
}

/// JSON-RPC client for a streamable-HTTP MCP server
#[derive(Debug)]
pub struct McpHttpTransport {
    client: reqwest::Client,
    url: String,
    next_id: AtomicU64,
    session_id: Mutex<Option<String>>,
    initialized: OnceCell<()>,
}

impl McpHttpTransport {
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
            url: url.into(),
            next_id: AtomicU64::new(1),
            session_id: Mutex::new(None),
            initialized: OnceCell::new(),
        }
    }

    async fn post(&self, body: &RpcRequest<'_>) -> Result<reqwest::Response> {
        let mut builder = self
            .client
            .post(&self.url)
            .header("Accept", "application/json, text/event-stream")
            .json(body);
        if let Some(session) = self.session_id.lock().await.as_deref() {
            builder = builder.header(SESSION_HEADER, session);
        }

        let response = builder.send().await?;
        if let Some(session) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            *self.session_id.lock().await = Some(session.to_string());
        }

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Error::Mcp(format!("{} failed {status}: {text}", body.method)));
        }
        Ok(response)
    }

    async fn request(&self, method: &str, params: serde_json::Value) -> Result<serde_json::Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let response = self
            .post(&RpcRequest {
                jsonrpc: "2.0",
                id: Some(id),
                method,
                params: Some(params),
            })
            .await?;

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("application/json")
            .to_string();
        let body = response.text().await?;
        parse_rpc_response(&content_type, &body, id)
    }

    async fn notify(&self, method: &str) -> Result<()> {
        self.post(&RpcRequest {
            jsonrpc: "2.0",
            id: None,
            method,
            params: None,
        })
        .await
        .map(drop)
    }

    async fn ensure_initialized(&self) -> Result<()> {
        self.initialized
            .get_or_try_init(|| async {
                let result = self
                    .request(
                        "initialize",
                        serde_json::json!({
                            "protocolVersion": PROTOCOL_VERSION,
                            "capabilities": {},
                            "clientInfo": {
                                "name": env!("CARGO_PKG_NAME"),
                                "version": env!("CARGO_PKG_VERSION"),
                            },
                        }),
                    )
                    .await?;
                tracing::info!(
                    url = %self.url,
                    server = ?result.get("serverInfo"),
                    "MCP session initialized"
                );
                self.notify("notifications/initialized").await
            })
            .await?;
        Ok(())
    }

    /// List tools offered by the server
    ///
    /// # Errors
    ///
    /// Returns error if the server cannot be reached or answers malformed
    pub async fn list_tools(&self) -> Result<Vec<McpTool>> {
        self.ensure_initialized().await?;
        let result = self.request("tools/list", serde_json::json!({})).await?;
        let list: ToolList = serde_json::from_value(result)?;
        Ok(list.tools)
    }

    /// Call a tool, returning its result flattened to text
    ///
    /// # Errors
    ///
    /// Returns error if the call fails at the protocol level
    pub async fn call_tool(&self, name: &str, arguments: serde_json::Value) -> Result<String> {
        self.ensure_initialized().await?;
        let result = self
            .request(
                "tools/call",
                serde_json::json!({ "name": name, "arguments": arguments }),
            )
            .await?;
        Ok(tool_result_text(&result))
    }
}

/// Language model whose tools live on an MCP server
pub struct McpLlm {
    transport: McpHttpTransport,
    chat: ChatCompletionClient,
    tools: OnceCell<Vec<ToolDefinition>>,
}

impl McpLlm {
    #[must_use]
    pub fn new(transport: McpHttpTransport, chat: ChatCompletionClient) -> Self {
        Self {
            transport,
            chat,
            tools: OnceCell::new(),
        }
    }

    async fn tools(&self) -> Result<&[ToolDefinition]> {
        self.tools
            .get_or_try_init(|| async {
                let tools = self.transport.list_tools().await?;
                tracing::info!(
                    count = tools.len(),
                    tools = ?tools.iter().map(|t| t.name.as_str()).collect::<Vec<_>>(),
                    "loaded MCP tools"
                );
                Ok::<_, Error>(tools.iter().map(McpTool::definition).collect())
            })
            .await
            .map(Vec::as_slice)
    }

    async fn run_tool(&self, call: &ToolCall) -> String {
        let arguments = if call.function.arguments.trim().is_empty() {
            serde_json::json!({})
        } else {
            match serde_json::from_str(&call.function.arguments) {
                Ok(args) => args,
                Err(e) => return format!("Error: invalid arguments: {e}"),
            }
        };

        tracing::info!(tool = %call.function.name, "calling MCP tool");
        match self.transport.call_tool(&call.function.name, arguments).await {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(tool = %call.function.name, error = %e, "MCP tool failed");
                format!("Error: {e}")
            }
        }
    }
}

fn add_usage(total: &mut Option<TokenUsage>, usage: Option<TokenUsage>) {
    if let Some(usage) = usage {
        let sum = total.get_or_insert_with(TokenUsage::default);
        sum.prompt_tokens += usage.prompt_tokens;
        sum.completion_tokens += usage.completion_tokens;
        sum.total_tokens += usage.total_tokens;
    }
}

#[async_trait]
impl LlmService for McpLlm {
    fn name(&self) -> &'static str {
        "mcp_llm"
    }

    async fn generate(
        &self,
        messages: &[ContextMessage],
        downstream: &FrameSender,
    ) -> Result<Generation> {
        let tools = self.tools().await?;
        let mut wire: Vec<ChatMessage> = messages.iter().map(ChatMessage::from).collect();
        let mut generation = Generation::default();

        for round in 0..=MAX_TOOL_ROUNDS {
            // The last round answers without tools
            let offered = (round < MAX_TOOL_ROUNDS && !tools.is_empty()).then_some(tools);
            let turn = self.chat.stream_chat(&wire, offered, downstream).await?;

            add_usage(&mut generation.usage, turn.usage);
            if generation.ttfb.is_none() {
                generation.ttfb = turn.first_token;
            }

            if turn.tool_calls.is_empty() {
                return Ok(generation);
            }

            tracing::debug!(round, calls = turn.tool_calls.len(), "model requested tools");
            let calls = turn.tool_calls;
            let mut results = Vec::with_capacity(calls.len());
            for call in &calls {
                results.push(ChatMessage::tool_result(&call.id, self.run_tool(call).await));
            }
            wire.push(ChatMessage::assistant_tool_calls(turn.text, calls));
            wire.extend(results);
        }

        Ok(generation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_json_response() {
        let body = r#"{"jsonrpc":"2.0","id":3,"result":{"tools":[]}}"#;
        let result = parse_rpc_response("application/json", body, 3).unwrap();
        assert_eq!(result, serde_json::json!({ "tools": [] }));
    }

    #[test]
    fn parses_sse_response_skipping_notifications() {
        let body = concat!(
            "event: message\n",
            "data: {\"jsonrpc\":\"2.0\",\"method\":\"notifications/progress\",\"params\":{}}\n\n",
            "event: message\n",
            "data: {\"jsonrpc\":\"2.0\",\"id\":7,\"result\":{\"ok\":true}}\n\n",
        );
        let result = parse_rpc_response("text/event-stream; charset=utf-8", body, 7).unwrap();
        assert_eq!(result["ok"], true);
    }

    #[test]
    fn rpc_error_is_mcp_error() {
        let body = r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32601,"message":"Method not found"}}"#;
        let err = parse_rpc_response("application/json", body, 1).unwrap_err();
        assert!(matches!(err, Error::Mcp(ref m) if m.contains("Method not found")));
    }

    #[test]
    fn mismatched_id_is_error() {
        let body = r#"{"jsonrpc":"2.0","id":2,"result":{}}"#;
        assert!(parse_rpc_response("application/json", body, 1).is_err());
    }

    #[test]
    fn tool_text_joins_content_blocks() {
        let result = serde_json::json!({
            "content": [
                { "type": "text", "text": "Hefeweizen: available" },
                { "type": "image", "data": "..." },
                { "type": "text", "text": "Stout: sold out" }
            ]
        });
        assert_eq!(tool_result_text(&result), "Hefeweizen: available\nStout: sold out");

        let failed = serde_json::json!({
            "content": [{ "type": "text", "text": "no table free" }],
            "isError": true
        });
        assert_eq!(tool_result_text(&failed), "Error: no table free");
    }

    #[test]
    fn tool_schema_defaults_to_empty_object() {
        let tool: McpTool = serde_json::from_str(r#"{"name":"list_events"}"#).unwrap();
        let json = serde_json::to_value(tool.definition()).unwrap();
        assert_eq!(json["type"], "function");
        assert_eq!(json["function"]["name"], "list_events");
        assert_eq!(json["function"]["parameters"]["type"], "object");
    }

    #[test]
    fn usage_is_summed_across_rounds() {
        let mut total = None;
        add_usage(
            &mut total,
            Some(TokenUsage {
                prompt_tokens: 10,
                completion_tokens: 2,
                total_tokens: 12,
            }),
        );
        add_usage(&mut total, None);
        add_usage(
            &mut total,
            Some(TokenUsage {
                prompt_tokens: 20,
                completion_tokens: 5,
                total_tokens: 25,
            }),
        );
        assert_eq!(total.unwrap().total_tokens, 37);
    }
}
