//! OpenAI-compatible streaming chat completions (`OpenRouter` by default)

use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::StreamExt;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use super::sse::SseDecoder;
use super::{Generation, LlmService};
use crate::context::ContextMessage;
use crate::pipeline::{Frame, FrameSender, TokenUsage};
use crate::{Error, Result};

/// Chat message in OpenAI wire format
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    fn plain(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self::plain("system", content)
    }

    /// Assistant turn that requested tool calls
    #[must_use]
    pub fn assistant_tool_calls(text: String, calls: Vec<ToolCall>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: (!text.is_empty()).then_some(text),
            tool_calls: Some(calls),
            tool_call_id: None,
        }
    }

    /// Result of one tool call
    #[must_use]
    pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: "tool".to_string(),
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: Some(call_id.into()),
        }
    }
}

impl From<&ContextMessage> for ChatMessage {
    fn from(message: &ContextMessage) -> Self {
        Self::plain(message.role.as_str(), message.content.clone())
    }
}

/// Tool call requested by the model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub function: FunctionCall,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    pub arguments: String,
}

/// Tool offered to the model
#[derive(Debug, Clone, Serialize)]
pub struct ToolDefinition {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub function: FunctionDefinition,
}

#[derive(Debug, Clone, Serialize)]
pub struct FunctionDefinition {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub parameters: serde_json::Value,
}

impl ToolDefinition {
    #[must_use]
    pub const fn function(
        name: String,
        description: Option<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            kind: "function",
            function: FunctionDefinition {
                name,
                description,
                parameters,
            },
        }
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    stream_options: StreamOptions,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<&'a [ToolDefinition]>,
}

#[derive(Serialize)]
struct StreamOptions {
    include_usage: bool,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<TokenUsage>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ToolCallDelta>,
}

#[derive(Debug, Deserialize)]
struct ToolCallDelta {
    #[serde(default)]
    index: usize,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<FunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct FunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

/// Outcome of one streamed completion
#[derive(Debug, Default, Clone)]
pub struct ChatTurn {
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
    pub finish_reason: Option<String>,
    pub usage: Option<TokenUsage>,
    /// Delay until the first streamed token
    pub first_token: Option<Duration>,
}

/// Assembles a [`ChatTurn`] from stream chunks
#[derive(Debug, Default)]
struct TurnAccumulator {
    turn: ChatTurn,
}

impl TurnAccumulator {
    /// Apply one chunk, returning its text delta
    fn apply(&mut self, chunk: StreamChunk) -> Option<String> {
        if chunk.usage.is_some() {
            self.turn.usage = chunk.usage;
        }

        let mut text = None;
        for choice in chunk.choices {
            if let Some(reason) = choice.finish_reason {
                self.turn.finish_reason = Some(reason);
            }
            for delta in choice.delta.tool_calls {
                if delta.index >= self.turn.tool_calls.len() {
                    self.turn.tool_calls.resize_with(delta.index + 1, || ToolCall {
                        id: String::new(),
                        kind: "function".to_string(),
                        function: FunctionCall {
                            name: String::new(),
                            arguments: String::new(),
                        },
                    });
                }
                let call = &mut self.turn.tool_calls[delta.index];
                if let Some(id) = delta.id {
                    call.id = id;
                }
                if let Some(function) = delta.function {
                    if let Some(name) = function.name {
                        call.function.name.push_str(&name);
                    }
                    if let Some(arguments) = function.arguments {
                        call.function.arguments.push_str(&arguments);
                    }
                }
            }
            if let Some(content) = choice.delta.content.filter(|c| !c.is_empty()) {
                self.turn.text.push_str(&content);
                text = Some(text.map_or(content.clone(), |t: String| t + &content));
            }
        }
        text
    }

    fn finish(mut self) -> ChatTurn {
        self.turn.tool_calls.retain(|c| !c.function.name.is_empty());
        self.turn
    }
}

/// Client for an OpenAI-compatible `/chat/completions` endpoint
#[derive(Debug, Clone)]
pub struct ChatCompletionClient {
    client: reqwest::Client,
    api_key: Option<SecretString>,
    base_url: String,
    model: String,
    max_tokens: Option<u32>,
}

impl ChatCompletionClient {
    #[must_use]
    pub fn new(api_key: Option<SecretString>, base_url: &str, model: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            max_tokens: None,
        }
    }

    #[must_use]
    pub const fn with_max_tokens(mut self, max_tokens: Option<u32>) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Stream one completion, pushing text deltas downstream as `LlmText`
    ///
    /// # Errors
    ///
    /// Returns error if the request fails or the stream is malformed
    pub async fn stream_chat(
        &self,
        messages: &[ChatMessage],
        tools: Option<&[ToolDefinition]>,
        downstream: &FrameSender,
    ) -> Result<ChatTurn> {
        let started = Instant::now();
        let request = ChatRequest {
            model: &self.model,
            messages,
            stream: true,
            stream_options: StreamOptions {
                include_usage: true,
            },
            max_tokens: self.max_tokens,
            tools,
        };

        tracing::debug!(
            model = %self.model,
            messages = messages.len(),
            tools = tools.map_or(0, <[ToolDefinition]>::len),
            "starting chat completion"
        );

        let mut builder = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key.expose_secret());
        }

        let response = builder.send().await.map_err(|e| {
            tracing::error!(error = %e, "chat completion request failed");
            e
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "chat completion API error");
            return Err(Error::Llm(format!("chat completion error {status}: {body}")));
        }

        let mut decoder = SseDecoder::new();
        let mut acc = TurnAccumulator::default();
        let mut stream = response.bytes_stream();

        'outer: while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            for event in decoder.feed(&chunk) {
                if event == "[DONE]" {
                    break 'outer;
                }
                let parsed: StreamChunk = serde_json::from_str(&event)
                    .map_err(|e| Error::Llm(format!("malformed stream chunk: {e}")))?;
                if let Some(text) = acc.apply(parsed) {
                    if acc.turn.first_token.is_none() {
                        acc.turn.first_token = Some(started.elapsed());
                    }
                    downstream.push(Frame::LlmText(text)).await?;
                }
            }
        }

        let turn = acc.finish();
        tracing::debug!(
            chars = turn.text.len(),
            tool_calls = turn.tool_calls.len(),
            finish_reason = ?turn.finish_reason,
            "chat completion finished"
        );
        Ok(turn)
    }
}

/// Hosted language model with the persona attached as system prompt
pub struct OpenAiLlm {
    chat: ChatCompletionClient,
    system_prompt: Option<String>,
}

impl OpenAiLlm {
    /// Create the default hosted backend
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new(
        api_key: Option<SecretString>,
        base_url: &str,
        model: String,
        system_prompt: Option<String>,
    ) -> Result<Self> {
        let api_key = api_key
            .filter(|k| !k.expose_secret().is_empty())
            .ok_or_else(|| {
                Error::Config("OpenRouter API key required (OPENROUTER_API_KEY)".to_string())
            })?;

        Ok(Self {
            chat: ChatCompletionClient::new(Some(api_key), base_url, model),
            system_prompt,
        })
    }

    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: Option<u32>) -> Self {
        self.chat = self.chat.with_max_tokens(max_tokens);
        self
    }

    /// Wire messages: system prompt first, then the context
    fn build_messages(&self, messages: &[ContextMessage]) -> Vec<ChatMessage> {
        self.system_prompt
            .iter()
            .map(ChatMessage::system)
            .chain(messages.iter().map(ChatMessage::from))
            .collect()
    }
}

#[async_trait]
impl LlmService for OpenAiLlm {
    fn name(&self) -> &'static str {
        "openai_llm"
    }

    async fn generate(
        &self,
        messages: &[ContextMessage],
        downstream: &FrameSender,
    ) -> Result<Generation> {
        let wire = self.build_messages(messages);
        let turn = self.chat.stream_chat(&wire, None, downstream).await?;
        Ok(Generation {
            usage: turn.usage,
            ttfb: turn.first_token,
        })
    }
}
