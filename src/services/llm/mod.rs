//! Language model services and the pipeline stage driving them

#[cfg(feature = "mcp")]
pub mod mcp;
pub mod openai;
mod sse;

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::Result;
use crate::context::{ContextMessage, SharedContext};
use crate::pipeline::{Frame, FrameProcessor, FrameSender, MetricsData, PipelineParams, TokenUsage};

pub use openai::{ChatCompletionClient, ChatMessage, ChatTurn, OpenAiLlm, ToolCall, ToolDefinition};
pub use sse::SseDecoder;

#[cfg(feature = "mcp")]
pub use mcp::{McpHttpTransport, McpLlm, McpTool};

/// Accounting for one generated response
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Generation {
    pub usage: Option<TokenUsage>,
    pub ttfb: Option<Duration>,
}

/// A language model backend
#[async_trait]
pub trait LlmService: Send + Sync {
    /// Backend name used in logs and metrics
    fn name(&self) -> &'static str;

    /// Generate a response to `messages`, streaming text as `LlmText` frames
    ///
    /// # Errors
    ///
    /// Returns error if the provider request fails
    async fn generate(
        &self,
        messages: &[ContextMessage],
        downstream: &FrameSender,
    ) -> Result<Generation>;
}

/// Pipeline stage that answers every `LlmRun` from the shared context
pub struct LlmProcessor {
    llm: Arc<dyn LlmService>,
    context: SharedContext,
    params: PipelineParams,
}

impl LlmProcessor {
    #[must_use]
    pub fn new(llm: Arc<dyn LlmService>, context: SharedContext) -> Self {
        Self {
            llm,
            context,
            params: PipelineParams::default(),
        }
    }

    async fn respond(&self, downstream: &FrameSender) -> Result<()> {
        let messages = self.context.lock().await.messages().to_vec();
        tracing::debug!(backend = self.llm.name(), messages = messages.len(), "running llm");

        let started = Instant::now();
        downstream.push(Frame::LlmResponseStart).await?;
        let result = self.llm.generate(&messages, downstream).await;

        if let Ok(generation) = &result {
            let processor = self.llm.name();
            if let Some(ttfb) = generation.ttfb {
                downstream
                    .push_opt(self.params.gate(MetricsData::Ttfb { processor, value: ttfb }))
                    .await?;
            }
            downstream
                .push_opt(self.params.gate(MetricsData::Processing {
                    processor,
                    value: started.elapsed(),
                }))
                .await?;
            if let Some(usage) = generation.usage {
                downstream
                    .push_opt(self.params.gate(MetricsData::LlmUsage { processor, usage }))
                    .await?;
            }
        }

        // Always close the response so downstream stages flush
        downstream.push(Frame::LlmResponseEnd).await?;
        result.map(drop)
    }
}

#[async_trait]
impl FrameProcessor for LlmProcessor {
    fn name(&self) -> &'static str {
        self.llm.name()
    }

    async fn process_frame(&mut self, frame: Frame, downstream: &FrameSender) -> Result<()> {
        match frame {
            Frame::Start(params) => {
                self.params = params;
                downstream.push(Frame::Start(params)).await
            }
            Frame::LlmRun => self.respond(downstream).await,
            other => downstream.push(other).await,
        }
    }
}
