//! Stages that keep the shared context in step with the conversation

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;

use super::{ContextMessage, SharedContext};
use crate::Result;
use crate::pipeline::{Frame, FrameProcessor, FrameSender};

/// Longest a new user turn waits for the previous reply to be recorded
const RESPONSE_WAIT_LIMIT: Duration = Duration::from_secs(60);

/// Count of responses requested but not yet recorded in the context
///
/// The user aggregator raises it for every `LlmRun` it forwards and the
/// assistant aggregator lowers it once the matching response has ended.
/// A user turn is only appended while the count is zero, so the history
/// stays strictly alternating even when the caller talks over the bot.
#[derive(Debug, Clone)]
pub struct ResponseGate {
    pending: Arc<watch::Sender<usize>>,
}

impl ResponseGate {
    #[must_use]
    pub fn new() -> Self {
        let (pending, _) = watch::channel(0);
        Self {
            pending: Arc::new(pending),
        }
    }

    /// Responses still in flight
    #[must_use]
    pub fn pending(&self) -> usize {
        *self.pending.borrow()
    }

    fn begin(&self) {
        self.pending.send_modify(|n| *n += 1);
    }

    fn finish(&self) {
        self.pending.send_modify(|n| *n = n.saturating_sub(1));
    }

    /// Wait until every requested response has been recorded
    ///
    /// Returns `false` if `limit` elapsed first.
    async fn wait_idle(&self, limit: Duration) -> bool {
        let mut rx = self.pending.subscribe();
        tokio::time::timeout(limit, async { rx.wait_for(|n| *n == 0).await.is_ok() })
            .await
            .unwrap_or(false)
    }
}

impl Default for ResponseGate {
    fn default() -> Self {
        Self::new()
    }
}

/// Appends each user transcription to the context and requests a response
///
/// The transcription itself is forwarded ahead of the `LlmRun` so the
/// transport can echo it to the client.
pub struct UserContextAggregator {
    context: SharedContext,
    gate: ResponseGate,
    wait_limit: Duration,
}

impl UserContextAggregator {
    #[must_use]
    pub const fn new(context: SharedContext, gate: ResponseGate) -> Self {
        Self {
            context,
            gate,
            wait_limit: RESPONSE_WAIT_LIMIT,
        }
    }
}

#[async_trait]
impl FrameProcessor for UserContextAggregator {
    fn name(&self) -> &'static str {
        "user_context_aggregator"
    }

    async fn process_frame(&mut self, frame: Frame, downstream: &FrameSender) -> Result<()> {
        match frame {
            Frame::Transcription(text) => {
                let text = text.trim();
                if text.is_empty() {
                    return Ok(());
                }
                if self.gate.pending() > 0 {
                    tracing::debug!(
                        pending = self.gate.pending(),
                        "user spoke during a reply, holding turn"
                    );
                    if !self.gate.wait_idle(self.wait_limit).await {
                        tracing::warn!("previous reply never completed, continuing");
                    }
                }
                tracing::info!(transcript = %text, "user turn");
                self.context
                    .lock()
                    .await
                    .add_message(ContextMessage::user(text));
                downstream.push(Frame::Transcription(text.to_string())).await?;
                self.gate.begin();
                downstream.push(Frame::LlmRun).await
            }
            Frame::LlmRun => {
                self.gate.begin();
                downstream.push(Frame::LlmRun).await
            }
            other => downstream.push(other).await,
        }
    }
}

/// Records what the bot said once its response completes
pub struct AssistantContextAggregator {
    context: SharedContext,
    gate: ResponseGate,
    response: Option<String>,
}

impl AssistantContextAggregator {
    #[must_use]
    pub const fn new(context: SharedContext, gate: ResponseGate) -> Self {
        Self {
            context,
            gate,
            response: None,
        }
    }
}

#[async_trait]
impl FrameProcessor for AssistantContextAggregator {
    fn name(&self) -> &'static str {
        "assistant_context_aggregator"
    }

    async fn process_frame(&mut self, frame: Frame, downstream: &FrameSender) -> Result<()> {
        match &frame {
            Frame::LlmResponseStart => self.response = Some(String::new()),
            Frame::LlmText(text) => {
                if let Some(response) = self.response.as_mut() {
                    response.push_str(text);
                }
            }
            Frame::LlmResponseEnd => {
                if let Some(response) = self.response.take() {
                    let response = response.trim();
                    if !response.is_empty() {
                        tracing::info!(response = %response, "assistant turn");
                        self.context
                            .lock()
                            .await
                            .add_message(ContextMessage::assistant(response));
                    }
                }
                self.gate.finish();
            }
            _ => {}
        }
        downstream.push(frame).await
    }
}

/// Matching user/assistant aggregators over one shared context
#[derive(Debug, Clone)]
pub struct ContextAggregatorPair {
    context: SharedContext,
    gate: ResponseGate,
}

impl ContextAggregatorPair {
    #[must_use]
    pub fn new(context: SharedContext) -> Self {
        Self {
            context,
            gate: ResponseGate::new(),
        }
    }

    /// Stage placed after speech-to-text
    #[must_use]
    pub fn user(&self) -> Box<dyn FrameProcessor> {
        Box::new(UserContextAggregator::new(
            self.context.clone(),
            self.gate.clone(),
        ))
    }

    /// Stage placed after the transport output
    #[must_use]
    pub fn assistant(&self) -> Box<dyn FrameProcessor> {
        Box::new(AssistantContextAggregator::new(
            self.context.clone(),
            self.gate.clone(),
        ))
    }
}
