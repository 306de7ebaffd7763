//! Reva session bootstrap
//!
//! Builds the per-session pipeline:
//!
//! ```text
//! transport input → stt → user context → llm → tts → transport output → assistant context
//! ```
//!
//! and the two connection callbacks that start and stop the conversation.

use std::sync::Arc;

use async_trait::async_trait;
use secrecy::ExposeSecret;
use tokio::sync::mpsc;

use crate::Result;
use crate::config::{Config, OPENROUTER_BASE_URL};
use crate::context::{ContextAggregatorPair, ContextMessage, LlmContext, SharedContext};
use crate::pipeline::{Frame, Pipeline, PipelineParams, PipelineRunner, PipelineTask, TaskControl};
use crate::prompt::{AGENT_INSTRUCTION, GREETING_MESSAGE, SESSION_INSTRUCTION};
use crate::services::{
    CartesiaTts, DeepgramStt, LlmProcessor, LlmService, OpenAiLlm, SttProcessor, Synthesizer,
    Transcriber, TtsProcessor,
};
use crate::transport::{
    ClientInfo, OUTBOUND_CAPACITY, TransportEventHandler, TransportInput, TransportOutput,
    TransportParams, TransportSession,
};

/// Whether the MCP tool integration is compiled in
pub const MCP_AVAILABLE: bool = cfg!(feature = "mcp");

/// Which language model backend a session uses
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LlmBackend {
    /// Tool-aware backend talking to an MCP server
    Mcp { url: String },
    /// Hosted model through `OpenRouter` with the persona prompt
    OpenRouter,
}

impl LlmBackend {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Mcp { .. } => "mcp",
            Self::OpenRouter => "openrouter",
        }
    }
}

/// Pick the backend: MCP iff a non-empty URL is set and the integration is available
#[must_use]
pub fn select_llm_backend(mcp_url: Option<&str>, mcp_available: bool) -> LlmBackend {
    match mcp_url {
        Some(url) if !url.is_empty() && mcp_available => LlmBackend::Mcp {
            url: url.to_string(),
        },
        _ => LlmBackend::OpenRouter,
    }
}

/// Context every session starts from
#[must_use]
pub fn initial_context() -> LlmContext {
    LlmContext::new(vec![ContextMessage::system(SESSION_INSTRUCTION)])
}

/// Whether `backend` needs an `OpenRouter` key with this configuration
///
/// Both backends chat through `llm.base_url`. The tool backend may point it
/// at a self-hosted endpoint that takes no key; `OpenRouter` always does.
#[must_use]
pub fn llm_key_required(config: &Config, backend: &LlmBackend) -> bool {
    match backend {
        LlmBackend::OpenRouter => true,
        LlmBackend::Mcp { .. } => config.llm.base_url.starts_with(OPENROUTER_BASE_URL),
    }
}

/// Whether sessions on `backend` would have the credentials they need
#[must_use]
pub fn llm_available(config: &Config, backend: &LlmBackend) -> bool {
    !llm_key_required(config, backend)
        || config
            .api_keys
            .openrouter
            .as_ref()
            .is_some_and(|k| !k.expose_secret().is_empty())
}

/// Build the language model for `backend`
///
/// # Errors
///
/// Returns error if the backend's credentials are missing
pub fn build_llm(config: &Config, backend: &LlmBackend) -> Result<Arc<dyn LlmService>> {
    match backend {
        LlmBackend::Mcp { url } => {
            tracing::info!(url = %url, "using MCP service");
            mcp_llm(config, url)
        }
        LlmBackend::OpenRouter => {
            tracing::info!(model = %config.llm.model, "using OpenRouter service");
            let llm = OpenAiLlm::new(
                config.api_keys.openrouter.clone(),
                &config.llm.base_url,
                config.llm.model.clone(),
                Some(AGENT_INSTRUCTION.to_string()),
            )?
            .with_max_tokens(config.llm.max_tokens);
            Ok(Arc::new(llm))
        }
    }
}

#[cfg(feature = "mcp")]
fn mcp_llm(config: &Config, url: &str) -> Result<Arc<dyn LlmService>> {
    use crate::services::llm::{ChatCompletionClient, McpHttpTransport, McpLlm};

    let backend = LlmBackend::Mcp {
        url: url.to_string(),
    };
    if !llm_available(config, &backend) {
        return Err(crate::Error::Config(
            "OpenRouter API key required for the MCP backend (OPENROUTER_API_KEY)".to_string(),
        ));
    }

    // The tool server owns tool instructions, no persona prompt here
    let chat = ChatCompletionClient::new(
        config.api_keys.openrouter.clone(),
        &config.llm.base_url,
        config.llm.model.clone(),
    )
    .with_max_tokens(config.llm.max_tokens);
    Ok(Arc::new(McpLlm::new(McpHttpTransport::new(url), chat)))
}

#[cfg(not(feature = "mcp"))]
fn mcp_llm(_config: &Config, _url: &str) -> Result<Arc<dyn LlmService>> {
    Err(crate::Error::Config(
        "MCP support not compiled in (enable the `mcp` feature)".to_string(),
    ))
}

/// The three hosted services a session talks to
#[derive(Clone)]
pub struct BotServices {
    pub stt: Arc<dyn Transcriber>,
    pub llm: Arc<dyn LlmService>,
    pub tts: Arc<dyn Synthesizer>,
}

impl BotServices {
    /// Build the hosted services from configuration
    ///
    /// # Errors
    ///
    /// Returns error if a required API key is missing
    pub fn from_config(config: &Config) -> Result<Self> {
        let stt = DeepgramStt::new(
            config.api_keys.deepgram.clone(),
            config.stt.model.clone(),
            config.stt.language.clone(),
        )?;
        let tts = CartesiaTts::new(
            config.api_keys.cartesia.clone(),
            config.tts.voice_id.clone(),
            config.tts.model.clone(),
            crate::audio::OUTPUT_SAMPLE_RATE,
        )?;
        let backend = select_llm_backend(config.mcp_url.as_deref(), MCP_AVAILABLE);
        let llm = build_llm(config, &backend)?;

        Ok(Self {
            stt: Arc::new(stt),
            llm,
            tts: Arc::new(tts),
        })
    }
}

/// Connection callbacks for one session
pub struct BotEvents<T: TaskControl> {
    context: SharedContext,
    task: Arc<T>,
}

impl<T: TaskControl> BotEvents<T> {
    #[must_use]
    pub const fn new(context: SharedContext, task: Arc<T>) -> Self {
        Self { context, task }
    }
}

#[async_trait]
impl<T: TaskControl + 'static> TransportEventHandler for BotEvents<T> {
    async fn on_client_connected(&self, client: &ClientInfo) -> Result<()> {
        tracing::info!(client_id = %client.id, "client connected, greeting");
        self.context
            .lock()
            .await
            .add_message(ContextMessage::user(GREETING_MESSAGE));
        self.task.queue_frames(vec![Frame::LlmRun]).await
    }

    async fn on_client_disconnected(&self, client: &ClientInfo) {
        tracing::info!(client_id = %client.id, "client disconnected");
        self.task.cancel().await;
    }
}

/// A fully wired session, ready to hand to a transport
pub struct BotSession {
    pub context: SharedContext,
    pub transport: TransportSession,
}

impl BotSession {
    #[must_use]
    pub fn task(&self) -> &Arc<PipelineTask> {
        &self.transport.task
    }
}

/// Transport settings derived from configuration
#[must_use]
pub fn transport_params(config: &Config) -> TransportParams {
    TransportParams {
        audio_out_10ms_chunks: config.server.audio_out_10ms_chunks,
        ..TransportParams::default()
    }
}

/// Build a session with the hosted services from `config`
///
/// # Errors
///
/// Returns error if a required API key is missing
pub fn build_bot(config: &Config) -> Result<BotSession> {
    let services = BotServices::from_config(config)?;
    Ok(build_bot_with(config, services))
}

/// Build a session around the given services
#[must_use]
pub fn build_bot_with(config: &Config, services: BotServices) -> BotSession {
    let params = transport_params(config);
    let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_CAPACITY);

    let context = initial_context().shared();
    let aggregators = ContextAggregatorPair::new(context.clone());

    let pipeline = Pipeline::new(vec![
        Box::new(TransportInput::new(params.clone())),
        Box::new(SttProcessor::new(services.stt, params.audio_in_sample_rate)),
        aggregators.user(),
        Box::new(LlmProcessor::new(services.llm, context.clone())),
        Box::new(TtsProcessor::new(services.tts)),
        Box::new(TransportOutput::new(params.clone(), outbound_tx.clone())),
        aggregators.assistant(),
    ]);

    let task = Arc::new(PipelineTask::new(
        pipeline,
        PipelineParams {
            enable_metrics: config.server.enable_metrics,
            enable_usage_metrics: config.server.enable_usage_metrics,
        },
    ));
    let events = BotEvents::new(context.clone(), task.clone());

    BotSession {
        context,
        transport: TransportSession {
            task,
            runner: PipelineRunner::new(false),
            handler: Arc::new(events),
            params,
            outbound_tx,
            outbound_rx,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_selection() {
        assert_eq!(
            select_llm_backend(Some("http://localhost:8000/mcp"), true),
            LlmBackend::Mcp {
                url: "http://localhost:8000/mcp".to_string()
            }
        );
        assert_eq!(
            select_llm_backend(Some("http://localhost:8000/mcp"), false),
            LlmBackend::OpenRouter
        );
        assert_eq!(select_llm_backend(Some(""), true), LlmBackend::OpenRouter);
        assert_eq!(select_llm_backend(None, true), LlmBackend::OpenRouter);
    }

    #[test]
    fn initial_context_is_session_instruction() {
        let ctx = initial_context();
        assert_eq!(ctx.messages(), &[ContextMessage::system(SESSION_INSTRUCTION)]);
    }
}
