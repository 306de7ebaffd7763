//! Hosted speech and language services wrapped as pipeline stages

pub mod llm;
pub mod stt;
pub mod tts;

pub use llm::{Generation, LlmProcessor, LlmService, OpenAiLlm};
pub use stt::{DeepgramStt, SttProcessor, Transcriber};
pub use tts::{CartesiaTts, Synthesizer, TtsProcessor};
