//! Reva - WhatsApp voice assistant for Doolally Taproom
//!
//! Each caller gets a session pipeline that turns speech into text, asks a
//! language model for a reply and speaks the reply back:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                     WebSocket transport                       │
//! │        PCM16 audio in  │  PCM16 audio + JSON events out       │
//! └───────────────┬───────────────────────────────▲──────────────┘
//!                 │                               │
//! ┌───────────────▼───────────────────────────────┴──────────────┐
//! │  input (VAD) → Deepgram → user ctx → LLM → Cartesia → output │
//! │                                     → assistant ctx           │
//! └──────────────────────────────┬───────────────────────────────┘
//!                                │
//!               OpenRouter (persona prompt) or MCP tool server
//! ```

pub mod api;
pub mod audio;
pub mod bot;
pub mod config;
pub mod context;
pub mod error;
pub mod pipeline;
pub mod prompt;
pub mod services;
pub mod transport;

pub use bot::{BotEvents, BotSession, LlmBackend, build_bot, select_llm_backend};
pub use config::Config;
pub use error::{Error, Result};
