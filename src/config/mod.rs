//! Configuration management for the Reva voice bot
//!
//! Values are resolved once at startup with priority env > TOML file >
//! default, then shared read-only across sessions.

pub mod file;

use std::collections::HashMap;
use std::path::Path;

use secrecy::SecretString;

use crate::{Error, Result};

/// Cartesia voice used for Reva ("British Reading Lady")
pub const DEFAULT_VOICE_ID: &str = "f8f5f1b2-f02d-4d8e-a40d-fd850a487b3d";

/// Hosted model reached through `OpenRouter`
pub const DEFAULT_LLM_MODEL: &str = "google/gemini-2.0-flash-lite-001";

/// `OpenRouter` OpenAI-compatible endpoint
pub const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";

/// Default Deepgram model
pub const DEFAULT_STT_MODEL: &str = "nova-3";

/// Default Cartesia model
pub const DEFAULT_TTS_MODEL: &str = "sonic-2";

/// Dotenv file read from the working directory at startup
pub const DOTENV_FILE: &str = ".env";

/// Default HTTP port
pub const DEFAULT_PORT: u16 = 7860;

/// Reva voice bot configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// API keys
    pub api_keys: ApiKeys,

    /// Language model configuration
    pub llm: LlmConfig,

    /// Speech-to-text configuration
    pub stt: SttConfig,

    /// Text-to-speech configuration
    pub tts: TtsConfig,

    /// Streamable HTTP endpoint of the MCP tool server, if any
    pub mcp_url: Option<String>,

    /// HTTP server configuration
    pub server: ServerConfig,
}

/// API keys for external services
#[derive(Debug, Clone, Default)]
pub struct ApiKeys {
    /// Deepgram API key (STT)
    pub deepgram: Option<SecretString>,

    /// Cartesia API key (TTS)
    pub cartesia: Option<SecretString>,

    /// `OpenRouter` API key (LLM)
    /// See: <https://openrouter.ai/keys>
    pub openrouter: Option<SecretString>,
}

/// Language model configuration
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// Model identifier
    pub model: String,

    /// OpenAI-compatible base URL
    pub base_url: String,

    /// Max tokens per completion
    pub max_tokens: Option<u32>,
}

/// Speech-to-text configuration
#[derive(Debug, Clone)]
pub struct SttConfig {
    /// Deepgram model
    pub model: String,

    /// Spoken language code
    pub language: String,
}

/// Text-to-speech configuration
#[derive(Debug, Clone)]
pub struct TtsConfig {
    /// Cartesia voice identifier
    pub voice_id: String,

    /// Cartesia model
    pub model: String,
}

/// HTTP server and pipeline runtime configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Port to listen on
    pub port: u16,

    /// Emit per-stage processing metrics
    pub enable_metrics: bool,

    /// Emit token/character usage metrics
    pub enable_usage_metrics: bool,

    /// Outbound audio packet size in 10ms units
    pub audio_out_10ms_chunks: u32,
}

impl Config {
    /// Load configuration from `.env`, the process environment and config file
    ///
    /// Values in `.env` take precedence over the process environment.
    ///
    /// # Errors
    ///
    /// Returns error if a configured value is malformed
    pub fn load() -> Result<Self> {
        let dotenv = load_dotenv(Path::new(DOTENV_FILE));
        let fc = file::load_config_file();
        Self::from_sources(
            |key| dotenv.get(key).cloned().or_else(|| std::env::var(key).ok()),
            fc,
        )
    }

    /// Resolve configuration from an env lookup and a parsed config file
    ///
    /// Empty env values count as unset.
    ///
    /// # Errors
    ///
    /// Returns error if the port is malformed
    pub fn from_sources<F>(env: F, fc: file::RevaConfigFile) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = |key: &str| env(key).filter(|v| !v.trim().is_empty());
        let secret = |key: &str, fallback: Option<String>| {
            env(key)
                .or_else(|| fallback.filter(|v| !v.is_empty()))
                .map(SecretString::from)
        };

        // API keys (env > toml > None)
        let api_keys = ApiKeys {
            deepgram: secret("DEEPGRAM_API_KEY", fc.api_keys.deepgram),
            cartesia: secret("CARTESIA_API_KEY", fc.api_keys.cartesia),
            openrouter: secret("OPENROUTER_API_KEY", fc.api_keys.openrouter),
        };

        let llm = LlmConfig {
            model: env("REVA_LLM_MODEL")
                .or(fc.llm.model)
                .unwrap_or_else(|| DEFAULT_LLM_MODEL.to_string()),
            base_url: env("REVA_LLM_BASE_URL")
                .or(fc.llm.base_url)
                .unwrap_or_else(|| OPENROUTER_BASE_URL.to_string()),
            max_tokens: fc.llm.max_tokens,
        };

        let stt = SttConfig {
            model: fc.stt.model.unwrap_or_else(|| DEFAULT_STT_MODEL.to_string()),
            language: fc.stt.language.unwrap_or_else(|| "en".to_string()),
        };

        let tts = TtsConfig {
            voice_id: env("REVA_TTS_VOICE")
                .or(fc.tts.voice_id)
                .unwrap_or_else(|| DEFAULT_VOICE_ID.to_string()),
            model: fc.tts.model.unwrap_or_else(|| DEFAULT_TTS_MODEL.to_string()),
        };

        let mcp_url = env("MCP_HTTP_URL").or(fc.mcp.url.filter(|u| !u.trim().is_empty()));
        if let Some(raw) = &mcp_url
            && let Err(e) = url::Url::parse(raw)
        {
            // Passed through as-is; the transport reports the failure per session
            tracing::warn!(url = %raw, error = %e, "MCP_HTTP_URL does not parse as a URL");
        }

        let port = match env("REVA_PORT").or_else(|| env("PORT")) {
            Some(raw) => raw
                .parse()
                .map_err(|e| Error::Config(format!("invalid port {raw:?}: {e}")))?,
            None => fc.server.port.unwrap_or(DEFAULT_PORT),
        };

        let server = ServerConfig {
            port,
            enable_metrics: fc.server.enable_metrics.unwrap_or(true),
            enable_usage_metrics: fc.server.enable_usage_metrics.unwrap_or(true),
            audio_out_10ms_chunks: fc.server.audio_out_10ms_chunks.unwrap_or(2).max(1),
        };

        Ok(Self {
            api_keys,
            llm,
            stt,
            tts,
            mcp_url,
            server,
        })
    }
}

/// Read `KEY=value` pairs from a dotenv file
///
/// A missing file yields no values. Unreadable files and malformed lines are
/// logged and skipped.
#[must_use]
pub fn load_dotenv(path: &Path) -> HashMap<String, String> {
    let entries = match dotenvy::from_path_iter(path) {
        Ok(entries) => entries,
        Err(e) if e.not_found() => {
            tracing::debug!(path = %path.display(), "no dotenv file");
            return HashMap::new();
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "failed to read dotenv file");
            return HashMap::new();
        }
    };

    let values: HashMap<String, String> = entries
        .filter_map(|entry| match entry {
            Ok(pair) => Some(pair),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "skipping dotenv line");
                None
            }
        })
        .collect();
    tracing::info!(path = %path.display(), count = values.len(), "loaded dotenv file");
    values
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use secrecy::ExposeSecret;

    use super::file::RevaConfigFile;
    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_without_sources() {
        let config = Config::from_sources(lookup(&[]), RevaConfigFile::default()).unwrap();

        assert_eq!(config.llm.model, DEFAULT_LLM_MODEL);
        assert_eq!(config.llm.base_url, OPENROUTER_BASE_URL);
        assert_eq!(config.tts.voice_id, DEFAULT_VOICE_ID);
        assert_eq!(config.server.port, DEFAULT_PORT);
        assert_eq!(config.server.audio_out_10ms_chunks, 2);
        assert!(config.server.enable_metrics);
        assert!(config.server.enable_usage_metrics);
        assert!(config.mcp_url.is_none());
        assert!(config.api_keys.deepgram.is_none());
    }

    #[test]
    fn env_overrides_file() {
        let fc: RevaConfigFile = toml::from_str(
            r#"
            [api_keys]
            deepgram = "from-file"
            cartesia = "cartesia-file"

            [server]
            port = 9000
            "#,
        )
        .unwrap();

        let config = Config::from_sources(
            lookup(&[("DEEPGRAM_API_KEY", "from-env"), ("REVA_PORT", "8080")]),
            fc,
        )
        .unwrap();

        let deepgram = config.api_keys.deepgram.unwrap();
        assert_eq!(deepgram.expose_secret(), "from-env");
        let cartesia = config.api_keys.cartesia.unwrap();
        assert_eq!(cartesia.expose_secret(), "cartesia-file");
        assert_eq!(config.server.port, 8080);
    }

    #[test]
    fn empty_mcp_url_is_unset() {
        let config =
            Config::from_sources(lookup(&[("MCP_HTTP_URL", "  ")]), RevaConfigFile::default())
                .unwrap();
        assert!(config.mcp_url.is_none());
    }

    #[test]
    fn unparsable_mcp_url_is_kept() {
        let config = Config::from_sources(
            lookup(&[("MCP_HTTP_URL", "tools.doolally.local/mcp")]),
            RevaConfigFile::default(),
        )
        .unwrap();
        assert_eq!(config.mcp_url.as_deref(), Some("tools.doolally.local/mcp"));
    }

    #[test]
    fn dotenv_values_are_read() {
        let path = std::env::temp_dir().join(format!("reva-{}.env", uuid::Uuid::new_v4()));
        std::fs::write(
            &path,
            "# keys\nDEEPGRAM_API_KEY=dg-dotenv\nMCP_HTTP_URL=\"http://localhost:8000/mcp\"\n",
        )
        .unwrap();

        let values = load_dotenv(&path);
        std::fs::remove_file(&path).unwrap();

        assert_eq!(values.get("DEEPGRAM_API_KEY").map(String::as_str), Some("dg-dotenv"));
        assert_eq!(
            values.get("MCP_HTTP_URL").map(String::as_str),
            Some("http://localhost:8000/mcp")
        );
    }

    #[test]
    fn missing_dotenv_is_empty() {
        let path = std::env::temp_dir().join(format!("reva-missing-{}.env", uuid::Uuid::new_v4()));
        assert!(load_dotenv(&path).is_empty());
    }

    #[test]
    fn malformed_port_is_rejected() {
        let result = Config::from_sources(lookup(&[("PORT", "http")]), RevaConfigFile::default());
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn debug_output_redacts_keys() {
        let config = Config::from_sources(
            lookup(&[("OPENROUTER_API_KEY", "sk-or-secret")]),
            RevaConfigFile::default(),
        )
        .unwrap();
        let debug = format!("{config:?}");
        assert!(!debug.contains("sk-or-secret"));
    }
}
