//! TOML configuration file loading
//!
//! Supports `~/.config/reva/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct RevaConfigFile {
    /// LLM configuration
    #[serde(default)]
    pub llm: LlmFileConfig,

    /// Speech-to-text configuration
    #[serde(default)]
    pub stt: SttFileConfig,

    /// Text-to-speech configuration
    #[serde(default)]
    pub tts: TtsFileConfig,

    /// Tool server configuration
    #[serde(default)]
    pub mcp: McpFileConfig,

    /// API keys for external services
    #[serde(default)]
    pub api_keys: ApiKeysFileConfig,

    /// Server/runtime configuration
    #[serde(default)]
    pub server: ServerFileConfig,
}

/// LLM-related configuration
#[derive(Debug, Default, Deserialize)]
pub struct LlmFileConfig {
    /// Model identifier (e.g. "google/gemini-2.0-flash-lite-001")
    pub model: Option<String>,

    /// OpenAI-compatible base URL
    pub base_url: Option<String>,

    /// Max tokens per completion
    pub max_tokens: Option<u32>,
}

/// Speech-to-text configuration
#[derive(Debug, Default, Deserialize)]
pub struct SttFileConfig {
    /// Deepgram model (e.g. "nova-3")
    pub model: Option<String>,

    /// Spoken language code
    pub language: Option<String>,
}

/// Text-to-speech configuration
#[derive(Debug, Default, Deserialize)]
pub struct TtsFileConfig {
    /// Cartesia voice identifier
    pub voice_id: Option<String>,

    /// Cartesia model (e.g. "sonic-2")
    pub model: Option<String>,
}

/// Tool server configuration
#[derive(Debug, Default, Deserialize)]
pub struct McpFileConfig {
    /// Streamable HTTP endpoint of the MCP server
    pub url: Option<String>,
}

/// API keys configuration
#[derive(Debug, Default, Deserialize)]
pub struct ApiKeysFileConfig {
    pub deepgram: Option<String>,
    pub cartesia: Option<String>,
    pub openrouter: Option<String>,
}

/// Server/runtime configuration
#[derive(Debug, Default, Deserialize)]
pub struct ServerFileConfig {
    /// HTTP server port
    pub port: Option<u16>,

    /// Emit per-stage processing metrics
    pub enable_metrics: Option<bool>,

    /// Emit token/character usage metrics
    pub enable_usage_metrics: Option<bool>,

    /// Outbound audio packet size in 10ms units
    pub audio_out_10ms_chunks: Option<u32>,
}

/// Load the config file from the default location
///
/// Returns defaults if the file is missing or unreadable.
#[must_use]
pub fn load_config_file() -> RevaConfigFile {
    config_file_path().map_or_else(RevaConfigFile::default, |path| load_from(&path))
}

/// Load a config file from an explicit path
///
/// Returns defaults if the file is missing or fails to parse.
#[must_use]
pub fn load_from(path: &Path) -> RevaConfigFile {
    if !path.exists() {
        return RevaConfigFile::default();
    }

    match std::fs::read_to_string(path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                RevaConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            RevaConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/reva/config.toml`
#[must_use]
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("reva").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_partial_file() {
        let fc: RevaConfigFile = toml::from_str(
            r#"
            [llm]
            model = "openai/gpt-4o-mini"

            [mcp]
            url = "http://localhost:8000/mcp"
            "#,
        )
        .unwrap();

        assert_eq!(fc.llm.model.as_deref(), Some("openai/gpt-4o-mini"));
        assert_eq!(fc.mcp.url.as_deref(), Some("http://localhost:8000/mcp"));
        assert!(fc.tts.voice_id.is_none());
        assert!(fc.server.port.is_none());
    }

    #[test]
    fn missing_file_yields_defaults() {
        let fc = load_from(Path::new("/nonexistent/reva/config.toml"));
        assert!(fc.api_keys.deepgram.is_none());
    }
}
