//! Text-to-speech (TTS) via Cartesia

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

use crate::audio::pcm16_from_le_bytes;
use crate::pipeline::{AudioFrame, Frame, FrameProcessor, FrameSender, MetricsData, PipelineParams};
use crate::{Error, Result};

const CARTESIA_BYTES_URL: &str = "https://api.cartesia.ai/tts/bytes";

/// Cartesia API version header value
const CARTESIA_VERSION: &str = "2025-04-16";

/// Synthesises speech for a piece of text
#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Sample rate of the returned PCM
    fn sample_rate(&self) -> u32;

    /// Synthesise `text` to mono PCM16
    ///
    /// # Errors
    ///
    /// Returns error if the provider request fails
    async fn synthesize(&self, text: &str) -> Result<Vec<i16>>;
}

#[derive(serde::Serialize)]
struct CartesiaRequest<'a> {
    model_id: &'a str,
    transcript: &'a str,
    voice: CartesiaVoice<'a>,
    output_format: CartesiaOutputFormat,
    language: &'a str,
}

#[derive(serde::Serialize)]
struct CartesiaVoice<'a> {
    mode: &'static str,
    id: &'a str,
}

#[derive(serde::Serialize)]
struct CartesiaOutputFormat {
    container: &'static str,
    encoding: &'static str,
    sample_rate: u32,
}

/// Cartesia text-to-speech client
pub struct CartesiaTts {
    client: reqwest::Client,
    api_key: SecretString,
    voice_id: String,
    model: String,
    language: String,
    sample_rate: u32,
    url: String,
}

impl CartesiaTts {
    /// Create a Cartesia client
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new(
        api_key: Option<SecretString>,
        voice_id: String,
        model: String,
        sample_rate: u32,
    ) -> Result<Self> {
        let api_key = api_key
            .filter(|k| !k.expose_secret().is_empty())
            .ok_or_else(|| {
                Error::Config("Cartesia API key required (CARTESIA_API_KEY)".to_string())
            })?;

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            voice_id,
            model,
            language: "en".to_string(),
            sample_rate,
            url: CARTESIA_BYTES_URL.to_string(),
        })
    }

    /// Override the synthesis endpoint
    #[must_use]
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    #[must_use]
    pub fn voice_id(&self) -> &str {
        &self.voice_id
    }

    fn request<'a>(&'a self, text: &'a str) -> CartesiaRequest<'a> {
        CartesiaRequest {
            model_id: &self.model,
            transcript: text,
            voice: CartesiaVoice {
                mode: "id",
                id: &self.voice_id,
            },
            output_format: CartesiaOutputFormat {
                container: "raw",
                encoding: "pcm_s16le",
                sample_rate: self.sample_rate,
            },
            language: &self.language,
        }
    }
}

#[async_trait]
impl Synthesizer for CartesiaTts {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    async fn synthesize(&self, text: &str) -> Result<Vec<i16>> {
        tracing::debug!(chars = text.len(), voice = %self.voice_id, "starting Cartesia synthesis");

        let response = self
            .client
            .post(&self.url)
            .header("X-API-Key", self.api_key.expose_secret())
            .header("Cartesia-Version", CARTESIA_VERSION)
            .json(&self.request(text))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Tts(format!("Cartesia TTS error {status}: {body}")));
        }

        let audio = response.bytes().await?;
        Ok(pcm16_from_le_bytes(&audio))
    }
}

/// Remove and return the first complete sentence in `buffer`
///
/// A sentence ends at `.`, `!`, `?` or a newline followed by whitespace (or
/// a newline itself). Returns `None` while the buffer holds only a partial
/// sentence.
pub fn take_sentence(buffer: &mut String) -> Option<String> {
    let mut chars = buffer.char_indices().peekable();
    while let Some((idx, c)) = chars.next() {
        let boundary = match c {
            '\n' => true,
            '.' | '!' | '?' => chars.peek().is_some_and(|(_, next)| next.is_whitespace()),
            _ => false,
        };
        if boundary {
            let end = idx + c.len_utf8();
            let sentence = buffer[..end].trim().to_string();
            buffer.drain(..end);
            if sentence.is_empty() {
                return take_sentence(buffer);
            }
            return Some(sentence);
        }
    }
    None
}

/// Pipeline stage synthesising streamed model text sentence by sentence
pub struct TtsProcessor {
    synthesizer: Arc<dyn Synthesizer>,
    buffer: String,
    speaking: bool,
    params: PipelineParams,
}

impl TtsProcessor {
    #[must_use]
    pub fn new(synthesizer: Arc<dyn Synthesizer>) -> Self {
        Self {
            synthesizer,
            buffer: String::new(),
            speaking: false,
            params: PipelineParams::default(),
        }
    }

    async fn speak(&mut self, text: &str, downstream: &FrameSender) -> Result<()> {
        if !self.speaking {
            self.speaking = true;
            downstream.push(Frame::TtsStarted).await?;
        }

        let started = Instant::now();
        let pcm = self.synthesizer.synthesize(text).await?;

        downstream
            .push_opt(self.params.gate(MetricsData::Processing {
                processor: self.name(),
                value: started.elapsed(),
            }))
            .await?;
        downstream
            .push_opt(self.params.gate(MetricsData::TtsUsage {
                processor: self.name(),
                characters: text.chars().count(),
            }))
            .await?;

        if pcm.is_empty() {
            return Ok(());
        }
        downstream
            .push(Frame::OutputAudio(AudioFrame::mono(pcm, self.synthesizer.sample_rate())))
            .await
    }

    async fn stop_speaking(&mut self, downstream: &FrameSender) -> Result<()> {
        if self.speaking {
            self.speaking = false;
            downstream.push(Frame::TtsStopped).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl FrameProcessor for TtsProcessor {
    fn name(&self) -> &'static str {
        "cartesia_tts"
    }

    async fn process_frame(&mut self, frame: Frame, downstream: &FrameSender) -> Result<()> {
        match frame {
            Frame::Start(params) => {
                self.params = params;
                downstream.push(Frame::Start(params)).await
            }
            Frame::LlmResponseStart => {
                self.buffer.clear();
                downstream.push(Frame::LlmResponseStart).await
            }
            Frame::LlmText(text) => {
                self.buffer.push_str(&text);
                downstream.push(Frame::LlmText(text)).await?;
                while let Some(sentence) = take_sentence(&mut self.buffer) {
                    self.speak(&sentence, downstream).await?;
                }
                Ok(())
            }
            Frame::LlmResponseEnd => {
                let rest = std::mem::take(&mut self.buffer);
                let rest = rest.trim();
                let spoken = if rest.is_empty() {
                    Ok(())
                } else {
                    self.speak(rest, downstream).await
                };
                self.stop_speaking(downstream).await?;
                downstream.push(Frame::LlmResponseEnd).await?;
                spoken
            }
            other => downstream.push(other).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_sentence_boundaries() {
        let mut buffer = "Hi, this is Reva. How can I help".to_string();
        assert_eq!(take_sentence(&mut buffer).as_deref(), Some("Hi, this is Reva."));
        assert_eq!(take_sentence(&mut buffer), None);
        assert_eq!(buffer, " How can I help");

        buffer.push_str(" you today? ");
        assert_eq!(take_sentence(&mut buffer).as_deref(), Some("How can I help you today?"));
    }

    #[test]
    fn decimal_point_is_not_a_boundary() {
        let mut buffer = "A pint costs 4.50 today".to_string();
        assert_eq!(take_sentence(&mut buffer), None);
    }

    #[test]
    fn newline_ends_sentence() {
        let mut buffer = "\n\nKhar outlet\nopen".to_string();
        assert_eq!(take_sentence(&mut buffer).as_deref(), Some("Khar outlet"));
        assert_eq!(buffer, "open");
    }

    #[test]
    fn request_uses_raw_pcm() {
        let tts = CartesiaTts::new(
            Some(SecretString::from("key".to_string())),
            crate::config::DEFAULT_VOICE_ID.to_string(),
            "sonic-2".to_string(),
            24_000,
        )
        .unwrap();

        let json = serde_json::to_value(tts.request("Hello")).unwrap();
        assert_eq!(json["voice"]["mode"], "id");
        assert_eq!(json["voice"]["id"], crate::config::DEFAULT_VOICE_ID);
        assert_eq!(json["output_format"]["encoding"], "pcm_s16le");
        assert_eq!(json["output_format"]["sample_rate"], 24_000);
        assert_eq!(json["transcript"], "Hello");
    }
}
