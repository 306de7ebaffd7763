//! Speech-to-text (STT) via Deepgram

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

use crate::audio::pcm16_to_wav;
use crate::pipeline::{Frame, FrameProcessor, FrameSender, MetricsData, PipelineParams};
use crate::{Error, Result};

const DEEPGRAM_LISTEN_URL: &str = "https://api.deepgram.com/v1/listen";

/// Audio kept from before the detector fired (seconds)
const PRE_ROLL_SECS: f32 = 0.5;

/// Response from Deepgram transcription API
#[derive(serde::Deserialize)]
struct DeepgramResponse {
    results: DeepgramResults,
}

#[derive(serde::Deserialize)]
struct DeepgramResults {
    channels: Vec<DeepgramChannel>,
}

#[derive(serde::Deserialize)]
struct DeepgramChannel {
    alternatives: Vec<DeepgramAlternative>,
}

#[derive(serde::Deserialize)]
struct DeepgramAlternative {
    transcript: String,
}

/// Transcribes a complete utterance
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe WAV bytes, returning the (possibly empty) transcript
    ///
    /// # Errors
    ///
    /// Returns error if the provider request fails
    async fn transcribe(&self, wav: &[u8]) -> Result<String>;
}

/// Deepgram prerecorded transcription client
pub struct DeepgramStt {
    client: reqwest::Client,
    api_key: SecretString,
    model: String,
    language: String,
    base_url: String,
}

impl DeepgramStt {
    /// Create a Deepgram client
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new(api_key: Option<SecretString>, model: String, language: String) -> Result<Self> {
        let api_key = api_key
            .filter(|k| !k.expose_secret().is_empty())
            .ok_or_else(|| {
                Error::Config("Deepgram API key required (DEEPGRAM_API_KEY)".to_string())
            })?;

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            model,
            language,
            base_url: DEEPGRAM_LISTEN_URL.to_string(),
        })
    }

    /// Override the listen endpoint
    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }
}

#[async_trait]
impl Transcriber for DeepgramStt {
    async fn transcribe(&self, wav: &[u8]) -> Result<String> {
        tracing::debug!(audio_bytes = wav.len(), "starting Deepgram transcription");

        let response = self
            .client
            .post(&self.base_url)
            .query(&[
                ("model", self.model.as_str()),
                ("language", self.language.as_str()),
                ("punctuate", "true"),
                ("smart_format", "true"),
            ])
            .header("Authorization", format!("Token {}", self.api_key.expose_secret()))
            .header("Content-Type", "audio/wav")
            .body(wav.to_vec())
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Deepgram request failed");
                e
            })?;

        let status = response.status();
        tracing::debug!(status = %status, "received response");

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "Deepgram API error");
            return Err(Error::Stt(format!("Deepgram API error {status}: {body}")));
        }

        let result: DeepgramResponse = response.json().await.map_err(|e| {
            tracing::error!(error = %e, "failed to parse Deepgram response");
            e
        })?;

        let transcript = first_transcript(result);
        tracing::info!(transcript = %transcript, "transcription complete");
        Ok(transcript)
    }
}

fn first_transcript(response: DeepgramResponse) -> String {
    response
        .results
        .channels
        .into_iter()
        .next()
        .and_then(|c| c.alternatives.into_iter().next())
        .map(|a| a.transcript.trim().to_string())
        .unwrap_or_default()
}

/// Pipeline stage turning one spoken turn into one transcription frame
///
/// Audio is buffered between `UserStartedSpeaking` and `UserStoppedSpeaking`
/// (plus a short pre-roll), then transcribed as a single WAV segment.
pub struct SttProcessor {
    transcriber: Arc<dyn Transcriber>,
    sample_rate: u32,
    speaking: bool,
    utterance: Vec<i16>,
    pre_roll: VecDeque<i16>,
    pre_roll_len: usize,
    params: PipelineParams,
}

impl SttProcessor {
    #[must_use]
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    pub fn new(transcriber: Arc<dyn Transcriber>, sample_rate: u32) -> Self {
        let pre_roll_len = (PRE_ROLL_SECS * sample_rate as f32) as usize;
        Self {
            transcriber,
            sample_rate,
            speaking: false,
            utterance: Vec::new(),
            pre_roll: VecDeque::with_capacity(pre_roll_len),
            pre_roll_len,
            params: PipelineParams::default(),
        }
    }

    fn keep_pre_roll(&mut self, pcm: &[i16]) {
        self.pre_roll.extend(pcm.iter().copied());
        let excess = self.pre_roll.len().saturating_sub(self.pre_roll_len);
        self.pre_roll.drain(..excess);
    }

    async fn finish_utterance(&mut self, downstream: &FrameSender) -> Result<()> {
        let samples = std::mem::take(&mut self.utterance);
        if samples.is_empty() {
            return Ok(());
        }

        let started = Instant::now();
        let wav = pcm16_to_wav(&samples, self.sample_rate)?;
        let transcript = self.transcriber.transcribe(&wav).await?;

        downstream
            .push_opt(self.params.gate(MetricsData::Processing {
                processor: self.name(),
                value: started.elapsed(),
            }))
            .await?;

        if transcript.is_empty() {
            tracing::debug!("empty transcript, ignoring utterance");
            return Ok(());
        }

        downstream.push(Frame::Transcription(transcript)).await
    }
}

#[async_trait]
impl FrameProcessor for SttProcessor {
    fn name(&self) -> &'static str {
        "deepgram_stt"
    }

    async fn process_frame(&mut self, frame: Frame, downstream: &FrameSender) -> Result<()> {
        match frame {
            Frame::Start(params) => {
                self.params = params;
                downstream.push(Frame::Start(params)).await
            }
            Frame::InputAudio(audio) => {
                if self.speaking {
                    self.utterance.extend_from_slice(&audio.pcm);
                } else {
                    self.keep_pre_roll(&audio.pcm);
                }
                Ok(())
            }
            Frame::UserStartedSpeaking => {
                self.speaking = true;
                self.utterance.clear();
                self.utterance.extend(self.pre_roll.drain(..));
                downstream.push(Frame::UserStartedSpeaking).await
            }
            Frame::UserStoppedSpeaking => {
                self.speaking = false;
                downstream.push(Frame::UserStoppedSpeaking).await?;
                self.finish_utterance(downstream).await
            }
            other => downstream.push(other).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_key_is_config_error() {
        let result = DeepgramStt::new(None, "nova-3".into(), "en".into());
        assert!(matches!(result, Err(Error::Config(_))));

        let empty = DeepgramStt::new(
            Some(SecretString::from(String::new())),
            "nova-3".into(),
            "en".into(),
        );
        assert!(matches!(empty, Err(Error::Config(_))));
    }

    #[test]
    fn extracts_first_alternative() {
        let json = r#"{"results":{"channels":[{"alternatives":[{"transcript":" Is the taproom open today? "}]}]}}"#;
        let parsed: DeepgramResponse = serde_json::from_str(json).unwrap();
        assert_eq!(first_transcript(parsed), "Is the taproom open today?");

        let empty: DeepgramResponse =
            serde_json::from_str(r#"{"results":{"channels":[]}}"#).unwrap();
        assert_eq!(first_transcript(empty), "");
    }
}
