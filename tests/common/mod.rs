//! Shared test utilities
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use reva_voice::config::file::RevaConfigFile;
use reva_voice::context::ContextMessage;
use reva_voice::pipeline::{Frame, FrameSender, TaskControl, TokenUsage};
use reva_voice::services::{Generation, LlmService, Synthesizer, Transcriber};
use reva_voice::{Config, Result};

/// Build a config from explicit env values, ignoring the process environment
pub fn test_config(vars: &[(&str, &str)]) -> Config {
    let map: HashMap<String, String> = vars
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect();
    Config::from_sources(move |key| map.get(key).cloned(), RevaConfigFile::default())
        .expect("valid test config")
}

/// Config with every provider key set
pub fn keyed_config() -> Config {
    test_config(&[
        ("DEEPGRAM_API_KEY", "dg-test"),
        ("CARTESIA_API_KEY", "ca-test"),
        ("OPENROUTER_API_KEY", "sk-or-test"),
    ])
}

/// Task double recording what the event handlers ask of it
#[derive(Default)]
pub struct RecordingTask {
    pub queued: Mutex<Vec<Frame>>,
    pub cancels: AtomicUsize,
}

impl RecordingTask {
    pub fn cancel_count(&self) -> usize {
        self.cancels.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TaskControl for RecordingTask {
    async fn queue_frames(&self, frames: Vec<Frame>) -> Result<()> {
        self.queued.lock().await.extend(frames);
        Ok(())
    }

    async fn cancel(&self) {
        self.cancels.fetch_add(1, Ordering::SeqCst);
    }
}

/// Transcriber returning a fixed transcript
pub struct FakeTranscriber {
    pub transcript: String,
    pub calls: AtomicUsize,
}

impl FakeTranscriber {
    pub fn new(transcript: &str) -> Arc<Self> {
        Arc::new(Self {
            transcript: transcript.to_string(),
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl Transcriber for FakeTranscriber {
    async fn transcribe(&self, wav: &[u8]) -> Result<String> {
        assert!(wav.starts_with(b"RIFF"), "expected WAV input");
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.transcript.clone())
    }
}

/// Language model streaming a canned reply in two pieces
pub struct FakeLlm {
    pub reply: String,
    pub seen: Mutex<Vec<Vec<ContextMessage>>>,
}

impl FakeLlm {
    pub fn new(reply: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: reply.to_string(),
            seen: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl LlmService for FakeLlm {
    fn name(&self) -> &'static str {
        "fake_llm"
    }

    async fn generate(
        &self,
        messages: &[ContextMessage],
        downstream: &FrameSender,
    ) -> Result<Generation> {
        self.seen.lock().await.push(messages.to_vec());
        let (head, tail) = self.reply.split_at(self.reply.len() / 2);
        downstream.push(Frame::LlmText(head.to_string())).await?;
        downstream.push(Frame::LlmText(tail.to_string())).await?;
        Ok(Generation {
            usage: Some(TokenUsage {
                prompt_tokens: 10,
                completion_tokens: 5,
                total_tokens: 15,
            }),
            ttfb: None,
        })
    }
}

/// Synthesizer returning 10 ms of silence per sentence
pub struct FakeSynth {
    pub spoken: Mutex<Vec<String>>,
    pub latency: Duration,
}

impl FakeSynth {
    pub fn new() -> Arc<Self> {
        Self::slow(Duration::ZERO)
    }

    /// Synthesizer taking `latency` per sentence
    pub fn slow(latency: Duration) -> Arc<Self> {
        Arc::new(Self {
            spoken: Mutex::new(Vec::new()),
            latency,
        })
    }
}

#[async_trait]
impl Synthesizer for FakeSynth {
    fn sample_rate(&self) -> u32 {
        24_000
    }

    async fn synthesize(&self, text: &str) -> Result<Vec<i16>> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.spoken.lock().await.push(text.to_string());
        Ok(vec![0; 240])
    }
}

/// Square wave loud enough to count as speech
pub fn speech(duration_secs: f32, sample_rate: u32) -> Vec<i16> {
    let len = (sample_rate as f32 * duration_secs) as usize;
    (0..len).map(|i| if (i / 8) % 2 == 0 { 8000 } else { -8000 }).collect()
}

/// Silence
pub fn silence(duration_secs: f32, sample_rate: u32) -> Vec<i16> {
    vec![0; (sample_rate as f32 * duration_secs) as usize]
}
