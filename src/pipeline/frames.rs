//! Frames exchanged between pipeline stages

use std::time::Duration;

use super::{MetricsData, PipelineParams};

/// Mono or interleaved PCM16 audio
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    pub pcm: Vec<i16>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioFrame {
    /// Create a mono audio frame
    #[must_use]
    pub const fn mono(pcm: Vec<i16>, sample_rate: u32) -> Self {
        Self {
            pcm,
            sample_rate,
            channels: 1,
        }
    }

    /// Playback duration of this frame
    #[must_use]
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 || self.channels == 0 {
            return Duration::ZERO;
        }
        let frames = self.pcm.len() as u64 / u64::from(self.channels);
        Duration::from_micros(frames * 1_000_000 / u64::from(self.sample_rate))
    }
}

/// Unit of data flowing downstream through the pipeline
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// First frame of every run, carries the task parameters
    Start(PipelineParams),
    /// Raw audio received from the caller
    InputAudio(AudioFrame),
    UserStartedSpeaking,
    UserStoppedSpeaking,
    /// Final transcript of one user utterance
    Transcription(String),
    /// Request a model response over the current context
    LlmRun,
    LlmResponseStart,
    /// Streamed model text
    LlmText(String),
    LlmResponseEnd,
    TtsStarted,
    /// Synthesised speech headed for the caller
    OutputAudio(AudioFrame),
    TtsStopped,
    Metrics(MetricsData),
    /// Non-fatal processing error
    Error(String),
    /// Graceful end of the pipeline run
    End,
}

impl Frame {
    /// Short name used in logs
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Start(_) => "start",
            Self::InputAudio(_) => "input_audio",
            Self::UserStartedSpeaking => "user_started_speaking",
            Self::UserStoppedSpeaking => "user_stopped_speaking",
            Self::Transcription(_) => "transcription",
            Self::LlmRun => "llm_run",
            Self::LlmResponseStart => "llm_response_start",
            Self::LlmText(_) => "llm_text",
            Self::LlmResponseEnd => "llm_response_end",
            Self::TtsStarted => "tts_started",
            Self::OutputAudio(_) => "output_audio",
            Self::TtsStopped => "tts_stopped",
            Self::Metrics(_) => "metrics",
            Self::Error(_) => "error",
            Self::End => "end",
        }
    }
}
