//! Real-time audio transport between the caller and the pipeline
//!
//! The transport contributes two stages: [`TransportInput`] at the head
//! (voice activity detection over inbound audio) and [`TransportOutput`]
//! near the tail (audio chunks and JSON events for the client).

pub mod websocket;

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::audio::{
    INPUT_SAMPLE_RATE, OUTPUT_SAMPLE_RATE, VadAnalyzer, VadEvent, VadParams, pcm16_to_le_bytes,
};
use crate::pipeline::{
    AudioFrame, Frame, FrameProcessor, FrameSender, PipelineRunner, PipelineTask,
};
use crate::{Error, Result};

/// Capacity of the per-session outbound queue
pub const OUTBOUND_CAPACITY: usize = 512;

/// Transport settings
#[derive(Debug, Clone, PartialEq)]
pub struct TransportParams {
    pub audio_in_enabled: bool,
    pub audio_out_enabled: bool,
    pub audio_in_sample_rate: u32,
    pub audio_out_sample_rate: u32,
    /// Outbound audio message size in 10 ms units
    pub audio_out_10ms_chunks: u32,
    /// Voice activity detection; `None` disables turn detection
    pub vad: Option<VadParams>,
}

impl Default for TransportParams {
    fn default() -> Self {
        Self {
            audio_in_enabled: true,
            audio_out_enabled: true,
            audio_in_sample_rate: INPUT_SAMPLE_RATE,
            audio_out_sample_rate: OUTPUT_SAMPLE_RATE,
            audio_out_10ms_chunks: 2,
            vad: Some(VadParams::default()),
        }
    }
}

/// Event sent to the client as a JSON text message
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Session established
    Connected { session_id: String },
    UserTranscript { text: String },
    /// Streamed bot response text
    BotText { text: String },
    BotStartedSpeaking,
    BotStoppedSpeaking,
    Error { message: String },
    Pong,
}

/// Message queued for the client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundMessage {
    /// PCM16LE mono audio
    Audio(Vec<u8>),
    Event(ServerEvent),
}

/// Identity of a connected client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientInfo {
    pub id: uuid::Uuid,
}

impl ClientInfo {
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
        }
    }
}

impl Default for ClientInfo {
    fn default() -> Self {
        Self::new()
    }
}

/// Callbacks fired as clients come and go
#[async_trait]
pub trait TransportEventHandler: Send + Sync {
    /// A client connected and the pipeline is running
    ///
    /// # Errors
    ///
    /// Returns error if the session could not be started
    async fn on_client_connected(&self, client: &ClientInfo) -> Result<()>;

    /// The client went away
    async fn on_client_disconnected(&self, client: &ClientInfo);
}

/// Everything a transport needs to serve one session
pub struct TransportSession {
    pub task: Arc<PipelineTask>,
    pub runner: PipelineRunner,
    pub handler: Arc<dyn TransportEventHandler>,
    pub params: TransportParams,
    pub outbound_tx: mpsc::Sender<OutboundMessage>,
    pub outbound_rx: mpsc::Receiver<OutboundMessage>,
}

impl std::fmt::Debug for TransportSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportSession")
            .field("task", &self.task)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

/// Head stage: turn detection over inbound audio
pub struct TransportInput {
    params: TransportParams,
    vad: Option<VadAnalyzer>,
}

impl TransportInput {
    #[must_use]
    pub fn new(params: TransportParams) -> Self {
        let vad = params
            .vad
            .map(|vad| VadAnalyzer::new(vad, params.audio_in_sample_rate));
        Self { params, vad }
    }
}

#[async_trait]
impl FrameProcessor for TransportInput {
    fn name(&self) -> &'static str {
        "transport_input"
    }

    async fn process_frame(&mut self, frame: Frame, downstream: &FrameSender) -> Result<()> {
        match frame {
            Frame::InputAudio(audio) => {
                if !self.params.audio_in_enabled {
                    return Ok(());
                }
                let event = self.vad.as_mut().and_then(|vad| vad.analyze(&audio.pcm));
                // Audio first so the triggering chunk lands in the pre-roll or utterance
                downstream.push(Frame::InputAudio(audio)).await?;
                match event {
                    Some(VadEvent::SpeechStarted) => {
                        tracing::debug!("user started speaking");
                        downstream.push(Frame::UserStartedSpeaking).await
                    }
                    Some(VadEvent::SpeechStopped) => {
                        tracing::debug!("user stopped speaking");
                        downstream.push(Frame::UserStoppedSpeaking).await
                    }
                    None => Ok(()),
                }
            }
            other => downstream.push(other).await,
        }
    }
}

/// Tail stage: sends audio and events to the client
pub struct TransportOutput {
    params: TransportParams,
    outbound: mpsc::Sender<OutboundMessage>,
}

impl TransportOutput {
    #[must_use]
    pub const fn new(params: TransportParams, outbound: mpsc::Sender<OutboundMessage>) -> Self {
        Self { params, outbound }
    }

    async fn send(&self, message: OutboundMessage) -> Result<()> {
        self.outbound
            .send(message)
            .await
            .map_err(|_| Error::Transport("client connection closed".to_string()))
    }

    async fn send_event(&self, event: ServerEvent) -> Result<()> {
        self.send(OutboundMessage::Event(event)).await
    }

    async fn send_audio(&self, audio: &AudioFrame) -> Result<()> {
        if !self.params.audio_out_enabled {
            return Ok(());
        }
        if audio.sample_rate != self.params.audio_out_sample_rate {
            tracing::warn!(
                got = audio.sample_rate,
                expected = self.params.audio_out_sample_rate,
                "output audio sample rate mismatch"
            );
        }
        for chunk in audio.pcm.chunks(chunk_samples(audio, self.params.audio_out_10ms_chunks)) {
            self.send(OutboundMessage::Audio(pcm16_to_le_bytes(chunk))).await?;
        }
        Ok(())
    }
}

/// Samples per outbound message for `chunks` × 10 ms of `audio`
fn chunk_samples(audio: &AudioFrame, chunks: u32) -> usize {
    let per_10ms = (audio.sample_rate / 100).max(1) as usize * usize::from(audio.channels.max(1));
    per_10ms * chunks.max(1) as usize
}

#[async_trait]
impl FrameProcessor for TransportOutput {
    fn name(&self) -> &'static str {
        "transport_output"
    }

    async fn process_frame(&mut self, frame: Frame, downstream: &FrameSender) -> Result<()> {
        match &frame {
            Frame::OutputAudio(audio) => return self.send_audio(audio).await,
            Frame::Transcription(text) => {
                self.send_event(ServerEvent::UserTranscript { text: text.clone() })
                    .await?;
            }
            Frame::LlmText(text) => {
                self.send_event(ServerEvent::BotText { text: text.clone() })
                    .await?;
            }
            Frame::TtsStarted => self.send_event(ServerEvent::BotStartedSpeaking).await?,
            Frame::TtsStopped => self.send_event(ServerEvent::BotStoppedSpeaking).await?,
            Frame::Error(message) => {
                self.send_event(ServerEvent::Error {
                    message: message.clone(),
                })
                .await?;
            }
            _ => {}
        }
        downstream.push(frame).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_with_type_tag() {
        let json = serde_json::to_value(ServerEvent::UserTranscript {
            text: "hello".into(),
        })
        .unwrap();
        assert_eq!(json, serde_json::json!({ "type": "user_transcript", "text": "hello" }));

        let json = serde_json::to_value(ServerEvent::BotStartedSpeaking).unwrap();
        assert_eq!(json, serde_json::json!({ "type": "bot_started_speaking" }));
    }

    #[tokio::test]
    async fn output_audio_is_chunked_and_consumed() {
        let (out_tx, mut out_rx) = mpsc::channel(16);
        let (tx, mut rx) = mpsc::channel(16);
        let mut stage = TransportOutput::new(TransportParams::default(), out_tx);
        let downstream = FrameSender::new(tx);

        // 25 ms at 24 kHz -> two 20 ms chunks (480 samples) and a 120-sample tail
        let audio = AudioFrame::mono(vec![1; 600], OUTPUT_SAMPLE_RATE);
        stage
            .process_frame(Frame::OutputAudio(audio), &downstream)
            .await
            .unwrap();

        let sizes: Vec<usize> = std::iter::from_fn(|| out_rx.try_recv().ok())
            .map(|m| match m {
                OutboundMessage::Audio(bytes) => bytes.len(),
                OutboundMessage::Event(e) => panic!("unexpected event {e:?}"),
            })
            .collect();
        assert_eq!(sizes, vec![960, 240]);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn input_emits_speaking_frames_after_audio() {
        let params = TransportParams {
            vad: Some(VadParams {
                start_secs: 0.0,
                stop_secs: 0.0,
                ..VadParams::default()
            }),
            ..TransportParams::default()
        };
        let mut stage = TransportInput::new(params);
        let (tx, mut rx) = mpsc::channel(16);
        let downstream = FrameSender::new(tx);

        let loud: Vec<i16> = (0..160).map(|i| if i % 2 == 0 { 8000 } else { -8000 }).collect();
        stage
            .process_frame(
                Frame::InputAudio(AudioFrame::mono(loud, INPUT_SAMPLE_RATE)),
                &downstream,
            )
            .await
            .unwrap();
        stage
            .process_frame(
                Frame::InputAudio(AudioFrame::mono(vec![0; 160], INPUT_SAMPLE_RATE)),
                &downstream,
            )
            .await
            .unwrap();

        let kinds: Vec<&str> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|f| f.kind())
            .collect();
        assert_eq!(
            kinds,
            vec!["input_audio", "user_started_speaking", "input_audio", "user_stopped_speaking"]
        );
    }
}
