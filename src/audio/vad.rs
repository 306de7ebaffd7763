//! Voice-activity detection
//!
//! Energy-based detector that turns a stream of caller audio into
//! speech-started / speech-stopped events.

use super::rms_energy;

/// Detector tuning
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VadParams {
    /// Minimum normalised RMS energy that counts as speech
    pub energy_threshold: f32,
    /// Continuous speech required before reporting a start
    pub start_secs: f32,
    /// Continuous silence required before reporting a stop
    pub stop_secs: f32,
}

impl Default for VadParams {
    fn default() -> Self {
        Self {
            energy_threshold: 0.02,
            start_secs: 0.2,
            stop_secs: 0.8,
        }
    }
}

/// State of the detector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadState {
    /// No speech
    Quiet,
    /// Speech seen, not yet long enough to count
    Starting,
    /// Caller is speaking
    Speaking,
    /// Silence after speech, not yet long enough to end the turn
    Stopping,
}

/// Transition reported by [`VadAnalyzer::analyze`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadEvent {
    SpeechStarted,
    SpeechStopped,
}

/// Detects speech segments in mono PCM16 audio
#[derive(Debug, Clone)]
pub struct VadAnalyzer {
    params: VadParams,
    state: VadState,
    start_samples: usize,
    stop_samples: usize,
    speech_counter: usize,
    silence_counter: usize,
}

impl VadAnalyzer {
    /// Create a detector for audio at `sample_rate`
    #[must_use]
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    pub fn new(params: VadParams, sample_rate: u32) -> Self {
        let samples_for = |secs: f32| (secs.max(0.0) * sample_rate as f32).round() as usize;

        tracing::debug!(?params, sample_rate, "vad analyzer initialized");

        Self {
            params,
            state: VadState::Quiet,
            start_samples: samples_for(params.start_secs),
            stop_samples: samples_for(params.stop_secs),
            speech_counter: 0,
            silence_counter: 0,
        }
    }

    #[must_use]
    pub const fn state(&self) -> VadState {
        self.state
    }

    /// Whether the caller is currently considered to be speaking
    #[must_use]
    pub const fn is_speaking(&self) -> bool {
        matches!(self.state, VadState::Speaking | VadState::Stopping)
    }

    /// Feed a chunk of audio, returning a transition if one happened
    pub fn analyze(&mut self, samples: &[i16]) -> Option<VadEvent> {
        let energy = rms_energy(samples);
        let is_speech = energy > self.params.energy_threshold;

        match self.state {
            VadState::Quiet => {
                if is_speech {
                    self.state = VadState::Starting;
                    self.speech_counter = samples.len();
                    tracing::trace!(energy, "speech detected, starting");
                    return self.check_started();
                }
            }
            VadState::Starting => {
                if is_speech {
                    self.speech_counter += samples.len();
                    return self.check_started();
                }
                // Too short to be a turn
                self.state = VadState::Quiet;
                self.speech_counter = 0;
            }
            VadState::Speaking => {
                if !is_speech {
                    self.state = VadState::Stopping;
                    self.silence_counter = samples.len();
                    return self.check_stopped();
                }
            }
            VadState::Stopping => {
                if is_speech {
                    self.state = VadState::Speaking;
                    self.silence_counter = 0;
                } else {
                    self.silence_counter += samples.len();
                    return self.check_stopped();
                }
            }
        }

        None
    }

    /// Return to the quiet state
    pub fn reset(&mut self) {
        self.state = VadState::Quiet;
        self.speech_counter = 0;
        self.silence_counter = 0;
    }

    fn check_started(&mut self) -> Option<VadEvent> {
        if self.speech_counter < self.start_samples {
            return None;
        }
        tracing::debug!(samples = self.speech_counter, "speech started");
        self.state = VadState::Speaking;
        self.speech_counter = 0;
        Some(VadEvent::SpeechStarted)
    }

    fn check_stopped(&mut self) -> Option<VadEvent> {
        if self.silence_counter < self.stop_samples {
            return None;
        }
        tracing::debug!(samples = self.silence_counter, "speech stopped");
        self.reset();
        Some(VadEvent::SpeechStopped)
    }
}
