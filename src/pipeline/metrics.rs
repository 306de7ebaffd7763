//! Processing and usage metrics emitted by pipeline stages

use std::time::Duration;

use serde::Deserialize;

use super::Frame;

/// Token accounting reported by the language model
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub completion_tokens: u32,
    #[serde(default)]
    pub total_tokens: u32,
}

/// A single metrics sample
#[derive(Debug, Clone, PartialEq)]
pub enum MetricsData {
    /// Time to first byte of a service response
    Ttfb {
        processor: &'static str,
        value: Duration,
    },
    /// Total time spent handling a request
    Processing {
        processor: &'static str,
        value: Duration,
    },
    LlmUsage {
        processor: &'static str,
        usage: TokenUsage,
    },
    /// Characters sent for synthesis
    TtsUsage {
        processor: &'static str,
        characters: usize,
    },
}

impl MetricsData {
    /// Whether this sample is a usage metric (vs. timing)
    #[must_use]
    pub const fn is_usage(&self) -> bool {
        matches!(self, Self::LlmUsage { .. } | Self::TtsUsage { .. })
    }

    /// Emit the sample as a structured log event
    pub fn log(&self) {
        match self {
            Self::Ttfb { processor, value } => {
                tracing::debug!(processor, ttfb_ms = value.as_millis(), "ttfb");
            }
            Self::Processing { processor, value } => {
                tracing::debug!(processor, processing_ms = value.as_millis(), "processing time");
            }
            Self::LlmUsage { processor, usage } => {
                tracing::info!(
                    processor,
                    prompt_tokens = usage.prompt_tokens,
                    completion_tokens = usage.completion_tokens,
                    total_tokens = usage.total_tokens,
                    "llm usage"
                );
            }
            Self::TtsUsage {
                processor,
                characters,
            } => {
                tracing::info!(processor, characters, "tts usage");
            }
        }
    }
}

/// Parameters of a pipeline task
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineParams {
    /// Emit TTFB and processing-time metrics
    pub enable_metrics: bool,
    /// Emit token/character usage metrics
    pub enable_usage_metrics: bool,
}

impl PipelineParams {
    /// Wrap a sample into a frame if the matching metric class is enabled
    #[must_use]
    pub fn gate(&self, data: MetricsData) -> Option<Frame> {
        let enabled = if data.is_usage() {
            self.enable_usage_metrics
        } else {
            self.enable_metrics
        };
        if enabled {
            Some(Frame::Metrics(data))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gate_respects_metric_class() {
        let timing_only = PipelineParams {
            enable_metrics: true,
            enable_usage_metrics: false,
        };
        let ttfb = MetricsData::Ttfb {
            processor: "llm",
            value: Duration::from_millis(120),
        };
        let usage = MetricsData::TtsUsage {
            processor: "tts",
            characters: 42,
        };

        assert!(timing_only.gate(ttfb).is_some());
        assert!(timing_only.gate(usage).is_none());
        assert!(PipelineParams::default()
            .gate(MetricsData::Processing {
                processor: "stt",
                value: Duration::ZERO,
            })
            .is_none());
    }
}
