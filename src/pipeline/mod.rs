//! Frame pipeline
//!
//! Stages are chained by bounded channels and each runs on its own task:
//!
//! ```text
//! queue_frames ─▶ stage 0 ─▶ stage 1 ─▶ … ─▶ stage n ─▶ sink (metrics/errors)
//! ```

mod frames;
mod metrics;
mod processor;
mod runner;
mod task;

pub use frames::{AudioFrame, Frame};
pub use metrics::{MetricsData, PipelineParams, TokenUsage};
pub use processor::{CHANNEL_CAPACITY, FrameProcessor, FrameSender, Pipeline};
pub use runner::PipelineRunner;
pub use task::{PipelineTask, TaskControl};
