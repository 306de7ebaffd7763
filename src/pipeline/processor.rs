//! Frame processor trait and the linear pipeline that chains processors

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use super::Frame;
use crate::{Error, Result};

/// Capacity of each inter-stage channel
pub const CHANNEL_CAPACITY: usize = 256;

/// Handle for pushing frames to the next stage
#[derive(Debug, Clone)]
pub struct FrameSender {
    tx: mpsc::Sender<Frame>,
}

impl FrameSender {
    #[must_use]
    pub const fn new(tx: mpsc::Sender<Frame>) -> Self {
        Self { tx }
    }

    /// Push a frame downstream
    ///
    /// # Errors
    ///
    /// Returns error if the downstream stage has shut down
    pub async fn push(&self, frame: Frame) -> Result<()> {
        self.tx
            .send(frame)
            .await
            .map_err(|e| Error::Pipeline(format!("downstream closed, dropped {}", e.0.kind())))
    }

    /// Push a frame if present
    ///
    /// # Errors
    ///
    /// Returns error if the downstream stage has shut down
    pub async fn push_opt(&self, frame: Option<Frame>) -> Result<()> {
        match frame {
            Some(frame) => self.push(frame).await,
            None => Ok(()),
        }
    }
}

/// A pipeline stage
///
/// Processors receive every frame from upstream and must forward the frames
/// they do not consume, including `Start` and `End`.
#[async_trait]
pub trait FrameProcessor: Send {
    /// Stage name used in logs and metrics
    fn name(&self) -> &'static str;

    /// Handle one frame
    ///
    /// # Errors
    ///
    /// Returned errors are logged and forwarded as [`Frame::Error`]; the
    /// stage keeps running.
    async fn process_frame(&mut self, frame: Frame, downstream: &FrameSender) -> Result<()>;
}

/// Ordered chain of processors
pub struct Pipeline {
    stages: Vec<Box<dyn FrameProcessor>>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("stages", &self.stage_names())
            .finish()
    }
}

impl Pipeline {
    #[must_use]
    pub fn new(stages: Vec<Box<dyn FrameProcessor>>) -> Self {
        Self { stages }
    }

    /// Stage names in order
    #[must_use]
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Spawn every stage onto `tasks`, returning the receiver of the last stage
    pub(crate) fn spawn(
        self,
        input: mpsc::Receiver<Frame>,
        tasks: &mut JoinSet<()>,
    ) -> mpsc::Receiver<Frame> {
        let mut rx = input;
        for stage in self.stages {
            let (tx, next_rx) = mpsc::channel(CHANNEL_CAPACITY);
            tasks.spawn(run_stage(stage, rx, FrameSender::new(tx)));
            rx = next_rx;
        }
        rx
    }
}

async fn run_stage(
    mut stage: Box<dyn FrameProcessor>,
    mut rx: mpsc::Receiver<Frame>,
    downstream: FrameSender,
) {
    let name = stage.name();
    tracing::trace!(stage = name, "stage started");

    while let Some(frame) = rx.recv().await {
        let is_end = matches!(frame, Frame::End);
        if let Err(e) = stage.process_frame(frame, &downstream).await {
            tracing::error!(stage = name, error = %e, "frame processing failed");
            if downstream.push(Frame::Error(e.to_string())).await.is_err() {
                break;
            }
        }
        if is_end {
            break;
        }
    }

    tracing::trace!(stage = name, "stage stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Upper;

    #[async_trait]
    impl FrameProcessor for Upper {
        fn name(&self) -> &'static str {
            "upper"
        }

        async fn process_frame(&mut self, frame: Frame, downstream: &FrameSender) -> Result<()> {
            match frame {
                Frame::LlmText(text) => downstream.push(Frame::LlmText(text.to_uppercase())).await,
                other => downstream.push(other).await,
            }
        }
    }

    #[tokio::test]
    async fn stages_run_in_order() {
        let pipeline = Pipeline::new(vec![Box::new(Upper), Box::new(Upper)]);
        assert_eq!(pipeline.stage_names(), vec!["upper", "upper"]);

        let (tx, rx) = mpsc::channel(8);
        let mut tasks = JoinSet::new();
        let mut tail = pipeline.spawn(rx, &mut tasks);

        tx.send(Frame::LlmText("a".into())).await.unwrap();
        tx.send(Frame::LlmText("b".into())).await.unwrap();
        tx.send(Frame::End).await.unwrap();

        assert_eq!(tail.recv().await, Some(Frame::LlmText("A".into())));
        assert_eq!(tail.recv().await, Some(Frame::LlmText("B".into())));
        assert_eq!(tail.recv().await, Some(Frame::End));
    }
}
