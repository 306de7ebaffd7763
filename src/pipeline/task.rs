//! Pipeline task: owns a pipeline run, accepts queued frames, supports cancellation

use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;

use super::processor::CHANNEL_CAPACITY;
use super::{Frame, FrameSender, Pipeline, PipelineParams};
use crate::{Error, Result};

/// Operations event handlers need from a running task
#[async_trait]
pub trait TaskControl: Send + Sync {
    /// Queue frames at the head of the pipeline
    ///
    /// # Errors
    ///
    /// Returns error if the pipeline no longer accepts frames
    async fn queue_frames(&self, frames: Vec<Frame>) -> Result<()>;

    /// Stop the pipeline run
    async fn cancel(&self);
}

/// A single run of a [`Pipeline`]
pub struct PipelineTask {
    params: PipelineParams,
    head: mpsc::Sender<Frame>,
    pending: Mutex<Option<(Pipeline, mpsc::Receiver<Frame>)>>,
    cancelled: watch::Sender<bool>,
}

impl std::fmt::Debug for PipelineTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineTask")
            .field("params", &self.params)
            .field("cancelled", &self.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl PipelineTask {
    /// Create a task for `pipeline`
    ///
    /// Frames may be queued before [`run`](Self::run) starts; they are
    /// delivered after the `Start` frame.
    #[must_use]
    pub fn new(pipeline: Pipeline, params: PipelineParams) -> Self {
        let (head, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (cancelled, _) = watch::channel(false);
        Self {
            params,
            head,
            pending: Mutex::new(Some((pipeline, rx))),
            cancelled,
        }
    }

    /// Sender feeding the head of the pipeline (used by transports)
    #[must_use]
    pub fn frame_sender(&self) -> FrameSender {
        FrameSender::new(self.head.clone())
    }

    /// Queue a single frame
    ///
    /// # Errors
    ///
    /// Returns error if the pipeline head has shut down
    pub async fn queue_frame(&self, frame: Frame) -> Result<()> {
        self.head
            .send(frame)
            .await
            .map_err(|_| Error::Pipeline("task no longer accepts frames".to_string()))
    }

    /// Queue frames in order
    ///
    /// # Errors
    ///
    /// Returns error if the pipeline head has shut down
    pub async fn queue_frames(&self, frames: impl IntoIterator<Item = Frame>) -> Result<()> {
        for frame in frames {
            self.queue_frame(frame).await?;
        }
        Ok(())
    }

    /// Cancel the run
    ///
    /// Returns `true` only for the call that actually cancelled.
    pub fn cancel(&self) -> bool {
        let already = self.cancelled.send_replace(true);
        if !already {
            tracing::info!("cancelling pipeline task");
        }
        !already
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.cancelled.borrow()
    }

    /// Run the pipeline until `End` reaches the sink or the task is cancelled
    ///
    /// # Errors
    ///
    /// Returns error if the task was already run
    pub async fn run(&self) -> Result<()> {
        let pending = self
            .pending
            .lock()
            .map_err(|_| Error::Pipeline("task state poisoned".to_string()))?
            .take();
        let Some((pipeline, mut head_rx)) = pending else {
            return Err(Error::Pipeline("task already started".to_string()));
        };

        let mut cancel_rx = self.cancelled.subscribe();
        if *cancel_rx.borrow_and_update() {
            tracing::debug!("task cancelled before start");
            return Ok(());
        }

        tracing::info!(stages = ?pipeline.stage_names(), "pipeline task starting");

        let mut tasks = JoinSet::new();
        let (first_tx, first_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let tail = pipeline.spawn(first_rx, &mut tasks);

        let params = self.params;
        tasks.spawn(async move {
            if first_tx.send(Frame::Start(params)).await.is_err() {
                return;
            }
            while let Some(frame) = head_rx.recv().await {
                if first_tx.send(frame).await.is_err() {
                    break;
                }
            }
        });

        tokio::select! {
            () = drain(tail) => tracing::info!("pipeline reached end"),
            _ = cancel_rx.wait_for(|cancelled| *cancelled) => {
                tracing::info!("pipeline task cancelled");
            }
        }

        tasks.shutdown().await;
        Ok(())
    }
}

/// Consume frames leaving the last stage
async fn drain(mut tail: mpsc::Receiver<Frame>) {
    while let Some(frame) = tail.recv().await {
        match frame {
            Frame::Metrics(data) => data.log(),
            Frame::Error(message) => tracing::warn!(error = %message, "pipeline error"),
            Frame::End => return,
            other => tracing::trace!(frame = other.kind(), "frame reached sink"),
        }
    }
}

#[async_trait]
impl TaskControl for PipelineTask {
    async fn queue_frames(&self, frames: Vec<Frame>) -> Result<()> {
        Self::queue_frames(self, frames).await
    }

    async fn cancel(&self) {
        Self::cancel(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_is_idempotent() {
        let task = PipelineTask::new(Pipeline::new(Vec::new()), PipelineParams::default());
        assert!(!task.is_cancelled());
        assert!(task.cancel());
        assert!(!task.cancel());
        assert!(task.is_cancelled());
    }

    #[tokio::test]
    async fn run_twice_fails() {
        let task = PipelineTask::new(Pipeline::new(Vec::new()), PipelineParams::default());
        task.queue_frame(Frame::End).await.unwrap();
        task.run().await.unwrap();
        assert!(matches!(task.run().await, Err(Error::Pipeline(_))));
    }

    #[tokio::test]
    async fn cancelled_before_run_returns_immediately() {
        let task = PipelineTask::new(Pipeline::new(Vec::new()), PipelineParams::default());
        task.cancel();
        task.run().await.unwrap();
    }
}
