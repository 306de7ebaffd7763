//! Pipeline runner

use super::PipelineTask;
use crate::Result;

/// Drives a [`PipelineTask`] to completion
#[derive(Debug, Clone, Copy)]
pub struct PipelineRunner {
    handle_sigint: bool,
}

impl PipelineRunner {
    /// Create a runner; with `handle_sigint` set, Ctrl-C cancels the task
    #[must_use]
    pub const fn new(handle_sigint: bool) -> Self {
        Self { handle_sigint }
    }

    /// Run `task` until it ends or is cancelled
    ///
    /// # Errors
    ///
    /// Returns error if the task fails to start
    pub async fn run(&self, task: &PipelineTask) -> Result<()> {
        if !self.handle_sigint {
            return task.run().await;
        }

        tokio::select! {
            result = task.run() => result,
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    tracing::warn!(error = %e, "failed to listen for ctrl-c");
                }
                task.cancel();
                Ok(())
            }
        }
    }
}
