//! Background consumer of the job queues

use super::{JobOutcome, JobPipeline, OperationCategory};
use crate::{Error, Result};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Drains the model, table, and partition queues into a [`JobPipeline`].
pub struct JobWorker {
    pipeline: JobPipeline,
}

impl JobWorker {
    pub fn new(pipeline: JobPipeline) -> Self {
        Self { pipeline }
    }

    /// Run until `cancel` fires. A job that has started always runs to the end.
    pub async fn run(&self, cancel: CancellationToken) {
        let channels = self.pipeline.channels().clone();
        info!("Job worker started");

        loop {
            let next: Result<(OperationCategory, String)> = tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Job worker shutting down gracefully");
                    break;
                }
                payload = channels.model.queue.dequeue() => payload.map(|p| (OperationCategory::Model, p)),
                payload = channels.table.queue.dequeue() => payload.map(|p| (OperationCategory::Table, p)),
                payload = channels.partition.queue.dequeue() => payload.map(|p| (OperationCategory::Partition, p)),
            };

            let (category, payload) = match next {
                Ok(next) => next,
                Err(e) => {
                    error!(error = %e, "Failed to dequeue job");
                    continue;
                }
            };

            match self.pipeline.dequeue_and_execute(category, &payload).await {
                Ok(JobOutcome::AlreadyFinished(status)) => {
                    debug!(category = category.as_str(), %status, "Skipped finished job");
                }
                Ok(_) => {}
                Err(Error::MalformedPayload(reason)) => {
                    warn!(category = category.as_str(), reason, "Dropped malformed job payload");
                }
                Err(e) => {
                    error!(category = category.as_str(), error = %e, "Job execution failed");
                }
            }
        }
    }
}
