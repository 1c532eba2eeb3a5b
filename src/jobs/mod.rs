//! Asynchronous job pipeline
//!
//! Submissions write a `Queued` record and push the job onto the queue of its
//! category. A consumer pops the payload, marks the job `Running`, calls the
//! [`PartitionManager`](crate::lifecycle::PartitionManager), and records
//! `Complete` or `ErrorProcessing`. Callers poll the status store.

mod job;
mod pipeline;
mod queue;
mod status;
mod worker;

pub use job::{JobKey, JobStatus, OperationCategory, ProcessingJob, ProcessingTrackingInfo};
pub use pipeline::{JobChannel, JobChannels, JobOutcome, JobPipeline};
pub use queue::{DeadLetter, DeadLetterSink, InMemoryDeadLetters, InMemoryJobQueue, JobQueue};
pub use status::{InMemoryStatusStore, ObjectStoreStatusStore, StatusStore};
pub use worker::JobWorker;
