//! Submit, execute, and query tracked jobs

use super::{
    DeadLetter, DeadLetterSink, InMemoryDeadLetters, InMemoryJobQueue, InMemoryStatusStore,
    JobKey, JobQueue, JobStatus, OperationCategory, ProcessingJob, ProcessingTrackingInfo,
    StatusStore,
};
use crate::clock::{Clock, SystemClock};
use crate::engine::RefreshScope;
use crate::lifecycle::PartitionManager;
use crate::{Error, Result};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Queue and status store of one operation category
#[derive(Clone)]
pub struct JobChannel {
    pub queue: Arc<dyn JobQueue>,
    pub status: Arc<dyn StatusStore>,
}

impl JobChannel {
    pub fn new(queue: Arc<dyn JobQueue>, status: Arc<dyn StatusStore>) -> Self {
        Self { queue, status }
    }

    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(InMemoryJobQueue::new()),
            Arc::new(InMemoryStatusStore::new()),
        )
    }
}

/// One channel per operation category
#[derive(Clone)]
pub struct JobChannels {
    pub model: JobChannel,
    pub table: JobChannel,
    pub partition: JobChannel,
}

impl JobChannels {
    pub fn in_memory() -> Self {
        Self {
            model: JobChannel::in_memory(),
            table: JobChannel::in_memory(),
            partition: JobChannel::in_memory(),
        }
    }

    pub fn get(&self, category: OperationCategory) -> &JobChannel {
        match category {
            OperationCategory::Model => &self.model,
            OperationCategory::Table => &self.table,
            OperationCategory::Partition => &self.partition,
        }
    }
}

/// What happened to a dequeued job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    /// The lifecycle call failed; the error text is in the status record
    Failed(String),
    /// A redelivered job whose record is already terminal; nothing was run
    AlreadyFinished(JobStatus),
}

/// Turns lifecycle calls into tracked asynchronous jobs.
#[derive(Clone)]
pub struct JobPipeline {
    manager: PartitionManager,
    channels: JobChannels,
    dead_letters: Arc<dyn DeadLetterSink>,
    clock: Arc<dyn Clock>,
}

impl JobPipeline {
    pub fn new(manager: PartitionManager, channels: JobChannels) -> Self {
        Self {
            manager,
            channels,
            dead_letters: Arc::new(InMemoryDeadLetters::new()),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_dead_letters(mut self, dead_letters: Arc<dyn DeadLetterSink>) -> Self {
        self.dead_letters = dead_letters;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn channels(&self) -> &JobChannels {
        &self.channels
    }

    pub fn manager(&self) -> &PartitionManager {
        &self.manager
    }

    // ── Submission ──────────────────────────────────────────────────

    /// Queue a full refresh of `database`.
    pub async fn submit_model(&self, database: &str) -> Result<ProcessingTrackingInfo> {
        self.submit(OperationCategory::Model, database, None, None)
            .await
    }

    /// Queue a refresh of one table, or of a comma separated list of tables.
    pub async fn submit_table(
        &self,
        database: &str,
        tables: &str,
    ) -> Result<ProcessingTrackingInfo> {
        self.submit(OperationCategory::Table, database, Some(tables), None)
            .await
    }

    /// Queue a refresh of one partition.
    pub async fn submit_partition(
        &self,
        database: &str,
        table: &str,
        partition: &str,
    ) -> Result<ProcessingTrackingInfo> {
        self.submit(
            OperationCategory::Partition,
            database,
            Some(table),
            Some(partition),
        )
        .await
    }

    async fn submit(
        &self,
        category: OperationCategory,
        database: &str,
        table: Option<&str>,
        partition: Option<&str>,
    ) -> Result<ProcessingTrackingInfo> {
        let job = ProcessingJob::queued(self.clock.now(), database, table, partition);
        let payload = serde_json::to_string(&job)?;
        let channel = self.channels.get(category);

        // Record first so a fast consumer cannot have its Running write
        // overwritten by this Queued one.
        channel.status.put(&job).await?;
        channel.queue.enqueue(payload).await?;

        metrics::counter!(
            "tabulon_jobs_submitted_total",
            "category" => category.as_str()
        )
        .increment(1);
        info!(
            category = category.as_str(),
            tracking_id = %job.tracking_id,
            database,
            table = ?table,
            partition = ?partition,
            "Job queued"
        );
        Ok(job.tracking_info())
    }

    // ── Execution ───────────────────────────────────────────────────

    /// Pop and execute the next job of `category`, if any.
    pub async fn process_next(&self, category: OperationCategory) -> Result<Option<JobOutcome>> {
        let channel = self.channels.get(category);
        match channel.queue.try_dequeue().await? {
            Some(payload) => self.dequeue_and_execute(category, &payload).await.map(Some),
            None => Ok(None),
        }
    }

    /// Execute one queued payload.
    ///
    /// Once the payload parses, every failure is contained: the redelivery
    /// check, the `Running` write, and the lifecycle call all end the job in
    /// `ErrorProcessing` and return `Ok(JobOutcome::Failed)`. A payload that
    /// does not parse is dead-lettered and returned as `MalformedPayload`.
    /// Only a failure to persist the final state propagates.
    pub async fn dequeue_and_execute(
        &self,
        category: OperationCategory,
        payload: &str,
    ) -> Result<JobOutcome> {
        let mut job = match parse_payload(payload) {
            Ok(job) => job,
            Err(reason) => {
                self.dead_letter(category, payload, &reason).await?;
                return Err(Error::MalformedPayload(reason));
            }
        };

        let channel = self.channels.get(category);
        let outcome = match self.start_and_run(category, channel, &mut job).await {
            Ok(Some(finished)) => return Ok(JobOutcome::AlreadyFinished(finished)),
            Ok(None) => {
                job.transition(JobStatus::Complete)?;
                JobOutcome::Completed
            }
            Err(e) => {
                let details = e.to_string();
                error!(
                    category = category.as_str(),
                    tracking_id = %job.tracking_id,
                    error = %details,
                    "Job failed"
                );
                job.transition(JobStatus::ErrorProcessing)?;
                job.error_details = Some(details.clone());
                JobOutcome::Failed(details)
            }
        };

        channel.status.put(&job).await?;
        metrics::counter!(
            "tabulon_jobs_finished_total",
            "category" => category.as_str(),
            "status" => job.status.as_str()
        )
        .increment(1);
        info!(
            category = category.as_str(),
            tracking_id = %job.tracking_id,
            status = %job.status,
            "Job finished"
        );
        Ok(outcome)
    }

    /// Mark `job` running and execute it.
    ///
    /// Returns the stored terminal status instead when the job already finished.
    async fn start_and_run(
        &self,
        category: OperationCategory,
        channel: &JobChannel,
        job: &mut ProcessingJob,
    ) -> Result<Option<JobStatus>> {
        let key = job.key();
        if let Some(existing) = channel.status.get(&key).await? {
            if existing.status.is_terminal() {
                warn!(
                    category = category.as_str(),
                    key = %key,
                    status = %existing.status,
                    "Job already finished, skipping redelivery"
                );
                return Ok(Some(existing.status));
            }
        }

        job.transition(JobStatus::Running)?;
        channel.status.put(job).await?;
        info!(
            category = category.as_str(),
            tracking_id = %job.tracking_id,
            database = %job.database,
            table = ?job.table,
            partition = ?job.partition,
            "Job running"
        );

        self.execute(job).await?;
        Ok(None)
    }

    /// Dispatch by the shape of the job: partition, table list, table, or model.
    async fn execute(&self, job: &ProcessingJob) -> Result<()> {
        let manager = if job.database.trim().is_empty() {
            self.manager.clone()
        } else {
            self.manager.for_database(&job.database)
        };
        let scope = RefreshScope::Full;

        match (job.table.as_deref(), job.partition.as_deref()) {
            (Some(table), Some(partition)) => {
                manager.process_partition(table, partition, scope).await?;
            }
            (Some(tables), None) if tables.contains(',') => {
                let names: Vec<String> = tables.split(',').map(str::to_string).collect();
                manager.process_tables(&names, scope).await?;
            }
            (Some(table), None) => {
                manager.process_table(table, scope).await?;
            }
            (None, Some(partition)) => {
                return Err(Error::MalformedPayload(format!(
                    "partition '{}' without a table",
                    partition
                )));
            }
            (None, None) => manager.process_model_full().await?,
        }
        Ok(())
    }

    async fn dead_letter(
        &self,
        category: OperationCategory,
        payload: &str,
        reason: &str,
    ) -> Result<()> {
        error!(
            category = category.as_str(),
            reason,
            "Undeliverable job payload, moving to dead letters"
        );
        metrics::counter!(
            "tabulon_jobs_dead_lettered_total",
            "category" => category.as_str()
        )
        .increment(1);
        self.dead_letters
            .dead_letter(DeadLetter {
                category,
                payload: payload.to_string(),
                reason: reason.to_string(),
                at: self.clock.now(),
            })
            .await
    }

    // ── Status ──────────────────────────────────────────────────────

    /// Look up a job by category name and key.
    ///
    /// Unknown categories give `UnknownOperation`, missing records `NotFound`.
    pub async fn query_status(
        &self,
        operation: &str,
        partition_key: &str,
        tracking_id: &str,
    ) -> Result<ProcessingTrackingInfo> {
        let category: OperationCategory = operation.parse()?;
        let key = JobKey::new(partition_key, tracking_id);
        match self.channels.get(category).status.get(&key).await? {
            Some(job) => Ok(job.tracking_info()),
            None => Err(Error::NotFound(format!(
                "{} job {}",
                category.as_str(),
                key
            ))),
        }
    }
}

/// Parse a payload into a freshly queued job, or explain why it cannot be.
fn parse_payload(payload: &str) -> std::result::Result<ProcessingJob, String> {
    let job: ProcessingJob = serde_json::from_str(payload).map_err(|e| e.to_string())?;
    if job.status != JobStatus::Queued {
        return Err(format!(
            "job {} carries status '{}', expected 'Queued'",
            job.tracking_id, job.status
        ));
    }
    let has_table = job.table.as_deref().is_some_and(|t| !t.trim().is_empty());
    if job.partition.is_some() && !has_table {
        return Err(format!(
            "job {} names partition {:?} without a table",
            job.tracking_id, job.partition
        ));
    }
    Ok(job)
}
