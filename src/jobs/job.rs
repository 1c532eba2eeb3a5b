//! Job records and their status state machine

use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Job status.
///
/// `Queued -> Running -> {Complete, ErrorProcessing}`; terminal states are final.
/// A job that cannot be started moves `Queued -> ErrorProcessing` directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobStatus {
    Queued,
    Running,
    Complete,
    #[serde(rename = "Error Processing", alias = "ErrorProcessing")]
    ErrorProcessing,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "Queued",
            Self::Running => "Running",
            Self::Complete => "Complete",
            Self::ErrorProcessing => "Error Processing",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::ErrorProcessing)
    }

    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (Self::Queued, Self::Running)
                | (Self::Running, Self::Complete)
                | (Self::Queued, Self::ErrorProcessing)
                | (Self::Running, Self::ErrorProcessing)
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of processing a job performs. Each kind has its own queue and status store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationCategory {
    Model,
    Table,
    Partition,
}

impl OperationCategory {
    pub const ALL: [OperationCategory; 3] = [Self::Model, Self::Table, Self::Partition];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Model => "model",
            Self::Table => "table",
            Self::Partition => "partition",
        }
    }
}

impl std::str::FromStr for OperationCategory {
    type Err = Error;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "model" => Ok(Self::Model),
            "table" => Ok(Self::Table),
            "partition" => Ok(Self::Partition),
            _ => Err(Error::UnknownOperation(value.to_string())),
        }
    }
}

/// Status-store key of a job
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobKey {
    /// Enqueue date bucket, `yyyy-MM-dd`
    pub partition_key: String,
    /// Tracking id
    pub row_key: String,
}

impl JobKey {
    pub fn new(partition_key: impl Into<String>, row_key: impl Into<String>) -> Self {
        Self {
            partition_key: partition_key.into(),
            row_key: row_key.into(),
        }
    }
}

impl std::fmt::Display for JobKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.partition_key, self.row_key)
    }
}

/// One asynchronously tracked processing request.
///
/// Serialized identically to the queue payload and the status record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ProcessingJob {
    pub tracking_id: Uuid,
    #[serde(rename = "EnqueuedDateTime")]
    pub enqueued_at: DateTime<Utc>,
    #[serde(default)]
    pub database: String,
    /// A table, or a comma separated list of tables
    #[serde(rename = "Tables", default, skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partition: Option<String>,
    pub target_date: DateTime<Utc>,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_details: Option<String>,
}

impl ProcessingJob {
    /// New `Queued` job enqueued at `now`.
    pub fn queued(
        now: DateTime<Utc>,
        database: &str,
        table: Option<&str>,
        partition: Option<&str>,
    ) -> Self {
        Self {
            tracking_id: Uuid::new_v4(),
            enqueued_at: now,
            database: database.to_string(),
            table: table.map(str::to_string),
            partition: partition.map(str::to_string),
            target_date: now,
            status: JobStatus::Queued,
            error_details: None,
        }
    }

    /// `(PartitionKey, RowKey)` identifying this job's status record.
    pub fn key(&self) -> JobKey {
        JobKey::new(
            self.enqueued_at.format("%Y-%m-%d").to_string(),
            self.tracking_id.to_string(),
        )
    }

    /// Move to `next`, rejecting backward moves and moves out of a terminal state.
    pub fn transition(&mut self, next: JobStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(Error::InvalidTransition {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        Ok(())
    }

    pub fn tracking_info(&self) -> ProcessingTrackingInfo {
        let key = self.key();
        ProcessingTrackingInfo {
            launch_date_key: key.partition_key,
            tracking_id: key.row_key,
            status: self.status,
        }
    }
}

/// Externally visible projection of a job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ProcessingTrackingInfo {
    pub launch_date_key: String,
    pub tracking_id: String,
    pub status: JobStatus,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn job() -> ProcessingJob {
        let now = Utc.with_ymd_and_hms(2024, 1, 15, 8, 30, 0).unwrap();
        ProcessingJob::queued(now, "Sales", Some("Orders"), Some("202401"))
    }

    #[test]
    fn test_key_uses_enqueue_date_bucket() {
        let job = job();
        let key = job.key();
        assert_eq!(key.partition_key, "2024-01-15");
        assert_eq!(key.row_key, job.tracking_id.to_string());
    }

    #[test]
    fn test_forward_transitions() {
        let mut job = job();
        job.transition(JobStatus::Running).unwrap();
        job.transition(JobStatus::Complete).unwrap();
        assert_eq!(job.status, JobStatus::Complete);
    }

    #[test]
    fn test_terminal_states_are_final() {
        for terminal in [JobStatus::Complete, JobStatus::ErrorProcessing] {
            let mut job = job();
            job.transition(JobStatus::Running).unwrap();
            job.transition(terminal).unwrap();
            for next in [
                JobStatus::Queued,
                JobStatus::Running,
                JobStatus::Complete,
                JobStatus::ErrorProcessing,
            ] {
                assert!(job.transition(next).is_err(), "{} -> {}", terminal, next);
            }
            assert_eq!(job.status, terminal);
        }
    }

    #[test]
    fn test_queued_cannot_skip_running() {
        let mut job = job();
        let err = job.transition(JobStatus::Complete).unwrap_err();
        assert!(matches!(err, Error::InvalidTransition { .. }));
        assert_eq!(job.status, JobStatus::Queued);
    }

    #[test]
    fn test_queued_job_can_fail_before_starting() {
        let mut job = job();
        job.transition(JobStatus::ErrorProcessing).unwrap();
        assert!(job.status.is_terminal());
    }

    #[test]
    fn test_wire_format() {
        let mut job = job();
        job.status = JobStatus::ErrorProcessing;
        job.error_details = Some("boom".to_string());
        let value = serde_json::to_value(&job).unwrap();
        assert_eq!(value["Status"], "Error Processing");
        assert_eq!(value["Tables"], "Orders");
        assert_eq!(value["Partition"], "202401");
        assert_eq!(value["ErrorDetails"], "boom");
        assert!(value.get("EnqueuedDateTime").is_some());

        let parsed: ProcessingJob = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, job);
    }

    #[test]
    fn test_status_accepts_enum_spelling() {
        let status: JobStatus = serde_json::from_str(r#""ErrorProcessing""#).unwrap();
        assert_eq!(status, JobStatus::ErrorProcessing);
    }

    #[test]
    fn test_tracking_info_projection() {
        let job = job();
        let info = job.tracking_info();
        assert_eq!(info.launch_date_key, "2024-01-15");
        assert_eq!(info.tracking_id, job.tracking_id.to_string());
        assert_eq!(info.status, JobStatus::Queued);

        let value = serde_json::to_value(&info).unwrap();
        assert_eq!(value["Status"], "Queued");
        assert!(value.get("LaunchDateKey").is_some());
    }

    #[test]
    fn test_unknown_category() {
        assert_eq!("Partition".parse::<OperationCategory>().unwrap(), OperationCategory::Partition);
        let err = "cube".parse::<OperationCategory>().unwrap_err();
        assert!(matches!(err, Error::UnknownOperation(op) if op == "cube"));
    }
}
