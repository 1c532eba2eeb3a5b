//! Job status stores
//!
//! A status store keeps the latest record of each job, keyed by
//! `(PartitionKey, RowKey)`. Writes are upserts.

use super::{JobKey, ProcessingJob};
use crate::{Error, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use object_store::path::Path;
use object_store::{ObjectStore, PutMode, PutOptions, PutPayload};
use std::sync::Arc;
use tracing::debug;

/// Keyed store of job records
#[async_trait]
pub trait StatusStore: Send + Sync {
    /// Insert or replace the record for the job's key.
    async fn put(&self, job: &ProcessingJob) -> Result<()>;

    async fn get(&self, key: &JobKey) -> Result<Option<ProcessingJob>>;
}

#[derive(Debug, Default)]
pub struct InMemoryStatusStore {
    records: DashMap<JobKey, ProcessingJob>,
}

impl InMemoryStatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl StatusStore for InMemoryStatusStore {
    async fn put(&self, job: &ProcessingJob) -> Result<()> {
        self.records.insert(job.key(), job.clone());
        Ok(())
    }

    async fn get(&self, key: &JobKey) -> Result<Option<ProcessingJob>> {
        Ok(self.records.get(key).map(|r| r.value().clone()))
    }
}

/// Status records as JSON objects at `{prefix}{category}/{partition_key}/{row_key}.json`
pub struct ObjectStoreStatusStore {
    object_store: Arc<dyn ObjectStore>,
    prefix: String,
}

impl ObjectStoreStatusStore {
    /// `prefix` should already include the category, e.g. `status/partition/`.
    pub fn new(object_store: Arc<dyn ObjectStore>, prefix: impl Into<String>) -> Self {
        Self {
            object_store,
            prefix: prefix.into(),
        }
    }

    fn record_path(&self, key: &JobKey) -> Path {
        Path::from(format!(
            "{}{}/{}.json",
            self.prefix, key.partition_key, key.row_key
        ))
    }
}

#[async_trait]
impl StatusStore for ObjectStoreStatusStore {
    async fn put(&self, job: &ProcessingJob) -> Result<()> {
        let path = self.record_path(&job.key());
        let bytes = serde_json::to_vec(job)?;
        let opts = PutOptions {
            mode: PutMode::Overwrite,
            ..Default::default()
        };
        self.object_store
            .put_opts(&path, PutPayload::from(bytes), opts)
            .await
            .map_err(|e| Error::StatusStore(format!("Failed to write {}: {}", path, e)))?;
        debug!(%path, status = %job.status, "Persisted job status");
        Ok(())
    }

    async fn get(&self, key: &JobKey) -> Result<Option<ProcessingJob>> {
        let path = self.record_path(key);
        match self.object_store.get(&path).await {
            Ok(result) => {
                let bytes = result.bytes().await?;
                let job = serde_json::from_slice(&bytes).map_err(|e| {
                    Error::StatusStore(format!("Corrupt status record {}: {}", path, e))
                })?;
                Ok(Some(job))
            }
            Err(object_store::Error::NotFound { .. }) => Ok(None),
            Err(e) => Err(Error::StatusStore(format!(
                "Failed to read {}: {}",
                path, e
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::JobStatus;
    use chrono::Utc;
    use object_store::memory::InMemory;

    fn job() -> ProcessingJob {
        ProcessingJob::queued(Utc::now(), "Sales", Some("Orders"), None)
    }

    #[tokio::test]
    async fn test_in_memory_upsert() {
        let store = InMemoryStatusStore::new();
        let mut job = job();
        store.put(&job).await.unwrap();
        job.transition(JobStatus::Running).unwrap();
        store.put(&job).await.unwrap();

        assert_eq!(store.len(), 1);
        let loaded = store.get(&job.key()).await.unwrap().unwrap();
        assert_eq!(loaded.status, JobStatus::Running);
    }

    #[tokio::test]
    async fn test_object_store_layout_and_roundtrip() {
        let object_store = Arc::new(InMemory::new());
        let store = ObjectStoreStatusStore::new(object_store.clone(), "status/table/");
        let job = job();
        store.put(&job).await.unwrap();

        let key = job.key();
        let path = Path::from(format!(
            "status/table/{}/{}.json",
            key.partition_key, key.row_key
        ));
        assert!(object_store.head(&path).await.is_ok());
        assert_eq!(store.get(&key).await.unwrap(), Some(job));
    }

    #[tokio::test]
    async fn test_object_store_missing_record() {
        let store = ObjectStoreStatusStore::new(Arc::new(InMemory::new()), "status/model/");
        let key = JobKey::new("2024-01-01", "nope");
        assert!(store.get(&key).await.unwrap().is_none());
    }
}
