//! Analytical engine collaborator
//!
//! The engine hosting the tabular databases is a remote service. Everything
//! the partition manager needs from it goes through two traits:
//!
//! - [`TabularEngine`] opens sessions from a connection string
//! - [`EngineSession`] loads a [`Model`], commits its pending changes, and
//!   disconnects
//!
//! [`InMemoryEngine`] implements both for development and tests.

mod memory;
mod model;

pub use memory::{InMemoryEngine, MergeRecord, RefreshRecord};
pub use model::{
    Model, ModelChange, Partition, PartitionSource, RefreshScope, RefreshTarget, Table,
};

use crate::Result;
use async_trait::async_trait;

/// Engine connection factory
#[async_trait]
pub trait TabularEngine: Send + Sync {
    /// Open a session. Every session must be released with `disconnect`.
    async fn connect(&self, connection_string: &str) -> Result<Box<dyn EngineSession>>;
}

/// A connected engine session
#[async_trait]
pub trait EngineSession: Send {
    /// Load the model of `database`. Fails with `NotFound` for unknown databases.
    async fn open_model(&mut self, database: &str) -> Result<Model>;

    /// Persist the model's pending changes. On success the model's pending
    /// list is cleared; on failure it is left intact so the commit can be retried.
    async fn save_changes(&mut self, model: &mut Model) -> Result<()>;

    async fn disconnect(&mut self) -> Result<()>;
}
