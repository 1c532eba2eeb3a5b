//! Error types for Tabulon

use std::fmt;

/// Result type alias for Tabulon operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for Tabulon
#[derive(Debug)]
pub enum Error {
    /// Object store errors
    ObjectStore(object_store::Error),
    /// IO errors
    Io(std::io::Error),
    /// Serialization errors
    Serialization(String),
    /// Configuration errors
    Config(String),
    /// Engine rejected or failed an operation
    Engine(String),
    /// Commit failed in a way that may succeed on retry (e.g. a concurrent writer)
    TransientCommit(String),
    /// Commit retries exhausted; `source` is the last observed failure
    SaveExhausted { attempts: u32, source: Box<Error> },
    /// Database, table, partition, or tracking record not found
    NotFound(String),
    /// Queue payload could not be parsed into a job
    MalformedPayload(String),
    /// No source query template registered for the table
    UnknownTableQuery(String),
    /// Status category is not one of model, table, partition
    UnknownOperation(String),
    /// Job status transition is not allowed
    InvalidTransition { from: String, to: String },
    /// Queue errors
    Queue(String),
    /// Status store errors
    StatusStore(String),
    /// Operation aborted by cancellation at an attempt boundary
    Cancelled,
    /// Internal error
    Internal(String),
}

impl Error {
    /// Whether the retry loop should attempt the operation again.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::TransientCommit(_) | Error::Engine(_) | Error::Io(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }

    /// Innermost error, looking through `SaveExhausted`.
    pub fn root(&self) -> &Error {
        match self {
            Error::SaveExhausted { source, .. } => source.root(),
            other => other,
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::ObjectStore(e) => Some(e),
            Error::Io(e) => Some(e),
            Error::SaveExhausted { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::ObjectStore(e) => write!(f, "Object store error: {}", e),
            Error::Io(e) => write!(f, "IO error: {}", e),
            Error::Serialization(msg) => write!(f, "Serialization error: {}", msg),
            Error::Config(msg) => write!(f, "Configuration error: {}", msg),
            Error::Engine(msg) => write!(f, "Engine error: {}", msg),
            Error::TransientCommit(msg) => write!(f, "Transient commit failure: {}", msg),
            Error::SaveExhausted { attempts, source } => {
                write!(f, "Save failed after {} attempts: {}", attempts, source)
            }
            Error::NotFound(what) => write!(f, "Not found: {}", what),
            Error::MalformedPayload(msg) => write!(f, "Malformed job payload: {}", msg),
            Error::UnknownTableQuery(table) => {
                write!(f, "No source query template registered for table '{}'", table)
            }
            Error::UnknownOperation(op) => write!(f, "Unknown operation - {}", op),
            Error::InvalidTransition { from, to } => {
                write!(f, "Invalid job status transition: {} -> {}", from, to)
            }
            Error::Queue(msg) => write!(f, "Queue error: {}", msg),
            Error::StatusStore(msg) => write!(f, "Status store error: {}", msg),
            Error::Cancelled => write!(f, "Operation cancelled"),
            Error::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl From<object_store::Error> for Error {
    fn from(e: object_store::Error) -> Self {
        Error::ObjectStore(e)
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
