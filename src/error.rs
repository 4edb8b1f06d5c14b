//! Error types for tree-importer
//!
//! This module defines the error hierarchy of an import run:
//! - Setup errors that abort a run before any task is scheduled
//! - Node creation errors, recovered at the child boundary
//! - Task execution errors, recorded at the scheduler boundary
//! - Filter, configuration, source and repository errors
//!
//! Only setup errors escape `Importer::run`. Everything else is logged,
//! counted and reported in the final `ImportReport`.

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for an import run
#[derive(Error, Debug)]
pub enum ImportError {
    /// Fatal setup errors (target missing, login failure, ...)
    #[error("Setup error: {0}")]
    Setup(#[from] SetupError),

    /// A before-import filter refused the run
    #[error("Filter error: {0}")]
    Filter(#[from] FilterError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Repository errors outside of a single node
    #[error("Repository error: {0}")]
    Sink(#[from] SinkError),

    /// Source tree errors outside of a single task
    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    /// I/O errors (perf log, files)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ImportError {
    /// Returns true if this error ends the run in the `Failed` state
    pub fn is_fatal(&self) -> bool {
        matches!(self, ImportError::Setup(_) | ImportError::Config(_))
    }
}

/// Errors that prevent an import from starting
#[derive(Error, Debug)]
pub enum SetupError {
    /// Target container does not exist in the repository
    #[error("Target container '{path}' not found")]
    TargetNotFound { path: String },

    /// Authentication failed
    #[error("Authentication failed: {reason}")]
    Authentication { reason: String },

    /// Could not open a repository session for the orchestrator
    #[error("Failed to open repository session: {0}")]
    Session(#[source] SinkError),

    /// Worker pool could not be started
    #[error("Failed to start worker {id}: {reason}")]
    WorkerSpawn { id: usize, reason: String },
}

/// Errors raised by a source tree
#[derive(Error, Debug, Clone)]
pub enum SourceError {
    /// Listing the children of a node failed
    #[error("Failed to list children of '{path}': {reason}")]
    ListFailed { path: String, reason: String },

    /// Reading a leaf payload failed
    #[error("Failed to read '{path}': {reason}")]
    ReadFailed { path: String, reason: String },

    /// Payload requested from a non-leaf node
    #[error("Node '{path}' is not a leaf")]
    NotALeaf { path: String },

    /// Source root does not exist
    #[error("Source not found: '{path}'")]
    NotFound { path: String },
}

/// Errors raised by a document repository
#[derive(Error, Debug)]
pub enum SinkError {
    /// SQLite error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Metadata serialization failed
    #[error("Metadata serialization failed: {0}")]
    Metadata(#[from] serde_json::Error),

    /// Failed to create the repository file
    #[error("Failed to create repository at '{path}': {reason}")]
    CreateFailed { path: PathBuf, reason: String },

    /// Document creation was rejected
    #[error("Failed to create document '{path}': {reason}")]
    Rejected { path: String, reason: String },

    /// Payload could not be read from the source
    #[error("Source payload unavailable: {0}")]
    Payload(#[from] SourceError),

    /// Commit failed
    #[error("Commit failed: {0}")]
    Commit(String),

    /// Session already closed
    #[error("Session is closed")]
    Closed,
}

/// Failure to create the document for a single source node
#[derive(Error, Debug)]
#[error("Failed to import '{path}': {source}")]
pub struct NodeError {
    /// Source path of the failed node
    pub path: String,

    /// Underlying repository error
    #[source]
    pub source: SinkError,
}

/// Failure that escaped a whole import task
#[derive(Error, Debug)]
pub enum TaskError {
    /// Repository session could not be opened or committed
    #[error("Task {task} repository failure: {source}")]
    Session { task: u64, source: SinkError },

    /// The source tree failed mid-walk
    #[error("Task {task} source failure: {source}")]
    Source { task: u64, source: SourceError },

    /// The task panicked
    #[error("Task {task} panicked: {message}")]
    Panicked { task: u64, message: String },
}

impl TaskError {
    /// Id of the task the error is recorded against
    pub fn task_id(&self) -> u64 {
        match self {
            TaskError::Session { task, .. }
            | TaskError::Source { task, .. }
            | TaskError::Panicked { task, .. } => *task,
        }
    }
}

/// Errors raised by import filters
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FilterError {
    /// Filter refused to let the import start
    #[error("Filter '{filter}' rejected the import: {reason}")]
    Rejected { filter: String, reason: String },

    /// Filter failed while cleaning up
    #[error("Filter '{filter}' failed: {reason}")]
    Failed { filter: String, reason: String },
}

/// Configuration and CLI errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Invalid worker count
    #[error("Invalid worker count {count}: must be between 1 and {max}")]
    InvalidWorkerCount { count: usize, max: usize },

    /// Invalid queue capacity
    #[error("Invalid queue capacity {size}: must be at least {min}")]
    InvalidQueueCapacity { size: usize, min: usize },

    /// Invalid batch size
    #[error("Invalid batch size {size}: must be between {min} and {max}")]
    InvalidBatchSize { size: usize, min: usize, max: usize },

    /// Invalid target path
    #[error("Invalid target path '{path}': {reason}")]
    InvalidTargetPath { path: String, reason: String },

    /// Invalid exclude pattern
    #[error("Invalid exclude pattern '{pattern}': {reason}")]
    InvalidExcludePattern { pattern: String, reason: String },

    /// Invalid synthetic tree shape
    #[error("Invalid synthetic tree '{spec}': expected DEPTHxWIDTH")]
    InvalidSynthetic { spec: String },

    /// Source or output path error
    #[error("Invalid path '{path}': {reason}")]
    InvalidPath { path: PathBuf, reason: String },
}

/// Result type alias for ImportError
pub type Result<T> = std::result::Result<T, ImportError>;

/// Result type alias for SinkError
pub type SinkResult<T> = std::result::Result<T, SinkError>;

/// Result type alias for SourceError
pub type SourceResult<T> = std::result::Result<T, SourceError>;

/// Outcome of one import task, as seen by the scheduler
#[derive(Debug)]
pub enum TaskOutcome {
    /// Subtree walked to the end
    Completed {
        task: u64,
        documents: u64,
        node_errors: u64,
    },

    /// Stopped at a sibling boundary after `shutdown_now`
    Cancelled { task: u64, documents: u64 },

    /// Failed with an error that escaped the walk
    Failed(TaskError),
}

impl TaskOutcome {
    /// Returns true if this outcome represents a completed task
    pub fn is_success(&self) -> bool {
        matches!(self, TaskOutcome::Completed { .. })
    }

    /// Returns the task id associated with this outcome
    pub fn task_id(&self) -> u64 {
        match self {
            TaskOutcome::Completed { task, .. } => *task,
            TaskOutcome::Cancelled { task, .. } => *task,
            TaskOutcome::Failed(e) => e.task_id(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setup_error_is_fatal() {
        let err: ImportError = SetupError::TargetNotFound {
            path: "/missing".into(),
        }
        .into();
        assert!(err.is_fatal());

        let err: ImportError = FilterError::Rejected {
            filter: "f".into(),
            reason: "no".into(),
        }
        .into();
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_task_outcome_ids() {
        let ok = TaskOutcome::Completed {
            task: 3,
            documents: 10,
            node_errors: 0,
        };
        assert!(ok.is_success());
        assert_eq!(ok.task_id(), 3);

        let failed = TaskOutcome::Failed(TaskError::Panicked {
            task: 7,
            message: "boom".into(),
        });
        assert!(!failed.is_success());
        assert_eq!(failed.task_id(), 7);
    }

    #[test]
    fn test_node_error_display() {
        let err = NodeError {
            path: "/a/b.txt".into(),
            source: SinkError::Rejected {
                path: "/a/b.txt".into(),
                reason: "quota".into(),
            },
        };
        assert!(err.to_string().contains("/a/b.txt"));
    }
}
