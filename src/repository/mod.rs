//! Target repositories
//!
//! The importer writes documents through the `DocumentSink` trait. A sink
//! hands out sessions; each import task owns exactly one session and uses it
//! for every document it creates, committing at batch boundaries.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────┐  ┌───────────────┐        ┌───────────────┐
//! │  ImportTask 1 │  │  ImportTask 2 │  ...   │  ImportTask N │
//! │   session 1   │  │   session 2   │        │   session N   │
//! └───────┬───────┘  └───────┬───────┘        └───────┬───────┘
//!         │ create_container / create_leaf / commit   │
//!         ▼                  ▼                        ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │             DocumentSink (SQLite file or memory)            │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod memory;
pub mod schema;
pub mod sqlite;

pub use memory::{MemoryRepository, StoredDocument};
pub use sqlite::SqliteRepository;

use crate::error::SinkResult;
use crate::source::SourceNode;
use serde::Serialize;

/// Identifier of a document inside a repository
pub type DocId = i64;

/// Handle to a location that can hold child documents
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetContainer {
    /// Repository id of the container document
    pub id: DocId,

    /// Repository path of the container ("/" for the root)
    pub path: String,
}

impl TargetContainer {
    pub fn new(id: DocId, path: impl Into<String>) -> Self {
        Self {
            id,
            path: path.into(),
        }
    }

    /// Repository path of a child named `name`
    pub fn child_path(&self, name: &str) -> String {
        if self.path.ends_with('/') {
            format!("{}{}", self.path, name)
        } else {
            format!("{}/{}", self.path, name)
        }
    }
}

/// Kind of a stored document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DocKind {
    /// Folderish document created for an internal source node
    Folder,
    /// Content document created for a leaf
    File,
}

impl DocKind {
    pub fn as_db_int(&self) -> i64 {
        match self {
            DocKind::Folder => 1,
            DocKind::File => 0,
        }
    }

    pub fn from_db_int(value: i64) -> Self {
        if value == 1 {
            DocKind::Folder
        } else {
            DocKind::File
        }
    }
}

/// Factory of repository sessions
pub trait DocumentSink: Send + Sync {
    /// Open a new session; sessions are never shared between threads
    fn open_session(&self) -> SinkResult<Box<dyn SinkSession>>;

    /// Short description for logs and summaries
    fn describe(&self) -> String;
}

/// A unit of work against the repository
///
/// Documents created through a session become durable on `commit`.
pub trait SinkSession: Send {
    /// Look up an existing container by repository path
    fn resolve(&mut self, path: &str) -> SinkResult<Option<TargetContainer>>;

    /// Create the folderish document for an internal node
    fn create_container(
        &mut self,
        parent: &TargetContainer,
        node: &dyn SourceNode,
    ) -> SinkResult<TargetContainer>;

    /// Create the document for a leaf node
    fn create_leaf(&mut self, parent: &TargetContainer, node: &dyn SourceNode) -> SinkResult<()>;

    /// Make everything created since the last commit durable
    fn commit(&mut self) -> SinkResult<()>;

    /// Release the session; uncommitted work is committed first
    fn close(self: Box<Self>) -> SinkResult<()>;
}
