//! Source trees
//!
//! A source is a lazy, finite tree of nodes. Internal nodes produce their
//! children on demand, leaves produce a payload (content plus metadata).
//! The importer only ever talks to the `SourceNode` trait.
//!
//! Bundled implementations:
//! - `FileSourceNode`: a local directory tree
//! - `SyntheticNode`: a generated tree of fixed depth and width

pub mod fs;
pub mod synthetic;

pub use fs::{FileSourceNode, SourceFilter};
pub use synthetic::SyntheticNode;

use crate::error::SourceResult;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Shared handle to a source node
pub type NodeRef = Arc<dyn SourceNode>;

/// One element of a source tree
pub trait SourceNode: Send + Sync {
    /// Name of the node (last path component)
    fn name(&self) -> &str;

    /// Full source path, used for logging and error reports
    fn path(&self) -> &str;

    /// Whether this node is a leaf content item
    fn is_leaf(&self) -> bool;

    /// Ordered children of an internal node
    ///
    /// The order must be stable for the lifetime of one import run.
    fn children(&self) -> SourceResult<Vec<NodeRef>>;

    /// Content and metadata of a leaf
    fn payload(&self) -> SourceResult<Payload>;
}

impl fmt::Debug for dyn SourceNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceNode")
            .field("path", &self.path())
            .field("leaf", &self.is_leaf())
            .finish()
    }
}

/// Content plus metadata of a leaf node
#[derive(Debug, Clone, Default)]
pub struct Payload {
    /// Raw content
    pub content: Vec<u8>,

    /// Free-form metadata attached by the source
    pub metadata: Metadata,
}

impl Payload {
    /// Create a payload without metadata
    pub fn new(content: Vec<u8>) -> Self {
        Self {
            content,
            metadata: Metadata::default(),
        }
    }

    /// Content length in bytes
    pub fn len(&self) -> usize {
        self.content.len()
    }

    /// Whether the content is empty
    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }
}

/// Ordered string metadata, serialized as a JSON object by repositories
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Metadata(BTreeMap<String, String>);

impl Metadata {
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Count the leaves of a tree (walks the whole tree)
pub fn count_leaves(node: &dyn SourceNode) -> SourceResult<u64> {
    if node.is_leaf() {
        return Ok(1);
    }
    let mut total = 0;
    for child in node.children()? {
        total += count_leaves(child.as_ref())?;
    }
    Ok(total)
}
