//! Generated source tree
//!
//! Every node above `depth` is a folder with `width` children; nodes at
//! `depth` are leaves carrying a small text payload. Used for benchmarks and
//! dry runs.

use super::{Metadata, NodeRef, Payload, SourceNode};
use crate::error::{SourceError, SourceResult};
use std::sync::Arc;

/// Default leaf payload size in bytes
const DEFAULT_LEAF_SIZE: usize = 256;

#[derive(Debug, Clone)]
struct Shape {
    depth: u32,
    width: usize,
    leaf_size: usize,
}

/// A node of a generated tree
#[derive(Debug, Clone)]
pub struct SyntheticNode {
    name: String,
    path: String,
    level: u32,
    shape: Arc<Shape>,
}

impl SyntheticNode {
    /// Create the root of a tree `depth` levels deep, `width` children wide
    pub fn root(depth: u32, width: usize) -> Self {
        Self {
            name: "root".into(),
            path: "/root".into(),
            level: 0,
            shape: Arc::new(Shape {
                depth,
                width,
                leaf_size: DEFAULT_LEAF_SIZE,
            }),
        }
    }

    /// Set the payload size of generated leaves
    pub fn with_leaf_size(self, leaf_size: usize) -> Self {
        let shape = Shape {
            leaf_size,
            ..(*self.shape).clone()
        };
        Self {
            shape: Arc::new(shape),
            ..self
        }
    }

    /// Number of leaves the tree will produce
    pub fn leaf_count(&self) -> u64 {
        (self.shape.width as u64).pow(self.shape.depth - self.level)
    }
}

impl SourceNode for SyntheticNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn path(&self) -> &str {
        &self.path
    }

    fn is_leaf(&self) -> bool {
        self.level >= self.shape.depth
    }

    fn children(&self) -> SourceResult<Vec<NodeRef>> {
        if self.is_leaf() {
            return Ok(Vec::new());
        }
        let level = self.level + 1;
        let leaf = level >= self.shape.depth;
        Ok((0..self.shape.width)
            .map(|i| {
                let name = if leaf {
                    format!("doc-{:05}.txt", i)
                } else {
                    format!("folder-{:03}", i)
                };
                Arc::new(SyntheticNode {
                    path: format!("{}/{}", self.path, name),
                    name,
                    level,
                    shape: Arc::clone(&self.shape),
                }) as NodeRef
            })
            .collect())
    }

    fn payload(&self) -> SourceResult<Payload> {
        if !self.is_leaf() {
            return Err(SourceError::NotALeaf {
                path: self.path.clone(),
            });
        }
        let line = format!("synthetic content of {}\n", self.path);
        let content: Vec<u8> = line
            .bytes()
            .cycle()
            .take(self.shape.leaf_size.max(line.len()))
            .collect();
        let mut metadata = Metadata::default();
        metadata.insert("generator", "synthetic");
        Ok(Payload { content, metadata })
    }
}
