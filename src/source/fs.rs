//! Local filesystem source
//!
//! Directories are internal nodes, regular files are leaves. Children are
//! sorted by name so traversal order is stable across runs. Symbolic links to
//! files are followed; links to directories are not.
//!
//! Metadata sidecars: a file `report.pdf` may be accompanied by
//! `report.properties`. Sidecars are never imported as documents; the path of
//! the sidecar is attached to the leaf metadata under `sidecar`. The sidecar
//! content itself is left to the repository to interpret.

use super::{Metadata, NodeRef, Payload, SourceNode};
use crate::error::{SourceError, SourceResult};
use chrono::{DateTime, Utc};
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Suffix of metadata sidecar files
pub const PROPERTY_FILE_SUFFIX: &str = ".properties";

/// Rules deciding which filesystem entries are part of the source
#[derive(Debug, Default)]
pub struct SourceFilter {
    /// Paths matching any of these are skipped
    exclude: Vec<Regex>,
}

impl SourceFilter {
    pub fn new(exclude: Vec<Regex>) -> Self {
        Self { exclude }
    }

    /// Check if an entry should be left out of the tree
    pub fn is_excluded(&self, path: &Path) -> bool {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy())
            .unwrap_or_default();
        if name.contains(PROPERTY_FILE_SUFFIX) {
            return true;
        }
        let display = path.to_string_lossy();
        self.exclude.iter().any(|re| re.is_match(&display))
    }
}

/// A file or directory on the local filesystem
#[derive(Debug, Clone)]
pub struct FileSourceNode {
    path: PathBuf,
    display: String,
    name: String,
    is_dir: bool,
    filter: Arc<SourceFilter>,
}

impl FileSourceNode {
    /// Open the root of a filesystem source
    pub fn open(path: impl AsRef<Path>, filter: SourceFilter) -> SourceResult<Self> {
        let path = path.as_ref();
        let meta = fs::metadata(path).map_err(|_| SourceError::NotFound {
            path: path.display().to_string(),
        })?;
        Ok(Self::with_filter(path.to_path_buf(), meta.is_dir(), Arc::new(filter)))
    }

    fn with_filter(path: PathBuf, is_dir: bool, filter: Arc<SourceFilter>) -> Self {
        let display = path.display().to_string();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| display.clone());
        Self {
            path,
            display,
            name,
            is_dir,
            filter,
        }
    }

    /// Path of the sidecar metadata file for this leaf, if one exists
    pub fn sidecar_path(&self) -> Option<PathBuf> {
        let stem = self.path.file_stem()?.to_string_lossy();
        let parent = self.path.parent()?;
        let candidate = parent.join(format!("{}{}", stem, PROPERTY_FILE_SUFFIX));
        candidate.is_file().then_some(candidate)
    }
}

impl SourceNode for FileSourceNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn path(&self) -> &str {
        &self.display
    }

    fn is_leaf(&self) -> bool {
        !self.is_dir
    }

    fn children(&self) -> SourceResult<Vec<NodeRef>> {
        if !self.is_dir {
            return Ok(Vec::new());
        }

        let list_err = |e: std::io::Error| SourceError::ListFailed {
            path: self.display.clone(),
            reason: e.to_string(),
        };

        let mut entries = Vec::new();
        for entry in fs::read_dir(&self.path).map_err(list_err)? {
            let entry = entry.map_err(list_err)?;
            let path = entry.path();
            if self.filter.is_excluded(&path) {
                continue;
            }
            let Ok(file_type) = entry.file_type() else {
                continue;
            };
            let is_dir = if file_type.is_symlink() {
                // Linked files are imported; linked directories may loop back
                // into an ancestor and dangling links have nothing to read
                match fs::metadata(&path) {
                    Ok(meta) if meta.is_file() => false,
                    _ => continue,
                }
            } else if file_type.is_dir() {
                true
            } else if file_type.is_file() {
                false
            } else {
                continue;
            };
            entries.push((path, is_dir));
        }
        entries.sort_by(|a, b| a.0.cmp(&b.0));

        Ok(entries
            .into_iter()
            .map(|(path, is_dir)| {
                Arc::new(Self::with_filter(path, is_dir, Arc::clone(&self.filter))) as NodeRef
            })
            .collect())
    }

    fn payload(&self) -> SourceResult<Payload> {
        if self.is_dir {
            return Err(SourceError::NotALeaf {
                path: self.display.clone(),
            });
        }
        let read_err = |e: std::io::Error| SourceError::ReadFailed {
            path: self.display.clone(),
            reason: e.to_string(),
        };

        let content = fs::read(&self.path).map_err(read_err)?;
        let mut metadata = Metadata::default();
        metadata.insert("size", content.len().to_string());
        if let Ok(modified) = fs::metadata(&self.path).and_then(|m| m.modified()) {
            let modified: DateTime<Utc> = modified.into();
            metadata.insert("modified", modified.to_rfc3339());
        }
        if let Some(sidecar) = self.sidecar_path() {
            metadata.insert("sidecar", sidecar.display().to_string());
        }

        Ok(Payload { content, metadata })
    }
}
