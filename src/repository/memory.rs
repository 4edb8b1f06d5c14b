//! In-memory document repository
//!
//! Documents live in a shared vector indexed by path; a session buffers its documents and
//! publishes them on commit. Supports failure injection by source node name,
//! which makes it the repository of choice for dry runs and tests.

use super::schema::ROOT_PATH;
use super::{DocId, DocKind, DocumentSink, SinkSession, TargetContainer};
use crate::error::{SinkError, SinkResult};
use crate::import::history::{JobHistory, JobSummary};
use crate::source::SourceNode;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

/// A committed document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredDocument {
    pub id: DocId,
    pub parent_id: DocId,
    pub name: String,
    pub path: String,
    pub kind: DocKind,
    pub size: u64,
}

#[derive(Debug, Default)]
struct Store {
    documents: Vec<StoredDocument>,
    paths: HashSet<String>,
}

impl Store {
    fn insert(&mut self, document: StoredDocument) {
        self.paths.insert(document.path.clone());
        self.documents.push(document);
    }
}

#[derive(Debug, Default)]
struct Inner {
    store: Mutex<Store>,
    next_id: AtomicI64,
    sessions_opened: AtomicU64,
    commit_sizes: Mutex<Vec<usize>>,
    fail_names: Mutex<HashSet<String>>,
    refuse_sessions: AtomicBool,
    jobs: Mutex<Vec<String>>,
}

/// Shared in-memory repository; clones share the same storage
#[derive(Debug, Clone)]
pub struct MemoryRepository {
    inner: Arc<Inner>,
}

impl Default for MemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRepository {
    pub fn new() -> Self {
        let inner = Inner::default();
        // Id 0 is the root container
        inner.next_id.store(1, Ordering::Relaxed);
        Self {
            inner: Arc::new(inner),
        }
    }

    /// Make every creation of a node with this name fail
    pub fn fail_on(&self, name: impl Into<String>) {
        self.inner.fail_names.lock().insert(name.into());
    }

    /// Make `open_session` fail from now on
    pub fn refuse_sessions(&self) {
        self.inner.refuse_sessions.store(true, Ordering::SeqCst);
    }

    /// Snapshot of committed documents
    pub fn documents(&self) -> Vec<StoredDocument> {
        self.inner.store.lock().documents.clone()
    }

    /// Number of committed documents of a kind
    pub fn count(&self, kind: DocKind) -> u64 {
        self.inner
            .store
            .lock()
            .documents
            .iter()
            .filter(|d| d.kind == kind)
            .count() as u64
    }

    /// Sizes of every non-empty commit, in commit order
    pub fn commit_sizes(&self) -> Vec<usize> {
        self.inner.commit_sizes.lock().clone()
    }

    /// Number of sessions opened so far
    pub fn sessions_opened(&self) -> u64 {
        self.inner.sessions_opened.load(Ordering::Relaxed)
    }

    /// Job history entries ("started:<job>" / "ended:<job>:<status>")
    pub fn jobs(&self) -> Vec<String> {
        self.inner.jobs.lock().clone()
    }

    /// Create every missing folder of `path` and return the deepest one
    pub fn ensure_container(&self, path: &str) -> TargetContainer {
        let mut store = self.inner.store.lock();
        let mut current = TargetContainer::new(0, ROOT_PATH);
        for name in path.split('/').filter(|s| !s.is_empty()) {
            let child_path = current.child_path(name);
            let existing = store
                .documents
                .iter()
                .find(|d| d.path == child_path && d.kind == DocKind::Folder)
                .map(|d| d.id);
            let id = match existing {
                Some(id) => id,
                None => {
                    let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
                    store.insert(StoredDocument {
                        id,
                        parent_id: current.id,
                        name: name.to_string(),
                        path: child_path.clone(),
                        kind: DocKind::Folder,
                        size: 0,
                    });
                    id
                }
            };
            current = TargetContainer::new(id, child_path);
        }
        current
    }

    /// Drop every committed document
    pub fn clear(&self) {
        let mut store = self.inner.store.lock();
        store.documents.clear();
        store.paths.clear();
        self.inner.commit_sizes.lock().clear();
    }
}

impl DocumentSink for MemoryRepository {
    fn open_session(&self) -> SinkResult<Box<dyn SinkSession>> {
        if self.inner.refuse_sessions.load(Ordering::SeqCst) {
            return Err(SinkError::Rejected {
                path: ROOT_PATH.into(),
                reason: "sessions refused".into(),
            });
        }
        self.inner.sessions_opened.fetch_add(1, Ordering::Relaxed);
        Ok(Box::new(MemorySession {
            inner: Arc::clone(&self.inner),
            pending: Vec::new(),
            pending_paths: HashSet::new(),
            closed: false,
        }))
    }

    fn describe(&self) -> String {
        "memory".into()
    }
}

impl JobHistory for MemoryRepository {
    fn log_job_started(&self, job: &str) -> SinkResult<()> {
        self.inner.jobs.lock().push(format!("started:{}", job));
        Ok(())
    }

    fn log_job_ended(&self, job: &str, summary: &JobSummary) -> SinkResult<()> {
        self.inner
            .jobs
            .lock()
            .push(format!("ended:{}:{}", job, summary.status));
        Ok(())
    }
}

struct MemorySession {
    inner: Arc<Inner>,
    pending: Vec<StoredDocument>,
    pending_paths: HashSet<String>,
    closed: bool,
}

impl MemorySession {
    fn check(&self, node: &dyn SourceNode, path: &str) -> SinkResult<()> {
        if self.closed {
            return Err(SinkError::Closed);
        }
        if self.inner.fail_names.lock().contains(node.name()) {
            return Err(SinkError::Rejected {
                path: path.to_string(),
                reason: "injected failure".into(),
            });
        }
        let exists = self.pending_paths.contains(path)
            || self.inner.store.lock().paths.contains(path);
        if exists {
            return Err(SinkError::Rejected {
                path: path.to_string(),
                reason: "document already exists".into(),
            });
        }
        Ok(())
    }

    fn push(&mut self, parent: &TargetContainer, node: &dyn SourceNode, kind: DocKind, size: u64) -> DocId {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let path = parent.child_path(node.name());
        self.pending_paths.insert(path.clone());
        self.pending.push(StoredDocument {
            id,
            parent_id: parent.id,
            name: node.name().to_string(),
            path,
            kind,
            size,
        });
        id
    }
}

impl SinkSession for MemorySession {
    fn resolve(&mut self, path: &str) -> SinkResult<Option<TargetContainer>> {
        if path == ROOT_PATH {
            return Ok(Some(TargetContainer::new(0, ROOT_PATH)));
        }
        let store = self.inner.store.lock();
        Ok(self
            .pending
            .iter()
            .chain(store.documents.iter())
            .find(|d| d.path == path && d.kind == DocKind::Folder)
            .map(|d| TargetContainer::new(d.id, d.path.clone())))
    }

    fn create_container(
        &mut self,
        parent: &TargetContainer,
        node: &dyn SourceNode,
    ) -> SinkResult<TargetContainer> {
        let path = parent.child_path(node.name());
        self.check(node, &path)?;
        let id = self.push(parent, node, DocKind::Folder, 0);
        Ok(TargetContainer::new(id, path))
    }

    fn create_leaf(&mut self, parent: &TargetContainer, node: &dyn SourceNode) -> SinkResult<()> {
        let path = parent.child_path(node.name());
        self.check(node, &path)?;
        let payload = node.payload()?;
        self.push(parent, node, DocKind::File, payload.len() as u64);
        Ok(())
    }

    fn commit(&mut self) -> SinkResult<()> {
        if self.closed {
            return Err(SinkError::Closed);
        }
        if self.pending.is_empty() {
            return Ok(());
        }
        let batch = std::mem::take(&mut self.pending);
        self.pending_paths.clear();
        self.inner.commit_sizes.lock().push(batch.len());
        let mut store = self.inner.store.lock();
        for document in batch {
            store.insert(document);
        }
        Ok(())
    }

    fn close(mut self: Box<Self>) -> SinkResult<()> {
        self.commit()?;
        self.closed = true;
        Ok(())
    }
}
