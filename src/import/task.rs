//! Import tasks
//!
//! An `ImportTask` walks one subtree depth-first with its own repository
//! session. For every folderish child it asks the threading policy whether to
//! hand the child to a new task or to recurse inline.
//!
//! ```text
//! run(task)
//!   ├── leaf ───────────────► create_leaf, count
//!   └── for child in children
//!         ├── leaf ─────────► create_leaf, count
//!         └── folder ───────► create_container
//!               ├── split ──► commit, submit(child task)
//!               └── inline ─► recurse
//! ```
//!
//! Every `batch_size` created documents the session is committed; the final
//! partial batch is committed when the task ends, whatever the reason. A
//! panic is re-raised only after that commit.

use super::counters::{CounterSlot, SharedCounters};
use super::policy::{SplitContext, ThreadingPolicy};
use super::scheduler::SchedulerHandle;
use crate::error::{NodeError, TaskError, TaskOutcome};
use crate::repository::{DocumentSink, SinkSession, TargetContainer};
use crate::source::{NodeRef, SourceNode};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use tracing::{debug, trace, warn};

/// Collaborators shared by every task of one run
pub struct TaskContext {
    pub sink: Arc<dyn DocumentSink>,
    pub policy: Arc<dyn ThreadingPolicy>,
    pub counters: Arc<SharedCounters>,
    next_id: AtomicU64,
}

impl TaskContext {
    pub fn new(
        sink: Arc<dyn DocumentSink>,
        policy: Arc<dyn ThreadingPolicy>,
        counters: Arc<SharedCounters>,
    ) -> Self {
        Self {
            sink,
            policy,
            counters,
            next_id: AtomicU64::new(0),
        }
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }
}

/// A subtree scheduled for import
pub struct ImportTask {
    id: u64,
    parent: Option<u64>,
    node: NodeRef,
    container: TargetContainer,
    depth: u32,
    batch_size: usize,
    root: bool,
    ctx: Arc<TaskContext>,
}

impl ImportTask {
    /// Create the root task of a run
    pub fn root(
        ctx: Arc<TaskContext>,
        node: NodeRef,
        container: TargetContainer,
        batch_size: usize,
    ) -> Self {
        Self {
            id: ctx.next_id(),
            parent: None,
            node,
            container,
            depth: 0,
            batch_size: batch_size.max(1),
            root: true,
            ctx,
        }
    }

    fn child(&self, node: NodeRef, container: TargetContainer, depth: u32) -> Self {
        Self {
            id: self.ctx.next_id(),
            parent: Some(self.id),
            node,
            container,
            depth,
            batch_size: self.batch_size,
            root: false,
            ctx: Arc::clone(&self.ctx),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn parent_id(&self) -> Option<u64> {
        self.parent
    }

    pub fn node(&self) -> &NodeRef {
        &self.node
    }

    pub fn container(&self) -> &TargetContainer {
        &self.container
    }

    /// Depth of the task's node below the source root
    pub fn depth(&self) -> u32 {
        self.depth
    }

    pub fn is_root(&self) -> bool {
        self.root
    }

    /// Walk the subtree; errors are reported in the outcome, never raised
    pub fn run(self, scheduler: &SchedulerHandle) -> TaskOutcome {
        let worker = thread::current()
            .name()
            .unwrap_or("caller")
            .to_string();
        debug!(
            task = self.id,
            parent = ?self.parent,
            worker = %worker,
            path = %self.node.path(),
            depth = self.depth,
            "Import task started"
        );

        let session = match self.ctx.sink.open_session() {
            Ok(session) => session,
            Err(source) => {
                return TaskOutcome::Failed(TaskError::Session {
                    task: self.id,
                    source,
                })
            }
        };

        let mut walk = TaskWalk {
            task: &self,
            scheduler,
            session,
            slot: self.ctx.counters.slot(format!("{}-{}", worker, self.id)),
            uncommitted: 0,
            documents: 0,
            node_errors: 0,
        };

        let walked = panic::catch_unwind(AssertUnwindSafe(|| {
            if self.node.is_leaf() {
                walk.import_leaf(&self.container, &self.node)
                    .map(|()| WalkStatus::Finished)
            } else {
                walk.walk(&self.node, &self.container, self.depth)
            }
        }));

        let TaskWalk {
            session,
            documents,
            node_errors,
            ..
        } = walk;

        // Flush the partial batch on every path out, unwinding included
        let closed = session.close().map_err(|source| TaskError::Session {
            task: self.id,
            source,
        });

        let result = match walked {
            Ok(result) => result,
            Err(payload) => {
                if let Err(e) = &closed {
                    warn!(task = self.id, error = %e, "Failed to flush batch of panicked task");
                }
                panic::resume_unwind(payload)
            }
        };

        debug!(task = self.id, documents, node_errors, "Import task finished");

        match (result, closed) {
            (Err(e), _) | (Ok(_), Err(e)) => TaskOutcome::Failed(e),
            (Ok(WalkStatus::Cancelled), Ok(())) => TaskOutcome::Cancelled {
                task: self.id,
                documents,
            },
            (Ok(WalkStatus::Finished), Ok(())) => TaskOutcome::Completed {
                task: self.id,
                documents,
                node_errors,
            },
        }
    }
}

enum WalkStatus {
    Finished,
    Cancelled,
}

/// Mutable state of one running task
struct TaskWalk<'a> {
    task: &'a ImportTask,
    scheduler: &'a SchedulerHandle,
    session: Box<dyn SinkSession>,
    slot: CounterSlot,
    uncommitted: usize,
    documents: u64,
    node_errors: u64,
}

impl<'a> TaskWalk<'a> {
    fn walk(
        &mut self,
        node: &NodeRef,
        container: &TargetContainer,
        depth: u32,
    ) -> Result<WalkStatus, TaskError> {
        let children = node.children().map_err(|source| TaskError::Source {
            task: self.task.id,
            source,
        })?;

        for child in children {
            if self.scheduler.is_cancelled() {
                return Ok(WalkStatus::Cancelled);
            }

            if child.is_leaf() {
                self.import_leaf(container, &child)?;
                continue;
            }

            let child_container = match self.session.create_container(container, child.as_ref()) {
                Ok(created) => {
                    self.document_created(false)?;
                    created
                }
                Err(source) => {
                    self.node_failed(child.as_ref(), source);
                    continue;
                }
            };

            let split = self.task.ctx.policy.should_split(&SplitContext {
                node: child.as_ref(),
                depth,
                active_workers: self.scheduler.active_count(),
                queue_depth: self.scheduler.queue_depth(),
                worker_cap: self.scheduler.worker_count(),
                task_documents: self.documents,
                batch_size: self.task.batch_size,
            });

            if split {
                // The child container must be visible to the other session
                self.commit()?;
                let subtask = self.task.child(child, child_container, depth + 1);
                trace!(
                    task = self.task.id,
                    subtask = subtask.id,
                    path = %subtask.node.path(),
                    "Subtree split off"
                );
                self.scheduler.submit(subtask);
            } else if let WalkStatus::Cancelled = self.walk(&child, &child_container, depth + 1)? {
                return Ok(WalkStatus::Cancelled);
            }
        }

        Ok(WalkStatus::Finished)
    }

    fn import_leaf(&mut self, container: &TargetContainer, node: &NodeRef) -> Result<(), TaskError> {
        match self.session.create_leaf(container, node.as_ref()) {
            Ok(()) => self.document_created(true),
            Err(source) => {
                self.node_failed(node.as_ref(), source);
                Ok(())
            }
        }
    }

    fn document_created(&mut self, leaf: bool) -> Result<(), TaskError> {
        if leaf {
            self.documents += 1;
            self.slot.increment();
        }
        self.uncommitted += 1;
        if self.uncommitted >= self.task.batch_size {
            self.commit()?;
        }
        Ok(())
    }

    fn node_failed(&mut self, node: &dyn SourceNode, source: crate::error::SinkError) {
        let error = NodeError {
            path: node.path().to_string(),
            source,
        };
        warn!(task = self.task.id, error = %error, "Document creation failed");
        self.node_errors += 1;
        self.task.ctx.counters.record_node_error();
    }

    fn commit(&mut self) -> Result<(), TaskError> {
        if self.uncommitted == 0 {
            return Ok(());
        }
        self.session.commit().map_err(|source| TaskError::Session {
            task: self.task.id,
            source,
        })?;
        trace!(task = self.task.id, documents = self.uncommitted, "Batch committed");
        self.uncommitted = 0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::import::policy::DefaultThreadingPolicy;
    use crate::import::scheduler::{Scheduler, Submission};
    use crate::repository::{DocKind, MemoryRepository};
    use crate::source::SyntheticNode;
    use std::time::{Duration, Instant};

    fn context(repo: &MemoryRepository, max_split_depth: u32) -> Arc<TaskContext> {
        Arc::new(TaskContext::new(
            Arc::new(repo.clone()),
            Arc::new(DefaultThreadingPolicy::new(max_split_depth)),
            Arc::new(SharedCounters::new()),
        ))
    }

    fn root_task(ctx: Arc<TaskContext>, depth: u32, width: usize, batch: usize) -> ImportTask {
        let node: NodeRef = Arc::new(SyntheticNode::root(depth, width));
        ImportTask::root(ctx, node, TargetContainer::new(0, "/"), batch)
    }

    #[test]
    fn test_inline_walk_batches_include_containers() {
        let repo = MemoryRepository::new();
        let ctx = context(&repo, 0);
        let scheduler = Scheduler::start(1, 4).unwrap();
        let handle = scheduler.handle();

        let task = root_task(Arc::clone(&ctx), 2, 3, 4);
        assert!(task.is_root());
        assert_eq!(task.parent_id(), None);

        match task.run(&handle) {
            TaskOutcome::Completed {
                documents,
                node_errors,
                ..
            } => {
                assert_eq!(documents, 9);
                assert_eq!(node_errors, 0);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        scheduler.join();

        // Each folder plus its three leaves fills one batch
        assert_eq!(repo.commit_sizes(), vec![4, 4, 4]);
        assert_eq!(repo.count(DocKind::Folder), 3);
        assert_eq!(ctx.counters.total(), 9);
    }

    #[test]
    fn test_cancelled_task_stops_at_first_sibling() {
        let repo = MemoryRepository::new();
        let scheduler = Scheduler::start(1, 4).unwrap();
        let handle = scheduler.handle();
        handle.shutdown_now();

        let outcome = root_task(context(&repo, 0), 1, 5, 2).run(&handle);
        assert!(matches!(outcome, TaskOutcome::Cancelled { documents: 0, .. }));
        assert_eq!(repo.count(DocKind::File), 0);
        scheduler.join();
    }

    #[test]
    fn test_split_children_run_on_workers() {
        let repo = MemoryRepository::new();
        let ctx = context(&repo, 8);
        let scheduler = Scheduler::start(2, 8).unwrap();
        let handle = scheduler.handle();

        assert_eq!(handle.submit(root_task(Arc::clone(&ctx), 3, 3, 5)), Submission::Queued);

        let deadline = Instant::now() + Duration::from_secs(10);
        while !handle.is_quiescent() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(handle.is_quiescent());
        assert_eq!(handle.active_count(), 0);
        scheduler.join();

        assert_eq!(ctx.counters.total(), 27);
        assert_eq!(repo.count(DocKind::File), 27);
        let stats = handle.stats().summary();
        assert!(stats.completed >= 1);
        assert_eq!(stats.completed, stats.enqueued + stats.caller_runs);
    }
}
