//! Bounded worker pool for import tasks
//!
//! A fixed set of worker threads pulls `ImportTask`s from a bounded FIFO
//! queue. Tasks submit the subtrees they split off back into the same queue
//! through a `SchedulerHandle`.
//!
//! # Backpressure
//!
//! When the queue is full, `submit` runs the task synchronously on the
//! calling thread instead of blocking (caller-runs). A worker can therefore
//! never deadlock waiting on a queue that only workers drain.
//!
//! # Completion
//!
//! `outstanding` counts tasks that were enqueued and have not yet finished or
//! been cancelled. It is incremented before the task enters the queue and
//! decremented after the worker is done with it, so it cannot read zero while
//! a task sits between the queue and a worker.

use super::task::ImportTask;
use crate::error::{SetupError, TaskError, TaskOutcome};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use parking_lot::Mutex;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// How long an idle worker waits before re-checking the closed flag
const RECV_TIMEOUT: Duration = Duration::from_millis(100);

/// Statistics for the scheduler
#[derive(Debug, Default)]
pub struct SchedulerStats {
    /// Tasks accepted into the queue
    pub enqueued: AtomicU64,

    /// Tasks run on the submitting thread because the queue was full
    pub caller_runs: AtomicU64,

    /// Tasks that walked their whole subtree
    pub completed: AtomicU64,

    /// Tasks that ended with a task execution error
    pub failed: AtomicU64,

    /// Tasks cancelled by `shutdown_now`, queued or in flight
    pub cancelled: AtomicU64,

    /// Failed tasks whose failure was a panic
    pub panicked: AtomicU64,
}

impl SchedulerStats {
    /// Plain snapshot of the counters
    pub fn summary(&self) -> SchedulerSummary {
        SchedulerSummary {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            caller_runs: self.caller_runs.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            panicked: self.panicked.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of `SchedulerStats`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerSummary {
    pub enqueued: u64,
    pub caller_runs: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub panicked: u64,
}

/// What `submit` did with a task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    /// Accepted into the queue
    Queued,
    /// Queue was full; the task already ran on the calling thread
    CallerRan,
    /// Scheduler is shutting down; the task was cancelled
    Cancelled,
}

struct PoolState {
    worker_count: usize,
    capacity: usize,
    active: AtomicUsize,
    outstanding: AtomicUsize,
    cancelled: AtomicBool,
    closed: AtomicBool,
    stats: SchedulerStats,
    failures: Mutex<Vec<TaskError>>,
}

/// Handle for submitting tasks and querying the pool (clone for each task)
#[derive(Clone)]
pub struct SchedulerHandle {
    sender: Sender<ImportTask>,
    receiver: Receiver<ImportTask>,
    state: Arc<PoolState>,
}

impl SchedulerHandle {
    /// Submit a task for execution by any free worker
    pub fn submit(&self, task: ImportTask) -> Submission {
        if self.is_cancelled() {
            self.cancel_unstarted(&task);
            return Submission::Cancelled;
        }

        self.state.outstanding.fetch_add(1, Ordering::SeqCst);
        match self.sender.try_send(task) {
            Ok(()) => {
                self.state.stats.enqueued.fetch_add(1, Ordering::Relaxed);
                Submission::Queued
            }
            Err(TrySendError::Full(task)) => {
                self.state.outstanding.fetch_sub(1, Ordering::SeqCst);
                self.state.stats.caller_runs.fetch_add(1, Ordering::Relaxed);
                trace!(task = task.id(), path = %task.node().path(), "Queue full - running task inline");
                self.execute(task);
                Submission::CallerRan
            }
            Err(TrySendError::Disconnected(task)) => {
                self.state.outstanding.fetch_sub(1, Ordering::SeqCst);
                self.cancel_unstarted(&task);
                Submission::Cancelled
            }
        }
    }

    /// Run a task on the current thread and record its outcome
    fn execute(&self, task: ImportTask) {
        let id = task.id();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| task.run(self)))
            .unwrap_or_else(|payload| {
                self.state.stats.panicked.fetch_add(1, Ordering::Relaxed);
                TaskOutcome::Failed(TaskError::Panicked {
                    task: id,
                    message: panic_message(payload.as_ref()),
                })
            });
        self.record(outcome);
    }

    fn record(&self, outcome: TaskOutcome) {
        let stats = &self.state.stats;
        match outcome {
            TaskOutcome::Completed {
                task,
                documents,
                node_errors,
            } => {
                stats.completed.fetch_add(1, Ordering::Relaxed);
                trace!(task, documents, node_errors, "Task completed");
            }
            TaskOutcome::Cancelled { task, documents } => {
                stats.cancelled.fetch_add(1, Ordering::Relaxed);
                debug!(task, documents, "Task stopped by shutdown");
            }
            TaskOutcome::Failed(error) => {
                stats.failed.fetch_add(1, Ordering::Relaxed);
                warn!(task = error.task_id(), error = %error, "Task failed");
                self.state.failures.lock().push(error);
            }
        }
    }

    fn cancel_unstarted(&self, task: &ImportTask) {
        self.state.stats.cancelled.fetch_add(1, Ordering::Relaxed);
        debug!(task = task.id(), path = %task.node().path(), "Task cancelled before start");
    }

    /// Cancel everything currently queued, returning how many were cancelled
    fn drain(&self) -> usize {
        let mut drained = 0;
        while let Ok(task) = self.receiver.try_recv() {
            self.cancel_unstarted(&task);
            self.state.outstanding.fetch_sub(1, Ordering::SeqCst);
            drained += 1;
        }
        drained
    }

    /// Workers currently executing a task
    pub fn active_count(&self) -> usize {
        self.state.active.load(Ordering::SeqCst)
    }

    /// Tasks waiting in the queue
    pub fn queue_depth(&self) -> usize {
        self.receiver.len()
    }

    /// Queue capacity
    pub fn capacity(&self) -> usize {
        self.state.capacity
    }

    /// Size of the worker pool
    pub fn worker_count(&self) -> usize {
        self.state.worker_count
    }

    /// Tasks enqueued and not yet finished or cancelled
    pub fn outstanding(&self) -> usize {
        self.state.outstanding.load(Ordering::SeqCst)
    }

    /// No task executing and none queued
    pub fn is_quiescent(&self) -> bool {
        self.outstanding() == 0
    }

    /// Whether `shutdown_now` was called
    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::SeqCst)
    }

    /// Cancel queued tasks and ask running tasks to stop at the next sibling
    pub fn shutdown_now(&self) -> usize {
        self.state.cancelled.store(true, Ordering::SeqCst);
        let drained = self.drain();
        info!(cancelled = drained, active = self.active_count(), "Import shutdown requested");
        drained
    }

    /// Scheduler statistics
    pub fn stats(&self) -> &SchedulerStats {
        &self.state.stats
    }

    /// Task execution errors recorded so far
    pub fn take_failures(&self) -> Vec<TaskError> {
        std::mem::take(&mut *self.state.failures.lock())
    }
}

/// RAII guard marking a worker as active on one dequeued task
struct TaskGuard<'a> {
    state: &'a PoolState,
}

impl<'a> TaskGuard<'a> {
    fn new(state: &'a PoolState) -> Self {
        state.active.fetch_add(1, Ordering::SeqCst);
        Self { state }
    }
}

impl<'a> Drop for TaskGuard<'a> {
    fn drop(&mut self) {
        self.state.active.fetch_sub(1, Ordering::SeqCst);
        self.state.outstanding.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Fixed-size worker pool with a bounded task queue
pub struct Scheduler {
    handle: SchedulerHandle,
    workers: Vec<JoinHandle<()>>,
}

impl Scheduler {
    /// Start `worker_count` workers over a queue of `capacity` tasks
    pub fn start(worker_count: usize, capacity: usize) -> Result<Self, SetupError> {
        let (sender, receiver) = bounded(capacity);
        let handle = SchedulerHandle {
            sender,
            receiver,
            state: Arc::new(PoolState {
                worker_count,
                capacity,
                active: AtomicUsize::new(0),
                outstanding: AtomicUsize::new(0),
                cancelled: AtomicBool::new(false),
                closed: AtomicBool::new(false),
                stats: SchedulerStats::default(),
                failures: Mutex::new(Vec::new()),
            }),
        };

        let mut scheduler = Self {
            handle,
            workers: Vec::with_capacity(worker_count),
        };

        for id in 0..worker_count {
            let handle = scheduler.handle.clone();
            let spawned = thread::Builder::new()
                .name(format!("import-{}", id))
                .spawn(move || worker_loop(id, handle));
            match spawned {
                Ok(worker) => scheduler.workers.push(worker),
                Err(e) => {
                    scheduler.join();
                    return Err(SetupError::WorkerSpawn {
                        id,
                        reason: e.to_string(),
                    });
                }
            }
        }

        info!(workers = worker_count, capacity, "Scheduler started");
        Ok(scheduler)
    }

    /// Get a handle for submitting tasks
    pub fn handle(&self) -> SchedulerHandle {
        self.handle.clone()
    }

    /// Stop the workers and wait for them to exit
    ///
    /// Tasks still queued at this point are cancelled.
    pub fn join(mut self) {
        self.handle.state.closed.store(true, Ordering::SeqCst);
        for worker in std::mem::take(&mut self.workers) {
            if worker.join().is_err() {
                warn!("Worker thread panicked outside of a task");
            }
        }
        let leftover = self.handle.drain();
        if leftover > 0 {
            warn!(cancelled = leftover, "Tasks left in queue at shutdown");
        }
        debug!("Scheduler stopped");
    }
}

/// Main worker loop
fn worker_loop(id: usize, handle: SchedulerHandle) {
    trace!(worker = id, "Worker starting");
    let state = Arc::clone(&handle.state);

    while !state.closed.load(Ordering::SeqCst) {
        let task = match handle.receiver.recv_timeout(RECV_TIMEOUT) {
            Ok(task) => task,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };

        if handle.is_cancelled() {
            handle.cancel_unstarted(&task);
            state.outstanding.fetch_sub(1, Ordering::SeqCst);
            continue;
        }

        let _guard = TaskGuard::new(&state);
        handle.execute(task);
    }

    trace!(worker = id, "Worker shutting down");
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
