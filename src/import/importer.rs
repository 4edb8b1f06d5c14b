//! Import orchestrator
//!
//! The importer owns one run from login to logout:
//! - Authenticate and log the job start
//! - Resolve the target container and reset the counters
//! - Run the before-import filters
//! - Start a scheduler, submit the root task and monitor until quiescence
//! - Run the after-import filters, log the job end and log out
//!
//! ```text
//! Idle ─► Authenticating ─► Running ─► Finalizing ─► Done
//!              │               │            │
//!              └───────────────┴────────────┴──────► Failed (setup errors)
//! ```

use super::auth::{Anonymous, Authenticator, LoginContext};
use super::counters::SharedCounters;
use super::filter::ImporterFilter;
use super::history::{JobHistory, JobSummary};
use super::monitor::{MonitorSummary, ProgressMonitor, ProgressObserver, ThroughputSample};
use super::perf_log::PerfLogger;
use super::policy::{DefaultThreadingPolicy, ThreadingPolicy};
use super::scheduler::{Scheduler, SchedulerSummary};
use super::task::{ImportTask, TaskContext};
use crate::config::ImportConfig;
use crate::error::{FilterError, ImportError, Result, SetupError, TaskError};
use crate::repository::{DocumentSink, TargetContainer};
use crate::source::NodeRef;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Lifecycle state of an importer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportState {
    Idle,
    Authenticating,
    Running,
    Finalizing,
    Done,
    Failed,
}

impl ImportState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImportState::Idle => "idle",
            ImportState::Authenticating => "authenticating",
            ImportState::Running => "running",
            ImportState::Finalizing => "finalizing",
            ImportState::Done => "done",
            ImportState::Failed => "failed",
        }
    }

    /// Whether a run ended in this state
    pub fn is_terminal(&self) -> bool {
        matches!(self, ImportState::Done | ImportState::Failed)
    }
}

impl fmt::Display for ImportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cloneable stop request flag (for signal handlers and other threads)
#[derive(Debug, Clone, Default)]
pub struct StopHandle {
    requested: Arc<AtomicBool>,
}

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the run to shut down; honored at the next monitor tick
    pub fn stop(&self) {
        self.requested.store(true, Ordering::SeqCst);
    }

    pub fn is_stop_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    fn clear(&self) {
        self.requested.store(false, Ordering::SeqCst);
    }
}

/// Result of a run that reached `Done`
#[derive(Debug)]
pub struct ImportReport {
    /// Terminal state of the run
    pub state: ImportState,

    /// Leaf documents created
    pub documents: u64,

    /// Nodes whose creation failed
    pub node_errors: u64,

    /// Tasks that ended with an execution error
    pub task_failures: Vec<TaskError>,

    /// Recorded primary failure (before-import filter error)
    pub failure: Option<ImportError>,

    /// Time from `run` to the end of finalization
    pub duration: Duration,

    /// Documents per second over the whole run
    pub average_rate: f64,

    /// Documents per task counter slot
    pub per_worker: Vec<(String, u64)>,

    /// Throughput samples taken during the run
    pub samples: Vec<ThroughputSample>,

    /// The run was stopped before the tree was fully walked
    pub interrupted: bool,

    /// Scheduler statistics
    pub scheduler: SchedulerSummary,
}

impl ImportReport {
    /// No failure, no failed task and not interrupted
    pub fn is_success(&self) -> bool {
        self.failure.is_none() && self.task_failures.is_empty() && !self.interrupted
    }

    fn job_status(&self) -> &'static str {
        if self.state == ImportState::Failed {
            "failed"
        } else if self.interrupted {
            "interrupted"
        } else {
            "done"
        }
    }
}

/// Figures of the monitored phase of a run
#[derive(Default)]
struct Execution {
    monitor: Option<MonitorSummary>,
    scheduler: SchedulerSummary,
    task_failures: Vec<TaskError>,
}

/// Imports one source tree into a repository container
pub struct Importer {
    config: ImportConfig,
    source: NodeRef,
    sink: Arc<dyn DocumentSink>,
    policy: Arc<dyn ThreadingPolicy>,
    authenticator: Arc<dyn Authenticator>,
    filters: Vec<Box<dyn ImporterFilter>>,
    history: Option<Arc<dyn JobHistory>>,
    perf_log: Option<PerfLogger>,
    observer: Option<ProgressObserver>,
    counters: Arc<SharedCounters>,
    stop: StopHandle,
    state: ImportState,
}

impl Importer {
    /// Create an importer; the configuration is validated here
    pub fn new(config: ImportConfig, source: NodeRef, sink: Arc<dyn DocumentSink>) -> Result<Self> {
        config.validate()?;
        let policy = Arc::new(DefaultThreadingPolicy::new(config.max_split_depth));
        Ok(Self {
            config,
            source,
            sink,
            policy,
            authenticator: Arc::new(Anonymous),
            filters: Vec::new(),
            history: None,
            perf_log: None,
            observer: None,
            counters: Arc::new(SharedCounters::new()),
            stop: StopHandle::new(),
            state: ImportState::Idle,
        })
    }

    pub fn with_policy(mut self, policy: impl ThreadingPolicy + 'static) -> Self {
        self.policy = Arc::new(policy);
        self
    }

    pub fn with_authenticator(mut self, authenticator: impl Authenticator + 'static) -> Self {
        self.authenticator = Arc::new(authenticator);
        self
    }

    pub fn with_job_history(mut self, history: Arc<dyn JobHistory>) -> Self {
        self.history = Some(history);
        self
    }

    /// Write throughput samples to `perf_log`; released when the run ends
    pub fn with_perf_log(mut self, perf_log: PerfLogger) -> Self {
        self.perf_log = Some(perf_log);
        self
    }

    /// Call `observer` with a progress snapshot on every monitor tick
    pub fn with_progress(mut self, observer: ProgressObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Register a filter; filters run in registration order
    pub fn add_filter(&mut self, filter: impl ImporterFilter + 'static) {
        self.filters.push(Box::new(filter));
    }

    /// Request a shutdown of the current run
    pub fn stop(&self) {
        self.stop.stop();
    }

    /// Handle for requesting a shutdown from another thread
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn state(&self) -> ImportState {
        self.state
    }

    pub fn counters(&self) -> &Arc<SharedCounters> {
        &self.counters
    }

    pub fn config(&self) -> &ImportConfig {
        &self.config
    }

    /// Run the import, blocking until `Done` or `Failed`
    ///
    /// Setup errors are returned as `Err` once the after-import filters ran.
    /// Every other failure is reported in the `ImportReport`. A stop request
    /// applies to the current (or next) run only and is cleared when it ends.
    pub fn run(&mut self) -> Result<ImportReport> {
        let result = self.run_once();
        self.stop.clear();
        result
    }

    fn run_once(&mut self) -> Result<ImportReport> {
        let started = Instant::now();
        info!(
            source = %self.source.path(),
            target = %self.config.target_path,
            sink = %self.sink.describe(),
            workers = self.config.worker_count,
            batch_size = self.config.batch_size,
            policy = self.policy.name(),
            "Starting import"
        );

        self.set_state(ImportState::Authenticating);
        let login = match self.authenticator.login() {
            Ok(login) => login,
            Err(e) => return self.abort(None, false, started, e),
        };
        debug!(principal = login.principal(), "Authenticated");
        let job_logged = self.log_job_started();

        let target = match self.resolve_target() {
            Ok(target) => target,
            Err(e) => return self.abort(Some(login), job_logged, started, e),
        };
        self.counters.reset();
        self.set_state(ImportState::Running);

        let (failure, execution) = match self.run_before_filters() {
            Err(e) => {
                warn!(error = %e, "Before-import filter failed, no task scheduled");
                (Some(ImportError::Filter(e)), Execution::default())
            }
            Ok(()) => match self.execute(target, started) {
                Ok(execution) => (None, execution),
                Err(e) => return self.abort(Some(login), job_logged, started, e),
            },
        };

        self.set_state(ImportState::Finalizing);
        let report = self.finalize(Some(login), job_logged, started, failure, execution);
        Ok(report)
    }

    fn set_state(&mut self, state: ImportState) {
        debug!(from = %self.state, to = %state, "Import state change");
        self.state = state;
    }

    fn resolve_target(&self) -> std::result::Result<TargetContainer, SetupError> {
        let mut session = self.sink.open_session().map_err(SetupError::Session)?;
        let resolved = session.resolve(&self.config.target_path);
        if let Err(e) = session.close() {
            warn!(error = %e, "Failed to close target lookup session");
        }
        resolved
            .map_err(SetupError::Session)?
            .ok_or_else(|| SetupError::TargetNotFound {
                path: self.config.target_path.clone(),
            })
    }

    fn run_before_filters(&self) -> std::result::Result<(), FilterError> {
        for filter in &self.filters {
            debug!(filter = filter.name(), "Running before-import filter");
            filter.before_import()?;
        }
        Ok(())
    }

    fn run_after_filters(&self, failure: Option<&ImportError>) {
        for filter in &self.filters {
            debug!(filter = filter.name(), "Running after-import filter");
            if let Err(e) = filter.after_import(failure) {
                warn!(filter = filter.name(), error = %e, "After-import filter failed");
            }
        }
    }

    /// Schedule the root task and monitor the pool until it is quiescent
    fn execute(
        &mut self,
        target: TargetContainer,
        started: Instant,
    ) -> std::result::Result<Execution, SetupError> {
        let scheduler = Scheduler::start(self.config.worker_count, self.config.queue_capacity)?;
        let handle = scheduler.handle();

        let ctx = Arc::new(TaskContext::new(
            Arc::clone(&self.sink),
            Arc::clone(&self.policy),
            Arc::clone(&self.counters),
        ));
        let root = ImportTask::root(ctx, Arc::clone(&self.source), target, self.config.batch_size);
        handle.submit(root);

        let mut monitor = ProgressMonitor::new(
            Arc::clone(&self.counters),
            self.config.timing(),
            started,
            self.perf_log.take(),
        );
        monitor.watch(&handle, &self.stop, self.observer.as_ref());
        scheduler.join();

        let summary = monitor.finish(Instant::now());
        Ok(Execution {
            monitor: Some(summary),
            scheduler: handle.stats().summary(),
            task_failures: handle.take_failures(),
        })
    }

    /// End a run on a setup error
    fn abort(
        &mut self,
        login: Option<Box<dyn LoginContext>>,
        job_logged: bool,
        started: Instant,
        error: SetupError,
    ) -> Result<ImportReport> {
        warn!(error = %error, "Import setup failed");
        let failure = Some(ImportError::Setup(error));
        let mut report = self.finalize(login, job_logged, started, failure, Execution::default());
        match report.failure.take() {
            Some(e) => Err(e),
            None => Ok(report),
        }
    }

    fn finalize(
        &mut self,
        login: Option<Box<dyn LoginContext>>,
        job_logged: bool,
        started: Instant,
        failure: Option<ImportError>,
        execution: Execution,
    ) -> ImportReport {
        self.run_after_filters(failure.as_ref());

        // Never handed to a monitor
        if let Some(perf_log) = self.perf_log.take() {
            if let Err(e) = perf_log.release() {
                warn!(error = %e, "Failed to release performance log");
            }
        }

        let state = match &failure {
            Some(e) if e.is_fatal() => ImportState::Failed,
            _ => ImportState::Done,
        };
        let monitor = execution.monitor.unwrap_or_default();
        let report = ImportReport {
            state,
            documents: self.counters.total(),
            node_errors: self.counters.node_errors(),
            task_failures: execution.task_failures,
            failure,
            duration: started.elapsed(),
            average_rate: monitor.average_rate,
            per_worker: monitor.per_worker,
            samples: monitor.samples,
            interrupted: monitor.interrupted,
            scheduler: execution.scheduler,
        };

        if job_logged {
            self.log_job_ended(&report);
        }
        if let Some(login) = login {
            login.logout();
        }

        self.set_state(state);
        info!(
            state = %state,
            documents = report.documents,
            node_errors = report.node_errors,
            task_failures = report.task_failures.len(),
            duration_secs = report.duration.as_secs(),
            "Import completed"
        );
        report
    }

    fn log_job_started(&self) -> bool {
        let Some(history) = &self.history else {
            return false;
        };
        match history.log_job_started(&self.config.job_name) {
            Ok(()) => true,
            Err(e) => {
                warn!(job = %self.config.job_name, error = %e, "Failed to log job start");
                false
            }
        }
    }

    fn log_job_ended(&self, report: &ImportReport) {
        let Some(history) = &self.history else {
            return;
        };
        let summary = JobSummary {
            status: report.job_status(),
            documents: report.documents,
            node_errors: report.node_errors,
            duration: report.duration,
        };
        if let Err(e) = history.log_job_ended(&self.config.job_name, &summary) {
            warn!(job = %self.config.job_name, error = %e, "Failed to log job end");
        }
    }
}
