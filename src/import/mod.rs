//! Concurrent tree import
//!
//! This module implements the import engine: a fixed pool of workers
//! executing recursive `ImportTask`s over a bounded queue, supervised by a
//! polling `ProgressMonitor` and driven by the `Importer` state machine.
//!
//! # Architecture
//!
//! ```text
//!                     ┌─────────────────────────┐
//!                     │        Importer         │
//!                     │  - login / filters      │
//!                     │  - ProgressMonitor loop │
//!                     └───────────┬─────────────┘
//!                                 │ submit(root task)
//!                     ┌───────────▼─────────────┐
//!                     │  Bounded task queue     │◄──── submit(child task)
//!                     │  (caller-runs if full)  │              │
//!                     └───────────┬─────────────┘              │
//!       ┌─────────────────────────┼─────────────────────────┐  │
//! ┌─────▼─────┐             ┌─────▼─────┐             ┌─────▼──┴──┐
//! │  Worker 1 │             │  Worker 2 │             │  Worker N │
//! │  session  │             │  session  │             │  session  │
//! └─────┬─────┘             └─────┬─────┘             └─────┬─────┘
//!       └──────────── SharedCounters (per task slot) ───────┘
//! ```

pub mod auth;
pub mod counters;
pub mod filter;
pub mod history;
pub mod importer;
pub mod monitor;
pub mod perf_log;
pub mod policy;
pub mod scheduler;
pub mod task;

pub use auth::{Anonymous, Authenticator, LoginContext};
pub use counters::{CounterSlot, SharedCounters};
pub use filter::{ImporterFilter, LoggingFilter};
pub use history::{JobHistory, JobSummary};
pub use importer::{ImportReport, ImportState, Importer, StopHandle};
pub use monitor::{
    MonitorSummary, MonitorTiming, ProgressMonitor, ProgressObserver, ProgressSnapshot,
    ThroughputSample,
};
pub use perf_log::{PerfBuffer, PerfLogger, PERF_HEADERS};
pub use policy::{DefaultThreadingPolicy, SplitContext, ThreadingPolicy, VolumeThreadingPolicy};
pub use scheduler::{Scheduler, SchedulerHandle, SchedulerStats, SchedulerSummary, Submission};
pub use task::{ImportTask, TaskContext};
