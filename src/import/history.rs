//! Job history
//!
//! An optional record of import jobs. The importer logs the start of a job
//! once the run is authenticated and its end during finalization, whatever
//! the outcome. History failures are logged and never fail a run.

use crate::error::SinkResult;
use std::time::Duration;

/// Figures recorded when a job ends
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSummary {
    /// "done", "failed" or "interrupted"
    pub status: &'static str,
    pub documents: u64,
    pub node_errors: u64,
    pub duration: Duration,
}

/// Store of import job records
pub trait JobHistory: Send + Sync {
    fn log_job_started(&self, job: &str) -> SinkResult<()>;

    fn log_job_ended(&self, job: &str, summary: &JobSummary) -> SinkResult<()>;
}
