//! Import filters
//!
//! Filters are hooks around a run. `before_import` runs in registration
//! order once the run is authenticated; the first error aborts scheduling.
//! `after_import` runs for every filter, in registration order, at the end of
//! every run, and receives the recorded failure if any.

use crate::error::{FilterError, ImportError};

/// Hook invoked before and after an import run
pub trait ImporterFilter: Send + Sync {
    /// Name used in logs and errors
    fn name(&self) -> &str;

    fn before_import(&self) -> Result<(), FilterError> {
        Ok(())
    }

    fn after_import(&self, _failure: Option<&ImportError>) -> Result<(), FilterError> {
        Ok(())
    }
}

/// Filter that logs the boundaries of a run
#[derive(Debug, Default, Clone)]
pub struct LoggingFilter;

impl ImporterFilter for LoggingFilter {
    fn name(&self) -> &str {
        "logging"
    }

    fn before_import(&self) -> Result<(), FilterError> {
        tracing::info!("Import starting");
        Ok(())
    }

    fn after_import(&self, failure: Option<&ImportError>) -> Result<(), FilterError> {
        match failure {
            Some(e) => tracing::warn!(error = %e, "Import ended with a failure"),
            None => tracing::info!("Import ended"),
        }
        Ok(())
    }
}
