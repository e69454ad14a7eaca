//! Report Storage Trait
//!
//! Backends persisting the reports of a run. Implementors keep one record per session report
//! plus the run summary; every method returns a `Result` carrying a [`StorageError`].

use crate::error_handling::types::StorageError;
use crate::metrics::types::Report;
use std::path::PathBuf;
use uuid::Uuid;

pub trait ReportStorage: Send + Sync {
    /// Saves a session report and returns where it went.
    ///
    /// - `report` - a finalized report with a `session_id`.
    fn save_report(&self, report: &Report) -> Result<PathBuf, StorageError>;

    /// Saves the aggregate report of the run.
    fn save_summary(&self, summary: &Report) -> Result<PathBuf, StorageError>;

    fn load_report(&self, session_id: Uuid) -> Result<Report, StorageError>;
}
