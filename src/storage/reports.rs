//! Append-only error log, update log and run reports
//!
//! These live under `report/` in the progress store and go through the same
//! backup-on-write path as the progress buckets.

use crate::output::RunReport;
use crate::storage::{ProgressStore, StorageResult, ERROR_LOG, UPDATE_LOG};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One terminal fetch failure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub url: String,
    pub error: String,
    pub timestamp: DateTime<Utc>,
}

/// A completed series that gained chapters since it was downloaded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateEntry {
    pub series: String,
    pub url: String,
    pub new_chapters: usize,
    pub timestamp: DateTime<Utc>,
}

/// Updates found by one update-mode run, keyed by the run's start time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateLog {
    pub started: DateTime<Utc>,
    #[serde(default)]
    pub updates: Vec<UpdateEntry>,
}

impl UpdateLog {
    pub fn new(started: DateTime<Utc>) -> Self {
        Self {
            started,
            updates: Vec::new(),
        }
    }
}

/// Appends one record to the error log
pub fn append_error(store: &ProgressStore, record: ErrorRecord) -> StorageResult<()> {
    let mut errors: Vec<ErrorRecord> = store.load(ERROR_LOG, Vec::new());
    errors.push(record);
    store.save(ERROR_LOG, &errors)
}

/// Reads the whole error log
pub fn load_errors(store: &ProgressStore) -> Vec<ErrorRecord> {
    store.load(ERROR_LOG, Vec::new())
}

/// Replaces the update log with the current run's log
pub fn write_update_log(store: &ProgressStore, log: &UpdateLog) -> StorageResult<()> {
    store.save(UPDATE_LOG, log)
}

/// Writes a run report to `report/report_<mode>_<YYYYmmdd_HHMMSS>.json`
///
/// Returns the bucket name the report was written to.
pub fn write_run_report(store: &ProgressStore, report: &RunReport) -> StorageResult<String> {
    let bucket = format!(
        "report/report_{}_{}",
        report.mode,
        report.timestamp.format("%Y%m%d_%H%M%S")
    );
    store.save(&bucket, report)?;
    Ok(bucket)
}
