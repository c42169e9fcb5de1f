//! Storage module for persisting crawl state
//!
//! This module handles everything written under the cache directory:
//! - The series collection and download progress buckets
//! - Backup-on-write rotation and backup fallback on load
//! - The error log, update log and per-run reports

mod error;
mod reports;
mod store;

pub use error::{StorageError, StorageResult};
pub use reports::{
    append_error, load_errors, write_run_report, write_update_log, ErrorRecord, UpdateEntry,
    UpdateLog,
};
pub use store::ProgressStore;

/// Bucket holding the discovered series collection
pub const SERIES_CACHE: &str = "series_cache";

/// Bucket holding completed series and the in-progress cursor
pub const DOWNLOAD_PROGRESS: &str = "download_progress";

/// Bucket holding the current update-mode log
pub const UPDATE_LOG: &str = "report/update_log";

/// Bucket holding every terminal fetch failure
pub const ERROR_LOG: &str = "report/error_log";
