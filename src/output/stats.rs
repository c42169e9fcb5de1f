//! Run statistics and the end-of-run report
//!
//! Counters are collected by the orchestrator during a run and turned into a
//! `RunReport` when the run ends, normally or through a shutdown signal.

use crate::crawler::CrawlMode;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Counters for one run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlStats {
    pub started_at: DateTime<Utc>,
    pub processed_series: u64,
    pub downloaded_chapters: u64,
    pub failed_downloads: u64,
    pub total_bytes: u64,
}

impl CrawlStats {
    /// Fresh counters starting now
    pub fn new() -> Self {
        Self::starting_at(Utc::now())
    }

    pub fn starting_at(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            processed_series: 0,
            downloaded_chapters: 0,
            failed_downloads: 0,
            total_bytes: 0,
        }
    }
}

impl Default for CrawlStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Why a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// Traversal ran out of work
    Finished,
    /// A shutdown signal interrupted the run
    Shutdown,
}

impl fmt::Display for FinishReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Finished => write!(f, "finished"),
            Self::Shutdown => write!(f, "shutdown"),
        }
    }
}

/// Summary written to `report/report_<mode>_<timestamp>.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub mode: CrawlMode,
    /// Wall-clock duration as `H:MM:SS`
    pub duration: String,
    pub duration_secs: f64,
    pub processed_series: u64,
    pub downloaded_chapters: u64,
    pub failed_downloads: u64,
    pub total_bytes: u64,
    /// Throughput as `"<x> KB/s"`, or `"N/A"` for a zero-length run
    pub average_speed: String,
    pub finish_reason: FinishReason,
    pub timestamp: DateTime<Utc>,
}

impl RunReport {
    /// Builds the report for a run that ended at `finished_at`
    pub fn build(
        mode: CrawlMode,
        stats: &CrawlStats,
        finish_reason: FinishReason,
        finished_at: DateTime<Utc>,
    ) -> Self {
        let elapsed = (finished_at - stats.started_at)
            .to_std()
            .unwrap_or_default();
        let duration_secs = elapsed.as_secs_f64();

        let average_speed = if duration_secs > 0.0 {
            format!(
                "{:.2} KB/s",
                stats.total_bytes as f64 / duration_secs / 1024.0
            )
        } else {
            "N/A".to_string()
        };

        let whole = elapsed.as_secs();
        let duration = format!(
            "{}:{:02}:{:02}",
            whole / 3600,
            (whole % 3600) / 60,
            whole % 60
        );

        Self {
            mode,
            duration,
            duration_secs,
            processed_series: stats.processed_series,
            downloaded_chapters: stats.downloaded_chapters,
            failed_downloads: stats.failed_downloads,
            total_bytes: stats.total_bytes,
            average_speed,
            finish_reason,
            timestamp: finished_at,
        }
    }
}

/// Logs the report in a human-readable form
pub fn log_report(report: &RunReport) {
    tracing::info!("=== Run Report ({}) ===", report.mode);
    tracing::info!("  Duration: {}", report.duration);
    tracing::info!("  Series processed: {}", report.processed_series);
    tracing::info!("  Chapters downloaded: {}", report.downloaded_chapters);
    tracing::info!("  Failed requests: {}", report.failed_downloads);
    tracing::info!(
        "  Bytes written: {} ({})",
        report.total_bytes,
        report.average_speed
    );
    tracing::info!("  Finish reason: {}", report.finish_reason);
}
