//! Output module: run statistics and reports

mod stats;

pub use stats::{log_report, CrawlStats, FinishReason, RunReport};
