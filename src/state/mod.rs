//! State module for tracking crawl progress
//!
//! # Components
//!
//! - `SeriesCache`: every series URL discovered so far
//! - `DownloadProgress`: completed series plus the single in-progress cursor
//! - `ChapterUnit`, `ChapterNumber`, `ImageRef`: transient records parsed from pages

mod progress;
mod units;

// Re-export main types
pub use progress::{DownloadProgress, SeriesCache, SeriesRecord};
pub use units::{ChapterNumber, ChapterUnit, ImageRef};
