//! Persisted crawl progress: the series collection and the download cursor

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A series discovered on a listing page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesRecord {
    pub url: String,
    pub discovered_at: DateTime<Utc>,
}

/// Every series URL discovered so far, in discovery order
///
/// Stored as `series_cache.json`. Entries are only ever appended.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SeriesCache {
    #[serde(default)]
    pub series: Vec<String>,
    #[serde(default)]
    pub last_update: Option<DateTime<Utc>>,
}

impl SeriesCache {
    /// Merges discovered URLs into the collection (set union)
    ///
    /// Returns the records that were not present before, in encounter order.
    /// `last_update` is bumped only when something new was added.
    pub fn merge<I>(&mut self, urls: I, now: DateTime<Utc>) -> Vec<SeriesRecord>
    where
        I: IntoIterator<Item = String>,
    {
        let mut added = Vec::new();
        for url in urls {
            if self.series.contains(&url) {
                continue;
            }
            self.series.push(url.clone());
            added.push(SeriesRecord {
                url,
                discovered_at: now,
            });
        }

        if !added.is_empty() {
            self.last_update = Some(now);
        }
        added
    }

    /// Position of a series in discovery order
    pub fn position(&self, url: &str) -> Option<usize> {
        self.series.iter().position(|s| s == url)
    }

    pub fn len(&self) -> usize {
        self.series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }
}

/// Which series are finished and which one is being worked on
///
/// Stored as `download_progress.json`. A URL is never both in `completed`
/// and equal to `in_progress`; every mutator below keeps that true.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DownloadProgress {
    #[serde(default)]
    pub completed: Vec<String>,
    #[serde(default)]
    pub in_progress: Option<String>,
}

impl DownloadProgress {
    pub fn is_completed(&self, url: &str) -> bool {
        self.completed.iter().any(|c| c == url)
    }

    /// Series from the cache that are not completed, in cache order
    pub fn pending<'a>(&self, cache: &'a SeriesCache) -> Vec<&'a str> {
        cache
            .series
            .iter()
            .filter(|s| !self.is_completed(s))
            .map(String::as_str)
            .collect()
    }

    /// Points the cursor at a series
    ///
    /// Returns false (and leaves the cursor untouched) if the series is
    /// already completed.
    pub fn begin(&mut self, url: &str) -> bool {
        if self.is_completed(url) {
            return false;
        }
        self.in_progress = Some(url.to_string());
        true
    }

    /// Records a series as completed and clears the cursor if it pointed there
    pub fn mark_completed(&mut self, url: &str) {
        if !self.is_completed(url) {
            self.completed.push(url.to_string());
        }
        if self.in_progress.as_deref() == Some(url) {
            self.in_progress = None;
        }
    }

    /// Drops a cursor that points at a completed series
    ///
    /// Only hand-edited or foreign files can get into that shape. Returns
    /// true if the cursor was cleared.
    pub fn repair(&mut self) -> bool {
        match self.in_progress.as_deref() {
            Some(url) if self.is_completed(url) => {
                self.in_progress = None;
                true
            }
            _ => false,
        }
    }

    /// Whether the completed/in-progress exclusivity holds
    pub fn is_consistent(&self) -> bool {
        match self.in_progress.as_deref() {
            Some(url) => !self.is_completed(url),
            None => true,
        }
    }
}
