//! Transient records produced by page parsing

use std::cmp::Ordering;
use std::fmt;

/// A chapter or volume number such as `12` or `12.5`
///
/// Keeps the label exactly as it appeared in the link (it names the chapter
/// directory) and compares by numeric value, so `12` and `12.0` are equal.
#[derive(Debug, Clone)]
pub struct ChapterNumber {
    label: String,
    value: f64,
}

impl ChapterNumber {
    /// Parses a decimal label; returns None for anything that is not a finite number
    pub fn parse(label: &str) -> Option<Self> {
        let label = label.trim();
        let value: f64 = label.parse().ok()?;
        if !value.is_finite() {
            return None;
        }
        Some(Self {
            label: label.to_string(),
            value,
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn value(&self) -> f64 {
        self.value
    }
}

impl PartialEq for ChapterNumber {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ChapterNumber {}

impl PartialOrd for ChapterNumber {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ChapterNumber {
    fn cmp(&self, other: &Self) -> Ordering {
        self.value.total_cmp(&other.value)
    }
}

impl fmt::Display for ChapterNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label)
    }
}

/// One chapter or volume of a series, in traversal order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChapterUnit {
    pub number: ChapterNumber,
    pub source_url: String,
    /// Position within the series' ordered unit list
    pub index: usize,
}

/// One image of a chapter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef {
    /// Absolute image URL
    pub url: String,
    /// 1-based page number within the chapter
    pub page: u32,
}
