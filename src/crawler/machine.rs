//! Crawl orchestration as a pure state machine
//!
//! [`OrchestratorState::handle`] takes one [`Event`] (a parsed page, a
//! failed fetch, a finished chapter) and returns the [`Effect`]s the driver
//! has to carry out: fetch a page, persist a bucket, download a chapter,
//! record an error. Nothing in here touches the network or the disk, so every
//! transition can be tested on its own.
//!
//! ```text
//! Idle -> SeriesListing -> SeriesPage -> UnitPage -> { UnitPage | NextSeries } -> ... -> Finished
//! ```

use crate::config::CatalogConfig;
use crate::crawler::parser::pending_units;
use crate::output::CrawlStats;
use crate::pipeline::{ChapterJob, ChapterOutcome, DropReason};
use crate::state::{ChapterNumber, ChapterUnit, DownloadProgress, ImageRef, SeriesCache};
use crate::storage::{ErrorRecord, UpdateEntry, UpdateLog};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Operating mode of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum CrawlMode {
    /// Walk the listing pages and collect series URLs
    Discover,
    /// Download chapters of series that are not completed yet
    Download,
    /// Look for new chapters of completed series
    Update,
}

impl fmt::Display for CrawlMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Discover => write!(f, "discover"),
            Self::Download => write!(f, "download"),
            Self::Update => write!(f, "update"),
        }
    }
}

impl FromStr for CrawlMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "discover" | "collect" => Ok(Self::Discover),
            "download" => Ok(Self::Download),
            "update" => Ok(Self::Update),
            other => Err(format!("unknown mode: {}", other)),
        }
    }
}

/// Where a series traversal stands
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitCursor {
    pub series_url: String,
    pub series_title: String,
    /// Units still to download, in order
    pub units: Vec<ChapterUnit>,
    pub index: usize,
}

impl UnitCursor {
    pub fn current(&self) -> Option<&ChapterUnit> {
        self.units.get(self.index)
    }

    fn advanced(self) -> Self {
        Self {
            index: self.index + 1,
            ..self
        }
    }
}

/// What a page fetch is for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    SeriesListing { page: u32 },
    SeriesPage { series_url: String },
    UnitPage(UnitCursor),
}

/// A page the driver should fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub url: String,
    pub step: Step,
}

/// Coarse position of the traversal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    SeriesListing,
    SeriesPage,
    UnitPage,
    NextSeries,
    Finished,
}

/// Persisted buckets owned by the orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bucket {
    SeriesCache,
    DownloadProgress,
}

/// Inputs to the state machine
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Begin the run
    Start,
    ListingLoaded {
        page: u32,
        series: Vec<String>,
        has_next: bool,
    },
    SeriesLoaded {
        series_url: String,
        title: String,
        /// Every unit on the page, ordered
        units: Vec<ChapterUnit>,
        /// Chapter numbers already on disk for this series
        downloaded: BTreeSet<ChapterNumber>,
    },
    UnitLoaded {
        cursor: UnitCursor,
        images: Vec<ImageRef>,
    },
    FetchFailed {
        step: Step,
        url: String,
        error: String,
    },
    ChapterFinished(ChapterOutcome),
}

/// Work the driver carries out, in order
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    Fetch(FetchRequest),
    /// Save the bucket before any later effect runs
    Persist(Bucket),
    Download(ChapterJob),
    WriteUpdateLog,
    RecordError(ErrorRecord),
}

/// All crawl state for one run
#[derive(Debug, Clone)]
pub struct OrchestratorState {
    mode: CrawlMode,
    catalog: CatalogConfig,
    start_page: u32,
    series_cache: SeriesCache,
    progress: DownloadProgress,
    update_log: Option<UpdateLog>,
    stats: CrawlStats,
    phase: Phase,
    pending_fetches: usize,
    pending_downloads: usize,
}

/// Functional form of [`OrchestratorState::handle`]
pub fn transition(
    mut state: OrchestratorState,
    event: Event,
    now: DateTime<Utc>,
) -> (OrchestratorState, Vec<Effect>) {
    let effects = state.handle(event, now);
    (state, effects)
}

impl OrchestratorState {
    pub fn new(
        mode: CrawlMode,
        catalog: CatalogConfig,
        start_page: u32,
        series_cache: SeriesCache,
        progress: DownloadProgress,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            mode,
            catalog,
            start_page: start_page.max(1),
            series_cache,
            progress,
            update_log: None,
            stats: CrawlStats::starting_at(started_at),
            phase: Phase::Idle,
            pending_fetches: 0,
            pending_downloads: 0,
        }
    }

    pub fn mode(&self) -> CrawlMode {
        self.mode
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn series_cache(&self) -> &SeriesCache {
        &self.series_cache
    }

    pub fn progress(&self) -> &DownloadProgress {
        &self.progress
    }

    pub fn update_log(&self) -> Option<&UpdateLog> {
        self.update_log.as_ref()
    }

    pub fn stats(&self) -> &CrawlStats {
        &self.stats
    }

    pub fn pending_fetches(&self) -> usize {
        self.pending_fetches
    }

    pub fn pending_downloads(&self) -> usize {
        self.pending_downloads
    }

    /// No fetch or download is outstanding
    pub fn is_done(&self) -> bool {
        self.pending_fetches == 0 && self.pending_downloads == 0
    }

    /// Applies one event and returns the effects to carry out
    pub fn handle(&mut self, event: Event, now: DateTime<Utc>) -> Vec<Effect> {
        let mut effects = Vec::new();

        match event {
            Event::Start => self.start(now, &mut effects),
            Event::ListingLoaded {
                page,
                series,
                has_next,
            } => {
                self.fetch_done();
                self.on_listing(page, series, has_next, now, &mut effects);
            }
            Event::SeriesLoaded {
                series_url,
                title,
                units,
                downloaded,
            } => {
                self.fetch_done();
                self.on_series(series_url, title, units, &downloaded, now, &mut effects);
            }
            Event::UnitLoaded { cursor, images } => {
                self.fetch_done();
                self.on_unit(cursor, images, &mut effects);
            }
            Event::FetchFailed { step, url, error } => {
                self.fetch_done();
                self.on_failure(step, url, error, now, &mut effects);
            }
            Event::ChapterFinished(outcome) => {
                self.pending_downloads = self.pending_downloads.saturating_sub(1);
                self.on_chapter(outcome, now, &mut effects);
            }
        }

        if self.is_done() {
            self.phase = Phase::Finished;
        }
        debug_assert!(self.progress.is_consistent());
        effects
    }

    fn start(&mut self, now: DateTime<Utc>, effects: &mut Vec<Effect>) {
        if self.progress.repair() {
            tracing::warn!("In-progress series was already completed; cursor cleared");
            effects.push(Effect::Persist(Bucket::DownloadProgress));
        }

        match self.mode {
            CrawlMode::Discover => {
                let page = self.start_page;
                tracing::info!("Collecting series starting at listing page {}", page);
                self.fetch_listing(page, effects);
            }
            CrawlMode::Download => {
                let pending = self.progress.pending(&self.series_cache);
                if pending.is_empty() {
                    tracing::info!("No pending series to download");
                    return;
                }
                let first = pending[0].to_string();
                tracing::info!(
                    "{} of {} series pending",
                    pending.len(),
                    self.series_cache.len()
                );

                match self.progress.in_progress.clone() {
                    Some(current) => {
                        tracing::info!(series = %current, "Resuming interrupted series");
                        self.fetch_series(current, effects);
                    }
                    None => {
                        self.progress.begin(&first);
                        effects.push(Effect::Persist(Bucket::DownloadProgress));
                        self.fetch_series(first, effects);
                    }
                }
            }
            CrawlMode::Update => {
                if self.progress.completed.is_empty() {
                    tracing::info!("No downloaded series to check for updates");
                    return;
                }
                tracing::info!(
                    "Checking {} series for new chapters",
                    self.progress.completed.len()
                );
                self.update_log = Some(UpdateLog::new(now));
                for series_url in self.progress.completed.clone() {
                    self.fetch_series(series_url, effects);
                }
            }
        }
    }

    fn on_listing(
        &mut self,
        page: u32,
        series: Vec<String>,
        has_next: bool,
        now: DateTime<Utc>,
        effects: &mut Vec<Effect>,
    ) {
        let found = series.len();
        let added = self.series_cache.merge(series, now);
        tracing::info!(
            page,
            "Listing page {}: {} series found, {} new",
            page,
            found,
            added.len()
        );
        for record in &added {
            tracing::debug!(series = %record.url, "Discovered series");
        }
        if !added.is_empty() {
            effects.push(Effect::Persist(Bucket::SeriesCache));
        }

        if has_next {
            self.fetch_listing(page + 1, effects);
        } else {
            tracing::info!(
                "Discovery complete; {} series in cache",
                self.series_cache.len()
            );
        }
    }

    fn on_series(
        &mut self,
        series_url: String,
        title: String,
        units: Vec<ChapterUnit>,
        downloaded: &BTreeSet<ChapterNumber>,
        now: DateTime<Utc>,
        effects: &mut Vec<Effect>,
    ) {
        let total = units.len();
        let pending = pending_units(units, downloaded);

        if self.mode == CrawlMode::Update {
            if pending.is_empty() {
                tracing::info!(series = %title, "No new chapters");
                return;
            }
            tracing::info!(series = %title, "{} new chapter(s)", pending.len());
            if let Some(log) = self.update_log.as_mut() {
                log.updates.push(UpdateEntry {
                    series: title.clone(),
                    url: series_url.clone(),
                    new_chapters: pending.len(),
                    timestamp: now,
                });
                effects.push(Effect::WriteUpdateLog);
            }
            self.traverse(
                UnitCursor {
                    series_url,
                    series_title: title,
                    units: pending,
                    index: 0,
                },
                effects,
            );
            return;
        }

        if total == 0 {
            tracing::warn!(
                series = %series_url,
                "Series page has no chapter links; leaving it uncompleted"
            );
            self.next_series(&series_url, effects);
            return;
        }

        if pending.is_empty() {
            tracing::info!(series = %title, "All {} chapter(s) already downloaded", total);
            self.complete_series(&series_url, effects);
            return;
        }

        tracing::info!(
            series = %title,
            "{} of {} chapter(s) to download",
            pending.len(),
            total
        );
        self.traverse(
            UnitCursor {
                series_url,
                series_title: title,
                units: pending,
                index: 0,
            },
            effects,
        );
    }

    fn on_unit(&mut self, cursor: UnitCursor, images: Vec<ImageRef>, effects: &mut Vec<Effect>) {
        if let Some(unit) = cursor.current() {
            if images.is_empty() {
                tracing::warn!(
                    series = %cursor.series_title,
                    chapter = %unit.number,
                    "No images found"
                );
            } else {
                self.stats.downloaded_chapters += 1;
                self.pending_downloads += 1;
                effects.push(Effect::Download(ChapterJob {
                    series_title: cursor.series_title.clone(),
                    chapter: unit.number.clone(),
                    source_url: unit.source_url.clone(),
                    images,
                }));
            }
        }
        self.traverse(cursor.advanced(), effects);
    }

    fn on_failure(
        &mut self,
        step: Step,
        url: String,
        error: String,
        now: DateTime<Utc>,
        effects: &mut Vec<Effect>,
    ) {
        let what = match &step {
            Step::SeriesListing { page } => format!("listing page {}", page),
            Step::SeriesPage { .. } => "series page".to_string(),
            Step::UnitPage(cursor) => match cursor.current() {
                Some(unit) => format!("chapter {} of {}", unit.number, cursor.series_title),
                None => "chapter page".to_string(),
            },
        };
        tracing::error!(url = %url, "Failed to fetch {}: {}", what, error);
        self.record_error(url, error, now, effects);
    }

    fn on_chapter(&mut self, outcome: ChapterOutcome, now: DateTime<Utc>, effects: &mut Vec<Effect>) {
        self.stats.total_bytes += outcome.bytes();
        for failure in outcome.failures() {
            self.record_error(failure.url.clone(), failure.error.clone(), now, effects);
        }
        match &outcome {
            ChapterOutcome::Stored(result) => tracing::info!(
                series = %result.series_title,
                chapter = %result.chapter_number,
                status = ?result.status,
                paths = result.paths.len(),
                checksum = %result.checksum,
                "Chapter stored"
            ),
            ChapterOutcome::Dropped(reason @ DropReason::NothingSaved { .. }) => {
                tracing::error!("Chapter dropped: {}", reason);
            }
            ChapterOutcome::Dropped(_) => {}
        }
    }

    /// Fetches the cursor's current unit, or finishes the series past the last one
    fn traverse(&mut self, cursor: UnitCursor, effects: &mut Vec<Effect>) {
        if let Some(unit) = cursor.current() {
            let url = unit.source_url.clone();
            self.phase = Phase::UnitPage;
            self.fetch(url, Step::UnitPage(cursor), effects);
            return;
        }

        if self.mode == CrawlMode::Update {
            tracing::info!(series = %cursor.series_title, "New chapters fetched");
            return;
        }

        tracing::info!(series = %cursor.series_title, "Series complete");
        self.complete_series(&cursor.series_url, effects);
    }

    fn complete_series(&mut self, series_url: &str, effects: &mut Vec<Effect>) {
        self.progress.mark_completed(series_url);
        effects.push(Effect::Persist(Bucket::DownloadProgress));
        self.stats.processed_series += 1;
        self.next_series(series_url, effects);
    }

    /// Moves the cursor to the next uncompleted series after `finished`
    fn next_series(&mut self, finished: &str, effects: &mut Vec<Effect>) {
        if self.mode != CrawlMode::Download {
            return;
        }
        self.phase = Phase::NextSeries;

        let Some(index) = self.series_cache.position(finished) else {
            tracing::error!(series = %finished, "Series not found in the series cache");
            return;
        };

        let next = self.series_cache.series[index + 1..]
            .iter()
            .find(|url| !self.progress.is_completed(url))
            .cloned();

        match next {
            Some(url) => {
                self.progress.begin(&url);
                effects.push(Effect::Persist(Bucket::DownloadProgress));
                self.fetch_series(url, effects);
            }
            None => tracing::info!("All series processed"),
        }
    }

    fn record_error(
        &mut self,
        url: String,
        error: String,
        now: DateTime<Utc>,
        effects: &mut Vec<Effect>,
    ) {
        self.stats.failed_downloads += 1;
        effects.push(Effect::RecordError(ErrorRecord {
            url,
            error,
            timestamp: now,
        }));
    }

    fn fetch_listing(&mut self, page: u32, effects: &mut Vec<Effect>) {
        self.phase = Phase::SeriesListing;
        let url = self.catalog.listing_url(page);
        self.fetch(url, Step::SeriesListing { page }, effects);
    }

    fn fetch_series(&mut self, series_url: String, effects: &mut Vec<Effect>) {
        self.phase = Phase::SeriesPage;
        self.fetch(
            series_url.clone(),
            Step::SeriesPage { series_url },
            effects,
        );
    }

    fn fetch(&mut self, url: String, step: Step, effects: &mut Vec<Effect>) {
        self.pending_fetches += 1;
        effects.push(Effect::Fetch(FetchRequest { url, step }));
    }

    fn fetch_done(&mut self) {
        self.pending_fetches = self.pending_fetches.saturating_sub(1);
    }
}
