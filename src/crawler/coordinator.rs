//! Crawler coordinator - drives the orchestration state machine
//!
//! The coordinator owns every side effect of a run: it loads the persisted
//! buckets, feeds events into [`OrchestratorState`], and carries out the
//! effects it returns. Page fetches and chapter downloads run as tasks on a
//! [`JoinSet`]; pages are parsed inside their task, so the control loop only
//! ever sees finished events.

use crate::config::{validate, Config};
use crate::crawler::fetcher::FetchedResponse;
use crate::crawler::machine::{
    Bucket, CrawlMode, Effect, Event, FetchRequest, OrchestratorState, Step,
};
use crate::crawler::parser::{downloaded_chapters, Extractor};
use crate::crawler::Fetcher;
use crate::output::{log_report, FinishReason, RunReport};
use crate::pipeline::{sanitize_title, MediaPipeline};
use crate::state::{DownloadProgress, SeriesCache};
use crate::storage::{
    append_error, write_run_report, write_update_log, ProgressStore, DOWNLOAD_PROGRESS,
    SERIES_CACHE,
};
use crate::HarvestError;
use chrono::Utc;
use std::collections::BTreeSet;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinSet;
use url::Url;

/// Main crawler coordinator structure
pub struct Coordinator {
    store: ProgressStore,
    fetcher: Fetcher,
    extractor: Arc<Extractor>,
    pipeline: Arc<MediaPipeline>,
    downloads_dir: PathBuf,
    state: OrchestratorState,
}

impl Coordinator {
    /// Creates a coordinator and loads the persisted buckets
    ///
    /// # Arguments
    ///
    /// * `config` - The crawler configuration
    /// * `mode` - Operating mode of the run
    /// * `start_page` - First listing page (discover mode only)
    pub fn new(config: Config, mode: CrawlMode, start_page: u32) -> Result<Self, HarvestError> {
        validate(&config)?;

        let store = ProgressStore::open(&config.output.cache_dir)?;
        let series_cache: SeriesCache = store.load(SERIES_CACHE, SeriesCache::default());
        let progress: DownloadProgress = store.load(DOWNLOAD_PROGRESS, DownloadProgress::default());
        tracing::info!(
            "Loaded {} cached series, {} completed",
            series_cache.len(),
            progress.completed.len()
        );

        let fetcher = Fetcher::new(&config)?;
        let extractor = Arc::new(Extractor::new(&config.catalog)?);
        let downloads_dir = PathBuf::from(&config.output.downloads_dir);
        let pipeline = Arc::new(MediaPipeline::new(fetcher.clone(), downloads_dir.clone()));

        let state = OrchestratorState::new(
            mode,
            config.catalog.clone(),
            start_page,
            series_cache,
            progress,
            Utc::now(),
        );

        Ok(Self {
            store,
            fetcher,
            extractor,
            pipeline,
            downloads_dir,
            state,
        })
    }

    pub fn state(&self) -> &OrchestratorState {
        &self.state
    }

    /// Runs until the crawl has nothing left to do
    pub async fn run(&mut self) -> Result<RunReport, HarvestError> {
        self.run_until(std::future::pending()).await
    }

    /// Runs until the crawl finishes or `shutdown` resolves
    ///
    /// On shutdown every in-flight task is aborted; the buckets and the run
    /// report are written either way.
    pub async fn run_until<F>(&mut self, shutdown: F) -> Result<RunReport, HarvestError>
    where
        F: Future<Output = ()>,
    {
        tracing::info!("Starting {} run", self.state.mode());
        let mut tasks: JoinSet<Event> = JoinSet::new();

        let effects = self.state.handle(Event::Start, Utc::now());
        self.apply(effects, &mut tasks);

        tokio::pin!(shutdown);
        let reason = loop {
            if self.state.is_done() {
                break FinishReason::Finished;
            }

            tokio::select! {
                _ = &mut shutdown => {
                    tracing::warn!(
                        "Shutdown requested; abandoning {} fetch(es) and {} download(s)",
                        self.state.pending_fetches(),
                        self.state.pending_downloads()
                    );
                    tasks.abort_all();
                    break FinishReason::Shutdown;
                }
                joined = tasks.join_next() => match joined {
                    Some(Ok(event)) => {
                        let effects = self.state.handle(event, Utc::now());
                        self.apply(effects, &mut tasks);
                    }
                    Some(Err(e)) => {
                        tracing::error!("Crawl task failed: {}", e);
                    }
                    None => {
                        tracing::warn!("No tasks left but the crawl is not done; stopping");
                        break FinishReason::Finished;
                    }
                },
            }
        };

        self.finalize(reason)
    }

    fn apply(&self, effects: Vec<Effect>, tasks: &mut JoinSet<Event>) {
        for effect in effects {
            match effect {
                Effect::Fetch(request) => self.spawn_fetch(request, tasks),
                Effect::Download(job) => {
                    let pipeline = Arc::clone(&self.pipeline);
                    tasks.spawn(async move { Event::ChapterFinished(pipeline.process(job).await) });
                }
                Effect::Persist(bucket) => self.persist(bucket),
                Effect::WriteUpdateLog => {
                    if let Some(log) = self.state.update_log() {
                        if let Err(e) = write_update_log(&self.store, log) {
                            tracing::error!("Failed to write update log: {}", e);
                        }
                    }
                }
                Effect::RecordError(record) => {
                    if let Err(e) = append_error(&self.store, record) {
                        tracing::error!("Failed to append to error log: {}", e);
                    }
                }
            }
        }
    }

    fn spawn_fetch(&self, request: FetchRequest, tasks: &mut JoinSet<Event>) {
        let fetcher = self.fetcher.clone();
        let extractor = Arc::clone(&self.extractor);
        let downloads_dir = self.downloads_dir.clone();

        tasks.spawn(async move {
            match fetcher.fetch_page(&request.url).await {
                Ok(response) => page_event(&extractor, &downloads_dir, request, &response),
                Err(e) => Event::FetchFailed {
                    step: request.step,
                    url: request.url,
                    error: e.to_string(),
                },
            }
        });
    }

    fn persist(&self, bucket: Bucket) {
        let result = match bucket {
            Bucket::SeriesCache => self.store.save(SERIES_CACHE, self.state.series_cache()),
            Bucket::DownloadProgress => self.store.save(DOWNLOAD_PROGRESS, self.state.progress()),
        };
        if let Err(e) = result {
            tracing::error!("Failed to persist {:?}: {}", bucket, e);
        }
    }

    fn finalize(&self, reason: FinishReason) -> Result<RunReport, HarvestError> {
        self.store.save(SERIES_CACHE, self.state.series_cache())?;
        self.store
            .save(DOWNLOAD_PROGRESS, self.state.progress())?;

        let report = RunReport::build(self.state.mode(), self.state.stats(), reason, Utc::now());
        match write_run_report(&self.store, &report) {
            Ok(bucket) => tracing::debug!("Run report written to {}", bucket),
            Err(e) => tracing::error!("Failed to write run report: {}", e),
        }
        log_report(&report);
        Ok(report)
    }
}

/// Parses a fetched page into the event for its step
fn page_event(
    extractor: &Extractor,
    downloads_dir: &Path,
    request: FetchRequest,
    response: &FetchedResponse,
) -> Event {
    let page_url = match Url::parse(&response.final_url).or_else(|_| Url::parse(&request.url)) {
        Ok(url) => url,
        Err(e) => {
            return Event::FetchFailed {
                step: request.step,
                url: request.url,
                error: format!("invalid page URL: {}", e),
            }
        }
    };
    let html = response.text();

    match request.step {
        Step::SeriesListing { page } => {
            let listing = extractor.parse_listing(&html);
            Event::ListingLoaded {
                page,
                series: listing.series,
                has_next: listing.has_next,
            }
        }
        Step::SeriesPage { series_url } => {
            let series = extractor.parse_series(&html, &page_url);
            let title = series.title.trim().to_string();
            let downloaded = if title.is_empty() {
                BTreeSet::new()
            } else {
                downloaded_chapters(&downloads_dir.join(sanitize_title(&title)))
            };
            Event::SeriesLoaded {
                series_url,
                title,
                units: series.units,
                downloaded,
            }
        }
        Step::UnitPage(cursor) => Event::UnitLoaded {
            images: extractor.parse_unit(&html, &page_url),
            cursor,
        },
    }
}
