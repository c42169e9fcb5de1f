//! Chapter image downloads
//!
//! A [`ChapterJob`] is turned into one fetch per distinct image URL. Results
//! are written under the downloads root and summarized as a
//! [`ChapterOutcome`]. Image URLs are deduplicated by fingerprint for the
//! lifetime of the pipeline: a URL fetched once is never fetched again, its
//! stored file is copied to the new page path instead.

use crate::crawler::Fetcher;
use crate::pipeline::paths::{chapter_checksum, image_path, resolve_extension};
use crate::state::{ChapterNumber, ImageRef};
use crate::url::fingerprint;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::sync::OnceCell;
use tokio::task::JoinSet;

/// One chapter's worth of images to download
#[derive(Debug, Clone, PartialEq)]
pub struct ChapterJob {
    pub series_title: String,
    pub chapter: ChapterNumber,
    pub source_url: String,
    pub images: Vec<ImageRef>,
}

/// How complete a chapter download is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChapterStatus {
    Downloaded,
    Partial,
    Failed,
}

impl ChapterStatus {
    pub fn from_counts(saved: usize, failed: usize) -> Self {
        match (saved, failed) {
            (0, _) => Self::Failed,
            (_, 0) => Self::Downloaded,
            _ => Self::Partial,
        }
    }
}

/// An image that could not be fetched or written
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageFailure {
    pub url: String,
    pub page: u32,
    pub error: String,
}

/// Summary of a chapter with at least one saved image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChapterResult {
    pub series_title: String,
    pub chapter_number: String,
    pub source_url: String,
    /// Saved files relative to the downloads root, in page order
    pub paths: Vec<String>,
    pub status: ChapterStatus,
    pub checksum: String,
    pub timestamp: DateTime<Utc>,
    /// Bytes fetched from the network (copies of deduplicated images excluded)
    pub bytes: u64,
    #[serde(skip)]
    pub failures: Vec<ImageFailure>,
}

/// Why a chapter produced no result
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    /// The job had no images; nothing was fetched
    NoImages,
    /// Every image failed
    NothingSaved { failures: Vec<ImageFailure> },
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoImages => write!(f, "chapter has no images"),
            Self::NothingSaved { failures } => {
                write!(f, "none of {} image(s) could be saved", failures.len())
            }
        }
    }
}

/// What the pipeline hands back to the orchestrator
#[derive(Debug, Clone, PartialEq)]
pub enum ChapterOutcome {
    Stored(ChapterResult),
    Dropped(DropReason),
}

impl ChapterOutcome {
    /// Image failures carried by either variant
    pub fn failures(&self) -> &[ImageFailure] {
        match self {
            Self::Stored(result) => &result.failures,
            Self::Dropped(DropReason::NothingSaved { failures }) => failures,
            Self::Dropped(DropReason::NoImages) => &[],
        }
    }

    pub fn bytes(&self) -> u64 {
        match self {
            Self::Stored(result) => result.bytes,
            Self::Dropped(_) => 0,
        }
    }
}

/// A file written by the first fetch of a URL
#[derive(Debug, Clone)]
struct StoredImage {
    /// Relative path under the downloads root
    path: String,
    ext: &'static str,
    /// Chapter source URL and page of the image that triggered the fetch
    owner: (String, u32),
    bytes: u64,
}

/// Result of one image of a chapter
struct PageResult {
    page: u32,
    saved: Result<(String, u64), ImageFailure>,
}

/// Downloads chapter images and deduplicates them across the run
#[derive(Debug)]
pub struct MediaPipeline {
    fetcher: Fetcher,
    downloads_dir: PathBuf,
    seen: Mutex<HashMap<String, Arc<OnceCell<StoredImage>>>>,
}

impl MediaPipeline {
    pub fn new(fetcher: Fetcher, downloads_dir: impl Into<PathBuf>) -> Self {
        Self {
            fetcher,
            downloads_dir: downloads_dir.into(),
            seen: Mutex::new(HashMap::new()),
        }
    }

    /// Number of distinct image URLs seen so far
    pub fn fingerprints(&self) -> usize {
        self.lock_seen().len()
    }

    /// Downloads every image of a chapter
    ///
    /// A job with no images is dropped before any request is made.
    pub async fn process(self: &Arc<Self>, job: ChapterJob) -> ChapterOutcome {
        if job.images.is_empty() {
            tracing::warn!(
                series = %job.series_title,
                chapter = %job.chapter,
                "Dropping chapter with no images"
            );
            return ChapterOutcome::Dropped(DropReason::NoImages);
        }

        let job = Arc::new(job);
        let mut tasks = JoinSet::new();
        for image in job.images.iter().cloned() {
            let pipeline = Arc::clone(self);
            let job = Arc::clone(&job);
            tasks.spawn(async move { pipeline.save_image(&job, image).await });
        }

        let mut pages = Vec::with_capacity(job.images.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(page) => pages.push(page),
                Err(e) => tracing::error!("Image task failed: {}", e),
            }
        }
        pages.sort_by_key(|p| p.page);

        let mut paths = Vec::new();
        let mut failures = Vec::new();
        let mut bytes = 0;
        for page in pages {
            match page.saved {
                Ok((path, fetched)) => {
                    paths.push(path);
                    bytes += fetched;
                }
                Err(failure) => failures.push(failure),
            }
        }
        // a panicked task leaves no PageResult behind; count it as a failure
        let missing = job.images.len() - paths.len() - failures.len();
        let failed = failures.len() + missing;

        let status = ChapterStatus::from_counts(paths.len(), failed);
        if status == ChapterStatus::Failed {
            tracing::error!(
                series = %job.series_title,
                chapter = %job.chapter,
                "No images saved; dropping chapter"
            );
            return ChapterOutcome::Dropped(DropReason::NothingSaved { failures });
        }
        if failed > 0 {
            tracing::error!(
                series = %job.series_title,
                chapter = %job.chapter,
                failed,
                "{} of {} image(s) failed",
                failed,
                job.images.len()
            );
        }

        tracing::info!(
            series = %job.series_title,
            chapter = %job.chapter,
            "Saved {} image(s)",
            paths.len()
        );

        ChapterOutcome::Stored(ChapterResult {
            series_title: job.series_title.clone(),
            chapter_number: job.chapter.label().to_string(),
            source_url: job.source_url.clone(),
            checksum: chapter_checksum(&paths),
            paths,
            status,
            timestamp: Utc::now(),
            bytes,
            failures,
        })
    }

    async fn save_image(&self, job: &ChapterJob, image: ImageRef) -> PageResult {
        let page = image.page;
        let cell = self.cell_for(&fingerprint(&image.url));
        let owner = (job.source_url.clone(), page);

        let stored = cell
            .get_or_try_init(|| self.fetch_and_store(job, &image, owner.clone()))
            .await;

        let saved = match stored {
            Ok(stored) if stored.owner == owner => Ok((stored.path.clone(), stored.bytes)),
            Ok(stored) => self.copy_stored(job, &image, stored).await.map(|p| (p, 0)),
            Err(error) => Err(ImageFailure {
                url: image.url.clone(),
                page,
                error,
            }),
        };

        PageResult { page, saved }
    }

    async fn fetch_and_store(
        &self,
        job: &ChapterJob,
        image: &ImageRef,
        owner: (String, u32),
    ) -> Result<StoredImage, String> {
        let response = self
            .fetcher
            .fetch_image(&image.url)
            .await
            .map_err(|e| e.to_string())?;

        let ext = resolve_extension(response.content_type.as_deref(), &image.url);
        let path = image_path(&job.series_title, job.chapter.label(), image.page, ext, &image.url);
        self.write(&path, &response.body).await?;

        tracing::debug!(url = %image.url, path = %path, "Saved image");
        Ok(StoredImage {
            path,
            ext,
            owner,
            bytes: response.body.len() as u64,
        })
    }

    async fn copy_stored(
        &self,
        job: &ChapterJob,
        image: &ImageRef,
        stored: &StoredImage,
    ) -> Result<String, ImageFailure> {
        let path = image_path(
            &job.series_title,
            job.chapter.label(),
            image.page,
            stored.ext,
            &image.url,
        );
        if path == stored.path {
            return Ok(path);
        }

        let failure = |error: String| ImageFailure {
            url: image.url.clone(),
            page: image.page,
            error,
        };

        let target = self.absolute(&path);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| failure(e.to_string()))?;
        }
        tokio::fs::copy(self.absolute(&stored.path), &target)
            .await
            .map_err(|e| failure(e.to_string()))?;

        tracing::debug!(url = %image.url, path = %path, "Reused previously fetched image");
        Ok(path)
    }

    async fn write(&self, relative: &str, body: &[u8]) -> Result<(), String> {
        let target = self.absolute(relative);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| format!("create {}: {}", parent.display(), e))?;
        }
        tokio::fs::write(&target, body)
            .await
            .map_err(|e| format!("write {}: {}", target.display(), e))
    }

    fn absolute(&self, relative: &str) -> PathBuf {
        relative
            .split('/')
            .fold(self.downloads_dir.clone(), |path, segment| path.join(segment))
    }

    fn cell_for(&self, fingerprint: &str) -> Arc<OnceCell<StoredImage>> {
        Arc::clone(
            self.lock_seen()
                .entry(fingerprint.to_string())
                .or_insert_with(|| Arc::new(OnceCell::new())),
        )
    }

    fn lock_seen(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<OnceCell<StoredImage>>>> {
        match self.seen.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
