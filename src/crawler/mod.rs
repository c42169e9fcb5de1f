//! Crawler module for catalog traversal
//!
//! This module contains the core crawling logic, including:
//! - HTTP fetching with retry and rate-limit handling
//! - Link extraction and chapter ordering
//! - Per-host request scheduling
//! - The orchestration state machine and its async driver

mod coordinator;
mod fetcher;
mod machine;
mod parser;
mod retry;
mod scheduler;

pub use coordinator::Coordinator;
pub use fetcher::{
    build_http_client, FetchError, FetchedResponse, Fetcher, RequestKind, IMAGE_ACCEPT,
    PAGE_ACCEPT,
};
pub use machine::{
    transition, Bucket, CrawlMode, Effect, Event, FetchRequest, OrchestratorState, Phase, Step,
    UnitCursor,
};
pub use parser::{
    downloaded_chapters, order_units, pending_units, unit_number, Extractor, ImageSlots,
    ListingPage, SeriesPage,
};
pub use retry::{describe, FailureType, ResponseOutcome, RetryDecision, RetryPolicy};
pub use scheduler::{RequestPermit, Scheduler};
