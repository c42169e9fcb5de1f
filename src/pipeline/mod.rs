//! Media download pipeline
//!
//! Turns a chapter's image list into deduplicated fetches, names the stored
//! files and summarizes the chapter with a checksum over the saved paths.

mod media;
mod paths;

pub use media::{
    ChapterJob, ChapterOutcome, ChapterResult, ChapterStatus, DropReason, ImageFailure,
    MediaPipeline,
};
pub use paths::{
    chapter_checksum, chapter_dir, extension_from_content_type, extension_from_url, image_path,
    resolve_extension, sanitize_title, DEFAULT_EXTENSION,
};
