//! File naming for downloaded chapter images

use crate::url::fingerprint;
use sha2::{Digest, Sha256};

/// Extensions accepted straight from an image URL
const URL_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "webp"];

/// Extension used when nothing better is known
pub const DEFAULT_EXTENSION: &str = "jpg";

/// Replaces every character outside alphanumerics, space, `-` and `_` with `_`
pub fn sanitize_title(title: &str) -> String {
    title
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, ' ' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Maps an image Content-Type to an extension
///
/// Parameters are ignored. Returns None for anything that is not a known
/// image type, so callers fall back to the URL.
pub fn extension_from_content_type(content_type: &str) -> Option<&'static str> {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();

    match mime.as_str() {
        "image/jpeg" | "image/jpg" | "image/pjpeg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/webp" => Some("webp"),
        "image/gif" => Some("gif"),
        "image/avif" => Some("avif"),
        "image/bmp" => Some("bmp"),
        "image/svg+xml" => Some("svg"),
        _ => None,
    }
}

/// Takes the extension of the URL's last path segment if it is a common image type
pub fn extension_from_url(url: &str) -> Option<&'static str> {
    let parsed = ::url::Url::parse(url).ok()?;
    let last_segment = parsed.path_segments()?.next_back()?;
    let (_, ext) = last_segment.rsplit_once('.')?;
    let ext = ext.to_ascii_lowercase();
    URL_EXTENSIONS.iter().copied().find(|known| *known == ext)
}

/// Content type first, then URL, then `jpg`
pub fn resolve_extension(content_type: Option<&str>, url: &str) -> &'static str {
    content_type
        .and_then(extension_from_content_type)
        .or_else(|| extension_from_url(url))
        .unwrap_or(DEFAULT_EXTENSION)
}

/// Directory of one chapter relative to the downloads root
///
/// Returns None when the title is blank or the chapter label is empty.
pub fn chapter_dir(series_title: &str, chapter: &str) -> Option<String> {
    let title = series_title.trim();
    let chapter = chapter.trim();
    if title.is_empty() || chapter.is_empty() {
        return None;
    }
    Some(format!("{}/Capitulo_{}", sanitize_title(title), chapter))
}

/// Relative path of one page: `<title>/Capitulo_<n>/pagina_<page:03>.<ext>`
///
/// Falls back to `error/image_<fingerprint>.jpg` when no chapter directory
/// can be derived.
pub fn image_path(series_title: &str, chapter: &str, page: u32, ext: &str, url: &str) -> String {
    match chapter_dir(series_title, chapter) {
        Some(dir) => format!("{}/pagina_{:03}.{}", dir, page, ext),
        None => {
            tracing::error!(
                url,
                "Cannot derive a path for {:?} chapter {:?}; using the error directory",
                series_title,
                chapter
            );
            format!("error/image_{}.{}", fingerprint(url), DEFAULT_EXTENSION)
        }
    }
}

/// SHA-256 over the saved paths, independent of their order
pub fn chapter_checksum(paths: &[String]) -> String {
    let mut sorted: Vec<&str> = paths.iter().map(String::as_str).collect();
    sorted.sort_unstable();

    let mut hasher = Sha256::new();
    for path in sorted {
        hasher.update(path.as_bytes());
    }
    hex::encode(hasher.finalize())
}
