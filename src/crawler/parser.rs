//! HTML extraction for listing, series and chapter pages
//!
//! This module handles parsing fetched pages to extract:
//! - Series links and the next-page marker from listing pages
//! - The series title and its ordered chapter/volume links
//! - The chapter's image list, probed slot by slot
//!
//! It also scans the downloads directory for chapters that are already on disk.

use crate::config::CatalogConfig;
use crate::state::{ChapterNumber, ChapterUnit, ImageRef};
use crate::ConfigError;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::collections::{BTreeSet, HashSet};
use std::path::Path;
use std::sync::OnceLock;
use url::Url;

/// Path fragments that mark a chapter or volume link rather than a series link
const UNIT_SEGMENTS: [&str; 2] = ["/capitulo-", "/vol-"];

static UNIT_RE: OnceLock<Regex> = OnceLock::new();
static CHAPTER_DIR_RE: OnceLock<Regex> = OnceLock::new();

fn unit_re() -> &'static Regex {
    UNIT_RE.get_or_init(|| {
        Regex::new(r"(?i)^(?:capitulo|vol)-(\d+(?:\.\d+)?)(?:[.\-_]|$)").expect("compile UNIT_RE")
    })
}

fn chapter_dir_re() -> &'static Regex {
    CHAPTER_DIR_RE
        .get_or_init(|| Regex::new(r"^Capitulo_(\d+(?:\.\d+)?)").expect("compile CHAPTER_DIR_RE"))
}

/// What a listing page yields
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingPage {
    /// Absolute series URLs in first-encounter order, without duplicates
    pub series: Vec<String>,
    pub has_next: bool,
}

/// What a series page yields
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesPage {
    pub title: String,
    /// Every chapter/volume link, ordered by number
    pub units: Vec<ChapterUnit>,
}

/// Page extractor built from the catalog layout
#[derive(Debug, Clone)]
pub struct Extractor {
    base_url: Url,
    series_segment: String,
    listing_item: Selector,
    next_page: Selector,
    title: Selector,
    anchors: Selector,
    image_id_prefix: String,
    max_image_slots: u32,
}

impl Extractor {
    pub fn new(catalog: &CatalogConfig) -> Result<Self, ConfigError> {
        let base_url = Url::parse(&catalog.base_url)
            .map_err(|e| ConfigError::InvalidUrl(format!("{}: {}", catalog.base_url, e)))?;

        Ok(Self {
            base_url,
            series_segment: catalog.series_segment.clone(),
            listing_item: selector(&catalog.listing_item_selector)?,
            next_page: selector(&catalog.next_page_selector)?,
            title: selector(&catalog.title_selector)?,
            anchors: selector("a[href]")?,
            image_id_prefix: catalog.image_id_prefix.clone(),
            max_image_slots: catalog.max_image_slots,
        })
    }

    /// Extracts series links and the next-page marker from a listing page
    pub fn parse_listing(&self, html: &str) -> ListingPage {
        let document = Html::parse_document(html);

        let mut seen = HashSet::new();
        let mut series = Vec::new();
        for element in document.select(&self.listing_item) {
            let Some(href) = element.value().attr("href") else {
                continue;
            };
            let href = href.trim();
            if !href.contains(&self.series_segment)
                || UNIT_SEGMENTS.iter().any(|segment| href.contains(segment))
            {
                continue;
            }
            let Ok(absolute) = self.base_url.join(href) else {
                tracing::debug!("Skipping unresolvable series link: {}", href);
                continue;
            };
            let absolute = absolute.to_string();
            if seen.insert(absolute.clone()) {
                series.push(absolute);
            }
        }

        let has_next = document.select(&self.next_page).next().is_some();
        ListingPage { series, has_next }
    }

    /// Extracts the title and ordered unit list from a series page
    pub fn parse_series(&self, html: &str, page_url: &Url) -> SeriesPage {
        let document = Html::parse_document(html);

        let title = document
            .select(&self.title)
            .next()
            .map(|element| element.text().collect::<String>().trim().to_string())
            .unwrap_or_default();

        let links = document
            .select(&self.anchors)
            .filter_map(|element| element.value().attr("href"))
            .filter_map(|href| page_url.join(href.trim()).ok())
            .filter(|url| url.path() != page_url.path())
            .map(|url| url.to_string())
            .filter(|link| unit_number(link).is_some());

        SeriesPage {
            title,
            units: order_units(links),
        }
    }

    /// Extracts the image list from a chapter page
    pub fn parse_unit(&self, html: &str, page_url: &Url) -> Vec<ImageRef> {
        let document = Html::parse_document(html);
        ImageSlots::new(
            &document,
            page_url,
            &self.image_id_prefix,
            self.max_image_slots,
        )
        .collect()
    }
}

fn selector(css: &str) -> Result<Selector, ConfigError> {
    Selector::parse(css).map_err(|e| ConfigError::InvalidSelector(format!("{}: {:?}", css, e)))
}

/// Parses the chapter/volume number out of a link
///
/// Only whole path segments starting with `capitulo-<n>` or `vol-<n>` count;
/// when several do, the last one wins. Query and fragment are ignored.
pub fn unit_number(link: &str) -> Option<ChapterNumber> {
    let path = match Url::parse(link) {
        Ok(url) => url.path().to_string(),
        Err(_) => link
            .split(|c| c == '?' || c == '#')
            .next()
            .unwrap_or_default()
            .to_string(),
    };

    path.split('/')
        .filter_map(|segment| unit_re().captures(segment))
        .last()
        .and_then(|caps| caps.get(1))
        .and_then(|m| ChapterNumber::parse(m.as_str()))
}

/// Dedupes unit links by URL and orders them by number
///
/// Links without a parseable number are dropped. The sort is stable, so
/// links with equal numbers keep their page order.
pub fn order_units<I>(links: I) -> Vec<ChapterUnit>
where
    I: IntoIterator<Item = String>,
{
    let mut seen = HashSet::new();
    let mut units: Vec<(ChapterNumber, String)> = links
        .into_iter()
        .filter(|link| seen.insert(link.clone()))
        .filter_map(|link| unit_number(&link).map(|number| (number, link)))
        .collect();

    units.sort_by(|a, b| a.0.cmp(&b.0));

    units
        .into_iter()
        .enumerate()
        .map(|(index, (number, source_url))| ChapterUnit {
            number,
            source_url,
            index,
        })
        .collect()
}

/// Chapter numbers that already have a `Capitulo_<n>` directory under `series_dir`
///
/// A missing directory means nothing is downloaded yet.
pub fn downloaded_chapters(series_dir: &Path) -> BTreeSet<ChapterNumber> {
    let mut downloaded = BTreeSet::new();

    let entries = match std::fs::read_dir(series_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return downloaded,
        Err(e) => {
            tracing::warn!("Cannot scan {}: {}", series_dir.display(), e);
            return downloaded;
        }
    };

    for entry in entries.flatten() {
        if !entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
            continue;
        }
        let name = entry.file_name();
        let name = name.to_string_lossy();
        let number = chapter_dir_re()
            .captures(&name)
            .and_then(|caps| caps.get(1))
            .and_then(|m| ChapterNumber::parse(m.as_str()));
        match number {
            Some(number) => {
                downloaded.insert(number);
            }
            None => tracing::trace!("Ignoring directory {}", name),
        }
    }

    downloaded
}

/// Drops units already on disk and renumbers the rest from 0
pub fn pending_units(
    units: Vec<ChapterUnit>,
    downloaded: &BTreeSet<ChapterNumber>,
) -> Vec<ChapterUnit> {
    units
        .into_iter()
        .filter(|unit| !downloaded.contains(&unit.number))
        .enumerate()
        .map(|(index, unit)| ChapterUnit { index, ..unit })
        .collect()
}

/// Lazy walk over the numbered image slots of a chapter page
///
/// Slot `i` is looked up as `#<prefix>NN` (zero-padded) and then `#<prefix>N`.
/// The walk ends at the first slot with neither element, or after `max`
/// slots. A slot whose element has no `src`/`data-src` is skipped without
/// using up a page number.
pub struct ImageSlots<'a> {
    document: &'a Html,
    base: &'a Url,
    prefix: &'a str,
    slot: u32,
    max: u32,
    page: u32,
    done: bool,
}

impl<'a> ImageSlots<'a> {
    pub fn new(document: &'a Html, base: &'a Url, prefix: &'a str, max: u32) -> Self {
        Self {
            document,
            base,
            prefix,
            slot: 0,
            max,
            page: 0,
            done: false,
        }
    }

    fn find_slot(&self, slot: u32) -> Option<ElementRef<'a>> {
        let padded = format!("#{}{:02}", self.prefix, slot);
        let plain = format!("#{}{}", self.prefix, slot);
        [padded, plain].iter().find_map(|css| {
            let selector = Selector::parse(css).ok()?;
            self.document.select(&selector).next()
        })
    }
}

impl<'a> Iterator for ImageSlots<'a> {
    type Item = ImageRef;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            if self.slot >= self.max {
                self.done = true;
                break;
            }
            self.slot += 1;

            let Some(element) = self.find_slot(self.slot) else {
                self.done = true;
                break;
            };

            let src = element
                .value()
                .attr("src")
                .or_else(|| element.value().attr("data-src"))
                .map(str::trim)
                .filter(|s| !s.is_empty());

            let Some(url) = src.and_then(|src| self.base.join(src).ok()) else {
                continue;
            };

            self.page += 1;
            return Some(ImageRef {
                url: url.to_string(),
                page: self.page,
            });
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn extractor() -> Extractor {
        let catalog = CatalogConfig {
            base_url: "https://catalog.test/".to_string(),
            ..CatalogConfig::default()
        };
        Extractor::new(&catalog).unwrap()
    }

    fn page_url() -> Url {
        Url::parse("https://catalog.test/manga/some-series/").unwrap()
    }

    fn labels(units: &[ChapterUnit]) -> Vec<String> {
        units.iter().map(|u| u.number.label().to_string()).collect()
    }

    #[test]
    fn test_listing_links_filtered_and_deduped() {
        let html = r#"
            <div class="page-listing-item">
                <a href="/manga/beta/">Beta</a>
                <a href="/manga/alpha/">Alpha</a>
                <a href="/manga/beta/">Beta again</a>
                <a href="/manga/alpha/capitulo-1/">Chapter link</a>
                <a href="/manga/alpha/vol-2/">Volume link</a>
                <a href="/about/">About</a>
            </div>
            <a href="/manga/outside/">Not in a listing item</a>
        "#;
        let listing = extractor().parse_listing(html);
        assert_eq!(
            listing.series,
            vec![
                "https://catalog.test/manga/beta/".to_string(),
                "https://catalog.test/manga/alpha/".to_string(),
            ]
        );
        assert!(!listing.has_next);
    }

    #[test]
    fn test_listing_next_page_marker() {
        let html = r#"<div class="page-listing-item"></div><a class="nextpostslink" href="/manga/page/2/">»</a>"#;
        let listing = extractor().parse_listing(html);
        assert!(listing.series.is_empty());
        assert!(listing.has_next);
    }

    #[test]
    fn test_unit_ordering_is_numeric() {
        let units = order_units(vec![
            "capitulo-3.html".to_string(),
            "capitulo-10.html".to_string(),
            "vol-2.5.html".to_string(),
        ]);
        assert_eq!(labels(&units), vec!["2.5", "3", "10"]);
        assert_eq!(units[0].source_url, "vol-2.5.html");
        assert_eq!(
            units.iter().map(|u| u.index).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
    }

    #[test]
    fn test_unit_ordering_is_idempotent() {
        let once = order_units(vec![
            "/x/capitulo-7/".to_string(),
            "/x/CAPITULO-1/".to_string(),
            "/x/capitulo-7/".to_string(),
            "/x/capitulo-no-number/".to_string(),
            "/x/vol-4/".to_string(),
        ]);
        assert_eq!(labels(&once), vec!["1", "4", "7"]);

        let twice = order_units(once.iter().map(|u| u.source_url.clone()));
        assert_eq!(once, twice);
    }

    #[test]
    fn test_series_page_title_and_units() {
        let html = r#"
            <h1>  The Series  </h1>
            <ul>
                <li><a href="/manga/some-series/capitulo-2/">2</a></li>
                <li><a href="/manga/some-series/capitulo-1/">1</a></li>
                <li><a href="https://catalog.test/manga/some-series/capitulo-1/">dup</a></li>
                <li><a href="/manga/other/">Related series</a></li>
            </ul>
        "#;
        let page = extractor().parse_series(html, &page_url());
        assert_eq!(page.title, "The Series");
        assert_eq!(labels(&page.units), vec!["1", "2"]);
        assert_eq!(
            page.units[0].source_url,
            "https://catalog.test/manga/some-series/capitulo-1/"
        );
    }

    #[test]
    fn test_volume_slug_does_not_leak_into_chapters() {
        let html = r#"
            <h1>Overlord Vol 3</h1>
            <a href="/manga/overlord-vol-3/">Overlord</a>
            <a href="/manga/overlord-vol-3/capitulo-2/">2</a>
            <a href="/manga/overlord-vol-3/capitulo-1/">1</a>
        "#;
        let page_url = Url::parse("https://catalog.test/manga/overlord-vol-3/").unwrap();
        let page = extractor().parse_series(html, &page_url);
        assert_eq!(labels(&page.units), vec!["1", "2"]);
        assert_eq!(
            page.units[1].source_url,
            "https://catalog.test/manga/overlord-vol-3/capitulo-2/"
        );
    }

    #[test]
    fn test_unit_number_uses_last_unit_segment() {
        let number = |link: &str| unit_number(link).map(|n| n.label().to_string());
        assert_eq!(
            number("https://catalog.test/manga/vol-3-special/capitulo-7/?style=list"),
            Some("7".to_string())
        );
        assert_eq!(number("/manga/overlord-vol-3/"), None);
        assert_eq!(number("/manga/x/capitulo-12.5/#top"), Some("12.5".to_string()));
        assert_eq!(number("/manga/x/?page=capitulo-4"), None);
    }

    #[test]
    fn test_series_page_without_units() {
        let page = extractor().parse_series("<h1>Empty</h1>", &page_url());
        assert_eq!(page.title, "Empty");
        assert!(page.units.is_empty());
    }

    #[test]
    fn test_images_padded_and_plain_ids() {
        let html = r#"
            <img id="image-01" src="/img/1.jpg">
            <img id="image-2" src="https://cdn.test/2.png">
            <img id="image-03" data-src=" /img/3.webp ">
            <img id="image-05" src="/img/5.jpg">
        "#;
        let images = extractor().parse_unit(html, &page_url());
        assert_eq!(
            images,
            vec![
                ImageRef {
                    url: "https://catalog.test/img/1.jpg".to_string(),
                    page: 1
                },
                ImageRef {
                    url: "https://cdn.test/2.png".to_string(),
                    page: 2
                },
                ImageRef {
                    url: "https://catalog.test/img/3.webp".to_string(),
                    page: 3
                },
            ]
        );
    }

    #[test]
    fn test_slot_without_src_does_not_consume_page() {
        let html = r#"
            <img id="image-01" src="/a.jpg">
            <div id="image-02"></div>
            <img id="image-03" src="/c.jpg">
        "#;
        let images = extractor().parse_unit(html, &page_url());
        assert_eq!(images.len(), 2);
        assert_eq!(images[1].page, 2);
        assert_eq!(images[1].url, "https://catalog.test/c.jpg");
    }

    #[test]
    fn test_image_slots_respect_max() {
        let html = r#"<img id="image-01" src="/a.jpg"><img id="image-02" src="/b.jpg">"#;
        let document = Html::parse_document(html);
        let base = page_url();
        let images: Vec<_> = ImageSlots::new(&document, &base, "image-", 1).collect();
        assert_eq!(images.len(), 1);
    }

    #[test]
    fn test_no_images() {
        assert!(extractor().parse_unit("<p>nothing</p>", &page_url()).is_empty());
    }

    #[test]
    fn test_downloaded_chapters_scan() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("Capitulo_1")).unwrap();
        std::fs::create_dir(dir.path().join("Capitulo_12.0")).unwrap();
        std::fs::create_dir(dir.path().join("Extras")).unwrap();
        std::fs::write(dir.path().join("Capitulo_99"), b"a file, not a dir").unwrap();

        let downloaded = downloaded_chapters(dir.path());
        assert_eq!(downloaded.len(), 2);
        assert!(downloaded.contains(&ChapterNumber::parse("1").unwrap()));
        assert!(downloaded.contains(&ChapterNumber::parse("12").unwrap()));
        assert!(!downloaded.contains(&ChapterNumber::parse("99").unwrap()));
    }

    #[test]
    fn test_downloaded_chapters_missing_dir() {
        let dir = TempDir::new().unwrap();
        assert!(downloaded_chapters(&dir.path().join("nope")).is_empty());
    }

    #[test]
    fn test_pending_units_renumbered() {
        let units = order_units(vec![
            "/capitulo-1/".to_string(),
            "/capitulo-2/".to_string(),
            "/capitulo-3/".to_string(),
        ]);
        let mut downloaded = BTreeSet::new();
        downloaded.insert(ChapterNumber::parse("2.0").unwrap());

        let pending = pending_units(units, &downloaded);
        assert_eq!(labels(&pending), vec!["1", "3"]);
        assert_eq!(pending[1].index, 1);
    }
}
