//! Integration tests for the crawler
//!
//! These tests use wiremock to serve a small catalog and drive full runs
//! end-to-end in each mode.

use series_harvest::config::{CatalogConfig, Config, CrawlerConfig, OutputConfig, RetryConfig};
use series_harvest::output::FinishReason;
use series_harvest::state::{DownloadProgress, SeriesCache};
use series_harvest::storage::{
    load_errors, ProgressStore, UpdateLog, DOWNLOAD_PROGRESS, SERIES_CACHE, UPDATE_LOG,
};
use series_harvest::{Coordinator, CrawlMode};
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Creates a test configuration pointing at the mock catalog
fn create_test_config(base_url: &str, dir: &Path) -> Config {
    Config {
        catalog: CatalogConfig {
            base_url: format!("{}/", base_url),
            ..CatalogConfig::default()
        },
        crawler: CrawlerConfig {
            max_concurrent_requests: 8,
            max_requests_per_host: 4,
            request_timeout_secs: 10,
            ..CrawlerConfig::default()
        },
        retry: RetryConfig {
            max_retries: 2,
            base_delay_ms: 10,
            max_delay_ms: 50,
            rate_limit_cooldown_secs: 0,
            ..RetryConfig::default()
        },
        output: OutputConfig {
            downloads_dir: dir.join("downloads").to_string_lossy().into_owned(),
            cache_dir: dir.join("cache").to_string_lossy().into_owned(),
        },
        ..Config::default()
    }
}

fn open_store(dir: &Path) -> ProgressStore {
    ProgressStore::open(dir.join("cache")).expect("open store")
}

fn seed_state(dir: &Path, series: &[String], progress: DownloadProgress) {
    let store = open_store(dir);
    store
        .save(
            SERIES_CACHE,
            &SeriesCache {
                series: series.to_vec(),
                last_update: None,
            },
        )
        .expect("save series cache");
    store
        .save(DOWNLOAD_PROGRESS, &progress)
        .expect("save progress");
}

fn load_progress(dir: &Path) -> DownloadProgress {
    open_store(dir).load(DOWNLOAD_PROGRESS, DownloadProgress::default())
}

fn html(body: String) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .set_body_string(format!("<html><body>{}</body></html>", body))
        .insert_header("content-type", "text/html")
}

fn listing_page(base: &str, slugs: &[&str], has_next: bool) -> ResponseTemplate {
    let mut body: String = slugs
        .iter()
        .map(|slug| {
            format!(
                r#"<div class="page-listing-item"><a href="{}/manga/{}/">{}</a></div>"#,
                base, slug, slug
            )
        })
        .collect();
    if has_next {
        body.push_str(r##"<a class="nextpostslink" href="#">next</a>"##);
    }
    html(body)
}

fn series_page(title: &str, slug: &str, chapters: &[&str]) -> ResponseTemplate {
    let mut body = format!("<h1>{}</h1><ul>", title);
    for chapter in chapters {
        body.push_str(&format!(
            r#"<li><a href="/manga/{}/capitulo-{}/">Capitulo {}</a></li>"#,
            slug, chapter, chapter
        ));
    }
    body.push_str("</ul>");
    html(body)
}

fn chapter_page(images: &[&str]) -> ResponseTemplate {
    let body = images
        .iter()
        .enumerate()
        .map(|(i, src)| format!(r#"<img id="image-{:02}" src="{}">"#, i + 1, src))
        .collect();
    html(body)
}

fn image(content_type: &str, bytes: &[u8]) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .set_body_bytes(bytes.to_vec())
        .insert_header("content-type", content_type)
}

async fn mount(server: &MockServer, route: &str, response: ResponseTemplate) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(response)
        .mount(server)
        .await;
}

async fn mount_never(server: &MockServer, route: &str) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(html(String::new()))
        .expect(0)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_discover_follows_listing_pages() {
    let server = MockServer::start().await;
    let base = server.uri();
    let dir = TempDir::new().unwrap();

    mount(&server, "/manga/", listing_page(&base, &["alpha", "beta"], true)).await;
    mount(
        &server,
        "/manga/page/2/",
        listing_page(&base, &["beta", "gamma"], false),
    )
    .await;

    let config = create_test_config(&base, dir.path());
    let mut coordinator = Coordinator::new(config, CrawlMode::Discover, 1).unwrap();
    let report = coordinator.run().await.unwrap();

    assert_eq!(report.finish_reason, FinishReason::Finished);
    assert_eq!(report.mode, CrawlMode::Discover);

    let cache: SeriesCache = open_store(dir.path()).load(SERIES_CACHE, SeriesCache::default());
    assert_eq!(
        cache.series,
        vec![
            format!("{}/manga/alpha/", base),
            format!("{}/manga/beta/", base),
            format!("{}/manga/gamma/", base),
        ]
    );
    assert!(cache.last_update.is_some());
}

#[tokio::test]
async fn test_discover_starts_at_given_page() {
    let server = MockServer::start().await;
    let base = server.uri();
    let dir = TempDir::new().unwrap();

    mount_never(&server, "/manga/").await;
    mount(&server, "/manga/page/3/", listing_page(&base, &["delta"], false)).await;

    let config = create_test_config(&base, dir.path());
    let mut coordinator = Coordinator::new(config, CrawlMode::Discover, 3).unwrap();
    coordinator.run().await.unwrap();

    assert_eq!(coordinator.state().series_cache().len(), 1);
}

#[tokio::test]
async fn test_download_skips_existing_chapters() {
    let server = MockServer::start().await;
    let base = server.uri();
    let dir = TempDir::new().unwrap();

    let alpha = format!("{}/manga/alpha/", base);
    let beta = format!("{}/manga/beta/", base);
    seed_state(dir.path(), &[alpha.clone(), beta.clone()], DownloadProgress::default());
    std::fs::create_dir_all(dir.path().join("downloads/Alpha/Capitulo_1")).unwrap();

    mount(&server, "/manga/alpha/", series_page("Alpha", "alpha", &["2", "1"])).await;
    mount_never(&server, "/manga/alpha/capitulo-1/").await;
    mount(
        &server,
        "/manga/alpha/capitulo-2/",
        chapter_page(&["/img/a2-1.png", "/img/a2-2.png"]),
    )
    .await;
    mount(&server, "/img/a2-1.png", image("image/png", b"first")).await;
    mount(&server, "/img/a2-2.png", image("image/png", b"second")).await;

    mount(&server, "/manga/beta/", series_page("Beta", "beta", &["1"])).await;
    mount(&server, "/manga/beta/capitulo-1/", chapter_page(&["/img/b1-1"])).await;
    mount(&server, "/img/b1-1", image("image/webp", b"webp")).await;

    let config = create_test_config(&base, dir.path());
    let mut coordinator = Coordinator::new(config, CrawlMode::Download, 1).unwrap();
    let report = coordinator.run().await.unwrap();

    assert_eq!(report.processed_series, 2);
    assert_eq!(report.downloaded_chapters, 2);
    assert_eq!(report.failed_downloads, 0);
    assert_eq!(report.total_bytes, 15);

    let downloads = dir.path().join("downloads");
    assert_eq!(
        std::fs::read(downloads.join("Alpha/Capitulo_2/pagina_001.png")).unwrap(),
        b"first"
    );
    assert!(downloads.join("Alpha/Capitulo_2/pagina_002.png").exists());
    assert!(downloads.join("Beta/Capitulo_1/pagina_001.webp").exists());

    let progress = load_progress(dir.path());
    assert_eq!(progress.completed, vec![alpha, beta]);
    assert_eq!(progress.in_progress, None);
}

#[tokio::test]
async fn test_download_resumes_in_progress_series() {
    let server = MockServer::start().await;
    let base = server.uri();
    let dir = TempDir::new().unwrap();

    let alpha = format!("{}/manga/alpha/", base);
    let beta = format!("{}/manga/beta/", base);
    let gamma = format!("{}/manga/gamma/", base);
    seed_state(
        dir.path(),
        &[alpha, beta.clone(), gamma.clone()],
        DownloadProgress {
            completed: vec![],
            in_progress: Some(beta.clone()),
        },
    );

    mount_never(&server, "/manga/alpha/").await;
    mount(&server, "/manga/beta/", series_page("Beta", "beta", &["1"])).await;
    mount(&server, "/manga/beta/capitulo-1/", chapter_page(&["/img/b.jpg"])).await;
    mount(&server, "/img/b.jpg", image("image/jpeg", b"jpg")).await;
    // No chapter links: left uncompleted
    mount(&server, "/manga/gamma/", series_page("Gamma", "gamma", &[])).await;

    let config = create_test_config(&base, dir.path());
    let mut coordinator = Coordinator::new(config, CrawlMode::Download, 1).unwrap();
    let report = coordinator.run().await.unwrap();

    assert_eq!(report.processed_series, 1);
    let progress = load_progress(dir.path());
    assert_eq!(progress.completed, vec![beta]);
    assert_eq!(progress.in_progress, Some(gamma));
    assert!(dir
        .path()
        .join("downloads/Beta/Capitulo_1/pagina_001.jpg")
        .exists());
}

#[tokio::test]
async fn test_update_mode_fetches_only_new_chapters() {
    let server = MockServer::start().await;
    let base = server.uri();
    let dir = TempDir::new().unwrap();

    let alpha = format!("{}/manga/alpha/", base);
    let before = DownloadProgress {
        completed: vec![alpha.clone()],
        in_progress: None,
    };
    seed_state(dir.path(), &[alpha.clone()], before.clone());
    std::fs::create_dir_all(dir.path().join("downloads/Alpha/Capitulo_1")).unwrap();

    mount(&server, "/manga/alpha/", series_page("Alpha", "alpha", &["1", "2"])).await;
    mount_never(&server, "/manga/alpha/capitulo-1/").await;
    mount(&server, "/manga/alpha/capitulo-2/", chapter_page(&["/img/new.jpg"])).await;
    mount(&server, "/img/new.jpg", image("image/jpeg", b"new")).await;

    let config = create_test_config(&base, dir.path());
    let mut coordinator = Coordinator::new(config, CrawlMode::Update, 1).unwrap();
    let report = coordinator.run().await.unwrap();

    assert_eq!(report.mode, CrawlMode::Update);
    assert_eq!(report.downloaded_chapters, 1);
    assert_eq!(report.processed_series, 0);
    assert!(dir
        .path()
        .join("downloads/Alpha/Capitulo_2/pagina_001.jpg")
        .exists());

    let log: UpdateLog = open_store(dir.path()).load(UPDATE_LOG, UpdateLog::new(chrono::Utc::now()));
    assert_eq!(log.updates.len(), 1);
    assert_eq!(log.updates[0].series, "Alpha");
    assert_eq!(log.updates[0].url, alpha);
    assert_eq!(log.updates[0].new_chapters, 1);

    assert_eq!(load_progress(dir.path()), before);
}

#[tokio::test]
async fn test_failed_page_goes_to_error_log() {
    let server = MockServer::start().await;
    let base = server.uri();
    let dir = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path("/manga/"))
        .respond_with(ResponseTemplate::new(404))
        .expect(3)
        .mount(&server)
        .await;

    let config = create_test_config(&base, dir.path());
    let mut coordinator = Coordinator::new(config, CrawlMode::Discover, 1).unwrap();
    let report = coordinator.run().await.unwrap();

    assert_eq!(report.failed_downloads, 1);
    let errors = load_errors(&open_store(dir.path()));
    assert_eq!(errors.len(), 1);
    assert!(errors[0].url.ends_with("/manga/?m_orderby=views"));
    assert!(errors[0].error.contains("404"));
}

#[tokio::test]
async fn test_failed_image_is_recorded() {
    let server = MockServer::start().await;
    let base = server.uri();
    let dir = TempDir::new().unwrap();

    let alpha = format!("{}/manga/alpha/", base);
    seed_state(dir.path(), &[alpha.clone()], DownloadProgress::default());

    mount(&server, "/manga/alpha/", series_page("Alpha", "alpha", &["1"])).await;
    mount(
        &server,
        "/manga/alpha/capitulo-1/",
        chapter_page(&["/img/ok.png", "/img/missing.png"]),
    )
    .await;
    mount(&server, "/img/ok.png", image("image/png", b"ok")).await;
    Mock::given(method("GET"))
        .and(path("/img/missing.png"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let config = create_test_config(&base, dir.path());
    let mut coordinator = Coordinator::new(config, CrawlMode::Download, 1).unwrap();
    let report = coordinator.run().await.unwrap();

    assert_eq!(report.downloaded_chapters, 1);
    assert_eq!(report.failed_downloads, 1);
    assert!(dir
        .path()
        .join("downloads/Alpha/Capitulo_1/pagina_001.png")
        .exists());

    let errors = load_errors(&open_store(dir.path()));
    assert_eq!(errors.len(), 1);
    assert!(errors[0].url.ends_with("/img/missing.png"));
    assert_eq!(load_progress(dir.path()).completed, vec![alpha]);
}

#[tokio::test]
async fn test_rate_limited_page_is_retried() {
    let server = MockServer::start().await;
    let base = server.uri();
    let dir = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path("/manga/"))
        .respond_with(ResponseTemplate::new(429))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    mount(&server, "/manga/", listing_page(&base, &["alpha"], false)).await;

    let config = create_test_config(&base, dir.path());
    let mut coordinator = Coordinator::new(config, CrawlMode::Discover, 1).unwrap();
    let report = coordinator.run().await.unwrap();

    assert_eq!(report.failed_downloads, 0);
    assert_eq!(coordinator.state().series_cache().len(), 1);
    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 2);
}

#[tokio::test]
async fn test_shutdown_keeps_progress() {
    let server = MockServer::start().await;
    let base = server.uri();
    let dir = TempDir::new().unwrap();

    let alpha = format!("{}/manga/alpha/", base);
    seed_state(dir.path(), &[alpha.clone()], DownloadProgress::default());

    mount(
        &server,
        "/manga/alpha/",
        series_page("Alpha", "alpha", &["1"]).set_delay(Duration::from_secs(5)),
    )
    .await;

    let config = create_test_config(&base, dir.path());
    let mut coordinator = Coordinator::new(config, CrawlMode::Download, 1).unwrap();
    let report = coordinator
        .run_until(tokio::time::sleep(Duration::from_millis(100)))
        .await
        .unwrap();

    assert_eq!(report.finish_reason, FinishReason::Shutdown);
    let progress = load_progress(dir.path());
    assert_eq!(progress.in_progress, Some(alpha));
    assert!(progress.completed.is_empty());
}
