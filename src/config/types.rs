use serde::Deserialize;

/// Main configuration structure for Series-Harvest
///
/// Every section falls back to its defaults, so an empty file (or no file at
/// all) yields a working configuration for the reference catalog.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub catalog: CatalogConfig,
    pub crawler: CrawlerConfig,
    pub retry: RetryConfig,
    #[serde(rename = "user-agent")]
    pub user_agent: UserAgentConfig,
    pub output: OutputConfig,
}

/// Where the catalog lives and how its pages are laid out
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// Root of the catalog site, e.g. `https://hiper.cool/`
    #[serde(rename = "base-url")]
    pub base_url: String,

    /// Path segment that marks a series page, e.g. `/manga/`
    #[serde(rename = "series-segment")]
    pub series_segment: String,

    /// Query string appended to every listing page
    #[serde(rename = "order-param")]
    pub order_param: String,

    /// Selector for series anchors on a listing page
    #[serde(rename = "listing-item-selector")]
    pub listing_item_selector: String,

    /// Selector whose presence means another listing page follows
    #[serde(rename = "next-page-selector")]
    pub next_page_selector: String,

    /// Selector holding the series title on a series page
    #[serde(rename = "title-selector")]
    pub title_selector: String,

    /// Element id prefix of chapter images (`image-01`, `image-2`, ...)
    #[serde(rename = "image-id-prefix")]
    pub image_id_prefix: String,

    /// Highest image slot probed on a chapter page
    #[serde(rename = "max-image-slots")]
    pub max_image_slots: u32,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            base_url: "https://hiper.cool/".to_string(),
            series_segment: "/manga/".to_string(),
            order_param: "m_orderby=views".to_string(),
            listing_item_selector: "div.page-listing-item a[href]".to_string(),
            next_page_selector: "a.nextpostslink".to_string(),
            title_selector: "h1".to_string(),
            image_id_prefix: "image-".to_string(),
            max_image_slots: 299,
        }
    }
}

impl CatalogConfig {
    /// Builds the URL of a series listing page (1-based)
    pub fn listing_url(&self, page: u32) -> String {
        let root = format!(
            "{}{}",
            self.base_url.trim_end_matches('/'),
            self.series_segment
        );
        if page <= 1 {
            format!("{}?{}", root, self.order_param)
        } else {
            format!("{}page/{}/?{}", root, page, self.order_param)
        }
    }

    /// Returns the catalog origin (`scheme://host[:port]`) used for the Origin header
    pub fn origin(&self) -> String {
        match ::url::Url::parse(&self.base_url) {
            Ok(url) => url.origin().ascii_serialization(),
            Err(_) => self.base_url.trim_end_matches('/').to_string(),
        }
    }
}

/// Crawler behavior configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CrawlerConfig {
    /// Maximum number of requests in flight across all hosts
    #[serde(rename = "max-concurrent-requests")]
    pub max_concurrent_requests: u32,

    /// Maximum number of requests in flight against a single host
    #[serde(rename = "max-requests-per-host")]
    pub max_requests_per_host: u32,

    /// Per-request timeout (seconds)
    #[serde(rename = "request-timeout-secs")]
    pub request_timeout_secs: u64,

    /// Maximum redirect hops followed per request
    #[serde(rename = "max-redirects")]
    pub max_redirects: u32,

    /// Responses with larger bodies are dropped as permanent failures
    #[serde(rename = "max-response-bytes")]
    pub max_response_bytes: u64,

    /// Bodies above this size are logged at warn level
    #[serde(rename = "warn-response-bytes")]
    pub warn_response_bytes: u64,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_requests: 32,
            max_requests_per_host: 16,
            request_timeout_secs: 180,
            max_redirects: 10,
            max_response_bytes: 50 * 1024 * 1024,
            warn_response_bytes: 20 * 1024 * 1024,
        }
    }
}

/// Retry and backoff configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries allowed after the first attempt
    #[serde(rename = "max-retries")]
    pub max_retries: u32,

    /// Delay before the first retry (milliseconds), doubled per attempt
    #[serde(rename = "base-delay-ms")]
    pub base_delay_ms: u64,

    /// Upper bound for the exponential delay (milliseconds)
    #[serde(rename = "max-delay-ms")]
    pub max_delay_ms: u64,

    /// Fixed wait added after an HTTP 429 (seconds)
    #[serde(rename = "rate-limit-cooldown-secs")]
    pub rate_limit_cooldown_secs: u64,

    /// HTTP status codes treated as transient
    #[serde(rename = "retry-http-codes")]
    pub retry_http_codes: Vec<u16>,

    /// Also retry 403 and 404 (some catalogs answer request bursts with these)
    ///
    /// On by default. Whether a 404 from the catalog ever means "gone for
    /// good" is still an open question; set to false to treat both as
    /// permanent failures.
    #[serde(rename = "retry-forbidden-and-not-found")]
    pub retry_forbidden_and_not_found: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 10,
            base_delay_ms: 5_000,
            max_delay_ms: 60_000,
            rate_limit_cooldown_secs: 30,
            retry_http_codes: vec![408, 429, 500, 502, 503, 504, 522, 524],
            retry_forbidden_and_not_found: true,
        }
    }
}

/// Client identification configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UserAgentConfig {
    /// User-Agent header sent with every request
    pub value: String,

    /// Accept-Language header sent with every request
    #[serde(rename = "accept-language")]
    pub accept_language: String,
}

impl Default for UserAgentConfig {
    fn default() -> Self {
        Self {
            value: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                    (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36"
                .to_string(),
            accept_language: "en-US,en;q=0.9".to_string(),
        }
    }
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Root directory for downloaded chapters
    #[serde(rename = "downloads-dir")]
    pub downloads_dir: String,

    /// Directory holding progress caches and reports
    #[serde(rename = "cache-dir")]
    pub cache_dir: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            downloads_dir: "downloads".to_string(),
            cache_dir: "cache".to_string(),
        }
    }
}
