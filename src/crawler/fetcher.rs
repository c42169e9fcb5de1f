//! HTTP fetcher implementation
//!
//! This module handles all HTTP requests for the crawler, including:
//! - Building the HTTP client with browser-like headers and a cookie store
//! - Page requests and image requests (which add Referer/Origin)
//! - Admission through the per-host scheduler
//! - Retry with backoff and rate-limit cooldown

use crate::config::Config;
use crate::crawler::retry::{describe, ResponseOutcome, RetryDecision, RetryPolicy};
use crate::crawler::scheduler::Scheduler;
use crate::url::host_key;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, CONTENT_TYPE, ORIGIN, REFERER};
use reqwest::{redirect::Policy, Client};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Accept header for page requests
pub const PAGE_ACCEPT: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,image/apng,*/*;q=0.8";

/// Accept header for image requests
pub const IMAGE_ACCEPT: &str = "image/webp,image/apng,image/*,*/*;q=0.8";

/// Terminal fetch failures
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("{url}: {reason} (after {attempts} attempt(s))")]
    GaveUp {
        url: String,
        reason: String,
        attempts: u32,
    },

    #[error("Invalid request URL {url}: {message}")]
    InvalidUrl { url: String, message: String },

    #[error("Request scheduler is closed")]
    SchedulerClosed,
}

/// Which kind of resource is being requested
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Page,
    Image,
}

/// A successful response with its body read
#[derive(Debug, Clone)]
pub struct FetchedResponse {
    /// Final URL after redirects
    pub final_url: String,
    pub status: u16,
    /// Content-Type header value, if any
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl FetchedResponse {
    /// Body decoded as UTF-8, replacing invalid sequences
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Builds an HTTP client with proper configuration
///
/// The client carries the User-Agent, the page Accept/Accept-Language
/// headers, a cookie store, gzip/brotli decoding, the redirect limit and
/// the request timeout.
pub fn build_http_client(config: &Config) -> Result<Client, reqwest::Error> {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static(PAGE_ACCEPT));
    match HeaderValue::from_str(&config.user_agent.accept_language) {
        Ok(value) => {
            headers.insert(ACCEPT_LANGUAGE, value);
        }
        Err(_) => tracing::warn!(
            "Ignoring invalid Accept-Language value: {:?}",
            config.user_agent.accept_language
        ),
    }

    Client::builder()
        .user_agent(config.user_agent.value.clone())
        .default_headers(headers)
        .cookie_store(true)
        .timeout(Duration::from_secs(config.crawler.request_timeout_secs))
        .redirect(Policy::limited(config.crawler.max_redirects as usize))
        .gzip(true)
        .brotli(true)
        .build()
}

/// Fetches pages and images through the scheduler and retry policy
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: Client,
    scheduler: Arc<Scheduler>,
    policy: RetryPolicy,
    referer: String,
    origin: String,
    max_body: u64,
    warn_body: u64,
}

impl Fetcher {
    pub fn new(config: &Config) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: build_http_client(config)?,
            scheduler: Arc::new(Scheduler::new(&config.crawler)),
            policy: RetryPolicy::from_config(&config.retry),
            referer: config.catalog.base_url.clone(),
            origin: config.catalog.origin(),
            max_body: config.crawler.max_response_bytes,
            warn_body: config.crawler.warn_response_bytes,
        })
    }

    /// Fetches a catalog page (listing, series or chapter)
    pub async fn fetch_page(&self, url: &str) -> Result<FetchedResponse, FetchError> {
        self.fetch_with_retry(url, RequestKind::Page).await
    }

    /// Fetches an image with the image Accept, Referer and Origin headers
    pub async fn fetch_image(&self, url: &str) -> Result<FetchedResponse, FetchError> {
        self.fetch_with_retry(url, RequestKind::Image).await
    }

    /// Fetches a URL, retrying per the policy until it is accepted or given up
    ///
    /// The scheduler permit covers one attempt only; backoff and cooldown
    /// sleeps run without holding a slot.
    pub async fn fetch_with_retry(
        &self,
        url: &str,
        kind: RequestKind,
    ) -> Result<FetchedResponse, FetchError> {
        let parsed = Url::parse(url).map_err(|e| FetchError::InvalidUrl {
            url: url.to_string(),
            message: e.to_string(),
        })?;
        let host = host_key(&parsed).ok_or_else(|| FetchError::InvalidUrl {
            url: url.to_string(),
            message: "missing host".to_string(),
        })?;

        let mut attempt = 1;
        loop {
            let result = {
                let _permit = self
                    .scheduler
                    .acquire(&host)
                    .await
                    .ok_or(FetchError::SchedulerClosed)?;
                self.send_once(parsed.clone(), kind).await
            };

            let outcome = match &result {
                Ok(response) => ResponseOutcome::Status(response.status),
                Err(outcome) => outcome.clone(),
            };

            match self.policy.decide(&outcome, attempt) {
                RetryDecision::Accept => {
                    return result.map_err(|outcome| FetchError::GaveUp {
                        url: url.to_string(),
                        reason: describe(&outcome),
                        attempts: attempt,
                    });
                }
                RetryDecision::Retry {
                    backoff,
                    cooldown,
                    attempt: next,
                } => {
                    if let Some(cooldown) = cooldown {
                        tracing::warn!(
                            url,
                            cooldown_secs = cooldown.as_secs(),
                            "Rate limited (HTTP 429); cooling down before retry"
                        );
                        tokio::time::sleep(cooldown).await;
                    }
                    tracing::debug!(
                        url,
                        attempt = next,
                        delay_ms = backoff.as_millis() as u64,
                        "Retrying after {}",
                        describe(&outcome)
                    );
                    tokio::time::sleep(backoff).await;
                    attempt = next;
                }
                RetryDecision::GiveUp { reason } => {
                    tracing::warn!(url, attempts = attempt, "Giving up: {}", reason);
                    return Err(FetchError::GaveUp {
                        url: url.to_string(),
                        reason,
                        attempts: attempt,
                    });
                }
            }
        }
    }

    /// One HTTP attempt; Ok carries any status, Err a transport failure
    async fn send_once(
        &self,
        url: Url,
        kind: RequestKind,
    ) -> Result<FetchedResponse, ResponseOutcome> {
        let request = match kind {
            RequestKind::Page => self.client.get(url),
            RequestKind::Image => self
                .client
                .get(url)
                .header(ACCEPT, IMAGE_ACCEPT)
                .header(REFERER, self.referer.as_str())
                .header(ORIGIN, self.origin.as_str()),
        };

        let mut response = request
            .send()
            .await
            .map_err(|e| ResponseOutcome::from_reqwest(&e))?;

        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        // Bodies of failed responses are never used
        if !(200..400).contains(&status) {
            return Ok(FetchedResponse {
                final_url,
                status,
                content_type,
                body: Vec::new(),
            });
        }

        let announced = response.content_length();
        if let Some(size) = announced.filter(|size| *size > self.max_body) {
            return Err(ResponseOutcome::TooLarge {
                size,
                limit: self.max_body,
            });
        }

        let mut body = Vec::with_capacity(announced.unwrap_or(0).min(self.max_body) as usize);
        let mut warned = false;
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| ResponseOutcome::from_reqwest(&e))?
        {
            body.extend_from_slice(&chunk);
            let size = body.len() as u64;
            if size > self.max_body {
                return Err(ResponseOutcome::TooLarge {
                    size,
                    limit: self.max_body,
                });
            }
            if !warned && size > self.warn_body {
                warned = true;
                tracing::warn!(
                    url = %final_url,
                    warn_bytes = self.warn_body,
                    "Response body is unusually large"
                );
            }
        }

        Ok(FetchedResponse {
            final_url,
            status,
            content_type,
            body,
        })
    }
}
