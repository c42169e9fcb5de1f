use crate::config::types::{
    CatalogConfig, Config, CrawlerConfig, OutputConfig, RetryConfig, UserAgentConfig,
};
use crate::ConfigError;
use scraper::Selector;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_catalog_config(&config.catalog)?;
    validate_crawler_config(&config.crawler)?;
    validate_retry_config(&config.retry)?;
    validate_user_agent_config(&config.user_agent)?;
    validate_output_config(&config.output)?;
    Ok(())
}

/// Validates catalog layout configuration
fn validate_catalog_config(config: &CatalogConfig) -> Result<(), ConfigError> {
    let url = Url::parse(&config.base_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid base-url: {}", e)))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ConfigError::InvalidUrl(format!(
            "base-url must use http or https, got '{}'",
            url.scheme()
        )));
    }

    if config.series_segment.len() < 2
        || !config.series_segment.starts_with('/')
        || !config.series_segment.ends_with('/')
    {
        return Err(ConfigError::Validation(format!(
            "series-segment must look like '/name/', got '{}'",
            config.series_segment
        )));
    }

    if config.image_id_prefix.is_empty() {
        return Err(ConfigError::Validation(
            "image-id-prefix cannot be empty".to_string(),
        ));
    }

    if config.max_image_slots < 1 {
        return Err(ConfigError::Validation(
            "max-image-slots must be >= 1".to_string(),
        ));
    }

    for selector in [
        &config.listing_item_selector,
        &config.next_page_selector,
        &config.title_selector,
    ] {
        validate_selector(selector)?;
    }

    Ok(())
}

/// Validates crawler configuration
fn validate_crawler_config(config: &CrawlerConfig) -> Result<(), ConfigError> {
    if config.max_concurrent_requests < 1 || config.max_concurrent_requests > 256 {
        return Err(ConfigError::Validation(format!(
            "max-concurrent-requests must be between 1 and 256, got {}",
            config.max_concurrent_requests
        )));
    }

    if config.max_requests_per_host < 1
        || config.max_requests_per_host > config.max_concurrent_requests
    {
        return Err(ConfigError::Validation(format!(
            "max-requests-per-host must be between 1 and max-concurrent-requests ({}), got {}",
            config.max_concurrent_requests, config.max_requests_per_host
        )));
    }

    if config.request_timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "request-timeout-secs must be >= 1".to_string(),
        ));
    }

    if config.max_redirects > 30 {
        return Err(ConfigError::Validation(format!(
            "max-redirects must be <= 30, got {}",
            config.max_redirects
        )));
    }

    if config.max_response_bytes == 0 {
        return Err(ConfigError::Validation(
            "max-response-bytes must be >= 1".to_string(),
        ));
    }

    if config.warn_response_bytes > config.max_response_bytes {
        return Err(ConfigError::Validation(format!(
            "warn-response-bytes ({}) cannot exceed max-response-bytes ({})",
            config.warn_response_bytes, config.max_response_bytes
        )));
    }

    Ok(())
}

/// Validates retry configuration
fn validate_retry_config(config: &RetryConfig) -> Result<(), ConfigError> {
    if config.base_delay_ms > config.max_delay_ms {
        return Err(ConfigError::Validation(format!(
            "base-delay-ms ({}) cannot exceed max-delay-ms ({})",
            config.base_delay_ms, config.max_delay_ms
        )));
    }

    if let Some(code) = config
        .retry_http_codes
        .iter()
        .find(|code| !(100..=599).contains(*code))
    {
        return Err(ConfigError::Validation(format!(
            "retry-http-codes contains an invalid status code: {}",
            code
        )));
    }

    Ok(())
}

/// Validates client identification configuration
fn validate_user_agent_config(config: &UserAgentConfig) -> Result<(), ConfigError> {
    if config.value.trim().is_empty() {
        return Err(ConfigError::Validation(
            "user-agent value cannot be empty".to_string(),
        ));
    }

    Ok(())
}

/// Validates output configuration
fn validate_output_config(config: &OutputConfig) -> Result<(), ConfigError> {
    if config.downloads_dir.is_empty() {
        return Err(ConfigError::Validation(
            "downloads-dir cannot be empty".to_string(),
        ));
    }

    if config.cache_dir.is_empty() {
        return Err(ConfigError::Validation(
            "cache-dir cannot be empty".to_string(),
        ));
    }

    Ok(())
}

fn validate_selector(selector: &str) -> Result<(), ConfigError> {
    Selector::parse(selector)
        .map(|_| ())
        .map_err(|e| ConfigError::InvalidSelector(format!("'{}': {:?}", selector, e)))
}
