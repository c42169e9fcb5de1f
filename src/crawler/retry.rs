//! Retry decisions with exponential backoff and a rate-limit cooldown
//!
//! Every fetch attempt ends in a [`ResponseOutcome`]. The [`RetryPolicy`]
//! classifies it and decides whether to accept the response, retry after a
//! delay, or give up.
//!
//! # Decision table
//!
//! | Outcome                               | Decision                          |
//! |---------------------------------------|-----------------------------------|
//! | 2xx / 3xx                             | Accept                            |
//! | 429                                   | Retry, backoff + cooldown         |
//! | Configured retry codes (408, 5xx...)  | Retry, backoff                    |
//! | 403 / 404 (unless the flag is off)    | Retry, backoff                    |
//! | Timeout / connection failure          | Retry, backoff                    |
//! | Body over the size limit              | Give up                           |
//! | Anything else                         | Give up                           |
//! | Retry budget exhausted                | Give up                           |
//!
//! # Delay calculation
//!
//! ```text
//! backoff = min(base_delay * 2^(attempt - 1), max_delay)
//! ```
//!
//! With the defaults (5 s base, 60 s cap) the delays run 5, 10, 20, 40, 60, 60...
//! There is no jitter, so delays are fully deterministic.

use crate::config::RetryConfig;
use std::time::Duration;

/// What one fetch attempt produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseOutcome {
    /// The server answered with this status code
    Status(u16),
    /// The request timed out
    Timeout,
    /// The connection could not be established or broke mid-transfer
    Connection(String),
    /// Redirect loop or too many redirects
    Redirect(String),
    /// The body is larger than the configured limit
    TooLarge { size: u64, limit: u64 },
    /// Any other client-side failure
    Other(String),
}

impl ResponseOutcome {
    /// Classifies a transport error raised by reqwest
    pub fn from_reqwest(error: &reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::Timeout
        } else if error.is_redirect() {
            Self::Redirect(error.to_string())
        } else if error.is_connect() || error.is_request() || error.is_body() {
            Self::Connection(error.to_string())
        } else {
            Self::Other(error.to_string())
        }
    }
}

/// Classification of a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureType {
    /// May succeed on retry
    Transient,
    /// HTTP 429; retried with the extra cooldown
    RateLimited,
    /// Will not succeed however often it is retried
    Permanent,
}

/// What to do after an attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// The response is usable
    Accept,
    /// Try again after `cooldown` (if any) plus `backoff`
    Retry {
        backoff: Duration,
        cooldown: Option<Duration>,
        /// Number of the attempt that will be made next (the first request is 1)
        attempt: u32,
    },
    /// Stop and report a terminal failure
    GiveUp { reason: String },
}

impl RetryDecision {
    /// Total wait before the next attempt
    pub fn delay(&self) -> Duration {
        match self {
            Self::Retry {
                backoff, cooldown, ..
            } => *backoff + cooldown.unwrap_or_default(),
            _ => Duration::ZERO,
        }
    }
}

/// Retry configuration resolved into durations
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_retries: u32,
    base_delay: Duration,
    max_delay: Duration,
    cooldown: Duration,
    retry_codes: Vec<u16>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        let mut retry_codes = config.retry_http_codes.clone();
        if config.retry_forbidden_and_not_found {
            retry_codes.extend([403, 404]);
        }
        retry_codes.sort_unstable();
        retry_codes.dedup();

        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            cooldown: Duration::from_secs(config.rate_limit_cooldown_secs),
            retry_codes,
        }
    }

    /// Classifies an outcome; `None` means the response is accepted
    pub fn classify(&self, outcome: &ResponseOutcome) -> Option<FailureType> {
        match outcome {
            ResponseOutcome::Status(code) if (200..400).contains(code) => None,
            ResponseOutcome::Status(429) => Some(FailureType::RateLimited),
            ResponseOutcome::Status(code) if self.retry_codes.contains(code) => {
                Some(FailureType::Transient)
            }
            ResponseOutcome::Status(_) => Some(FailureType::Permanent),
            ResponseOutcome::Timeout | ResponseOutcome::Connection(_) => {
                Some(FailureType::Transient)
            }
            ResponseOutcome::Redirect(_)
            | ResponseOutcome::TooLarge { .. }
            | ResponseOutcome::Other(_) => {
                Some(FailureType::Permanent)
            }
        }
    }

    /// Backoff before retry number `retry` (1-based)
    pub fn backoff(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(31);
        let factor = 1u32 << exponent;
        self.base_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }

    /// Decides what to do after attempt number `attempt` (1-based) ended in `outcome`
    pub fn decide(&self, outcome: &ResponseOutcome, attempt: u32) -> RetryDecision {
        let failure = match self.classify(outcome) {
            None => return RetryDecision::Accept,
            Some(failure) => failure,
        };

        if failure == FailureType::Permanent {
            return RetryDecision::GiveUp {
                reason: describe(outcome),
            };
        }

        // attempt 1 is the original request, so retries used so far = attempt - 1
        if attempt > self.max_retries {
            return RetryDecision::GiveUp {
                reason: format!(
                    "{} (gave up after {} retries)",
                    describe(outcome),
                    self.max_retries
                ),
            };
        }

        let cooldown = (failure == FailureType::RateLimited).then_some(self.cooldown);
        RetryDecision::Retry {
            backoff: self.backoff(attempt),
            cooldown,
            attempt: attempt + 1,
        }
    }
}

/// Human-readable text for an outcome
pub fn describe(outcome: &ResponseOutcome) -> String {
    match outcome {
        ResponseOutcome::Status(code) => format!("HTTP {}", code),
        ResponseOutcome::Timeout => "request timed out".to_string(),
        ResponseOutcome::Connection(e) => format!("connection failed: {}", e),
        ResponseOutcome::Redirect(e) => format!("redirect error: {}", e),
        ResponseOutcome::TooLarge { size, limit } => {
            format!("response body of {} bytes exceeds the {} byte limit", size, limit)
        }
        ResponseOutcome::Other(e) => e.clone(),
    }
}
