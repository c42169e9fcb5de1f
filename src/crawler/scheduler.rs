//! Request admission control
//!
//! This module handles:
//! - Global concurrency limiting via a shared semaphore
//! - Per-host concurrency limiting via one semaphore per host key
//!
//! A permit is held for the duration of one HTTP attempt. Backoff sleeps
//! happen without a permit so a retrying request never blocks other hosts.

use crate::config::CrawlerConfig;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Permits for one in-flight request; dropping it frees both slots
#[derive(Debug)]
pub struct RequestPermit {
    _host: OwnedSemaphorePermit,
    _global: OwnedSemaphorePermit,
}

/// Bounds in-flight requests globally and per host
#[derive(Debug)]
pub struct Scheduler {
    /// Global semaphore for limiting concurrent requests
    global: Arc<Semaphore>,

    /// One semaphore per host key, created on first use
    hosts: Mutex<HashMap<String, Arc<Semaphore>>>,

    per_host_limit: usize,
}

impl Scheduler {
    pub fn new(config: &CrawlerConfig) -> Self {
        Self::with_limits(
            config.max_concurrent_requests as usize,
            config.max_requests_per_host as usize,
        )
    }

    pub fn with_limits(global_limit: usize, per_host_limit: usize) -> Self {
        Self {
            global: Arc::new(Semaphore::new(global_limit.max(1))),
            hosts: Mutex::new(HashMap::new()),
            per_host_limit: per_host_limit.max(1),
        }
    }

    /// Waits for a free slot for `host`
    ///
    /// The host slot is taken first so a busy host does not sit on global
    /// slots other hosts could use. Returns None only if the scheduler's
    /// semaphores were closed.
    pub async fn acquire(&self, host: &str) -> Option<RequestPermit> {
        let host_semaphore = self.host_semaphore(host);
        let host_permit = host_semaphore.acquire_owned().await.ok()?;
        let global_permit = self.global.clone().acquire_owned().await.ok()?;

        tracing::trace!(
            host,
            global_available = self.global.available_permits(),
            "Request admitted"
        );

        Some(RequestPermit {
            _host: host_permit,
            _global: global_permit,
        })
    }

    /// Free global slots
    pub fn available(&self) -> usize {
        self.global.available_permits()
    }

    /// Free slots for one host
    pub fn available_for(&self, host: &str) -> usize {
        self.host_semaphore(host).available_permits()
    }

    fn host_semaphore(&self, host: &str) -> Arc<Semaphore> {
        let mut hosts = match self.hosts.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        hosts
            .entry(host.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.per_host_limit)))
            .clone()
    }
}
