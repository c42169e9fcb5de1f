//! URL handling module for Series-Harvest
//!
//! This module provides request-identity normalization, deduplication
//! fingerprints, and the host keys used by the per-host request limiter.

mod domain;
mod normalize;

pub use domain::host_key;
pub use normalize::{fingerprint, normalize_url};
