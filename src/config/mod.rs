//! Configuration module for Series-Harvest
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//! Every key has a default, so the crawler also runs without any file.
//!
//! # Example
//!
//! ```no_run
//! use series_harvest::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("harvest.toml")).unwrap();
//! println!("Catalog: {}", config.catalog.base_url);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    CatalogConfig, Config, CrawlerConfig, OutputConfig, RetryConfig, UserAgentConfig,
};

// Re-export parser functions
pub use parser::{compute_config_hash, load_config, load_config_with_hash};
pub use validation::validate;
