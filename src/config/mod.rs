//! Configuration module for Rulecrawl
//!
//! This module handles loading, parsing, and validating the engine's TOML
//! configuration: fetch politeness, worker scheduling and the database path.
//! Per-site extraction rules are not part of it; see [`crate::rules`].
//!
//! # Example
//!
//! ```no_run
//! use rulecrawl::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("rulecrawl.toml")).unwrap();
//! println!("Category workers per source: {}", config.crawler.category_count);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{Config, CrawlerConfig, FetcherConfig, OutputConfig, DEFAULT_USER_AGENT};

// Re-export parser functions
pub use parser::{compute_config_hash, load_config, load_config_with_hash, parse_config};
