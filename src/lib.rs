//! Rulecrawl: a rule-driven novel acquisition engine
//!
//! This crate fetches book metadata and chapter content from third-party sites
//! using externally configured, per-site extraction rules, and reconciles
//! freshly fetched chapters against a previously stored chapter index so that
//! only new or renamed chapters are downloaded.

pub mod config;
pub mod crawler;
pub mod id;
pub mod model;
pub mod rules;
pub mod storage;

use thiserror::Error;

/// Main error type for Rulecrawl operations
#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Rule error: {0}")]
    Rule(#[from] RuleError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Crawl source not found: {0}")]
    SourceNotFound(i64),

    #[error("Crawl task not found: {0}")]
    TaskNotFound(i64),

    #[error("Book not found: {0}")]
    BookNotFound(i64),

    #[error("Lock poisoned: {0}")]
    Lock(String),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),
}

/// Errors raised while loading or validating a rule set
#[derive(Debug, Error)]
pub enum RuleError {
    #[error("Malformed rule JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid pattern for {field} '{pattern}': {message}")]
    InvalidPattern {
        field: String,
        pattern: String,
        message: String,
    },

    #[error("Missing required rule field: {0}")]
    MissingField(&'static str),

    #[error("Unknown calc placeholder type: {0}")]
    UnknownCalcType(u32),

    #[error("Malformed calc placeholder: {0}")]
    MalformedPlaceholder(String),

    #[error("Invalid URL template: {0}")]
    InvalidTemplate(String),
}

/// Result type alias for Rulecrawl operations
pub type Result<T> = std::result::Result<T, CrawlError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for rule operations
pub type RuleResult<T> = std::result::Result<T, RuleError>;

// Re-export commonly used types
pub use config::Config;
pub use crawler::{ChapterSyncEngine, Fetcher, MetadataExtractor, Orchestrator};
pub use model::{BookRecord, ChapterSyncResult, ExistingChapterIndex, SingleTask, TaskStatus};
pub use rules::{PatternCache, RuleSet};
