use serde::Deserialize;
use std::time::Duration;

/// Browser-like User-Agent sent with every request unless overridden
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

/// Main configuration structure for Rulecrawl
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub fetcher: FetcherConfig,
    #[serde(default)]
    pub crawler: CrawlerConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

/// HTTP fetch behavior
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct FetcherConfig {
    /// Lower bound of the politeness delay before each attempt (milliseconds)
    pub min_interval_ms: u64,

    /// Upper bound of the politeness delay; `<= min_interval_ms` disables it
    pub max_interval_ms: u64,

    /// Per-request timeout (milliseconds)
    pub timeout_ms: u64,

    /// Retries after the first failed attempt
    pub retry_count: u32,

    /// Decoded bodies shorter than this many characters count as failures
    pub min_body_length: usize,

    /// User-Agent header value
    pub user_agent: String,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            min_interval_ms: 100,
            max_interval_ms: 500,
            timeout_ms: 10_000,
            retry_count: 3,
            min_body_length: 100,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl FetcherConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Worker scheduling configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct CrawlerConfig {
    /// Number of category workers spawned per enabled source
    pub category_count: u32,

    /// Pause after the last listing page before restarting from page 1 (seconds)
    pub pass_interval_secs: u64,

    /// Pause between polls of an empty task queue (seconds)
    pub task_poll_interval_secs: u64,

    /// Attempts after which a single-book task is marked failed
    pub max_task_attempts: u8,

    /// Pause between passes over a source's update list (seconds)
    pub update_interval_secs: u64,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            category_count: 7,
            pass_interval_secs: 60,
            task_poll_interval_secs: 10,
            max_task_attempts: 5,
            update_interval_secs: 600,
        }
    }
}

impl CrawlerConfig {
    pub fn pass_interval(&self) -> Duration {
        Duration::from_secs(self.pass_interval_secs)
    }

    pub fn task_poll_interval(&self) -> Duration {
        Duration::from_secs(self.task_poll_interval_secs)
    }

    pub fn update_interval(&self) -> Duration {
        Duration::from_secs(self.update_interval_secs)
    }
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct OutputConfig {
    /// Path to the SQLite database file
    pub database_path: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            database_path: "rulecrawl.db".to_string(),
        }
    }
}
