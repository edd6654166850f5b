//! HTTP fetcher implementation
//!
//! This module handles every HTTP request the engine makes:
//! - Building the HTTP client with a browser-like user agent
//! - A random politeness delay before each attempt
//! - Charset-aware decoding of response bodies
//! - Bounded retry on failures and implausibly short bodies
//!
//! Retry state lives in the local scope of a single [`Fetcher::fetch`] call,
//! so concurrent fetches on the same worker thread never interfere.

use crate::config::FetcherConfig;
use rand::Rng;
use reqwest::Client;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Why a single fetch attempt failed
#[derive(Debug, Error)]
pub enum FetchError {
    /// URL could not be parsed; retrying cannot help
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    /// Connection refused, timeout, TLS or body read failure
    #[error("network error: {0}")]
    Network(String),

    /// Non-2xx response
    #[error("HTTP status {0}")]
    Status(u16),

    /// 2xx response whose body looks like an error or placeholder page
    #[error("body too short ({length} < {minimum} characters)")]
    TooShort { length: usize, minimum: usize },
}

impl FetchError {
    fn is_retryable(&self) -> bool {
        !matches!(self, Self::InvalidUrl(_))
    }
}

/// Builds an HTTP client with the configured user agent and timeout
///
/// # Arguments
///
/// * `config` - The fetcher configuration
///
/// # Returns
///
/// * `Ok(Client)` - Successfully built HTTP client
/// * `Err(reqwest::Error)` - Failed to build client
pub fn build_http_client(config: &FetcherConfig) -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(config.user_agent.as_str())
        .timeout(config.timeout())
        .connect_timeout(config.timeout())
        .gzip(true)
        .brotli(true)
        .build()
}

/// Polite, retrying page fetcher shared by all workers
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: Client,
    min_interval_ms: u64,
    max_interval_ms: u64,
    retry_count: u32,
    min_body_length: usize,
}

impl Fetcher {
    /// Creates a fetcher from configuration
    pub fn new(config: &FetcherConfig) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: build_http_client(config)?,
            min_interval_ms: config.min_interval_ms,
            max_interval_ms: config.max_interval_ms,
            retry_count: config.retry_count,
            min_body_length: config.min_body_length,
        })
    }

    /// Fetches a page and decodes it with `charset`
    ///
    /// A charset declared in the response's Content-Type header takes
    /// precedence over `charset`.
    ///
    /// # Returns
    ///
    /// * `Some(body)` - A 2xx response with a plausible body
    /// * `None` - The page is unavailable after the retry budget is spent
    pub async fn fetch(&self, url: &str, charset: &str) -> Option<String> {
        let mut retries = 0;

        loop {
            if let Some(delay) = self.politeness_delay() {
                tokio::time::sleep(delay).await;
            }

            match self.fetch_once(url, charset).await {
                Ok(body) => return Some(body),
                Err(e) if !e.is_retryable() => {
                    tracing::warn!("Not fetching {}: {}", url, e);
                    return None;
                }
                Err(e) if retries < self.retry_count => {
                    retries += 1;
                    tracing::warn!(
                        "Fetch of {} failed ({}), retry {}/{}",
                        url,
                        e,
                        retries,
                        self.retry_count
                    );
                }
                Err(e) => {
                    tracing::error!(
                        "Giving up on {} after {} attempts: {}",
                        url,
                        retries + 1,
                        e
                    );
                    return None;
                }
            }
        }
    }

    /// Performs exactly one GET request
    pub async fn fetch_once(&self, url: &str, charset: &str) -> Result<String, FetchError> {
        let parsed =
            Url::parse(url).map_err(|e| FetchError::InvalidUrl(format!("{}: {}", url, e)))?;

        let response = self
            .client
            .get(parsed)
            .send()
            .await
            .map_err(classify_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let body = response
            .text_with_charset(charset)
            .await
            .map_err(classify_error)?;

        let length = body.chars().count();
        if length < self.min_body_length {
            return Err(FetchError::TooShort {
                length,
                minimum: self.min_body_length,
            });
        }

        tracing::trace!("Fetched {} ({} characters)", url, length);
        Ok(body)
    }

    // ThreadRng is not Send, so the delay is drawn outside any await.
    fn politeness_delay(&self) -> Option<Duration> {
        if self.max_interval_ms <= self.min_interval_ms {
            return None;
        }
        let millis = rand::thread_rng().gen_range(self.min_interval_ms..=self.max_interval_ms);
        Some(Duration::from_millis(millis))
    }
}

fn classify_error(e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::Network("request timeout".to_string())
    } else if e.is_connect() {
        FetchError::Network(format!("connection failed: {}", e))
    } else {
        FetchError::Network(e.to_string())
    }
}
