//! Crawler module for rule-driven book acquisition
//!
//! This module contains the acquisition pipeline, including:
//! - HTTP fetching with politeness delay and retry
//! - Book detail extraction
//! - Incremental chapter sync
//! - Per-source workers and the single-book task queue

mod chapters;
mod fetcher;
mod metadata;
mod orchestrator;
mod progress;
mod workers;

pub use chapters::{ChapterSyncEngine, SyncContext};
pub use fetcher::{build_http_client, FetchError, Fetcher};
pub use metadata::{parse_update_time, translate_time_format, MetadataExtractor};
pub use orchestrator::{IngestOutcome, Orchestrator};
pub use progress::{ProgressTracker, TaskProgress};
