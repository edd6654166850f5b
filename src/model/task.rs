//! Single-book crawl tasks

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

/// Lifecycle of a single-book task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting to be picked up (also after a failed attempt with budget left)
    Queued,

    /// Currently being processed by the task loop
    Running,

    // ===== Terminal States =====
    Success,

    /// Attempt budget exhausted; needs operator attention
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed)
    }

    /// Converts the status to its database string representation
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }

    /// Parses a status from its database string representation
    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(Self::Queued),
            "running" => Some(Self::Running),
            "success" => Some(Self::Success),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}

/// A request to ingest one specific book from a source
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SingleTask {
    pub id: i64,
    pub source_id: i64,
    pub source_book_id: String,
    /// Display name hint; filled from the extracted record when blank
    pub book_name: Option<String>,
    pub author: Option<String>,
    pub category_id: Option<u32>,
    pub status: TaskStatus,
    pub attempts: u8,
    pub chapters_collected: i64,
    pub created_at: DateTime<Utc>,
}

/// Fields supplied when creating a task
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewTask {
    pub source_id: i64,
    pub source_book_id: String,
    pub book_name: Option<String>,
    pub author: Option<String>,
    pub category_id: Option<u32>,
}
