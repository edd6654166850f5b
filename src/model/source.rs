use chrono::{DateTime, Utc};
use serde::Serialize;

/// A configured source site and its rule blob
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CrawlSource {
    pub id: i64,
    pub name: String,
    /// RuleSet JSON, parsed when the source is enabled
    pub rule_json: String,
    /// Persisted flag; workers run only while the source is enabled
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
