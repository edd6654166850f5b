use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// Category whose books are tagged with work direction 1
pub const SECONDARY_DIRECTION_CATEGORY: u32 = 7;

/// Score stored when neither ranking signal was found (6.5 out of 10)
pub const DEFAULT_SCORE: i32 = 65;

/// Visit count stored when neither ranking signal was found
pub const DEFAULT_VISIT_COUNT: i64 = 50_000;

/// Where a ranking signal came from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    /// Read from the source page
    #[default]
    Extracted,
    /// Filled in by the ranking heuristic; not a measured value
    Synthetic,
}

impl Provenance {
    pub fn is_synthetic(&self) -> bool {
        matches!(self, Self::Synthetic)
    }
}

/// Pointer to a book's most recent chapter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastChapter {
    pub id: i64,
    pub name: String,
    pub updated_at: DateTime<Utc>,
}

/// Book metadata extracted from a source site
///
/// `(name, author)` is the dedup key across all ingested books. A record
/// without a name is empty and must not be persisted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BookRecord {
    /// Storage ID, set once the book has been persisted
    pub id: Option<i64>,
    pub source_id: Option<i64>,
    pub source_book_id: String,
    pub category_id: Option<u32>,
    pub work_direction: u8,
    pub name: Option<String>,
    pub author: Option<String>,
    pub cover_url: Option<String>,
    /// Ten times the site's score ("8.7" is stored as 87)
    pub score: Option<i32>,
    pub score_provenance: Provenance,
    pub visit_count: Option<i64>,
    pub visit_provenance: Provenance,
    pub description: Option<String>,
    pub status: Option<u8>,
    pub word_count: i64,
    pub last_chapter: Option<LastChapter>,
    /// Last update time as shown by the source site
    pub source_updated_at: Option<NaiveDateTime>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl BookRecord {
    /// Creates an empty record for a source-site book
    pub fn new(source_book_id: impl Into<String>) -> Self {
        Self {
            source_book_id: source_book_id.into(),
            ..Self::default()
        }
    }

    /// True when the name pattern did not match
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
    }

    /// The `(name, author)` pair, when both were extracted
    pub fn dedup_key(&self) -> Option<(&str, &str)> {
        match (self.name.as_deref(), self.author.as_deref()) {
            (Some(name), Some(author)) => Some((name, author)),
            _ => None,
        }
    }

    /// Assigns the category and the work direction that follows from it
    pub fn set_category(&mut self, category_id: u32) {
        self.category_id = Some(category_id);
        self.work_direction = u8::from(category_id == SECONDARY_DIRECTION_CATEGORY);
    }

    /// Fills in missing ranking signals
    ///
    /// The values produced here are synthetic: they keep ranking features
    /// populated for sites that omit a signal and are flagged as such.
    ///
    /// | score | visits | result |
    /// |-------|--------|--------|
    /// | none  | v      | score = min(100, 50 + v / 100000) |
    /// | s     | none   | visits = s * 10000 |
    /// | none  | none   | score = 65, visits = 50000 |
    pub fn apply_ranking_defaults(&mut self) {
        match (self.score, self.visit_count) {
            (None, Some(visits)) => {
                self.score = Some(std::cmp::min(100, 50 + visits / 100_000) as i32);
                self.score_provenance = Provenance::Synthetic;
            }
            (Some(score), None) => {
                self.visit_count = Some(i64::from(score) * 10_000);
                self.visit_provenance = Provenance::Synthetic;
            }
            (None, None) => {
                self.score = Some(DEFAULT_SCORE);
                self.visit_count = Some(DEFAULT_VISIT_COUNT);
                self.score_provenance = Provenance::Synthetic;
                self.visit_provenance = Provenance::Synthetic;
            }
            (Some(_), Some(_)) => {}
        }
    }
}
