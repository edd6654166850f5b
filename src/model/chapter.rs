//! Chapter index and sync result types

use std::collections::HashMap;

/// Minimal projection of a stored chapter, enough to decide whether it changed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExistingChapter {
    pub id: i64,
    pub name: String,
    pub word_count: i64,
}

/// Stored chapters of one book keyed by 0-based sequence number
///
/// Built by the caller before a sync run and only borrowed by the sync engine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExistingChapterIndex {
    chapters: HashMap<usize, ExistingChapter>,
}

impl ExistingChapterIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, seq: usize, chapter: ExistingChapter) {
        self.chapters.insert(seq, chapter);
    }

    pub fn get(&self, seq: usize) -> Option<&ExistingChapter> {
        self.chapters.get(&seq)
    }

    pub fn len(&self) -> usize {
        self.chapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chapters.is_empty()
    }
}

impl FromIterator<(usize, ExistingChapter)> for ExistingChapterIndex {
    fn from_iter<I: IntoIterator<Item = (usize, ExistingChapter)>>(iter: I) -> Self {
        Self {
            chapters: iter.into_iter().collect(),
        }
    }
}

/// Whether a synced chapter is new or replaces a stored one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChapterChange {
    Insert,
    Update,
}

/// Metadata of a fetched chapter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChapterMeta {
    /// Reused from the existing index on update, freshly generated on insert
    pub id: i64,
    pub seq: usize,
    pub name: String,
    pub word_count: i64,
    pub change: ChapterChange,
}

/// Cleaned text of a fetched chapter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChapterContent {
    pub id: i64,
    pub chapter_id: i64,
    pub content: String,
}

/// Output of one chapter sync run
///
/// `chapters[i]` and `contents[i]` describe the same chapter. An empty result
/// means nothing changed or the run failed; a partial result is never returned.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChapterSyncResult {
    pub chapters: Vec<ChapterMeta>,
    pub contents: Vec<ChapterContent>,
    /// Net change to the book's aggregate word count
    pub word_count_delta: i64,
}

impl ChapterSyncResult {
    pub fn empty() -> Self {
        Self::default()
    }

    /// True when the result holds at least one chapter and both lists line up
    pub fn is_ok(&self) -> bool {
        !self.chapters.is_empty() && self.chapters.len() == self.contents.len()
    }

    pub fn len(&self) -> usize {
        self.chapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chapters.is_empty()
    }

    /// Iterates over metadata/content pairs in sequence order
    pub fn pairs(&self) -> impl Iterator<Item = (&ChapterMeta, &ChapterContent)> {
        self.chapters.iter().zip(self.contents.iter())
    }
}
