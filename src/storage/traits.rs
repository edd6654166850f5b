//! Storage traits and error types
//!
//! This module defines the trait interface for storage backends and
//! associated error types.

use crate::model::{
    BookRecord, ChapterSyncResult, CrawlSource, ExistingChapterIndex, NewTask, SingleTask,
    TaskStatus,
};
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("Record not found: {0}")]
    NotFound(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Outcome of persisting a newly extracted book
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    /// The book and its chapters were written; carries the new book ID
    Inserted(i64),
    /// A book with the same (name, author) already exists; nothing was written
    AlreadyExists(i64),
}

/// Trait for storage backend implementations
///
/// This covers the rule store, the book/chapter persistence and the task
/// queue used by the orchestrator.
pub trait Storage {
    // ===== Source Management =====

    /// Creates a disabled source and returns its ID
    fn insert_source(&mut self, name: &str, rule_json: &str) -> StorageResult<i64>;

    /// Replaces the name and/or rule blob of a source
    fn update_source(
        &mut self,
        source_id: i64,
        name: Option<&str>,
        rule_json: Option<&str>,
    ) -> StorageResult<()>;

    /// Gets a source by ID
    fn get_source(&self, source_id: i64) -> StorageResult<Option<CrawlSource>>;

    /// Lists sources by most recent update, `page` starting at 1
    fn list_sources(&self, page: u32, page_size: u32) -> StorageResult<Vec<CrawlSource>>;

    /// Gets every source whose persisted flag is enabled
    fn list_enabled_sources(&self) -> StorageResult<Vec<CrawlSource>>;

    /// Sets the persisted enabled flag
    fn set_source_enabled(&mut self, source_id: i64, enabled: bool) -> StorageResult<()>;

    // ===== Book Management =====

    /// Looks up a book ID by its dedup key
    fn find_book_id(&self, name: &str, author: &str) -> StorageResult<Option<i64>>;

    /// Looks up a book by the ID it has on its source site
    fn find_book_by_source(
        &self,
        source_id: i64,
        source_book_id: &str,
    ) -> StorageResult<Option<BookRecord>>;

    /// Gets a book by ID
    fn get_book(&self, book_id: i64) -> StorageResult<Option<BookRecord>>;

    /// Persists a new book together with its chapters in one transaction
    ///
    /// The (name, author) check is repeated inside the transaction, so two
    /// workers racing on the same book yield one insert and one
    /// [`SaveOutcome::AlreadyExists`].
    fn save_new_book(
        &mut self,
        book: &BookRecord,
        chapters: &ChapterSyncResult,
    ) -> StorageResult<SaveOutcome>;

    /// Writes changed chapters and the book's aggregate fields
    fn save_book_update(
        &mut self,
        book_id: i64,
        book: &BookRecord,
        chapters: &ChapterSyncResult,
    ) -> StorageResult<()>;

    /// Builds the chapter index used to diff a re-sync
    fn load_chapter_index(&self, book_id: i64) -> StorageResult<ExistingChapterIndex>;

    /// Gets the stored text of a chapter
    fn get_chapter_content(&self, chapter_id: i64) -> StorageResult<Option<String>>;

    /// Counts stored books
    fn count_books(&self) -> StorageResult<u64>;

    /// Counts stored chapters of a book
    fn count_chapters(&self, book_id: i64) -> StorageResult<u64>;

    // ===== Task Queue =====

    /// Creates a Queued task with no attempts and returns its ID
    fn insert_task(&mut self, task: &NewTask) -> StorageResult<i64>;

    /// Gets a task by ID
    fn get_task(&self, task_id: i64) -> StorageResult<Option<SingleTask>>;

    /// Deletes a task; returns false if it did not exist
    fn delete_task(&mut self, task_id: i64) -> StorageResult<bool>;

    /// Lists tasks newest first, `page` starting at 1
    fn list_tasks(&self, page: u32, page_size: u32) -> StorageResult<Vec<SingleTask>>;

    /// Gets the oldest Queued task
    fn next_queued_task(&self) -> StorageResult<Option<SingleTask>>;

    /// Updates status and attempt bookkeeping after a task attempt
    fn update_task(
        &mut self,
        task_id: i64,
        status: TaskStatus,
        attempts: u8,
        chapters_collected: i64,
    ) -> StorageResult<()>;

    /// Fills blank name/author hints of a task
    fn fill_task_hints(&mut self, task_id: i64, book_name: &str, author: &str)
        -> StorageResult<()>;

    /// Returns tasks left Running by an interrupted process to the queue
    fn requeue_running_tasks(&mut self) -> StorageResult<usize>;
}
