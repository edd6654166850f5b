//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the Storage trait.

use crate::model::{
    BookRecord, ChapterChange, ChapterSyncResult, CrawlSource, ExistingChapter,
    ExistingChapterIndex, LastChapter, NewTask, Provenance, SingleTask, TaskStatus,
};
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{SaveOutcome, Storage, StorageError, StorageResult};
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;

/// Storage format of the site-reported update time
const SOURCE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const SOURCE_COLUMNS: &str = "id, name, rule_json, enabled, created_at, updated_at";

const BOOK_COLUMNS: &str = "id, source_id, source_book_id, category_id, work_direction, name,
     author, cover_url, description, score, score_synthetic, visit_count, visit_synthetic,
     status, word_count, last_chapter_id, last_chapter_name, last_chapter_updated_at,
     source_updated_at, updated_at";

const TASK_COLUMNS: &str = "id, source_id, source_book_id, book_name, author, category_id,
     status, attempts, chapters_collected, created_at";

/// SQLite storage backend
pub struct SqliteStorage {
    conn: Connection,
}

impl SqliteStorage {
    /// Opens or creates the database at `path`
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteStorage)` - Successfully opened/created database
    /// * `Err(StorageError)` - Failed to open database
    pub fn new(path: &Path) -> StorageResult<Self> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self { conn })
    }

    /// Creates an in-memory database
    pub fn new_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        initialize_schema(&conn)?;
        Ok(Self { conn })
    }
}

// Fixed-width timestamps so TEXT ordering matches time ordering.
fn format_time(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn now_string() -> String {
    format_time(&Utc::now())
}

fn conversion_error(idx: usize, e: chrono::ParseError) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
}

fn time_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let text: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&text)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e))
}

fn optional_time_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    match row.get::<_, Option<String>>(idx)? {
        Some(_) => time_column(row, idx).map(Some),
        None => Ok(None),
    }
}

fn provenance(synthetic: bool) -> Provenance {
    if synthetic {
        Provenance::Synthetic
    } else {
        Provenance::Extracted
    }
}

fn source_from_row(row: &Row<'_>) -> rusqlite::Result<CrawlSource> {
    Ok(CrawlSource {
        id: row.get(0)?,
        name: row.get(1)?,
        rule_json: row.get(2)?,
        enabled: row.get(3)?,
        created_at: time_column(row, 4)?,
        updated_at: time_column(row, 5)?,
    })
}

fn book_from_row(row: &Row<'_>) -> rusqlite::Result<BookRecord> {
    let last_chapter = match (
        row.get::<_, Option<i64>>(15)?,
        row.get::<_, Option<String>>(16)?,
        optional_time_column(row, 17)?,
    ) {
        (Some(id), Some(name), Some(updated_at)) => Some(LastChapter {
            id,
            name,
            updated_at,
        }),
        _ => None,
    };

    let source_updated_at = match row.get::<_, Option<String>>(18)? {
        Some(text) => Some(
            NaiveDateTime::parse_from_str(&text, SOURCE_TIME_FORMAT)
                .map_err(|e| conversion_error(18, e))?,
        ),
        None => None,
    };

    Ok(BookRecord {
        id: Some(row.get(0)?),
        source_id: row.get(1)?,
        source_book_id: row.get(2)?,
        category_id: row.get(3)?,
        work_direction: row.get(4)?,
        name: Some(row.get(5)?),
        author: Some(row.get(6)?),
        cover_url: row.get(7)?,
        description: row.get(8)?,
        score: row.get(9)?,
        score_provenance: provenance(row.get(10)?),
        visit_count: row.get(11)?,
        visit_provenance: provenance(row.get(12)?),
        status: row.get(13)?,
        word_count: row.get(14)?,
        last_chapter,
        source_updated_at,
        updated_at: Some(time_column(row, 19)?),
    })
}

fn task_from_row(row: &Row<'_>) -> rusqlite::Result<SingleTask> {
    Ok(SingleTask {
        id: row.get(0)?,
        source_id: row.get(1)?,
        source_book_id: row.get(2)?,
        book_name: row.get(3)?,
        author: row.get(4)?,
        category_id: row.get(5)?,
        status: TaskStatus::from_db_string(&row.get::<_, String>(6)?)
            .unwrap_or(TaskStatus::Failed),
        attempts: row.get(7)?,
        chapters_collected: row.get(8)?,
        created_at: time_column(row, 9)?,
    })
}

fn page_offset(page: u32, page_size: u32) -> i64 {
    i64::from(page.max(1) - 1) * i64::from(page_size)
}

/// Upserts every chapter of a sync result and its content
fn write_chapters(
    conn: &Connection,
    book_id: i64,
    chapters: &ChapterSyncResult,
    now: &str,
) -> StorageResult<()> {
    let mut chapter_stmt = conn.prepare(
        "INSERT INTO chapters (id, book_id, seq, name, word_count, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
         ON CONFLICT(id) DO UPDATE SET
             name = excluded.name,
             word_count = excluded.word_count,
             updated_at = excluded.updated_at",
    )?;
    let mut content_stmt = conn.prepare(
        "INSERT INTO chapter_contents (id, chapter_id, content, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?4)
         ON CONFLICT(chapter_id) DO UPDATE SET
             content = excluded.content,
             updated_at = excluded.updated_at",
    )?;

    for (meta, content) in chapters.pairs() {
        if meta.id != content.chapter_id {
            return Err(StorageError::ConstraintViolation(format!(
                "content {} is not paired with chapter {}",
                content.id, meta.id
            )));
        }
        chapter_stmt.execute(params![
            meta.id,
            book_id,
            meta.seq as i64,
            meta.name,
            meta.word_count,
            now
        ])?;
        content_stmt.execute(params![content.id, content.chapter_id, content.content, now])?;

        if meta.change == ChapterChange::Update {
            tracing::trace!("Updated chapter {} (seq {}) of book {}", meta.id, meta.seq, book_id);
        }
    }

    Ok(())
}

impl Storage for SqliteStorage {
    // ===== Source Management =====

    fn insert_source(&mut self, name: &str, rule_json: &str) -> StorageResult<i64> {
        let now = now_string();
        self.conn.execute(
            "INSERT INTO crawl_sources (name, rule_json, enabled, created_at, updated_at)
             VALUES (?1, ?2, 0, ?3, ?3)",
            params![name, rule_json, now],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn update_source(
        &mut self,
        source_id: i64,
        name: Option<&str>,
        rule_json: Option<&str>,
    ) -> StorageResult<()> {
        let changed = self.conn.execute(
            "UPDATE crawl_sources
             SET name = COALESCE(?2, name), rule_json = COALESCE(?3, rule_json), updated_at = ?4
             WHERE id = ?1",
            params![source_id, name, rule_json, now_string()],
        )?;
        if changed == 0 {
            return Err(StorageError::NotFound(format!("source {}", source_id)));
        }
        Ok(())
    }

    fn get_source(&self, source_id: i64) -> StorageResult<Option<CrawlSource>> {
        let source = self
            .conn
            .query_row(
                &format!("SELECT {} FROM crawl_sources WHERE id = ?1", SOURCE_COLUMNS),
                params![source_id],
                source_from_row,
            )
            .optional()?;
        Ok(source)
    }

    fn list_sources(&self, page: u32, page_size: u32) -> StorageResult<Vec<CrawlSource>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM crawl_sources ORDER BY updated_at DESC, id DESC LIMIT ?1 OFFSET ?2",
            SOURCE_COLUMNS
        ))?;
        let sources = stmt
            .query_map(
                params![i64::from(page_size), page_offset(page, page_size)],
                source_from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(sources)
    }

    fn list_enabled_sources(&self) -> StorageResult<Vec<CrawlSource>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM crawl_sources WHERE enabled = 1 ORDER BY id",
            SOURCE_COLUMNS
        ))?;
        let sources = stmt
            .query_map([], source_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(sources)
    }

    fn set_source_enabled(&mut self, source_id: i64, enabled: bool) -> StorageResult<()> {
        let changed = self.conn.execute(
            "UPDATE crawl_sources SET enabled = ?2, updated_at = ?3 WHERE id = ?1",
            params![source_id, enabled, now_string()],
        )?;
        if changed == 0 {
            return Err(StorageError::NotFound(format!("source {}", source_id)));
        }
        Ok(())
    }

    // ===== Book Management =====

    fn find_book_id(&self, name: &str, author: &str) -> StorageResult<Option<i64>> {
        let id = self
            .conn
            .query_row(
                "SELECT id FROM books WHERE name = ?1 AND author = ?2",
                params![name, author],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }

    fn find_book_by_source(
        &self,
        source_id: i64,
        source_book_id: &str,
    ) -> StorageResult<Option<BookRecord>> {
        let book = self
            .conn
            .query_row(
                &format!(
                    "SELECT {} FROM books WHERE source_id = ?1 AND source_book_id = ?2
                     ORDER BY id LIMIT 1",
                    BOOK_COLUMNS
                ),
                params![source_id, source_book_id],
                book_from_row,
            )
            .optional()?;
        Ok(book)
    }

    fn get_book(&self, book_id: i64) -> StorageResult<Option<BookRecord>> {
        let book = self
            .conn
            .query_row(
                &format!("SELECT {} FROM books WHERE id = ?1", BOOK_COLUMNS),
                params![book_id],
                book_from_row,
            )
            .optional()?;
        Ok(book)
    }

    fn save_new_book(
        &mut self,
        book: &BookRecord,
        chapters: &ChapterSyncResult,
    ) -> StorageResult<SaveOutcome> {
        let (name, author) = book.dedup_key().ok_or_else(|| {
            StorageError::ConstraintViolation("book has no name or author".to_string())
        })?;

        let now = now_string();
        let tx = self.conn.transaction()?;

        let existing: Option<i64> = tx
            .query_row(
                "SELECT id FROM books WHERE name = ?1 AND author = ?2",
                params![name, author],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(id) = existing {
            return Ok(SaveOutcome::AlreadyExists(id));
        }

        let last_chapter = book.last_chapter.as_ref();
        tx.execute(
            "INSERT INTO books (source_id, source_book_id, category_id, work_direction, name,
                 author, cover_url, description, score, score_synthetic, visit_count,
                 visit_synthetic, status, word_count, last_chapter_id, last_chapter_name,
                 last_chapter_updated_at, source_updated_at, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16,
                 ?17, ?18, ?19, ?20)",
            params![
                book.source_id,
                book.source_book_id,
                book.category_id,
                book.work_direction,
                name,
                author,
                book.cover_url,
                book.description,
                book.score,
                book.score_provenance.is_synthetic(),
                book.visit_count,
                book.visit_provenance.is_synthetic(),
                book.status,
                book.word_count,
                last_chapter.map(|c| c.id),
                last_chapter.map(|c| c.name.as_str()),
                last_chapter.map(|c| format_time(&c.updated_at)),
                book.source_updated_at
                    .map(|t| t.format(SOURCE_TIME_FORMAT).to_string()),
                now,
                book.updated_at.as_ref().map(format_time).unwrap_or_else(|| now.clone()),
            ],
        )?;
        let book_id = tx.last_insert_rowid();

        write_chapters(&tx, book_id, chapters, &now)?;
        tx.commit()?;

        Ok(SaveOutcome::Inserted(book_id))
    }

    fn save_book_update(
        &mut self,
        book_id: i64,
        book: &BookRecord,
        chapters: &ChapterSyncResult,
    ) -> StorageResult<()> {
        let now = now_string();
        let tx = self.conn.transaction()?;

        let last_chapter = book.last_chapter.as_ref();
        let changed = tx.execute(
            "UPDATE books SET word_count = ?2,
                 last_chapter_id = COALESCE(?3, last_chapter_id),
                 last_chapter_name = COALESCE(?4, last_chapter_name),
                 last_chapter_updated_at = COALESCE(?5, last_chapter_updated_at),
                 updated_at = ?6
             WHERE id = ?1",
            params![
                book_id,
                book.word_count,
                last_chapter.map(|c| c.id),
                last_chapter.map(|c| c.name.as_str()),
                last_chapter.map(|c| format_time(&c.updated_at)),
                book.updated_at.as_ref().map(format_time).unwrap_or_else(|| now.clone()),
            ],
        )?;
        if changed == 0 {
            return Err(StorageError::NotFound(format!("book {}", book_id)));
        }

        write_chapters(&tx, book_id, chapters, &now)?;
        tx.commit()?;
        Ok(())
    }

    fn load_chapter_index(&self, book_id: i64) -> StorageResult<ExistingChapterIndex> {
        let mut stmt = self.conn.prepare(
            "SELECT seq, id, name, word_count FROM chapters WHERE book_id = ?1 ORDER BY seq",
        )?;
        let index = stmt
            .query_map(params![book_id], |row| {
                let seq: i64 = row.get(0)?;
                Ok((
                    seq as usize,
                    ExistingChapter {
                        id: row.get(1)?,
                        name: row.get(2)?,
                        word_count: row.get(3)?,
                    },
                ))
            })?
            .collect::<Result<ExistingChapterIndex, _>>()?;
        Ok(index)
    }

    fn get_chapter_content(&self, chapter_id: i64) -> StorageResult<Option<String>> {
        let content = self
            .conn
            .query_row(
                "SELECT content FROM chapter_contents WHERE chapter_id = ?1",
                params![chapter_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(content)
    }

    fn count_books(&self) -> StorageResult<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM books", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    fn count_chapters(&self, book_id: i64) -> StorageResult<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM chapters WHERE book_id = ?1",
            params![book_id],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    // ===== Task Queue =====

    fn insert_task(&mut self, task: &NewTask) -> StorageResult<i64> {
        self.conn.execute(
            "INSERT INTO crawl_tasks (source_id, source_book_id, book_name, author, category_id,
                 status, attempts, chapters_collected, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, 0, ?7)",
            params![
                task.source_id,
                task.source_book_id,
                task.book_name,
                task.author,
                task.category_id,
                TaskStatus::Queued.to_db_string(),
                now_string()
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn get_task(&self, task_id: i64) -> StorageResult<Option<SingleTask>> {
        let task = self
            .conn
            .query_row(
                &format!("SELECT {} FROM crawl_tasks WHERE id = ?1", TASK_COLUMNS),
                params![task_id],
                task_from_row,
            )
            .optional()?;
        Ok(task)
    }

    fn delete_task(&mut self, task_id: i64) -> StorageResult<bool> {
        let deleted = self
            .conn
            .execute("DELETE FROM crawl_tasks WHERE id = ?1", params![task_id])?;
        Ok(deleted > 0)
    }

    fn list_tasks(&self, page: u32, page_size: u32) -> StorageResult<Vec<SingleTask>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM crawl_tasks ORDER BY created_at DESC, id DESC LIMIT ?1 OFFSET ?2",
            TASK_COLUMNS
        ))?;
        let tasks = stmt
            .query_map(
                params![i64::from(page_size), page_offset(page, page_size)],
                task_from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(tasks)
    }

    fn next_queued_task(&self) -> StorageResult<Option<SingleTask>> {
        let task = self
            .conn
            .query_row(
                &format!(
                    "SELECT {} FROM crawl_tasks WHERE status = ?1
                     ORDER BY created_at ASC, id ASC LIMIT 1",
                    TASK_COLUMNS
                ),
                params![TaskStatus::Queued.to_db_string()],
                task_from_row,
            )
            .optional()?;
        Ok(task)
    }

    fn update_task(
        &mut self,
        task_id: i64,
        status: TaskStatus,
        attempts: u8,
        chapters_collected: i64,
    ) -> StorageResult<()> {
        let changed = self.conn.execute(
            "UPDATE crawl_tasks SET status = ?2, attempts = ?3, chapters_collected = ?4
             WHERE id = ?1",
            params![task_id, status.to_db_string(), attempts, chapters_collected],
        )?;
        if changed == 0 {
            return Err(StorageError::NotFound(format!("task {}", task_id)));
        }
        Ok(())
    }

    fn fill_task_hints(
        &mut self,
        task_id: i64,
        book_name: &str,
        author: &str,
    ) -> StorageResult<()> {
        self.conn.execute(
            "UPDATE crawl_tasks
             SET book_name = COALESCE(NULLIF(TRIM(book_name), ''), ?2),
                 author = COALESCE(NULLIF(TRIM(author), ''), ?3)
             WHERE id = ?1",
            params![task_id, book_name, author],
        )?;
        Ok(())
    }

    fn requeue_running_tasks(&mut self) -> StorageResult<usize> {
        let requeued = self.conn.execute(
            "UPDATE crawl_tasks SET status = ?1 WHERE status = ?2",
            params![
                TaskStatus::Queued.to_db_string(),
                TaskStatus::Running.to_db_string()
            ],
        )?;
        Ok(requeued)
    }
}
