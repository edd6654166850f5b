//! Database schema definitions
//!
//! This module contains all SQL schema definitions for the Rulecrawl database.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- Configured source sites and their rule blobs
CREATE TABLE IF NOT EXISTS crawl_sources (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    rule_json TEXT NOT NULL,
    enabled INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_crawl_sources_updated ON crawl_sources(updated_at);

-- Ingested books, deduplicated by (name, author)
CREATE TABLE IF NOT EXISTS books (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    source_id INTEGER REFERENCES crawl_sources(id) ON DELETE SET NULL,
    source_book_id TEXT NOT NULL,
    category_id INTEGER,
    work_direction INTEGER NOT NULL DEFAULT 0,
    name TEXT NOT NULL,
    author TEXT NOT NULL,
    cover_url TEXT,
    description TEXT,
    score INTEGER,
    score_synthetic INTEGER NOT NULL DEFAULT 0,
    visit_count INTEGER,
    visit_synthetic INTEGER NOT NULL DEFAULT 0,
    status INTEGER,
    word_count INTEGER NOT NULL DEFAULT 0,
    last_chapter_id INTEGER,
    last_chapter_name TEXT,
    last_chapter_updated_at TEXT,
    source_updated_at TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE(name, author)
);

CREATE INDEX IF NOT EXISTS idx_books_source ON books(source_id, source_book_id);

-- Chapter metadata; seq is the 0-based position on the source index page
CREATE TABLE IF NOT EXISTS chapters (
    id INTEGER PRIMARY KEY,
    book_id INTEGER NOT NULL REFERENCES books(id) ON DELETE CASCADE,
    seq INTEGER NOT NULL,
    name TEXT NOT NULL,
    word_count INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE(book_id, seq)
);

-- Chapter text, one row per chapter
CREATE TABLE IF NOT EXISTS chapter_contents (
    id INTEGER PRIMARY KEY,
    chapter_id INTEGER NOT NULL UNIQUE REFERENCES chapters(id) ON DELETE CASCADE,
    content TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

-- Single-book tasks, drained oldest first
CREATE TABLE IF NOT EXISTS crawl_tasks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    source_id INTEGER NOT NULL REFERENCES crawl_sources(id) ON DELETE CASCADE,
    source_book_id TEXT NOT NULL,
    book_name TEXT,
    author TEXT,
    category_id INTEGER,
    status TEXT NOT NULL,
    attempts INTEGER NOT NULL DEFAULT 0,
    chapters_collected INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_crawl_tasks_status ON crawl_tasks(status, created_at);
"#;

/// Initializes the database schema
///
/// # Arguments
///
/// * `conn` - The database connection
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}
