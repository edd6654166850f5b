//! Records produced and consumed by the engine

mod book;
mod chapter;
mod source;
mod task;

pub use book::{
    BookRecord, LastChapter, Provenance, DEFAULT_SCORE, DEFAULT_VISIT_COUNT,
    SECONDARY_DIRECTION_CATEGORY,
};
pub use chapter::{
    ChapterChange, ChapterContent, ChapterMeta, ChapterSyncResult, ExistingChapter,
    ExistingChapterIndex,
};
pub use source::CrawlSource;
pub use task::{NewTask, SingleTask, TaskStatus};
