//! Incremental chapter sync
//!
//! Walks a book's chapter index page and downloads only the chapters that
//! are new or renamed relative to an [`ExistingChapterIndex`]. Sequence
//! numbers are positional: the n-th chapter link on the index page is
//! sequence n, whatever ID the site embeds in it.

use crate::crawler::progress::TaskProgress;
use crate::crawler::Fetcher;
use crate::id::IdGenerator;
use crate::model::{
    BookRecord, ChapterChange, ChapterContent, ChapterMeta, ChapterSyncResult,
    ExistingChapterIndex, LastChapter,
};
use crate::rules::{capture_all, filter, non_blank, PatternCache, RuleSet, UrlParams};
use chrono::Utc;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Per-call context of a sync run
#[derive(Debug, Clone, Copy)]
pub struct SyncContext<'a> {
    /// Checked before the index fetch and before every chapter fetch
    pub cancel: &'a CancellationToken,
    /// Counter of the single-book task this sync runs for, if any
    pub progress: Option<TaskProgress<'a>>,
}

impl<'a> SyncContext<'a> {
    pub fn new(cancel: &'a CancellationToken) -> Self {
        Self {
            cancel,
            progress: None,
        }
    }

    pub fn with_progress(mut self, progress: TaskProgress<'a>) -> Self {
        self.progress = Some(progress);
        self
    }
}

/// Fetches new and changed chapters of a book
#[derive(Debug, Clone)]
pub struct ChapterSyncEngine {
    fetcher: Arc<Fetcher>,
    patterns: Arc<PatternCache>,
    ids: Arc<IdGenerator>,
}

impl ChapterSyncEngine {
    pub fn new(fetcher: Arc<Fetcher>, patterns: Arc<PatternCache>, ids: Arc<IdGenerator>) -> Self {
        Self {
            fetcher,
            patterns,
            ids,
        }
    }

    /// Syncs the chapters of one book
    ///
    /// On success the book's word count, last-chapter pointer and update
    /// time are updated and the returned result is non-empty with one content
    /// entry per chapter. Otherwise the result is empty and `book` is left
    /// untouched. Cancellation also yields an empty result.
    ///
    /// # Arguments
    ///
    /// * `source_book_id` - The book's ID on the source site
    /// * `book` - The book being synced; its word count is the baseline
    /// * `rules` - The source's rule set
    /// * `existing` - Chapters already stored, keyed by sequence number
    /// * `ctx` - Cancellation and progress reporting
    pub async fn sync(
        &self,
        source_book_id: &str,
        book: &mut BookRecord,
        rules: &RuleSet,
        existing: &ExistingChapterIndex,
        ctx: SyncContext<'_>,
    ) -> ChapterSyncResult {
        let template = match rules.content_url_template() {
            Ok(template) => template,
            Err(e) => {
                tracing::error!("Content URL template rejected: {}", e);
                return ChapterSyncResult::empty();
            }
        };
        let (id_re, name_re) = match (
            self.patterns.get(&rules.index_id_pattern),
            self.patterns.get(&rules.index_name_pattern),
        ) {
            (Ok(id_re), Ok(name_re)) => (id_re, name_re),
            (Err(e), _) | (_, Err(e)) => {
                tracing::error!("Chapter index pattern rejected: {}", e);
                return ChapterSyncResult::empty();
            }
        };

        if ctx.cancel.is_cancelled() {
            return ChapterSyncResult::empty();
        }

        let index_url = rules.book_index_url_for(source_book_id);
        let Some(index_html) = self.fetcher.fetch(&index_url, &rules.charset).await else {
            tracing::warn!("Chapter index of book {} unavailable", source_book_id);
            return ChapterSyncResult::empty();
        };

        let listing = match non_blank(&rules.book_index_start) {
            Some(marker) => match index_html.find(marker) {
                Some(pos) => &index_html[pos + marker.len()..],
                None => {
                    tracing::debug!("Index start marker not found for book {}", source_book_id);
                    index_html.as_str()
                }
            },
            None => index_html.as_str(),
        };

        let index_ids = capture_all(&id_re, listing);
        let index_names = capture_all(&name_re, listing);
        if index_ids.len() != index_names.len() {
            tracing::debug!(
                "Index of book {} has {} chapter IDs and {} names; using the first {}",
                source_book_id,
                index_ids.len(),
                index_names.len(),
                index_ids.len().min(index_names.len())
            );
        }

        let filters = filter::compile_filters(&self.patterns, non_blank(&rules.filter_content));
        let pending_marker = rules.pending_content_marker();

        let mut result = ChapterSyncResult::empty();

        for (seq, (index_id, name)) in index_ids.into_iter().zip(index_names).enumerate() {
            let stored = existing.get(seq);
            if let Some(stored) = stored {
                if filter::strip_whitespace(&stored.name) == filter::strip_whitespace(name) {
                    continue;
                }
            }

            if ctx.cancel.is_cancelled() {
                tracing::info!("Sync of book {} cancelled at chapter {}", source_book_id, seq);
                return ChapterSyncResult::empty();
            }

            let url = template.render(&UrlParams {
                book_id: source_book_id,
                index_id,
            });
            let Some(page) = self.fetcher.fetch(&url, &rules.charset).await else {
                tracing::warn!("Skipping unavailable chapter {} ({})", seq, url);
                continue;
            };

            if page.contains(pending_marker) {
                tracing::debug!("Chapter {} of book {} not typed up yet", seq, source_book_id);
                continue;
            }

            let Some(raw) = filter::between(&page, &rules.content_start, &rules.content_end) else {
                tracing::warn!("Content markers not found in chapter {} ({})", seq, url);
                continue;
            };

            let filtered = filter::apply_filters(raw, &filters);
            let content = filter::strip_trailing_breaks(&self.patterns, &filtered);
            let word_count = filter::word_count(&self.patterns, &content);

            let (chapter_id, change, delta) = match stored {
                Some(stored) => (stored.id, ChapterChange::Update, word_count - stored.word_count),
                None => (self.ids.next_id(), ChapterChange::Insert, word_count),
            };

            result.chapters.push(ChapterMeta {
                id: chapter_id,
                seq,
                name: name.to_string(),
                word_count,
                change,
            });
            result.contents.push(ChapterContent {
                id: self.ids.next_id(),
                chapter_id,
                content,
            });
            result.word_count_delta += delta;

            if let Some(progress) = ctx.progress {
                progress.record_chapter();
            }
            tracing::debug!("Fetched chapter {} '{}' ({} characters)", seq, name, word_count);
        }

        if !result.is_ok() {
            return ChapterSyncResult::empty();
        }

        let now = Utc::now();
        if let Some(last) = result.chapters.last() {
            book.last_chapter = Some(LastChapter {
                id: last.id,
                name: last.name.clone(),
                updated_at: now,
            });
        }
        book.word_count += result.word_count_delta;
        book.updated_at = Some(now);

        result
    }
}
