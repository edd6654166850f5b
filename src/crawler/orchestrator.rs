//! Crawl orchestration
//!
//! The orchestrator owns the lifecycle of every source: enabling a source
//! parses and validates its rules, then spawns one worker per category plus
//! an optional update worker. Disabling cancels those workers and waits for
//! them to stop. A separate loop drains the single-book task queue.
//!
//! All workers share one [`Fetcher`], one [`PatternCache`] and one storage
//! handle. Storage locks are held for one call at a time, never across a
//! fetch.

use crate::config::{Config, CrawlerConfig};
use crate::crawler::chapters::{ChapterSyncEngine, SyncContext};
use crate::crawler::progress::{ProgressTracker, TaskProgress};
use crate::crawler::workers;
use crate::crawler::{Fetcher, MetadataExtractor};
use crate::id::IdGenerator;
use crate::model::{
    BookRecord, CrawlSource, ExistingChapterIndex, NewTask, SingleTask, TaskStatus,
};
use crate::rules::{non_blank, PatternCache, RuleSet};
use crate::storage::{SaveOutcome, SharedStorage, SqliteStorage, Storage};
use crate::{CrawlError, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// What happened to one book passed through the ingest pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// New book stored with this many chapters
    Stored { book_id: i64, chapters: usize },
    /// A book with the same (name, author) was already stored; nothing changed
    AlreadyIngested { book_id: i64 },
    /// Detail page unavailable or the name/author patterns did not match
    Unavailable,
    /// No chapter could be collected (or the sync was cancelled)
    NoChapters,
}

impl IngestOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Stored { .. } | Self::AlreadyIngested { .. })
    }

    pub fn book_id(&self) -> Option<i64> {
        match self {
            Self::Stored { book_id, .. } | Self::AlreadyIngested { book_id } => Some(*book_id),
            _ => None,
        }
    }
}

/// Workers of one enabled source
struct SourceRuntime {
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
    rules: Arc<RuleSet>,
}

struct TaskLoop {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// State shared between the orchestrator and its spawned workers
pub(crate) struct Shared {
    pub(crate) config: CrawlerConfig,
    pub(crate) storage: SharedStorage,
    pub(crate) patterns: Arc<PatternCache>,
    pub(crate) fetcher: Arc<Fetcher>,
    extractor: MetadataExtractor,
    chapters: ChapterSyncEngine,
    progress: ProgressTracker,
    sources: Mutex<HashMap<i64, SourceRuntime>>,
    task_loop: Mutex<Option<TaskLoop>>,
}

fn lock_poisoned<T>(what: &str, _: std::sync::PoisonError<T>) -> CrawlError {
    CrawlError::Lock(format!("{} lock poisoned", what))
}

impl Shared {
    pub(crate) fn storage(&self) -> Result<MutexGuard<'_, SqliteStorage>> {
        self.storage.lock().map_err(|e| lock_poisoned("storage", e))
    }

    fn sources(&self) -> Result<MutexGuard<'_, HashMap<i64, SourceRuntime>>> {
        self.sources.lock().map_err(|e| lock_poisoned("source registry", e))
    }

    fn task_loop(&self) -> Result<MutexGuard<'_, Option<TaskLoop>>> {
        self.task_loop.lock().map_err(|e| lock_poisoned("task loop", e))
    }

    /// Runs the full single-book pipeline: extract, dedup, sync, persist
    pub(crate) async fn ingest(
        &self,
        source_id: i64,
        rules: &RuleSet,
        category_id: Option<u32>,
        source_book_id: &str,
        ctx: SyncContext<'_>,
    ) -> Result<IngestOutcome> {
        let mut book = self.extractor.extract_book(rules, source_book_id).await;

        let existing = match book.dedup_key() {
            Some((name, author)) => self.storage()?.find_book_id(name, author)?,
            None => {
                tracing::debug!(
                    "No usable record for book {} of source {}",
                    source_book_id,
                    source_id
                );
                return Ok(IngestOutcome::Unavailable);
            }
        };
        if let Some(book_id) = existing {
            tracing::debug!("Book {} already ingested as {}", source_book_id, book_id);
            return Ok(IngestOutcome::AlreadyIngested { book_id });
        }

        book.source_id = Some(source_id);
        if let Some(category_id) = category_id {
            book.set_category(category_id);
        }

        let chapters = self
            .chapters
            .sync(source_book_id, &mut book, rules, &ExistingChapterIndex::new(), ctx)
            .await;
        if !chapters.is_ok() {
            tracing::warn!(
                "No chapters collected for '{}' ({})",
                book.name.as_deref().unwrap_or_default(),
                source_book_id
            );
            return Ok(IngestOutcome::NoChapters);
        }

        let saved = self.storage()?.save_new_book(&book, &chapters)?;
        match saved {
            SaveOutcome::Inserted(book_id) => {
                self.progress
                    .add_source_chapters(source_id, chapters.len() as u64);
                tracing::info!(
                    "Stored '{}' by {} with {} chapters",
                    book.name.as_deref().unwrap_or_default(),
                    book.author.as_deref().unwrap_or_default(),
                    chapters.len()
                );
                Ok(IngestOutcome::Stored {
                    book_id,
                    chapters: chapters.len(),
                })
            }
            SaveOutcome::AlreadyExists(book_id) => Ok(IngestOutcome::AlreadyIngested { book_id }),
        }
    }

    /// Re-syncs a stored book against its source, returning the number of
    /// new or changed chapters written
    pub(crate) async fn resync(
        &self,
        book_id: i64,
        mut book: BookRecord,
        rules: &RuleSet,
        cancel: &CancellationToken,
    ) -> Result<usize> {
        let existing = self.storage()?.load_chapter_index(book_id)?;
        let source_book_id = book.source_book_id.clone();

        let chapters = self
            .chapters
            .sync(&source_book_id, &mut book, rules, &existing, SyncContext::new(cancel))
            .await;
        if !chapters.is_ok() {
            tracing::debug!("Book {} has no new chapters", book_id);
            return Ok(0);
        }

        self.storage()?.save_book_update(book_id, &book, &chapters)?;
        if let Some(source_id) = book.source_id {
            self.progress
                .add_source_chapters(source_id, chapters.len() as u64);
        }
        tracing::info!("Book {} updated with {} chapters", book_id, chapters.len());
        Ok(chapters.len())
    }

    /// Processes the oldest queued task, if any
    pub(crate) async fn run_next_task(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Option<(i64, TaskStatus)>> {
        let task = self.storage()?.next_queued_task()?;
        let Some(task) = task else {
            return Ok(None);
        };

        self.storage()?
            .update_task(task.id, TaskStatus::Running, task.attempts, task.chapters_collected)?;
        self.progress.start_task(task.id);
        tracing::info!(
            "Running task {} (book {} of source {}, attempt {})",
            task.id,
            task.source_book_id,
            task.source_id,
            task.attempts + 1
        );

        let outcome = self.attempt_task(&task, cancel).await;
        let collected = self.progress.get_progress(task.id).unwrap_or(0) as i64;
        self.progress.clear_progress(task.id);

        let attempts = task.attempts.saturating_add(1);
        let succeeded = match &outcome {
            Ok(outcome) => outcome.is_success(),
            Err(e) => {
                tracing::error!("Task {} failed: {}", task.id, e);
                false
            }
        };

        let status = if succeeded {
            TaskStatus::Success
        } else if attempts >= self.config.max_task_attempts {
            tracing::error!("Task {} failed {} times; giving up", task.id, attempts);
            TaskStatus::Failed
        } else {
            TaskStatus::Queued
        };

        let chapters_collected = if succeeded {
            collected
        } else {
            task.chapters_collected
        };
        self.storage()?
            .update_task(task.id, status, attempts, chapters_collected)?;

        if let Ok(outcome) = outcome {
            if let Some(book_id) = outcome.book_id() {
                let mut storage = self.storage()?;
                if let Some(book) = storage.get_book(book_id)? {
                    if let Some((name, author)) = book.dedup_key() {
                        storage.fill_task_hints(task.id, name, author)?;
                    }
                }
            }
        }

        Ok(Some((task.id, status)))
    }

    async fn attempt_task(
        &self,
        task: &SingleTask,
        cancel: &CancellationToken,
    ) -> Result<IngestOutcome> {
        let source = self
            .storage()?
            .get_source(task.source_id)?
            .ok_or(CrawlError::SourceNotFound(task.source_id))?;
        let rules = RuleSet::load(&source.rule_json, &self.patterns)?;

        let progress = TaskProgress::new(&self.progress, task.id);
        let ctx = SyncContext::new(cancel).with_progress(progress);
        self.ingest(task.source_id, &rules, task.category_id, &task.source_book_id, ctx)
            .await
    }
}

/// Public handle to the engine
///
/// Cheap to clone; clones share the same workers and state.
#[derive(Clone)]
pub struct Orchestrator {
    shared: Arc<Shared>,
}

impl Orchestrator {
    /// Creates an orchestrator over an open storage handle
    ///
    /// Nothing runs until sources are enabled or the task loop is started.
    pub fn new(config: &Config, storage: SharedStorage) -> Result<Self> {
        let fetcher = Arc::new(Fetcher::new(&config.fetcher)?);
        let patterns = Arc::new(PatternCache::new());
        let ids = Arc::new(IdGenerator::default());

        Ok(Self {
            shared: Arc::new(Shared {
                config: config.crawler.clone(),
                storage,
                extractor: MetadataExtractor::new(Arc::clone(&fetcher), Arc::clone(&patterns)),
                chapters: ChapterSyncEngine::new(
                    Arc::clone(&fetcher),
                    Arc::clone(&patterns),
                    ids,
                ),
                patterns,
                fetcher,
                progress: ProgressTracker::new(),
                sources: Mutex::new(HashMap::new()),
                task_loop: Mutex::new(None),
            }),
        })
    }

    pub fn storage(&self) -> &SharedStorage {
        &self.shared.storage
    }

    pub fn patterns(&self) -> &PatternCache {
        &self.shared.patterns
    }

    // ===== Source Administration =====

    /// Stores a new, disabled source
    ///
    /// The rule blob is only validated when the source is enabled.
    ///
    /// # Arguments
    ///
    /// * `name` - Display name of the source
    /// * `rule_json` - The source's rule set as JSON text
    ///
    /// # Returns
    ///
    /// * `Ok(i64)` - ID of the new source
    /// * `Err(CrawlError)` - The source could not be stored
    pub fn add_source(&self, name: &str, rule_json: &str) -> Result<i64> {
        let id = self.shared.storage()?.insert_source(name, rule_json)?;
        tracing::info!("Added source {} '{}'", id, name);
        Ok(id)
    }

    /// Renames a source and/or replaces its rules
    ///
    /// A running source is disabled first and has to be enabled again to
    /// pick up the new rules.
    ///
    /// # Arguments
    ///
    /// * `source_id` - The source to change
    /// * `name` - New display name, if any
    /// * `rule_json` - Replacement rule JSON, if any
    pub async fn update_source(
        &self,
        source_id: i64,
        name: Option<&str>,
        rule_json: Option<&str>,
    ) -> Result<()> {
        if self.is_running(source_id)? {
            self.disable_source(source_id).await?;
        }
        self.shared
            .storage()?
            .update_source(source_id, name, rule_json)
            .map_err(|e| match e {
                crate::storage::StorageError::NotFound(_) => CrawlError::SourceNotFound(source_id),
                other => other.into(),
            })
    }

    pub fn get_source(&self, source_id: i64) -> Result<CrawlSource> {
        self.shared
            .storage()?
            .get_source(source_id)?
            .ok_or(CrawlError::SourceNotFound(source_id))
    }

    /// Lists sources by most recent update, `page` starting at 1
    pub fn list_sources(&self, page: u32, page_size: u32) -> Result<Vec<CrawlSource>> {
        Ok(self.shared.storage()?.list_sources(page, page_size)?)
    }

    /// Whether workers are currently running for a source
    pub fn is_running(&self, source_id: i64) -> Result<bool> {
        Ok(self.shared.sources()?.contains_key(&source_id))
    }

    /// Validates a source's rules and starts its workers
    ///
    /// Enabling a running source is a no-op. A malformed rule blob fails
    /// with [`CrawlError::Rule`] and leaves the source disabled. Must be
    /// called from within a Tokio runtime.
    pub fn enable_source(&self, source_id: i64) -> Result<()> {
        let source = self.get_source(source_id)?;
        if self.is_running(source_id)? {
            tracing::debug!("Source {} already running", source_id);
            return Ok(());
        }

        let rules = match RuleSet::load(&source.rule_json, &self.shared.patterns) {
            Ok(rules) => Arc::new(rules),
            Err(e) => {
                tracing::error!("Cannot enable source {} '{}': {}", source_id, source.name, e);
                return Err(e.into());
            }
        };

        self.shared.storage()?.set_source_enabled(source_id, true)?;

        let mut sources = self.shared.sources()?;
        if sources.contains_key(&source_id) {
            return Ok(());
        }
        let runtime = self.spawn_source_workers(source_id, rules);
        tracing::info!(
            "Enabled source {} '{}' with {} workers",
            source_id,
            source.name,
            runtime.handles.len()
        );
        sources.insert(source_id, runtime);
        Ok(())
    }

    fn spawn_source_workers(&self, source_id: i64, rules: Arc<RuleSet>) -> SourceRuntime {
        let cancel = CancellationToken::new();
        let mut handles = Vec::new();

        tracing::debug!("Rules of source {}: {}", source_id, rules.fingerprint());

        for category_id in 1..=self.shared.config.category_count {
            if rules.category_list_url(category_id, 1).is_none() {
                tracing::debug!("Source {} has no listing for category {}", source_id, category_id);
                continue;
            }
            handles.push(tokio::spawn(workers::category_loop(
                Arc::clone(&self.shared),
                source_id,
                category_id,
                Arc::clone(&rules),
                cancel.child_token(),
            )));
        }

        if non_blank(&rules.update_book_list_url).is_some() {
            handles.push(tokio::spawn(workers::update_loop(
                Arc::clone(&self.shared),
                source_id,
                Arc::clone(&rules),
                cancel.child_token(),
            )));
        }

        SourceRuntime {
            cancel,
            handles,
            rules,
        }
    }

    /// Stops a source's workers and clears its persisted enabled flag
    ///
    /// Returns once every worker has stopped. Workers stop at their next
    /// cancellation check, so a fetch already in flight completes first.
    pub async fn disable_source(&self, source_id: i64) -> Result<()> {
        self.get_source(source_id)?;
        self.shared.storage()?.set_source_enabled(source_id, false)?;

        let runtime = self.shared.sources()?.remove(&source_id);
        if let Some(runtime) = runtime {
            stop_runtime(source_id, runtime).await;
            tracing::info!("Disabled source {}", source_id);
        }
        Ok(())
    }

    /// Starts every source whose persisted flag is enabled
    ///
    /// Sources with invalid rules are logged and skipped. Returns the number
    /// of sources started.
    pub fn resume_enabled_sources(&self) -> Result<usize> {
        let sources = self.shared.storage()?.list_enabled_sources()?;
        let mut started = 0;
        for source in sources {
            match self.enable_source(source.id) {
                Ok(()) => started += 1,
                Err(e) => tracing::error!("Could not resume source {}: {}", source.id, e),
            }
        }
        Ok(started)
    }

    /// Stops all workers without touching persisted flags
    pub async fn shutdown(&self) -> Result<()> {
        let task_loop = self.shared.task_loop()?.take();
        if let Some(task_loop) = task_loop {
            task_loop.cancel.cancel();
            if let Err(e) = task_loop.handle.await {
                tracing::error!("Task loop ended abnormally: {}", e);
            }
        }

        let runtimes: Vec<(i64, SourceRuntime)> = self.shared.sources()?.drain().collect();
        for (source_id, runtime) in runtimes {
            stop_runtime(source_id, runtime).await;
        }
        tracing::info!("All workers stopped");
        Ok(())
    }

    // ===== Task Administration =====

    /// Queues a single-book task
    pub fn add_task(&self, task: NewTask) -> Result<i64> {
        self.get_source(task.source_id)?;
        let id = self.shared.storage()?.insert_task(&task)?;
        tracing::info!(
            "Queued task {} for book {} of source {}",
            id,
            task.source_book_id,
            task.source_id
        );
        Ok(id)
    }

    pub fn get_task(&self, task_id: i64) -> Result<SingleTask> {
        self.shared
            .storage()?
            .get_task(task_id)?
            .ok_or(CrawlError::TaskNotFound(task_id))
    }

    pub fn delete_task(&self, task_id: i64) -> Result<()> {
        if self.shared.storage()?.delete_task(task_id)? {
            Ok(())
        } else {
            Err(CrawlError::TaskNotFound(task_id))
        }
    }

    /// Lists tasks newest first, `page` starting at 1
    pub fn list_tasks(&self, page: u32, page_size: u32) -> Result<Vec<SingleTask>> {
        Ok(self.shared.storage()?.list_tasks(page, page_size)?)
    }

    /// Processes the oldest queued task once
    ///
    /// Returns the task ID and its status after the attempt, or `None` if
    /// the queue is empty.
    pub async fn run_pending_task(&self) -> Result<Option<(i64, TaskStatus)>> {
        self.shared.run_next_task(&CancellationToken::new()).await
    }

    /// Starts the background loop draining the task queue
    ///
    /// Tasks left Running by an interrupted process are queued again first.
    /// Starting an already running loop is a no-op.
    pub fn start_task_loop(&self) -> Result<()> {
        let mut task_loop = self.shared.task_loop()?;
        if task_loop.is_some() {
            return Ok(());
        }

        let requeued = self.shared.storage()?.requeue_running_tasks()?;
        if requeued > 0 {
            tracing::info!("Requeued {} interrupted tasks", requeued);
        }

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(workers::task_loop(Arc::clone(&self.shared), cancel.clone()));
        *task_loop = Some(TaskLoop { cancel, handle });
        Ok(())
    }

    // ===== Crawling =====

    /// Runs the single-book pipeline for one book of a source
    ///
    /// # Arguments
    ///
    /// * `source_id` - The source whose rules are applied
    /// * `source_book_id` - The book's ID on the source site
    /// * `category_id` - Listing category the book was found under, if any
    ///
    /// # Returns
    ///
    /// * `Ok(IngestOutcome)` - Whether the book was stored, skipped or unavailable
    /// * `Err(CrawlError)` - Unknown source, broken rules or a storage failure
    pub async fn ingest_book(
        &self,
        source_id: i64,
        source_book_id: &str,
        category_id: Option<u32>,
    ) -> Result<IngestOutcome> {
        let rules = self.rules_for(source_id)?;
        let cancel = CancellationToken::new();
        self.shared
            .ingest(source_id, &rules, category_id, source_book_id, SyncContext::new(&cancel))
            .await
    }

    /// Fetches new and renamed chapters of a stored book
    ///
    /// Returns the number of chapters written.
    pub async fn resync_book(&self, book_id: i64) -> Result<usize> {
        let book = self
            .shared
            .storage()?
            .get_book(book_id)?
            .ok_or(CrawlError::BookNotFound(book_id))?;
        let source_id = book.source_id.ok_or(CrawlError::BookNotFound(book_id))?;
        let rules = self.rules_for(source_id)?;
        self.shared
            .resync(book_id, book, &rules, &CancellationToken::new())
            .await
    }

    // Rules of a running source, or freshly loaded ones otherwise.
    fn rules_for(&self, source_id: i64) -> Result<Arc<RuleSet>> {
        if let Some(runtime) = self.shared.sources()?.get(&source_id) {
            return Ok(Arc::clone(&runtime.rules));
        }
        let source = self.get_source(source_id)?;
        Ok(Arc::new(RuleSet::load(&source.rule_json, &self.shared.patterns)?))
    }

    // ===== Progress =====

    /// Chapters processed so far by a running task, `None` if it is not running
    pub fn get_progress(&self, task_id: i64) -> Option<usize> {
        self.shared.progress.get_progress(task_id)
    }

    pub fn clear_progress(&self, task_id: i64) {
        self.shared.progress.clear_progress(task_id)
    }

    /// Chapters collected for a source since process start
    pub fn source_chapter_count(&self, source_id: i64) -> u64 {
        self.shared.progress.source_chapter_count(source_id)
    }
}

async fn stop_runtime(source_id: i64, runtime: SourceRuntime) {
    runtime.cancel.cancel();
    for handle in runtime.handles {
        if let Err(e) = handle.await {
            tracing::error!("Worker of source {} ended abnormally: {}", source_id, e);
        }
    }
}
