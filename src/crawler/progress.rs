//! Progress counters read by status queries while workers write them

use dashmap::DashMap;

/// Chapter counters keyed by task ID and by source ID
///
/// A task's counter exists only while the task is being processed; the
/// worker running the task is its only writer.
#[derive(Debug, Default)]
pub struct ProgressTracker {
    tasks: DashMap<i64, usize>,
    sources: DashMap<i64, u64>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts counting for a task, resetting any previous value
    pub fn start_task(&self, task_id: i64) {
        self.tasks.insert(task_id, 0);
    }

    /// Chapters processed so far, or `None` if the task is not running
    pub fn get_progress(&self, task_id: i64) -> Option<usize> {
        self.tasks.get(&task_id).map(|count| *count)
    }

    pub fn clear_progress(&self, task_id: i64) {
        self.tasks.remove(&task_id);
    }

    /// Counts chapters persisted for a source
    pub fn add_source_chapters(&self, source_id: i64, chapters: u64) {
        *self.sources.entry(source_id).or_insert(0) += chapters;
    }

    /// Chapters collected for a source since process start
    pub fn source_chapter_count(&self, source_id: i64) -> u64 {
        self.sources.get(&source_id).map(|count| *count).unwrap_or(0)
    }

    fn increment_task(&self, task_id: i64) {
        if let Some(mut count) = self.tasks.get_mut(&task_id) {
            *count += 1;
        }
    }
}

/// Write access to one task's counter, handed to the sync engine
#[derive(Debug, Clone, Copy)]
pub struct TaskProgress<'a> {
    tracker: &'a ProgressTracker,
    task_id: i64,
}

impl<'a> TaskProgress<'a> {
    pub fn new(tracker: &'a ProgressTracker, task_id: i64) -> Self {
        Self { tracker, task_id }
    }

    /// Records one more processed chapter
    pub fn record_chapter(&self) {
        self.tracker.increment_task(self.task_id);
    }
}
