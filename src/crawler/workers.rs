//! Long-running worker loops
//!
//! Every loop owns a cancellation token and checks it before each page
//! fetch and each book. Sleeps between passes are raced against the token so
//! a disabled source stops promptly.

use crate::crawler::chapters::SyncContext;
use crate::crawler::orchestrator::{IngestOutcome, Shared};
use crate::model::TaskStatus;
use crate::rules::{capture_all, capture_first, non_blank, RuleSet};
use crate::storage::Storage;
use regex::Regex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Sleeps for `duration` unless cancelled first
///
/// Returns `false` if the token was cancelled.
async fn sleep_or_cancel(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

/// Book IDs on a listing page in document order, without repeats
fn listed_book_ids<'t>(re: &Regex, html: &'t str) -> Vec<&'t str> {
    let mut seen = HashSet::new();
    capture_all(re, html)
        .into_iter()
        .filter(|id| seen.insert(*id))
        .collect()
}

fn page_number(shared: &Shared, pattern: &Option<String>, html: &str) -> Option<u32> {
    let pattern = non_blank(pattern)?;
    let re = shared.patterns.get(pattern).ok()?;
    capture_first(&re, html)?.trim().parse().ok()
}

/// Paginates one category listing forever, ingesting every listed book
pub(crate) async fn category_loop(
    shared: Arc<Shared>,
    source_id: i64,
    category_id: u32,
    rules: Arc<RuleSet>,
    cancel: CancellationToken,
) {
    let book_id_re = match shared.patterns.get(&rules.book_id_pattern) {
        Ok(re) => re,
        Err(e) => {
            tracing::error!("Source {} book ID pattern rejected: {}", source_id, e);
            return;
        }
    };

    tracing::info!("Category worker {} of source {} started", category_id, source_id);
    let mut passes = 0u64;

    loop {
        let mut page = 1u32;
        let mut total_pages = 1u32;
        let mut ingested = 0usize;

        loop {
            if cancel.is_cancelled() {
                tracing::info!("Category worker {} of source {} stopped", category_id, source_id);
                return;
            }

            let Some(url) = rules.category_list_url(category_id, page) else {
                tracing::warn!(
                    "Source {} lost its listing for category {}",
                    source_id,
                    category_id
                );
                return;
            };

            let Some(html) = shared.fetcher.fetch(&url, &rules.charset).await else {
                tracing::warn!("Listing page {} unavailable, moving on", url);
                if page >= total_pages {
                    break;
                }
                page += 1;
                continue;
            };

            let book_ids = listed_book_ids(&book_id_re, &html);
            tracing::debug!("Listing page {} has {} books", url, book_ids.len());

            for book_id in book_ids {
                if cancel.is_cancelled() {
                    tracing::info!(
                        "Category worker {} of source {} stopped",
                        category_id,
                        source_id
                    );
                    return;
                }
                let ctx = SyncContext::new(&cancel);
                match shared
                    .ingest(source_id, &rules, Some(category_id), book_id, ctx)
                    .await
                {
                    Ok(IngestOutcome::Stored { .. }) => ingested += 1,
                    Ok(_) => {}
                    Err(e) => {
                        tracing::error!("Book {} of source {} failed: {}", book_id, source_id, e)
                    }
                }
            }

            if let Some(total) = page_number(&shared, &rules.total_page_pattern, &html) {
                total_pages = total;
            }
            // The reported page number is informational only
            if let Some(reported) = page_number(&shared, &rules.page_pattern, &html) {
                tracing::trace!("Listing page {} reports page {}", page, reported);
            }
            if page >= total_pages {
                break;
            }
            page += 1;
        }

        passes += 1;
        tracing::info!(
            "Category {} of source {} pass {} done: {} pages, {} new books",
            category_id,
            source_id,
            passes,
            total_pages,
            ingested
        );

        if !sleep_or_cancel(shared.config.pass_interval(), &cancel).await {
            tracing::info!("Category worker {} of source {} stopped", category_id, source_id);
            return;
        }
    }
}

/// Polls the update list and re-syncs books already stored for the source
pub(crate) async fn update_loop(
    shared: Arc<Shared>,
    source_id: i64,
    rules: Arc<RuleSet>,
    cancel: CancellationToken,
) {
    let Some(url) = non_blank(&rules.update_book_list_url).map(str::to_string) else {
        return;
    };
    let book_id_re = match shared.patterns.get(&rules.book_id_pattern) {
        Ok(re) => re,
        Err(e) => {
            tracing::error!("Source {} book ID pattern rejected: {}", source_id, e);
            return;
        }
    };

    tracing::info!("Update worker of source {} started", source_id);

    loop {
        if cancel.is_cancelled() {
            break;
        }

        match shared.fetcher.fetch(&url, &rules.charset).await {
            Some(html) => {
                let mut updated = 0usize;
                for book_id in listed_book_ids(&book_id_re, &html) {
                    if cancel.is_cancelled() {
                        break;
                    }
                    match resync_listed(&shared, source_id, &rules, book_id, &cancel).await {
                        Ok(chapters) => updated += chapters,
                        Err(e) => tracing::error!(
                            "Re-sync of book {} of source {} failed: {}",
                            book_id,
                            source_id,
                            e
                        ),
                    }
                }
                tracing::info!("Update pass of source {}: {} chapters written", source_id, updated);
            }
            None => tracing::warn!("Update list {} unavailable", url),
        }

        if !sleep_or_cancel(shared.config.update_interval(), &cancel).await {
            break;
        }
    }

    tracing::info!("Update worker of source {} stopped", source_id);
}

async fn resync_listed(
    shared: &Shared,
    source_id: i64,
    rules: &RuleSet,
    source_book_id: &str,
    cancel: &CancellationToken,
) -> crate::Result<usize> {
    let book = shared.storage()?.find_book_by_source(source_id, source_book_id)?;
    let Some(book) = book else {
        tracing::trace!("Book {} of source {} not stored yet", source_book_id, source_id);
        return Ok(0);
    };
    let Some(book_id) = book.id else {
        return Ok(0);
    };
    shared.resync(book_id, book, rules, cancel).await
}

/// Drains the single-book task queue until cancelled
pub(crate) async fn task_loop(shared: Arc<Shared>, cancel: CancellationToken) {
    tracing::info!("Task loop started");

    loop {
        if cancel.is_cancelled() {
            break;
        }

        let idle = match shared.run_next_task(&cancel).await {
            Ok(Some((task_id, status))) => {
                if status == TaskStatus::Success {
                    tracing::info!("Task {} succeeded", task_id);
                }
                false
            }
            Ok(None) => true,
            Err(e) => {
                tracing::error!("Task loop step failed: {}", e);
                true
            }
        };

        if idle && !sleep_or_cancel(shared.config.task_poll_interval(), &cancel).await {
            break;
        }
    }

    tracing::info!("Task loop stopped");
}
