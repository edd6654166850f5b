//! Integration tests for the orchestrator
//!
//! These tests use wiremock to create a mock source site and in-memory
//! SQLite storage to exercise source lifecycle, book ingestion and the
//! single-book task queue end-to-end.

use rulecrawl::config::{Config, CrawlerConfig, FetcherConfig};
use rulecrawl::crawler::IngestOutcome;
use rulecrawl::model::{NewTask, TaskStatus};
use rulecrawl::storage::{SharedStorage, SqliteStorage, Storage};
use rulecrawl::{CrawlError, Orchestrator};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Creates a test configuration with no politeness delay and no retries
fn create_test_config() -> Config {
    Config {
        fetcher: FetcherConfig {
            min_interval_ms: 0,
            max_interval_ms: 0,
            timeout_ms: 2_000,
            retry_count: 0,
            min_body_length: 1,
            ..FetcherConfig::default()
        },
        crawler: CrawlerConfig {
            category_count: 2,
            pass_interval_secs: 60,
            task_poll_interval_secs: 1,
            max_task_attempts: 5,
            update_interval_secs: 60,
        },
        ..Config::default()
    }
}

fn create_orchestrator() -> (Orchestrator, SharedStorage) {
    let storage: SharedStorage = Arc::new(Mutex::new(SqliteStorage::new_in_memory().unwrap()));
    let orchestrator = Orchestrator::new(&create_test_config(), Arc::clone(&storage)).unwrap();
    (orchestrator, storage)
}

fn rule_json(base_url: &str) -> String {
    rule_json_with(base_url, "")
}

/// Rule JSON with extra top-level fields spliced in
fn rule_json_with(base_url: &str, extra: &str) -> String {
    format!(
        r#"{{{extra}
            "catIdRule": {{"catId1": "{base}/sort/1/{{page}}.html"}},
            "bookIdPatten": "<a href=\"/info/(\\d+)/\">",
            "totalPagePatten": "共(\\d+)页",
            "bookDetailUrl": "{base}/info/{{bookId}}/",
            "bookNamePatten": "<h1>([^<]+)</h1>",
            "authorNamePatten": "作者：([^<]+)</p>",
            "bookIndexUrl": "{base}/book/{{bookId}}/",
            "indexIdPatten": "<dd><a href=\"/book/\\d+/(\\d+)\\.html\">",
            "indexNamePatten": "<dd><a href=\"/book/\\d+/\\d+\\.html\">([^<]+)</a>",
            "bookContentUrl": "{base}/book/{{bookId}}/{{indexId}}.html",
            "contentStart": "<div id=\"content\">",
            "contentEnd": "</div>"
        }}"#,
        base = base_url,
        extra = extra
    )
}

fn index_page(book_id: &str, chapters: &[(&str, &str)]) -> String {
    let links: String = chapters
        .iter()
        .map(|(id, name)| {
            format!("<dd><a href=\"/book/{}/{}.html\">{}</a></dd>", book_id, id, name)
        })
        .collect();
    format!("<html>{}</html>", links)
}

/// Mounts a complete book: detail page, index page and chapter pages
async fn mount_book(
    server: &MockServer,
    book_id: &str,
    name: &str,
    author: &str,
    chapters: &[(&str, &str)],
) {
    Mock::given(method("GET"))
        .and(path(format!("/info/{}/", book_id)))
        .respond_with(ResponseTemplate::new(200).set_body_string(format!(
            "<html><h1>{}</h1><p>作者：{}</p></html>",
            name, author
        )))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/book/{}/", book_id)))
        .respond_with(ResponseTemplate::new(200).set_body_string(index_page(book_id, chapters)))
        .mount(server)
        .await;
    for (chapter_id, chapter_name) in chapters {
        Mock::given(method("GET"))
            .and(path(format!("/book/{}/{}.html", book_id, chapter_id)))
            .respond_with(ResponseTemplate::new(200).set_body_string(format!(
                "<div id=\"content\">{}的正文</div>",
                chapter_name
            )))
            .mount(server)
            .await;
    }
}

async fn request_count(server: &MockServer) -> usize {
    server.received_requests().await.unwrap().len()
}

async fn hits(server: &MockServer, url_path: &str) -> usize {
    server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|r| r.url.path() == url_path)
        .count()
}

/// Waits up to two seconds for `url_path` to be requested
async fn wait_for_hit(server: &MockServer, url_path: &str) {
    for _ in 0..40 {
        if hits(server, url_path).await > 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("{} was never requested", url_path);
}

/// Mounts listing pages 1..=3 of category 1, each carrying `footer`
async fn mount_three_page_listing(server: &MockServer, footer: &str) {
    for page in 1..=3 {
        Mock::given(method("GET"))
            .and(path(format!("/sort/1/{}.html", page)))
            .respond_with(
                ResponseTemplate::new(200).set_body_string(format!("<html>{}</html>", footer)),
            )
            .mount(server)
            .await;
    }
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(server)
        .await;
}

/// Runs one pass over the listing and reports how often each page was fetched
async fn listing_hits_after_one_pass(server: &MockServer, rules: &str) -> Vec<usize> {
    let (orchestrator, _storage) = create_orchestrator();
    let source_id = orchestrator.add_source("site", rules).unwrap();

    orchestrator.enable_source(source_id).unwrap();
    wait_for_hit(server, "/sort/1/3.html").await;
    // Anything past the last page would be requested right away
    tokio::time::sleep(Duration::from_millis(200)).await;
    orchestrator.disable_source(source_id).await.unwrap();

    let mut counts = Vec::new();
    for page in 1..=4 {
        counts.push(hits(server, &format!("/sort/1/{}.html", page)).await);
    }
    counts
}

#[tokio::test]
async fn test_ingest_stores_book_and_counts_chapters() {
    let server = MockServer::start().await;
    mount_book(&server, "1", "长夜", "某人", &[("11", "第一章"), ("12", "第二章")]).await;

    let (orchestrator, storage) = create_orchestrator();
    let source_id = orchestrator.add_source("site", &rule_json(&server.uri())).unwrap();

    let outcome = orchestrator.ingest_book(source_id, "1", Some(7)).await.unwrap();
    let IngestOutcome::Stored { book_id, chapters } = outcome else {
        panic!("expected a stored book, got {:?}", outcome);
    };
    assert_eq!(chapters, 2);
    assert_eq!(orchestrator.source_chapter_count(source_id), 2);

    let storage = storage.lock().unwrap();
    let book = storage.get_book(book_id).unwrap().unwrap();
    assert_eq!(book.name.as_deref(), Some("长夜"));
    assert_eq!(book.source_id, Some(source_id));
    assert_eq!(book.category_id, Some(7));
    assert_eq!(book.work_direction, 1);
    assert_eq!(book.last_chapter.as_ref().unwrap().name, "第二章");
    assert_eq!(storage.count_chapters(book_id).unwrap(), 2);
    assert_eq!(
        storage.get_chapter_content(book.last_chapter.as_ref().unwrap().id).unwrap().as_deref(),
        Some("第二章的正文")
    );
}

#[tokio::test]
async fn test_duplicate_book_is_not_synced_again() {
    let server = MockServer::start().await;
    mount_book(&server, "1", "长夜", "某人", &[("11", "第一章")]).await;
    // The same book listed under another ID on a mirror
    mount_book(&server, "2", "长夜", "某人", &[("21", "第一章")]).await;

    let (orchestrator, _storage) = create_orchestrator();
    let first = orchestrator.add_source("site", &rule_json(&server.uri())).unwrap();
    let mirror = orchestrator.add_source("mirror", &rule_json(&server.uri())).unwrap();

    let stored = orchestrator.ingest_book(first, "1", None).await.unwrap();
    let book_id = stored.book_id().unwrap();

    let again = orchestrator.ingest_book(first, "1", None).await.unwrap();
    assert_eq!(again, IngestOutcome::AlreadyIngested { book_id });

    let mirrored = orchestrator.ingest_book(mirror, "2", None).await.unwrap();
    assert_eq!(mirrored, IngestOutcome::AlreadyIngested { book_id });

    // Only the first ingest walked the chapter index
    let index_fetches = server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|r| r.url.path().starts_with("/book/") && r.url.path().ends_with('/'))
        .count();
    assert_eq!(index_fetches, 1);
    assert_eq!(orchestrator.source_chapter_count(mirror), 0);
}

#[tokio::test]
async fn test_book_without_author_is_unavailable() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/info/5/"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html><h1>长夜</h1></html>"))
        .mount(&server)
        .await;

    let (orchestrator, storage) = create_orchestrator();
    let source_id = orchestrator.add_source("site", &rule_json(&server.uri())).unwrap();

    let outcome = orchestrator.ingest_book(source_id, "5", None).await.unwrap();
    assert_eq!(outcome, IngestOutcome::Unavailable);
    assert_eq!(storage.lock().unwrap().count_books().unwrap(), 0);
}

#[tokio::test]
async fn test_resync_fetches_only_new_chapters() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/book/1/"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string(index_page("1", &[("11", "第一章")])),
        )
        .up_to_n_times(1)
        .mount(&server)
        .await;
    mount_book(&server, "1", "长夜", "某人", &[("11", "第一章"), ("12", "第二章")]).await;

    let (orchestrator, storage) = create_orchestrator();
    let source_id = orchestrator.add_source("site", &rule_json(&server.uri())).unwrap();

    let book_id = orchestrator
        .ingest_book(source_id, "1", None)
        .await
        .unwrap()
        .book_id()
        .unwrap();

    let written = orchestrator.resync_book(book_id).await.unwrap();
    assert_eq!(written, 1);
    assert_eq!(orchestrator.resync_book(book_id).await.unwrap(), 0);

    let chapter_one_fetches = server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|r| r.url.path() == "/book/1/11.html")
        .count();
    assert_eq!(chapter_one_fetches, 1);

    let storage = storage.lock().unwrap();
    assert_eq!(storage.count_chapters(book_id).unwrap(), 2);
    let book = storage.get_book(book_id).unwrap().unwrap();
    assert_eq!(book.last_chapter.unwrap().name, "第二章");
    assert_eq!(book.word_count, 12);
}

#[tokio::test]
async fn test_resync_unknown_book() {
    let (orchestrator, _storage) = create_orchestrator();
    assert!(matches!(
        orchestrator.resync_book(404).await,
        Err(CrawlError::BookNotFound(404))
    ));
}

#[tokio::test]
async fn test_malformed_rules_cannot_be_enabled() {
    let (orchestrator, storage) = create_orchestrator();
    let source_id = orchestrator.add_source("broken", "{\"bookNamePatten\": ").unwrap();

    let result = orchestrator.enable_source(source_id);
    assert!(matches!(result, Err(CrawlError::Rule(_))));
    assert!(!orchestrator.is_running(source_id).unwrap());

    let source = storage.lock().unwrap().get_source(source_id).unwrap().unwrap();
    assert!(!source.enabled);
}

#[tokio::test]
async fn test_unknown_source_errors() {
    let (orchestrator, _storage) = create_orchestrator();
    assert!(matches!(orchestrator.enable_source(9), Err(CrawlError::SourceNotFound(9))));
    assert!(matches!(
        orchestrator.add_task(NewTask {
            source_id: 9,
            source_book_id: "1".to_string(),
            ..NewTask::default()
        }),
        Err(CrawlError::SourceNotFound(9))
    ));
    assert!(matches!(orchestrator.delete_task(3), Err(CrawlError::TaskNotFound(3))));
}

#[tokio::test]
async fn test_disable_stops_fetching() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/sort/1/1.html"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            "<a href=\"/info/1/\"> <a href=\"/info/2/\"> <a href=\"/info/1/\"> 共1页",
        ))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let (orchestrator, storage) = create_orchestrator();
    let source_id = orchestrator.add_source("site", &rule_json(&server.uri())).unwrap();

    orchestrator.enable_source(source_id).unwrap();
    assert!(orchestrator.is_running(source_id).unwrap());
    // Enabling twice is a no-op
    orchestrator.enable_source(source_id).unwrap();

    tokio::time::sleep(Duration::from_millis(300)).await;
    orchestrator.disable_source(source_id).await.unwrap();
    assert!(!orchestrator.is_running(source_id).unwrap());

    let requests = server.received_requests().await.unwrap();
    let paths: Vec<&str> = requests.iter().map(|r| r.url.path()).collect();
    // Category 2 has no fragment, so only category 1 was crawled; the repeated
    // book ID on the listing was visited once
    assert_eq!(paths, vec!["/sort/1/1.html", "/info/1/", "/info/2/"]);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(request_count(&server).await, 3);

    let source = storage.lock().unwrap().get_source(source_id).unwrap().unwrap();
    assert!(!source.enabled);
}

#[tokio::test]
async fn test_update_source_disables_running_source() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let (orchestrator, _storage) = create_orchestrator();
    let rules = rule_json(&server.uri());
    let source_id = orchestrator.add_source("site", &rules).unwrap();
    orchestrator.enable_source(source_id).unwrap();

    orchestrator
        .update_source(source_id, Some("renamed"), None)
        .await
        .unwrap();

    assert!(!orchestrator.is_running(source_id).unwrap());
    let source = orchestrator.get_source(source_id).unwrap();
    assert_eq!(source.name, "renamed");
    assert_eq!(source.rule_json, rules);
    assert!(!source.enabled);
}

#[tokio::test]
async fn test_task_success_records_progress_and_hints() {
    let server = MockServer::start().await;
    let chapters = [("11", "第一章"), ("12", "第二章"), ("13", "第三章")];
    mount_book(&server, "1", "长夜", "某人", &chapters).await;

    let (orchestrator, _storage) = create_orchestrator();
    let source_id = orchestrator.add_source("site", &rule_json(&server.uri())).unwrap();
    let task_id = orchestrator
        .add_task(NewTask {
            source_id,
            source_book_id: "1".to_string(),
            ..NewTask::default()
        })
        .unwrap();

    let task = orchestrator.get_task(task_id).unwrap();
    assert_eq!(task.status, TaskStatus::Queued);
    assert_eq!(task.attempts, 0);

    let ran = orchestrator.run_pending_task().await.unwrap();
    assert_eq!(ran, Some((task_id, TaskStatus::Success)));

    let task = orchestrator.get_task(task_id).unwrap();
    assert_eq!(task.status, TaskStatus::Success);
    assert_eq!(task.attempts, 1);
    assert_eq!(task.chapters_collected, 3);
    assert_eq!(task.book_name.as_deref(), Some("长夜"));
    assert_eq!(task.author.as_deref(), Some("某人"));

    assert_eq!(orchestrator.get_progress(task_id), None);
    assert_eq!(orchestrator.run_pending_task().await.unwrap(), None);
}

#[tokio::test]
async fn test_task_fails_after_max_attempts() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let (orchestrator, _storage) = create_orchestrator();
    let source_id = orchestrator.add_source("site", &rule_json(&server.uri())).unwrap();
    let task_id = orchestrator
        .add_task(NewTask {
            source_id,
            source_book_id: "1".to_string(),
            book_name: Some("长夜".to_string()),
            ..NewTask::default()
        })
        .unwrap();

    for attempt in 1..=4 {
        let ran = orchestrator.run_pending_task().await.unwrap();
        assert_eq!(ran, Some((task_id, TaskStatus::Queued)), "attempt {}", attempt);
    }
    let ran = orchestrator.run_pending_task().await.unwrap();
    assert_eq!(ran, Some((task_id, TaskStatus::Failed)));

    // Failed tasks are never picked up again
    assert_eq!(orchestrator.run_pending_task().await.unwrap(), None);

    let task = orchestrator.get_task(task_id).unwrap();
    assert_eq!(task.attempts, 5);
    assert_eq!(task.chapters_collected, 0);
    assert_eq!(request_count(&server).await, 5);

    orchestrator.delete_task(task_id).unwrap();
    assert!(orchestrator.list_tasks(1, 10).unwrap().is_empty());
}

#[tokio::test]
async fn test_task_loop_drains_queue() {
    let server = MockServer::start().await;
    mount_book(&server, "1", "长夜", "某人", &[("11", "第一章")]).await;

    let (orchestrator, _storage) = create_orchestrator();
    let source_id = orchestrator.add_source("site", &rule_json(&server.uri())).unwrap();
    let task_id = orchestrator
        .add_task(NewTask {
            source_id,
            source_book_id: "1".to_string(),
            ..NewTask::default()
        })
        .unwrap();

    orchestrator.start_task_loop().unwrap();

    let mut status = TaskStatus::Queued;
    for _ in 0..50 {
        status = orchestrator.get_task(task_id).unwrap().status;
        if status.is_terminal() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    orchestrator.shutdown().await.unwrap();

    assert_eq!(status, TaskStatus::Success);
}

#[tokio::test]
async fn test_listing_pages_fetched_once_per_pass() {
    let server = MockServer::start().await;
    mount_three_page_listing(&server, "共3页").await;

    let counts = listing_hits_after_one_pass(&server, &rule_json(&server.uri())).await;
    assert_eq!(counts, vec![1, 1, 1, 0]);
}

#[tokio::test]
async fn test_reported_page_number_does_not_steer_pagination() {
    let server = MockServer::start().await;
    // Every page shows the full pagination bar, so the first "第N页" is always 1
    mount_three_page_listing(&server, "<a>第1页</a><a>第2页</a><a>第3页</a> 共3页").await;

    let rules = rule_json_with(&server.uri(), r#""pagePatten": "第(\\d+)页","#);
    let counts = listing_hits_after_one_pass(&server, &rules).await;
    assert_eq!(counts, vec![1, 1, 1, 0]);
}

#[tokio::test]
async fn test_disable_between_listing_pages() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/sort/1/1.html"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<a href=\"/info/1/\"> 共3页"))
        .mount(&server)
        .await;
    // The listed book is still being fetched when the source is disabled
    Mock::given(method("GET"))
        .and(path("/info/1/"))
        .respond_with(ResponseTemplate::new(404).set_delay(Duration::from_millis(500)))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>共3页</html>"))
        .mount(&server)
        .await;

    let (orchestrator, _storage) = create_orchestrator();
    let source_id = orchestrator.add_source("site", &rule_json(&server.uri())).unwrap();

    orchestrator.enable_source(source_id).unwrap();
    wait_for_hit(&server, "/info/1/").await;
    orchestrator.disable_source(source_id).await.unwrap();

    let before = request_count(&server).await;
    tokio::time::sleep(Duration::from_millis(700)).await;
    assert_eq!(request_count(&server).await, before);
    assert_eq!(hits(&server, "/sort/1/1.html").await, 1);
    assert_eq!(hits(&server, "/sort/1/2.html").await, 0);
    assert_eq!(hits(&server, "/sort/1/3.html").await, 0);
}
