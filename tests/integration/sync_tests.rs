//! Integration tests for incremental chapter sync
//!
//! These tests use wiremock to stand in for a source site and drive the
//! sync engine directly.

use rulecrawl::config::FetcherConfig;
use rulecrawl::crawler::{ChapterSyncEngine, Fetcher, SyncContext};
use rulecrawl::id::IdGenerator;
use rulecrawl::model::{BookRecord, ChapterChange, ExistingChapter, ExistingChapterIndex};
use rulecrawl::{PatternCache, RuleSet};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Rule set pointing at the mock server
fn site_rules(base_url: &str) -> RuleSet {
    let json = format!(
        r#"{{
            "bookIdPatten": "<a href=\"/book/(\\d+)/\">",
            "bookDetailUrl": "{base}/info/{{bookId}}/",
            "bookNamePatten": "<h1>([^<]+)</h1>",
            "authorNamePatten": "作者：([^<]+)</p>",
            "bookIndexUrl": "{base}/book/{{bookId}}/",
            "bookIndexStart": "<div id=\"list\">",
            "indexIdPatten": "<dd><a href=\"/book/\\d+/(\\d+)\\.html\">",
            "indexNamePatten": "<dd><a href=\"/book/\\d+/\\d+\\.html\">([^<]+)</a>",
            "bookContentUrl": "{base}/book/{{bookId}}/{{indexId}}.html",
            "contentStart": "<div id=\"content\">",
            "contentEnd": "</div>"
        }}"#,
        base = base_url
    );
    RuleSet::from_json(&json).unwrap()
}

fn engine() -> ChapterSyncEngine {
    let config = FetcherConfig {
        min_interval_ms: 0,
        max_interval_ms: 0,
        timeout_ms: 2_000,
        retry_count: 0,
        min_body_length: 1,
        ..FetcherConfig::default()
    };
    ChapterSyncEngine::new(
        Arc::new(Fetcher::new(&config).unwrap()),
        Arc::new(PatternCache::new()),
        Arc::new(IdGenerator::new(3)),
    )
}

fn index_page(book_id: &str, chapters: &[(&str, &str)]) -> String {
    let links: String = chapters
        .iter()
        .map(|(id, name)| {
            format!("<dd><a href=\"/book/{}/{}.html\">{}</a></dd>\n", book_id, id, name)
        })
        .collect();
    // The link before the marker is a "latest chapter" teaser and must be ignored
    let teaser = format!("<dd><a href=\"/book/{}/999.html\">最新章节</a></dd>", book_id);
    format!("<html>{}<div id=\"list\">\n{}</div></html>", teaser, links)
}

fn chapter_page(text: &str) -> String {
    format!("<html><div id=\"content\">{}</div></html>", text)
}

async fn mount_index(server: &MockServer, book_id: &str, chapters: &[(&str, &str)]) {
    Mock::given(method("GET"))
        .and(path(format!("/book/{}/", book_id)))
        .respond_with(ResponseTemplate::new(200).set_body_string(index_page(book_id, chapters)))
        .mount(server)
        .await;
}

async fn mount_chapter(server: &MockServer, url_path: &str, text: &str, expected_hits: u64) {
    Mock::given(method("GET"))
        .and(path(url_path))
        .respond_with(ResponseTemplate::new(200).set_body_string(chapter_page(text)))
        .expect(expected_hits)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_new_book_collects_every_chapter() {
    let server = MockServer::start().await;
    let rules = site_rules(&server.uri());
    let chapters = [("101", "第一章 开端"), ("102", "第二章 风起"), ("103", "第三章 云涌")];
    mount_index(&server, "7", &chapters).await;
    mount_chapter(&server, "/book/7/101.html", "甲乙丙", 1).await;
    mount_chapter(&server, "/book/7/102.html", "丁戊<br/>己庚", 1).await;
    mount_chapter(&server, "/book/7/103.html", "辛壬", 1).await;

    let mut book = BookRecord::new("7");
    let cancel = CancellationToken::new();
    let result = engine()
        .sync("7", &mut book, &rules, &ExistingChapterIndex::new(), SyncContext::new(&cancel))
        .await;

    assert!(result.is_ok());
    assert_eq!(result.chapters.len(), 3);
    assert_eq!(result.contents.len(), 3);

    let seqs: Vec<usize> = result.chapters.iter().map(|c| c.seq).collect();
    assert_eq!(seqs, vec![0, 1, 2]);
    assert!(result.chapters.iter().all(|c| c.change == ChapterChange::Insert));

    for (meta, content) in result.pairs() {
        assert_eq!(content.chapter_id, meta.id);
        assert_ne!(content.id, meta.id);
    }

    assert_eq!(result.chapters[1].word_count, 4);
    assert_eq!(result.word_count_delta, 9);
    assert_eq!(book.word_count, 9);

    let last = book.last_chapter.as_ref().unwrap();
    assert_eq!(last.name, "第三章 云涌");
    assert_eq!(last.id, result.chapters[2].id);
    assert!(book.updated_at.is_some());
}

#[tokio::test]
async fn test_unchanged_chapters_are_not_fetched() {
    let server = MockServer::start().await;
    let rules = site_rules(&server.uri());
    let chapters = [("101", "第一章 开端"), ("102", "第二章 风起"), ("103", "第三章 云涌")];
    mount_index(&server, "7", &chapters).await;
    mount_chapter(&server, "/book/7/101.html", "甲乙丙", 0).await;
    mount_chapter(&server, "/book/7/102.html", "丁戊己庚", 0).await;
    mount_chapter(&server, "/book/7/103.html", "辛壬", 1).await;

    // Names differing only in whitespace count as unchanged
    let existing: ExistingChapterIndex = vec![
        (0, ExistingChapter { id: 11, name: "第一章开端".to_string(), word_count: 3 }),
        (1, ExistingChapter { id: 12, name: " 第二章  风起 ".to_string(), word_count: 4 }),
    ]
    .into_iter()
    .collect();

    let mut book = BookRecord::new("7");
    book.word_count = 7;
    let cancel = CancellationToken::new();
    let result = engine()
        .sync("7", &mut book, &rules, &existing, SyncContext::new(&cancel))
        .await;

    assert_eq!(result.len(), 1);
    assert_eq!(result.chapters[0].seq, 2);
    assert_eq!(result.chapters[0].change, ChapterChange::Insert);
    assert_eq!(book.word_count, 9);
}

#[tokio::test]
async fn test_renamed_chapter_reuses_id() {
    let server = MockServer::start().await;
    let rules = site_rules(&server.uri());
    let chapters = [("101", "第一章 开端"), ("102", "第二章 风起（修）")];
    mount_index(&server, "7", &chapters).await;
    mount_chapter(&server, "/book/7/101.html", "甲乙丙", 0).await;
    mount_chapter(&server, "/book/7/102.html", "丁戊己庚辛壬", 1).await;

    let existing: ExistingChapterIndex = vec![
        (0, ExistingChapter { id: 11, name: "第一章 开端".to_string(), word_count: 3 }),
        (1, ExistingChapter { id: 12, name: "第二章 风起".to_string(), word_count: 4 }),
    ]
    .into_iter()
    .collect();

    let mut book = BookRecord::new("7");
    book.word_count = 7;
    let cancel = CancellationToken::new();
    let result = engine()
        .sync("7", &mut book, &rules, &existing, SyncContext::new(&cancel))
        .await;

    assert_eq!(result.len(), 1);
    let meta = &result.chapters[0];
    assert_eq!(meta.id, 12);
    assert_eq!(meta.change, ChapterChange::Update);
    assert_eq!(result.contents[0].chapter_id, 12);
    assert_eq!(result.word_count_delta, 2);
    assert_eq!(book.word_count, 9);
}

#[tokio::test]
async fn test_second_sync_is_a_no_op() {
    let server = MockServer::start().await;
    let rules = site_rules(&server.uri());
    mount_index(&server, "7", &[("101", "第一章"), ("102", "第二章")]).await;
    mount_chapter(&server, "/book/7/101.html", "甲乙丙", 1).await;
    mount_chapter(&server, "/book/7/102.html", "丁戊", 1).await;

    let engine = engine();
    let cancel = CancellationToken::new();
    let mut book = BookRecord::new("7");
    let first = engine
        .sync("7", &mut book, &rules, &ExistingChapterIndex::new(), SyncContext::new(&cancel))
        .await;
    assert_eq!(first.len(), 2);

    let stored: ExistingChapterIndex = first
        .chapters
        .iter()
        .map(|c| {
            (
                c.seq,
                ExistingChapter {
                    id: c.id,
                    name: c.name.clone(),
                    word_count: c.word_count,
                },
            )
        })
        .collect();

    let before = book.clone();
    let second = engine
        .sync("7", &mut book, &rules, &stored, SyncContext::new(&cancel))
        .await;

    assert!(second.is_empty());
    assert_eq!(book, before);
}

#[tokio::test]
async fn test_pending_and_broken_chapters_skipped() {
    let server = MockServer::start().await;
    let rules = site_rules(&server.uri());
    let chapters = [
        ("101", "第一章"),
        ("102", "第二章"),
        ("103", "第三章"),
        ("104", "第四章"),
    ];
    mount_index(&server, "7", &chapters).await;
    mount_chapter(&server, "/book/7/101.html", "甲乙丙", 1).await;
    mount_chapter(&server, "/book/7/102.html", "正在手打中，请稍后", 1).await;
    Mock::given(method("GET"))
        .and(path("/book/7/103.html"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>no content block</html>"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/book/7/104.html"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let mut book = BookRecord::new("7");
    let cancel = CancellationToken::new();
    let result = engine()
        .sync("7", &mut book, &rules, &ExistingChapterIndex::new(), SyncContext::new(&cancel))
        .await;

    assert!(result.is_ok());
    assert_eq!(result.len(), 1);
    assert_eq!(result.chapters[0].seq, 0);
    assert_eq!(book.last_chapter.as_ref().unwrap().name, "第一章");
}

#[tokio::test]
async fn test_calc_placeholder_in_content_url() {
    let server = MockServer::start().await;
    let mut rules = site_rules(&server.uri());
    rules.book_content_url = format!(
        "{}/files/{{cal_1_1_3}}/{{bookId}}/{{indexId}}.html",
        server.uri()
    );

    mount_index(&server, "123456", &[("1", "第一章")]).await;
    mount_chapter(&server, "/files/123/123456/1.html", "甲乙", 1).await;

    let mut book = BookRecord::new("123456");
    let cancel = CancellationToken::new();
    let result = engine()
        .sync("123456", &mut book, &rules, &ExistingChapterIndex::new(), SyncContext::new(&cancel))
        .await;
    assert_eq!(result.len(), 1);

    // A short ID leaves nothing after the drop and renders as "0"
    mount_index(&server, "12", &[("5", "第一章")]).await;
    mount_chapter(&server, "/files/0/12/5.html", "丙丁", 1).await;

    let mut book = BookRecord::new("12");
    let result = engine()
        .sync("12", &mut book, &rules, &ExistingChapterIndex::new(), SyncContext::new(&cancel))
        .await;
    assert_eq!(result.len(), 1);
}

#[tokio::test]
async fn test_cancelled_sync_fetches_nothing() {
    let server = MockServer::start().await;
    let rules = site_rules(&server.uri());
    mount_index(&server, "7", &[("101", "第一章")]).await;

    let cancel = CancellationToken::new();
    cancel.cancel();

    let mut book = BookRecord::new("7");
    let result = engine()
        .sync("7", &mut book, &rules, &ExistingChapterIndex::new(), SyncContext::new(&cancel))
        .await;

    assert!(result.is_empty());
    assert_eq!(book.word_count, 0);
    assert!(book.last_chapter.is_none());
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_unavailable_index_yields_empty_result() {
    let server = MockServer::start().await;
    let rules = site_rules(&server.uri());
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let mut book = BookRecord::new("7");
    let cancel = CancellationToken::new();
    let result = engine()
        .sync("7", &mut book, &rules, &ExistingChapterIndex::new(), SyncContext::new(&cancel))
        .await;

    assert!(result.is_empty());
    assert!(book.updated_at.is_none());
}
