//! End-to-end tests: detection, batched retrieval and update against a mock server.
//!
//! Every test builds its own engine and, where it touches parser
//! registration, its own registry so tests stay isolated.

use feedpull::feed::{
    etag_from_header, reconcile, ReconcileOptions, last_modified_from_header, Feed, FetchError, FetchOptions, ParseError,
    ParserDescriptor, ParserRegistry, CONNECTION_FAILED,
};
use feedpull::{Config, FeedEngine};
use pretty_assertions::assert_eq;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

const RSS2: &str = include_str!("fixtures/rss2.xml");
const ATOM: &str = include_str!("fixtures/atom.xml");
const ATOM_FEEDBURNER: &str = include_str!("fixtures/atom_feedburner.xml");
const ITUNES: &str = include_str!("fixtures/itunes.xml");

fn isolated_engine(registry: ParserRegistry) -> FeedEngine {
    FeedEngine::with_registry(Config::default(), Arc::new(RwLock::new(registry))).unwrap()
}

fn engine() -> FeedEngine {
    isolated_engine(ParserRegistry::with_builtins())
}

/// Whole-value header match; `header()` splits values on commas, which
/// breaks HTTP dates.
fn header_equals(
    name: &'static str,
    expected: &'static str,
) -> impl Fn(&Request) -> bool + Send + Sync + 'static {
    move |request: &Request| {
        request
            .headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            == Some(expected)
    }
}

async fn serve(server: &MockServer, route: &str, body: &str) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(body)
                .insert_header("Content-Type", "application/xml"),
        )
        .mount(server)
        .await;
}

// ============================================================================
// Detection
// ============================================================================

#[test]
fn test_engine_selects_dialect_per_document() {
    let engine = engine();
    assert_eq!(engine.determine_parser(RSS2).unwrap().name(), "rss");
    assert_eq!(engine.determine_parser(ATOM).unwrap().name(), "atom");
    assert_eq!(
        engine.determine_parser(ATOM_FEEDBURNER).unwrap().name(),
        "atom-feedburner"
    );
    assert_eq!(engine.determine_parser(ITUNES).unwrap().name(), "itunes-rss");
}

#[test]
fn test_custom_descriptor_takes_priority() {
    fn sniff_everything(_: &str) -> bool {
        true
    }
    fn parse_placeholder(_: &[u8]) -> Result<Feed, ParseError> {
        Ok(Feed {
            title: Some("placeholder".into()),
            ..Feed::default()
        })
    }

    let engine = engine();
    engine
        .registry()
        .write()
        .unwrap()
        .add(ParserDescriptor::new("custom", sniff_everything, parse_placeholder));

    let feed = engine.parse(RSS2).unwrap();
    assert_eq!(feed.parser.as_deref(), Some("custom"));
    assert_eq!(feed.title.as_deref(), Some("placeholder"));
}

#[test]
fn test_header_codec_on_recorded_response() {
    let raw = "HTTP/1.1 200 OK\r\nETag: \"abc\"\r\nLast-Modified: Wed, 28 Jan 2009 04:10:32 GMT\r\n\r\n";
    assert_eq!(etag_from_header(raw).as_deref(), Some("\"abc\""));
    assert!(last_modified_from_header(raw).is_some());
    assert_eq!(etag_from_header("foo"), None);
}

#[test]
fn test_guidless_item_with_edited_title_is_not_new() {
    let poll = |title: &str| {
        format!(
            r#"<?xml version="1.0"?>
<rss version="2.0"><channel><title>Blog</title>
  <item><title>{title}</title><link>https://example.com/post-1</link></item>
</channel></rss>"#
        )
    };

    let engine = engine();
    let stored = engine.parse(&poll("Original")).unwrap();
    let fresh = engine.parse(&poll("Original (edited)")).unwrap();

    let result = reconcile(&stored, &fresh, &ReconcileOptions::default());
    assert!(result.new_entries.is_empty());
    assert_eq!(result.feed.entries.len(), 1);
}

// ============================================================================
// Retrieval
// ============================================================================

#[tokio::test]
async fn test_fetch_all_mixed_dialects() {
    let server = MockServer::start().await;
    serve(&server, "/rss", RSS2).await;
    serve(&server, "/atom", ATOM).await;
    serve(&server, "/podcast", ITUNES).await;

    let urls: Vec<String> = ["/rss", "/atom", "/podcast"]
        .iter()
        .map(|p| format!("{}{}", server.uri(), p))
        .collect();

    let engine = engine();
    let results = engine
        .fetch_and_parse_all(urls.clone(), &engine.default_options())
        .await;

    assert_eq!(results.len(), 3);
    let parsers: Vec<_> = urls
        .iter()
        .map(|u| results[u].as_ref().unwrap().parser.clone().unwrap())
        .collect();
    assert_eq!(parsers, vec!["rss", "atom", "itunes-rss"]);
}

#[tokio::test]
async fn test_one_bad_url_does_not_poison_batch() {
    let server = MockServer::start().await;
    serve(&server, "/rss", RSS2).await;
    serve(&server, "/html", "<html><body>not a feed</body></html>").await;

    let good = format!("{}/rss", server.uri());
    let html = format!("{}/html", server.uri());
    let refused = "http://127.0.0.1:1/feed".to_owned();
    let invalid = "not a url".to_owned();

    let failures = Arc::new(AtomicUsize::new(0));
    let options = {
        let failures = Arc::clone(&failures);
        FetchOptions::default()
            .with_timeout(Duration::from_secs(5))
            .on_failure(move |_, _| {
                failures.fetch_add(1, Ordering::SeqCst);
            })
    };

    let engine = engine();
    let results = engine
        .fetch_and_parse_all(
            vec![good.clone(), html.clone(), refused.clone(), invalid.clone()],
            &options,
        )
        .await;

    assert_eq!(results.len(), 4);
    assert!(results[&good].is_ok());
    assert!(matches!(
        results[&html],
        Err(FetchError::Parse(ParseError::NoParserAvailable))
    ));
    assert_eq!(
        results[&refused].as_ref().unwrap_err().status_code(),
        CONNECTION_FAILED
    );
    assert!(matches!(results[&invalid], Err(FetchError::InvalidUrl(_))));
    assert_eq!(failures.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_batch_larger_than_width_covers_every_url() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(RSS2))
        .expect(7)
        .mount(&server)
        .await;

    let urls: Vec<String> = (0..7).map(|i| format!("{}/f/{i}", server.uri())).collect();
    let successes = Arc::new(AtomicUsize::new(0));
    let options = {
        let successes = Arc::clone(&successes);
        FetchOptions::default()
            .with_max_concurrency(3)
            .on_success(move |_, _| {
                successes.fetch_add(1, Ordering::SeqCst);
            })
    };

    let results = engine().fetch_raw_all(urls.clone(), &options).await;

    assert_eq!(results.len(), 7);
    assert_eq!(successes.load(Ordering::SeqCst), 7);
}

#[tokio::test]
async fn test_single_url_returns_bare_result() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(header("User-Agent", "Custom Useragent"))
        .respond_with(ResponseTemplate::new(200).set_body_string(ATOM))
        .mount(&server)
        .await;

    let options = FetchOptions::default().with_user_agent("Custom Useragent");
    let feed = engine()
        .fetch_and_parse(&format!("{}/atom", server.uri()), &options)
        .await
        .unwrap();
    assert_eq!(feed.title.as_deref(), Some("Amazon Web Services Blog"));
}

// ============================================================================
// Update
// ============================================================================

#[tokio::test]
async fn test_update_round_trip_then_not_modified() {
    let server = MockServer::start().await;
    let url = format!("{}/rss", server.uri());

    // First poll: full body with validators
    Mock::given(method("GET"))
        .and(path("/rss"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(RSS2)
                .insert_header("ETag", "\"rev-1\"")
                .insert_header("Last-Modified", "Thu, 04 Dec 2008 17:17:49 GMT"),
        )
        .up_to_n_times(1)
        .mount(&server)
        .await;

    let engine = engine();
    let first = engine
        .fetch_and_parse(&url, &engine.default_options())
        .await
        .unwrap();
    assert_eq!(first.etag.as_deref(), Some("\"rev-1\""));

    // Second poll: server sees our validators and answers 304
    Mock::given(method("GET"))
        .and(path("/rss"))
        .and(header("If-None-Match", "\"rev-1\""))
        .and(header_equals("If-Modified-Since", "Thu, 04 Dec 2008 17:17:49 GMT"))
        .respond_with(ResponseTemplate::new(304))
        .expect(1)
        .mount(&server)
        .await;

    let result = engine.update(&first, &engine.default_options()).await.unwrap();
    assert!(result.new_entries.is_empty());
    assert_eq!(result.feed, first);
}

#[tokio::test]
async fn test_update_all_reports_every_feed() {
    let server = MockServer::start().await;
    serve(&server, "/a", RSS2).await;
    Mock::given(method("GET"))
        .and(path("/b"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let feeds = vec![
        Feed {
            feed_url: Some(format!("{}/a", server.uri())),
            ..Feed::default()
        },
        Feed {
            feed_url: Some(format!("{}/b", server.uri())),
            ..Feed::default()
        },
    ];

    let engine = engine();
    let results = engine.update_all(feeds, &engine.default_options()).await;

    let a = results[&format!("{}/a", server.uri())].as_ref().unwrap();
    assert_eq!(a.new_entries.len(), 3);
    assert_eq!(a.feed.title.as_deref(), Some("Tender Lovemaking"));
    assert!(a.metadata_changed);

    let b = results[&format!("{}/b", server.uri())].as_ref().unwrap_err();
    assert_eq!(b.status_code(), 500);
}
