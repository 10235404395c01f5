//! End-to-end crawl tests against a mock repository API.

use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;

use exam_harvester::{
    ApiClient, ApiConfig, ApiError, CrawlError, CrawlStage, Crawler, DownloadEngine, RetryPolicy,
    RunSummary, SessionCookie, plan_jobs,
};
use tempfile::TempDir;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn test_cookie() -> SessionCookie {
    SessionCookie::parse("_shibsession_x=abc123").expect("valid cookie")
}

/// Retry policy with millisecond backoff so failure tests stay fast.
fn fast_policy() -> RetryPolicy {
    RetryPolicy::new(6, Duration::from_millis(1), Duration::from_millis(5), 2.0)
}

/// Config rooted at the mock server, with no inter-request pause.
fn test_config(server: &MockServer) -> ApiConfig {
    let mut config = ApiConfig::with_base_url(format!("{}/server/api", server.uri()));
    config.pause_between_requests = Duration::ZERO;
    config
}

fn crawler(server: &MockServer) -> Crawler {
    let client =
        ApiClient::with_retry_policy(&test_cookie(), fast_policy()).expect("client builds");
    Crawler::new(client, test_config(server))
}

/// Search response body containing one self-link per item.
fn search_body(server: &MockServer, item_ids: &[&str]) -> String {
    let links: Vec<String> = item_ids
        .iter()
        .map(|id| {
            format!(
                r#"{{"_links":{{"bundles":{{"href":"{}/server/api/core/items/{id}/bundles"}}}}}}"#,
                server.uri()
            )
        })
        .collect();
    format!(r#"{{"_embedded":{{"searchResult":[{}]}}}}"#, links.join(","))
}

/// Bundle listing body containing one bitstreams link per bundle.
fn bundles_body(server: &MockServer, bundle_ids: &[&str]) -> String {
    let links: Vec<String> = bundle_ids
        .iter()
        .map(|id| {
            format!(
                r#"{{"uuid":"{id}","_links":{{"bitstreams":{{"href":"{}/server/api/core/bundles/{id}/bitstreams"}}}}}}"#,
                server.uri()
            )
        })
        .collect();
    format!(r#"{{"_embedded":{{"bundles":[{}]}}}}"#, links.join(","))
}

/// Bitstream listing body: entries carry a name, the ORIGINAL bundle marker,
/// and a self-link with the bitstream identifier.
fn bitstreams_body(server: &MockServer, entries: &[(&str, &str)]) -> String {
    let items: Vec<String> = entries
        .iter()
        .map(|(id, name)| {
            format!(
                r#"{{"uuid":"{id}","name":"{name}","bundleName":"ORIGINAL","_links":{{"self":{{"href":"{}/server/api/core/bitstreams/{id}/bundle"}}}}}}"#,
                server.uri()
            )
        })
        .collect();
    format!(r#"{{"_embedded":{{"bitstreams":[{}]}}}}"#, items.join(","))
}

#[tokio::test]
async fn full_pipeline_downloads_and_deduplicates_names() {
    let server = MockServer::start().await;
    let dir = TempDir::new().expect("temp dir");

    // Course search lists 2 items.
    Mock::given(method("GET"))
        .and(path("/server/api/discover/search/objects"))
        .and(query_param("query", "MATH08058"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string(search_body(&server, &["a1", "a2"])),
        )
        .expect(1)
        .mount(&server)
        .await;

    // Item 1 has one bundle; item 2 has none.
    Mock::given(method("GET"))
        .and(path("/server/api/core/items/a1/bundles"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string(bundles_body(&server, &["b1"])),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/server/api/core/items/a2/bundles"))
        .respond_with(ResponseTemplate::new(200).set_body_string(bundles_body(&server, &[])))
        .mount(&server)
        .await;

    // Bundle 1 holds two bitstreams with identical display names.
    Mock::given(method("GET"))
        .and(path("/server/api/core/bundles/b1/bitstreams"))
        .respond_with(ResponseTemplate::new(200).set_body_string(bitstreams_body(
            &server,
            &[("f1", "Exam 2021.pdf"), ("f2", "Exam 2021.pdf")],
        )))
        .mount(&server)
        .await;

    // Binary content endpoints.
    Mock::given(method("GET"))
        .and(path("/server/api/core/bitstreams/f1/content"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"%PDF one"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/server/api/core/bitstreams/f2/content"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"%PDF two"))
        .mount(&server)
        .await;

    let crawler = crawler(&server);
    let outcome = crawler.crawl("MATH08058").await.expect("crawl succeeds");
    assert_eq!(outcome.items_found, 2);

    let jobs = plan_jobs(&outcome, crawler.config(), dir.path());
    assert_eq!(jobs.len(), 2);
    assert_eq!(jobs[0].dest, dir.path().join("Exam 2021.pdf"));
    assert_eq!(jobs[1].dest, dir.path().join("Exam 2021 (2).pdf"));

    let engine = DownloadEngine::new(2).expect("engine builds");
    let results = engine.run(jobs, &test_cookie()).await.expect("batch runs");

    let summary = RunSummary::from_results(2, 2, &results, dir.path().to_path_buf());
    assert_eq!(summary.items_found, 2);
    assert_eq!(summary.jobs_planned, 2);
    assert_eq!(summary.downloaded, 2);
    assert_eq!(summary.unavailable(), 0);

    assert_eq!(
        std::fs::read(dir.path().join("Exam 2021.pdf")).expect("first file"),
        b"%PDF one"
    );
    assert_eq!(
        std::fs::read(dir.path().join("Exam 2021 (2).pdf")).expect("second file"),
        b"%PDF two"
    );
}

#[tokio::test]
async fn bundle_without_original_marker_contributes_no_jobs() {
    let server = MockServer::start().await;
    let dir = TempDir::new().expect("temp dir");

    Mock::given(method("GET"))
        .and(path("/server/api/discover/search/objects"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string(search_body(&server, &["a1"])),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/server/api/core/items/a1/bundles"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string(bundles_body(&server, &["b1"])),
        )
        .mount(&server)
        .await;

    // A LICENSE-style bundle: bitstreams present, but no ORIGINAL marker.
    let body = bitstreams_body(&server, &[("f1", "license.txt")])
        .replace("ORIGINAL", "LICENSE");
    Mock::given(method("GET"))
        .and(path("/server/api/core/bundles/b1/bitstreams"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(&server)
        .await;

    let crawler = crawler(&server);
    let outcome = crawler.crawl("INFR10086").await.expect("crawl succeeds");
    assert_eq!(outcome.items_found, 1);
    assert_eq!(outcome.bundles_skipped, 1);
    assert_eq!(outcome.total_refs(), 0);
    assert!(plan_jobs(&outcome, crawler.config(), dir.path()).is_empty());
}

#[tokio::test]
async fn search_failure_after_retry_budget_aborts_the_run() {
    let server = MockServer::start().await;

    // Six straight 503s exhaust the six-attempt budget.
    Mock::given(method("GET"))
        .and(path("/server/api/discover/search/objects"))
        .respond_with(ResponseTemplate::new(503))
        .expect(6)
        .mount(&server)
        .await;

    let result = crawler(&server).crawl("MATH08058").await;
    match result {
        Err(CrawlError::Api(ApiError::Status { status: 503, .. })) => {}
        other => panic!("expected exhausted 503, got: {other:?}"),
    }
}

#[tokio::test]
async fn transient_search_failures_recover_within_budget() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/server/api/discover/search/objects"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(5)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/server/api/discover/search/objects"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string(search_body(&server, &["a1"])),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/server/api/core/items/a1/bundles"))
        .respond_with(ResponseTemplate::new(200).set_body_string(bundles_body(&server, &[])))
        .mount(&server)
        .await;

    let outcome = crawler(&server).crawl("MATH08058").await.expect("recovers");
    assert_eq!(outcome.items_found, 1);
}

#[tokio::test]
async fn rejected_credential_aborts_immediately() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/server/api/discover/search/objects"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;

    let result = crawler(&server).crawl("MATH08058").await;
    match result {
        Err(CrawlError::Api(ApiError::Auth { status: 401, .. })) => {}
        other => panic!("expected auth abort, got: {other:?}"),
    }
}

#[tokio::test]
async fn progress_reports_every_stage_unit() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/server/api/discover/search/objects"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string(search_body(&server, &["a1", "a2"])),
        )
        .mount(&server)
        .await;
    for item in ["a1", "a2"] {
        Mock::given(method("GET"))
            .and(path(format!("/server/api/core/items/{item}/bundles")))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(bundles_body(&server, &[format!("b{item}").as_str()])),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(format!(
                "/server/api/core/bundles/b{item}/bitstreams"
            )))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(bitstreams_body(&server, &[("f0", "Paper.pdf")])),
            )
            .mount(&server)
            .await;
    }

    let ticks: std::sync::Arc<Mutex<Vec<(CrawlStage, usize, usize)>>> =
        std::sync::Arc::new(Mutex::new(Vec::new()));
    let sink = std::sync::Arc::clone(&ticks);

    let client =
        ApiClient::with_retry_policy(&test_cookie(), fast_policy()).expect("client builds");
    let crawler = Crawler::new(client, test_config(&server)).with_progress(
        move |stage, done, total| {
            sink.lock().expect("progress lock").push((stage, done, total));
        },
    );

    crawler.crawl("MATH08058").await.expect("crawl succeeds");

    let ticks = ticks.lock().expect("progress lock").clone();
    assert!(ticks.contains(&(CrawlStage::Search, 1, 1)));
    assert!(ticks.contains(&(CrawlStage::Bundles, 1, 2)));
    assert!(ticks.contains(&(CrawlStage::Bundles, 2, 2)));
    assert!(ticks.contains(&(CrawlStage::Bitstreams, 2, 2)));
    assert!(ticks.contains(&(CrawlStage::Extract, 2, 2)));
}

#[tokio::test]
async fn duplicate_item_references_are_crawled_once() {
    let server = MockServer::start().await;

    // The same item linked twice in the search response: one bundles fetch.
    Mock::given(method("GET"))
        .and(path("/server/api/discover/search/objects"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string(search_body(&server, &["a1", "a1"])),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/server/api/core/items/a1/bundles"))
        .respond_with(ResponseTemplate::new(200).set_body_string(bundles_body(&server, &[])))
        .expect(1)
        .mount(&server)
        .await;

    let outcome = crawler(&server).crawl("MATH08058").await.expect("crawl");
    assert_eq!(outcome.items_found, 1);
}

#[tokio::test]
async fn planned_destinations_are_unique_across_bundles() {
    let server = MockServer::start().await;
    let dir = TempDir::new().expect("temp dir");

    Mock::given(method("GET"))
        .and(path("/server/api/discover/search/objects"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string(search_body(&server, &["a1", "a2"])),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/server/api/core/items/a1/bundles"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string(bundles_body(&server, &["b1"])),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/server/api/core/items/a2/bundles"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string(bundles_body(&server, &["b2"])),
        )
        .mount(&server)
        .await;
    for bundle in ["b1", "b2"] {
        Mock::given(method("GET"))
            .and(path(format!("/server/api/core/bundles/{bundle}/bitstreams")))
            .respond_with(ResponseTemplate::new(200).set_body_string(bitstreams_body(
                &server,
                &[(format!("f{bundle}").as_str(), "Exam May.pdf")],
            )))
            .mount(&server)
            .await;
    }

    let crawler = crawler(&server);
    let outcome = crawler.crawl("PHYS09999").await.expect("crawl");
    let jobs = plan_jobs(&outcome, crawler.config(), dir.path());

    let dests: HashSet<_> = jobs.iter().map(|j| j.dest.clone()).collect();
    assert_eq!(dests.len(), jobs.len(), "destinations must be unique");
}
