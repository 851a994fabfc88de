//! McpSearcher against a mock tool endpoint.

use std::time::Duration;

use serde_json::json;
use swarm_agents::McpSearcher;
use swarm_core::{SearchError, Searcher};
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn test_success_maps_response_records() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/call"))
        .and(body_partial_json(json!({
            "query": "climate change",
            "max_results": 2,
            "depth": 1
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "response": [
                {"videoId": "a1", "title": "One", "channelTitle": "C", "viewCount": "10"},
                {"videoId": "a2", "title": "Two"},
                {"videoId": "a3", "title": "Three"},
                {"title": "no id"}
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let searcher = McpSearcher::new(server.uri()).unwrap();
    let records = searcher.search("climate change", 2).await.unwrap();

    assert_eq!(records.len(), 2);
    assert_eq!(records[0].source_id, "a1");
    assert_eq!(records[0].metrics.get("viewCount"), Some(&10));
    assert_eq!(records[1].source_id, "a2");
}

#[tokio::test]
async fn test_missing_response_field_is_empty_success() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/call"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "ok"})))
        .mount(&server)
        .await;

    let searcher = McpSearcher::new(server.uri()).unwrap();
    assert!(searcher.search("anything", 5).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_429_with_seconds_hint() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/call"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "30"))
        .mount(&server)
        .await;

    let searcher = McpSearcher::new(server.uri()).unwrap();
    let err = searcher.search("q", 5).await.unwrap_err();
    assert_eq!(
        err,
        SearchError::RateLimited {
            retry_after: Some(Duration::from_secs(30))
        }
    );
}

#[tokio::test]
async fn test_429_without_hint() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/call"))
        .respond_with(ResponseTemplate::new(429))
        .mount(&server)
        .await;

    let searcher = McpSearcher::new(server.uri()).unwrap();
    let err = searcher.search("q", 5).await.unwrap_err();
    assert_eq!(err, SearchError::RateLimited { retry_after: None });
}

#[tokio::test]
async fn test_429_with_past_http_date_has_no_hint() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/call"))
        .respond_with(
            ResponseTemplate::new(429).insert_header("Retry-After", "Wed, 21 Oct 2015 07:28:00 GMT"),
        )
        .mount(&server)
        .await;

    let searcher = McpSearcher::new(server.uri()).unwrap();
    let err = searcher.search("q", 5).await.unwrap_err();
    assert_eq!(err, SearchError::RateLimited { retry_after: None });
}

#[tokio::test]
async fn test_400_surfaces_upstream_message() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/call"))
        .respond_with(
            ResponseTemplate::new(400).set_body_json(json!({"error": "query too long"})),
        )
        .mount(&server)
        .await;

    let searcher = McpSearcher::new(server.uri()).unwrap();
    let err = searcher.search("q", 5).await.unwrap_err();
    assert_eq!(err, SearchError::InvalidQuery("query too long".to_string()));
}

#[tokio::test]
async fn test_422_plain_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/call"))
        .respond_with(ResponseTemplate::new(422).set_body_string("unsupported operator"))
        .mount(&server)
        .await;

    let searcher = McpSearcher::new(server.uri()).unwrap();
    let err = searcher.search("q", 5).await.unwrap_err();
    assert_eq!(err, SearchError::InvalidQuery("unsupported operator".to_string()));
}

#[tokio::test]
async fn test_server_error_is_upstream_unavailable() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/call"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let searcher = McpSearcher::new(server.uri()).unwrap();
    let err = searcher.search("q", 5).await.unwrap_err();
    assert!(matches!(err, SearchError::UpstreamUnavailable(_)));
}

#[tokio::test]
async fn test_empty_query_makes_no_request() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let searcher = McpSearcher::new(server.uri()).unwrap();
    let err = searcher.search("", 5).await.unwrap_err();
    assert!(matches!(err, SearchError::InvalidQuery(_)));
}

#[tokio::test]
async fn test_slow_endpoint_times_out_as_unavailable() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/call"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"response": []}))
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&server)
        .await;

    let searcher = McpSearcher::with_timeout(server.uri(), Duration::from_millis(100)).unwrap();
    let err = searcher.search("q", 5).await.unwrap_err();
    assert!(matches!(err, SearchError::UpstreamUnavailable(_)));
}
