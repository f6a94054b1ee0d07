//! External client tests against wiremock servers
//!
//! Run with: cargo test --test clients_test

mod fixtures;

use fixtures::*;
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{basic_auth, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use image_keyword_worker::services::fetcher::{partial_path, FetchError, HttpImageFetcher, ImageFetch};
use image_keyword_worker::services::outcome::ServiceOutcome;
use image_keyword_worker::services::search::{ImageSearch, UnsplashClient};
use image_keyword_worker::services::tagging::{ImaggaClient, KeywordTagger};

const TIMEOUT: Duration = Duration::from_secs(5);

fn image_file(dir: &TempDir) -> std::path::PathBuf {
    let path = dir.path().join("upload.png");
    std::fs::write(&path, TINY_PNG).unwrap();
    path
}

async fn mount_upload(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/v2/uploads"))
        .and(basic_auth("key", "secret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(imagga_upload_response()))
        .expect(1)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_imagga_filters_and_truncates_tags() {
    let server = MockServer::start().await;
    mount_upload(&server).await;
    Mock::given(method("GET"))
        .and(path("/v2/tags"))
        .and(query_param("image_upload_id", UPLOAD_ID))
        .and(basic_auth("key", "secret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(imagga_tags_response(&SCENARIO_CONFIDENCES)))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let client = ImaggaClient::new(&server.uri(), "key", "secret", TIMEOUT).unwrap();
    let outcome = client.extract_keywords(&image_file(&dir)).await;

    let ServiceOutcome::Ok(keywords) = outcome else {
        panic!("expected keywords, got {outcome:?}");
    };
    let confidences: Vec<f64> = keywords.iter().map(|k| k.confidence).collect();
    assert_eq!(confidences, vec![25.0, 30.0, 21.0, 40.0, 22.0]);
    let labels: Vec<&str> = keywords.iter().map(|k| k.label()).collect();
    assert_eq!(labels, vec!["tag1", "tag2", "tag3", "tag5", "tag6"]);
}

#[tokio::test]
async fn test_imagga_excludes_confidence_of_exactly_twenty() {
    let server = MockServer::start().await;
    mount_upload(&server).await;
    Mock::given(method("GET"))
        .and(path("/v2/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(imagga_tags_response(&[20.0, 20.5])))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let client = ImaggaClient::new(&server.uri(), "key", "secret", TIMEOUT).unwrap();
    let keywords = client.extract_keywords(&image_file(&dir)).await.into_items();

    assert_eq!(keywords.len(), 1);
    assert_eq!(keywords[0].confidence, 20.5);
}

#[tokio::test]
async fn test_imagga_auth_failure_degrades() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v2/uploads"))
        .respond_with(ResponseTemplate::new(401).set_body_json(serde_json::json!({
            "status": { "text": "You need to authenticate", "type": "error" }
        })))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let client = ImaggaClient::new(&server.uri(), "key", "wrong", TIMEOUT).unwrap();
    let outcome = client.extract_keywords(&image_file(&dir)).await;

    assert!(outcome.is_degraded());
    assert!(outcome.into_items().is_empty());
}

#[tokio::test]
async fn test_imagga_malformed_response_degrades() {
    let server = MockServer::start().await;
    mount_upload(&server).await;
    Mock::given(method("GET"))
        .and(path("/v2/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>gateway error</html>"))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let client = ImaggaClient::new(&server.uri(), "key", "secret", TIMEOUT).unwrap();

    assert!(client.extract_keywords(&image_file(&dir)).await.is_degraded());
}

#[tokio::test]
async fn test_imagga_missing_file_degrades_without_calling_service() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(imagga_upload_response()))
        .expect(0)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let client = ImaggaClient::new(&server.uri(), "key", "secret", TIMEOUT).unwrap();
    let outcome = client.extract_keywords(&dir.path().join("missing.png")).await;

    assert!(outcome.is_degraded());
}

#[tokio::test]
async fn test_unsplash_returns_full_urls_in_order() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/search/photos"))
        .and(query_param("query", "sea sand"))
        .and(query_param("per_page", "2"))
        .and(query_param("client_id", "access"))
        .respond_with(ResponseTemplate::new(200).set_body_json(unsplash_response(&[
            "https://images.example/one",
            "https://images.example/two",
            "https://images.example/three",
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let client = UnsplashClient::new(&server.uri(), "access", TIMEOUT).unwrap();
    let urls = client.search("sea sand").await;

    assert_eq!(
        urls,
        ServiceOutcome::Ok(vec![
            "https://images.example/one".to_string(),
            "https://images.example/two".to_string(),
        ])
    );
}

#[tokio::test]
async fn test_unsplash_error_degrades() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/search/photos"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let client = UnsplashClient::new(&server.uri(), "access", TIMEOUT).unwrap();
    let outcome = client.search("sea").await;

    assert!(outcome.is_degraded());
    assert!(outcome.into_items().is_empty());
}

#[tokio::test]
async fn test_fetcher_streams_to_target() {
    let server = MockServer::start().await;
    let body = vec![0xFFu8; 256 * 1024];
    Mock::given(method("GET"))
        .and(path("/photo.jpg"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body.clone()))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let target = dir.path().join("nested").join("photo.jpg");
    let fetcher = HttpImageFetcher::new(TIMEOUT).unwrap();

    let written = fetcher
        .fetch(&format!("{}/photo.jpg", server.uri()), &target)
        .await
        .unwrap();

    assert_eq!(written, body.len() as u64);
    assert_eq!(std::fs::read(&target).unwrap(), body);
    assert!(!partial_path(&target).exists());
}

#[tokio::test]
async fn test_fetcher_failure_leaves_existing_file_intact() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/missing.jpg"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let target = dir.path().join("photo.jpg");
    std::fs::write(&target, b"earlier download").unwrap();
    let fetcher = HttpImageFetcher::new(TIMEOUT).unwrap();

    let result = fetcher
        .fetch(&format!("{}/missing.jpg", server.uri()), &target)
        .await;

    assert!(matches!(result, Err(FetchError::Http(_))));
    assert_eq!(std::fs::read(&target).unwrap(), b"earlier download");
    assert!(!partial_path(&target).exists());
}

#[tokio::test]
async fn test_fetcher_unreachable_host_leaves_nothing() {
    let dir = TempDir::new().unwrap();
    let target = dir.path().join("photo.jpg");
    let fetcher = HttpImageFetcher::new(Duration::from_secs(2)).unwrap();

    // Port 9 (discard) on localhost is not expected to speak HTTP
    let result = fetcher.fetch("http://127.0.0.1:9/photo.jpg", &target).await;

    assert!(result.is_err());
    assert!(!target.exists());
    assert!(!partial_path(&target).exists());
}
