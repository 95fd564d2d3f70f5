//! Common test utilities and helpers for backlog-exporter tests
#![allow(dead_code)]

use backlog_exporter::{BacklogClient, Config, RateLimiter};
use serde_json::{json, Value};
use std::sync::Arc;
use wiremock::matchers::{method, path, path_regex, query_param};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

pub const TEST_API_KEY: &str = "test-api-key";
pub const OLD_TIMESTAMP: &str = "2024-01-01T00:00:00Z";
pub const NEW_TIMESTAMP: &str = "2024-03-01T00:00:00Z";
pub const LAST_SYNCED_AT: &str = "2024-02-01T00:00:00.000Z";

/// Configuration pointing at a plain-HTTP mock server with no cool-down
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.api.scheme = "http".to_string();
    config.rate_limit.cooldown_secs = 0;
    config
}

/// Domain under which the mock server is reachable
pub fn mock_domain(server: &MockServer) -> String {
    server.address().to_string()
}

/// Client bound to the mock server with a fresh rate limiter
pub fn client_for(server: &MockServer, config: &Config) -> BacklogClient {
    BacklogClient::new(
        config,
        &mock_domain(server),
        TEST_API_KEY,
        Arc::new(RateLimiter::from_config(&config.rate_limit)),
    )
    .expect("Failed to create client")
}

/// Issue as returned by `GET /issues`
pub fn issue_json(id: u64, updated: &str) -> Value {
    json!({
        "id": id,
        "issueKey": format!("TEST-{}", id),
        "summary": format!("Issue {}", id),
        "description": format!("Description of issue {}", id),
        "status": {"id": 1, "name": "未対応"},
        "priority": {"id": 3, "name": "中"},
        "assignee": {"id": 10, "name": "Taro"},
        "created": OLD_TIMESTAMP,
        "updated": updated,
    })
}

/// Issues `first..=last`, all updated at `updated`
pub fn issues_json(first: u64, last: u64, updated: &str) -> Vec<Value> {
    (first..=last).map(|id| issue_json(id, updated)).collect()
}

pub fn comment_json(id: u64, content: &str) -> Value {
    json!({
        "id": id,
        "content": content,
        "created": OLD_TIMESTAMP,
        "createdUser": {"id": 10, "name": "Taro"},
    })
}

pub fn wiki_summary_json(id: u64, name: &str, updated: &str) -> Value {
    json!({"id": id, "name": name, "updated": updated})
}

pub fn wiki_page_json(id: u64, name: &str, content: &str) -> Value {
    json!({"id": id, "name": name, "content": content})
}

/// Serve one page of the issue list at `offset`
pub async fn mount_issue_page(server: &MockServer, offset: u64, issues: Vec<Value>) {
    Mock::given(method("GET"))
        .and(path("/api/v2/issues"))
        .and(query_param("offset", offset.to_string()))
        .respond_with(ResponseTemplate::new(200).set_body_json(issues))
        .expect(1)
        .mount(server)
        .await;
}

/// Answer every comment list request with an empty page
pub async fn mount_no_comments(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path_regex(r"^/api/v2/issues/[^/]+/comments$"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(server)
        .await;
}

pub async fn mount_project(server: &MockServer, key: &str, id: u64) {
    Mock::given(method("GET"))
        .and(path(format!("/api/v2/projects/{}", key)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": id,
            "projectKey": key,
            "name": "Test project",
        })))
        .mount(server)
        .await;
}

pub async fn mount_wiki_list(server: &MockServer, wikis: Vec<Value>) {
    Mock::given(method("GET"))
        .and(path("/api/v2/wikis"))
        .respond_with(ResponseTemplate::new(200).set_body_json(wikis))
        .mount(server)
        .await;
}

pub async fn mount_wiki_page(server: &MockServer, id: u64, name: &str, content: &str) {
    Mock::given(method("GET"))
        .and(path(format!("/api/v2/wikis/{}", id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(wiki_page_json(id, name, content)))
        .mount(server)
        .await;
}

/// Every request the mock server has seen
pub async fn received(server: &MockServer) -> Vec<Request> {
    server
        .received_requests()
        .await
        .expect("Request recording is enabled")
}

/// Requests whose path matches `predicate`
pub async fn count_requests(server: &MockServer, predicate: impl Fn(&str) -> bool) -> usize {
    received(server)
        .await
        .iter()
        .filter(|request| predicate(request.url.path()))
        .count()
}

pub fn is_comment_path(path: &str) -> bool {
    path.starts_with("/api/v2/issues/") && path.ends_with("/comments")
}

pub fn is_issue_list_path(path: &str) -> bool {
    path == "/api/v2/issues"
}
