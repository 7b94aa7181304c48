// tests/providers_serper.rs

use std::time::Duration;

use chrono::NaiveDate;
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use source_harvester::http::{RetryPolicy, RetryingClient};
use source_harvester::providers::{AdapterError, SearchContext, SearchProvider, SerperProvider};
use source_harvester::query::ProviderNeutralQuery;

fn ctx() -> SearchContext {
    SearchContext::new(
        Some("7".into()),
        NaiveDate::from_ymd_opt(2025, 1, 15).expect("valid date"),
    )
}

fn provider(server: &MockServer) -> SerperProvider {
    let client = RetryingClient::new(Duration::from_secs(2))
        .expect("client")
        .with_policy(RetryPolicy::immediate(1));
    SerperProvider::new("serper-key", client).with_endpoint(format!("{}/search", server.uri()))
}

fn query() -> ProviderNeutralQuery {
    ProviderNeutralQuery::from_value(json!({
        "keywords": ["openai", "api"],
        "filters": { "sites": ["openai.com"], "date_after": "{{days_ago:10}}" }
    }))
    .expect("valid query")
}

#[tokio::test]
async fn posts_query_and_parses_organic_links() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/search"))
        .and(header("X-API-KEY", "serper-key"))
        .and(header("X-Run-Id", "7"))
        .and(body_partial_json(json!({
            "q": "openai api site:openai.com after:2025-01-05",
            "num": 20
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "organic": [
                { "link": "https://openai.com/a", "title": "A" },
                { "title": "no link" },
                { "link": "https://openai.com/b" }
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let res = provider(&server).search(&query(), &ctx()).await.expect("search ok");
    assert_eq!(res.provider, "serper");
    assert_eq!(res.urls, vec!["https://openai.com/a", "https://openai.com/b"]);
    assert_eq!(res.query_used, "openai api site:openai.com after:2025-01-05");
    assert_eq!(res.meta["queryUsed"], res.query_used.as_str());
}

#[tokio::test]
async fn missing_organic_block_is_empty_not_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "searchParameters": {} })))
        .mount(&server)
        .await;

    let res = provider(&server).search(&query(), &ctx()).await.expect("search ok");
    assert!(res.urls.is_empty());
}

#[tokio::test]
async fn non_success_status_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let err = provider(&server).search(&query(), &ctx()).await.unwrap_err();
    assert!(matches!(err, AdapterError::Status { provider: "serper", status: 403 }));
}

#[tokio::test]
async fn non_json_body_is_a_decode_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>nope</html>"))
        .mount(&server)
        .await;

    let err = provider(&server).search(&query(), &ctx()).await.unwrap_err();
    assert!(matches!(err, AdapterError::Decode { provider: "serper", .. }));
}
