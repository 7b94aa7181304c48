// tests/metrics.rs
//
// Prometheus exposition through the full app, and transport telemetry counters.

use std::env;
use std::sync::Arc;
use std::time::Duration;

use axum::body::{self, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use serial_test::serial;
use tower::ServiceExt;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

use source_harvester::http::{OutboundRequest, RetryPolicy, RetryingClient};
use source_harvester::metrics::{MetricsStore, MetricsTelemetry};

struct EnvSnapshot {
    saved: Vec<(String, Option<String>)>,
}

impl EnvSnapshot {
    fn set(pairs: &[(&str, Option<&str>)]) -> Self {
        let mut saved = Vec::with_capacity(pairs.len());
        for (k, v) in pairs {
            saved.push((k.to_string(), env::var(k).ok()));
            match v {
                Some(val) => env::set_var(k, val),
                None => env::remove_var(k),
            }
        }
        Self { saved }
    }
}

impl Drop for EnvSnapshot {
    fn drop(&mut self) {
        for (k, v) in self.saved.drain(..) {
            match v {
                Some(v) => env::set_var(&k, v),
                None => env::remove_var(&k),
            }
        }
    }
}

// Offline app: in-memory store, local rewriter, no provider keys.
async fn build_app() -> Router {
    let dir = tempfile::tempdir().expect("tempdir");
    let cfg = dir.path().join("app.toml");
    std::fs::write(&cfg, "database_url = \"memory\"\n[llm]\nprovider = \"local\"\n").expect("write");
    let cfg = cfg.display().to_string();

    let _env = EnvSnapshot::set(&[
        ("SH_CONFIG_FILE", Some(cfg.as_str())),
        ("SH_ENVIRONMENT", Some("test")),
        ("SH_SERPER_KEY", None),
        ("SH_GOOGLE_API_KEY", None),
        ("SH_GOOGLE_CSE_ID", None),
        ("SH_BRAVE_KEY", None),
        ("SH_API_BEARER_TOKEN", None),
        ("SH_VALIDATE_SECRETS", None),
        ("SH_DATABASE_URL", None),
        ("SH_SEARCH__PROVIDER", None),
        ("SH_LLM__PROVIDER", None),
    ]);
    source_harvester::app()
        .await
        .expect("app() should build Router in tests")
}

async fn text(resp: axum::response::Response) -> String {
    let bytes = body::to_bytes(resp.into_body(), 1_048_576).await.expect("body");
    String::from_utf8(bytes.to_vec()).expect("utf8")
}

#[tokio::test]
#[serial]
async fn metrics_endpoint_exposes_run_outcomes() {
    let app = build_app().await;

    // no providers configured, so the run fails upstream and is counted
    let resp = app
        .clone()
        .oneshot(
            Request::post("/search-runs")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"query":"rust"}"#))
                .expect("request"),
        )
        .await
        .expect("oneshot");
    assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);

    let resp = app
        .oneshot(Request::get("/metrics").body(Body::empty()).expect("request"))
        .await
        .expect("oneshot");
    assert_eq!(resp.status(), StatusCode::OK);
    let body = text(resp).await;
    assert!(
        body.contains("orchestrator_runs_total"),
        "missing orchestrator_runs_total in:\n{body}"
    );
    assert!(body.contains("no_providers"));
}

#[tokio::test]
#[serial]
async fn app_serves_health_alongside_metrics() {
    let app = build_app().await;
    let resp = app
        .oneshot(Request::get("/healthz").body(Body::empty()).expect("request"))
        .await
        .expect("oneshot");
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(text(resp).await.contains("\"db\":\"ok\""));
}

#[tokio::test]
async fn telemetry_hook_counts_attempts_and_statuses() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let store = Arc::new(MetricsStore::new());
    let client = RetryingClient::new(Duration::from_secs(2))
        .expect("client")
        .with_policy(RetryPolicy::immediate(2))
        .with_hook(Arc::new(MetricsTelemetry::new(store.clone())));
    client
        .execute(&OutboundRequest::get(server.uri()))
        .await
        .expect("second attempt ok");

    assert_eq!(
        store.counter("http_client.requests", &[("method", "GET"), ("host", "127.0.0.1")]),
        2
    );
    assert_eq!(store.counter_total("http_client.responses"), 2);
    assert_eq!(
        store.counter(
            "http_client.responses",
            &[("method", "GET"), ("host", "127.0.0.1"), ("status", "503"), ("family", "5xx")]
        ),
        1
    );
    assert_eq!(
        store.samples("http_client.duration_ms", &[("method", "GET"), ("host", "127.0.0.1")]).len(),
        2
    );
}
