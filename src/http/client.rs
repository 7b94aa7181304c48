// src/http/client.rs
//! Retrying transport shared by every provider adapter.
//!
//! One logical call = up to `max_attempts` physical sends. Connection-level failures
//! and retryable statuses (429 and 5xx by default) back off exponentially with jitter.
//! A retryable status on the final attempt is handed back as-is; callers check status.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use rand::Rng;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, USER_AGENT};
use reqwest::Method;
use serde::Deserialize;

use crate::http::telemetry::{RequestEvent, ResponseEvent, TelemetryHook};

pub const CORRELATION_HEADER: &str = "X-Run-Id";
const DEFAULT_USER_AGENT: &str = "source-harvester/0.1.0";

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("failed to build HTTP client: {0}")]
    Build(String),
    #[error("request to {url} failed after {attempts} attempt(s): {source}")]
    Exhausted {
        url: String,
        attempts: u32,
        #[source]
        source: reqwest::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub jitter_ms: u64,
    pub retry_on_status: Vec<u16>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        let mut retry_on_status = vec![429];
        retry_on_status.extend(500..600);
        Self {
            max_attempts: 3,
            base_delay_ms: 250,
            jitter_ms: 100,
            retry_on_status,
        }
    }
}

impl RetryPolicy {
    /// Policy with no waiting between attempts.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay_ms: 0,
            jitter_ms: 0,
            ..Self::default()
        }
    }

    pub fn is_retryable(&self, status: u16) -> bool {
        self.retry_on_status.contains(&status)
    }

    /// Exponential part of the delay before retrying after `attempt` (1-based).
    pub fn base_backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(20);
        Duration::from_millis(self.base_delay_ms.saturating_mul(factor))
    }

    /// `base_delay * 2^(attempt-1) + uniform(0, jitter)`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let jitter = if self.jitter_ms == 0 {
            0
        } else {
            rand::rng().random_range(0..=self.jitter_ms)
        };
        self.base_backoff(attempt) + Duration::from_millis(jitter)
    }

    fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

/// A single logical outbound call.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub query: Vec<(String, String)>,
    pub json: Option<serde_json::Value>,
    pub correlation_id: Option<String>,
}

impl OutboundRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            query: Vec::new(),
            json: None,
            correlation_id: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::POST, url)
    }

    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_string(), value.into()));
        self
    }

    pub fn param(mut self, name: &str, value: impl ToString) -> Self {
        self.query.push((name.to_string(), value.to_string()));
        self
    }

    pub fn json(mut self, body: serde_json::Value) -> Self {
        self.json = Some(body);
        self
    }

    pub fn correlation_id(mut self, id: Option<&str>) -> Self {
        self.correlation_id = id.map(str::to_string);
        self
    }
}

#[derive(Clone)]
pub struct RetryingClient {
    http: reqwest::Client,
    policy: RetryPolicy,
    hooks: Arc<Vec<Arc<dyn TelemetryHook>>>,
}

impl RetryingClient {
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(DEFAULT_USER_AGENT));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json, */*;q=0.1"));

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Build(e.to_string()))?;

        Ok(Self {
            http,
            policy: RetryPolicy::default(),
            hooks: Arc::new(Vec::new()),
        })
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_hook(mut self, hook: Arc<dyn TelemetryHook>) -> Self {
        let mut hooks: Vec<_> = self.hooks.iter().cloned().collect();
        hooks.push(hook);
        self.hooks = Arc::new(hooks);
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub async fn execute(&self, req: &OutboundRequest) -> Result<reqwest::Response, TransportError> {
        self.execute_with(req, &self.policy).await
    }

    pub async fn execute_with(
        &self,
        req: &OutboundRequest,
        policy: &RetryPolicy,
    ) -> Result<reqwest::Response, TransportError> {
        let max = policy.attempts();
        let host = reqwest::Url::parse(&req.url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_default();

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let event = RequestEvent {
                method: req.method.to_string(),
                url: req.url.clone(),
                host: host.clone(),
                attempt,
                correlation_id: req.correlation_id.clone(),
            };
            tracing::debug!(
                method = %event.method,
                url = %event.url,
                attempt,
                run_id = event.correlation_id.as_deref().unwrap_or(""),
                "http.request"
            );
            self.notify_request(&event).await;

            let started = Instant::now();
            match self.prepare(req).send().await {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    let done = ResponseEvent {
                        request: event,
                        status,
                        elapsed: started.elapsed(),
                    };
                    tracing::debug!(
                        method = %done.request.method,
                        url = %done.request.url,
                        status,
                        elapsed_ms = done.elapsed.as_millis() as u64,
                        run_id = done.request.correlation_id.as_deref().unwrap_or(""),
                        "http.response"
                    );
                    self.notify_response(&done).await;

                    if !(policy.is_retryable(status) && attempt < max) {
                        return Ok(resp);
                    }
                    tracing::debug!(status, attempt, "retryable status, backing off");
                }
                Err(e) => {
                    tracing::debug!(error = %e, attempt, url = %req.url, "http send failed");
                    if attempt >= max {
                        return Err(TransportError::Exhausted {
                            url: req.url.clone(),
                            attempts: attempt,
                            source: e,
                        });
                    }
                }
            }

            tokio::time::sleep(policy.backoff(attempt)).await;
        }
    }

    fn prepare(&self, req: &OutboundRequest) -> reqwest::RequestBuilder {
        let mut builder = self.http.request(req.method.clone(), &req.url);
        for (k, v) in &req.headers {
            builder = builder.header(k.as_str(), v.as_str());
        }
        if let Some(id) = &req.correlation_id {
            if !req
                .headers
                .iter()
                .any(|(k, _)| k.eq_ignore_ascii_case(CORRELATION_HEADER))
            {
                builder = builder.header(CORRELATION_HEADER, id.as_str());
            }
        }
        if !req.query.is_empty() {
            builder = builder.query(&req.query);
        }
        if let Some(body) = &req.json {
            builder = builder.json(body);
        }
        builder
    }

    async fn notify_request(&self, event: &RequestEvent) {
        for hook in self.hooks.iter() {
            match AssertUnwindSafe(hook.on_request(event)).catch_unwind().await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::debug!(error = %e, "telemetry on_request failed"),
                Err(panic) => {
                    tracing::debug!(panic = panic_message(&*panic), "telemetry on_request panicked")
                }
            }
        }
    }

    async fn notify_response(&self, event: &ResponseEvent) {
        for hook in self.hooks.iter() {
            match AssertUnwindSafe(hook.on_response(event)).catch_unwind().await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::debug!(error = %e, "telemetry on_response failed"),
                Err(panic) => {
                    tracing::debug!(panic = panic_message(&*panic), "telemetry on_response panicked")
                }
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}
