// src/http/telemetry.rs
//! Read-only listeners around every outbound request.

use std::time::Duration;

use async_trait::async_trait;

/// What a listener sees before a request goes out.
#[derive(Debug, Clone)]
pub struct RequestEvent {
    pub method: String,
    pub url: String,
    pub host: String,
    pub attempt: u32,
    pub correlation_id: Option<String>,
}

/// What a listener sees after a response arrives.
#[derive(Debug, Clone)]
pub struct ResponseEvent {
    pub request: RequestEvent,
    pub status: u16,
    pub elapsed: Duration,
}

impl ResponseEvent {
    /// Status family label, e.g. `"5xx"`.
    pub fn family(&self) -> String {
        format!("{}xx", self.status / 100)
    }
}

/// A listener may record timing and outcome. It gets owned snapshots, so it
/// cannot touch the request or the response. Errors it returns and panics it
/// raises are logged and dropped.
#[async_trait]
pub trait TelemetryHook: Send + Sync {
    async fn on_request(&self, event: &RequestEvent) -> anyhow::Result<()>;
    async fn on_response(&self, event: &ResponseEvent) -> anyhow::Result<()>;
}
