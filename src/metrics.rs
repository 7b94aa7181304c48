// src/metrics.rs
//! Process-wide metrics: an owned counter/sample accumulator plus the Prometheus
//! recorder behind `/metrics`.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use axum::{routing::get, Router};
use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use serde::Serialize;

use crate::http::{RequestEvent, ResponseEvent, TelemetryHook};

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the Prometheus recorder once per process; later calls reuse the handle.
    pub fn init() -> anyhow::Result<Self> {
        static HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();
        let handle = HANDLE
            .get_or_try_init(|| PrometheusBuilder::new().install_recorder())?
            .clone();
        describe_all();
        Ok(Self { handle })
    }

    pub fn render(&self) -> String {
        self.handle.render()
    }

    /// Returns a router exposing `/metrics` with the Prometheus exposition format.
    pub fn router(&self) -> Router {
        let handle = self.handle.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
    }
}

/// One-time metrics registration (so series show up on /metrics).
fn describe_all() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("http_client_requests_total", "Outbound HTTP attempts.");
        describe_counter!("http_client_responses_total", "Outbound HTTP responses by status.");
        describe_histogram!("http_client_duration_ms", "Outbound HTTP latency in milliseconds.");
        describe_counter!("orchestrator_runs_total", "Orchestration runs by outcome.");
        describe_counter!(
            "orchestrator_provider_errors_total",
            "Provider calls that failed and were excluded from a run."
        );
        describe_counter!("orchestrator_processed_total", "Merged URLs persisted.");
        describe_counter!("provider_results_total", "URLs parsed from provider responses.");
        describe_histogram!("provider_parse_ms", "Provider response parse time in milliseconds.");
    });
}

/// Counter/sample series identity: `name{k=v,...}` with tags sorted by key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MetricKey {
    pub name: String,
    pub tags: Vec<(String, String)>,
}

impl MetricKey {
    pub fn new(name: &str, tags: &[(&str, &str)]) -> Self {
        let mut tags: Vec<(String, String)> = tags
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        tags.sort();
        Self {
            name: name.to_string(),
            tags,
        }
    }
}

impl std::fmt::Display for MetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)?;
        if self.tags.is_empty() {
            return Ok(());
        }
        let joined: Vec<String> = self.tags.iter().map(|(k, v)| format!("{k}={v}")).collect();
        write!(f, "{{{}}}", joined.join(","))
    }
}

/// Explicitly owned accumulator shared by `Arc`. Counters are atomics; the maps are
/// only locked to register a new series or append a sample.
#[derive(Debug, Default)]
pub struct MetricsStore {
    counters: RwLock<HashMap<MetricKey, Arc<AtomicU64>>>,
    samples: Mutex<HashMap<MetricKey, Vec<f64>>>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MetricsSnapshot {
    pub counters: BTreeMap<String, u64>,
    pub samples: BTreeMap<String, SampleSummary>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SampleSummary {
    pub count: usize,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
}

impl MetricsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incr(&self, name: &str, tags: &[(&str, &str)]) {
        self.incr_by(name, tags, 1);
    }

    pub fn incr_by(&self, name: &str, tags: &[(&str, &str)], by: u64) {
        let key = MetricKey::new(name, tags);
        let existing = self
            .counters
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(&key)
            .cloned();
        let cell = match existing {
            Some(c) => c,
            None => self
                .counters
                .write()
                .unwrap_or_else(|p| p.into_inner())
                .entry(key)
                .or_default()
                .clone(),
        };
        cell.fetch_add(by, Ordering::Relaxed);
    }

    pub fn record_ms(&self, name: &str, tags: &[(&str, &str)], ms: f64) {
        self.samples
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .entry(MetricKey::new(name, tags))
            .or_default()
            .push(ms);
    }

    pub fn counter(&self, name: &str, tags: &[(&str, &str)]) -> u64 {
        self.counters
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(&MetricKey::new(name, tags))
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Sum of a counter across every tag combination.
    pub fn counter_total(&self, name: &str) -> u64 {
        self.counters
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .iter()
            .filter(|(k, _)| k.name == name)
            .map(|(_, c)| c.load(Ordering::Relaxed))
            .sum()
    }

    pub fn samples(&self, name: &str, tags: &[(&str, &str)]) -> Vec<f64> {
        self.samples
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(&MetricKey::new(name, tags))
            .cloned()
            .unwrap_or_default()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let counters = self
            .counters
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .iter()
            .map(|(k, c)| (k.to_string(), c.load(Ordering::Relaxed)))
            .collect();
        let samples = self
            .samples
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .iter()
            .map(|(k, v)| (k.to_string(), summarize(v)))
            .collect();
        MetricsSnapshot { counters, samples }
    }
}

fn summarize(values: &[f64]) -> SampleSummary {
    if values.is_empty() {
        return SampleSummary::default();
    }
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    SampleSummary {
        count: values.len(),
        min,
        max,
        mean,
    }
}

/// Transport listener that counts requests/responses into a [`MetricsStore`] and
/// mirrors them to the Prometheus recorder.
pub struct MetricsTelemetry {
    store: Arc<MetricsStore>,
}

impl MetricsTelemetry {
    pub fn new(store: Arc<MetricsStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl TelemetryHook for MetricsTelemetry {
    async fn on_request(&self, event: &RequestEvent) -> anyhow::Result<()> {
        self.store.incr(
            "http_client.requests",
            &[("method", event.method.as_str()), ("host", event.host.as_str())],
        );
        counter!(
            "http_client_requests_total",
            "method" => event.method.clone(),
            "host" => event.host.clone()
        )
        .increment(1);
        Ok(())
    }

    async fn on_response(&self, event: &ResponseEvent) -> anyhow::Result<()> {
        let status = event.status.to_string();
        let family = event.family();
        let method = event.request.method.as_str();
        let host = event.request.host.as_str();
        let ms = event.elapsed.as_secs_f64() * 1_000.0;

        self.store.incr(
            "http_client.responses",
            &[
                ("method", method),
                ("host", host),
                ("status", status.as_str()),
                ("family", family.as_str()),
            ],
        );
        self.store
            .record_ms("http_client.duration_ms", &[("method", method), ("host", host)], ms);

        counter!(
            "http_client_responses_total",
            "method" => method.to_string(),
            "host" => host.to_string(),
            "status" => status,
            "family" => family
        )
        .increment(1);
        histogram!("http_client_duration_ms", "host" => host.to_string()).record(ms);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_order_does_not_split_series() {
        let m = MetricsStore::new();
        m.incr("x", &[("a", "1"), ("b", "2")]);
        m.incr("x", &[("b", "2"), ("a", "1")]);
        assert_eq!(m.counter("x", &[("a", "1"), ("b", "2")]), 2);
        assert_eq!(m.counter("x", &[]), 0);
        assert_eq!(m.counter_total("x"), 2);
    }

    #[test]
    fn snapshot_summarizes_samples() {
        let m = MetricsStore::new();
        m.record_ms("lat", &[], 10.0);
        m.record_ms("lat", &[], 30.0);
        let snap = m.snapshot();
        let s = &snap.samples["lat"];
        assert_eq!(s.count, 2);
        assert_eq!(s.min, 10.0);
        assert_eq!(s.max, 30.0);
        assert_eq!(s.mean, 20.0);
    }

    #[test]
    fn key_display_is_stable() {
        let k = MetricKey::new("req", &[("method", "GET"), ("host", "h")]);
        assert_eq!(k.to_string(), "req{host=h,method=GET}");
    }

    #[test]
    fn concurrent_increments_are_not_lost() {
        let m = Arc::new(MetricsStore::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let m = Arc::clone(&m);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        m.incr("n", &[]);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(m.counter("n", &[]), 8000);
    }
}
