// src/orchestrator.rs
//! One search run: pick providers, fan out concurrently, merge by literal URL,
//! persist raw and merged rows, report.
//!
//! Per-run phases: `Allocated → Calling(n) → Merging → Persisted → Returned`,
//! or `Calling → Failed` when no provider produced data.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use metrics::counter;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::metrics::MetricsStore;
use crate::providers::{AdapterError, ProviderRegistry, ProviderResult, SearchContext, SearchProvider};
use crate::query::{placeholders, ProviderNeutralQuery};
use crate::store::{NewRun, ProcessedRow, RawRow, RunId, RunRepository, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("all providers failed ({})", .failures.join("; "))]
    AllProvidersFailed {
        /// `None` when nothing was selected and no run was allocated.
        run_id: Option<RunId>,
        failures: Vec<String>,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Which providers a run may call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderSelection {
    /// Call exactly this provider.
    Pinned(String),
    /// Call every listed provider that has a live adapter, in this order.
    Cascade(Vec<String>),
}

impl Default for ProviderSelection {
    fn default() -> Self {
        ProviderSelection::Cascade(vec!["serper".into(), "google".into(), "brave".into()])
    }
}

/// Selected provider names, in call order. Names without an adapter are skipped.
pub fn select_providers(selection: &ProviderSelection, registry: &ProviderRegistry) -> Vec<String> {
    let wanted: Vec<&str> = match selection {
        ProviderSelection::Pinned(name) => vec![name.as_str()],
        ProviderSelection::Cascade(order) => order.iter().map(String::as_str).collect(),
    };
    let mut out: Vec<String> = Vec::new();
    for name in wanted {
        if !registry.contains(name) {
            tracing::debug!(provider = name, "provider not configured, skipping");
            continue;
        }
        if !out.iter().any(|n| n == name) {
            out.push(name.to_string());
        }
    }
    out
}

/// One distinct URL of a run and who returned it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessedResult {
    url: String,
    providers: Vec<String>,
    confidence: u32,
    #[serde(skip)]
    dedupe_hash: String,
}

impl ProcessedResult {
    /// `confidence` is derived from the distinct provider set, never passed in.
    pub fn new<I, S>(url: impl Into<String>, providers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let url = url.into();
        let providers: Vec<String> = providers
            .into_iter()
            .map(Into::into)
            .collect::<BTreeSet<String>>()
            .into_iter()
            .collect();
        Self {
            dedupe_hash: url_hash(&url),
            confidence: providers.len() as u32,
            providers,
            url,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Sorted alphabetically.
    pub fn providers(&self) -> &[String] {
        &self.providers
    }

    pub fn confidence(&self) -> u32 {
        self.confidence
    }

    pub fn dedupe_hash(&self) -> &str {
        &self.dedupe_hash
    }
}

impl From<&ProcessedResult> for ProcessedRow {
    fn from(p: &ProcessedResult) -> Self {
        ProcessedRow {
            url: p.url.clone(),
            providers: p.providers.clone(),
            confidence: p.confidence,
            dedupe_hash: p.dedupe_hash.clone(),
        }
    }
}

/// sha256 hex of the literal URL string.
pub fn url_hash(url: &str) -> String {
    format!("{:x}", Sha256::digest(url.as_bytes()))
}

/// Merge successful provider results by exact URL string. Output order is the order
/// in which each URL was first seen, walking providers in call order.
pub fn merge_results(results: &[ProviderResult]) -> Vec<ProcessedResult> {
    let mut order: Vec<&str> = Vec::new();
    let mut seen: HashMap<&str, BTreeSet<&str>> = HashMap::new();
    for r in results {
        for url in &r.urls {
            seen.entry(url.as_str())
                .or_insert_with(|| {
                    order.push(url.as_str());
                    BTreeSet::new()
                })
                .insert(r.provider.as_str());
        }
    }
    order
        .into_iter()
        .map(|url| ProcessedResult::new(url, seen.remove(url).unwrap_or_default()))
        .collect()
}

/// Raw rows for every successful provider, 1-based rank in provider order.
pub fn raw_rows(results: &[ProviderResult]) -> Vec<RawRow> {
    results
        .iter()
        .flat_map(|r| {
            r.urls.iter().enumerate().map(move |(i, url)| RawRow {
                provider: r.provider.clone(),
                url: url.clone(),
                rank: i as u32 + 1,
                meta: serde_json::json!({ "queryUsed": r.query_used }),
            })
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct RunRequest {
    pub original_query: String,
    /// Canonical JSON of `query`, as cached.
    pub rewritten_template: String,
    pub query: ProviderNeutralQuery,
    /// Free-form request options recorded with the run.
    pub run_config: serde_json::Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrchestratorOutput {
    pub run_id: RunId,
    pub processed: Vec<ProcessedResult>,
    /// Providers that returned data, in call order.
    pub providers_used: Vec<String>,
    pub per_provider_query_used: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunPhase {
    Allocated,
    Calling(usize),
    Merging,
    Persisted,
    Returned,
    Failed,
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunPhase::Allocated => f.write_str("allocated"),
            RunPhase::Calling(n) => write!(f, "calling({n})"),
            RunPhase::Merging => f.write_str("merging"),
            RunPhase::Persisted => f.write_str("persisted"),
            RunPhase::Returned => f.write_str("returned"),
            RunPhase::Failed => f.write_str("failed"),
        }
    }
}

fn enter(run_id: RunId, phase: RunPhase) {
    tracing::debug!(run_id, phase = %phase, "orchestrator phase");
}

pub struct Orchestrator {
    registry: ProviderRegistry,
    store: Arc<dyn RunRepository>,
    selection: ProviderSelection,
    metrics: Option<Arc<MetricsStore>>,
}

impl Orchestrator {
    pub fn new(registry: ProviderRegistry, store: Arc<dyn RunRepository>, selection: ProviderSelection) -> Self {
        Self {
            registry,
            store,
            selection,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsStore>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub fn selection(&self) -> &ProviderSelection {
        &self.selection
    }

    pub fn selected_providers(&self) -> Vec<String> {
        select_providers(&self.selection, &self.registry)
    }

    pub async fn run(&self, req: RunRequest) -> Result<OrchestratorOutput, OrchestratorError> {
        self.run_at(req, placeholders::today()).await
    }

    /// Same as [`run`](Self::run) with an explicit anchor for relative-date placeholders.
    pub async fn run_at(
        &self,
        req: RunRequest,
        reference_date: chrono::NaiveDate,
    ) -> Result<OrchestratorOutput, OrchestratorError> {
        let selected = self.selected_providers();
        if selected.is_empty() {
            tracing::warn!("no configured provider available for this run");
            self.count_run("no_providers");
            return Err(OrchestratorError::AllProvidersFailed {
                run_id: None,
                failures: Vec::new(),
            });
        }

        let run_id = self
            .store
            .allocate_run(NewRun {
                query: req.original_query.clone(),
                rewritten_template: req.rewritten_template.clone(),
                config: req.run_config.clone(),
                providers: selected.clone(),
            })
            .await?;
        enter(run_id, RunPhase::Allocated);

        enter(run_id, RunPhase::Calling(selected.len()));
        let ctx = SearchContext::new(Some(run_id.to_string()), reference_date);
        let outcomes = self.fan_out(&selected, &req.query, &ctx).await;

        let mut successes: Vec<ProviderResult> = Vec::new();
        let mut failures: Vec<String> = Vec::new();
        for (name, outcome) in selected.iter().zip(outcomes) {
            match outcome {
                Outcome::Ok(result) => {
                    tracing::debug!(run_id, provider = %name, urls = result.urls.len(), "provider returned");
                    successes.push(result);
                }
                Outcome::Failed(err) => {
                    tracing::warn!(run_id, provider = %name, error = %err, "provider call failed");
                    self.count_provider_error(name);
                    failures.push(format!("{name}: {err}"));
                }
                Outcome::Panicked(msg) => {
                    tracing::warn!(run_id, provider = %name, error = %msg, "provider task aborted");
                    self.count_provider_error(name);
                    failures.push(format!("{name}: {msg}"));
                }
            }
        }

        if successes.is_empty() {
            enter(run_id, RunPhase::Failed);
            self.count_run("failed");
            return Err(OrchestratorError::AllProvidersFailed {
                run_id: Some(run_id),
                failures,
            });
        }

        enter(run_id, RunPhase::Merging);
        let processed = merge_results(&successes);
        let raw = raw_rows(&successes);

        self.store.insert_raw_rows(run_id, &raw).await?;
        let rows: Vec<ProcessedRow> = processed.iter().map(ProcessedRow::from).collect();
        self.store.insert_processed_rows(run_id, &rows).await?;
        enter(run_id, RunPhase::Persisted);

        counter!("orchestrator_processed_total").increment(processed.len() as u64);
        if let Some(m) = &self.metrics {
            m.incr_by("orchestrator.processed", &[], processed.len() as u64);
        }
        self.count_run("ok");

        let providers_used: Vec<String> = successes.iter().map(|r| r.provider.clone()).collect();
        let per_provider_query_used = successes
            .iter()
            .map(|r| (r.provider.clone(), r.query_used.clone()))
            .collect();

        tracing::info!(
            run_id,
            providers = ?providers_used,
            raw = raw.len(),
            processed = processed.len(),
            "search run complete"
        );
        enter(run_id, RunPhase::Returned);

        Ok(OrchestratorOutput {
            run_id,
            processed,
            providers_used,
            per_provider_query_used,
        })
    }

    /// Each adapter runs in its own task so a panic stays inside that branch.
    async fn fan_out(
        &self,
        selected: &[String],
        query: &ProviderNeutralQuery,
        ctx: &SearchContext,
    ) -> Vec<Outcome> {
        let query = Arc::new(query.clone());
        let handles: Vec<_> = selected
            .iter()
            .map(|name| {
                let adapter: Option<Arc<dyn SearchProvider>> = self.registry.get(name);
                let query = Arc::clone(&query);
                let ctx = ctx.clone();
                let name = name.clone();
                tokio::spawn(async move {
                    match adapter {
                        Some(a) => a.search(&query, &ctx).await.map(|mut r| {
                            // registry name wins so aliases stay consistent in rows
                            r.provider = name;
                            r
                        }),
                        None => Err(AdapterError::Decode {
                            provider: "registry",
                            message: format!("adapter {name} disappeared"),
                        }),
                    }
                })
            })
            .collect();

        futures::future::join_all(handles)
            .await
            .into_iter()
            .map(|joined| match joined {
                Ok(Ok(result)) => Outcome::Ok(result),
                Ok(Err(e)) => Outcome::Failed(e),
                Err(join_err) => Outcome::Panicked(join_err.to_string()),
            })
            .collect()
    }

    fn count_run(&self, outcome: &'static str) {
        counter!("orchestrator_runs_total", "outcome" => outcome).increment(1);
        if let Some(m) = &self.metrics {
            m.incr("orchestrator.runs", &[("outcome", outcome)]);
        }
    }

    fn count_provider_error(&self, provider: &str) {
        counter!("orchestrator_provider_errors_total", "provider" => provider.to_string()).increment(1);
        if let Some(m) = &self.metrics {
            m.incr("orchestrator.provider_errors", &[("provider", provider)]);
        }
    }
}

/// Tagged result of one fan-out branch.
enum Outcome {
    Ok(ProviderResult),
    Failed(AdapterError),
    Panicked(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(provider: &str, urls: &[&str]) -> ProviderResult {
        ProviderResult {
            provider: provider.into(),
            query_used: format!("q-{provider}"),
            urls: urls.iter().map(|u| u.to_string()).collect(),
            meta: serde_json::json!({}),
        }
    }

    #[test]
    fn confidence_counts_distinct_providers() {
        let p = ProcessedResult::new("https://a", ["serper", "brave", "serper"]);
        assert_eq!(p.providers(), ["brave", "serper"]);
        assert_eq!(p.confidence(), 2);
        assert_eq!(p.dedupe_hash(), url_hash("https://a"));
    }

    #[test]
    fn merge_keeps_first_seen_order_and_exact_urls() {
        let merged = merge_results(&[
            result("serper", &["https://a", "https://b"]),
            result("brave", &["https://b", "https://a/", "https://A"]),
        ]);
        let urls: Vec<&str> = merged.iter().map(|p| p.url()).collect();
        assert_eq!(urls, ["https://a", "https://b", "https://a/", "https://A"]);
        assert_eq!(merged[1].confidence(), 2);
        assert_eq!(merged[2].confidence(), 1);
    }

    #[test]
    fn raw_rows_rank_from_one_per_provider() {
        let rows = raw_rows(&[result("serper", &["a", "b"]), result("brave", &["c"])]);
        let ranks: Vec<(&str, u32)> = rows.iter().map(|r| (r.provider.as_str(), r.rank)).collect();
        assert_eq!(ranks, [("serper", 1), ("serper", 2), ("brave", 1)]);
        assert_eq!(rows[0].meta["queryUsed"], "q-serper");
    }

    #[test]
    fn url_hash_is_stable_hex() {
        let h = url_hash("https://example.com");
        assert_eq!(h.len(), 64);
        assert_eq!(h, url_hash("https://example.com"));
        assert_ne!(h, url_hash("https://example.com/"));
    }

    #[test]
    fn phase_labels() {
        assert_eq!(RunPhase::Calling(3).to_string(), "calling(3)");
        assert_eq!(RunPhase::Failed.to_string(), "failed");
    }
}
