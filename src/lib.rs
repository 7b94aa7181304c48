// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod api;
pub mod config;
pub mod http;
pub mod llm;
pub mod logging;
pub mod metrics;
pub mod orchestrator;
pub mod providers;
pub mod query;
pub mod store;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::Router;

pub use crate::api::{router, AppState};
pub use crate::config::{load_runtime_config, RuntimeConfig};
pub use crate::orchestrator::{Orchestrator, OrchestratorError, OrchestratorOutput, RunRequest};

use crate::config::LlmProvider;
use crate::http::RetryingClient;
use crate::llm::{CachedRewriter, OpenAiRewriter, QueryRewriter, RepositoryCache, StaticRewriter};
use crate::metrics::{Metrics, MetricsStore, MetricsTelemetry};
use crate::providers::build_registry;

/// Wire every collaborator from loaded config. `env` resolves provider and LLM keys.
pub async fn build_state<F>(rc: &RuntimeConfig, env: F) -> anyhow::Result<AppState>
where
    F: Fn(&str) -> Option<String>,
{
    let settings = rc.settings.clone();
    let metrics = Arc::new(MetricsStore::new());

    let store = store::connect(&settings.database_url)
        .await
        .with_context(|| format!("opening store at {}", settings.database_url))?;

    let search_client = RetryingClient::new(Duration::from_secs_f64(settings.search.timeout_seconds))?
        .with_policy(settings.search.retry.clone())
        .with_hook(Arc::new(MetricsTelemetry::new(metrics.clone())));
    let registry = build_registry(&env, &search_client, &settings.search.freshness_policy());

    let orchestrator = Orchestrator::new(registry, store.clone(), settings.search.selection())
        .with_metrics(metrics.clone());

    let inner: Arc<dyn QueryRewriter> = match settings.llm.provider {
        LlmProvider::OpenAi => {
            let key = config::secrets::openai_api_key(&env).unwrap_or_default();
            if key.is_empty() {
                tracing::warn!("no OpenAI key configured; rewrites will fail upstream");
            }
            let client = RetryingClient::new(Duration::from_secs_f64(settings.llm.timeout_seconds))?
                .with_hook(Arc::new(MetricsTelemetry::new(metrics.clone())));
            Arc::new(OpenAiRewriter::new(
                key,
                settings.llm.model.as_deref(),
                settings.llm.temperature,
                rc.prompt_text.clone(),
                client,
            ))
        }
        LlmProvider::Local => Arc::new(StaticRewriter::new(settings.search.default_options.filters())),
    };
    let rewriter = CachedRewriter::new(inner).with_cache(Arc::new(RepositoryCache::new(store.clone())));

    Ok(AppState {
        settings: Arc::new(settings),
        store,
        rewriter: Arc::new(rewriter),
        orchestrator: Arc::new(orchestrator),
        metrics,
    })
}

/// Full application router: API routes plus Prometheus `/metrics`.
pub async fn app() -> anyhow::Result<Router> {
    let rc = load_runtime_config()?;
    let state = build_state(&rc, |k| std::env::var(k).ok()).await?;
    let prometheus = Metrics::init()?;
    Ok(router(state).merge(prometheus.router()))
}
