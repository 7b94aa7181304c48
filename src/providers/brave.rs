// src/providers/brave.rs
use async_trait::async_trait;
use metrics::{counter, histogram};

use crate::http::{OutboundRequest, RetryingClient};
use crate::providers::freshness::FreshnessPolicy;
use crate::providers::types::{
    collect_links, read_json, result_meta, AdapterError, ProviderResult, SearchContext,
    SearchProvider,
};
use crate::query::{build_query_at, ProviderNeutralQuery};

pub const BRAVE_URL: &str = "https://api.search.brave.com/res/v1/web/search";
const BRAVE_MAX_COUNT: u32 = 20;

/// Brave Search API. The only adapter that sends a freshness window.
pub struct BraveProvider {
    api_key: String,
    endpoint: String,
    freshness: FreshnessPolicy,
    client: RetryingClient,
}

impl BraveProvider {
    pub fn new(api_key: impl Into<String>, client: RetryingClient) -> Self {
        Self {
            api_key: api_key.into(),
            endpoint: BRAVE_URL.to_string(),
            freshness: FreshnessPolicy::default(),
            client,
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_freshness(mut self, policy: FreshnessPolicy) -> Self {
        self.freshness = policy;
        self
    }
}

#[async_trait]
impl SearchProvider for BraveProvider {
    fn name(&self) -> &'static str {
        "brave"
    }

    async fn search(
        &self,
        query: &ProviderNeutralQuery,
        ctx: &SearchContext,
    ) -> Result<ProviderResult, AdapterError> {
        let q = build_query_at(query, ctx.reference_date);
        let f = &query.filters;

        let mut req = OutboundRequest::get(&self.endpoint)
            .header("X-Subscription-Token", &self.api_key)
            .param("q", &q)
            .param("count", f.max_results.min(BRAVE_MAX_COUNT));
        if let Some(lang) = f.lang.as_deref().filter(|l| !l.is_empty()) {
            req = req.param("search_lang", lang);
        }
        if let Some(geo) = f.geo.as_deref().filter(|g| !g.is_empty()) {
            req = req.param("country", geo);
        }
        if let Some(hint) = self.freshness.hint_for(f.date_after.as_deref()) {
            req = req.param("freshness", hint);
        }
        let req = req.correlation_id(ctx.correlation_id.as_deref());

        let resp = self
            .client
            .execute(&req)
            .await
            .map_err(|source| AdapterError::Transport {
                provider: self.name(),
                source,
            })?;

        let t0 = std::time::Instant::now();
        let data = read_json(self.name(), resp).await?;
        let results = data
            .get("web")
            .and_then(|w| w.get("results"))
            .and_then(|v| v.as_array())
            .map(Vec::as_slice)
            .unwrap_or_default();
        let urls = collect_links(results, "url");

        histogram!("provider_parse_ms", "provider" => "brave")
            .record(t0.elapsed().as_secs_f64() * 1_000.0);
        counter!("provider_results_total", "provider" => "brave").increment(urls.len() as u64);

        Ok(ProviderResult {
            provider: self.name().to_string(),
            meta: result_meta(&q, results.len()),
            query_used: q,
            urls,
        })
    }
}
