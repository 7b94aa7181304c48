// src/providers/serper.rs
use async_trait::async_trait;
use metrics::{counter, histogram};
use serde_json::json;

use crate::http::{OutboundRequest, RetryingClient};
use crate::providers::types::{
    collect_links, read_json, result_meta, AdapterError, ProviderResult, SearchContext,
    SearchProvider,
};
use crate::query::{build_query_at, ProviderNeutralQuery};

pub const SERPER_URL: &str = "https://google.serper.dev/search";
const SERPER_MAX_NUM: u32 = 20;

/// Serper.dev Google proxy: JSON POST, results under `organic[].link`.
pub struct SerperProvider {
    api_key: String,
    endpoint: String,
    client: RetryingClient,
}

impl SerperProvider {
    pub fn new(api_key: impl Into<String>, client: RetryingClient) -> Self {
        Self {
            api_key: api_key.into(),
            endpoint: SERPER_URL.to_string(),
            client,
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

#[async_trait]
impl SearchProvider for SerperProvider {
    fn name(&self) -> &'static str {
        "serper"
    }

    async fn search(
        &self,
        query: &ProviderNeutralQuery,
        ctx: &SearchContext,
    ) -> Result<ProviderResult, AdapterError> {
        let q = build_query_at(query, ctx.reference_date);
        let body = json!({
            "q": q,
            "num": query.filters.max_results.min(SERPER_MAX_NUM),
        });

        let req = OutboundRequest::post(&self.endpoint)
            .header("X-API-KEY", &self.api_key)
            .json(body)
            .correlation_id(ctx.correlation_id.as_deref());
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
        let organic = data
            .get("organic")
            .and_then(|v| v.as_array())
            .map(Vec::as_slice)
            .unwrap_or_default();
        let urls = collect_links(organic, "link");

        histogram!("provider_parse_ms", "provider" => "serper")
            .record(t0.elapsed().as_secs_f64() * 1_000.0);
        counter!("provider_results_total", "provider" => "serper").increment(urls.len() as u64);

        Ok(ProviderResult {
            provider: self.name().to_string(),
            meta: result_meta(&q, organic.len()),
            query_used: q,
            urls,
        })
    }
}
