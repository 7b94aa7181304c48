// src/providers/google.rs
use async_trait::async_trait;
use metrics::{counter, histogram};

use crate::http::{OutboundRequest, RetryingClient};
use crate::providers::types::{
    collect_links, read_json, result_meta, AdapterError, ProviderResult, SearchContext,
    SearchProvider,
};
use crate::query::{build_query_at, ProviderNeutralQuery};

pub const GOOGLE_CSE_URL: &str = "https://www.googleapis.com/customsearch/v1";
// CSE returns at most 10 items per request.
const GOOGLE_MAX_NUM: u32 = 10;

/// Google Custom Search JSON API.
pub struct GoogleCseProvider {
    api_key: String,
    cse_id: String,
    endpoint: String,
    client: RetryingClient,
}

impl GoogleCseProvider {
    pub fn new(api_key: impl Into<String>, cse_id: impl Into<String>, client: RetryingClient) -> Self {
        Self {
            api_key: api_key.into(),
            cse_id: cse_id.into(),
            endpoint: GOOGLE_CSE_URL.to_string(),
            client,
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

/// CSE expects `lang_<code>` in the `lr` parameter.
fn language_restrict(lang: &str) -> String {
    format!("lang_{lang}")
}

#[async_trait]
impl SearchProvider for GoogleCseProvider {
    fn name(&self) -> &'static str {
        "google"
    }

    async fn search(
        &self,
        query: &ProviderNeutralQuery,
        ctx: &SearchContext,
    ) -> Result<ProviderResult, AdapterError> {
        let q = build_query_at(query, ctx.reference_date);
        let f = &query.filters;

        let mut req = OutboundRequest::get(&self.endpoint)
            .param("key", &self.api_key)
            .param("cx", &self.cse_id)
            .param("q", &q)
            .param("num", f.max_results.min(GOOGLE_MAX_NUM));
        if let Some(lang) = f.lang.as_deref().filter(|l| !l.is_empty()) {
            req = req.param("lr", language_restrict(lang));
        }
        if let Some(geo) = f.geo.as_deref().filter(|g| !g.is_empty()) {
            req = req.param("gl", geo);
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
        let items = data
            .get("items")
            .and_then(|v| v.as_array())
            .map(Vec::as_slice)
            .unwrap_or_default();
        let urls = collect_links(items, "link");

        histogram!("provider_parse_ms", "provider" => "google")
            .record(t0.elapsed().as_secs_f64() * 1_000.0);
        counter!("provider_results_total", "provider" => "google").increment(urls.len() as u64);

        Ok(ProviderResult {
            provider: self.name().to_string(),
            meta: result_meta(&q, items.len()),
            query_used: q,
            urls,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lr_uses_lang_prefix() {
        assert_eq!(language_restrict("en"), "lang_en");
    }
}
