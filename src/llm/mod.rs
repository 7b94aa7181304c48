// src/llm/mod.rs
//! Natural language → provider-neutral query.

pub mod openai;

use std::sync::Arc;

use async_trait::async_trait;

pub use openai::OpenAiRewriter;

use crate::query::schema::{Filters, MAX_KEYWORDS};
use crate::query::{BooleanOp, ProviderNeutralQuery};
use crate::store::RunRepository;

/// A validated query plus the compact JSON it was parsed from (what gets cached).
#[derive(Debug, Clone, PartialEq)]
pub struct Rewritten {
    pub query: ProviderNeutralQuery,
    pub template: String,
}

/// `Service` is upstream trouble (502 to clients), `Validation` is unusable output (400).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RewriteError {
    #[error("rewrite service failed: {0}")]
    Service(String),
    #[error("rewrite produced an invalid query: {0}")]
    Validation(String),
}

#[async_trait]
pub trait QueryRewriter: Send + Sync {
    async fn rewrite(&self, query: &str) -> Result<Rewritten, RewriteError>;

    fn name(&self) -> &'static str;
}

/// Optional side channel for rewrite results. Failures here never fail a rewrite.
#[async_trait]
pub trait TemplateCache: Send + Sync {
    async fn get(&self, query: &str) -> anyhow::Result<Option<String>>;
    async fn put(&self, query: &str, template: &str) -> anyhow::Result<()>;
}

/// Parse raw model output (or a cached template) into a validated query.
pub fn parse_template(raw: &str) -> Result<Rewritten, RewriteError> {
    let value: serde_json::Value = serde_json::from_str(raw.trim())
        .map_err(|e| RewriteError::Validation(format!("not valid JSON: {e}")))?;
    let template = serde_json::to_string(&value)
        .map_err(|e| RewriteError::Validation(e.to_string()))?;
    let query =
        ProviderNeutralQuery::from_value(value).map_err(|e| RewriteError::Validation(e.to_string()))?;
    Ok(Rewritten { query, template })
}

/// Template cache backed by the run repository's `queries` table.
pub struct RepositoryCache {
    store: Arc<dyn RunRepository>,
}

impl RepositoryCache {
    pub fn new(store: Arc<dyn RunRepository>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl TemplateCache for RepositoryCache {
    async fn get(&self, query: &str) -> anyhow::Result<Option<String>> {
        Ok(self.store.get_cached_template(query).await?)
    }

    async fn put(&self, query: &str, template: &str) -> anyhow::Result<()> {
        Ok(self.store.insert_cached_template(query, template).await?)
    }
}

/// Wraps a rewriter with cache lookup before and cache insert after.
pub struct CachedRewriter {
    inner: Arc<dyn QueryRewriter>,
    cache: Option<Arc<dyn TemplateCache>>,
}

impl CachedRewriter {
    pub fn new(inner: Arc<dyn QueryRewriter>) -> Self {
        Self { inner, cache: None }
    }

    pub fn with_cache(mut self, cache: Arc<dyn TemplateCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    async fn lookup(&self, cache: &dyn TemplateCache, query: &str) -> Option<Rewritten> {
        let raw = match cache.get(query).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(error = %e, "template cache lookup failed");
                return None;
            }
        };
        match parse_template(&raw) {
            Ok(mut hit) => {
                hit.template = raw;
                tracing::debug!("template cache hit");
                Some(hit)
            }
            Err(e) => {
                tracing::warn!(error = %e, "cached template is corrupt, rewriting again");
                None
            }
        }
    }
}

#[async_trait]
impl QueryRewriter for CachedRewriter {
    async fn rewrite(&self, query: &str) -> Result<Rewritten, RewriteError> {
        if let Some(cache) = &self.cache {
            if let Some(hit) = self.lookup(cache.as_ref(), query).await {
                return Ok(hit);
            }
        }

        let fresh = self.inner.rewrite(query).await?;

        if let Some(cache) = &self.cache {
            if let Err(e) = cache.put(query, &fresh.template).await {
                tracing::warn!(error = %e, "template cache insert failed");
            }
        }
        Ok(fresh)
    }

    fn name(&self) -> &'static str {
        self.inner.name()
    }
}

/// Offline rewriter: every whitespace-separated word is a keyword (first 12), AND.
#[derive(Debug, Clone, Default)]
pub struct StaticRewriter {
    filters: Filters,
}

impl StaticRewriter {
    pub fn new(filters: Filters) -> Self {
        Self { filters }
    }
}

#[async_trait]
impl QueryRewriter for StaticRewriter {
    async fn rewrite(&self, query: &str) -> Result<Rewritten, RewriteError> {
        let keywords: Vec<String> = query
            .split_whitespace()
            .take(MAX_KEYWORDS)
            .map(str::to_string)
            .collect();
        let q = ProviderNeutralQuery::new(keywords, BooleanOp::And, self.filters.clone())
            .map_err(|e| RewriteError::Validation(e.to_string()))?;
        Ok(Rewritten {
            template: q.to_canonical_json(),
            query: q,
        })
    }

    fn name(&self) -> &'static str {
        "local"
    }
}
