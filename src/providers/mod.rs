// src/providers/mod.rs
//! Search provider adapters and the registry the orchestrator selects from.

pub mod brave;
pub mod freshness;
pub mod google;
pub mod serper;
pub mod types;

use std::sync::Arc;

pub use brave::BraveProvider;
pub use freshness::{FreshnessPolicy, FreshnessRule};
pub use google::GoogleCseProvider;
pub use serper::SerperProvider;
pub use types::{AdapterError, ProviderKind, ProviderResult, SearchContext, SearchProvider};

use crate::http::RetryingClient;

pub const ENV_SERPER_KEY: &str = "SH_SERPER_KEY";
pub const ENV_GOOGLE_API_KEY: &str = "SH_GOOGLE_API_KEY";
pub const ENV_GOOGLE_CSE_ID: &str = "SH_GOOGLE_CSE_ID";
pub const ENV_BRAVE_KEY: &str = "SH_BRAVE_KEY";

/// Env variables a provider needs before it gets an adapter.
pub fn required_keys(kind: ProviderKind) -> &'static [&'static str] {
    match kind {
        ProviderKind::Serper => &[ENV_SERPER_KEY],
        ProviderKind::Google => &[ENV_GOOGLE_API_KEY, ENV_GOOGLE_CSE_ID],
        ProviderKind::Brave => &[ENV_BRAVE_KEY],
    }
}

/// Live adapters keyed by provider name, in registration order.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    entries: Vec<(String, Arc<dyn SearchProvider>)>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter under its own name, replacing any previous one.
    pub fn insert(&mut self, provider: Arc<dyn SearchProvider>) {
        let name = provider.name().to_string();
        self.insert_named(name, provider);
    }

    /// Register under an explicit name (tests use this to alias mock adapters).
    pub fn insert_named(&mut self, name: impl Into<String>, provider: Arc<dyn SearchProvider>) {
        let name = name.into();
        if let Some(slot) = self.entries.iter_mut().find(|(n, _)| *n == name) {
            slot.1 = provider;
        } else {
            self.entries.push((name, provider));
        }
    }

    pub fn with(mut self, provider: Arc<dyn SearchProvider>) -> Self {
        self.insert(provider);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn SearchProvider>> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, p)| Arc::clone(p))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|(n, _)| n == name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|(n, _)| n.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.names())
            .finish()
    }
}

/// Build one adapter per provider whose keys resolve through `lookup`.
/// Providers without keys are left out, which the orchestrator treats as "not configured".
pub fn build_registry<F>(lookup: F, client: &RetryingClient, freshness: &FreshnessPolicy) -> ProviderRegistry
where
    F: Fn(&str) -> Option<String>,
{
    let key = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
    let mut registry = ProviderRegistry::new();

    if let Some(k) = key(ENV_SERPER_KEY) {
        registry.insert(Arc::new(SerperProvider::new(k, client.clone())));
    }
    if let (Some(k), Some(cx)) = (key(ENV_GOOGLE_API_KEY), key(ENV_GOOGLE_CSE_ID)) {
        registry.insert(Arc::new(GoogleCseProvider::new(k, cx, client.clone())));
    }
    if let Some(k) = key(ENV_BRAVE_KEY) {
        registry.insert(Arc::new(
            BraveProvider::new(k, client.clone()).with_freshness(freshness.clone()),
        ));
    }

    tracing::info!(providers = ?registry.names(), "provider registry built");
    registry
}

pub fn build_registry_from_env(client: &RetryingClient, freshness: &FreshnessPolicy) -> ProviderRegistry {
    build_registry(|k| std::env::var(k).ok(), client, freshness)
}
