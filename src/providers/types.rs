// src/providers/types.rs
use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::http::TransportError;
use crate::query::{placeholders, ProviderNeutralQuery};

/// The search APIs this service knows how to call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Serper,
    Google,
    Brave,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 3] = [ProviderKind::Serper, ProviderKind::Google, ProviderKind::Brave];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Serper => "serper",
            ProviderKind::Google => "google",
            ProviderKind::Brave => "brave",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "serper" => Ok(ProviderKind::Serper),
            "google" => Ok(ProviderKind::Google),
            "brave" => Ok(ProviderKind::Brave),
            other => Err(format!("unknown provider: {other}")),
        }
    }
}

/// One adapter call's normalised output, in provider rank order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderResult {
    pub provider: String,
    pub query_used: String,
    pub urls: Vec<String>,
    pub meta: serde_json::Value,
}

#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    #[error("{provider}: {source}")]
    Transport {
        provider: &'static str,
        #[source]
        source: TransportError,
    },
    #[error("{provider}: upstream returned HTTP {status}")]
    Status { provider: &'static str, status: u16 },
    #[error("{provider}: malformed response: {message}")]
    Decode {
        provider: &'static str,
        message: String,
    },
}

/// Per-call context handed down by the orchestrator.
#[derive(Debug, Clone)]
pub struct SearchContext {
    /// Sent as the correlation header so a fan-out can be tied to one run.
    pub correlation_id: Option<String>,
    /// Anchor for relative-date placeholders.
    pub reference_date: NaiveDate,
}

impl SearchContext {
    pub fn new(correlation_id: Option<String>, reference_date: NaiveDate) -> Self {
        Self {
            correlation_id,
            reference_date,
        }
    }
}

impl Default for SearchContext {
    fn default() -> Self {
        Self {
            correlation_id: None,
            reference_date: placeholders::today(),
        }
    }
}

/// Capability shared by every provider: turn a neutral query into ranked URLs.
///
/// Implementations send exactly one logical request through the retrying transport
/// and either return a complete [`ProviderResult`] or fail; no partial results.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn search(
        &self,
        query: &ProviderNeutralQuery,
        ctx: &SearchContext,
    ) -> Result<ProviderResult, AdapterError>;
}

/// Pull string links out of a JSON array of result objects, keeping order.
/// Entries whose link field is missing, null, or empty are skipped.
pub(crate) fn collect_links(items: &[serde_json::Value], field: &str) -> Vec<String> {
    items
        .iter()
        .filter_map(|item| item.get(field).and_then(serde_json::Value::as_str))
        .filter(|link| !link.is_empty())
        .map(str::to_string)
        .collect()
}

/// Shared post-processing for a provider HTTP response.
pub(crate) async fn read_json(
    provider: &'static str,
    resp: reqwest::Response,
) -> Result<serde_json::Value, AdapterError> {
    let status = resp.status();
    if !status.is_success() {
        return Err(AdapterError::Status {
            provider,
            status: status.as_u16(),
        });
    }
    resp.json::<serde_json::Value>()
        .await
        .map_err(|e| AdapterError::Decode {
            provider,
            message: e.to_string(),
        })
}

pub(crate) fn result_meta(query_used: &str, raw_count: usize) -> serde_json::Value {
    serde_json::json!({ "queryUsed": query_used, "raw_count": raw_count })
}
