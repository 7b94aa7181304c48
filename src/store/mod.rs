// src/store/mod.rs
//! Run persistence: one run row, its raw provider rows, its merged rows, and the
//! natural-language → template cache.

pub mod memory;
pub mod sqlite;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

pub type RunId = i64;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("json column error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("processed row already stored for run {run_id} (hash {dedupe_hash})")]
    Duplicate { run_id: RunId, dedupe_hash: String },
    #[error("unknown run {0}")]
    UnknownRun(RunId),
}

/// Everything recorded when a run is allocated, before any provider is called.
#[derive(Debug, Clone, PartialEq)]
pub struct NewRun {
    pub query: String,
    pub rewritten_template: String,
    pub config: serde_json::Value,
    pub providers: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RawRow {
    pub provider: String,
    pub url: String,
    /// 1-based position in the provider's own ranking.
    pub rank: u32,
    pub meta: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessedRow {
    pub url: String,
    pub providers: Vec<String>,
    pub confidence: u32,
    pub dedupe_hash: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunRecord {
    pub id: RunId,
    pub query: String,
    pub rewritten_template: String,
    pub run_timestamp: DateTime<Utc>,
    pub config: serde_json::Value,
    pub providers_used: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunWithResults {
    pub run: RunRecord,
    pub processed: Vec<ProcessedRow>,
}

/// `list_runs` filter. Every set field must match.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunFilter {
    pub query: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl RunFilter {
    pub fn matches(&self, run: &RunRecord) -> bool {
        self.query.as_deref().map_or(true, |q| run.query == q)
            && self.from.map_or(true, |from| run.run_timestamp >= from)
            && self.to.map_or(true, |to| run.run_timestamp <= to)
    }
}

#[async_trait]
pub trait RunRepository: Send + Sync {
    async fn allocate_run(&self, run: NewRun) -> Result<RunId, StoreError>;

    /// Insert all raw rows for a run in one batch.
    async fn insert_raw_rows(&self, run_id: RunId, rows: &[RawRow]) -> Result<(), StoreError>;

    /// Insert all merged rows for a run in one batch. A repeated `(run, dedupe_hash)`
    /// fails with [`StoreError::Duplicate`] and nothing from the batch is kept.
    async fn insert_processed_rows(&self, run_id: RunId, rows: &[ProcessedRow]) -> Result<(), StoreError>;

    async fn get_run(&self, run_id: RunId) -> Result<Option<RunWithResults>, StoreError>;

    async fn raw_rows(&self, run_id: RunId) -> Result<Vec<RawRow>, StoreError>;

    async fn list_runs(&self, filter: &RunFilter) -> Result<Vec<RunRecord>, StoreError>;

    async fn get_cached_template(&self, query: &str) -> Result<Option<String>, StoreError>;

    /// Idempotent: a second insert for the same query is ignored.
    async fn insert_cached_template(&self, query: &str, template: &str) -> Result<(), StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;

    fn backend(&self) -> &'static str;
}

/// `"memory"` selects the in-process store, anything else is a SQLite URL.
pub async fn connect(url: &str) -> Result<Arc<dyn RunRepository>, StoreError> {
    if url.trim().eq_ignore_ascii_case("memory") {
        return Ok(Arc::new(MemoryStore::new()));
    }
    let store = SqliteStore::connect(url).await?;
    Ok(Arc::new(store))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn run_at(query: &str, hour: u32) -> RunRecord {
        RunRecord {
            id: 1,
            query: query.into(),
            rewritten_template: "{}".into(),
            run_timestamp: Utc.with_ymd_and_hms(2025, 1, 15, hour, 0, 0).unwrap(),
            config: serde_json::json!({}),
            providers_used: vec![],
        }
    }

    #[test]
    fn empty_filter_matches_everything() {
        assert!(RunFilter::default().matches(&run_at("x", 1)));
    }

    #[test]
    fn filter_bounds_are_inclusive() {
        let at = Utc.with_ymd_and_hms(2025, 1, 15, 10, 0, 0).unwrap();
        let f = RunFilter {
            query: Some("rust".into()),
            from: Some(at),
            to: Some(at),
        };
        assert!(f.matches(&run_at("rust", 10)));
        assert!(!f.matches(&run_at("rust", 11)));
        assert!(!f.matches(&run_at("go", 10)));
    }
}
