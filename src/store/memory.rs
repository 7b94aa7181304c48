// src/store/memory.rs
//! In-process repository. Same contract as the SQLite store, nothing survives a restart.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;

use super::{
    NewRun, ProcessedRow, RawRow, RunFilter, RunId, RunRecord, RunRepository, RunWithResults,
    StoreError,
};

#[derive(Debug, Default)]
struct Tables {
    runs: Vec<RunRecord>,
    raw: HashMap<RunId, Vec<RawRow>>,
    processed: HashMap<RunId, Vec<ProcessedRow>>,
    templates: HashMap<String, String>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        // A panic mid-insert leaves whole rows or nothing, so the data is still usable.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl RunRepository for MemoryStore {
    async fn allocate_run(&self, run: NewRun) -> Result<RunId, StoreError> {
        let mut t = self.tables();
        let id = t.runs.len() as RunId + 1;
        t.runs.push(RunRecord {
            id,
            query: run.query,
            rewritten_template: run.rewritten_template,
            run_timestamp: Utc::now(),
            config: run.config,
            providers_used: run.providers,
        });
        Ok(id)
    }

    async fn insert_raw_rows(&self, run_id: RunId, rows: &[RawRow]) -> Result<(), StoreError> {
        let mut t = self.tables();
        if !t.runs.iter().any(|r| r.id == run_id) {
            return Err(StoreError::UnknownRun(run_id));
        }
        t.raw.entry(run_id).or_default().extend_from_slice(rows);
        Ok(())
    }

    async fn insert_processed_rows(&self, run_id: RunId, rows: &[ProcessedRow]) -> Result<(), StoreError> {
        let mut t = self.tables();
        if !t.runs.iter().any(|r| r.id == run_id) {
            return Err(StoreError::UnknownRun(run_id));
        }

        let existing = t.processed.get(&run_id);
        let mut seen: HashSet<&str> = existing
            .map(|v| v.iter().map(|r| r.dedupe_hash.as_str()).collect())
            .unwrap_or_default();
        for row in rows {
            if !seen.insert(row.dedupe_hash.as_str()) {
                return Err(StoreError::Duplicate {
                    run_id,
                    dedupe_hash: row.dedupe_hash.clone(),
                });
            }
        }

        t.processed.entry(run_id).or_default().extend_from_slice(rows);
        Ok(())
    }

    async fn get_run(&self, run_id: RunId) -> Result<Option<RunWithResults>, StoreError> {
        let t = self.tables();
        Ok(t.runs.iter().find(|r| r.id == run_id).map(|run| RunWithResults {
            run: run.clone(),
            processed: t.processed.get(&run_id).cloned().unwrap_or_default(),
        }))
    }

    async fn raw_rows(&self, run_id: RunId) -> Result<Vec<RawRow>, StoreError> {
        Ok(self.tables().raw.get(&run_id).cloned().unwrap_or_default())
    }

    async fn list_runs(&self, filter: &RunFilter) -> Result<Vec<RunRecord>, StoreError> {
        Ok(self
            .tables()
            .runs
            .iter()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect())
    }

    async fn get_cached_template(&self, query: &str) -> Result<Option<String>, StoreError> {
        Ok(self.tables().templates.get(query).cloned())
    }

    async fn insert_cached_template(&self, query: &str, template: &str) -> Result<(), StoreError> {
        self.tables()
            .templates
            .entry(query.to_string())
            .or_insert_with(|| template.to_string());
        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}
