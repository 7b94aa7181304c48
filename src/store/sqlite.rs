// src/store/sqlite.rs
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;

use super::{
    NewRun, ProcessedRow, RawRow, RunFilter, RunId, RunRecord, RunRepository, RunWithResults,
    StoreError,
};

pub struct SqliteStore {
    pool: SqlitePool,
}

type RunTuple = (i64, String, String, String, String, String);

impl SqliteStore {
    /// Open (creating if needed) and migrate. `sqlite::memory:` gets a single pinned
    /// connection, otherwise every pooled connection would see its own empty database.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let opts = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let in_memory = url.contains(":memory:") || url.contains("mode=memory");

        let pool = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(opts)
                .await?
        } else {
            SqlitePoolOptions::new()
                .max_connections(5)
                .connect_with(opts)
                .await?
        };

        let store = Self { pool };
        store.migrate().await?;
        tracing::info!(url, "sqlite store ready");
        Ok(store)
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS queries (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                original_query TEXT NOT NULL UNIQUE,
                rewritten_template TEXT NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS search_runs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                query TEXT NOT NULL,
                rewritten_template TEXT NOT NULL,
                run_timestamp TEXT NOT NULL,
                config TEXT NOT NULL,
                providers_used TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS search_results_raw (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                run_id INTEGER NOT NULL REFERENCES search_runs(id) ON DELETE CASCADE,
                provider TEXT NOT NULL,
                url TEXT NOT NULL,
                rank INTEGER,
                meta TEXT,
                inserted_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS ix_raw_run_provider ON search_results_raw(run_id, provider)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS search_results_processed (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                run_id INTEGER NOT NULL REFERENCES search_runs(id) ON DELETE CASCADE,
                url TEXT NOT NULL,
                providers TEXT NOT NULL,
                confidence INTEGER NOT NULL,
                dedupe_hash TEXT NOT NULL,
                inserted_at TEXT NOT NULL,
                UNIQUE(run_id, dedupe_hash)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn run_exists(&self, run_id: RunId) -> Result<bool, StoreError> {
        let found: Option<(i64,)> = sqlx::query_as("SELECT id FROM search_runs WHERE id = ?")
            .bind(run_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(found.is_some())
    }
}

/// Fixed-width UTC so lexical order in SQLite equals chronological order.
fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|e| {
            tracing::warn!(raw, error = %e, "unparseable run timestamp");
            DateTime::<Utc>::default()
        })
}

fn run_from_row(row: RunTuple) -> Result<RunRecord, StoreError> {
    let (id, query, rewritten_template, ts, config, providers) = row;
    Ok(RunRecord {
        id,
        query,
        rewritten_template,
        run_timestamp: parse_timestamp(&ts),
        config: serde_json::from_str(&config)?,
        providers_used: serde_json::from_str(&providers)?,
    })
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.is_unique_violation())
}

#[async_trait]
impl RunRepository for SqliteStore {
    async fn allocate_run(&self, run: NewRun) -> Result<RunId, StoreError> {
        let config = serde_json::to_string(&run.config)?;
        let providers = serde_json::to_string(&run.providers)?;
        let res = sqlx::query(
            "INSERT INTO search_runs (query, rewritten_template, run_timestamp, config, providers_used) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&run.query)
        .bind(&run.rewritten_template)
        .bind(timestamp(Utc::now()))
        .bind(config)
        .bind(providers)
        .execute(&self.pool)
        .await?;
        Ok(res.last_insert_rowid())
    }

    async fn insert_raw_rows(&self, run_id: RunId, rows: &[RawRow]) -> Result<(), StoreError> {
        if !self.run_exists(run_id).await? {
            return Err(StoreError::UnknownRun(run_id));
        }
        let now = timestamp(Utc::now());
        let mut tx = self.pool.begin().await?;
        for row in rows {
            sqlx::query(
                "INSERT INTO search_results_raw (run_id, provider, url, rank, meta, inserted_at) \
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(run_id)
            .bind(&row.provider)
            .bind(&row.url)
            .bind(i64::from(row.rank))
            .bind(serde_json::to_string(&row.meta)?)
            .bind(&now)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn insert_processed_rows(&self, run_id: RunId, rows: &[ProcessedRow]) -> Result<(), StoreError> {
        if !self.run_exists(run_id).await? {
            return Err(StoreError::UnknownRun(run_id));
        }
        let now = timestamp(Utc::now());
        let mut tx = self.pool.begin().await?;
        for row in rows {
            let res = sqlx::query(
                "INSERT INTO search_results_processed \
                 (run_id, url, providers, confidence, dedupe_hash, inserted_at) \
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(run_id)
            .bind(&row.url)
            .bind(serde_json::to_string(&row.providers)?)
            .bind(i64::from(row.confidence))
            .bind(&row.dedupe_hash)
            .bind(&now)
            .execute(&mut *tx)
            .await;

            // dropping `tx` on any early return rolls the batch back
            match res {
                Ok(_) => {}
                Err(e) if is_unique_violation(&e) => {
                    return Err(StoreError::Duplicate {
                        run_id,
                        dedupe_hash: row.dedupe_hash.clone(),
                    });
                }
                Err(e) => return Err(e.into()),
            }
        }
        tx.commit().await?;
        Ok(())
    }

    async fn get_run(&self, run_id: RunId) -> Result<Option<RunWithResults>, StoreError> {
        let row: Option<RunTuple> = sqlx::query_as(
            "SELECT id, query, rewritten_template, run_timestamp, config, providers_used \
             FROM search_runs WHERE id = ?",
        )
        .bind(run_id)
        .fetch_optional(&self.pool)
        .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let run = run_from_row(row)?;

        let rows: Vec<(String, String, i64, String)> = sqlx::query_as(
            "SELECT url, providers, confidence, dedupe_hash FROM search_results_processed \
             WHERE run_id = ? ORDER BY id",
        )
        .bind(run_id)
        .fetch_all(&self.pool)
        .await?;

        let processed = rows
            .into_iter()
            .map(|(url, providers, confidence, dedupe_hash)| {
                Ok(ProcessedRow {
                    url,
                    providers: serde_json::from_str(&providers)?,
                    confidence: u32::try_from(confidence).unwrap_or(0),
                    dedupe_hash,
                })
            })
            .collect::<Result<Vec<_>, StoreError>>()?;

        Ok(Some(RunWithResults { run, processed }))
    }

    async fn raw_rows(&self, run_id: RunId) -> Result<Vec<RawRow>, StoreError> {
        let rows: Vec<(String, String, Option<i64>, Option<String>)> = sqlx::query_as(
            "SELECT provider, url, rank, meta FROM search_results_raw WHERE run_id = ? ORDER BY id",
        )
        .bind(run_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(provider, url, rank, meta)| {
                Ok(RawRow {
                    provider,
                    url,
                    rank: rank.and_then(|r| u32::try_from(r).ok()).unwrap_or(0),
                    meta: match meta {
                        Some(m) => serde_json::from_str(&m)?,
                        None => serde_json::Value::Null,
                    },
                })
            })
            .collect()
    }

    async fn list_runs(&self, filter: &RunFilter) -> Result<Vec<RunRecord>, StoreError> {
        let rows: Vec<RunTuple> = sqlx::query_as(
            "SELECT id, query, rewritten_template, run_timestamp, config, providers_used \
             FROM search_runs \
             WHERE (?1 IS NULL OR query = ?1) \
               AND (?2 IS NULL OR run_timestamp >= ?2) \
               AND (?3 IS NULL OR run_timestamp <= ?3) \
             ORDER BY id",
        )
        .bind(filter.query.as_deref())
        .bind(filter.from.map(timestamp))
        .bind(filter.to.map(timestamp))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(run_from_row).collect()
    }

    async fn get_cached_template(&self, query: &str) -> Result<Option<String>, StoreError> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT rewritten_template FROM queries WHERE original_query = ?")
                .bind(query)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(t,)| t))
    }

    async fn insert_cached_template(&self, query: &str, template: &str) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT OR IGNORE INTO queries (original_query, rewritten_template, created_at) VALUES (?, ?, ?)",
        )
        .bind(query)
        .bind(template)
        .bind(timestamp(Utc::now()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "sqlite"
    }
}
