// tests/store_sqlite.rs
//
// SQLite repository contract: run allocation, batched rows, uniqueness, cache, filters.

use chrono::{Duration, Utc};
use serde_json::json;

use source_harvester::orchestrator::url_hash;
use source_harvester::store::{
    NewRun, ProcessedRow, RawRow, RunFilter, RunRepository, SqliteStore, StoreError,
};

async fn store() -> SqliteStore {
    SqliteStore::connect("sqlite::memory:").await.expect("in-memory sqlite")
}

fn new_run(query: &str) -> NewRun {
    NewRun {
        query: query.into(),
        rewritten_template: r#"{"keywords":["x"]}"#.into(),
        config: json!({ "options": { "lang": "en" } }),
        providers: vec!["serper".into(), "brave".into()],
    }
}

fn processed(url: &str, providers: &[&str]) -> ProcessedRow {
    ProcessedRow {
        url: url.into(),
        providers: providers.iter().map(|p| p.to_string()).collect(),
        confidence: providers.len() as u32,
        dedupe_hash: url_hash(url),
    }
}

#[tokio::test]
async fn run_round_trips_with_rows() {
    let s = store().await;
    let id = s.allocate_run(new_run("rust jobs")).await.expect("allocate");

    let raw = vec![
        RawRow {
            provider: "serper".into(),
            url: "https://a".into(),
            rank: 1,
            meta: json!({ "queryUsed": "rust jobs" }),
        },
        RawRow {
            provider: "brave".into(),
            url: "https://a".into(),
            rank: 1,
            meta: json!({ "queryUsed": "rust jobs" }),
        },
    ];
    s.insert_raw_rows(id, &raw).await.expect("raw insert");
    s.insert_processed_rows(id, &[processed("https://a", &["brave", "serper"])])
        .await
        .expect("processed insert");

    let got = s.get_run(id).await.expect("get").expect("exists");
    assert_eq!(got.run.query, "rust jobs");
    assert_eq!(got.run.providers_used, vec!["serper", "brave"]);
    assert_eq!(got.run.config["options"]["lang"], "en");
    assert_eq!(got.processed.len(), 1);
    assert_eq!(got.processed[0].confidence, 2);
    assert_eq!(s.raw_rows(id).await.expect("raw"), raw);
}

#[tokio::test]
async fn ids_are_distinct() {
    let s = store().await;
    let a = s.allocate_run(new_run("a")).await.expect("a");
    let b = s.allocate_run(new_run("b")).await.expect("b");
    assert_ne!(a, b);
}

#[tokio::test]
async fn missing_run_reads_as_none() {
    let s = store().await;
    assert!(s.get_run(999).await.expect("get").is_none());
}

#[tokio::test]
async fn rows_for_unknown_run_are_rejected() {
    let s = store().await;
    let err = s.insert_raw_rows(42, &[]).await.unwrap_err();
    assert!(matches!(err, StoreError::UnknownRun(42)));
}

#[tokio::test]
async fn duplicate_hash_in_a_run_rolls_back_the_batch() {
    let s = store().await;
    let id = s.allocate_run(new_run("dup")).await.expect("allocate");

    let err = s
        .insert_processed_rows(
            id,
            &[
                processed("https://x", &["serper"]),
                processed("https://y", &["serper"]),
                processed("https://x", &["brave"]),
            ],
        )
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Duplicate { .. }));

    let got = s.get_run(id).await.expect("get").expect("exists");
    assert!(got.processed.is_empty(), "batch must not be partially kept");
}

#[tokio::test]
async fn same_hash_in_different_runs_is_fine() {
    let s = store().await;
    let a = s.allocate_run(new_run("a")).await.expect("a");
    let b = s.allocate_run(new_run("b")).await.expect("b");
    let row = processed("https://same", &["google"]);
    s.insert_processed_rows(a, &[row.clone()]).await.expect("a rows");
    s.insert_processed_rows(b, &[row]).await.expect("b rows");
}

#[tokio::test]
async fn template_cache_keeps_first_write() {
    let s = store().await;
    assert_eq!(s.get_cached_template("q").await.expect("get"), None);
    s.insert_cached_template("q", "first").await.expect("put");
    s.insert_cached_template("q", "second").await.expect("second put is ignored");
    assert_eq!(s.get_cached_template("q").await.expect("get").as_deref(), Some("first"));
}

#[tokio::test]
async fn list_filters_by_query_and_time() {
    let s = store().await;
    s.allocate_run(new_run("alpha")).await.expect("alpha");
    s.allocate_run(new_run("beta")).await.expect("beta");
    s.allocate_run(new_run("alpha")).await.expect("alpha again");

    let all = s.list_runs(&RunFilter::default()).await.expect("list");
    assert_eq!(all.len(), 3);

    let alpha = s
        .list_runs(&RunFilter {
            query: Some("alpha".into()),
            ..RunFilter::default()
        })
        .await
        .expect("list alpha");
    assert_eq!(alpha.len(), 2);

    let future = s
        .list_runs(&RunFilter {
            from: Some(Utc::now() + Duration::hours(1)),
            ..RunFilter::default()
        })
        .await
        .expect("list future");
    assert!(future.is_empty());

    let window = s
        .list_runs(&RunFilter {
            from: Some(Utc::now() - Duration::hours(1)),
            to: Some(Utc::now() + Duration::hours(1)),
            ..RunFilter::default()
        })
        .await
        .expect("list window");
    assert_eq!(window.len(), 3);
}

#[tokio::test]
async fn file_database_survives_reconnect() {
    let dir = tempfile::tempdir().expect("tempdir");
    let url = format!("sqlite://{}", dir.path().join("runs.db").display());

    let id = {
        let s = SqliteStore::connect(&url).await.expect("open");
        s.allocate_run(new_run("persisted")).await.expect("allocate")
    };

    let s = SqliteStore::connect(&url).await.expect("reopen");
    let got = s.get_run(id).await.expect("get").expect("still there");
    assert_eq!(got.run.query, "persisted");
}
