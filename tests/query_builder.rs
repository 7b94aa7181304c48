// tests/query_builder.rs
//
// Query string construction and query validation bounds.

use chrono::NaiveDate;
use serde_json::json;

use source_harvester::query::{
    build_query_at, BooleanOp, Filters, ProviderNeutralQuery, QueryError,
};

fn jan15() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 1, 15).expect("valid date")
}

fn words(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("k{i}")).collect()
}

#[test]
fn keywords_come_before_site_tokens() {
    let q = ProviderNeutralQuery::from_value(json!({
        "keywords": ["openai", "api"],
        "boolean": "AND",
        "filters": { "sites": ["openai.com"] }
    }))
    .unwrap();
    let s = build_query_at(&q, jan15());
    let kw = s.find("openai api").expect("keyword clause present");
    let site = s.find("site:openai.com").expect("site clause present");
    assert!(kw < site, "keywords must precede site tokens: {s}");
}

#[test]
fn same_query_same_string() {
    let q = ProviderNeutralQuery::from_value(json!({
        "keywords": ["rust", "axum"],
        "boolean": "OR",
        "filters": { "sites": ["docs.rs"], "date_after": "{{days_ago:10}}" }
    }))
    .unwrap();
    let a = build_query_at(&q, jan15());
    let b = build_query_at(&q, jan15());
    assert_eq!(a, b);
    assert_eq!(a, "rust OR axum site:docs.rs after:2025-01-05");
}

#[test]
fn builder_drops_unknown_placeholder_clause() {
    // constructed directly: validation would refuse this value
    let q = ProviderNeutralQuery {
        keywords: vec!["news".into()],
        boolean: BooleanOp::And,
        filters: Filters {
            date_after: Some("{{tomorrow}}".into()),
            ..Filters::default()
        },
    };
    let s = build_query_at(&q, jan15());
    assert_eq!(s, "news");
    assert!(!s.contains("after:"));
}

#[test]
fn twelve_keywords_ok_thirteen_rejected() {
    assert!(ProviderNeutralQuery::new(words(12), BooleanOp::And, Filters::default()).is_ok());
    assert_eq!(
        ProviderNeutralQuery::new(words(13), BooleanOp::And, Filters::default()).unwrap_err(),
        QueryError::TooManyKeywords(13)
    );
}

#[test]
fn max_results_hundred_ok_hundred_one_rejected() {
    let at = |m: u32| Filters {
        max_results: m,
        ..Filters::default()
    };
    assert!(ProviderNeutralQuery::new(words(1), BooleanOp::And, at(100)).is_ok());
    assert_eq!(
        ProviderNeutralQuery::new(words(1), BooleanOp::And, at(101)).unwrap_err(),
        QueryError::MaxResultsOutOfRange(101)
    );
}

#[test]
fn twenty_one_sites_rejected() {
    let sites: Vec<String> = (0..21).map(|i| format!("s{i}.com")).collect();
    let err = ProviderNeutralQuery::new(
        words(1),
        BooleanOp::And,
        Filters {
            sites,
            ..Filters::default()
        },
    )
    .unwrap_err();
    assert_eq!(err, QueryError::TooManySites(21));
}

#[test]
fn validated_query_rejects_unknown_placeholder() {
    let err = ProviderNeutralQuery::from_value(json!({
        "keywords": ["x"],
        "filters": { "date_before": "{{tomorrow}}" }
    }))
    .unwrap_err();
    assert!(matches!(err, QueryError::InvalidDate { field: "date_before", .. }));
}
