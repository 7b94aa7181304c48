// tests/placeholders.rs
//
// Relative-date placeholder resolution against a fixed reference date.

use chrono::NaiveDate;

use source_harvester::query::placeholders::{expand, offset_days, resolve};
use source_harvester::query::PlaceholderError;

fn jan15() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 1, 15).expect("valid date")
}

#[test]
fn days_ago_ten_from_mid_january() {
    assert_eq!(resolve("{{days_ago:10}}", jan15()).unwrap(), "2025-01-05");
}

#[test]
fn days_ago_zero_is_today() {
    let r = jan15();
    assert_eq!(resolve("{{days_ago:0}}", r).unwrap(), resolve("{{today}}", r).unwrap());
}

#[test]
fn days_ago_crosses_year_boundary() {
    assert_eq!(resolve("{{days_ago:15}}", jan15()).unwrap(), "2024-12-31");
}

#[test]
fn unknown_family_is_rejected() {
    assert_eq!(
        resolve("{{tomorrow}}", jan15()),
        Err(PlaceholderError::InvalidPlaceholder("{{tomorrow}}".into()))
    );
    assert!(expand("{{tomorrow}}", jan15()).is_err());
}

#[test]
fn expansion_is_idempotent_on_dates() {
    let once = expand("{{yesterday}}", jan15()).unwrap();
    assert_eq!(once, "2025-01-14");
    assert_eq!(expand(&once, jan15()).unwrap(), once);
}

#[test]
fn literal_values_pass_through_unchanged() {
    assert_eq!(expand("2024-06-01", jan15()).unwrap(), "2024-06-01");
    assert_eq!(expand("whatever", jan15()).unwrap(), "whatever");
}

#[test]
fn whitespace_inside_braces_is_not_a_placeholder() {
    assert_eq!(offset_days("{{ today }}"), None);
    assert!(resolve("{{ today }}", jan15()).is_err());
}
