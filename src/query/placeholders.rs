// src/query/placeholders.rs
//! Relative-date placeholders: `{{today}}`, `{{yesterday}}` and `{{days_ago:N}}`.
//!
//! Tokens are matched against the whole value, never as substrings. Arithmetic is
//! plain calendar-day arithmetic on [`NaiveDate`], no timezone component.

use chrono::{Days, Local, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;

static DATE_PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\{\{(today|yesterday|days_ago:(\d+))\}\}$").unwrap());

static ISO_DATE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}$").unwrap());

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlaceholderError {
    #[error("unknown or invalid placeholder: {0}")]
    InvalidPlaceholder(String),
}

/// Current local calendar date, used when no reference date is injected.
pub fn today() -> NaiveDate {
    Local::now().date_naive()
}

/// Resolve a single placeholder token to an ISO `YYYY-MM-DD` date.
pub fn resolve(token: &str, reference: NaiveDate) -> Result<String, PlaceholderError> {
    let days = offset_days(token).ok_or_else(|| invalid(token))?;
    reference
        .checked_sub_days(Days::new(days))
        .map(|d| d.format("%Y-%m-%d").to_string())
        .ok_or_else(|| invalid(token))
}

/// Expand `value` if it is a placeholder; anything not wrapped in `{{ }}` is returned unchanged.
///
/// A value wrapped in `{{ }}` that is not one of the recognised families is an error.
pub fn expand(value: &str, reference: NaiveDate) -> Result<String, PlaceholderError> {
    if DATE_PLACEHOLDER.is_match(value) {
        return resolve(value, reference);
    }
    if value.starts_with("{{") && value.ends_with("}}") {
        return Err(invalid(value));
    }
    Ok(value.to_string())
}

/// Number of days a recognised placeholder reaches back from the reference date.
///
/// `{{today}}` is 0, `{{yesterday}}` is 1, `{{days_ago:N}}` is N. Returns `None` for
/// anything else, including absolute dates.
pub fn offset_days(token: &str) -> Option<u64> {
    let caps = DATE_PLACEHOLDER.captures(token)?;
    match caps.get(1)?.as_str() {
        "today" => Some(0),
        "yesterday" => Some(1),
        _ => caps.get(2)?.as_str().parse::<u64>().ok(),
    }
}

pub fn is_allowed_placeholder(value: &str) -> bool {
    offset_days(value).is_some()
}

/// `YYYY-MM-DD` that is also a real calendar date.
pub fn is_iso_date(value: &str) -> bool {
    ISO_DATE.is_match(value) && NaiveDate::parse_from_str(value, "%Y-%m-%d").is_ok()
}

pub fn is_valid_date_or_placeholder(value: &str) -> bool {
    is_iso_date(value) || is_allowed_placeholder(value)
}

fn invalid(token: &str) -> PlaceholderError {
    PlaceholderError::InvalidPlaceholder(token.to_string())
}
