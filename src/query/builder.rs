// src/query/builder.rs
//! Serialises a [`ProviderNeutralQuery`] into the single query string every provider receives.

use chrono::NaiveDate;

use crate::query::placeholders;
use crate::query::schema::{BooleanOp, ProviderNeutralQuery};

/// Build the provider query string using today's date for placeholder expansion.
pub fn build_query(query: &ProviderNeutralQuery) -> String {
    build_query_at(query, placeholders::today())
}

/// Build the provider query string against an explicit reference date.
///
/// Clause order is fixed: keywords, `site:` tokens, `after:`, `before:`.
/// A date whose placeholder cannot be expanded is dropped from the output rather
/// than failing the build; dates are validated when the query is constructed.
pub fn build_query_at(query: &ProviderNeutralQuery, reference: NaiveDate) -> String {
    let core = match query.boolean {
        BooleanOp::Or => query.keywords.join(" OR "),
        BooleanOp::And => query.keywords.join(" "),
    };

    let mut parts: Vec<String> = vec![core];
    parts.extend(query.filters.sites.iter().map(|s| format!("site:{s}")));

    if let Some(after) = date_clause("after", query.filters.date_after.as_deref(), reference) {
        parts.push(after);
    }
    if let Some(before) = date_clause("before", query.filters.date_before.as_deref(), reference) {
        parts.push(before);
    }

    parts
        .into_iter()
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn date_clause(prefix: &str, value: Option<&str>, reference: NaiveDate) -> Option<String> {
    let raw = value.filter(|v| !v.is_empty())?;
    match placeholders::expand(raw, reference) {
        Ok(date) => Some(format!("{prefix}:{date}")),
        Err(e) => {
            tracing::debug!(error = %e, clause = prefix, "dropping date clause");
            None
        }
    }
}
