// src/query/schema.rs
//! Provider-neutral query model and its validation rules.

use serde::{Deserialize, Serialize};

use crate::query::placeholders::is_valid_date_or_placeholder;

pub const MAX_KEYWORDS: usize = 12;
pub const MAX_SITES: usize = 20;
pub const MAX_RESULTS_CAP: u32 = 100;
pub const DEFAULT_MAX_RESULTS: u32 = 50;

fn default_max_results() -> u32 {
    DEFAULT_MAX_RESULTS
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueryError {
    #[error("malformed query: {0}")]
    Malformed(String),
    #[error("keywords must be a non-empty list")]
    EmptyKeywords,
    #[error("keywords cannot exceed 12 entries (got {0})")]
    TooManyKeywords(usize),
    #[error("sites cannot exceed 20 entries (got {0})")]
    TooManySites(usize),
    #[error("max_results must be within 1..=100 (got {0})")]
    MaxResultsOutOfRange(u32),
    #[error("{field} must be ISO YYYY-MM-DD or an allowed placeholder (got {value:?})")]
    InvalidDate { field: &'static str, value: String },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum BooleanOp {
    #[default]
    #[serde(rename = "AND")]
    And,
    #[serde(rename = "OR")]
    Or,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Filters {
    #[serde(default)]
    pub sites: Vec<String>,
    #[serde(default)]
    pub date_after: Option<String>,
    #[serde(default)]
    pub date_before: Option<String>,
    #[serde(default)]
    pub lang: Option<String>,
    #[serde(default)]
    pub geo: Option<String>,
    #[serde(default = "default_max_results")]
    pub max_results: u32,
}

impl Default for Filters {
    fn default() -> Self {
        Self {
            sites: Vec::new(),
            date_after: None,
            date_before: None,
            lang: None,
            geo: None,
            max_results: DEFAULT_MAX_RESULTS,
        }
    }
}

/// Canonical structured search intent, independent of any one provider's API.
///
/// The constructors ([`ProviderNeutralQuery::new`], [`ProviderNeutralQuery::from_json`],
/// [`ProviderNeutralQuery::from_value`] and [`ProviderNeutralQuery::with_overrides`]) run
/// [`ProviderNeutralQuery::validate`]. Fields are public, so a value assembled by hand
/// is unchecked until `validate` is called on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderNeutralQuery {
    pub keywords: Vec<String>,
    #[serde(default)]
    pub boolean: BooleanOp,
    #[serde(default)]
    pub filters: Filters,
}

impl ProviderNeutralQuery {
    pub fn new(
        keywords: Vec<String>,
        boolean: BooleanOp,
        filters: Filters,
    ) -> Result<Self, QueryError> {
        let q = Self {
            keywords,
            boolean,
            filters,
        };
        q.validate()?;
        Ok(q)
    }

    pub fn from_json(s: &str) -> Result<Self, QueryError> {
        let q: Self = serde_json::from_str(s).map_err(|e| QueryError::Malformed(e.to_string()))?;
        q.validate()?;
        Ok(q)
    }

    pub fn from_value(v: serde_json::Value) -> Result<Self, QueryError> {
        let q: Self = serde_json::from_value(v).map_err(|e| QueryError::Malformed(e.to_string()))?;
        q.validate()?;
        Ok(q)
    }

    pub fn validate(&self) -> Result<(), QueryError> {
        if self.keywords.is_empty() {
            return Err(QueryError::EmptyKeywords);
        }
        if self.keywords.len() > MAX_KEYWORDS {
            return Err(QueryError::TooManyKeywords(self.keywords.len()));
        }
        let f = &self.filters;
        if f.sites.len() > MAX_SITES {
            return Err(QueryError::TooManySites(f.sites.len()));
        }
        if f.max_results == 0 || f.max_results > MAX_RESULTS_CAP {
            return Err(QueryError::MaxResultsOutOfRange(f.max_results));
        }
        for (field, value) in [("date_after", &f.date_after), ("date_before", &f.date_before)] {
            if let Some(v) = value {
                if !is_valid_date_or_placeholder(v) {
                    return Err(QueryError::InvalidDate {
                        field,
                        value: v.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Copy with request-level overrides applied; the copy is re-validated.
    pub fn with_overrides(
        &self,
        lang: Option<&str>,
        geo: Option<&str>,
        max_results: Option<u32>,
    ) -> Result<Self, QueryError> {
        let mut next = self.clone();
        if let Some(l) = lang {
            next.filters.lang = Some(l.to_string());
        }
        if let Some(g) = geo {
            next.filters.geo = Some(g.to_string());
        }
        if let Some(m) = max_results {
            next.filters.max_results = m;
        }
        next.validate()?;
        Ok(next)
    }

    /// Compact JSON form, used as the cached rewrite template.
    pub fn to_canonical_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}
