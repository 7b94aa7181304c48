// src/providers/freshness.rs
//! Coarse recency hints for providers that only support windowed freshness.
//!
//! Lossy by nature: only relative placeholders in `date_after` map to a hint, absolute
//! dates and windows wider than the largest breakpoint map to nothing.

use serde::{Deserialize, Serialize};

use crate::query::placeholders;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FreshnessRule {
    pub max_days: u64,
    pub hint: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FreshnessPolicy {
    rules: Vec<FreshnessRule>,
}

impl Default for FreshnessPolicy {
    fn default() -> Self {
        Self::new(vec![
            FreshnessRule {
                max_days: 1,
                hint: "pd".into(),
            },
            FreshnessRule {
                max_days: 7,
                hint: "pw".into(),
            },
            FreshnessRule {
                max_days: 30,
                hint: "pm".into(),
            },
        ])
    }
}

impl FreshnessPolicy {
    pub fn new(mut rules: Vec<FreshnessRule>) -> Self {
        rules.sort_by_key(|r| r.max_days);
        Self { rules }
    }

    pub fn rules(&self) -> &[FreshnessRule] {
        &self.rules
    }

    /// Smallest window that still covers the placeholder's reach.
    pub fn hint_for(&self, date_after: Option<&str>) -> Option<&str> {
        let days = placeholders::offset_days(date_after?)?;
        self.rules
            .iter()
            .find(|r| days <= r.max_days)
            .map(|r| r.hint.as_str())
    }
}
