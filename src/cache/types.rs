//! Cache types

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Aggregate counts attached to the first page of a fetch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    /// Number of rows the query matched.
    pub total: usize,
    /// Matched rows satisfying each registered metadata predicate.
    pub counts: BTreeMap<String, usize>,
}

/// Statistics about a cache instance
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub entries: usize,
    pub query_plans: usize,
    pub plan_hits: u64,
    pub plan_rebuilds: u64,
    pub plans_evicted: u64,
    pub notifications: u32,
}

impl CacheStats {
    /// Fraction of fetches served by an existing plan (0.0 to 1.0).
    pub fn plan_hit_rate(&self) -> f64 {
        let total = self.plan_hits + self.plan_rebuilds;
        if total == 0 {
            0.0
        } else {
            self.plan_hits as f64 / total as f64
        }
    }
}
