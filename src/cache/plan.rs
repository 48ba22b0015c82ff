//! Query plans.
//!
//! A plan is the materialized, ordered key list for one query shape, built
//! against a generation stamp of the entry store. A plan whose stamp no
//! longer matches is rebuilt on the next fetch; a plan nobody fetched for
//! longer than the TTL is reclaimed by the cleaner.

use std::collections::{BTreeMap, HashMap};
use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use metrics::{counter, histogram};
use tracing::debug;

use super::compare::{compare_optional, compare_strings};
use super::model::FieldValue;
use super::query::Query;
use super::store::{EntryStore, Predicate};
use super::types::Metadata;

const METRIC_PLAN_HIT: &str = "dcache_plan_hit_total";
const METRIC_PLAN_REBUILD: &str = "dcache_plan_rebuild_total";
const METRIC_PLAN_EVICTED: &str = "dcache_plan_evicted_total";
const METRIC_PLAN_REBUILD_MS: &str = "dcache_plan_rebuild_ms";

enum PlanRows {
    /// Rows follow the store's insertion order, read live.
    InsertionOrder,
    Keys {
        keys: Vec<String>,
        metadata: BTreeMap<String, usize>,
    },
}

pub(crate) struct QueryPlan {
    rows: PlanRows,
    stamp: u64,
    last_used: AtomicU64,
}

impl QueryPlan {
    fn touch(&self, now: u64) {
        self.last_used.fetch_max(now, Ordering::Relaxed);
    }

    fn idle_for(&self, now: u64) -> Duration {
        Duration::from_nanos(now.saturating_sub(self.last_used.load(Ordering::Relaxed)))
    }

    pub(crate) fn len<T>(&self, store: &EntryStore<T>) -> usize {
        match &self.rows {
            PlanRows::InsertionOrder => store.len(),
            PlanRows::Keys { keys, .. } => keys.len(),
        }
    }

    /// Clone the rows in `[start, start + block_size)`; `block_size == 0` means the tail.
    pub(crate) fn slice<T: Clone>(
        &self,
        store: &EntryStore<T>,
        start: usize,
        block_size: usize,
    ) -> Vec<T> {
        let range = window(self.len(store), start, block_size);
        match &self.rows {
            PlanRows::InsertionOrder => store
                .ordered_entries()
                .skip(range.start)
                .take(range.len())
                .map(|(_, value)| value.clone())
                .collect(),
            PlanRows::Keys { keys, .. } => keys[range]
                .iter()
                .filter_map(|key| store.get(key).cloned())
                .collect(),
        }
    }

    pub(crate) fn metadata<T>(&self, store: &EntryStore<T>) -> Metadata {
        match &self.rows {
            PlanRows::InsertionOrder => Metadata {
                total: store.len(),
                counts: store.metadata_counts(),
            },
            PlanRows::Keys { keys, metadata } => Metadata {
                total: keys.len(),
                counts: metadata.clone(),
            },
        }
    }
}

/// Plans of one cache, keyed by query hash.
pub(crate) struct PlanCache {
    plans: HashMap<String, QueryPlan>,
    clock: Instant,
    hits: AtomicU64,
    rebuilds: u64,
    evicted: u64,
}

impl PlanCache {
    pub(crate) fn new() -> Self {
        Self {
            plans: HashMap::new(),
            clock: Instant::now(),
            hits: AtomicU64::new(0),
            rebuilds: 0,
            evicted: 0,
        }
    }

    fn now(&self) -> u64 {
        u64::try_from(self.clock.elapsed().as_nanos()).unwrap_or(u64::MAX)
    }

    /// The plan for `hash` if it was built against `stamp`. Marks it used.
    pub(crate) fn lookup(&self, hash: &str, stamp: u64) -> Option<&QueryPlan> {
        let plan = self.plans.get(hash).filter(|plan| plan.stamp == stamp)?;
        plan.touch(self.now());
        self.hits.fetch_add(1, Ordering::Relaxed);
        counter!(METRIC_PLAN_HIT).increment(1);
        Some(plan)
    }

    /// The fresh plan for `query`, rebuilding it if missing or stale.
    pub(crate) fn resolve<T, Q>(&mut self, store: &EntryStore<T>, query: &Q) -> &QueryPlan
    where
        Q: Query<T> + ?Sized,
    {
        let hash = query.hash_id();
        // Another writer may have rebuilt it while we waited for the lock.
        if self.lookup(&hash, store.stamp()).is_some() {
            return &self.plans[&hash];
        }
        self.rebuild(hash, store, query)
    }

    fn rebuild<T, Q>(&mut self, hash: String, store: &EntryStore<T>, query: &Q) -> &QueryPlan
    where
        Q: Query<T> + ?Sized,
    {
        let started = Instant::now();

        let rows = if !query.has_criteria() && query.sort_by().is_none() {
            PlanRows::InsertionOrder
        } else {
            let (keys, metadata) = scan(store.ordered_entries(), query, &store.predicates());
            PlanRows::Keys {
                keys,
                metadata: metadata.counts,
            }
        };

        let plan = QueryPlan {
            rows,
            stamp: store.stamp(),
            last_used: AtomicU64::new(self.now()),
        };
        let elapsed = started.elapsed();

        self.rebuilds += 1;
        counter!(METRIC_PLAN_REBUILD).increment(1);
        histogram!(METRIC_PLAN_REBUILD_MS).record(elapsed.as_secs_f64() * 1000.0);
        debug!(
            query = %hash,
            stamp = plan.stamp,
            rows = plan.len(store),
            elapsed_us = elapsed.as_micros() as u64,
            "Rebuilt query plan"
        );

        self.plans.entry(hash).insert_entry(plan).into_mut()
    }

    /// Drop plans idle for longer than `ttl`, returning how many were removed.
    pub(crate) fn reclaim(&mut self, ttl: Duration) -> usize {
        let now = self.now();
        let before = self.plans.len();
        self.plans.retain(|_, plan| plan.idle_for(now) <= ttl);
        let removed = before - self.plans.len();

        if removed > 0 {
            self.evicted += removed as u64;
            counter!(METRIC_PLAN_EVICTED).increment(removed as u64);
        }
        removed
    }

    /// Drop every plan.
    pub(crate) fn clear(&mut self) {
        self.plans.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.plans.len()
    }

    pub(crate) fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub(crate) fn rebuilds(&self) -> u64 {
        self.rebuilds
    }

    pub(crate) fn evicted(&self) -> u64 {
        self.evicted
    }
}

/// Evaluate `query` over values that are not held by a store.
///
/// Used when the cache passes through to storage: there is no stamp to
/// validate against, so nothing is kept.
pub(crate) fn detached_page<T, Q>(
    mut values: HashMap<String, T>,
    query: &Q,
    predicates: &[(String, Predicate<T>)],
    start: usize,
    block_size: usize,
) -> (Vec<T>, Metadata)
where
    Q: Query<T> + ?Sized,
{
    let (keys, metadata) = scan(values.iter(), query, predicates);
    let rows = keys[window(keys.len(), start, block_size)]
        .iter()
        .filter_map(|key| values.remove(key))
        .collect();
    (rows, metadata)
}

fn scan<'a, T, Q>(
    entries: impl Iterator<Item = (&'a String, &'a T)>,
    query: &Q,
    predicates: &[(String, Predicate<T>)],
) -> (Vec<String>, Metadata)
where
    T: 'a,
    Q: Query<T> + ?Sized,
{
    let mut counts: BTreeMap<String, usize> = predicates
        .iter()
        .map(|(name, _)| (name.clone(), 0))
        .collect();
    let sorted = query.sort_by().is_some();
    let mut matched: Vec<(&String, Option<FieldValue>)> = Vec::new();

    for (key, value) in entries {
        if !query.matches(value) {
            continue;
        }
        for (name, predicate) in predicates {
            if predicate(value)
                && let Some(count) = counts.get_mut(name)
            {
                *count += 1;
            }
        }
        let sort_value = if sorted { query.sort_value(value) } else { None };
        matched.push((key, sort_value));
    }

    if sorted {
        matched.sort_by(|a, b| compare_optional(a.1.as_ref(), b.1.as_ref()));
    } else {
        matched.sort_by(|a, b| compare_strings(a.0, b.0));
    }

    let total = matched.len();
    let keys = matched.into_iter().map(|(key, _)| key.clone()).collect();
    (keys, Metadata { total, counts })
}

fn window(len: usize, start: usize, block_size: usize) -> Range<usize> {
    if start >= len {
        return len..len;
    }
    let end = if block_size == 0 {
        len
    } else {
        start.saturating_add(block_size).min(len)
    };
    start..end
}
