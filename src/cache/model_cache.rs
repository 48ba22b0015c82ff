//! The cache façade.
//!
//! [`Cache`] binds one model type to an [`EntryStore`], a plan cache, a
//! notification builder and optionally a [`Storage`]. Every mutation holds
//! the exclusive lock for its whole body, storage round-trip included, so
//! notification sequences follow the order mutations are applied.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use metrics::{counter, gauge};
use tracing::{debug, info, warn};

use super::cleaner::{Reclaim, TtlCleaner};
use super::compare::compare_strings;
use super::config::CacheConfig;
use super::diff::{DiffMode, apply, diff};
use super::error::CacheError;
use super::keys::KeyExtractor;
use super::lock::CacheLock;
use super::model::{Introspector, Model};
use super::notification::{
    NotificationBuilder, NotificationSet, PendingNotification, ServiceIdentity,
};
use super::plan::{PlanCache, detached_page};
use super::query::Query;
use super::storage::Storage;
use super::store::EntryStore;
use super::types::{CacheStats, Metadata};

const SOURCE: &str = "dcache::cache::model_cache";

const METRIC_NOTIFICATION: &str = "dcache_notification_total";
const METRIC_ENTRIES: &str = "dcache_entries";

/// Shared collaborators handed to every cache.
#[derive(Clone)]
pub struct Resources {
    pub introspector: Arc<dyn Introspector>,
    pub config: CacheConfig,
}

impl Resources {
    pub fn new(introspector: Arc<dyn Introspector>) -> Self {
        Self {
            introspector,
            config: CacheConfig::default(),
        }
    }

    pub fn with_config(mut self, config: CacheConfig) -> Self {
        self.config = config;
        self
    }
}

impl fmt::Debug for Resources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resources")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

enum Backing<T> {
    Memory,
    /// Writes go to storage first, then to the in-memory map.
    Mirrored(Arc<dyn Storage<T>>),
    /// Storage has the cache disabled; the in-memory map stays empty.
    PassThrough(Arc<dyn Storage<T>>),
}

impl<T> Backing<T> {
    fn storage(&self) -> Option<&dyn Storage<T>> {
        match self {
            Self::Memory => None,
            Self::Mirrored(storage) | Self::PassThrough(storage) => Some(storage.as_ref()),
        }
    }

    fn caches(&self) -> bool {
        !matches!(self, Self::PassThrough(_))
    }

    fn name(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Mirrored(_) => "mirrored",
            Self::PassThrough(_) => "pass_through",
        }
    }
}

struct CacheState<T> {
    entries: EntryStore<T>,
    plans: PlanCache,
    notifications: NotificationBuilder,
}

impl<T: Send + Sync> Reclaim for CacheLock<CacheState<T>> {
    fn reclaim_idle(&self, ttl: Duration) -> usize {
        self.write("reclaim_idle").plans.reclaim(ttl)
    }
}

/// In-memory, key-indexed cache of one model type.
pub struct Cache<T: Model> {
    state: Arc<CacheLock<CacheState<T>>>,
    keys: KeyExtractor,
    backing: Backing<T>,
    cleaner: TtlCleaner,
    config: CacheConfig,
}

impl<T: Model> Cache<T> {
    /// Build a cache for `T`.
    ///
    /// Key fields are resolved once from `resources.introspector` and checked
    /// against `sample`. A non-empty `store` is loaded and `init_elements` are
    /// ignored; otherwise `init_elements` seed both the storage and the map.
    pub fn new(
        sample: &T,
        init_elements: Vec<T>,
        store: Option<Arc<dyn Storage<T>>>,
        resources: Resources,
    ) -> Result<Self, CacheError> {
        let keys = KeyExtractor::resolve(resources.introspector.as_ref(), sample)?;
        let config = resources.config;
        let backing = match store {
            None => Backing::Memory,
            Some(storage) if storage.cache_enabled() => Backing::Mirrored(storage),
            Some(storage) => Backing::PassThrough(storage),
        };

        let mut state = CacheState {
            entries: EntryStore::new(),
            plans: PlanCache::new(),
            notifications: NotificationBuilder::new(config.identity()),
        };
        let loaded = load_initial(&keys, &backing, &mut state.entries, init_elements)?;

        let cache = Self {
            state: Arc::new(CacheLock::new(state, SOURCE)),
            keys,
            backing,
            cleaner: TtlCleaner::new(T::model_type()),
            config,
        };
        cache.record_size(loaded);
        if cache.config.start_cleaner {
            cache.start_cleaner();
        }

        info!(
            model_type = T::model_type(),
            backing = cache.backing.name(),
            entries = loaded,
            "Cache ready"
        );
        Ok(cache)
    }

    fn start_cleaner(&self) {
        let target: Weak<CacheLock<CacheState<T>>> = Arc::downgrade(&self.state);
        self.cleaner.start(
            target,
            self.config.cleaner_interval(),
            self.config.query_ttl(),
        );
    }

    pub fn model_type(&self) -> &'static str {
        T::model_type()
    }

    /// False when the backing storage has the cache disabled.
    pub fn is_cache_enabled(&self) -> bool {
        self.backing.caches()
    }

    /// Primary and optional unique key of `value`.
    pub fn keys_for(&self, value: &T) -> Result<(String, Option<String>), CacheError> {
        self.keys.keys_for(value)
    }

    /// Insert `value`, or overwrite the stored entry with every field of `value`.
    ///
    /// Returns `Ok(None)` when `notify` is false or nothing changed.
    pub fn post(&self, value: &T, notify: bool) -> Result<Option<NotificationSet>, CacheError> {
        let (key, unique) = self.keys.keys_for(value)?;
        let mut guard = self.state.write("post");
        let state = &mut *guard;

        let Some(old) = self.current(&state.entries, &key)? else {
            return self.insert_new(state, key, unique, value, notify);
        };

        let changes = diff(&old, value, DiffMode::Replace)?;
        if changes.is_empty() {
            return Ok(None);
        }
        let pending = if notify {
            Some(state.notifications.prepare_replace(&key, &old, value)?)
        } else {
            None
        };

        debug!(
            model_type = T::model_type(),
            key = %key,
            changes = changes.len(),
            "Replacing entry"
        );
        self.write_through(state, key, unique, value.clone())?;
        Ok(pending.map(|pending| seal(state, pending)))
    }

    /// Same as [`Cache::post`].
    pub fn put(&self, value: &T, notify: bool) -> Result<Option<NotificationSet>, CacheError> {
        self.post(value, notify)
    }

    /// Apply the non-zero fields of `value` to the stored entry.
    ///
    /// An absent key is inserted as if posted.
    pub fn patch(&self, value: &T, notify: bool) -> Result<Option<NotificationSet>, CacheError> {
        let (key, unique) = self.keys.keys_for(value)?;
        let mut guard = self.state.write("patch");
        let state = &mut *guard;

        let Some(old) = self.current(&state.entries, &key)? else {
            return self.insert_new(state, key, unique, value, notify);
        };

        let changes = diff(&old, value, DiffMode::Patch)?;
        if changes.is_empty() {
            return Ok(None);
        }
        let updated = apply(&old, &changes)?;
        let pending = if notify {
            Some(state.notifications.prepare_update::<T>(&key, &changes)?)
        } else {
            None
        };

        debug!(
            model_type = T::model_type(),
            key = %key,
            changes = changes.len(),
            "Patching entry"
        );
        let unique = self.keys.unique_key(&updated);
        self.write_through(state, key, unique, updated)?;
        Ok(pending.map(|pending| seal(state, pending)))
    }

    /// Remove the entry keyed by `value`.
    pub fn delete(&self, value: &T, notify: bool) -> Result<Option<NotificationSet>, CacheError> {
        let (key, _) = self.keys.keys_for(value)?;
        let mut guard = self.state.write("delete");
        let state = &mut *guard;

        let old = match &self.backing {
            Backing::Memory => state.entries.get(&key).cloned(),
            Backing::Mirrored(storage) => match state.entries.get(&key) {
                Some(old) => Some(old.clone()),
                None => storage.get(&key)?,
            },
            Backing::PassThrough(storage) => storage.get(&key)?,
        };
        let Some(old) = old else {
            return Err(CacheError::not_found(T::model_type(), key));
        };
        let pending = if notify {
            Some(state.notifications.prepare_delete(&key, &old)?)
        } else {
            None
        };

        if let Some(storage) = self.backing.storage() {
            storage.delete(&key)?;
        }
        if self.backing.caches() {
            state.entries.delete(&key);
            self.record_size(state.entries.len());
        }
        debug!(model_type = T::model_type(), key = %key, "Deleted entry");
        Ok(pending.map(|pending| seal(state, pending)))
    }

    /// Clone of the entry keyed by the template `value`.
    ///
    /// Only key fields of the template are read. When its primary key is
    /// empty the unique key is used instead. A failing pass-through storage
    /// lookup reports [`CacheError::NotFound`].
    pub fn get(&self, value: &T) -> Result<T, CacheError> {
        let state = self.state.read("get");
        let Some(key) = self.keys.primary_key(value) else {
            let unique = self.keys.unique_key(value).ok_or_else(|| {
                CacheError::key_resolution(T::model_type(), "template has no usable key")
            })?;
            return self.get_by_unique(&state.entries, &unique);
        };

        let found = match &self.backing {
            Backing::PassThrough(storage) => storage.get(&key).unwrap_or_else(|err| {
                debug!(
                    model_type = T::model_type(),
                    key = %key,
                    error = %err,
                    "Storage lookup failed"
                );
                None
            }),
            _ => state.entries.get(&key).cloned(),
        };
        found.ok_or_else(|| CacheError::not_found(T::model_type(), key))
    }

    fn get_by_unique(&self, entries: &EntryStore<T>, unique: &str) -> Result<T, CacheError> {
        let found = match &self.backing {
            // Storage holds no unique index; scan for the owner.
            Backing::PassThrough(storage) => storage
                .collect(&|candidate: &T| {
                    (self.keys.unique_key(candidate).as_deref() == Some(unique))
                        .then(|| candidate.clone())
                })
                .into_values()
                .next(),
            _ => entries
                .primary_for_unique(unique)
                .and_then(|primary| entries.get(primary))
                .cloned(),
        };
        found.ok_or_else(|| CacheError::not_found(T::model_type(), unique))
    }

    /// Rows `[start, start + block_size)` of `query`; `block_size == 0` returns the tail.
    ///
    /// Metadata is attached only to page 0.
    pub fn fetch<Q>(
        &self,
        start: usize,
        block_size: usize,
        query: &Q,
    ) -> (Vec<T>, Option<Metadata>)
    where
        Q: Query<T> + ?Sized,
    {
        let with_metadata = query.page() == 0;

        if let Backing::PassThrough(storage) = &self.backing {
            let predicates = self.state.read("fetch").entries.predicates();
            let values =
                storage.collect(&|value: &T| query.matches(value).then(|| value.clone()));
            let (rows, metadata) = detached_page(values, query, &predicates, start, block_size);
            return (rows, with_metadata.then_some(metadata));
        }

        {
            let state = self.state.read("fetch");
            if let Some(plan) = state.plans.lookup(&query.hash_id(), state.entries.stamp()) {
                let rows = plan.slice(&state.entries, start, block_size);
                return (rows, with_metadata.then(|| plan.metadata(&state.entries)));
            }
        }

        let mut guard = self.state.write("fetch");
        let state = &mut *guard;
        let plan = state.plans.resolve(&state.entries, query);
        let rows = plan.slice(&state.entries, start, block_size);
        (rows, with_metadata.then(|| plan.metadata(&state.entries)))
    }

    /// Every value `f` maps to `Some`, keyed by primary key.
    pub fn collect<F>(&self, f: F) -> HashMap<String, T>
    where
        F: Fn(&T) -> Option<T>,
    {
        if let Backing::PassThrough(storage) = &self.backing {
            return storage.collect(&f);
        }
        self.state
            .read("collect")
            .entries
            .values()
            .filter_map(|(key, value)| f(value).map(|kept| (key.clone(), kept)))
            .collect()
    }

    /// Register a named predicate counted over all entries and over fetched subsets.
    ///
    /// Re-registering a name replaces the predicate.
    pub fn add_metadata_func<F>(&self, name: &str, predicate: F)
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        let mut state = self.state.write("add_metadata_func");
        state.entries.add_metadata_func(name, Arc::new(predicate));
        state.plans.clear();
    }

    /// Current count per registered predicate.
    pub fn metadata(&self) -> BTreeMap<String, usize> {
        let state = self.state.read("metadata");
        let Backing::PassThrough(storage) = &self.backing else {
            return state.entries.metadata_counts();
        };

        let predicates = state.entries.predicates();
        let values = storage.collect(&|value: &T| Some(value.clone()));
        predicates
            .iter()
            .map(|(name, predicate)| {
                let count = values.values().filter(|value| predicate(value)).count();
                (name.clone(), count)
            })
            .collect()
    }

    pub fn size(&self) -> usize {
        if let Backing::PassThrough(storage) = &self.backing {
            return storage.collect(&|value: &T| Some(value.clone())).len();
        }
        self.state.read("size").entries.len()
    }

    /// Retarget the service name and area carried by future notifications.
    pub fn set_notifications_for(&self, service_name: &str, service_area: u8) {
        self.state
            .write("set_notifications_for")
            .notifications
            .set_target(service_name, service_area);
    }

    /// Identity stamped on the next notification.
    pub fn notification_identity(&self) -> ServiceIdentity {
        self.state
            .read("notification_identity")
            .notifications
            .identity()
            .clone()
    }

    pub fn query_count(&self) -> usize {
        self.state.read("query_count").plans.len()
    }

    /// Reclaim plans idle for longer than `ttl` right away.
    pub fn cleanup_queries_now(&self, ttl: Duration) -> usize {
        let removed = self.state.reclaim_idle(ttl);
        if removed > 0 {
            info!(model_type = T::model_type(), removed, "Reclaimed idle query plans");
        }
        removed
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.state.read("stats");
        CacheStats {
            entries: state.entries.len(),
            query_plans: state.plans.len(),
            plan_hits: state.plans.hits(),
            plan_rebuilds: state.plans.rebuilds(),
            plans_evicted: state.plans.evicted(),
            notifications: state.notifications.next_sequence(),
        }
    }

    /// Stop the background cleaner. Idempotent; the cache stays usable.
    pub fn close(&self) {
        if self.cleaner.stop() {
            debug!(model_type = T::model_type(), "Cache closed");
        }
    }

    fn current(&self, entries: &EntryStore<T>, key: &str) -> Result<Option<T>, CacheError> {
        match &self.backing {
            Backing::PassThrough(storage) => Ok(storage.get(key)?),
            _ => Ok(entries.get(key).cloned()),
        }
    }

    fn insert_new(
        &self,
        state: &mut CacheState<T>,
        key: String,
        unique: Option<String>,
        value: &T,
        notify: bool,
    ) -> Result<Option<NotificationSet>, CacheError> {
        let pending = if notify {
            Some(state.notifications.prepare_add(&key, value)?)
        } else {
            None
        };

        debug!(model_type = T::model_type(), key = %key, "Adding entry");
        self.write_through(state, key, unique, value.clone())?;
        Ok(pending.map(|pending| seal(state, pending)))
    }

    fn write_through(
        &self,
        state: &mut CacheState<T>,
        key: String,
        unique: Option<String>,
        value: T,
    ) -> Result<(), CacheError> {
        if let Some(storage) = self.backing.storage() {
            storage.put(&key, &value)?;
        }
        if self.backing.caches() {
            state.entries.put(key, unique, value);
            self.record_size(state.entries.len());
        }
        Ok(())
    }

    fn record_size(&self, len: usize) {
        if self.backing.caches() {
            gauge!(METRIC_ENTRIES, "model_type" => T::model_type()).set(len as f64);
        }
    }
}

impl<T: Model> fmt::Debug for Cache<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cache")
            .field("model_type", &T::model_type())
            .field("backing", &self.backing.name())
            .field("keys", &self.keys)
            .field("cleaner_running", &self.cleaner.is_running())
            .finish_non_exhaustive()
    }
}

fn seal<T>(state: &mut CacheState<T>, pending: PendingNotification) -> NotificationSet {
    let set = state.notifications.seal(pending);
    counter!(METRIC_NOTIFICATION, "kind" => set.kind.as_str()).increment(1);
    set
}

/// Populate the map from storage, or seed storage and map from `init_elements`.
fn load_initial<T: Model>(
    keys: &KeyExtractor,
    backing: &Backing<T>,
    entries: &mut EntryStore<T>,
    init_elements: Vec<T>,
) -> Result<usize, CacheError> {
    if let Some(storage) = backing.storage() {
        let mut existing: Vec<(String, T)> = storage
            .collect(&|value: &T| Some(value.clone()))
            .into_iter()
            .collect();
        if !existing.is_empty() {
            let loaded = existing.len();
            if backing.caches() {
                existing.sort_by(|a, b| compare_strings(&a.0, &b.0));
                for (key, value) in existing {
                    let unique = keys.unique_key(&value);
                    entries.put(key, unique, value);
                }
            }
            info!(
                model_type = T::model_type(),
                loaded,
                "Loaded entries from storage"
            );
            return Ok(entries.len());
        }
    }

    for element in init_elements {
        let (key, unique) = match keys.keys_for(&element) {
            Ok(keys) => keys,
            Err(err) => {
                warn!(
                    model_type = T::model_type(),
                    error = %err,
                    "Skipping initial element without a key"
                );
                continue;
            }
        };
        if let Some(storage) = backing.storage() {
            storage.put(&key, &element)?;
        }
        if backing.caches() {
            entries.put(key, unique, element);
        }
    }
    Ok(entries.len())
}
