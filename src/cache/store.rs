//! In-memory entry storage.
//!
//! [`EntryStore`] owns the key→value map of one cache together with the
//! insertion order, the generation stamp, the unique-key index and the
//! incrementally maintained metadata counts.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use tracing::warn;

/// Predicate registered under a metadata name.
pub type Predicate<T> = Arc<dyn Fn(&T) -> bool + Send + Sync>;

// Tombstones are compacted once they outnumber live slots past this floor.
const COMPACT_THRESHOLD: usize = 64;

struct MetadataCounter<T> {
    predicate: Predicate<T>,
    count: usize,
}

pub(crate) struct EntryStore<T> {
    entries: HashMap<String, T>,
    added_order: Vec<Option<String>>,
    key_to_order: HashMap<String, usize>,
    tombstones: usize,
    unique_to_primary: HashMap<String, String>,
    primary_to_unique: HashMap<String, String>,
    stamp: u64,
    metadata: BTreeMap<String, MetadataCounter<T>>,
}

impl<T> EntryStore<T> {
    pub(crate) fn new() -> Self {
        Self {
            entries: HashMap::new(),
            added_order: Vec::new(),
            key_to_order: HashMap::new(),
            tombstones: 0,
            unique_to_primary: HashMap::new(),
            primary_to_unique: HashMap::new(),
            stamp: 0,
            metadata: BTreeMap::new(),
        }
    }

    /// Generation stamp; changes only when the key set changes.
    pub(crate) fn stamp(&self) -> u64 {
        self.stamp
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn get(&self, key: &str) -> Option<&T> {
        self.entries.get(key)
    }

    pub(crate) fn primary_for_unique(&self, unique: &str) -> Option<&str> {
        self.unique_to_primary.get(unique).map(String::as_str)
    }

    /// Insert or overwrite `key`, returning the previous value.
    pub(crate) fn put(&mut self, key: String, unique: Option<String>, value: T) -> Option<T> {
        if let Some(old) = self.entries.get(&key) {
            Self::retract(&mut self.metadata, old);
        }
        self.contribute(&value);
        self.index_unique(&key, unique);

        let previous = self.entries.insert(key.clone(), value);
        if previous.is_none() {
            self.key_to_order.insert(key.clone(), self.added_order.len());
            self.added_order.push(Some(key));
            self.stamp += 1;
        }
        previous
    }

    pub(crate) fn delete(&mut self, key: &str) -> Option<T> {
        let removed = self.entries.remove(key)?;
        Self::retract(&mut self.metadata, &removed);
        self.index_unique(key, None);

        if let Some(position) = self.key_to_order.remove(key) {
            self.added_order[position] = None;
            self.tombstones += 1;
            if self.tombstones > COMPACT_THRESHOLD && self.tombstones * 2 > self.added_order.len()
            {
                self.compact();
            }
        }
        self.stamp += 1;
        Some(removed)
    }

    /// Live keys in insertion order.
    pub(crate) fn ordered_keys(&self) -> impl Iterator<Item = &String> + '_ {
        self.added_order.iter().flatten()
    }

    /// Live entries in insertion order.
    pub(crate) fn ordered_entries(&self) -> impl Iterator<Item = (&String, &T)> + '_ {
        self.ordered_keys()
            .filter_map(|key| self.entries.get(key).map(|value| (key, value)))
    }

    pub(crate) fn values(&self) -> impl Iterator<Item = (&String, &T)> + '_ {
        self.entries.iter()
    }

    /// Register (or replace) a metadata predicate, back-filled over current entries.
    pub(crate) fn add_metadata_func(&mut self, name: &str, predicate: Predicate<T>) {
        let count = self.entries.values().filter(|value| predicate(value)).count();
        self.metadata
            .insert(name.to_string(), MetadataCounter { predicate, count });
    }

    pub(crate) fn metadata_counts(&self) -> BTreeMap<String, usize> {
        self.metadata
            .iter()
            .map(|(name, counter)| (name.clone(), counter.count))
            .collect()
    }

    pub(crate) fn predicates(&self) -> Vec<(String, Predicate<T>)> {
        self.metadata
            .iter()
            .map(|(name, counter)| (name.clone(), Arc::clone(&counter.predicate)))
            .collect()
    }

    fn contribute(&mut self, value: &T) {
        for counter in self.metadata.values_mut() {
            if (counter.predicate)(value) {
                counter.count += 1;
            }
        }
    }

    fn retract(metadata: &mut BTreeMap<String, MetadataCounter<T>>, value: &T) {
        for counter in metadata.values_mut() {
            if (counter.predicate)(value) {
                counter.count = counter.count.saturating_sub(1);
            }
        }
    }

    fn index_unique(&mut self, primary: &str, unique: Option<String>) {
        if let Some(previous) = self.primary_to_unique.remove(primary) {
            self.unique_to_primary.remove(&previous);
        }
        let Some(unique) = unique else {
            return;
        };
        // A unique key moving to a new primary detaches it from the old one.
        if let Some(owner) = self.unique_to_primary.insert(unique.clone(), primary.to_string())
            && owner != primary
        {
            warn!(
                unique = %unique,
                previous_primary = %owner,
                primary,
                "Unique key claimed by a second entry; previous owner no longer resolves by it"
            );
            self.primary_to_unique.remove(&owner);
        }
        self.primary_to_unique.insert(primary.to_string(), unique);
    }

    fn compact(&mut self) {
        self.added_order.retain(Option::is_some);
        self.key_to_order.clear();
        for (position, key) in self.added_order.iter().flatten().enumerate() {
            self.key_to_order.insert(key.clone(), position);
        }
        self.tombstones = 0;
    }
}

impl<T> fmt::Debug for EntryStore<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntryStore")
            .field("entries", &self.entries.len())
            .field("stamp", &self.stamp)
            .field("metadata", &self.metadata_counts())
            .finish()
    }
}
