//! Durable storage a cache can mirror to.

use std::collections::HashMap;

use super::error::StoreError;
use super::lock::CacheLock;

const SOURCE: &str = "dcache::cache::storage";

/// Backing store for one model type.
///
/// When [`Storage::cache_enabled`] is false the cache never populates its
/// in-memory map and routes every call here.
pub trait Storage<T>: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<T>, StoreError>;

    fn put(&self, key: &str, value: &T) -> Result<(), StoreError>;

    /// Remove `key`, returning the stored value if there was one.
    fn delete(&self, key: &str) -> Result<Option<T>, StoreError>;

    /// Keep every value `f` maps to `Some`, keyed by primary key.
    fn collect(&self, f: &dyn Fn(&T) -> Option<T>) -> HashMap<String, T>;

    fn cache_enabled(&self) -> bool;
}

/// In-process [`Storage`] keeping values in a hash map.
pub struct MemoryStorage<T> {
    values: CacheLock<HashMap<String, T>>,
    cache_enabled: bool,
}

impl<T: Clone> MemoryStorage<T> {
    /// Storage a cache mirrors to.
    pub fn new() -> Self {
        Self::with_entries(HashMap::new(), true)
    }

    /// Storage the cache passes every call through to.
    pub fn pass_through() -> Self {
        Self::with_entries(HashMap::new(), false)
    }

    pub fn with_entries(values: HashMap<String, T>, cache_enabled: bool) -> Self {
        Self {
            values: CacheLock::new(values, SOURCE),
            cache_enabled,
        }
    }

    pub fn len(&self) -> usize {
        self.values.read("len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Clone> Default for MemoryStorage<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + Sync> Storage<T> for MemoryStorage<T> {
    fn get(&self, key: &str) -> Result<Option<T>, StoreError> {
        Ok(self.values.read("get").get(key).cloned())
    }

    fn put(&self, key: &str, value: &T) -> Result<(), StoreError> {
        self.values
            .write("put")
            .insert(key.to_string(), value.clone());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<Option<T>, StoreError> {
        Ok(self.values.write("delete").remove(key))
    }

    fn collect(&self, f: &dyn Fn(&T) -> Option<T>) -> HashMap<String, T> {
        self.values
            .read("collect")
            .iter()
            .filter_map(|(key, value)| f(value).map(|kept| (key.clone(), kept)))
            .collect()
    }

    fn cache_enabled(&self) -> bool {
        self.cache_enabled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_get_delete() {
        let storage = MemoryStorage::new();
        storage.put("a", &1_u32).expect("put");
        assert_eq!(storage.get("a").expect("get"), Some(1));

        assert_eq!(storage.delete("a").expect("delete"), Some(1));
        assert_eq!(storage.delete("a").expect("delete"), None);
        assert!(storage.is_empty());
    }

    #[test]
    fn collect_filters_and_transforms() {
        let storage = MemoryStorage::new();
        for (key, value) in [("a", 1_u32), ("b", 2), ("c", 3)] {
            storage.put(key, &value).expect("put");
        }

        let odd = storage.collect(&|value| (value % 2 == 1).then_some(value * 10));
        assert_eq!(odd.len(), 2);
        assert_eq!(odd["a"], 10);
        assert_eq!(odd["c"], 30);
    }

    #[test]
    fn pass_through_reports_cache_disabled() {
        assert!(MemoryStorage::<u32>::new().cache_enabled());
        assert!(!MemoryStorage::<u32>::pass_through().cache_enabled());
    }
}
