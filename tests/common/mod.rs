#![allow(dead_code)]

use std::sync::Arc;

use dcache::{Cache, CacheConfig, Resources, StaticIntrospector, Storage};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Widget {
    pub id: String,
    pub name: String,
    pub v: i64,
    pub ip: String,
    pub online: bool,
}

dcache::model!(Widget as "Widget" { id, name, v, ip, online });

pub fn widget(id: &str, v: i64) -> Widget {
    Widget {
        id: id.to_string(),
        name: format!("widget-{id}"),
        v,
        ..Default::default()
    }
}

pub fn key(id: &str) -> Widget {
    Widget {
        id: id.to_string(),
        ..Default::default()
    }
}

pub fn resources() -> Resources {
    let introspector = StaticIntrospector::new().register("Widget", &["id"], &["name"]);
    Resources::new(Arc::new(introspector)).with_config(CacheConfig {
        service_name: "inventory".to_string(),
        service_area: 1,
        source: "node-a".to_string(),
        start_cleaner: false,
        ..Default::default()
    })
}

pub fn memory_cache() -> Cache<Widget> {
    Cache::new(&Widget::default(), Vec::new(), None, resources())
        .expect("widget keys should resolve")
}

pub fn mirrored_cache(storage: Arc<dyn Storage<Widget>>) -> Cache<Widget> {
    Cache::new(&Widget::default(), Vec::new(), Some(storage), resources())
        .expect("widget keys should resolve")
}

pub fn ids(rows: &[Widget]) -> Vec<String> {
    rows.iter().map(|row| row.id.clone()).collect()
}

/// Deterministic xorshift generator for randomized operation sequences.
pub struct XorShift(u64);

impl XorShift {
    pub fn new(seed: u64) -> Self {
        Self(seed.max(1))
    }

    pub fn next(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        x
    }

    pub fn below(&mut self, bound: u64) -> u64 {
        self.next() % bound
    }
}
