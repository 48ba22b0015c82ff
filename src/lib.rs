//! dcache: an in-memory, key-indexed object cache with self-invalidating
//! query plans and structured change notifications.
//!
//! See [`cache::Cache`] for the entry point.

pub mod cache;
pub mod config;
pub mod telemetry;

pub use cache::{
    Cache, CacheConfig, CacheError, CacheStats, FieldError, FieldQuery, FieldValue, Introspector,
    MemoryStorage, Metadata, Model, NotificationSet, NotificationType, Query, Resources,
    StaticIntrospector, Storage, StoreError,
};
