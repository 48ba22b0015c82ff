//! Key-indexed object cache
//!
//! One [`Cache`] holds the instances of one model type:
//!
//! - **Entries**: keyed by the model's primary key, optionally aliased by a unique key
//! - **Query plans**: per-query-shape ordered key lists, rebuilt when the key set changes
//! - **Notifications**: structured add/replace/delete/update sets returned by mutations
//!
//! ## Configuration
//!
//! Cleaner timing and notification identity come from `dcache.toml`:
//!
//! ```toml
//! [cache]
//! cleaner_interval_ms = 10000
//! query_ttl_ms = 30000
//! service_name = "inventory"
//! # ... see config.rs for all options
//! ```

mod cleaner;
mod compare;
mod config;
mod diff;
mod error;
mod keys;
mod lock;
mod model;
mod model_cache;
mod notification;
mod plan;
mod query;
mod storage;
mod store;
mod types;

pub use compare::{compare_optional, compare_strings, compare_values};
pub use config::CacheConfig;
pub use diff::{Change, DiffMode, apply, diff};
pub use error::{CacheError, FieldError, StoreError};
pub use keys::{KEY_SEPARATOR, KeyExtractor, hash_shape, hash_value};
pub use model::{
    FieldValue, FromFieldValue, Introspector, KeyFields, Model, StaticIntrospector, assign_field,
};
pub use model_cache::{Cache, Resources};
pub use notification::{
    NotificationEntry, NotificationSet, NotificationType, ServiceIdentity, property_id,
};
pub use query::{FieldQuery, Query};
pub use storage::{MemoryStorage, Storage};
pub use store::Predicate;
pub use types::{CacheStats, Metadata};
