//! Key extraction and hash helpers.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use super::error::CacheError;
use super::model::{Introspector, KeyFields, Model};

/// Separator between parts of a multi-field key.
pub const KEY_SEPARATOR: &str = ":";

/// Per-cache key extractor, resolved once when the cache is built.
#[derive(Debug, Clone)]
pub struct KeyExtractor {
    model_type: &'static str,
    primary: Vec<String>,
    unique: Vec<String>,
}

impl KeyExtractor {
    /// Resolve key fields for `T` and check them against the sample's accessor table.
    pub fn resolve<T: Model>(
        introspector: &dyn Introspector,
        sample: &T,
    ) -> Result<Self, CacheError> {
        let model_type = T::model_type();
        let KeyFields { primary, unique } = introspector
            .key_fields(model_type)
            .ok_or_else(|| CacheError::key_resolution(model_type, "no key fields registered"))?;

        if primary.is_empty() {
            return Err(CacheError::key_resolution(
                model_type,
                "no primary key fields declared",
            ));
        }

        for name in primary.iter().chain(unique.iter()) {
            if sample.field(name).is_none() {
                return Err(CacheError::key_resolution(
                    model_type,
                    format!("key field `{name}` is not in the accessor table"),
                ));
            }
        }

        Ok(Self {
            model_type,
            primary,
            unique,
        })
    }

    pub fn model_type(&self) -> &'static str {
        self.model_type
    }

    /// Primary key of `value`, or `None` when any primary field is empty.
    pub fn primary_key<T: Model>(&self, value: &T) -> Option<String> {
        join_parts(value, &self.primary)
    }

    /// Unique key of `value`, or `None` when not declared or empty.
    pub fn unique_key<T: Model>(&self, value: &T) -> Option<String> {
        if self.unique.is_empty() {
            return None;
        }
        join_parts(value, &self.unique)
    }

    /// Both keys; fails when the primary key cannot be built.
    pub fn keys_for<T: Model>(&self, value: &T) -> Result<(String, Option<String>), CacheError> {
        let primary = self.primary_key(value).ok_or_else(|| {
            CacheError::key_resolution(
                self.model_type,
                format!("primary key field(s) `{}` are empty", self.primary.join(", ")),
            )
        })?;
        Ok((primary, self.unique_key(value)))
    }
}

fn join_parts<T: Model>(value: &T, fields: &[String]) -> Option<String> {
    let mut parts = Vec::with_capacity(fields.len());
    for name in fields {
        parts.push(value.field(name)?.to_key_part()?);
    }
    Some(parts.join(KEY_SEPARATOR))
}

/// Compute a hash for any hashable value.
pub fn hash_value<T: Hash + ?Sized>(value: &T) -> u64 {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}

/// Hex identity for a query shape description.
pub fn hash_shape<S: Hash + ?Sized>(shape: &S) -> String {
    format!("{:016x}", hash_value(shape))
}
