//! Error types for cache operations.

use std::error::Error as StdError;
use std::fmt;

use thiserror::Error;

/// Errors returned by [`crate::cache::Cache`] operations.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The value (or the model type itself) lacks the declared key fields.
    #[error("cannot resolve keys for `{model_type}`: {reason}")]
    KeyResolution {
        model_type: &'static str,
        reason: String,
    },
    /// No entry exists under the resolved key.
    #[error("no `{model_type}` entry with key `{key}`")]
    NotFound {
        model_type: &'static str,
        key: String,
    },
    /// The backing storage failed; the message is passed through unchanged.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// A field-level diff or change application failed.
    #[error("diff failed: {0}")]
    Diff(#[from] FieldError),
    /// A notification snapshot could not be encoded.
    #[error("failed to encode notification snapshot: {0}")]
    Encode(#[from] serde_json::Error),
}

impl CacheError {
    pub fn key_resolution(model_type: &'static str, reason: impl Into<String>) -> Self {
        Self::KeyResolution {
            model_type,
            reason: reason.into(),
        }
    }

    pub fn not_found(model_type: &'static str, key: impl Into<String>) -> Self {
        Self::NotFound {
            model_type,
            key: key.into(),
        }
    }

    /// Returns true for [`CacheError::NotFound`].
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Opaque error raised by a [`crate::cache::Storage`] implementation.
pub struct StoreError {
    inner: Box<dyn StdError + Send + Sync + 'static>,
}

impl StoreError {
    pub fn new(error: impl Into<Box<dyn StdError + Send + Sync + 'static>>) -> Self {
        Self {
            inner: error.into(),
        }
    }

    /// Borrow the wrapped error.
    pub fn get_ref(&self) -> &(dyn StdError + Send + Sync + 'static) {
        self.inner.as_ref()
    }
}

impl fmt::Debug for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("StoreError").field(&self.inner).finish()
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.inner, f)
    }
}

impl StdError for StoreError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.inner.source()
    }
}

/// Errors raised by a model's field accessor table.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FieldError {
    #[error("`{model_type}` has no field `{field}`")]
    UnknownField {
        model_type: &'static str,
        field: String,
    },
    #[error("field `{field}` expects {expected}, got {found}")]
    TypeMismatch {
        field: String,
        expected: &'static str,
        found: &'static str,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_error_displays_inner_message() {
        let err = StoreError::new("disk full");
        assert_eq!(err.to_string(), "disk full");

        let wrapped = CacheError::from(err);
        assert_eq!(wrapped.to_string(), "disk full");
    }

    #[test]
    fn not_found_is_detectable() {
        let err = CacheError::not_found("Widget", "a");
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "no `Widget` entry with key `a`");
        assert!(!CacheError::key_resolution("Widget", "missing id").is_not_found());
    }
}
