//! Query descriptions accepted by [`crate::cache::Cache::fetch`].

use std::fmt;
use std::marker::PhantomData;

use super::keys::hash_shape;
use super::model::{FieldValue, Model};

/// A filtered, sorted, paginated view over a cache.
///
/// Two queries with the same [`Query::hash_id`] must select and order rows
/// identically; they share one query plan. The page number is not part of
/// the shape.
pub trait Query<T> {
    /// Stable identity of the query shape.
    fn hash_id(&self) -> String;

    /// True when [`Query::matches`] can reject a value.
    fn has_criteria(&self) -> bool;

    fn matches(&self, value: &T) -> bool;

    /// Field rows are ordered by, if any. Without one, rows order by key.
    fn sort_by(&self) -> Option<&str>;

    fn sort_value(&self, value: &T) -> Option<FieldValue>;

    /// Zero-based page; metadata is only returned for page 0.
    fn page(&self) -> usize;
}

/// Query built from field equality filters and an optional sort field.
pub struct FieldQuery<T> {
    filters: Vec<(String, FieldValue)>,
    sort: Option<String>,
    page: usize,
    _model: PhantomData<fn(&T)>,
}

impl<T: Model> FieldQuery<T> {
    pub fn new() -> Self {
        Self {
            filters: Vec::new(),
            sort: None,
            page: 0,
            _model: PhantomData,
        }
    }

    /// Require `field` to equal `value`.
    pub fn with_filter(mut self, field: &str, value: impl Into<FieldValue>) -> Self {
        self.filters.push((field.to_string(), value.into()));
        self
    }

    pub fn sorted_by(mut self, field: &str) -> Self {
        self.sort = Some(field.to_string());
        self
    }

    pub fn on_page(mut self, page: usize) -> Self {
        self.page = page;
        self
    }
}

impl<T: Model> Default for FieldQuery<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for FieldQuery<T> {
    fn clone(&self) -> Self {
        Self {
            filters: self.filters.clone(),
            sort: self.sort.clone(),
            page: self.page,
            _model: PhantomData,
        }
    }
}

impl<T> fmt::Debug for FieldQuery<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldQuery")
            .field("filters", &self.filters)
            .field("sort", &self.sort)
            .field("page", &self.page)
            .finish()
    }
}

impl<T: Model> Query<T> for FieldQuery<T> {
    fn hash_id(&self) -> String {
        // Hashed as structured parts so no filter value can spell another shape.
        let filters: Vec<(&str, &str, String)> = self
            .filters
            .iter()
            .map(|(field, value)| (field.as_str(), value.kind_name(), value.to_string()))
            .collect();
        hash_shape(&(T::model_type(), filters, self.sort.as_deref()))
    }

    fn has_criteria(&self) -> bool {
        !self.filters.is_empty()
    }

    fn matches(&self, value: &T) -> bool {
        self.filters
            .iter()
            .all(|(field, expected)| value.field(field).as_ref() == Some(expected))
    }

    fn sort_by(&self) -> Option<&str> {
        self.sort.as_deref()
    }

    fn sort_value(&self, value: &T) -> Option<FieldValue> {
        value.field(self.sort.as_deref()?)
    }

    fn page(&self) -> usize {
        self.page
    }
}
