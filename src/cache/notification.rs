//! Change notifications returned by cache mutations.
//!
//! A mutation with `notify` set returns one [`NotificationSet`] describing what
//! changed. Propagating it to other nodes is left to the caller.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::diff::Change;
use super::model::Model;

/// The type of a notification set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    /// A new entry; carries the new value only.
    Add,
    /// A full overwrite of an existing entry; carries old and new values.
    Replace,
    /// A removed entry; carries the old value only.
    Delete,
    /// A partial update; carries per-property old and new values.
    Update,
}

impl NotificationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Replace => "replace",
            Self::Delete => "delete",
            Self::Update => "update",
        }
    }
}

impl fmt::Display for NotificationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One property delta. Values are encoded snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationEntry {
    pub property_id: String,
    pub old_value: Option<Vec<u8>>,
    pub new_value: Option<Vec<u8>>,
}

/// Structured description of one mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationSet {
    pub kind: NotificationType,
    pub service_name: String,
    pub service_area: u8,
    pub model_type: String,
    pub model_key: String,
    pub source: String,
    pub sequence: u32,
    pub change_count: u32,
    pub entries: Vec<NotificationEntry>,
}

impl NotificationSet {
    /// Decode the old object snapshot of a Replace or Delete set.
    pub fn decode_old<T: DeserializeOwned>(&self) -> Result<Option<T>, serde_json::Error> {
        self.snapshot(|entry| entry.old_value.as_deref())
    }

    /// Decode the new object snapshot of an Add or Replace set.
    pub fn decode_new<T: DeserializeOwned>(&self) -> Result<Option<T>, serde_json::Error> {
        self.snapshot(|entry| entry.new_value.as_deref())
    }

    fn snapshot<T, F>(&self, pick: F) -> Result<Option<T>, serde_json::Error>
    where
        T: DeserializeOwned,
        F: Fn(&NotificationEntry) -> Option<&[u8]>,
    {
        if self.kind == NotificationType::Update {
            return Ok(None);
        }
        match self.entries.first().and_then(pick) {
            Some(bytes) => serde_json::from_slice(bytes).map(Some),
            None => Ok(None),
        }
    }
}

/// Identity stamped on every notification a cache produces.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceIdentity {
    pub service_name: String,
    pub service_area: u8,
    pub source: String,
}

/// Encoded payload waiting for a sequence number.
#[derive(Debug)]
pub(crate) struct PendingNotification {
    kind: NotificationType,
    model_type: &'static str,
    model_key: String,
    entries: Vec<NotificationEntry>,
}

/// Builds notification sets and owns the per-cache sequence counter.
///
/// Lives inside the cache's locked state, so sequences are assigned in the
/// same order mutations are applied.
#[derive(Debug)]
pub(crate) struct NotificationBuilder {
    identity: ServiceIdentity,
    sequence: u32,
}

impl NotificationBuilder {
    pub(crate) fn new(identity: ServiceIdentity) -> Self {
        Self {
            identity,
            sequence: 0,
        }
    }

    pub(crate) fn identity(&self) -> &ServiceIdentity {
        &self.identity
    }

    pub(crate) fn set_target(&mut self, service_name: &str, service_area: u8) {
        self.identity.service_name = service_name.to_string();
        self.identity.service_area = service_area;
    }

    /// Sequence the next sealed notification will carry.
    pub(crate) fn next_sequence(&self) -> u32 {
        self.sequence
    }

    pub(crate) fn prepare_add<T: Model>(
        &self,
        key: &str,
        new: &T,
    ) -> Result<PendingNotification, serde_json::Error> {
        let entry = NotificationEntry {
            property_id: object_property_id::<T>(),
            old_value: None,
            new_value: Some(serde_json::to_vec(new)?),
        };
        Ok(pending::<T>(NotificationType::Add, key, vec![entry]))
    }

    pub(crate) fn prepare_replace<T: Model>(
        &self,
        key: &str,
        old: &T,
        new: &T,
    ) -> Result<PendingNotification, serde_json::Error> {
        let entry = NotificationEntry {
            property_id: object_property_id::<T>(),
            old_value: Some(serde_json::to_vec(old)?),
            new_value: Some(serde_json::to_vec(new)?),
        };
        Ok(pending::<T>(NotificationType::Replace, key, vec![entry]))
    }

    pub(crate) fn prepare_delete<T: Model>(
        &self,
        key: &str,
        old: &T,
    ) -> Result<PendingNotification, serde_json::Error> {
        let entry = NotificationEntry {
            property_id: object_property_id::<T>(),
            old_value: Some(serde_json::to_vec(old)?),
            new_value: None,
        };
        Ok(pending::<T>(NotificationType::Delete, key, vec![entry]))
    }

    pub(crate) fn prepare_update<T: Model>(
        &self,
        key: &str,
        changes: &[Change],
    ) -> Result<PendingNotification, serde_json::Error> {
        let entries = changes
            .iter()
            .map(|change| -> Result<NotificationEntry, serde_json::Error> {
                Ok(NotificationEntry {
                    property_id: property_id(T::model_type(), change.field),
                    old_value: Some(serde_json::to_vec(&change.old)?),
                    new_value: Some(serde_json::to_vec(&change.new)?),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(pending::<T>(NotificationType::Update, key, entries))
    }

    /// Assign the next sequence number and produce the final set.
    pub(crate) fn seal(&mut self, pending: PendingNotification) -> NotificationSet {
        let sequence = self.sequence;
        self.sequence = self.sequence.wrapping_add(1);

        NotificationSet {
            kind: pending.kind,
            service_name: self.identity.service_name.clone(),
            service_area: self.identity.service_area,
            model_type: pending.model_type.to_string(),
            model_key: pending.model_key,
            source: self.identity.source.clone(),
            sequence,
            change_count: u32::try_from(pending.entries.len()).unwrap_or(u32::MAX),
            entries: pending.entries,
        }
    }
}

fn pending<T: Model>(
    kind: NotificationType,
    key: &str,
    entries: Vec<NotificationEntry>,
) -> PendingNotification {
    PendingNotification {
        kind,
        model_type: T::model_type(),
        model_key: key.to_string(),
        entries,
    }
}

/// Property id of a single field, e.g. `widget.v`.
pub fn property_id(model_type: &str, field: &str) -> String {
    format!("{}.{field}", model_type.to_lowercase())
}

fn object_property_id<T: Model>() -> String {
    T::model_type().to_lowercase()
}
