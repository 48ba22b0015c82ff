//! Field-level diffing between two values of the same model.

use super::error::FieldError;
use super::model::{FieldValue, Model};

/// How fields of the incoming value are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffMode {
    /// Every field of the incoming value is authoritative, zero values included.
    Replace,
    /// Only non-zero fields of the incoming value are applied.
    Patch,
}

/// One property that differs between the stored and the incoming value.
#[derive(Debug, Clone, PartialEq)]
pub struct Change {
    pub field: &'static str,
    pub old: FieldValue,
    pub new: FieldValue,
}

/// Compute the ordered list of changes that turn `old` into `new`.
pub fn diff<T: Model>(old: &T, new: &T, mode: DiffMode) -> Result<Vec<Change>, FieldError> {
    let mut changes = Vec::new();

    for &field in T::field_names() {
        let before = read(old, field)?;
        let after = read(new, field)?;

        if mode == DiffMode::Patch && after.is_zero() {
            continue;
        }
        if !before.is_null() && !after.is_null() && before.kind_name() != after.kind_name() {
            return Err(FieldError::TypeMismatch {
                field: field.to_string(),
                expected: before.kind_name(),
                found: after.kind_name(),
            });
        }
        if before != after {
            changes.push(Change {
                field,
                old: before,
                new: after,
            });
        }
    }

    Ok(changes)
}

/// Apply `changes` to a copy of `target`; `target` itself is never touched.
pub fn apply<T: Model>(target: &T, changes: &[Change]) -> Result<T, FieldError> {
    let mut updated = target.clone();
    for change in changes {
        updated.set_field(change.field, change.new.clone())?;
    }
    Ok(updated)
}

fn read<T: Model>(value: &T, field: &str) -> Result<FieldValue, FieldError> {
    value.field(field).ok_or_else(|| FieldError::UnknownField {
        model_type: T::model_type(),
        field: field.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use serde::Serialize;

    use super::*;

    #[derive(Debug, Clone, Default, PartialEq, Serialize)]
    struct Port {
        id: String,
        speed: u32,
        description: String,
        enabled: bool,
    }

    crate::model!(Port as "Port" { id, speed, description, enabled });

    fn port(speed: u32, description: &str, enabled: bool) -> Port {
        Port {
            id: "eth0".to_string(),
            speed,
            description: description.to_string(),
            enabled,
        }
    }

    #[test]
    fn replace_mode_overwrites_with_zero_values() {
        let old = port(100, "uplink", true);
        let new = port(100, "", false);

        let changes = diff(&old, &new, DiffMode::Replace).expect("diff");
        assert_eq!(
            changes,
            vec![
                Change {
                    field: "description",
                    old: FieldValue::from("uplink"),
                    new: FieldValue::from(""),
                },
                Change {
                    field: "enabled",
                    old: FieldValue::Bool(true),
                    new: FieldValue::Bool(false),
                },
            ]
        );
    }

    #[test]
    fn patch_mode_ignores_zero_values() {
        let old = port(100, "uplink", true);
        let new = port(1000, "", false);

        let changes = diff(&old, &new, DiffMode::Patch).expect("diff");
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].field, "speed");
        assert_eq!(changes[0].new, FieldValue::U32(1000));
    }

    #[test]
    fn identical_values_have_no_changes() {
        let value = port(10, "a", true);
        assert!(diff(&value, &value.clone(), DiffMode::Replace).unwrap().is_empty());
        assert!(diff(&value, &value.clone(), DiffMode::Patch).unwrap().is_empty());
    }

    #[test]
    fn apply_leaves_target_untouched() {
        let old = port(100, "uplink", true);
        let changes = diff(&old, &port(10, "", true), DiffMode::Patch).unwrap();

        let updated = apply(&old, &changes).expect("apply");
        assert_eq!(updated.speed, 10);
        assert_eq!(updated.description, "uplink");
        assert_eq!(old.speed, 100);
    }

    #[test]
    fn apply_reports_bad_change_without_partial_result() {
        let old = port(100, "uplink", true);
        let changes = vec![
            Change {
                field: "speed",
                old: FieldValue::U32(100),
                new: FieldValue::U32(1),
            },
            Change {
                field: "enabled",
                old: FieldValue::Bool(true),
                new: FieldValue::from("yes"),
            },
        ];

        assert!(matches!(
            apply(&old, &changes),
            Err(FieldError::TypeMismatch { .. })
        ));
        assert_eq!(old.speed, 100);
    }
}
