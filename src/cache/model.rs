//! Model accessor table.
//!
//! A cache never inspects its values through runtime reflection. Each model
//! type exposes a static table of named fields through [`Model`], usually
//! generated with the [`model!`](crate::model) macro, and every key lookup,
//! diff, filter and sort goes through that table.

use std::collections::HashMap;
use std::fmt;

use serde::Serialize;

use super::error::FieldError;

/// A dynamically typed field value read from a model's accessor table.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Null,
    Bool(bool),
    I32(i32),
    I64(i64),
    U32(u32),
    U64(u64),
    F32(f32),
    F64(f64),
    Str(String),
}

impl FieldValue {
    /// Name of the variant, used in type mismatch errors.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::I32(_) => "i32",
            Self::I64(_) => "i64",
            Self::U32(_) => "u32",
            Self::U64(_) => "u64",
            Self::F32(_) => "f32",
            Self::F64(_) => "f64",
            Self::Str(_) => "string",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// True for the zero value of the variant (`null`, `false`, `0`, `""`).
    ///
    /// Patch-mode diffs skip zero fields.
    pub fn is_zero(&self) -> bool {
        match self {
            Self::Null => true,
            Self::Bool(value) => !value,
            Self::I32(value) => *value == 0,
            Self::I64(value) => *value == 0,
            Self::U32(value) => *value == 0,
            Self::U64(value) => *value == 0,
            Self::F32(value) => *value == 0.0,
            Self::F64(value) => *value == 0.0,
            Self::Str(value) => value.is_empty(),
        }
    }

    /// Rendering used when the value participates in a key.
    ///
    /// `null` and the empty string have no key form.
    pub fn to_key_part(&self) -> Option<String> {
        match self {
            Self::Null => None,
            Self::Str(value) if value.is_empty() => None,
            Self::Str(value) => Some(value.clone()),
            other => Some(other.to_string()),
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Bool(value) => write!(f, "{value}"),
            Self::I32(value) => write!(f, "{value}"),
            Self::I64(value) => write!(f, "{value}"),
            Self::U32(value) => write!(f, "{value}"),
            Self::U64(value) => write!(f, "{value}"),
            Self::F32(value) => write!(f, "{value}"),
            Self::F64(value) => write!(f, "{value}"),
            Self::Str(value) => f.write_str(value),
        }
    }
}

macro_rules! scalar_conversions {
    ($($ty:ty => $variant:ident),+ $(,)?) => {
        $(
            impl From<$ty> for FieldValue {
                fn from(value: $ty) -> Self {
                    Self::$variant(value)
                }
            }

            impl FromFieldValue for $ty {
                const KIND: &'static str = stringify!($ty);

                fn from_field_value(field: &str, value: FieldValue) -> Result<Self, FieldError> {
                    match value {
                        FieldValue::$variant(inner) => Ok(inner),
                        other => Err(mismatch::<Self>(field, &other)),
                    }
                }
            }
        )+
    };
}

scalar_conversions! {
    bool => Bool,
    i32 => I32,
    i64 => I64,
    u32 => U32,
    u64 => U64,
    f32 => F32,
    f64 => F64,
    String => Str,
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl<V> From<Option<V>> for FieldValue
where
    FieldValue: From<V>,
{
    fn from(value: Option<V>) -> Self {
        value.map_or(Self::Null, Self::from)
    }
}

/// Conversion from a [`FieldValue`] back into a concrete field type.
pub trait FromFieldValue: Sized {
    /// Kind reported in mismatch errors.
    const KIND: &'static str;

    fn from_field_value(field: &str, value: FieldValue) -> Result<Self, FieldError>;
}

impl<V: FromFieldValue> FromFieldValue for Option<V> {
    const KIND: &'static str = V::KIND;

    fn from_field_value(field: &str, value: FieldValue) -> Result<Self, FieldError> {
        match value {
            FieldValue::Null => Ok(None),
            other => V::from_field_value(field, other).map(Some),
        }
    }
}

fn mismatch<V: FromFieldValue>(field: &str, found: &FieldValue) -> FieldError {
    FieldError::TypeMismatch {
        field: field.to_string(),
        expected: V::KIND,
        found: found.kind_name(),
    }
}

/// Overwrites `slot` with the decoded `value`. Used by [`model!`](crate::model).
pub fn assign_field<V: FromFieldValue>(
    slot: &mut V,
    field: &str,
    value: FieldValue,
) -> Result<(), FieldError> {
    *slot = V::from_field_value(field, value)?;
    Ok(())
}

/// A type that can be stored in a [`crate::cache::Cache`].
///
/// The accessor table must be total over [`Model::field_names`]: `field` returns
/// `Some` for every listed name and `set_field` accepts each of them.
pub trait Model: Clone + Serialize + Send + Sync + 'static {
    /// Registered type name, used for key resolution and notifications.
    fn model_type() -> &'static str;

    /// Field names in declaration order.
    fn field_names() -> &'static [&'static str];

    fn field(&self, name: &str) -> Option<FieldValue>;

    fn set_field(&mut self, name: &str, value: FieldValue) -> Result<(), FieldError>;
}

/// Generates a [`Model`] accessor table for a struct with named fields.
///
/// ```ignore
/// #[derive(Clone, Serialize)]
/// struct Widget { id: String, v: i64 }
///
/// dcache::model!(Widget as "Widget" { id, v });
/// ```
#[macro_export]
macro_rules! model {
    ($ty:ty as $name:literal { $($field:ident),+ $(,)? }) => {
        impl $crate::Model for $ty {
            fn model_type() -> &'static str {
                $name
            }

            fn field_names() -> &'static [&'static str] {
                &[$(stringify!($field)),+]
            }

            fn field(&self, name: &str) -> ::std::option::Option<$crate::FieldValue> {
                match name {
                    $(stringify!($field) => ::std::option::Option::Some(
                        $crate::FieldValue::from(::std::clone::Clone::clone(&self.$field)),
                    ),)+
                    _ => ::std::option::Option::None,
                }
            }

            fn set_field(
                &mut self,
                name: &str,
                value: $crate::FieldValue,
            ) -> ::std::result::Result<(), $crate::FieldError> {
                match name {
                    $(stringify!($field) => $crate::cache::assign_field(&mut self.$field, name, value),)+
                    _ => ::std::result::Result::Err($crate::FieldError::UnknownField {
                        model_type: $name,
                        field: name.to_string(),
                    }),
                }
            }
        }
    };
}

/// Primary and unique key field names declared for a model type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyFields {
    pub primary: Vec<String>,
    pub unique: Vec<String>,
}

impl KeyFields {
    pub fn new(primary: &[&str], unique: &[&str]) -> Self {
        Self {
            primary: primary.iter().map(|name| (*name).to_string()).collect(),
            unique: unique.iter().map(|name| (*name).to_string()).collect(),
        }
    }
}

/// Resolves the key fields for a registered model type name.
pub trait Introspector: Send + Sync {
    fn key_fields(&self, model_type: &str) -> Option<KeyFields>;
}

/// Introspector backed by an explicit registry.
#[derive(Debug, Default, Clone)]
pub struct StaticIntrospector {
    types: HashMap<String, KeyFields>,
}

impl StaticIntrospector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register key fields for `model_type`, replacing any previous entry.
    pub fn register(mut self, model_type: &str, primary: &[&str], unique: &[&str]) -> Self {
        self.types
            .insert(model_type.to_string(), KeyFields::new(primary, unique));
        self
    }
}

impl Introspector for StaticIntrospector {
    fn key_fields(&self, model_type: &str) -> Option<KeyFields> {
        self.types.get(model_type).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Default, PartialEq, Serialize)]
    struct Sensor {
        id: String,
        reading: f64,
        label: Option<String>,
    }

    crate::model!(Sensor as "Sensor" { id, reading, label });

    #[test]
    fn accessor_table_reads_fields() {
        let sensor = Sensor {
            id: "s1".to_string(),
            reading: 2.5,
            label: None,
        };

        assert_eq!(Sensor::model_type(), "Sensor");
        assert_eq!(Sensor::field_names(), &["id", "reading", "label"]);
        assert_eq!(sensor.field("id"), Some(FieldValue::Str("s1".to_string())));
        assert_eq!(sensor.field("reading"), Some(FieldValue::F64(2.5)));
        assert_eq!(sensor.field("label"), Some(FieldValue::Null));
        assert_eq!(sensor.field("missing"), None);
    }

    #[test]
    fn accessor_table_writes_fields() {
        let mut sensor = Sensor::default();
        sensor
            .set_field("label", FieldValue::from("north"))
            .expect("label accepts strings");
        sensor
            .set_field("reading", FieldValue::F64(1.0))
            .expect("reading accepts f64");

        assert_eq!(sensor.label.as_deref(), Some("north"));
        assert_eq!(sensor.reading, 1.0);
    }

    #[test]
    fn set_field_rejects_wrong_kind() {
        let mut sensor = Sensor::default();
        let err = sensor
            .set_field("reading", FieldValue::Str("hot".to_string()))
            .expect_err("kind mismatch");

        assert_eq!(
            err,
            FieldError::TypeMismatch {
                field: "reading".to_string(),
                expected: "f64",
                found: "string",
            }
        );
        assert!(matches!(
            sensor.set_field("nope", FieldValue::Null),
            Err(FieldError::UnknownField { .. })
        ));
    }

    #[test]
    fn zero_values() {
        assert!(FieldValue::Null.is_zero());
        assert!(FieldValue::I64(0).is_zero());
        assert!(FieldValue::Str(String::new()).is_zero());
        assert!(!FieldValue::Bool(true).is_zero());
        assert!(!FieldValue::U32(7).is_zero());
    }

    #[test]
    fn key_parts_skip_empty_values() {
        assert_eq!(FieldValue::Null.to_key_part(), None);
        assert_eq!(FieldValue::from("").to_key_part(), None);
        assert_eq!(FieldValue::I32(0).to_key_part(), Some("0".to_string()));
        assert_eq!(FieldValue::from("a").to_key_part(), Some("a".to_string()));
    }

    #[test]
    fn static_introspector_lookup() {
        let introspector = StaticIntrospector::new().register("Sensor", &["id"], &["label"]);

        let fields = introspector.key_fields("Sensor").expect("registered");
        assert_eq!(fields.primary, vec!["id".to_string()]);
        assert_eq!(fields.unique, vec!["label".to_string()]);
        assert!(introspector.key_fields("Other").is_none());
    }
}
