//! Ordering for query plan rows.
//!
//! Dotted IPv4 strings compare as big-endian `u32` so `10.0.0.2` sorts before
//! `10.0.0.10`. Numbers compare numerically when both sides share a concrete
//! type, strings compare lexicographically, and anything else is treated as
//! equal so the stable sort keeps scan order.

use std::cmp::Ordering;
use std::net::Ipv4Addr;

use super::model::FieldValue;

/// Compare two sort values.
pub fn compare_values(left: &FieldValue, right: &FieldValue) -> Ordering {
    use FieldValue::*;

    match (left, right) {
        (Str(a), Str(b)) => compare_strings(a, b),
        (I32(a), I32(b)) => a.cmp(b),
        (I64(a), I64(b)) => a.cmp(b),
        (U32(a), U32(b)) => a.cmp(b),
        (U64(a), U64(b)) => a.cmp(b),
        (F32(a), F32(b)) => a.partial_cmp(b).unwrap_or(Ordering::Equal),
        (F64(a), F64(b)) => a.partial_cmp(b).unwrap_or(Ordering::Equal),
        (Bool(a), Bool(b)) => a.cmp(b),
        _ => Ordering::Equal,
    }
}

/// Compare optional sort values; a missing side compares equal.
pub fn compare_optional(left: Option<&FieldValue>, right: Option<&FieldValue>) -> Ordering {
    match (left, right) {
        (Some(a), Some(b)) => compare_values(a, b),
        _ => Ordering::Equal,
    }
}

/// Compare two strings, treating IPv4 addresses numerically.
pub fn compare_strings(left: &str, right: &str) -> Ordering {
    match (parse_ipv4(left), parse_ipv4(right)) {
        (Some(a), Some(b)) => a.cmp(&b),
        _ => left.cmp(right),
    }
}

fn parse_ipv4(value: &str) -> Option<u32> {
    value.parse::<Ipv4Addr>().ok().map(u32::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ipv4_strings_sort_numerically() {
        assert_eq!(compare_strings("10.0.0.2", "10.0.0.10"), Ordering::Less);
        assert_eq!(compare_strings("192.168.1.1", "10.0.0.1"), Ordering::Greater);

        let mut keys = vec!["10.0.0.10", "10.0.0.2", "10.0.0.1"];
        keys.sort_by(|a, b| compare_strings(a, b));
        assert_eq!(keys, vec!["10.0.0.1", "10.0.0.2", "10.0.0.10"]);
    }

    #[test]
    fn mixed_ip_and_text_falls_back_to_lexicographic() {
        assert_eq!(compare_strings("10.0.0.2", "alpha"), Ordering::Less);
        assert_eq!(compare_strings("b", "a"), Ordering::Greater);
    }

    #[test]
    fn numbers_compare_by_concrete_type() {
        assert_eq!(
            compare_values(&FieldValue::I64(2), &FieldValue::I64(10)),
            Ordering::Less
        );
        assert_eq!(
            compare_values(&FieldValue::F32(1.5), &FieldValue::F32(0.5)),
            Ordering::Greater
        );
        assert_eq!(
            compare_values(&FieldValue::U64(3), &FieldValue::U64(3)),
            Ordering::Equal
        );
    }

    #[test]
    fn unmatched_types_compare_equal() {
        assert_eq!(
            compare_values(&FieldValue::I32(1), &FieldValue::I64(2)),
            Ordering::Equal
        );
        assert_eq!(
            compare_values(&FieldValue::Null, &FieldValue::from("a")),
            Ordering::Equal
        );
        assert_eq!(
            compare_optional(None, Some(&FieldValue::I32(1))),
            Ordering::Equal
        );
    }
}
