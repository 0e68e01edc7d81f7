//! Data model of memory map descriptions.
//!
//! [`raw`] holds the shapes read from the description files. The resolved
//! types are what the resolver produces and the exporters consume.

pub mod raw;
mod resolved;

pub(crate) use resolved::ArrayLevel;
pub use resolved::{
    Bitfield, BitfieldMember, CompressInfo, Define, Element, ElementKind, EnumMember, Enumeration,
    MemoryMap, MemoryMapConfig, Metadata, PermissionUsers, Record, Typedef,
};

/// Free-form keys of a description entry, in insertion order.
pub type Props = serde_json::Map<String, serde_json::Value>;

/// Rebuild every object of `value` with its keys sorted.
#[must_use]
pub fn sort_keys(value: serde_json::Value) -> serde_json::Value {
    use serde_json::Value;
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            Value::Object(entries.into_iter().map(|(k, v)| (k, sort_keys(v))).collect())
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sort_keys).collect()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sort_keys_recursive() {
        let value = sort_keys(json!({"b": {"z": 1, "a": 2}, "a": [{"y": 1, "x": 2}]}));
        assert_eq!(
            serde_json::to_string(&value).unwrap(),
            r#"{"a":[{"x":2,"y":1}],"b":{"a":2,"z":1}}"#
        );
    }
}
