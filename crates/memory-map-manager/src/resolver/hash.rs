//! Semantic hashes of the resolved maps.
//!
//! Hashes are taken over a canonical text form: object keys sorted at every
//! level and every scalar written as a quoted string. Key order and value
//! representation in the description therefore do not change the hash.

use serde_json::Value;
use tracing::debug;

use super::Resolver;
use crate::error::{Error, Result};
use crate::model::{MemoryMap, Props};

/// Record keys that shape the firmware layout.
const FW_KEYS: &[&str] = &[
    "name",
    "resolved_type",
    "resolved_array_size",
    "resolved_type_size",
    "resolved_total_size",
    "resolved_offset",
];

/// Number of hex digits kept from the digest.
const HASH_LEN: usize = 32;

fn quote(out: &mut String, text: &str) {
    out.push('\'');
    for c in text.chars() {
        if matches!(c, '\'' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('\'');
}

fn canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                quote(out, key);
                out.push_str(": ");
                canonical(&map[key.as_str()], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                canonical(item, out);
            }
            out.push(']');
        }
        Value::Null => quote(out, "None"),
        Value::Bool(true) => quote(out, "True"),
        Value::Bool(false) => quote(out, "False"),
        Value::Number(n) => quote(out, &n.to_string()),
        Value::String(s) => quote(out, s),
    }
}

/// Hash a JSON value independently of key order.
#[must_use]
pub fn semantic_hash(value: &Value) -> String {
    let mut text = String::new();
    canonical(value, &mut text);
    let digest = blake3::hash(text.as_bytes()).to_hex();
    digest.as_str()[..HASH_LEN].to_string()
}

fn records_table(
    maps: &[MemoryMap],
    keep: impl Fn(&str) -> bool,
) -> Result<Value> {
    let mut table = Props::new();
    for map in maps {
        let mut records = Vec::with_capacity(map.records.len());
        for record in &map.records {
            let object: Props = record
                .to_object()?
                .into_iter()
                .filter(|(key, _)| keep(key))
                .collect();
            records.push(Value::Object(object));
        }
        table.insert(map.name.clone(), Value::Array(records));
    }
    Ok(Value::Object(table))
}

impl Resolver {
    /// Compute `full_hash`, `fw_hash` and `sw_hash`.
    ///
    /// # Errors
    ///
    /// Returns an error if metadata was not resolved or a record cannot be
    /// serialized.
    pub fn resolve_hashes(&mut self) -> Result<()> {
        let full = semantic_hash(&records_table(&self.maps, |_| true)?);
        let fw = semantic_hash(&records_table(&self.maps, |key| FW_KEYS.contains(&key))?);
        let sw = semantic_hash(&records_table(&self.maps, |key| {
            FW_KEYS.contains(&key) || key == "description"
        })?);

        let metadata = self
            .metadata
            .as_mut()
            .ok_or(Error::MissingSection("metadata"))?;
        debug!(full = %full, fw = %fw, sw = %sw, "Computed map hashes");
        metadata.full_hash = full;
        metadata.fw_hash = fw;
        metadata.sw_hash = sw;
        Ok(())
    }
}
