//! Overrides and record post-processing.
//!
//! Overrides patch flattened records by exact name or by `r"<regex>"`.
//! Post-processing then resolves permissions and access bits, evaluates the
//! scaled values and derives the compressed records used for loop
//! generation.

use regex::Regex;
use serde_json::Value;
use tracing::{debug, trace};

use super::Resolver;
use crate::error::{Error, Result};
use crate::expr::{evaluate_value, Env, ExprError, Scalar};
use crate::model::{CompressInfo, PermissionUsers, Props, Record};

/// Permissions fit in one nibble of the access byte.
const PERMISSION_LIMIT: i128 = 0x10;

/// Keys an override may not set because they are computed.
const COMPUTED_KEYS: &[&str] = &[
    "name",
    "map_offset",
    "type",
    "array_size",
    "bits",
    "enum",
    "reserved",
    "readable",
    "writable",
    "default_changed",
    "compressed_offset",
    "compressed_info",
];

/// Keys evaluated and scaled during post-processing.
const SCALED_KEYS: [&str; 3] = ["default", "min", "max"];

enum Selector {
    Exact(String),
    Pattern(Regex),
}

impl Selector {
    fn parse(key: &str) -> Result<Self> {
        match key.strip_prefix("r\"").and_then(|rest| rest.strip_suffix('"')) {
            Some(pattern) => Ok(Self::Pattern(Regex::new(pattern)?)),
            None => Ok(Self::Exact(key.to_string())),
        }
    }

    fn matches(&self, name: &str) -> bool {
        match self {
            Self::Exact(exact) => exact == name,
            Self::Pattern(re) => re.is_match(name),
        }
    }
}

fn is_computed(key: &str) -> bool {
    COMPUTED_KEYS.contains(&key) || key.starts_with("resolved_")
}

fn apply_patch(record: &mut Record, patch: &Props) {
    let changed = patch
        .get("default")
        .is_some_and(|new| record.props.get("default") != Some(new));
    for (key, value) in patch {
        if key == "description" {
            record.description = match value {
                Value::Null => None,
                Value::String(s) => Some(s.clone()),
                other => Some(other.to_string()),
            };
        } else {
            record.props.insert(key.clone(), value.clone());
        }
    }
    record.default_changed = Some(changed);
}

impl Resolver {
    /// Apply the `overrides` section to the flattened maps.
    ///
    /// # Errors
    ///
    /// Returns an error if an override names an unknown map, sets a computed
    /// key, has an invalid pattern or matches no record.
    pub fn apply_overrides(&mut self, section: &Props) -> Result<()> {
        for (key, value) in section {
            let Value::Object(patch) = value else {
                return Err(Error::override_error(key, "must be a mapping"));
            };
            let mut patch = patch.clone();
            let map_name = match patch.remove("map") {
                Some(Value::String(name)) => name,
                Some(other) => {
                    return Err(Error::override_error(key, format!("invalid map {other}")));
                }
                None => self
                    .default_map
                    .clone()
                    .ok_or_else(|| Error::override_error(key, "no map given and no default map"))?,
            };
            if let Some(computed) = patch.keys().find(|k| is_computed(k)) {
                return Err(Error::override_error(key, format!("{computed} cannot be overridden")));
            }

            let selector = Selector::parse(key)?;
            let map = self
                .maps
                .iter_mut()
                .find(|m| m.name == map_name)
                .ok_or_else(|| Error::UnknownMap(map_name.clone()))?;
            let mut matched = 0usize;
            for record in map.records.iter_mut().filter(|r| selector.matches(&r.name)) {
                apply_patch(record, &patch);
                matched += 1;
            }
            if matched == 0 {
                return Err(Error::override_error(key, "override did not match anything"));
            }
            debug!(selector = %key, map = %map_name, matched, "Applied override");
        }
        Ok(())
    }

    /// Resolve permissions and scaled values of every record, then derive
    /// the compressed records.
    ///
    /// # Errors
    ///
    /// Returns an error if a permission names an unknown user or does not
    /// fit in 4 bits, or a value fails to evaluate or scale.
    pub fn resolve_records(&mut self) -> Result<()> {
        let empty = PermissionUsers::default();
        let users = self
            .metadata
            .as_ref()
            .map_or(&empty, |m| &m.resolved_permission_users);
        for map in &mut self.maps {
            for record in &mut map.records {
                resolve_access(record, users)?;
                resolve_values(record, &self.env)?;
            }
            map.compressed_records = compress(&map.records);
            trace!(map = %map.name, compressed = map.compressed_records.len(), "Compressed records");
        }
        Ok(())
    }
}

fn resolve_permission(record: &Record, permission: &'static str, users: &PermissionUsers) -> Result<u8> {
    let invalid = |message: String| Error::InvalidPermission {
        permission,
        record: record.name.clone(),
        message,
    };
    let values = match record.props.get(permission) {
        None | Some(Value::Null) => return Ok(0),
        Some(Value::Array(items)) => items.iter().collect::<Vec<_>>(),
        Some(other) => vec![other],
    };

    let mut bits: i128 = 0;
    for value in values {
        match value {
            Value::Null => {}
            Value::String(user) => {
                let bit = users
                    .bit(user)
                    .ok_or_else(|| invalid(format!("unknown permission user {user}")))?;
                bits |= i128::from(bit);
            }
            other => {
                let bit = Scalar::from_json(other)
                    .and_then(|s| s.truncated().as_int())
                    .filter(|b| *b >= 0)
                    .ok_or_else(|| invalid(format!("invalid permission {other}")))?;
                bits |= bit;
            }
        }
    }
    if bits >= PERMISSION_LIMIT {
        return Err(invalid("must be less than 4 bits".to_string()));
    }
    u8::try_from(bits).map_err(|_| invalid(format!("invalid permission {bits}")))
}

fn resolve_access(record: &mut Record, users: &PermissionUsers) -> Result<()> {
    let read = resolve_permission(record, "read_permission", users)?;
    let write = resolve_permission(record, "write_permission", users)?;
    record.resolved_read_permission = read;
    record.resolved_write_permission = write;
    record.readable = read != 0;
    record.writable = write != 0;
    record.resolved_access = write | (read << 4);
    Ok(())
}

fn scale(value: &Scalar, factor: &Scalar, integral: bool) -> std::result::Result<Scalar, ExprError> {
    let type_error = || ExprError::Type {
        op: "/",
        lhs: value.type_name(),
        rhs: factor.type_name(),
    };
    let numerator = value.as_f64().ok_or_else(type_error)?;
    let denominator = factor.as_f64().ok_or_else(type_error)?;
    if denominator == 0.0 {
        return Err(ExprError::DivisionByZero);
    }
    let scaled = Scalar::Float(numerator / denominator);
    Ok(if integral { scaled.truncated() } else { scaled })
}

fn resolve_values(record: &mut Record, env: &Env) -> Result<()> {
    let lookup = |record: &Record, key: &str| -> Result<Option<Scalar>> {
        match record.props.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => evaluate_value(value, env)
                .map(Some)
                .map_err(|e| Error::eval(format!("{key} of {}", record.name), e)),
        }
    };

    let factor = lookup(record, "scaling_factor")?;
    let integral = record.is_integral();
    let mut resolved = [None, None, None];
    let mut scaled = [None, None, None];
    for (i, key) in SCALED_KEYS.iter().enumerate() {
        let Some(value) = lookup(record, key)? else {
            continue;
        };
        if let Some(factor) = &factor {
            let result = scale(&value, factor, integral)
                .map_err(|e| Error::eval(format!("scaled {key} of {}", record.name), e))?;
            scaled[i] = Some(result);
        }
        resolved[i] = Some(value);
    }

    let [default, min, max] = resolved;
    let [scaled_default, scaled_min, scaled_max] = scaled;
    record.resolved_scaling_factor = factor;
    record.resolved_default = default;
    record.resolved_min = min;
    record.resolved_max = max;
    record.resolved_scaled_default = scaled_default;
    record.resolved_scaled_min = scaled_min;
    record.resolved_scaled_max = scaled_max;
    Ok(())
}

/// Loop index name of an array level: `n`, `m`, `l`, ...
fn index_name(level: usize) -> String {
    u8::try_from(level)
        .ok()
        .and_then(|l| b'n'.checked_sub(l))
        .filter(u8::is_ascii_lowercase)
        .map_or_else(|| format!("i{level}"), |c| char::from(c).to_string())
}

/// Keep the first item of every array and rewrite it over loop indices.
pub(super) fn compress(records: &[Record]) -> Vec<Record> {
    let mut compressed: Vec<Record> = records
        .iter()
        .filter(|r| r.is_first_of_arrays())
        .map(|record| {
            let mut crec = record.clone();
            let mut offset = record.map_offset.to_string();
            let mut info = Vec::with_capacity(record.arrays.len());
            for (level, array) in record.arrays.iter().enumerate() {
                let idx_name = index_name(level);
                crec.name = crec.name.replacen("[0]", &format!("[{idx_name}]"), 1);
                offset.push_str(&format!("+{}*{idx_name}", array.stride));
                info.push(CompressInfo {
                    size: array.size,
                    stride: array.stride,
                    uid: array.uid,
                    idx_name,
                    start: false,
                    end: false,
                });
            }
            crec.compressed_offset = Some(offset);
            crec.compressed_info = (!info.is_empty()).then_some(info);
            crec
        })
        .collect();

    let uid_at = |records: &[Record], idx: Option<usize>, level: usize| -> Option<usize> {
        let record = records.get(idx?)?;
        record.compressed_info.as_ref()?.get(level).map(|i| i.uid)
    };
    for idx in 0..compressed.len() {
        let levels = compressed[idx].compressed_info.as_ref().map_or(0, Vec::len);
        for level in 0..levels {
            let uid = uid_at(&compressed, Some(idx), level);
            let start = uid_at(&compressed, idx.checked_sub(1), level) != uid;
            let end = uid_at(&compressed, Some(idx + 1), level) != uid;
            if let Some(info) = compressed[idx]
                .compressed_info
                .as_mut()
                .and_then(|i| i.get_mut(level))
            {
                info.start = start;
                info.end = end;
            }
        }
    }
    compressed
}
