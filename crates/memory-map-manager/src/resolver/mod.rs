//! Resolution of a memory map description into a fully computed memory map.
//!
//! The [`Resolver`] runs in stages, each consuming one section of the
//! description: defines, metadata, enums, bitfields, typedefs, maps,
//! overrides, record post-processing and finally hashes. Later stages rely on
//! the results of earlier ones, so [`resolve`] always runs them in that order.
//! The stages are public so tests can drive a partial description.

mod bitfields;
mod defines;
mod enums;
mod hash;
mod maps;
mod records;
mod references;
mod typedefs;

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info};

pub use hash::semantic_hash;

use crate::error::{Error, Result};
use crate::expr::{self, Env, Scalar};
use crate::importer::Description;
use crate::model::{
    Bitfield, Define, Enumeration, MemoryMap, MemoryMapConfig, Metadata, Props, Typedef,
};
use crate::primitive::Primitive;

/// Resolve a merged description into a memory map configuration.
///
/// # Errors
///
/// Returns an error if any stage fails: unresolvable defines or types,
/// out of range values, unknown types or users, overrides that match no
/// record, or a missing `metadata` or `generated_maps` section.
pub fn resolve(description: &Description) -> Result<MemoryMapConfig> {
    let empty = Props::new();
    let section = |name: &str| description.section(name).unwrap_or(&empty);

    let mut resolver = Resolver::new();
    resolver.resolve_defines(section("defines"))?;
    resolver.resolve_metadata(
        description
            .section("metadata")
            .ok_or(Error::MissingSection("metadata"))?,
    )?;
    resolver.resolve_enums(section("enums"))?;
    resolver.resolve_bitfields(section("bitfields"))?;
    resolver.resolve_typedefs(section("typedefs"))?;
    resolver.resolve_maps(section("generated_maps"))?;
    resolver.apply_overrides(section("overrides"))?;
    resolver.resolve_records()?;
    resolver.resolve_hashes()?;

    let config = resolver.into_config();
    info!(
        app = %config.metadata.app_name,
        maps = config.maps.len(),
        typedefs = config.typedefs.len(),
        hash = %config.metadata.full_hash,
        "Resolved memory map description"
    );
    Ok(config)
}

/// Staged resolver state.
#[derive(Debug, Default)]
pub struct Resolver {
    env: Env,
    defines: BTreeMap<String, Define>,
    define_order: Vec<String>,
    metadata: Option<Metadata>,
    enums: BTreeMap<String, Enumeration>,
    enum_order: Vec<String>,
    bitfields: BTreeMap<String, Bitfield>,
    bitfield_order: Vec<String>,
    typedefs: BTreeMap<String, Typedef>,
    typedef_order: Vec<String>,
    maps: Vec<MemoryMap>,
    default_map: Option<String>,
}

impl Resolver {
    /// Create an empty resolver.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolved define values by name.
    #[must_use]
    pub fn env(&self) -> &Env {
        &self.env
    }

    /// Resolved enums.
    #[must_use]
    pub fn enums(&self) -> &BTreeMap<String, Enumeration> {
        &self.enums
    }

    /// Resolved bitfields.
    #[must_use]
    pub fn bitfields(&self) -> &BTreeMap<String, Bitfield> {
        &self.bitfields
    }

    /// Look up a resolved typedef.
    #[must_use]
    pub fn typedef(&self, name: &str) -> Option<&Typedef> {
        self.typedefs.get(name)
    }

    /// Typedef names in resolution order.
    #[must_use]
    pub fn typedef_order(&self) -> &[String] {
        &self.typedef_order
    }

    /// Flattened maps.
    #[must_use]
    pub fn maps(&self) -> &[MemoryMap] {
        &self.maps
    }

    /// Look up a flattened map.
    #[must_use]
    pub fn map(&self, name: &str) -> Option<&MemoryMap> {
        self.maps.iter().find(|m| m.name == name)
    }

    /// Resolved metadata, once the metadata stage ran.
    #[must_use]
    pub fn metadata(&self) -> Option<&Metadata> {
        self.metadata.as_ref()
    }

    /// Map that overrides apply to when they name none.
    #[must_use]
    pub fn default_map(&self) -> Option<&str> {
        self.default_map.as_deref()
    }

    fn default_type(&self) -> Primitive {
        self.metadata
            .as_ref()
            .map(|m| m.default_type)
            .unwrap_or_default()
    }

    /// Consume the resolver into the resolved configuration.
    #[must_use]
    pub fn into_config(self) -> MemoryMapConfig {
        MemoryMapConfig {
            typedefs: in_order(&self.typedef_order, self.typedefs),
            bitfields: in_order(&self.bitfield_order, self.bitfields),
            enums: in_order(&self.enum_order, self.enums),
            defines: in_order(&self.define_order, self.defines),
            metadata: self.metadata.unwrap_or_default(),
            maps: self.maps,
        }
    }

    /// Evaluate a description value with the resolved defines.
    fn eval(&self, value: &Value, context: impl FnOnce() -> String) -> Result<Scalar> {
        expr::evaluate_value(value, &self.env).map_err(|e| Error::eval(context(), e))
    }

    /// Evaluate a value that must be a non-negative integer.
    fn eval_size(&self, kind: &'static str, owner: &str, key: &str, value: &Value) -> Result<usize> {
        let scalar = self.eval(value, || format!("{key} of {owner}"))?;
        scalar
            .as_int()
            .and_then(|i| usize::try_from(i).ok())
            .ok_or_else(|| {
                Error::invalid(
                    kind,
                    owner,
                    format!("{key} must be a non-negative integer, got {scalar}"),
                )
            })
    }
}

/// Deserialize every entry of a section, keeping insertion order.
/// Take the entries of `table` out in the order of `order`.
fn in_order<T>(order: &[String], mut table: BTreeMap<String, T>) -> Vec<(String, T)> {
    order.iter().filter_map(|name| table.remove_entry(name)).collect()
}

fn parse_entries<T: DeserializeOwned>(
    section_name: &'static str,
    section: &Props,
) -> Result<Vec<(String, T)>> {
    section
        .iter()
        .map(|(name, value)| {
            serde_json::from_value(value.clone())
                .map(|entry| (name.clone(), entry))
                .map_err(|source| Error::InvalidEntry {
                    section: section_name,
                    name: name.clone(),
                    source,
                })
        })
        .collect()
}

/// Fail on the first name that appears twice.
fn ensure_unique<'a>(names: impl IntoIterator<Item = &'a str>, owner: &str) -> Result<()> {
    let mut seen = std::collections::BTreeSet::new();
    for name in names {
        if !seen.insert(name) {
            return Err(Error::duplicate(name, owner));
        }
    }
    debug!(owner, count = seen.len(), "Checked element names");
    Ok(())
}

#[cfg(test)]
pub(crate) mod test_support {
    use serde_json::Value;

    use crate::model::Props;

    /// Turn a `json!` object into a section.
    pub fn section(value: Value) -> Props {
        match value {
            Value::Object(map) => map,
            other => panic!("expected an object, got {other}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::section;
    use super::*;
    use serde_json::json;

    fn description(value: Value) -> Description {
        Description::from_sections(section(value))
    }

    fn minimal() -> Value {
        json!({
            "metadata": {"app_name": "minimal"},
            "typedefs": {"type_1": {"elements": [{"name": "record_1"}]}},
            "generated_maps": {"map_1": {"type": "type_1"}}
        })
    }

    #[test]
    fn test_resolve_minimal() {
        let cfg = resolve(&description(minimal())).unwrap();
        assert_eq!(cfg.metadata.app_name, "minimal");
        assert_eq!(cfg.metadata.version, "0.0.0");
        assert_eq!(cfg.typedefs.len(), 1);
        assert_eq!(cfg.typedefs[0].1.resolved_total_size, 4);
        let map = cfg.map("map_1").unwrap();
        assert_eq!(map.records.len(), 1);
        assert_eq!(map.records[0].name, "record_1");
        assert_eq!(map.compressed_records.len(), 1);
        assert_eq!(cfg.metadata.full_hash.len(), 32);
        assert_eq!(cfg.metadata.fw_hash, cfg.metadata.sw_hash);
    }

    #[test]
    fn test_resolve_requires_metadata() {
        let mut value = minimal();
        value.as_object_mut().unwrap().remove("metadata");
        let err = resolve(&description(value)).unwrap_err();
        assert!(matches!(err, Error::MissingSection("metadata")));
    }

    #[test]
    fn test_resolve_requires_maps() {
        let mut value = minimal();
        value.as_object_mut().unwrap().remove("generated_maps");
        let err = resolve(&description(value)).unwrap_err();
        assert!(matches!(err, Error::MissingSection("generated_maps")));
    }

    #[test]
    fn test_resolve_is_deterministic() {
        let first = resolve(&description(minimal())).unwrap();
        let second = resolve(&description(minimal())).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_config_typedefs_follow_resolution_order() {
        let cfg = resolve(&description(json!({
            "metadata": {"app_name": "nested"},
            "typedefs": {
                "a_outer": {"elements": [{"name": "inner", "type": "b_inner"}]},
                "b_inner": {"elements": [{"name": "x", "type": "uint8_t"}]}
            },
            "generated_maps": {"map_1": {"type": "a_outer"}}
        })))
        .unwrap();
        let names: Vec<&str> = cfg.typedefs.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["b_inner", "a_outer"]);
    }

    #[test]
    fn test_ensure_unique() {
        assert!(ensure_unique(["a", "b"], "td").is_ok());
        let err = ensure_unique(["a", "a"], "td").unwrap_err();
        assert_eq!(err.to_string(), "duplicate record a in td");
    }
}
