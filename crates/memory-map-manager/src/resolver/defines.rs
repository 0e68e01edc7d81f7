//! Defines and metadata.

use serde_json::Value;
use tracing::debug;

use super::Resolver;
use crate::error::{Error, Result};
use crate::expr::{self, Scalar};
use crate::model::raw::RawMetadata;
use crate::model::{Define, Metadata, PermissionUsers, Props};
use crate::primitive::Primitive;

/// Maximum number of permission users, one per access nibble bit.
pub const MAX_PERMISSION_USERS: usize = 4;

const DEFAULT_VERSION: &str = "0.0.0";

struct PendingDefine {
    value: Value,
    description: Option<String>,
    props: Props,
}

impl PendingDefine {
    fn parse(name: &str, entry: &Value) -> Result<Self> {
        match entry {
            Value::Object(map) => {
                let mut props = map.clone();
                let value = props.remove("value").ok_or_else(|| {
                    Error::invalid("define", name, "a mapping entry needs a value")
                })?;
                let description = match props.remove("description") {
                    Some(Value::String(s)) => Some(s),
                    Some(other) => Some(other.to_string()),
                    None => None,
                };
                Ok(Self {
                    value,
                    description,
                    props,
                })
            }
            other => Ok(Self {
                value: other.clone(),
                description: None,
                props: Props::new(),
            }),
        }
    }
}

fn is_quoted(s: &str) -> bool {
    s.len() >= 2 && s.starts_with('"') && s.ends_with('"')
}

impl Resolver {
    /// Resolve the `defines` section.
    ///
    /// Defines are evaluated in passes over their sorted names until every
    /// one is known, so a define may use any other define. Quoted strings are
    /// kept literally, quotes included. The resolved configuration lists them
    /// in description order.
    ///
    /// # Errors
    ///
    /// Returns an error if a pass makes no progress (missing name or circular
    /// dependency) or if an expression is malformed.
    pub fn resolve_defines(&mut self, section: &Props) -> Result<()> {
        self.define_order = section.keys().cloned().collect();
        let mut pending = section
            .iter()
            .map(|(name, entry)| Ok((name.clone(), PendingDefine::parse(name, entry)?)))
            .collect::<Result<std::collections::BTreeMap<_, _>>>()?;

        while !pending.is_empty() {
            let mut resolved = Vec::new();
            for (name, define) in &pending {
                match self.define_value(name, &define.value) {
                    Ok(value) => {
                        self.env.insert(name.clone(), value);
                        resolved.push(name.clone());
                    }
                    Err(Error::Eval { source, .. }) if source.is_retryable() => {
                        debug!(define = %name, error = %source, "Define not resolvable on this pass");
                    }
                    Err(e) => return Err(e),
                }
            }

            if resolved.is_empty() {
                return Err(Error::Unresolved {
                    kind: "defines",
                    names: pending.into_keys().collect(),
                    detail: String::new(),
                });
            }

            for name in resolved {
                if let (Some(define), Some(value)) = (pending.remove(&name), self.env.get(&name)) {
                    self.defines.insert(
                        name,
                        Define {
                            value: define.value,
                            resolved_value: value.clone(),
                            description: define.description,
                            props: define.props,
                        },
                    );
                }
            }
        }

        debug!(count = self.defines.len(), "Resolved defines");
        Ok(())
    }

    fn define_value(&self, name: &str, value: &Value) -> Result<Scalar> {
        match value {
            Value::String(s) if is_quoted(s) => Ok(Scalar::Str(s.clone())),
            Value::String(s) => {
                expr::evaluate(s, &self.env).map_err(|e| Error::eval(format!("define {name}"), e))
            }
            other => Scalar::from_json(other)
                .ok_or_else(|| Error::invalid("define", name, "value must be a scalar")),
        }
    }

    /// Resolve the `metadata` section.
    ///
    /// An empty section leaves the defaults in place.
    ///
    /// # Errors
    ///
    /// Returns an error if `app_name` is missing, the version is not
    /// `major.minor.patch`, `default_type` is not a primitive, an alignment is
    /// zero or more than four permission users are declared.
    pub fn resolve_metadata(&mut self, section: &Props) -> Result<()> {
        if section.is_empty() {
            return Ok(());
        }
        let raw: RawMetadata = serde_json::from_value(Value::Object(section.clone())).map_err(
            |source| Error::InvalidEntry {
                section: "metadata",
                name: "metadata".to_string(),
                source,
            },
        )?;

        let version = raw.version.unwrap_or_else(|| DEFAULT_VERSION.to_string());
        let [major_version, minor_version, patch_version] = parse_version(&version)?;

        let default_type = match raw.default_type.as_deref() {
            Some(name) => Primitive::from_name(name).ok_or_else(|| {
                Error::invalid("metadata", "default_type", format!("{name} is not a primitive type"))
            })?,
            None => Primitive::DEFAULT,
        };

        for (key, value) in [("align", raw.align), ("struct_align", raw.struct_align)] {
            if value == Some(0) {
                return Err(Error::invalid("metadata", key, "alignment must be at least 1"));
            }
        }

        if raw.permission_users.len() > MAX_PERMISSION_USERS {
            return Err(Error::invalid(
                "metadata",
                "permission_users",
                format!(
                    "at most {MAX_PERMISSION_USERS} users are supported, got {}",
                    raw.permission_users.len()
                ),
            ));
        }
        super::ensure_unique(
            raw.permission_users.iter().map(String::as_str),
            "permission_users",
        )?;

        self.default_map.clone_from(&raw.default_map);
        let metadata = Metadata {
            app_name: raw.app_name,
            version,
            major_version,
            minor_version,
            patch_version,
            align: raw.align,
            struct_align: raw.struct_align,
            default_map: raw.default_map,
            default_type,
            resolved_permission_users: PermissionUsers::new(&raw.permission_users),
            permission_users: raw.permission_users,
            full_hash: String::new(),
            fw_hash: String::new(),
            sw_hash: String::new(),
            props: raw.props,
        };
        debug!(app = %metadata.app_name, version = %metadata.version, "Resolved metadata");
        self.metadata = Some(metadata);
        Ok(())
    }
}

fn parse_version(version: &str) -> Result<[u64; 3]> {
    let invalid = || Error::invalid("metadata", "version", format!("{version} is not major.minor.patch"));
    let parts: Vec<u64> = version
        .split('.')
        .map(|part| part.parse::<u64>().map_err(|_| invalid()))
        .collect::<Result<_>>()?;
    <[u64; 3]>::try_from(parts).map_err(|_| invalid())
}

#[cfg(test)]
mod tests {
    use super::super::test_support::section;
    use super::*;
    use serde_json::json;

    #[test]
    fn test_define_values() {
        let mut res = Resolver::new();
        res.resolve_defines(&section(json!({
            "def_1": 1,
            "def_2": {"value": "def_1 + 1", "description": "second"},
            "def_3": "\"my_string\"",
            "def_4": {"value": 0.5, "unit": "V"}
        })))
        .unwrap();
        assert_eq!(res.env()["def_1"], Scalar::Int(1));
        assert_eq!(res.env()["def_2"], Scalar::Int(2));
        assert_eq!(res.env()["def_3"], Scalar::Str("\"my_string\"".to_string()));
        assert_eq!(res.env()["def_4"], Scalar::Float(0.5));
        assert_eq!(res.defines["def_2"].description.as_deref(), Some("second"));
        assert_eq!(res.defines["def_4"].props.get("unit"), Some(&json!("V")));
    }

    #[test]
    fn test_define_out_of_order() {
        let mut res = Resolver::new();
        res.resolve_defines(&section(json!({
            "a_last": "b_middle * 2",
            "b_middle": "c_first + 1",
            "c_first": 3
        })))
        .unwrap();
        assert_eq!(res.env()["a_last"], Scalar::Int(8));
    }

    #[test]
    fn test_define_circular() {
        let mut res = Resolver::new();
        let err = res
            .resolve_defines(&section(json!({"def_1": "def_2", "def_2": "def_1", "def_3": 1})))
            .unwrap_err();
        assert!(err.is_unresolved());
        match err {
            Error::Unresolved { names, .. } => assert_eq!(names, vec!["def_1", "def_2"]),
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn test_define_missing() {
        let mut res = Resolver::new();
        let err = res.resolve_defines(&section(json!({"def_1": "nope + 1"}))).unwrap_err();
        assert!(err.is_unresolved());
    }

    #[test]
    fn test_define_syntax_error_is_immediate() {
        let mut res = Resolver::new();
        let err = res.resolve_defines(&section(json!({"def_1": "1 +"}))).unwrap_err();
        assert!(matches!(err, Error::Eval { .. }));
    }

    #[test]
    fn test_define_rejects_null() {
        let mut res = Resolver::new();
        let err = res.resolve_defines(&section(json!({"def_1": null}))).unwrap_err();
        assert!(err.is_invalid_definition());
    }

    #[test]
    fn test_metadata_defaults() {
        let mut res = Resolver::new();
        res.resolve_metadata(&section(json!({"app_name": "app", "author": "me"})))
            .unwrap();
        let meta = res.metadata().unwrap();
        assert_eq!(meta.version, "0.0.0");
        assert_eq!(meta.default_type, Primitive::U32);
        assert!(meta.resolved_permission_users.is_empty());
        assert_eq!(meta.props.get("author"), Some(&json!("me")));
    }

    #[test]
    fn test_metadata_version_parts() {
        let mut res = Resolver::new();
        res.resolve_metadata(&section(json!({"app_name": "app", "version": "1.22.333"})))
            .unwrap();
        let meta = res.metadata().unwrap();
        assert_eq!(
            (meta.major_version, meta.minor_version, meta.patch_version),
            (1, 22, 333)
        );
    }

    #[test]
    fn test_metadata_bad_version() {
        for version in ["1.0", "1.0.x", "1.0.0.0"] {
            let mut res = Resolver::new();
            let err = res
                .resolve_metadata(&section(json!({"app_name": "app", "version": version})))
                .unwrap_err();
            assert!(err.is_invalid_definition(), "{version}");
        }
    }

    #[test]
    fn test_metadata_permission_users() {
        let mut res = Resolver::new();
        res.resolve_metadata(&section(json!({
            "app_name": "app",
            "permission_users": ["user_1", "user_2", "user_3"]
        })))
        .unwrap();
        let users = &res.metadata().unwrap().resolved_permission_users;
        assert_eq!(users.bit("user_3"), Some(4));
    }

    #[test]
    fn test_metadata_too_many_users() {
        let mut res = Resolver::new();
        let err = res
            .resolve_metadata(&section(json!({
                "app_name": "app",
                "permission_users": ["a", "b", "c", "d", "e"]
            })))
            .unwrap_err();
        assert!(err.is_invalid_definition());
    }

    #[test]
    fn test_metadata_default_type_must_be_primitive() {
        let mut res = Resolver::new();
        let err = res
            .resolve_metadata(&section(json!({"app_name": "app", "default_type": "type_1"})))
            .unwrap_err();
        assert!(err.is_invalid_definition());
    }

    #[test]
    fn test_metadata_empty_section_is_ignored() {
        let mut res = Resolver::new();
        res.resolve_metadata(&Props::new()).unwrap();
        assert!(res.metadata().is_none());
    }
}
