//! Enum resolution.

use std::collections::BTreeMap;

use serde_json::Value;
use tracing::debug;

use super::{ensure_unique, parse_entries, references, Resolver};
use crate::error::{Error, Result};
use crate::model::raw::RawEnum;
use crate::model::{EnumMember, Enumeration, Props};
use crate::primitive::Primitive;

/// Value following `previous` in a bitwise enum.
fn next_bit(previous: i128) -> Option<i128> {
    let bit_length = u128::BITS - previous.unsigned_abs().leading_zeros();
    1_i128.checked_shl(bit_length)
}

impl Resolver {
    /// Resolve the `enums` section.
    ///
    /// Members without a value count up from 0, or take successive bits
    /// starting at 1 when the enum is `bitwise`.
    ///
    /// # Errors
    ///
    /// Returns an error if the type is not an integer primitive, a value
    /// does not fit the type, a member name repeats or a reference cannot be
    /// expanded.
    pub fn resolve_enums(&mut self, section: &Props) -> Result<()> {
        let entries = parse_entries::<RawEnum>("enums", section)?;
        self.enum_order = entries.iter().map(|(name, _)| name.clone()).collect();
        let mut raw: BTreeMap<String, RawEnum> = entries.into_iter().collect();
        references::expand("enums", &mut raw)?;

        for (name, en) in raw {
            let resolved = self.resolve_enum(&name, en)?;
            self.enums.insert(name, resolved);
        }
        debug!(count = self.enums.len(), "Resolved enums");
        Ok(())
    }

    fn resolve_enum(&self, name: &str, en: RawEnum) -> Result<Enumeration> {
        let resolved_type = match en.ty.as_deref() {
            Some(ty) => Primitive::from_name(ty)
                .ok_or_else(|| Error::UnknownType {
                    ty: ty.to_string(),
                    context: format!("enum {name}"),
                })?,
            None => self.default_type(),
        };
        let (min, max) = resolved_type.bounds().ok_or_else(|| {
            Error::invalid("enum", name, format!("{resolved_type} is not a valid type"))
        })?;

        let mut elements: Vec<EnumMember> = Vec::with_capacity(en.elements.len());
        let mut use_defines = false;
        for member in en.elements {
            let value = match &member.value {
                Some(value) => {
                    use_defines |= matches!(value, Value::String(_));
                    let scalar = self.eval(value, || format!("value of {name}.{}", member.name))?;
                    scalar.as_int().ok_or_else(|| {
                        Error::invalid("enum", name, format!("{} is not an integer ({scalar})", member.name))
                    })?
                }
                None => match (elements.last(), en.bitwise) {
                    (None, true) => 1,
                    (None, false) => 0,
                    (Some(prev), true) => next_bit(prev.resolved_value).ok_or_else(|| {
                        Error::invalid("enum", name, format!("{} overflows", member.name))
                    })?,
                    (Some(prev), false) => prev.resolved_value + 1,
                },
            };
            if value < min || value > max {
                return Err(Error::invalid(
                    "enum",
                    name,
                    format!("{value} is out of bounds of {resolved_type}"),
                ));
            }
            elements.push(EnumMember {
                name: member.name,
                value: member.value,
                resolved_value: value,
                description: member.description,
                props: member.props,
            });
        }
        ensure_unique(elements.iter().map(|e| e.name.as_str()), name)?;

        Ok(Enumeration {
            elements,
            ty: en.ty,
            resolved_type,
            resolved_type_size: resolved_type.size(),
            bitwise: en.bitwise,
            use_defines,
            description: en.description,
            props: en.props,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::section;
    use super::*;
    use serde_json::json;

    fn values(res: &Resolver, name: &str) -> Vec<i128> {
        res.enums()[name].elements.iter().map(|e| e.resolved_value).collect()
    }

    #[test]
    fn test_enum_val() {
        let mut res = Resolver::new();
        res.resolve_defines(&section(json!({"def_1": 100}))).unwrap();
        res.resolve_enums(&section(json!({
            "enum_1": {
                "elements": [
                    {"name": "opt_1", "value": 99},
                    {"name": "opt_2", "value": "def_1"},
                    {"name": "opt_3"},
                    {"name": "opt_4", "value": 1},
                    {"name": "opt_5"}
                ]
            }
        })))
        .unwrap();
        assert_eq!(values(&res, "enum_1"), vec![99, 100, 101, 1, 2]);
        assert!(res.enums()["enum_1"].use_defines);
    }

    #[test]
    fn test_enum_defaults() {
        let mut res = Resolver::new();
        res.resolve_enums(&section(json!({"enum_1": {"elements": ["a", "b", "c"]}})))
            .unwrap();
        assert_eq!(values(&res, "enum_1"), vec![0, 1, 2]);
        let en = &res.enums()["enum_1"];
        assert_eq!(en.resolved_type, Primitive::U32);
        assert_eq!(en.resolved_type_size, 4);
        assert!(!en.use_defines);
    }

    #[test]
    fn test_enum_bitwise() {
        let mut res = Resolver::new();
        res.resolve_enums(&section(json!({
            "enum_1": {
                "bitwise": true,
                "type": "uint8_t",
                "elements": ["a", "b", {"name": "c", "value": 5}, "d"]
            }
        })))
        .unwrap();
        assert_eq!(values(&res, "enum_1"), vec![1, 2, 5, 8]);
    }

    #[test]
    fn test_enum_out_of_bounds() {
        for (ty, value) in [("uint8_t", 256), ("uint8_t", -1), ("int8_t", 128), ("int8_t", -129)] {
            let mut res = Resolver::new();
            let err = res
                .resolve_enums(&section(json!({
                    "enum_1": {"type": ty, "elements": [{"name": "a", "value": value}]}
                })))
                .unwrap_err();
            assert!(err.is_invalid_definition(), "{ty} {value}");
        }
    }

    #[test]
    fn test_enum_bitwise_overflow() {
        let mut res = Resolver::new();
        let err = res
            .resolve_enums(&section(json!({
                "enum_1": {
                    "bitwise": true,
                    "type": "uint8_t",
                    "elements": [{"name": "a", "value": 128}, "b"]
                }
            })))
            .unwrap_err();
        assert!(err.is_invalid_definition());
    }

    #[test]
    fn test_enum_non_integer_type() {
        for ty in ["float", "char"] {
            let mut res = Resolver::new();
            let err = res
                .resolve_enums(&section(json!({"enum_1": {"type": ty, "elements": ["a"]}})))
                .unwrap_err();
            assert!(err.is_invalid_definition(), "{ty}");
        }
    }

    #[test]
    fn test_enum_unknown_type() {
        let mut res = Resolver::new();
        let err = res
            .resolve_enums(&section(json!({"enum_1": {"type": "nope", "elements": ["a"]}})))
            .unwrap_err();
        assert!(matches!(err, Error::UnknownType { .. }));
    }

    #[test]
    fn test_enum_duplicate() {
        let mut res = Resolver::new();
        let err = res
            .resolve_enums(&section(json!({"enum_1": {"elements": ["a", "a"]}})))
            .unwrap_err();
        assert!(matches!(err, Error::Duplicate { .. }));
    }

    #[test]
    fn test_enum_reference() {
        let mut res = Resolver::new();
        res.resolve_enums(&section(json!({
            "enum_1": {"elements": ["a", "b"]},
            "enum_2": {"reference": "enum_1", "elements": ["c"]}
        })))
        .unwrap();
        assert_eq!(values(&res, "enum_2"), vec![0, 1, 2]);
    }
}
