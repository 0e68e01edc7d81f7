//! Bitfield resolution.

use std::collections::BTreeMap;

use serde_json::Value;
use tracing::debug;

use super::{ensure_unique, parse_entries, references, Resolver};
use crate::error::{Error, Result};
use crate::model::raw::RawBitfield;
use crate::model::{Bitfield, BitfieldMember, Props};
use crate::primitive::Primitive;

/// Widest supported bitfield.
const MAX_BITS: u32 = 64;

fn padding(offset: u32, bits: u32) -> BitfieldMember {
    BitfieldMember {
        name: "padding".to_string(),
        bits: None,
        resolved_bits: bits,
        resolved_bit_offset: offset,
        reserved: true,
        description: Some("padding bits".to_string()),
        props: Props::new(),
    }
}

impl Resolver {
    /// Resolve the `bitfields` section.
    ///
    /// Members are packed from bit 0 up. Unused high bits become a reserved
    /// `padding` member.
    ///
    /// # Errors
    ///
    /// Returns an error if a member has zero bits, the total exceeds 64 bits
    /// or the chosen type, the type is not an integer primitive, or a member
    /// name repeats.
    pub fn resolve_bitfields(&mut self, section: &Props) -> Result<()> {
        let entries = parse_entries::<RawBitfield>("bitfields", section)?;
        self.bitfield_order = entries.iter().map(|(name, _)| name.clone()).collect();
        let mut raw: BTreeMap<String, RawBitfield> = entries.into_iter().collect();
        references::expand("bitfields", &mut raw)?;

        for (name, bf) in raw {
            let resolved = self.resolve_bitfield(&name, bf)?;
            self.bitfields.insert(name, resolved);
        }
        debug!(count = self.bitfields.len(), "Resolved bitfields");
        Ok(())
    }

    fn resolve_bitfield(&self, name: &str, bf: RawBitfield) -> Result<Bitfield> {
        let mut elements = Vec::with_capacity(bf.elements.len() + 1);
        let mut offset: u32 = 0;
        let mut use_defines = false;

        for member in bf.elements {
            let bits = match &member.bits {
                Some(value) => {
                    use_defines |= matches!(value, Value::String(_));
                    let scalar = self.eval(value, || format!("bits of {name}.{}", member.name))?;
                    scalar
                        .as_int()
                        .and_then(|b| u32::try_from(b).ok())
                        .ok_or_else(|| {
                            Error::invalid("bitfield", name, format!("{} has invalid bits {scalar}", member.name))
                        })?
                }
                None => 1,
            };
            if bits == 0 {
                return Err(Error::invalid("bitfield", name, format!("{} has 0 bits", member.name)));
            }
            elements.push(BitfieldMember {
                name: member.name,
                bits: member.bits,
                resolved_bits: bits,
                resolved_bit_offset: offset,
                reserved: false,
                description: member.description,
                props: member.props,
            });
            offset = offset.saturating_add(bits);
        }

        if offset > MAX_BITS {
            return Err(Error::invalid("bitfield", name, format!("too many bits ({offset})")));
        }

        let resolved_type = match bf.ty.as_deref() {
            Some(ty) => {
                let prim = Primitive::from_name(ty).ok_or_else(|| Error::UnknownType {
                    ty: ty.to_string(),
                    context: format!("bitfield {name}"),
                })?;
                if !prim.is_integer() {
                    return Err(Error::invalid("bitfield", name, format!("{ty} is not an integer type")));
                }
                prim
            }
            None => Primitive::smallest_unsigned(offset),
        };

        let capacity = u32::try_from(resolved_type.size() * 8).unwrap_or(MAX_BITS);
        if offset > capacity {
            return Err(Error::invalid(
                "bitfield",
                name,
                format!("too many bits ({offset}) for {resolved_type}"),
            ));
        }
        if offset < capacity {
            elements.push(padding(offset, capacity - offset));
        }
        ensure_unique(elements.iter().map(|e| e.name.as_str()), name)?;

        Ok(Bitfield {
            elements,
            ty: bf.ty,
            resolved_type,
            resolved_type_size: resolved_type.size(),
            use_defines,
            description: bf.description,
            props: bf.props,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::section;
    use super::*;
    use serde_json::json;

    fn layout(bf: &Bitfield) -> Vec<(&str, u32, u32)> {
        bf.elements
            .iter()
            .map(|e| (e.name.as_str(), e.resolved_bit_offset, e.resolved_bits))
            .collect()
    }

    #[test]
    fn test_bitfield_layout() {
        let mut res = Resolver::new();
        res.resolve_defines(&section(json!({"def_1": 3}))).unwrap();
        res.resolve_bitfields(&section(json!({
            "bf_1": {"elements": ["a", {"name": "b", "bits": 2}, {"name": "c", "bits": "def_1"}]}
        })))
        .unwrap();
        let bf = &res.bitfields()["bf_1"];
        assert_eq!(layout(bf), vec![("a", 0, 1), ("b", 1, 2), ("c", 3, 3), ("padding", 6, 2)]);
        assert_eq!(bf.resolved_type, Primitive::U8);
        assert_eq!(bf.resolved_type_size, 1);
        assert!(bf.use_defines);
        assert!(bf.elements[3].reserved);
        assert_eq!(bf.elements[3].description.as_deref(), Some("padding bits"));
    }

    #[test]
    fn test_bitfield_type_sizes() {
        let cases = [(8, Primitive::U8), (9, Primitive::U16), (17, Primitive::U32), (33, Primitive::U64)];
        for (bits, expected) in cases {
            let mut res = Resolver::new();
            res.resolve_bitfields(&section(json!({
                "bf": {"elements": [{"name": "a", "bits": bits}]}
            })))
            .unwrap();
            assert_eq!(res.bitfields()["bf"].resolved_type, expected, "{bits}");
        }
    }

    #[test]
    fn test_bitfield_full_type_has_no_padding() {
        let mut res = Resolver::new();
        res.resolve_bitfields(&section(json!({
            "bf": {"type": "uint16_t", "elements": [{"name": "a", "bits": 16}]}
        })))
        .unwrap();
        assert_eq!(res.bitfields()["bf"].elements.len(), 1);
    }

    #[test]
    fn test_bitfield_zero_bits() {
        let mut res = Resolver::new();
        let err = res
            .resolve_bitfields(&section(json!({"bf": {"elements": [{"name": "a", "bits": 0}]}})))
            .unwrap_err();
        assert!(err.is_invalid_definition());
    }

    #[test]
    fn test_bitfield_too_many_bits() {
        let mut res = Resolver::new();
        let err = res
            .resolve_bitfields(&section(json!({
                "bf": {"elements": [{"name": "a", "bits": 60}, {"name": "b", "bits": 5}]}
            })))
            .unwrap_err();
        assert!(err.to_string().contains("too many bits (65)"));
    }

    #[test]
    fn test_bitfield_overflows_type() {
        let mut res = Resolver::new();
        let err = res
            .resolve_bitfields(&section(json!({
                "bf": {"type": "uint8_t", "elements": [{"name": "a", "bits": 9}]}
            })))
            .unwrap_err();
        assert!(err.is_invalid_definition());
    }

    #[test]
    fn test_bitfield_non_integer_type() {
        let mut res = Resolver::new();
        let err = res
            .resolve_bitfields(&section(json!({"bf": {"type": "float", "elements": ["a"]}})))
            .unwrap_err();
        assert!(err.is_invalid_definition());
    }

    #[test]
    fn test_bitfield_duplicate_member() {
        let mut res = Resolver::new();
        let err = res
            .resolve_bitfields(&section(json!({"bf": {"elements": ["a", "a"]}})))
            .unwrap_err();
        assert!(matches!(err, Error::Duplicate { .. }));
    }

    #[test]
    fn test_bitfield_reference() {
        let mut res = Resolver::new();
        res.resolve_bitfields(&section(json!({
            "bf_1": {"elements": ["a"]},
            "bf_2": {"reference": "bf_1", "elements": ["b"]}
        })))
        .unwrap();
        let names: Vec<&str> = res.bitfields()["bf_2"].elements.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "padding"]);
    }
}
