//! Typedef resolution: ordering, element layout and padding.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;
use tracing::debug;

use super::{ensure_unique, parse_entries, references, Resolver};
use crate::error::{Error, Result};
use crate::model::raw::{RawElement, RawTypedef};
use crate::model::{Element, ElementKind, Props, Typedef};
use crate::primitive::Primitive;

impl Resolver {
    /// Resolve the `typedefs` section.
    ///
    /// Typedefs are ordered so that each one follows the typedefs it uses,
    /// then laid out element by element. With `align`, padding follows every
    /// element that ends unaligned. A `total_size` pads the typedef to that
    /// size, otherwise `struct_align` pads it to the next multiple.
    ///
    /// # Errors
    ///
    /// Returns an error if a type is unknown or circular, contents exceed
    /// `total_size`, element names repeat, or a typedef, bitfield and enum
    /// share a name.
    pub fn resolve_typedefs(&mut self, section: &Props) -> Result<()> {
        let mut raw: BTreeMap<String, RawTypedef> =
            parse_entries("typedefs", section)?.into_iter().collect();
        references::expand("typedefs", &mut raw)?;

        let order = self.order_typedefs(&raw)?;
        for name in &order {
            if let Some(td) = raw.get(name) {
                let resolved = self.layout_typedef(name, td)?;
                debug!(
                    typedef = %name,
                    size = resolved.resolved_total_size,
                    elements = resolved.elements.len(),
                    "Resolved typedef"
                );
                self.typedefs.insert(name.clone(), resolved);
            }
        }
        self.typedef_order = order;
        self.check_unique_types()
    }

    fn element_type(&self, element: &RawElement) -> String {
        element
            .ty
            .clone()
            .unwrap_or_else(|| self.default_type().c_name().to_string())
    }

    fn is_leaf_type(&self, ty: &str) -> bool {
        Primitive::from_name(ty).is_some() || self.bitfields.contains_key(ty) || self.enums.contains_key(ty)
    }

    /// Order typedefs in passes over sorted names.
    fn order_typedefs(&self, raw: &BTreeMap<String, RawTypedef>) -> Result<Vec<String>> {
        let mut known: BTreeSet<&str> = BTreeSet::new();
        let mut order = Vec::with_capacity(raw.len());

        while order.len() < raw.len() {
            let mut progressed = false;
            let mut unresolved_types = BTreeSet::new();
            for (name, td) in raw {
                if known.contains(name.as_str()) {
                    continue;
                }
                let missing = td
                    .elements
                    .iter()
                    .map(|e| self.element_type(e))
                    .find(|ty| !self.is_leaf_type(ty) && !known.contains(ty.as_str()));
                match missing {
                    Some(ty) => {
                        unresolved_types.insert(ty);
                    }
                    None => {
                        known.insert(name.as_str());
                        order.push(name.clone());
                        progressed = true;
                    }
                }
            }
            if !progressed {
                return Err(Error::Unresolved {
                    kind: "typedefs",
                    names: raw
                        .keys()
                        .filter(|n| !known.contains(n.as_str()))
                        .cloned()
                        .collect(),
                    detail: format!("/typo. {unresolved_types:?} types are not resolved"),
                });
            }
        }
        Ok(order)
    }

    fn layout_typedef(&self, name: &str, td: &RawTypedef) -> Result<Typedef> {
        let align = self.metadata.as_ref().and_then(|m| m.align);
        let struct_align = self.metadata.as_ref().and_then(|m| m.struct_align);

        let mut elements = Vec::with_capacity(td.elements.len());
        let mut deps = BTreeSet::new();
        let mut use_bitfields = false;
        let mut use_enums = false;
        let mut use_defines = false;
        let mut offset = 0usize;
        let mut pad_index = 0usize;

        for raw in &td.elements {
            let ty = self.element_type(raw);
            let array = match &raw.array_size {
                Some(value) => {
                    use_defines |= matches!(value, Value::String(_));
                    Some(self.eval_size("typedef", name, &format!("array_size of {}", raw.name), value)?)
                }
                None => None,
            };

            let mut description = raw.description.clone();
            let mut props = raw.props.clone();
            let mut enum_name = None;
            let (kind, type_size, resolved_type) = if let Some(prim) = Primitive::from_name(&ty) {
                (ElementKind::Primitive(prim), prim.size(), prim.c_name().to_string())
            } else if let Some(bf) = self.bitfields.get(&ty) {
                use_bitfields = true;
                (ElementKind::Bitfield(ty.clone()), bf.resolved_type_size, ty.clone())
            } else if let Some(en) = self.enums.get(&ty) {
                use_enums = true;
                let mut merged = en.props.clone();
                merged.extend(props);
                props = merged;
                description = description.or_else(|| en.description.clone());
                enum_name = Some(ty.clone());
                (
                    ElementKind::Enum(ty.clone()),
                    en.resolved_type_size,
                    en.resolved_type.c_name().to_string(),
                )
            } else if let Some(nested) = self.typedefs.get(&ty) {
                deps.insert(ty.clone());
                (ElementKind::Typedef(ty.clone()), nested.resolved_total_size, ty.clone())
            } else {
                return Err(Error::UnknownType {
                    ty,
                    context: format!("{name}.{}", raw.name),
                });
            };

            let total_size = type_size
                .checked_mul(array.unwrap_or(1))
                .ok_or_else(|| Error::invalid("typedef", name, format!("{} is too large", raw.name)))?;
            elements.push(Element {
                name: raw.name.clone(),
                ty: raw.ty.clone(),
                array_size: raw.array_size.clone(),
                description,
                enum_name,
                reserved: false,
                resolved_type,
                resolved_type_size: type_size,
                resolved_total_size: total_size,
                resolved_offset: offset,
                resolved_array_size: array,
                props,
                kind,
            });
            offset += total_size;

            if let Some(align) = align {
                let rem = offset % align;
                if rem != 0 {
                    elements.push(Element::padding(format!("padding_{pad_index}"), offset, align - rem));
                    offset += align - rem;
                    pad_index += 1;
                }
            }
        }

        let resolved_total_size = if let Some(total) = &td.total_size {
            use_defines |= matches!(total, Value::String(_));
            let total = self.eval_size("typedef", name, "total_size", total)?;
            if offset > total {
                return Err(Error::invalid(
                    "typedef",
                    name,
                    format!("total size limit ({total}) exceeds calculated size {offset}"),
                ));
            }
            if offset < total {
                elements.push(Element::padding("padding", offset, total - offset));
            }
            total
        } else if let Some(struct_align) = struct_align {
            let rem = offset % struct_align;
            if rem != 0 {
                elements.push(Element::padding("padding", offset, struct_align - rem));
                offset += struct_align - rem;
            }
            offset
        } else {
            offset
        };

        ensure_unique(elements.iter().map(|e| e.name.as_str()), name)?;

        Ok(Typedef {
            elements,
            total_size: td.total_size.clone(),
            resolved_total_size,
            deps: deps.into_iter().collect(),
            use_bitfields,
            use_enums,
            use_defines,
            description: td.description.clone(),
            props: td.props.clone(),
        })
    }

    fn check_unique_types(&self) -> Result<()> {
        fn clash<A, B>(a: &BTreeMap<String, A>, b: &BTreeMap<String, B>) -> Vec<String> {
            a.keys().filter(|k| b.contains_key(*k)).cloned().collect()
        }
        let checks = [
            (clash(&self.typedefs, &self.bitfields), "bitfields", "typedefs"),
            (clash(&self.typedefs, &self.enums), "enums", "typedefs"),
            (clash(&self.bitfields, &self.enums), "enums", "bitfields"),
        ];
        for (names, first, second) in checks {
            if !names.is_empty() {
                return Err(Error::NameConflict { names, first, second });
            }
        }
        Ok(())
    }
}
