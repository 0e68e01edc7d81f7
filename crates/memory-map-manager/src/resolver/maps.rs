//! Flattening of generated maps into records.
//!
//! A map is its root typedef walked depth first. Nested typedefs add a
//! `parent.` prefix, arrays add `[i]`, and every primitive, enum or bitfield
//! member becomes one record at its byte offset. Keys that are not part of
//! the layout are inherited down the walk: root typedef, then each element
//! and nested typedef on the way, then the leaf itself.

use std::collections::BTreeMap;

use tracing::debug;

use super::{parse_entries, Resolver};
use crate::error::{Error, Result};
use crate::model::raw::RawMap;
use crate::model::{ArrayLevel, Bitfield, Element, ElementKind, MemoryMap, Props, Record, Typedef};

struct Flattener<'a> {
    typedefs: &'a BTreeMap<String, Typedef>,
    bitfields: &'a BTreeMap<String, Bitfield>,
    offset: usize,
    prefix: Option<String>,
    parents: Vec<&'a Props>,
    arrays: Vec<ArrayLevel>,
    next_uid: usize,
    records: Vec<Record>,
}

impl<'a> Flattener<'a> {
    fn qualify(&self, name: &str) -> String {
        match &self.prefix {
            Some(prefix) => format!("{prefix}.{name}"),
            None => name.to_string(),
        }
    }

    fn inherited(&self, own: &Props) -> Props {
        let mut props = Props::new();
        for parent in &self.parents {
            props.extend(parent.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        props.extend(own.iter().map(|(k, v)| (k.clone(), v.clone())));
        props
    }

    fn visit(&mut self, element: &'a Element) -> Result<()> {
        match &element.kind {
            ElementKind::Typedef(name) => {
                let typedefs = self.typedefs;
                let td = typedefs.get(name).ok_or_else(|| Error::UnknownType {
                    ty: name.clone(),
                    context: element.name.clone(),
                })?;
                self.parents.push(&element.props);
                self.parents.push(&td.props);
                self.nest(element, |this| {
                    td.elements.iter().try_for_each(|child| this.visit(child))
                })?;
                self.parents.truncate(self.parents.len() - 2);
            }
            ElementKind::Bitfield(name) => {
                let bitfields = self.bitfields;
                let bf = bitfields.get(name).ok_or_else(|| Error::UnknownType {
                    ty: name.clone(),
                    context: element.name.clone(),
                })?;
                self.parents.push(&element.props);
                self.parents.push(&bf.props);
                self.nest(element, |this| {
                    this.bitfield_records(bf);
                    this.offset += bf.resolved_type_size;
                    Ok(())
                })?;
                self.parents.truncate(self.parents.len() - 2);
            }
            ElementKind::Primitive(_) | ElementKind::Enum(_) => self.leaf(element),
        }
        Ok(())
    }

    /// Run `body` once per array item, or once under the element's name.
    fn nest(
        &mut self,
        element: &Element,
        mut body: impl FnMut(&mut Self) -> Result<()>,
    ) -> Result<()> {
        if let Some(size) = element.resolved_array_size {
            let uid = self.take_uid();
            for idx in 0..size {
                self.arrays.push(ArrayLevel {
                    size,
                    stride: element.resolved_type_size,
                    uid,
                    idx,
                });
                let outer = self.enter(&format!("{}[{idx}]", element.name));
                body(self)?;
                self.prefix = outer;
                self.arrays.pop();
            }
        } else {
            let outer = self.enter(&element.name);
            body(self)?;
            self.prefix = outer;
        }
        Ok(())
    }

    fn enter(&mut self, name: &str) -> Option<String> {
        let inner = self.qualify(name);
        self.prefix.replace(inner)
    }

    fn take_uid(&mut self) -> usize {
        let uid = self.next_uid;
        self.next_uid += 1;
        uid
    }

    fn leaf(&mut self, element: &Element) {
        let props = self.inherited(&element.props);
        if let Some(size) = element.resolved_array_size {
            let uid = self.take_uid();
            for idx in 0..size {
                self.arrays.push(ArrayLevel {
                    size,
                    stride: element.resolved_type_size,
                    uid,
                    idx,
                });
                let name = self.qualify(&format!("{}[{idx}]", element.name));
                self.push_leaf(element, name, props.clone());
                self.offset += element.resolved_type_size;
                self.arrays.pop();
            }
        } else {
            let name = self.qualify(&element.name);
            self.push_leaf(element, name, props);
            self.offset += element.resolved_total_size;
        }
    }

    fn push_leaf(&mut self, element: &Element, name: String, props: Props) {
        self.records.push(Record {
            name,
            map_offset: self.offset,
            ty: element.ty.clone(),
            array_size: element.array_size.clone(),
            description: element.description.clone(),
            enum_name: element.enum_name.clone(),
            reserved: element.reserved,
            resolved_type: Some(element.resolved_type.clone()),
            resolved_type_size: element.resolved_type_size,
            resolved_total_size: Some(element.resolved_total_size),
            resolved_offset: Some(element.resolved_offset),
            resolved_array_size: element.resolved_array_size,
            props,
            arrays: self.arrays.clone(),
            ..Record::default()
        });
    }

    fn bitfield_records(&mut self, bf: &Bitfield) {
        for member in &bf.elements {
            let record = Record {
                name: self.qualify(&member.name),
                map_offset: self.offset,
                description: member.description.clone(),
                reserved: member.reserved,
                resolved_type_size: bf.resolved_type_size,
                bits: member.bits.clone(),
                resolved_bits: Some(member.resolved_bits),
                resolved_bit_offset: Some(member.resolved_bit_offset),
                props: self.inherited(&member.props),
                arrays: self.arrays.clone(),
                ..Record::default()
            };
            self.records.push(record);
        }
    }
}

impl Resolver {
    /// Resolve the `generated_maps` section into flattened records.
    ///
    /// # Errors
    ///
    /// Returns an error if no map is defined, a map names an unknown typedef
    /// or the metadata's `default_map` is not one of the maps.
    pub fn resolve_maps(&mut self, section: &Props) -> Result<()> {
        let raw: Vec<(String, RawMap)> = parse_entries("generated_maps", section)?;
        if raw.is_empty() {
            return Err(Error::MissingSection("generated_maps"));
        }

        let mut next_uid = 1;
        for (name, map) in &raw {
            let root = self.typedefs.get(&map.ty).ok_or_else(|| Error::UnknownType {
                ty: map.ty.clone(),
                context: format!("map {name}"),
            })?;
            let mut flattener = Flattener {
                typedefs: &self.typedefs,
                bitfields: &self.bitfields,
                offset: 0,
                prefix: None,
                parents: vec![&root.props],
                arrays: Vec::new(),
                next_uid,
                records: Vec::new(),
            };
            for element in &root.elements {
                flattener.visit(element)?;
            }
            next_uid = flattener.next_uid;
            debug!(map = %name, records = flattener.records.len(), "Flattened map");

            self.maps.push(MemoryMap {
                name: name.clone(),
                ty: map.ty.clone(),
                size: root.resolved_total_size,
                records: flattener.records,
                compressed_records: Vec::new(),
            });
        }

        if let Some(default_map) = &self.default_map {
            if !raw.iter().any(|(name, _)| name == default_map) {
                return Err(Error::UnknownMap(default_map.clone()));
            }
        }
        if let [(only, _)] = raw.as_slice() {
            self.default_map = Some(only.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::section;
    use super::*;
    use serde_json::json;

    fn resolver(typedefs: serde_json::Value) -> Resolver {
        let mut res = Resolver::new();
        res.resolve_bitfields(&section(json!({
            "bf_1": {"elements": ["flag_a", {"name": "flag_b", "bits": 2}]}
        })))
        .unwrap();
        res.resolve_typedefs(&section(typedefs)).unwrap();
        res
    }

    fn offsets(res: &Resolver, map: &str) -> Vec<(String, usize)> {
        res.map(map)
            .unwrap()
            .records
            .iter()
            .map(|r| (r.name.clone(), r.map_offset))
            .collect()
    }

    fn pairs(items: &[(&str, usize)]) -> Vec<(String, usize)> {
        items.iter().map(|(n, o)| ((*n).to_string(), *o)).collect()
    }

    #[test]
    fn test_map_flatten_nested_arrays() {
        let mut res = resolver(json!({
            "inner": {"elements": [
                {"name": "a", "type": "uint8_t"},
                {"name": "b", "type": "uint16_t", "array_size": 2}
            ]},
            "outer": {"elements": [
                {"name": "head", "type": "uint8_t"},
                {"name": "items", "type": "inner", "array_size": 2}
            ]}
        }));
        res.resolve_maps(&section(json!({"map_1": {"type": "outer"}}))).unwrap();
        assert_eq!(
            offsets(&res, "map_1"),
            pairs(&[
                ("head", 0),
                ("items[0].a", 1),
                ("items[0].b[0]", 2),
                ("items[0].b[1]", 4),
                ("items[1].a", 6),
                ("items[1].b[0]", 7),
                ("items[1].b[1]", 9),
            ])
        );
        assert_eq!(res.map("map_1").unwrap().size, 11);
        assert_eq!(res.default_map(), Some("map_1"));
    }

    #[test]
    fn test_map_bitfield_records() {
        let mut res = resolver(json!({
            "td": {"elements": [
                {"name": "x", "type": "uint16_t"},
                {"name": "flags", "type": "bf_1", "array_size": 2}
            ]}
        }));
        res.resolve_maps(&section(json!({"map_1": {"type": "td"}}))).unwrap();
        let map = res.map("map_1").unwrap();
        assert_eq!(
            offsets(&res, "map_1"),
            pairs(&[
                ("x", 0),
                ("flags[0].flag_a", 2),
                ("flags[0].flag_b", 2),
                ("flags[0].padding", 2),
                ("flags[1].flag_a", 3),
                ("flags[1].flag_b", 3),
                ("flags[1].padding", 3),
            ])
        );
        let flag_b = &map.records[2];
        assert_eq!(flag_b.resolved_bits, Some(2));
        assert_eq!(flag_b.resolved_bit_offset, Some(1));
        assert_eq!(flag_b.resolved_type_size, 1);
        assert!(flag_b.resolved_type.is_none());
        assert!(map.records[3].reserved);
    }

    #[test]
    fn test_map_inheritance_order() {
        let mut res = resolver(json!({
            "inner": {"unit": "inner", "elements": [
                {"name": "a", "type": "uint8_t"},
                {"name": "b", "type": "uint8_t", "unit": "leaf"}
            ]},
            "outer": {"unit": "root", "flag": "root", "elements": [
                {"name": "n", "type": "inner", "unit": "element", "flag": "element"},
                {"name": "c", "type": "uint8_t"}
            ]}
        }));
        res.resolve_maps(&section(json!({"map_1": {"type": "outer"}}))).unwrap();
        let records = &res.map("map_1").unwrap().records;
        assert_eq!(records[0].props.get("unit"), Some(&json!("inner")));
        assert_eq!(records[0].props.get("flag"), Some(&json!("element")));
        assert_eq!(records[1].props.get("unit"), Some(&json!("leaf")));
        assert_eq!(records[2].props.get("unit"), Some(&json!("root")));
    }

    #[test]
    fn test_map_bitfield_inherits_element_props() {
        let mut res = resolver(json!({
            "td": {"elements": [{"name": "flags", "type": "bf_1", "read_permission": 1}]}
        }));
        res.resolve_maps(&section(json!({"map_1": {"type": "td"}}))).unwrap();
        let records = &res.map("map_1").unwrap().records;
        assert!(records.iter().all(|r| r.props.get("read_permission") == Some(&json!(1))));
    }

    #[test]
    fn test_map_requires_one_map() {
        let mut res = resolver(json!({"td": {"elements": ["a"]}}));
        let err = res.resolve_maps(&Props::new()).unwrap_err();
        assert!(matches!(err, Error::MissingSection("generated_maps")));
    }

    #[test]
    fn test_map_unknown_type() {
        let mut res = resolver(json!({"td": {"elements": ["a"]}}));
        let err = res
            .resolve_maps(&section(json!({"map_1": {"type": "nope"}})))
            .unwrap_err();
        assert!(matches!(err, Error::UnknownType { .. }));
    }

    #[test]
    fn test_map_default_map_must_exist() {
        let mut res = Resolver::new();
        res.resolve_metadata(&section(json!({"app_name": "app", "default_map": "map_9"})))
            .unwrap();
        res.resolve_typedefs(&section(json!({"td": {"elements": ["a"]}})))
            .unwrap();
        let err = res
            .resolve_maps(&section(json!({"map_1": {"type": "td"}, "map_2": {"type": "td"}})))
            .unwrap_err();
        assert!(matches!(err, Error::UnknownMap(name) if name == "map_9"));
    }

    #[test]
    fn test_map_array_uids_are_unique() {
        let mut res = resolver(json!({
            "td": {"elements": [
                {"name": "a", "type": "uint8_t", "array_size": 2},
                {"name": "b", "type": "uint8_t", "array_size": 2}
            ]}
        }));
        res.resolve_maps(&section(json!({"map_1": {"type": "td"}}))).unwrap();
        let records = &res.map("map_1").unwrap().records;
        assert_eq!(records[0].arrays[0].uid, records[1].arrays[0].uid);
        assert_ne!(records[1].arrays[0].uid, records[2].arrays[0].uid);
    }
}
