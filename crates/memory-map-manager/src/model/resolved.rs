//! Resolved memory map entities.
//!
//! These types carry every computed `resolved_*` value alongside the keys
//! of the description they came from. Their serialized form is the
//! configuration snapshot and the source of the CSV columns.

use std::collections::BTreeMap;

use serde::ser::{SerializeMap, SerializeStruct};
use serde::{Serialize, Serializer};
use serde_json::Value;

use super::Props;
use crate::expr::Scalar;
use crate::primitive::Primitive;

#[allow(clippy::trivially_copy_pass_by_ref)]
fn is_false(b: &bool) -> bool {
    !*b
}

/// A resolved define.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Define {
    /// The value as written.
    pub value: Value,
    /// The evaluated value. Quoted strings are kept with their quotes.
    pub resolved_value: Scalar,
    /// Human readable description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Remaining keys.
    #[serde(flatten)]
    pub props: Props,
}

/// A resolved enum member.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnumMember {
    /// Member name.
    pub name: String,
    /// The value as written, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    /// The computed value.
    pub resolved_value: i128,
    /// Human readable description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Remaining keys.
    #[serde(flatten)]
    pub props: Props,
}

/// A resolved enum.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Enumeration {
    /// Members in declaration order, referenced members first.
    pub elements: Vec<EnumMember>,
    /// The type as written, if any.
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub ty: Option<String>,
    /// Underlying integer type.
    pub resolved_type: Primitive,
    /// Size of the underlying type in bytes.
    pub resolved_type_size: usize,
    /// Whether implicit values are successive bits.
    #[serde(skip_serializing_if = "is_false")]
    pub bitwise: bool,
    /// Whether any value uses a define.
    pub use_defines: bool,
    /// Human readable description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Remaining keys.
    #[serde(flatten)]
    pub props: Props,
}

/// A resolved bitfield member.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BitfieldMember {
    /// Member name.
    pub name: String,
    /// The width as written, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bits: Option<Value>,
    /// Width in bits.
    pub resolved_bits: u32,
    /// Offset of the least significant bit.
    pub resolved_bit_offset: u32,
    /// Whether this is generated padding.
    #[serde(skip_serializing_if = "is_false")]
    pub reserved: bool,
    /// Human readable description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Remaining keys.
    #[serde(flatten)]
    pub props: Props,
}

/// A resolved bitfield.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Bitfield {
    /// Members from the least significant bit up, padding last.
    pub elements: Vec<BitfieldMember>,
    /// The type as written, if any.
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub ty: Option<String>,
    /// Underlying integer type.
    pub resolved_type: Primitive,
    /// Size of the underlying type in bytes.
    pub resolved_type_size: usize,
    /// Whether any width uses a define.
    pub use_defines: bool,
    /// Human readable description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Remaining keys.
    #[serde(flatten)]
    pub props: Props,
}

/// What a typedef element refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElementKind {
    /// A primitive C type.
    Primitive(Primitive),
    /// An enum stored as its primitive type.
    Enum(String),
    /// A bitfield.
    Bitfield(String),
    /// A nested typedef.
    Typedef(String),
}

/// A resolved typedef element.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Element {
    /// Element name.
    pub name: String,
    /// The type as written, if any.
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub ty: Option<String>,
    /// The array size as written, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub array_size: Option<Value>,
    /// Human readable description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Enum the element holds, if any.
    #[serde(rename = "enum", skip_serializing_if = "Option::is_none")]
    pub enum_name: Option<String>,
    /// Whether this is generated padding.
    #[serde(skip_serializing_if = "is_false")]
    pub reserved: bool,
    /// C type of one item.
    pub resolved_type: String,
    /// Size of one item in bytes.
    pub resolved_type_size: usize,
    /// Size of the element in bytes.
    pub resolved_total_size: usize,
    /// Offset within the typedef.
    pub resolved_offset: usize,
    /// Number of items, for arrays.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_array_size: Option<usize>,
    /// Remaining keys.
    #[serde(flatten)]
    pub props: Props,
    /// What the type refers to.
    #[serde(skip)]
    pub kind: ElementKind,
}

impl Element {
    /// Build a reserved `uint8_t` padding array.
    #[must_use]
    pub fn padding(name: impl Into<String>, offset: usize, size: usize) -> Self {
        Self {
            name: name.into(),
            ty: None,
            array_size: None,
            description: Some("padding bytes".to_string()),
            enum_name: None,
            reserved: true,
            resolved_type: Primitive::U8.c_name().to_string(),
            resolved_type_size: 1,
            resolved_total_size: size,
            resolved_offset: offset,
            resolved_array_size: Some(size),
            props: Props::new(),
            kind: ElementKind::Primitive(Primitive::U8),
        }
    }

    /// Offset of the first byte after the element.
    #[must_use]
    pub fn end(&self) -> usize {
        self.resolved_offset + self.resolved_total_size
    }
}

/// A resolved typedef.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Typedef {
    /// Elements in layout order, padding included.
    pub elements: Vec<Element>,
    /// The fixed size as written, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_size: Option<Value>,
    /// Size in bytes.
    pub resolved_total_size: usize,
    /// Typedefs used by elements, sorted.
    pub deps: Vec<String>,
    /// Whether an element is a bitfield.
    pub use_bitfields: bool,
    /// Whether an element is an enum.
    pub use_enums: bool,
    /// Whether a size uses a define.
    pub use_defines: bool,
    /// Human readable description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Remaining keys.
    #[serde(flatten)]
    pub props: Props,
}

/// One enclosing array level of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ArrayLevel {
    pub size: usize,
    pub stride: usize,
    pub uid: usize,
    pub idx: usize,
}

/// Loop information of a compressed record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompressInfo {
    /// Number of items of the array.
    pub size: usize,
    /// Bytes between two items.
    pub stride: usize,
    /// Identifier of the array, unique within the map.
    pub uid: usize,
    /// Index variable standing for this level.
    pub idx_name: String,
    /// Whether the loop over this array opens at this record.
    pub start: bool,
    /// Whether the loop over this array closes at this record.
    pub end: bool,
}

/// A flattened record of a memory map.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Record {
    /// Dotted path of the record.
    pub name: String,
    /// Byte offset within the map.
    pub map_offset: usize,
    /// The type as written, if any.
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub ty: Option<String>,
    /// The array size as written, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub array_size: Option<Value>,
    /// Human readable description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Enum the record holds, if any.
    #[serde(rename = "enum", skip_serializing_if = "Option::is_none")]
    pub enum_name: Option<String>,
    /// Whether this is generated padding.
    #[serde(skip_serializing_if = "is_false")]
    pub reserved: bool,
    /// C type of the record, absent for bitfield members.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_type: Option<String>,
    /// Size of the storage unit in bytes.
    pub resolved_type_size: usize,
    /// Size of the whole element in bytes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_total_size: Option<usize>,
    /// Offset within the enclosing typedef.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_offset: Option<usize>,
    /// Number of items of the originating array.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_array_size: Option<usize>,
    /// The bit width as written, for bitfield members.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bits: Option<Value>,
    /// Bit width, for bitfield members.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_bits: Option<u32>,
    /// Bit offset, for bitfield members.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_bit_offset: Option<u32>,
    /// Users allowed to read.
    pub resolved_read_permission: u8,
    /// Users allowed to write.
    pub resolved_write_permission: u8,
    /// `write | read << 4`.
    pub resolved_access: u8,
    /// Whether any user may read.
    pub readable: bool,
    /// Whether any user may write.
    pub writable: bool,
    /// Evaluated scaling factor.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_scaling_factor: Option<Scalar>,
    /// Evaluated default.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_default: Option<Scalar>,
    /// Evaluated minimum.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_min: Option<Scalar>,
    /// Evaluated maximum.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_max: Option<Scalar>,
    /// Default divided by the scaling factor.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_scaled_default: Option<Scalar>,
    /// Minimum divided by the scaling factor.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_scaled_min: Option<Scalar>,
    /// Maximum divided by the scaling factor.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_scaled_max: Option<Scalar>,
    /// Whether an override changed the default.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_changed: Option<bool>,
    /// Offset expression over the loop indices, for compressed records.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compressed_offset: Option<String>,
    /// Loop information, for compressed records inside arrays.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compressed_info: Option<Vec<CompressInfo>>,
    /// Inherited and own keys.
    #[serde(flatten)]
    pub props: Props,
    #[serde(skip)]
    pub(crate) arrays: Vec<ArrayLevel>,
}

impl Record {
    /// Whether the value must be truncated to an integer after scaling.
    #[must_use]
    pub fn is_integral(&self) -> bool {
        self.resolved_bits.is_some()
            || self
                .resolved_type
                .as_deref()
                .and_then(Primitive::from_name)
                .is_some_and(Primitive::is_integer)
    }

    /// Whether every enclosing array index is the first one.
    #[must_use]
    pub fn is_first_of_arrays(&self) -> bool {
        self.arrays.iter().all(|level| level.idx == 0)
    }

    /// Serialize to a JSON object.
    ///
    /// # Errors
    ///
    /// Returns an error if a value cannot be represented in JSON.
    pub fn to_object(&self) -> serde_json::Result<Props> {
        match serde_json::to_value(self)? {
            Value::Object(map) => Ok(map),
            _ => Ok(Props::new()),
        }
    }
}

/// A flattened memory map.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryMap {
    /// Map name.
    pub name: String,
    /// Root typedef.
    pub ty: String,
    /// Size in bytes.
    pub size: usize,
    /// Every record in byte order.
    pub records: Vec<Record>,
    /// Records with every array index collapsed to a loop variable.
    pub compressed_records: Vec<Record>,
}

impl Serialize for MemoryMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("MemoryMap", 3)?;
        state.serialize_field("records", &self.records)?;
        state.serialize_field("compressed_records", &self.compressed_records)?;
        state.serialize_field("type", &self.ty)?;
        state.end()
    }
}

/// Permission users and their bits, in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PermissionUsers(Vec<(String, u8)>);

impl PermissionUsers {
    /// Assign `1 << i` to the i-th user.
    #[must_use]
    pub fn new(users: &[String]) -> Self {
        Self(
            users
                .iter()
                .zip(0u8..)
                .map(|(user, idx)| (user.clone(), 1 << idx))
                .collect(),
        )
    }

    /// Bit of a user.
    #[must_use]
    pub fn bit(&self, user: &str) -> Option<u8> {
        self.0.iter().find(|(name, _)| name == user).map(|(_, bit)| *bit)
    }

    /// Iterate users with their bits.
    pub fn iter(&self) -> impl Iterator<Item = (&str, u8)> {
        self.0.iter().map(|(name, bit)| (name.as_str(), *bit))
    }

    /// Whether no user is declared.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Serialize for PermissionUsers {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (name, bit) in &self.0 {
            map.serialize_entry(name, bit)?;
        }
        map.end()
    }
}

/// Resolved metadata, hashes included.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Metadata {
    /// Application name.
    pub app_name: String,
    /// Interface version.
    pub version: String,
    /// Major part of the version.
    pub major_version: u64,
    /// Minor part of the version.
    pub minor_version: u64,
    /// Patch part of the version.
    pub patch_version: u64,
    /// Alignment of each typedef element.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub align: Option<usize>,
    /// Alignment of whole typedefs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub struct_align: Option<usize>,
    /// Map used by overrides that name none.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_map: Option<String>,
    /// Type of elements that name none.
    pub default_type: Primitive,
    /// Declared permission users.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub permission_users: Vec<String>,
    /// Bit of each permission user.
    pub resolved_permission_users: PermissionUsers,
    /// Hash over every record of every map.
    pub full_hash: String,
    /// Hash over what shapes the firmware layout.
    pub fw_hash: String,
    /// Hash over the layout and descriptions.
    pub sw_hash: String,
    /// Remaining keys.
    #[serde(flatten)]
    pub props: Props,
}

/// The fully resolved description.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemoryMapConfig {
    /// Typedefs in dependency order.
    pub typedefs: Vec<(String, Typedef)>,
    /// Bitfields in description order.
    pub bitfields: Vec<(String, Bitfield)>,
    /// Enums in description order.
    pub enums: Vec<(String, Enumeration)>,
    /// Defines in description order.
    pub defines: Vec<(String, Define)>,
    /// Metadata and hashes.
    pub metadata: Metadata,
    /// Maps in description order.
    pub maps: Vec<MemoryMap>,
}

impl MemoryMapConfig {
    /// Look up a typedef by name.
    #[must_use]
    pub fn typedef(&self, name: &str) -> Option<&Typedef> {
        self.typedefs.iter().find(|(n, _)| n == name).map(|(_, td)| td)
    }

    /// Whether a define with this name exists.
    #[must_use]
    pub fn has_define(&self, name: &str) -> bool {
        self.defines.iter().any(|(n, _)| n == name)
    }

    /// Look up a map by name.
    #[must_use]
    pub fn map(&self, name: &str) -> Option<&MemoryMap> {
        self.maps.iter().find(|m| m.name == name)
    }
}

struct TypedefList<'a>(&'a [(String, Typedef)]);

impl Serialize for TypedefList<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.0.iter().map(|(name, td)| BTreeMap::from([(name, td)])))
    }
}

struct NamedTable<'a, T>(&'a [(String, T)]);

impl<T: Serialize> Serialize for NamedTable<'_, T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.0.iter().map(|(name, entry)| (name, entry)))
    }
}

struct MapTable<'a>(&'a [MemoryMap]);

impl Serialize for MapTable<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.0.iter().map(|m| (&m.name, m)))
    }
}

impl Serialize for MemoryMapConfig {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("MemoryMapConfig", 6)?;
        state.serialize_field("typedefs", &TypedefList(&self.typedefs))?;
        state.serialize_field("bitfields", &NamedTable(&self.bitfields))?;
        state.serialize_field("enums", &NamedTable(&self.enums))?;
        state.serialize_field("defines", &NamedTable(&self.defines))?;
        state.serialize_field("metadata", &self.metadata)?;
        state.serialize_field("maps", &MapTable(&self.maps))?;
        state.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_padding_element() {
        let pad = Element::padding("padding_0", 1, 3);
        assert!(pad.reserved);
        assert_eq!(pad.resolved_type, "uint8_t");
        assert_eq!(pad.resolved_array_size, Some(3));
        assert_eq!(pad.end(), 4);
        let value = serde_json::to_value(&pad).unwrap();
        assert_eq!(value["description"], "padding bytes");
        assert_eq!(value["reserved"], true);
    }

    #[test]
    fn test_permission_users() {
        let users = PermissionUsers::new(&["user_1".to_string(), "user_2".to_string()]);
        assert_eq!(users.bit("user_1"), Some(1));
        assert_eq!(users.bit("user_2"), Some(2));
        assert_eq!(users.bit("user_3"), None);
        assert_eq!(
            serde_json::to_string(&users).unwrap(),
            r#"{"user_1":1,"user_2":2}"#
        );
    }

    #[test]
    fn test_record_integral() {
        let mut rec = Record {
            resolved_type: Some("uint16_t".to_string()),
            ..Record::default()
        };
        assert!(rec.is_integral());
        rec.resolved_type = Some("float".to_string());
        assert!(!rec.is_integral());
        rec.resolved_type = None;
        rec.resolved_bits = Some(3);
        assert!(rec.is_integral());
    }

    #[test]
    fn test_record_object_flattens_props() {
        let mut rec = Record {
            name: "record_1".to_string(),
            ..Record::default()
        };
        rec.props.insert("flag".to_string(), json!("x"));
        let obj = rec.to_object().unwrap();
        assert_eq!(obj.get("flag"), Some(&json!("x")));
        assert_eq!(obj.get("name"), Some(&json!("record_1")));
        assert!(!obj.contains_key("compressed_info"));
        assert!(!obj.contains_key("reserved"));
    }

    #[test]
    fn test_config_serialization_shape() {
        let cfg = MemoryMapConfig {
            maps: vec![MemoryMap {
                name: "map_1".to_string(),
                ty: "type_1".to_string(),
                size: 0,
                records: vec![],
                compressed_records: vec![],
            }],
            ..MemoryMapConfig::default()
        };
        let value = serde_json::to_value(&cfg).unwrap();
        assert_eq!(value["typedefs"], json!([]));
        assert_eq!(value["maps"]["map_1"]["type"], "type_1");
        assert_eq!(value["maps"]["map_1"]["records"], json!([]));
    }
}
