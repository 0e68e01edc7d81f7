//! Input shapes of the description sections, as read from YAML.
//!
//! Every struct keeps the keys it does not know in `props`. Those keys are
//! carried into the resolved output and inherited by the records of a map.

use serde::{Deserialize, Deserializer};
use serde_json::Value;

use super::Props;

/// A member written either as a bare name or as a mapping.
#[derive(Deserialize)]
#[serde(untagged)]
enum NameOr<T> {
    Name(String),
    Entry(T),
}

fn members<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + From<String>,
{
    let items = Vec::<NameOr<T>>::deserialize(deserializer)?;
    Ok(items
        .into_iter()
        .map(|item| match item {
            NameOr::Name(name) => T::from(name),
            NameOr::Entry(entry) => entry,
        })
        .collect())
}

/// An element of a typedef.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RawElement {
    /// Element name.
    pub name: String,
    /// Type name. Defaults to the metadata's default type.
    #[serde(rename = "type", default)]
    pub ty: Option<String>,
    /// Array size, a number or an expression.
    #[serde(default)]
    pub array_size: Option<Value>,
    /// Human readable description.
    #[serde(default)]
    pub description: Option<String>,
    /// Remaining keys.
    #[serde(flatten)]
    pub props: Props,
}

/// A typedef: an ordered list of elements.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RawTypedef {
    /// Elements in declaration order.
    #[serde(default, deserialize_with = "members")]
    pub elements: Vec<RawElement>,
    /// Typedef whose elements are prepended.
    #[serde(default)]
    pub reference: Option<String>,
    /// Fixed size in bytes, a number or an expression.
    #[serde(default)]
    pub total_size: Option<Value>,
    /// Human readable description.
    #[serde(default)]
    pub description: Option<String>,
    /// Remaining keys.
    #[serde(flatten)]
    pub props: Props,
}

/// A member of a bitfield.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RawBitfieldMember {
    /// Member name.
    pub name: String,
    /// Width in bits, a number or an expression. Defaults to 1.
    #[serde(default)]
    pub bits: Option<Value>,
    /// Human readable description.
    #[serde(default)]
    pub description: Option<String>,
    /// Remaining keys.
    #[serde(flatten)]
    pub props: Props,
}

/// A bitfield: members packed into one unsigned integer.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RawBitfield {
    /// Members from the least significant bit up.
    #[serde(default, deserialize_with = "members")]
    pub elements: Vec<RawBitfieldMember>,
    /// Underlying integer type.
    #[serde(rename = "type", default)]
    pub ty: Option<String>,
    /// Bitfield whose members are prepended.
    #[serde(default)]
    pub reference: Option<String>,
    /// Human readable description.
    #[serde(default)]
    pub description: Option<String>,
    /// Remaining keys.
    #[serde(flatten)]
    pub props: Props,
}

/// A member of an enum.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RawEnumMember {
    /// Member name.
    pub name: String,
    /// Explicit value, a number or an expression.
    #[serde(default)]
    pub value: Option<Value>,
    /// Human readable description.
    #[serde(default)]
    pub description: Option<String>,
    /// Remaining keys.
    #[serde(flatten)]
    pub props: Props,
}

/// An enum.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RawEnum {
    /// Members in declaration order.
    #[serde(default, deserialize_with = "members")]
    pub elements: Vec<RawEnumMember>,
    /// Underlying integer type.
    #[serde(rename = "type", default)]
    pub ty: Option<String>,
    /// Whether implicit values are successive bits.
    #[serde(default)]
    pub bitwise: bool,
    /// Enum whose members are prepended.
    #[serde(default)]
    pub reference: Option<String>,
    /// Human readable description.
    #[serde(default)]
    pub description: Option<String>,
    /// Remaining keys.
    #[serde(flatten)]
    pub props: Props,
}

/// The `metadata` section.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RawMetadata {
    /// Application name.
    pub app_name: String,
    /// Interface version, `major.minor.patch`.
    #[serde(default)]
    pub version: Option<String>,
    /// Alignment of each typedef element.
    #[serde(default)]
    pub align: Option<usize>,
    /// Alignment of whole typedefs.
    #[serde(default)]
    pub struct_align: Option<usize>,
    /// Map used by overrides that name none.
    #[serde(default)]
    pub default_map: Option<String>,
    /// Type of elements that name none.
    #[serde(default)]
    pub default_type: Option<String>,
    /// Users that can be granted access, in bit order.
    #[serde(default)]
    pub permission_users: Vec<String>,
    /// Remaining keys.
    #[serde(flatten)]
    pub props: Props,
}

/// An entry of the `generated_maps` section.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RawMap {
    /// Root typedef of the map.
    #[serde(rename = "type")]
    pub ty: String,
    /// Remaining keys.
    #[serde(flatten)]
    pub props: Props,
}

macro_rules! impl_from_name {
    ($ty:ty { $($field:ident),* }) => {
        impl From<String> for $ty {
            fn from(name: String) -> Self {
                Self {
                    name,
                    $($field: None,)*
                    props: Props::new(),
                }
            }
        }
    };
}

impl_from_name!(RawElement { ty, array_size, description });
impl_from_name!(RawBitfieldMember { bits, description });
impl_from_name!(RawEnumMember { value, description });

/// Entries whose element list can be extended with `reference`.
pub(crate) trait Inherits: Clone {
    type Member: Clone;

    fn reference(&self) -> Option<&str>;
    fn members(&self) -> &[Self::Member];
    fn set_members(&mut self, members: Vec<Self::Member>);
}

macro_rules! impl_inherits {
    ($ty:ty, $member:ty) => {
        impl Inherits for $ty {
            type Member = $member;

            fn reference(&self) -> Option<&str> {
                self.reference.as_deref()
            }

            fn members(&self) -> &[Self::Member] {
                &self.elements
            }

            fn set_members(&mut self, members: Vec<Self::Member>) {
                self.elements = members;
                self.reference = None;
            }
        }
    };
}

impl_inherits!(RawTypedef, RawElement);
impl_inherits!(RawBitfield, RawBitfieldMember);
impl_inherits!(RawEnum, RawEnumMember);
