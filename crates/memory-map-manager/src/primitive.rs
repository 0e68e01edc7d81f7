//! Primitive C types that leaf elements of a memory map can use.

use std::fmt;
use std::str::FromStr;

use serde::{Serialize, Serializer};

/// A fixed-size C primitive type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Primitive {
    /// `uint8_t`
    U8,
    /// `int8_t`
    I8,
    /// `uint16_t`
    U16,
    /// `int16_t`
    I16,
    /// `uint32_t`
    U32,
    /// `int32_t`
    I32,
    /// `uint64_t`
    U64,
    /// `int64_t`
    I64,
    /// `char`
    Char,
    /// `float`
    Float,
    /// `double`
    Double,
}

impl Primitive {
    /// Every primitive type.
    pub const ALL: [Self; 11] = [
        Self::U8,
        Self::I8,
        Self::U16,
        Self::I16,
        Self::U32,
        Self::I32,
        Self::U64,
        Self::I64,
        Self::Char,
        Self::Float,
        Self::Double,
    ];

    /// Type used for elements that do not name one.
    pub const DEFAULT: Self = Self::U32;

    /// Look up a primitive by its C name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.c_name() == name)
    }

    /// The C spelling of the type.
    #[must_use]
    pub const fn c_name(self) -> &'static str {
        match self {
            Self::U8 => "uint8_t",
            Self::I8 => "int8_t",
            Self::U16 => "uint16_t",
            Self::I16 => "int16_t",
            Self::U32 => "uint32_t",
            Self::I32 => "int32_t",
            Self::U64 => "uint64_t",
            Self::I64 => "int64_t",
            Self::Char => "char",
            Self::Float => "float",
            Self::Double => "double",
        }
    }

    /// Size in bytes.
    #[must_use]
    pub const fn size(self) -> usize {
        match self {
            Self::U8 | Self::I8 | Self::Char => 1,
            Self::U16 | Self::I16 => 2,
            Self::U32 | Self::I32 | Self::Float => 4,
            Self::U64 | Self::I64 | Self::Double => 8,
        }
    }

    /// Whether the type is a fixed-width integer.
    #[must_use]
    pub const fn is_integer(self) -> bool {
        !matches!(self, Self::Char | Self::Float | Self::Double)
    }

    /// Whether the type is a signed fixed-width integer.
    #[must_use]
    pub const fn is_signed(self) -> bool {
        matches!(self, Self::I8 | Self::I16 | Self::I32 | Self::I64)
    }

    /// Inclusive value range of an integer type.
    #[must_use]
    pub fn bounds(self) -> Option<(i128, i128)> {
        if !self.is_integer() {
            return None;
        }
        let bits = u32::try_from(self.size() * 8).ok()?;
        if self.is_signed() {
            Some((-(1_i128 << (bits - 1)), (1_i128 << (bits - 1)) - 1))
        } else {
            Some((0, (1_i128 << bits) - 1))
        }
    }

    /// Smallest unsigned type holding `bits` bits.
    #[must_use]
    pub const fn smallest_unsigned(bits: u32) -> Self {
        if bits > 32 {
            Self::U64
        } else if bits > 16 {
            Self::U32
        } else if bits > 8 {
            Self::U16
        } else {
            Self::U8
        }
    }
}

impl Default for Primitive {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl fmt::Display for Primitive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.c_name())
    }
}

impl FromStr for Primitive {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_name(s).ok_or_else(|| format!("{s} is not a primitive type"))
    }
}

impl Serialize for Primitive {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.c_name())
    }
}
