//! The element-type table (spec.md §4.7) and version packing (§4.7, §4.2).

use num_enum::{IntoPrimitive, TryFromPrimitive};

/// The closed enumeration of chunk element types, tagged 1..10 on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum ElementType {
    U8 = 1,
    U16 = 2,
    U32 = 3,
    U64 = 4,
    I8 = 5,
    I16 = 6,
    I32 = 7,
    I64 = 8,
    F32 = 9,
    F64 = 10,
}

impl ElementType {
    /// Byte size of one element. Any tag outside 1..=10 is not representable
    /// as `ElementType` in the first place; callers holding a raw `u8` tag
    /// read from disk should use `sizeof_tag`, which returns 0 for unknown
    /// tags per spec.md §4.7 rather than failing to construct.
    pub fn size(self) -> usize {
        match self {
            ElementType::U8 | ElementType::I8 => 1,
            ElementType::U16 | ElementType::I16 => 2,
            ElementType::U32 | ElementType::I32 | ElementType::F32 => 4,
            ElementType::U64 | ElementType::I64 | ElementType::F64 => 8,
        }
    }

    pub fn tag(self) -> u8 {
        self.into()
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        ElementType::try_from(tag).ok()
    }
}

/// `sizeof(type)` for a raw on-disk tag. Unknown tags return 0, which callers
/// treat as invalid, matching spec.md §4.7 exactly ("any other value returns
/// 0").
pub fn sizeof_tag(tag: u8) -> usize {
    ElementType::from_tag(tag).map(ElementType::size).unwrap_or(0)
}

/// A packed `(major << 16) | minor` format version, comparable by unsigned
/// integer order as spec.md §4.7 specifies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Version(pub u32);

impl Version {
    pub fn new(major: u16, minor: u16) -> Self {
        Version(make_version(major, minor))
    }

    pub fn major(self) -> u16 {
        (self.0 >> 16) as u16
    }

    pub fn minor(self) -> u16 {
        (self.0 & 0xFFFF) as u16
    }
}

pub fn make_version(major: u16, minor: u16) -> u32 {
    ((major as u32) << 16) | (minor as u32)
}

/// Current format version written by this engine.
pub const CURRENT_VERSION: Version = Version(0x0001_0000); // 1.0

/// Whether a file format version is supported for open. spec.md §4.2 rejects
/// versions strictly between 0.3 and 1.0 even though §3 summarizes the
/// supported range as ">= 0.3 and < 2.0": 0.3 is the legacy format kept for
/// backward compatibility, and 1.0 is where the current format line starts;
/// nothing was ever released in between.
pub fn version_supported(v: Version) -> bool {
    v == Version::new(0, 3) || (v >= Version::new(1, 0) && v < Version::new(2, 0))
}
