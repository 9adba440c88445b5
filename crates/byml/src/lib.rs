//! Adds support for BYML (binary YAML), the typed tree format most structured
//! game data ships in.
//!
//! A document is a tree of [`Byml`] values. The binary form stores two string
//! tables (one for the keys of hash nodes, one for string values) and
//! reference-counts nothing: containers and 64-bit scalars live out of line at
//! absolute offsets, everything else is inlined into its 4-byte slot. The text
//! form is YAML with explicit tags for the types YAML itself cannot
//! distinguish (`!u`, `!l`, `!ul`, `!f`, `!d`, `!!binary`).
//!
//! # Usage
//! ```
//! # use korok_byml::Byml;
//! # use korok_core::prelude::Endian;
//! let mut hash = korok_byml::Hash::new();
//! hash.insert("count".into(), Byml::I32(3));
//! let doc = Byml::Hash(hash);
//! let binary = doc.to_binary(Endian::Little, 2).unwrap();
//! assert_eq!(Byml::from_binary(&binary).unwrap(), doc);
//! let text = doc.to_text();
//! assert_eq!(Byml::from_text(&text).unwrap(), doc);
//! ```

use indexmap::IndexMap;
use snafu::prelude::*;

mod parse;
mod text;
mod write;

pub mod prelude;

pub use write::WriteOptions;

/// Error conditions for when working with BYML documents.
#[derive(Debug, Snafu)]
#[non_exhaustive]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    /// Thrown if the document does not start with "BY" or "YB".
    #[snafu(display("Invalid Magic! Expected \"BY\" or \"YB\"."))]
    BadMagic,
    /// Thrown for a version outside the supported range, or a node the requested writer
    /// version cannot represent.
    #[snafu(display("Unsupported BYML version {version}!"))]
    BadVersion { version: u16 },
    /// Thrown if reading tries to go out of bounds.
    #[snafu(display("Unexpected end of data at offset {offset:#X}!"))]
    Truncated { offset: usize },
    /// Thrown if a node offset or string index points outside its table.
    #[snafu(display("Offset out of bounds at {offset:#X}!"))]
    BadOffset { offset: usize },
    /// Thrown for an unknown node type, or a root node that is not a container.
    #[snafu(display("Unexpected node type {tag:#04X}!"))]
    BadType { tag: u8 },
    /// Thrown if a hash node repeats a key.
    #[snafu(display("Duplicate hash key \"{key}\"!"))]
    DuplicateKey { key: String },
    /// Thrown if the tree nests deeper than the recursion limit.
    #[snafu(display("Tree exceeds the maximum depth of {MAX_DEPTH}!"))]
    TooDeep,
    /// Thrown if string data is not valid UTF-8.
    #[snafu(display("Invalid UTF-8 string at offset {offset:#X}!"))]
    InvalidUtf8 { offset: usize },
    /// Thrown on the first structural violation in a textual document.
    #[snafu(display("Syntax error at line {line}, column {col}: {reason}"))]
    TextSyntax { line: u32, col: u32, reason: String },
}
pub(crate) type Result<T> = core::result::Result<T, Error>;

impl From<korok_core::data::Error> for Error {
    #[inline]
    fn from(error: korok_core::data::Error) -> Self {
        match error {
            korok_core::data::Error::Truncated { offset } => Self::Truncated { offset },
            korok_core::data::Error::InvalidUtf8 { offset } => Self::InvalidUtf8 { offset },
            _ => unreachable!(),
        }
    }
}

impl From<korok_core::yaml::Error> for Error {
    #[inline]
    fn from(error: korok_core::yaml::Error) -> Self {
        let korok_core::yaml::Error::Syntax { line, col, reason } = error else { unreachable!() };
        Self::TextSyntax { line, col, reason: reason.to_string() }
    }
}

/// Maximum nesting depth for both parsing and writing.
pub const MAX_DEPTH: usize = 1024;

/// The versions [`Byml::from_binary`] accepts.
pub const SUPPORTED_VERSIONS: [u16; 5] = [1, 2, 3, 4, 7];

/// A hash node: string keys to values, iteration in insertion order. Equality is
/// order-insensitive; the binary form sorts by key.
pub type Hash = IndexMap<String, Byml>;

/// A BYML value.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum Byml {
    #[default]
    Null,
    Bool(bool),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    Float(f32),
    Double(f64),
    String(String),
    /// Raw bytes. Only representable in binary form from version 4 on.
    Binary(Vec<u8>),
    Array(Vec<Byml>),
    Hash(Hash),
}

impl Byml {
    /// Returns the hash entries if this is a hash node.
    #[must_use]
    pub fn as_hash(&self) -> Option<&Hash> {
        match self {
            Byml::Hash(hash) => Some(hash),
            _ => None,
        }
    }

    /// Returns the items if this is an array node.
    #[must_use]
    pub fn as_array(&self) -> Option<&[Byml]> {
        match self {
            Byml::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Returns the string if this is a string node.
    #[must_use]
    pub fn as_string(&self) -> Option<&str> {
        match self {
            Byml::String(value) => Some(value),
            _ => None,
        }
    }

    /// True for the node kinds that may appear at the root of a document.
    #[must_use]
    pub fn is_container(&self) -> bool {
        matches!(self, Byml::Array(_) | Byml::Hash(_))
    }
}

impl From<bool> for Byml {
    fn from(value: bool) -> Self {
        Byml::Bool(value)
    }
}

impl From<i32> for Byml {
    fn from(value: i32) -> Self {
        Byml::I32(value)
    }
}

impl From<u32> for Byml {
    fn from(value: u32) -> Self {
        Byml::U32(value)
    }
}

impl From<i64> for Byml {
    fn from(value: i64) -> Self {
        Byml::I64(value)
    }
}

impl From<u64> for Byml {
    fn from(value: u64) -> Self {
        Byml::U64(value)
    }
}

impl From<f32> for Byml {
    fn from(value: f32) -> Self {
        Byml::Float(value)
    }
}

impl From<f64> for Byml {
    fn from(value: f64) -> Self {
        Byml::Double(value)
    }
}

impl From<&str> for Byml {
    fn from(value: &str) -> Self {
        Byml::String(value.into())
    }
}

impl From<Vec<Byml>> for Byml {
    fn from(value: Vec<Byml>) -> Self {
        Byml::Array(value)
    }
}

impl From<Hash> for Byml {
    fn from(value: Hash) -> Self {
        Byml::Hash(value)
    }
}

/// Binary node type identifiers.
pub(crate) mod node {
    pub const STRING: u8 = 0xA0;
    pub const BINARY: u8 = 0xA1;
    pub const ARRAY: u8 = 0xC0;
    pub const HASH: u8 = 0xC1;
    pub const STRING_TABLE: u8 = 0xC2;
    pub const BOOL: u8 = 0xD0;
    pub const I32: u8 = 0xD1;
    pub const FLOAT: u8 = 0xD2;
    pub const U32: u8 = 0xD3;
    pub const I64: u8 = 0xD4;
    pub const U64: u8 = 0xD5;
    pub const DOUBLE: u8 = 0xD6;
    pub const NULL: u8 = 0xFF;
}

