//! Adds support for AAMP, the binary parameter archive format behind most of
//! the tunable data in EAD titles (`.baiprog`, `.bxml`, `.bchemical`, ...).
//!
//! A [`ParameterIO`] is a tree: parameter lists own lists and objects, objects
//! own typed scalar [`Parameter`]s. Every child is keyed by the CRC32 of its
//! name; version 2 files store only the hashes, so readable names come from a
//! process-wide dictionary (see [`names`]) and fall back to `!h 0x...` in the
//! text form when the dictionary has no entry.
//!
//! # Usage
//! ```
//! # use korok_aamp::{Parameter, ParameterIO};
//! let mut pio = ParameterIO::new("korok_demo", 0);
//! let obj = pio.param_root.objects.entry("Settings".into()).or_default();
//! obj.insert("Scale", Parameter::F32(1.5));
//! let binary = pio.to_binary().unwrap();
//! assert_eq!(ParameterIO::from_binary(&binary).unwrap(), pio);
//! ```

use indexmap::IndexMap;
use snafu::prelude::*;

pub mod names;
pub mod types;

mod parse;
mod text;
mod write;

pub mod prelude;

pub use types::{Color, Curve, ParamType, Quat, Vec2, Vec3, Vec4};

/// Error conditions for when working with parameter archives.
#[derive(Debug, Snafu)]
#[non_exhaustive]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    /// Thrown if the header contains a magic number other than "AAMP".
    #[snafu(display("Invalid Magic! Expected {MAGIC:?}."))]
    BadMagic,
    /// Thrown for an archive or parameter IO version this crate does not handle.
    #[snafu(display("Unsupported AAMP version {version}!"))]
    BadVersion { version: u32 },
    /// Thrown if reading tries to go out of bounds.
    #[snafu(display("Unexpected end of data at offset {offset:#X}!"))]
    Truncated { offset: usize },
    /// Thrown if a record offset points outside the archive.
    #[snafu(display("Offset out of bounds at {offset:#X}!"))]
    BadOffset { offset: usize },
    /// Thrown for an unknown parameter type byte.
    #[snafu(display("Unexpected parameter type {tag:#04X}!"))]
    BadType { tag: u8 },
    /// Thrown if a list or object repeats a child name.
    #[snafu(display("Duplicate name hash {hash:#010X}!"))]
    DuplicateKey { hash: u32 },
    /// Thrown if the tree nests deeper than the recursion limit.
    #[snafu(display("Tree exceeds the maximum depth of {MAX_DEPTH}!"))]
    TooDeep,
    /// Thrown if string data is not valid UTF-8.
    #[snafu(display("Invalid UTF-8 string at offset {offset:#X}!"))]
    InvalidUtf8 { offset: usize },
    /// Thrown on the first structural violation in a textual document.
    #[snafu(display("Syntax error at line {line}, column {col}: {reason}"))]
    TextSyntax { line: u32, col: u32, reason: String },
    /// Thrown if the serialized archive would overflow the format's offset fields.
    #[snafu(display("Archive exceeds the format's offset range!"))]
    FileTooBig,
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

/// Unique identifier that tells us if we're reading a parameter archive.
pub const MAGIC: [u8; 4] = *b"AAMP";

/// The only binary version in the wild.
pub const VERSION: u32 = 2;

/// Maximum nesting depth for both parsing and writing.
pub const MAX_DEPTH: usize = 1024;

/// A child name, stored as the CRC32 of its string form. Two names are equal exactly when
/// their hashes are, which makes equality insensitive to whether the string is known.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Name(pub u32);

impl Name {
    /// The CRC32 hash this name stores.
    #[inline]
    #[must_use]
    pub fn hash(self) -> u32 {
        self.0
    }

    /// Recovers the string form from the process-wide dictionary, if it is known.
    #[must_use]
    pub fn as_str(self) -> Option<&'static str> {
        names::get(self.0)
    }
}

impl From<&str> for Name {
    #[inline]
    fn from(name: &str) -> Self {
        Self(names::hash_name(name))
    }
}

impl From<u32> for Name {
    #[inline]
    fn from(hash: u32) -> Self {
        Self(hash)
    }
}

/// A single typed parameter value.
#[derive(Clone, Debug, PartialEq)]
pub enum Parameter {
    Bool(bool),
    F32(f32),
    Int(i32),
    Vec2(Vec2),
    Vec3(Vec3),
    Vec4(Vec4),
    Color(Color),
    String32(String),
    String64(String),
    Curve1([Curve; 1]),
    Curve2([Curve; 2]),
    Curve3([Curve; 3]),
    Curve4([Curve; 4]),
    BufferInt(Vec<i32>),
    BufferF32(Vec<f32>),
    String256(String),
    Quat(Quat),
    U32(u32),
    BufferU32(Vec<u32>),
    BufferBinary(Vec<u8>),
    StringRef(String),
}

impl Parameter {
    /// The binary type byte for this value.
    #[must_use]
    pub fn param_type(&self) -> ParamType {
        match self {
            Parameter::Bool(_) => ParamType::Bool,
            Parameter::F32(_) => ParamType::F32,
            Parameter::Int(_) => ParamType::Int,
            Parameter::Vec2(_) => ParamType::Vec2,
            Parameter::Vec3(_) => ParamType::Vec3,
            Parameter::Vec4(_) => ParamType::Vec4,
            Parameter::Color(_) => ParamType::Color,
            Parameter::String32(_) => ParamType::String32,
            Parameter::String64(_) => ParamType::String64,
            Parameter::Curve1(_) => ParamType::Curve1,
            Parameter::Curve2(_) => ParamType::Curve2,
            Parameter::Curve3(_) => ParamType::Curve3,
            Parameter::Curve4(_) => ParamType::Curve4,
            Parameter::BufferInt(_) => ParamType::BufferInt,
            Parameter::BufferF32(_) => ParamType::BufferF32,
            Parameter::String256(_) => ParamType::String256,
            Parameter::Quat(_) => ParamType::Quat,
            Parameter::U32(_) => ParamType::U32,
            Parameter::BufferU32(_) => ParamType::BufferU32,
            Parameter::BufferBinary(_) => ParamType::BufferBinary,
            Parameter::StringRef(_) => ParamType::StringRef,
        }
    }

    /// Returns the string for any of the string-typed variants.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Parameter::String32(s)
            | Parameter::String64(s)
            | Parameter::String256(s)
            | Parameter::StringRef(s) => Some(s),
            _ => None,
        }
    }
}

/// A mapping from names to parameters.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ParameterObject(pub IndexMap<Name, Parameter>);

impl ParameterObject {
    /// Looks up a parameter by name or hash.
    #[must_use]
    pub fn get(&self, name: impl Into<Name>) -> Option<&Parameter> {
        self.0.get(&name.into())
    }

    /// Sets a parameter, replacing any previous value under the same name.
    pub fn insert(&mut self, name: impl Into<Name>, value: Parameter) {
        self.0.insert(name.into(), value);
    }

    /// The number of parameters in this object.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if the object holds no parameters.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A mapping from names to child lists and objects.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ParameterList {
    pub lists: IndexMap<Name, ParameterList>,
    pub objects: IndexMap<Name, ParameterObject>,
}

impl ParameterList {
    /// Looks up a child list by name or hash.
    #[must_use]
    pub fn list(&self, name: impl Into<Name>) -> Option<&ParameterList> {
        self.lists.get(&name.into())
    }

    /// Looks up a child object by name or hash.
    #[must_use]
    pub fn object(&self, name: impl Into<Name>) -> Option<&ParameterObject> {
        self.objects.get(&name.into())
    }
}

/// A full parameter archive: a root list plus the type tag and version carried in the
/// header.
#[derive(Clone, Debug, PartialEq)]
pub struct ParameterIO {
    /// Data version, free for the owning system to define.
    pub version: u32,
    /// Type tag identifying what the archive configures, e.g. `"xml"`.
    pub data_type: String,
    /// The root parameter list.
    pub param_root: ParameterList,
}

impl ParameterIO {
    /// Creates an empty archive with the given type tag and data version.
    #[must_use]
    pub fn new(data_type: impl Into<String>, version: u32) -> Self {
        Self { version, data_type: data_type.into(), param_root: ParameterList::default() }
    }

    /// Shorthand for looking up an object directly under the root.
    #[must_use]
    pub fn object(&self, name: impl Into<Name>) -> Option<&ParameterObject> {
        self.param_root.object(name)
    }

    /// Shorthand for looking up a list directly under the root.
    #[must_use]
    pub fn list(&self, name: impl Into<Name>) -> Option<&ParameterList> {
        self.param_root.list(name)
    }
}
