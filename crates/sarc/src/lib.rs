//! Adds support for SARC (SEAD ARChive), the flat file container used across
//! Wii U and Switch game content.
//!
//! # Layout
//! ```text
//! [0x00] SARC header  (0x14 bytes)
//! [0x14] SFAT header  (0x0C bytes) + node records (count x 0x10)
//! [...]  SFNT header  (0x08 bytes) + NUL-terminated names, 4-byte aligned
//! [...]  File data, starting at the offset given in the SARC header
//! ```
//!
//! Endianness is decided by the byte order mark at offset 6. Node records are
//! sorted ascending by name hash so the runtime can binary search; each record
//! stores half-open `[begin, end)` offsets relative to the data section.
//!
//! # Usage
//! * [`Sarc`] parses an archive and hands out views of the stored files.
//! * [`SarcWriter`] builds one, deriving each file's alignment from its
//!   content; [`SarcWriter::from_sarc`] reproduces a conforming archive
//!   byte for byte.

use snafu::prelude::*;

mod parse;
mod write;

pub use parse::{File, Sarc};
pub use write::SarcWriter;

pub mod prelude;

/// Error conditions for when working with SARC archives.
#[derive(Debug, Snafu)]
#[non_exhaustive]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    /// Thrown if a header contains a magic number other than "SARC"/"SFAT"/"SFNT", or an
    /// invalid byte order mark.
    #[snafu(display("Invalid Magic! Expected {expected:?}."))]
    BadMagic { expected: [u8; 4] },
    /// Thrown if the archive version is not 0x0100.
    #[snafu(display("Unsupported SARC version {version:#06X}!"))]
    BadVersion { version: u16 },
    /// Thrown if reading tries to go out of bounds.
    #[snafu(display("Unexpected end of data at offset {offset:#X}!"))]
    Truncated { offset: usize },
    /// Thrown if a node or table offset points outside the archive.
    #[snafu(display("Offset out of bounds at {offset:#X}!"))]
    BadOffset { offset: usize },
    /// Thrown if a file name is not valid UTF-8.
    #[snafu(display("Invalid UTF-8 string at offset {offset:#X}!"))]
    InvalidUtf8 { offset: usize },
    /// Thrown if the serialized archive would not fit in the u32 offsets of the format.
    #[snafu(display("Archive exceeds 4 GiB!"))]
    ArchiveTooBig,
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

/// Unique identifier that tells us if we're reading a SARC archive.
pub const MAGIC: [u8; 4] = *b"SARC";
pub(crate) const SFAT_MAGIC: [u8; 4] = *b"SFAT";
pub(crate) const SFNT_MAGIC: [u8; 4] = *b"SFNT";

pub(crate) const HEADER_SIZE: u16 = 0x14;
pub(crate) const SFAT_HEADER_SIZE: u16 = 0xC;
pub(crate) const SFNT_HEADER_SIZE: u16 = 0x8;
pub(crate) const VERSION: u16 = 0x0100;

/// The multiplier every known archive uses for its name hash.
pub const HASH_MULTIPLIER: u32 = 0x65;

/// Computes the SFAT name hash: `h = h * multiplier + byte` over the UTF-8 name,
/// wrapping u32 arithmetic.
#[must_use]
#[inline]
pub fn hash_name(multiplier: u32, name: &str) -> u32 {
    name.bytes()
        .fold(0u32, |hash, b| hash.wrapping_mul(multiplier).wrapping_add(u32::from(b)))
}

/// Returns the storage alignment a file of this content wants inside an archive.
///
/// The table is keyed on the leading magic of the (logically) uncompressed content;
/// Yaz0-wrapped data is sniffed through the wrapper, since the first chunk group of a
/// compressed stream starts with the literal magic bytes.
#[must_use]
pub fn sniff_alignment(data: &[u8]) -> usize {
    let head: &[u8] = if korok_yaz0::read_header(data).is_ok() && data.len() > 0x15 {
        &data[0x11..]
    } else {
        data
    };
    match head {
        _ if head.starts_with(b"BNTX") || head.starts_with(b"BNSH") => 0x1000,
        _ if head.starts_with(b"FRES") || head.starts_with(b"Gfx2") => 0x2000,
        _ if head.starts_with(&MAGIC) => 0x2000,
        _ if head.starts_with(b"AAMP") => 8,
        _ if head.starts_with(b"BY") || head.starts_with(b"YB") => 4,
        _ => 4,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_matches_formula() {
        assert_eq!(hash_name(HASH_MULTIPLIER, ""), 0);
        assert_eq!(hash_name(HASH_MULTIPLIER, "a"), 0x61);
        assert_eq!(hash_name(HASH_MULTIPLIER, "b"), 0x62);
        // 'a' * 0x65 + 'b'
        assert_eq!(hash_name(HASH_MULTIPLIER, "ab"), 0x61 * 0x65 + 0x62);
    }

    #[test]
    fn sniffs_content_alignments() {
        assert_eq!(sniff_alignment(b"BNTX\0\0\0\0"), 0x1000);
        assert_eq!(sniff_alignment(b"BNSH\0\0\0\0"), 0x1000);
        assert_eq!(sniff_alignment(b"FRES\0\0\0\0"), 0x2000);
        assert_eq!(sniff_alignment(b"Gfx2\0\0\0\0"), 0x2000);
        assert_eq!(sniff_alignment(b"SARC\0\0\0\0"), 0x2000);
        assert_eq!(sniff_alignment(b"AAMP\0\0\0\0"), 8);
        assert_eq!(sniff_alignment(b"BY\0\x01"), 4);
        assert_eq!(sniff_alignment(b"YB\x01\0"), 4);
        assert_eq!(sniff_alignment(b"plain text"), 4);
        assert_eq!(sniff_alignment(b""), 4);
    }

    #[test]
    fn sniffs_through_yaz0_wrapper() {
        // A compressed AAMP: the first group is literals, so the inner magic
        // sits right after the flag byte at 0x10.
        let compressed = korok_yaz0::compress(b"AAMP\x02\0\0\0 some parameter data", 7).unwrap();
        assert_eq!(&compressed[0x11..0x15], b"AAMP");
        assert_eq!(sniff_alignment(&compressed), 8);
    }
}
