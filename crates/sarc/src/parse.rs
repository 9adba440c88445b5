use korok_core::prelude::*;
use snafu::prelude::*;

use crate::{
    hash_name, BadMagicSnafu, BadOffsetSnafu, BadVersionSnafu, Result, TruncatedSnafu,
    HEADER_SIZE, MAGIC, SFAT_HEADER_SIZE, SFAT_MAGIC, SFNT_HEADER_SIZE, SFNT_MAGIC, VERSION,
};

#[derive(Debug, Clone)]
struct Entry {
    name: Option<String>,
    hash: u32,
    start: usize,
    end: usize,
}

/// Provides read-only access to a file that is stored in a SARC archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct File<'a> {
    /// File name, if the archive stores one for this entry.
    pub name: Option<&'a str>,
    /// SFAT hash of the file name.
    pub hash: u32,
    /// Absolute offset of the file's data within the archive.
    pub offset: usize,
    /// The file's contents.
    pub data: &'a [u8],
}

/// A parsed SARC archive, owning the archive bytes.
#[derive(Debug, Clone)]
pub struct Sarc {
    data: Vec<u8>,
    entries: Vec<Entry>,
    endian: Endian,
    data_offset: usize,
    hash_multiplier: u32,
    sorted: bool,
}

impl Sarc {
    /// Parses an archive from its serialized form.
    ///
    /// # Errors
    /// Returns [`BadMagic`](Error::BadMagic) for a wrong magic or byte order mark,
    /// [`BadVersion`](Error::BadVersion) for an unknown version,
    /// [`Truncated`](Error::Truncated)/[`BadOffset`](Error::BadOffset) for out-of-bounds
    /// tables, or [`InvalidUtf8`](Error::InvalidUtf8) for a malformed file name.
    pub fn from_binary(data: impl Into<Vec<u8>>) -> Result<Self> {
        let data = data.into();
        ensure!(data.len() >= HEADER_SIZE as usize, TruncatedSnafu { offset: data.len() });

        // The byte order mark sits after the header size field, so it gets
        // peeked raw before any endian-aware read happens.
        let endian = match (data[6], data[7]) {
            (0xFE, 0xFF) => Endian::Big,
            (0xFF, 0xFE) => Endian::Little,
            _ => return BadMagicSnafu { expected: MAGIC }.fail(),
        };

        let mut cursor = DataCursor::new(&data, endian);
        let magic = cursor.read_exact(4)?;
        ensure!(magic == MAGIC, BadMagicSnafu { expected: MAGIC });
        let header_size = cursor.read_u16()?;
        ensure!(header_size == HEADER_SIZE, BadOffsetSnafu { offset: 4usize });
        cursor.skip(2)?; // BOM, already consumed above

        let file_size = cursor.read_u32()? as usize;
        ensure!(file_size <= data.len(), TruncatedSnafu { offset: file_size });
        let data_offset = cursor.read_u32()? as usize;
        ensure!(data_offset <= data.len(), BadOffsetSnafu { offset: 0xCusize });
        let version = cursor.read_u16()?;
        ensure!(version == VERSION, BadVersionSnafu { version });
        cursor.skip(2)?;

        let magic = cursor.read_exact(4)?;
        ensure!(magic == SFAT_MAGIC, BadMagicSnafu { expected: SFAT_MAGIC });
        let sfat_size = cursor.read_u16()?;
        ensure!(sfat_size == SFAT_HEADER_SIZE, BadOffsetSnafu { offset: cursor.position() });
        let count = cursor.read_u16()? as usize;
        let hash_multiplier = cursor.read_u32()?;

        let mut raw_nodes = Vec::with_capacity(count);
        for _ in 0..count {
            let hash = cursor.read_u32()?;
            let attrs = cursor.read_u32()?;
            let start = cursor.read_u32()? as usize;
            let end = cursor.read_u32()? as usize;
            ensure!(
                start <= end && data_offset + end <= data.len(),
                BadOffsetSnafu { offset: cursor.position() - 8 }
            );
            raw_nodes.push((hash, attrs, start, end));
        }

        let magic = cursor.read_exact(4)?;
        ensure!(magic == SFNT_MAGIC, BadMagicSnafu { expected: SFNT_MAGIC });
        let sfnt_size = cursor.read_u16()?;
        ensure!(sfnt_size == SFNT_HEADER_SIZE, BadOffsetSnafu { offset: cursor.position() });
        cursor.skip(2)?;
        let name_table = cursor.position();

        let mut entries: Vec<Entry> = Vec::with_capacity(count);
        let mut sorted = true;
        for (i, (hash, attrs, start, end)) in raw_nodes.into_iter().enumerate() {
            let name = if attrs >> 24 != 0 {
                let offset = name_table + (attrs & 0x00FF_FFFF) as usize * 4;
                ensure!(offset < data_offset, BadOffsetSnafu { offset });
                let mut names = cursor.at(offset)?;
                Some(names.read_cstr()?.to_string())
            } else {
                None
            };
            if i > 0 && entries[i - 1].hash > hash {
                sorted = false;
            }
            entries.push(Entry { name, hash, start, end });
        }

        Ok(Self { data, entries, endian, data_offset, hash_multiplier, sorted })
    }

    /// The number of files in the archive.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the archive holds no files.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The endianness the archive was stored with.
    #[inline]
    #[must_use]
    pub fn endian(&self) -> Endian {
        self.endian
    }

    /// The multiplier used by the archive's name hash.
    #[inline]
    #[must_use]
    pub fn hash_multiplier(&self) -> u32 {
        self.hash_multiplier
    }

    /// Iterates over the stored files in node order.
    pub fn files(&self) -> impl Iterator<Item = File<'_>> {
        self.entries.iter().map(|entry| File {
            name: entry.name.as_deref(),
            hash: entry.hash,
            offset: self.data_offset + entry.start,
            data: &self.data[self.data_offset + entry.start..self.data_offset + entry.end],
        })
    }

    /// Looks up a file's data by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.get_file(name).map(|file| file.data)
    }

    /// Looks up a file by name. Hashes the name and binary-searches the node table when the
    /// archive is sorted, the common case.
    #[must_use]
    pub fn get_file(&self, name: &str) -> Option<File<'_>> {
        let hash = hash_name(self.hash_multiplier, name);
        if self.sorted {
            let mut index = self.entries.partition_point(|entry| entry.hash < hash);
            while index < self.entries.len() && self.entries[index].hash == hash {
                let entry = &self.entries[index];
                // A hash collision is resolved by the stored name; a nameless
                // entry can only match by hash.
                if entry.name.as_deref().is_none_or(|n| n == name) {
                    return Some(self.file_at(index));
                }
                index += 1;
            }
            None
        } else {
            self.entries
                .iter()
                .position(|entry| {
                    entry.hash == hash && entry.name.as_deref().is_none_or(|n| n == name)
                })
                .map(|index| self.file_at(index))
        }
    }

    fn file_at(&self, index: usize) -> File<'_> {
        let entry = &self.entries[index];
        File {
            name: entry.name.as_deref(),
            hash: entry.hash,
            offset: self.data_offset + entry.start,
            data: &self.data[self.data_offset + entry.start..self.data_offset + entry.end],
        }
    }

    /// The smallest alignment consistent with every file's absolute offset. Used to carry an
    /// archive's alignment over when rebuilding it with
    /// [`SarcWriter::from_sarc`](crate::SarcWriter::from_sarc).
    #[must_use]
    pub fn guess_min_alignment(&self) -> usize {
        let mut alignment = usize::MAX;
        for entry in &self.entries {
            let offset = self.data_offset + entry.start;
            let file_alignment = if offset == 0 { 4 } else { 1 << offset.trailing_zeros() };
            alignment = alignment.min(file_alignment);
        }
        if alignment == usize::MAX {
            4
        } else {
            alignment.max(4)
        }
    }
}

/// Archives are equal when they hold the same set of files; storage order does not matter.
impl PartialEq for Sarc {
    fn eq(&self, other: &Self) -> bool {
        if self.entries.len() != other.entries.len() {
            return false;
        }
        let collect = |sarc: &'_ Sarc| {
            let mut files: Vec<(u32, Option<String>, Vec<u8>)> = sarc
                .files()
                .map(|f| (f.hash, f.name.map(str::to_string), f.data.to_vec()))
                .collect();
            files.sort();
            files
        };
        collect(self) == collect(other)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[test]
    fn rejects_short_and_bad_input() {
        assert!(matches!(Sarc::from_binary(&b"SARC"[..]), Err(Error::Truncated { .. })));
        let mut bad = vec![0u8; 0x40];
        bad[..4].copy_from_slice(b"CRAS");
        bad[6] = 0xFE;
        bad[7] = 0xFF;
        assert!(matches!(Sarc::from_binary(bad), Err(Error::BadMagic { .. })));
    }

    #[test]
    fn rejects_bad_bom() {
        let mut bad = vec![0u8; 0x40];
        bad[..4].copy_from_slice(b"SARC");
        bad[6] = 0x00;
        bad[7] = 0x00;
        assert!(matches!(Sarc::from_binary(bad), Err(Error::BadMagic { .. })));
    }
}
