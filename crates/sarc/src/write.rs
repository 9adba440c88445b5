use indexmap::IndexMap;
use korok_core::prelude::*;
use snafu::prelude::*;

use crate::{
    hash_name, sniff_alignment, ArchiveTooBigSnafu, Result, Sarc, HASH_MULTIPLIER, HEADER_SIZE,
    MAGIC, SFAT_HEADER_SIZE, SFAT_MAGIC, SFNT_HEADER_SIZE, SFNT_MAGIC, VERSION,
};

/// The node count field is 16 bits with the top two bits reserved.
const MAX_FILES: usize = 0x3FFF;

/// Builds SARC archives.
///
/// Files keep their insertion order in the writer but are emitted in hash order, as the
/// format requires. Per-file alignment is the maximum of the archive-wide minimum and the
/// alignment sniffed from the file's content (see
/// [`sniff_alignment`](crate::sniff_alignment)).
#[derive(Debug, Default)]
pub struct SarcWriter {
    endian: Endian,
    min_alignment: usize,
    hash_multiplier: u32,
    files: IndexMap<String, Vec<u8>>,
    unnamed: Vec<(u32, Vec<u8>)>,
}

impl SarcWriter {
    /// Creates an empty writer. The writer defaults to a 4-byte minimum alignment.
    #[must_use]
    pub fn new(endian: Endian) -> Self {
        Self {
            endian,
            min_alignment: 4,
            hash_multiplier: HASH_MULTIPLIER,
            files: IndexMap::new(),
            unnamed: Vec::new(),
        }
    }

    /// Creates a writer that reproduces an existing archive: same endianness, same hash
    /// multiplier, same observable alignment, same files. Writing it back yields the
    /// original bytes when the source came from a conforming writer.
    #[must_use]
    pub fn from_sarc(sarc: &Sarc) -> Self {
        let mut writer = Self::new(sarc.endian());
        writer.hash_multiplier = sarc.hash_multiplier();
        writer.min_alignment = sarc.guess_min_alignment();
        for file in sarc.files() {
            match file.name {
                Some(name) => {
                    writer.files.insert(name.to_string(), file.data.to_vec());
                }
                None => writer.unnamed.push((file.hash, file.data.to_vec())),
            }
        }
        writer
    }

    /// Sets the archive-wide minimum alignment.
    ///
    /// # Panics
    /// Panics if `alignment` is not a power of two.
    pub fn set_min_alignment(&mut self, alignment: usize) {
        assert!(alignment.is_power_of_two(), "alignment must be a power of two");
        self.min_alignment = alignment;
    }

    /// Adds a file, replacing any previous content under the same name.
    pub fn add(&mut self, name: impl Into<String>, data: impl Into<Vec<u8>>) {
        self.files.insert(name.into(), data.into());
    }

    /// Removes a file by name, returning its data if it was present.
    pub fn remove(&mut self, name: &str) -> Option<Vec<u8>> {
        self.files.shift_remove(name)
    }

    /// The number of files currently staged.
    #[must_use]
    pub fn len(&self) -> usize {
        self.files.len() + self.unnamed.len()
    }

    /// Returns `true` if no files are staged.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty() && self.unnamed.is_empty()
    }

    /// Serializes the archive. Returns the archive alignment (the largest alignment any
    /// stored file required) along with the bytes; callers embedding the archive in other
    /// content are expected to honor it.
    ///
    /// # Errors
    /// Returns [`ArchiveTooBig`](crate::Error::ArchiveTooBig) if the node count or any
    /// offset would not fit the format's fields.
    pub fn write(&self) -> Result<(usize, Vec<u8>)> {
        ensure!(self.len() <= MAX_FILES, ArchiveTooBigSnafu);

        struct Node<'a> {
            hash: u32,
            name: Option<&'a str>,
            data: &'a [u8],
            alignment: usize,
            name_offset: u32,
            start: usize,
        }

        let mut nodes: Vec<Node> = self
            .files
            .iter()
            .map(|(name, data)| Node {
                hash: hash_name(self.hash_multiplier, name),
                name: Some(name),
                data,
                alignment: 4,
                name_offset: 0,
                start: 0,
            })
            .chain(self.unnamed.iter().map(|(hash, data)| Node {
                hash: *hash,
                name: None,
                data,
                alignment: 4,
                name_offset: 0,
                start: 0,
            }))
            .collect();
        nodes.sort_by(|a, b| a.hash.cmp(&b.hash).then_with(|| a.name.cmp(&b.name)));

        // Entries without a stored name cannot be relocated by consumers, so
        // the archive falls back to the legacy 0x100 minimum for them.
        let min_alignment = if self.unnamed.is_empty() {
            self.min_alignment
        } else {
            self.min_alignment.max(0x100)
        };

        let mut archive_alignment = min_alignment;
        for node in &mut nodes {
            node.alignment = min_alignment.max(sniff_alignment(node.data));
            archive_alignment = archive_alignment.max(node.alignment);
        }

        // Name table and data section layout happen up front; the tables
        // reference both.
        let mut names = DataWriter::new(self.endian);
        let mut data_pos = 0usize;
        for node in &mut nodes {
            if let Some(name) = node.name {
                node.name_offset = (names.len() / 4) as u32;
                names.write_cstr(name);
                names.pad_to(4, 0);
            }
            node.start = align_up(data_pos, node.alignment);
            data_pos = node.start + node.data.len();
        }

        let table_size = HEADER_SIZE as usize
            + SFAT_HEADER_SIZE as usize
            + nodes.len() * 0x10
            + SFNT_HEADER_SIZE as usize
            + names.len();
        let data_offset = align_up(table_size, archive_alignment);
        let file_size = data_offset + data_pos;
        ensure!(u32::try_from(file_size).is_ok(), ArchiveTooBigSnafu);

        let mut out = DataWriter::with_capacity(self.endian, file_size);
        out.write_all(&MAGIC);
        out.write_u16(HEADER_SIZE);
        out.write_u16(0xFEFF);
        out.write_u32(file_size as u32);
        out.write_u32(data_offset as u32);
        out.write_u16(VERSION);
        out.write_u16(0);

        out.write_all(&SFAT_MAGIC);
        out.write_u16(SFAT_HEADER_SIZE);
        out.write_u16(nodes.len() as u16);
        out.write_u32(self.hash_multiplier);
        for node in &nodes {
            out.write_u32(node.hash);
            match node.name {
                Some(_) => out.write_u32(0x0100_0000 | node.name_offset),
                None => out.write_u32(0),
            }
            out.write_u32(node.start as u32);
            out.write_u32((node.start + node.data.len()) as u32);
        }

        out.write_all(&SFNT_MAGIC);
        out.write_u16(SFNT_HEADER_SIZE);
        out.write_u16(0);
        out.write_all(names.as_slice());

        for node in &nodes {
            // Zero padding up to the file's absolute position.
            let absolute = data_offset + node.start;
            out.write_all(&vec![0u8; absolute - out.len()]);
            out.write_all(node.data);
        }
        debug_assert_eq!(out.len(), file_size);

        Ok((archive_alignment, out.into_inner()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[test]
    fn two_file_archive_layout() {
        let mut writer = SarcWriter::new(Endian::Little);
        writer.add("a", vec![1, 2, 3, 4]);
        writer.add("b", vec![5, 6, 7, 8]);
        let (alignment, bytes) = writer.write().unwrap();
        assert_eq!(alignment, 4);

        #[rustfmt::skip]
        let expected: Vec<u8> = vec![
            // SARC header
            b'S', b'A', b'R', b'C', 0x14, 0x00, 0xFF, 0xFE,
            0x58, 0x00, 0x00, 0x00, 0x50, 0x00, 0x00, 0x00,
            0x00, 0x01, 0x00, 0x00,
            // SFAT header
            b'S', b'F', b'A', b'T', 0x0C, 0x00, 0x02, 0x00,
            0x65, 0x00, 0x00, 0x00,
            // node "a": hash 0x61, named at word 0, data [0, 4)
            0x61, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01,
            0x00, 0x00, 0x00, 0x00, 0x04, 0x00, 0x00, 0x00,
            // node "b": hash 0x62, named at word 1, data [4, 8)
            0x62, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x01,
            0x04, 0x00, 0x00, 0x00, 0x08, 0x00, 0x00, 0x00,
            // SFNT header + names
            b'S', b'F', b'N', b'T', 0x08, 0x00, 0x00, 0x00,
            b'a', 0x00, 0x00, 0x00, b'b', 0x00, 0x00, 0x00,
            // data
            1, 2, 3, 4, 5, 6, 7, 8,
        ];
        assert_eq!(bytes, expected);
    }

    #[test]
    fn nodes_are_emitted_in_hash_order() {
        let mut writer = SarcWriter::new(Endian::Little);
        // Insertion order deliberately scrambled relative to hash order.
        writer.add("zeta.byml", vec![0u8; 3]);
        writer.add("alpha.byml", vec![1u8; 5]);
        writer.add("omega/deep/path.bxml", vec![2u8; 7]);
        let (_, bytes) = writer.write().unwrap();

        let sarc = Sarc::from_binary(bytes).unwrap();
        let hashes: Vec<u32> = sarc.files().map(|f| f.hash).collect();
        let mut sorted = hashes.clone();
        sorted.sort_unstable();
        assert_eq!(hashes, sorted);
        assert_eq!(sarc.get("alpha.byml").unwrap(), &[1u8; 5][..]);
        assert_eq!(sarc.get("omega/deep/path.bxml").unwrap(), &[2u8; 7][..]);
        assert!(sarc.get("missing.byml").is_none());
    }

    #[test]
    fn parse_write_round_trip_is_bit_exact() {
        let mut writer = SarcWriter::new(Endian::Big);
        writer.add("Actor/Pack/A.sbactorpack", b"content one".to_vec());
        writer.add("Actor/Pack/B.sbactorpack", b"content two, longer".to_vec());
        writer.add("Model/cube.txt", vec![9u8; 100]);
        let (_, bytes) = writer.write().unwrap();

        let sarc = Sarc::from_binary(bytes.clone()).unwrap();
        let rebuilt = SarcWriter::from_sarc(&sarc);
        let (_, bytes2) = rebuilt.write().unwrap();
        assert_eq!(bytes, bytes2);
        assert_eq!(sarc, Sarc::from_binary(bytes2).unwrap());
    }

    #[test]
    fn content_sniffing_drives_file_alignment() {
        let mut writer = SarcWriter::new(Endian::Little);
        writer.add("tex.bntx", b"BNTX\x00\x00\x00\x00texture".to_vec());
        writer.add("note.txt", b"tiny".to_vec());
        writer.add("param.baiprog", b"AAMP\x02\x00\x00\x00params".to_vec());
        let (alignment, bytes) = writer.write().unwrap();
        assert_eq!(alignment, 0x1000);

        let sarc = Sarc::from_binary(bytes).unwrap();
        for file in sarc.files() {
            assert_eq!(file.offset % sniff_alignment(file.data), 0, "{:?}", file.name);
        }
    }

    #[test]
    fn unnamed_entries_raise_the_minimum_alignment() {
        let mut writer = SarcWriter::new(Endian::Little);
        writer.unnamed.push((0xCAFE_F00D, vec![1, 2, 3]));
        writer.add("named.txt", vec![4, 5, 6]);
        let (alignment, bytes) = writer.write().unwrap();
        assert!(alignment >= 0x100);

        let sarc = Sarc::from_binary(bytes).unwrap();
        assert_eq!(sarc.len(), 2);
        let unnamed: Vec<_> = sarc.files().filter(|f| f.name.is_none()).collect();
        assert_eq!(unnamed.len(), 1);
        assert_eq!(unnamed[0].hash, 0xCAFE_F00D);
        assert_eq!(unnamed[0].data, &[1, 2, 3]);

        // And the round trip carries the unnamed entry along.
        let (_, bytes2) = SarcWriter::from_sarc(&sarc).write().unwrap();
        assert_eq!(Sarc::from_binary(bytes2).unwrap(), sarc);
    }

    #[test]
    fn empty_archive_round_trips() {
        let writer = SarcWriter::new(Endian::Little);
        let (_, bytes) = writer.write().unwrap();
        let sarc = Sarc::from_binary(bytes).unwrap();
        assert!(sarc.is_empty());
    }

    #[test]
    fn rejects_too_many_files() {
        let mut writer = SarcWriter::new(Endian::Little);
        for i in 0..=MAX_FILES {
            writer.files.insert(format!("file_{i}"), Vec::new());
        }
        assert!(matches!(writer.write(), Err(Error::ArchiveTooBig)));
    }
}
