use hashbrown::HashMap;
use korok_core::prelude::*;
use snafu::prelude::*;

use crate::{
    node, BadTypeSnafu, BadVersionSnafu, Byml, Result, TooDeepSnafu, MAX_DEPTH,
    SUPPORTED_VERSIONS,
};

/// Options for [`Byml::to_binary_with_options`].
#[derive(Clone, Copy, Debug)]
pub struct WriteOptions {
    /// Merge containers whose serialized form is identical so they share one offset.
    /// Defaults to on; turning it off reproduces a writer without subtree sharing.
    pub dedup_containers: bool,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self { dedup_containers: true }
    }
}

impl Byml {
    /// Serializes the document with default options (container deduplication on).
    ///
    /// # Errors
    /// Returns [`BadType`](crate::Error::BadType) if the root is not a container or null,
    /// [`BadVersion`](crate::Error::BadVersion) for an unsupported version or a
    /// [`Binary`](Byml::Binary) node below version 4, or [`TooDeep`](crate::Error::TooDeep)
    /// past the recursion limit.
    pub fn to_binary(&self, endian: Endian, version: u16) -> Result<Vec<u8>> {
        self.to_binary_with_options(endian, version, WriteOptions::default())
    }

    /// Serializes the document.
    ///
    /// The writer makes two passes: the first collects every hash key and string value into
    /// the sorted header tables, the second lays out nodes depth first, children before the
    /// containers that reference them.
    ///
    /// # Errors
    /// See [`to_binary`](Byml::to_binary).
    pub fn to_binary_with_options(
        &self,
        endian: Endian,
        version: u16,
        options: WriteOptions,
    ) -> Result<Vec<u8>> {
        ensure!(SUPPORTED_VERSIONS.contains(&version), BadVersionSnafu { version });
        ensure!(
            matches!(self, Byml::Array(_) | Byml::Hash(_) | Byml::Null),
            BadTypeSnafu { tag: 0u8 }
        );

        let mut writer = Writer {
            out: DataWriter::new(endian),
            keys: StringTable::default(),
            strings: StringTable::default(),
            dedup: options.dedup_containers.then(HashMap::new),
            version,
        };
        writer.collect_strings(self, 0)?;
        writer.keys.build();
        writer.strings.build();

        writer.out.write_all(match endian {
            Endian::Big => b"BY",
            Endian::Little => b"YB",
        });
        writer.out.write_u16(version);
        writer.out.write_u32(0); // hash key table offset
        writer.out.write_u32(0); // string table offset
        writer.out.write_u32(0); // root node offset

        if matches!(self, Byml::Null) {
            return Ok(writer.out.into_inner());
        }

        if !writer.keys.is_empty() {
            let offset = writer.out.position() as u32;
            writer.out.patch_u32(0x4, offset);
            let table = core::mem::take(&mut writer.keys.sorted);
            write_string_table(&mut writer.out, &table);
        }
        if !writer.strings.is_empty() {
            let offset = writer.out.position() as u32;
            writer.out.patch_u32(0x8, offset);
            let table = core::mem::take(&mut writer.strings.sorted);
            write_string_table(&mut writer.out, &table);
        }

        let root_offset = writer.write_value(self, 0)?;
        writer.out.patch_u32(0xC, root_offset);
        writer.out.pad_to(4, 0);
        Ok(writer.out.into_inner())
    }
}

/// An order-insensitive string set that hands out indices into its sorted form.
#[derive(Debug, Default)]
struct StringTable {
    table: HashMap<String, u32>,
    sorted: Vec<String>,
}

impl StringTable {
    fn add(&mut self, value: &str) {
        if !self.table.contains_key(value) {
            self.table.insert(value.to_string(), 0);
        }
    }

    fn build(&mut self) {
        self.sorted = self.table.keys().cloned().collect();
        self.sorted.sort();
        for (index, value) in self.sorted.iter().enumerate() {
            *self.table.get_mut(value).unwrap() = index as u32;
        }
    }

    fn index_of(&self, value: &str) -> u32 {
        self.table[value]
    }

    fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

fn write_string_table(out: &mut DataWriter, strings: &[String]) {
    out.write_u8(node::STRING_TABLE);
    out.write_u24(strings.len() as u32);

    let mut offset = 4 + 4 * (strings.len() + 1);
    for value in strings {
        out.write_u32(offset as u32);
        offset += value.len() + 1;
    }
    out.write_u32(offset as u32);
    for value in strings {
        out.write_cstr(value);
    }
    out.pad_to(4, 0);
}

struct Writer {
    out: DataWriter,
    keys: StringTable,
    strings: StringTable,
    dedup: Option<HashMap<Vec<u8>, u32>>,
    version: u16,
}

impl Writer {
    fn collect_strings(&mut self, value: &Byml, depth: usize) -> Result<()> {
        ensure!(depth < MAX_DEPTH, TooDeepSnafu);
        match value {
            Byml::String(string) => self.strings.add(string),
            Byml::Binary(_) => {
                ensure!(self.version >= 4, BadVersionSnafu { version: self.version });
            }
            Byml::Array(items) => {
                for item in items {
                    self.collect_strings(item, depth + 1)?;
                }
            }
            Byml::Hash(hash) => {
                for (key, item) in hash {
                    self.keys.add(key);
                    self.collect_strings(item, depth + 1)?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn node_type(value: &Byml) -> u8 {
        match value {
            Byml::Null => node::NULL,
            Byml::Bool(_) => node::BOOL,
            Byml::I32(_) => node::I32,
            Byml::U32(_) => node::U32,
            Byml::I64(_) => node::I64,
            Byml::U64(_) => node::U64,
            Byml::Float(_) => node::FLOAT,
            Byml::Double(_) => node::DOUBLE,
            Byml::String(_) => node::STRING,
            Byml::Binary(_) => node::BINARY,
            Byml::Array(_) => node::ARRAY,
            Byml::Hash(_) => node::HASH,
        }
    }

    fn inline_slot(&self, value: &Byml) -> Option<u32> {
        match value {
            Byml::Null => Some(0),
            Byml::Bool(b) => Some(u32::from(*b)),
            Byml::I32(i) => Some(*i as u32),
            Byml::U32(u) => Some(*u),
            Byml::Float(f) => Some(f.to_bits()),
            Byml::String(s) => Some(self.strings.index_of(s)),
            _ => None,
        }
    }

    /// Writes an out-of-line value and returns its absolute offset. Children are written
    /// before their parent so identical subtrees serialize identically, which is what makes
    /// the dedup map work.
    fn write_value(&mut self, value: &Byml, depth: usize) -> Result<u32> {
        ensure!(depth < MAX_DEPTH, TooDeepSnafu);
        match value {
            Byml::I64(v) => {
                let offset = self.out.position() as u32;
                self.out.write_i64(*v);
                Ok(offset)
            }
            Byml::U64(v) => {
                let offset = self.out.position() as u32;
                self.out.write_u64(*v);
                Ok(offset)
            }
            Byml::Double(v) => {
                let offset = self.out.position() as u32;
                self.out.write_f64(*v);
                Ok(offset)
            }
            Byml::Binary(bytes) => {
                let offset = self.out.position() as u32;
                self.out.write_u32(bytes.len() as u32);
                self.out.write_all(bytes);
                self.out.pad_to(4, 0);
                Ok(offset)
            }
            Byml::Array(items) => {
                let mut slots = Vec::with_capacity(items.len());
                for item in items {
                    match self.inline_slot(item) {
                        Some(slot) => slots.push(slot),
                        None => slots.push(self.write_value(item, depth + 1)?),
                    }
                }

                let mut body = DataWriter::new(self.out.endian());
                body.write_u8(node::ARRAY);
                body.write_u24(items.len() as u32);
                for item in items {
                    body.write_u8(Self::node_type(item));
                }
                body.pad_to(4, 0);
                for slot in slots {
                    body.write_u32(slot);
                }
                Ok(self.commit_container(body.into_inner()))
            }
            Byml::Hash(hash) => {
                // Binary form sorts entries by key; in-memory order is
                // whatever insertion produced.
                let mut entries: Vec<(&String, &Byml)> = hash.iter().collect();
                entries.sort_by(|a, b| a.0.cmp(b.0));

                let mut slots = Vec::with_capacity(entries.len());
                for (_, item) in &entries {
                    match self.inline_slot(item) {
                        Some(slot) => slots.push(slot),
                        None => slots.push(self.write_value(item, depth + 1)?),
                    }
                }

                let mut body = DataWriter::new(self.out.endian());
                body.write_u8(node::HASH);
                body.write_u24(entries.len() as u32);
                for ((key, item), slot) in entries.iter().zip(slots) {
                    body.write_u24(self.keys.index_of(key));
                    body.write_u8(Self::node_type(item));
                    body.write_u32(slot);
                }
                Ok(self.commit_container(body.into_inner()))
            }
            _ => unreachable!("inline values have no offset"),
        }
    }

    fn commit_container(&mut self, body: Vec<u8>) -> u32 {
        if let Some(seen) = &mut self.dedup {
            if let Some(&offset) = seen.get(&body) {
                return offset;
            }
            let offset = self.out.position() as u32;
            seen.insert(body.clone(), offset);
            self.out.write_all(&body);
            offset
        } else {
            let offset = self.out.position() as u32;
            self.out.write_all(&body);
            offset
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Error, Hash};

    fn sample_doc() -> Byml {
        let mut hash = Hash::new();
        hash.insert("key".into(), Byml::I32(1));
        hash.insert(
            "arr".into(),
            Byml::Array(vec![Byml::Bool(true), Byml::Null, Byml::Float(3.5)]),
        );
        Byml::Hash(hash)
    }

    #[test]
    fn round_trips_all_node_types_both_endians() {
        let mut hash = Hash::new();
        hash.insert("null".into(), Byml::Null);
        hash.insert("bool".into(), Byml::Bool(true));
        hash.insert("i32".into(), Byml::I32(-5));
        hash.insert("u32".into(), Byml::U32(u32::MAX));
        hash.insert("i64".into(), Byml::I64(i64::MIN));
        hash.insert("u64".into(), Byml::U64(u64::MAX));
        hash.insert("f32".into(), Byml::Float(1.25));
        hash.insert("f64".into(), Byml::Double(-2.5));
        hash.insert("str".into(), Byml::String("hello".into()));
        hash.insert("bin".into(), Byml::Binary(vec![0, 1, 2, 255]));
        hash.insert("arr".into(), Byml::Array(vec![Byml::I32(1), Byml::String("two".into())]));
        let mut inner = Hash::new();
        inner.insert("nested".into(), Byml::Bool(false));
        hash.insert("hash".into(), Byml::Hash(inner));
        let doc = Byml::Hash(hash);

        for endian in [Endian::Little, Endian::Big] {
            let binary = doc.to_binary(endian, 4).unwrap();
            assert_eq!(Byml::from_binary(&binary).unwrap(), doc, "{endian:?}");
        }
    }

    #[test]
    fn hash_keys_serialize_sorted() {
        let mut hash = Hash::new();
        hash.insert("zebra".into(), Byml::I32(1));
        hash.insert("apple".into(), Byml::I32(2));
        let binary = Byml::Hash(hash).to_binary(Endian::Little, 2).unwrap();

        let parsed = Byml::from_binary(&binary).unwrap();
        let keys: Vec<&str> = parsed.as_hash().unwrap().keys().map(String::as_str).collect();
        assert_eq!(keys, ["apple", "zebra"]);
    }

    #[test]
    fn example_document_round_trips() {
        let doc = sample_doc();
        let binary = doc.to_binary(Endian::Little, 2).unwrap();
        let parsed = Byml::from_binary(&binary).unwrap();
        assert_eq!(parsed, doc);
        assert_eq!(parsed.as_hash().unwrap().len(), 2);
        // Reserialization of a parse is stable.
        assert_eq!(parsed.to_binary(Endian::Little, 2).unwrap(), binary);
    }

    #[test]
    fn dedup_merges_identical_subtrees() {
        let item = {
            let mut hash = Hash::new();
            hash.insert("a".into(), Byml::I32(1));
            hash.insert("b".into(), Byml::String("shared".into()));
            Byml::Hash(hash)
        };
        let doc = Byml::Array(vec![item.clone(), item.clone(), item]);

        let deduped = doc.to_binary(Endian::Little, 2).unwrap();
        let verbose = doc
            .to_binary_with_options(Endian::Little, 2, WriteOptions { dedup_containers: false })
            .unwrap();
        assert!(deduped.len() < verbose.len());
        assert_eq!(Byml::from_binary(&deduped).unwrap(), Byml::from_binary(&verbose).unwrap());
    }

    #[test]
    fn binary_nodes_require_version_four() {
        let doc = Byml::Array(vec![Byml::Binary(vec![1, 2, 3])]);
        assert!(matches!(
            doc.to_binary(Endian::Little, 2),
            Err(Error::BadVersion { version: 2 })
        ));
        let binary = doc.to_binary(Endian::Little, 4).unwrap();
        assert_eq!(Byml::from_binary(&binary).unwrap(), doc);
    }

    #[test]
    fn null_document_round_trips() {
        let binary = Byml::Null.to_binary(Endian::Little, 2).unwrap();
        assert_eq!(binary.len(), 0x10);
        assert_eq!(Byml::from_binary(&binary).unwrap(), Byml::Null);
    }

    #[test]
    fn rejects_scalar_root() {
        assert!(matches!(
            Byml::I32(5).to_binary(Endian::Little, 2),
            Err(Error::BadType { .. })
        ));
    }

    #[test]
    fn writer_rejects_runaway_nesting() {
        let mut doc = Byml::Array(Vec::new());
        for _ in 0..MAX_DEPTH + 10 {
            doc = Byml::Array(vec![doc]);
        }
        assert!(matches!(doc.to_binary(Endian::Little, 2), Err(Error::TooDeep)));
    }
}
