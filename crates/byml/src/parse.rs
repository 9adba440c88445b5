use korok_core::prelude::*;
use snafu::prelude::*;

use crate::{
    node, BadMagicSnafu, BadOffsetSnafu, BadTypeSnafu, BadVersionSnafu, Byml, DuplicateKeySnafu,
    Hash, Result, TooDeepSnafu, MAX_DEPTH, SUPPORTED_VERSIONS,
};

impl Byml {
    /// Parses a document from its binary form. Accepts versions 1 through 4 and 7, in
    /// either endianness.
    ///
    /// # Errors
    /// Returns [`BadMagic`](crate::Error::BadMagic), [`BadVersion`](crate::Error::BadVersion),
    /// [`Truncated`](crate::Error::Truncated)/[`BadOffset`](crate::Error::BadOffset) for
    /// malformed tables, [`BadType`](crate::Error::BadType) for unknown node tags,
    /// [`DuplicateKey`](crate::Error::DuplicateKey) for a repeated hash key, or
    /// [`TooDeep`](crate::Error::TooDeep) past the recursion limit.
    pub fn from_binary(data: &[u8]) -> Result<Byml> {
        ensure!(data.len() >= 0x10, crate::TruncatedSnafu { offset: data.len() });
        let endian = match &data[0..2] {
            b"BY" => Endian::Big,
            b"YB" => Endian::Little,
            _ => return BadMagicSnafu.fail(),
        };

        let mut cursor = DataCursor::new(data, endian);
        cursor.skip(2)?;
        let version = cursor.read_u16()?;
        ensure!(SUPPORTED_VERSIONS.contains(&version), BadVersionSnafu { version });

        let key_table_offset = cursor.read_u32()? as usize;
        let string_table_offset = cursor.read_u32()? as usize;
        let root_offset = cursor.read_u32()? as usize;

        if root_offset == 0 {
            return Ok(Byml::Null);
        }

        let parser = Parser {
            cursor: DataCursor::new(data, endian),
            keys: read_string_table(&cursor, key_table_offset)?,
            strings: read_string_table(&cursor, string_table_offset)?,
        };

        let mut root = parser.cursor.at(root_offset)?;
        let tag = root.read_u8()?;
        ensure!(matches!(tag, node::ARRAY | node::HASH), BadTypeSnafu { tag });
        parser.parse_container(tag, root_offset, 0)
    }
}

/// Reads one of the header string tables: a 0xC2 node with a count, a run of
/// offsets relative to the table, and the strings themselves. An offset of
/// zero means the document has no such table, which version 1 files in the
/// wild actually ship.
fn read_string_table(cursor: &DataCursor, offset: usize) -> Result<Vec<String>> {
    if offset == 0 {
        return Ok(Vec::new());
    }
    let mut table = cursor.at(offset)?;
    let tag = table.read_u8()?;
    ensure!(tag == node::STRING_TABLE, BadTypeSnafu { tag });
    let count = table.read_u24()? as usize;

    let mut offsets = Vec::with_capacity(count + 1);
    for _ in 0..=count {
        offsets.push(table.read_u32()? as usize);
    }

    let mut strings = Vec::with_capacity(count);
    for &string_offset in offsets.iter().take(count) {
        let mut string = cursor.at(offset + string_offset)?;
        strings.push(string.read_cstr()?.to_string());
    }
    Ok(strings)
}

struct Parser<'a> {
    cursor: DataCursor<'a>,
    keys: Vec<String>,
    strings: Vec<String>,
}

impl Parser<'_> {
    fn parse_container(&self, tag: u8, offset: usize, depth: usize) -> Result<Byml> {
        ensure!(depth < MAX_DEPTH, TooDeepSnafu);
        let mut cursor = self.cursor.at(offset)?;
        cursor.skip(1)?; // node tag, validated by the caller
        let count = cursor.read_u24()? as usize;

        match tag {
            node::ARRAY => {
                let types = cursor.read_exact(count)?;
                cursor.align_to(4)?;
                let mut items = Vec::with_capacity(count);
                for &item_tag in types {
                    let slot = cursor.read_u32()?;
                    items.push(self.parse_value(item_tag, slot, cursor.position() - 4, depth)?);
                }
                Ok(Byml::Array(items))
            }
            node::HASH => {
                let mut hash = Hash::with_capacity(count);
                for _ in 0..count {
                    let key_index = cursor.read_u24()? as usize;
                    let value_tag = cursor.read_u8()?;
                    let slot = cursor.read_u32()?;
                    let key = self
                        .keys
                        .get(key_index)
                        .context(BadOffsetSnafu { offset: cursor.position() - 8 })?;
                    let value = self.parse_value(value_tag, slot, cursor.position() - 4, depth)?;
                    ensure!(
                        hash.insert(key.clone(), value).is_none(),
                        DuplicateKeySnafu { key: key.clone() }
                    );
                }
                Ok(Byml::Hash(hash))
            }
            _ => BadTypeSnafu { tag }.fail(),
        }
    }

    /// Decodes one value slot. Inline types carry their value in the slot itself;
    /// everything else treats the slot as an absolute offset.
    fn parse_value(&self, tag: u8, slot: u32, slot_offset: usize, depth: usize) -> Result<Byml> {
        match tag {
            node::STRING => {
                let value = self
                    .strings
                    .get(slot as usize)
                    .context(BadOffsetSnafu { offset: slot_offset })?;
                Ok(Byml::String(value.clone()))
            }
            node::BOOL => Ok(Byml::Bool(slot != 0)),
            node::I32 => Ok(Byml::I32(slot as i32)),
            node::FLOAT => Ok(Byml::Float(f32::from_bits(slot))),
            node::U32 => Ok(Byml::U32(slot)),
            node::NULL => Ok(Byml::Null),
            node::BINARY => {
                let mut cursor = self.cursor.at(slot as usize)?;
                let size = cursor.read_u32()? as usize;
                Ok(Byml::Binary(cursor.read_exact(size)?.to_vec()))
            }
            node::I64 => {
                let mut cursor = self.cursor.at(slot as usize)?;
                Ok(Byml::I64(cursor.read_i64()?))
            }
            node::U64 => {
                let mut cursor = self.cursor.at(slot as usize)?;
                Ok(Byml::U64(cursor.read_u64()?))
            }
            node::DOUBLE => {
                let mut cursor = self.cursor.at(slot as usize)?;
                Ok(Byml::Double(cursor.read_f64()?))
            }
            node::ARRAY | node::HASH => self.parse_container(tag, slot as usize, depth + 1),
            tag => BadTypeSnafu { tag }.fail(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[test]
    fn rejects_bad_magic_and_version() {
        assert!(matches!(
            Byml::from_binary(b"XX\x02\x00\0\0\0\0\0\0\0\0\0\0\0\0"),
            Err(Error::BadMagic)
        ));
        let mut data = Vec::new();
        data.extend_from_slice(b"YB");
        data.extend_from_slice(&5u16.to_le_bytes());
        data.extend_from_slice(&[0u8; 12]);
        assert!(matches!(Byml::from_binary(&data), Err(Error::BadVersion { version: 5 })));
    }

    #[test]
    fn zero_root_offset_is_a_null_document() {
        let mut data = Vec::new();
        data.extend_from_slice(b"YB");
        data.extend_from_slice(&2u16.to_le_bytes());
        data.extend_from_slice(&[0u8; 12]);
        assert_eq!(Byml::from_binary(&data).unwrap(), Byml::Null);
    }

    #[test]
    fn version_one_without_string_tables_parses() {
        // Header with both table offsets zero, root = [null] at 0x10.
        let mut data = Vec::new();
        data.extend_from_slice(b"YB");
        data.extend_from_slice(&1u16.to_le_bytes());
        data.extend_from_slice(&0u32.to_le_bytes());
        data.extend_from_slice(&0u32.to_le_bytes());
        data.extend_from_slice(&0x10u32.to_le_bytes());
        data.push(node::ARRAY);
        data.extend_from_slice(&[1, 0, 0]); // count u24
        data.extend_from_slice(&[node::NULL, 0, 0, 0]); // type + padding
        data.extend_from_slice(&0u32.to_le_bytes()); // null slot
        assert_eq!(Byml::from_binary(&data).unwrap(), Byml::Array(vec![Byml::Null]));
    }

    #[test]
    fn rejects_deep_nesting() {
        // A chain of single-element arrays, each pointing at the next.
        let depth = MAX_DEPTH + 10;
        let mut data = Vec::new();
        data.extend_from_slice(b"YB");
        data.extend_from_slice(&2u16.to_le_bytes());
        data.extend_from_slice(&0u32.to_le_bytes());
        data.extend_from_slice(&0u32.to_le_bytes());
        data.extend_from_slice(&0x10u32.to_le_bytes());
        for i in 0..depth {
            let offset = 0x10 + i * 12;
            data.push(node::ARRAY);
            data.extend_from_slice(&[1, 0, 0]);
            data.extend_from_slice(&[node::ARRAY, 0, 0, 0]);
            data.extend_from_slice(&((offset + 12) as u32).to_le_bytes());
        }
        // Terminal empty array, never reached.
        data.push(node::ARRAY);
        data.extend_from_slice(&[0, 0, 0]);
        assert!(matches!(Byml::from_binary(&data), Err(Error::TooDeep)));
    }

    #[test]
    fn rejects_out_of_range_string_index() {
        // An empty string value table plus a node claiming string index 0.
        let mut data = Vec::new();
        data.extend_from_slice(b"YB");
        data.extend_from_slice(&2u16.to_le_bytes());
        data.extend_from_slice(&0u32.to_le_bytes());
        data.extend_from_slice(&0u32.to_le_bytes());
        data.extend_from_slice(&0x10u32.to_le_bytes());
        data.push(node::ARRAY);
        data.extend_from_slice(&[1, 0, 0]);
        data.extend_from_slice(&[node::STRING, 0, 0, 0]);
        data.extend_from_slice(&0u32.to_le_bytes());
        assert!(matches!(Byml::from_binary(&data), Err(Error::BadOffset { .. })));
    }
}
