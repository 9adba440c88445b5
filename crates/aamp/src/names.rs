//! The process-wide dictionary that recovers readable names from CRC32 hashes.
//!
//! Version 2 archives store only name hashes, so the text form depends on an
//! external mapping. The table seeds itself once from an embedded list of
//! common names and, for every seed of the form `<base>N`, the whole numbered
//! family `<base>0..=999`. Initialization happens on first use behind
//! [`once_cell::sync::Lazy`], after which the table is read-only and safe to
//! consult from any thread. A hash with no entry is not an error; the text
//! form falls back to `!h 0x...`.

use hashbrown::HashMap;
use once_cell::sync::Lazy;

use crc::{Crc, CRC_32_ISO_HDLC};

pub(crate) const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// Computes the CRC32 of a name, the identity every child in an archive is stored under.
#[must_use]
#[inline]
pub fn hash_name(name: &str) -> u32 {
    CRC32.checksum(name.as_bytes())
}

static TABLE: Lazy<HashMap<u32, String>> = Lazy::new(build_table);

/// Looks up the string form of a hash, if the dictionary knows it.
#[must_use]
pub fn get(hash: u32) -> Option<&'static str> {
    TABLE.get(&hash).map(String::as_str)
}

fn build_table() -> HashMap<u32, String> {
    let mut table = HashMap::new();
    let mut add = |name: String| {
        table.entry(hash_name(&name)).or_insert(name);
    };

    for name in include_str!("../data/names.txt")
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
    {
        add(name.to_string());

        // A seed like "Node0" or "Node_0" stands in for its whole numbered
        // family; pre-hash every member so lookups stay O(1).
        let base = name.trim_end_matches(|c: char| c.is_ascii_digit());
        if base.len() < name.len() {
            for i in 0..1000 {
                add(format!("{base}{i}"));
            }
        }
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crc32_matches_the_reference_vector() {
        // The ISO-HDLC check value, the standard zlib crc32.
        assert_eq!(hash_name("123456789"), 0xCBF4_3926);
        assert_eq!(hash_name(""), 0);
    }

    #[test]
    fn seeded_names_resolve() {
        assert_eq!(get(hash_name("param_root")), Some("param_root"));
        assert_eq!(get(hash_name("UnitConfigName")), Some("UnitConfigName"));
    }

    #[test]
    fn numbered_families_are_derived() {
        assert_eq!(get(hash_name("AI_42")), Some("AI_42"));
        assert_eq!(get(hash_name("Node_999")), Some("Node_999"));
        assert_eq!(get(hash_name("Node_1000")), None);
    }

    #[test]
    fn unknown_hashes_fall_through() {
        assert_eq!(get(0xDEAD_BEEF), None);
    }
}
