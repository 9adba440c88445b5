use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use korok_core::yaml::{self, Map, Mark, Node, Scalar, Seq};
use snafu::prelude::*;

use crate::{Byml, DuplicateKeySnafu, Hash, Result};

impl Byml {
    /// Renders the document as YAML. Hash entries emit in their in-memory (insertion)
    /// order, so a document that came from text keeps its key order.
    #[must_use]
    pub fn to_text(&self) -> String {
        yaml::emit(&to_node(self))
    }

    /// Parses a document from its YAML form.
    ///
    /// # Errors
    /// Returns [`TextSyntax`](crate::Error::TextSyntax) for malformed YAML or an unusable
    /// tag, and [`DuplicateKey`](crate::Error::DuplicateKey) for repeated hash keys.
    pub fn from_text(text: &str) -> Result<Byml> {
        let node = yaml::parse(text)?;
        from_node(&node)
    }
}

fn to_node(value: &Byml) -> Node {
    match value {
        Byml::Null => Node::Scalar(Scalar::null()),
        Byml::Bool(b) => Node::Scalar(Scalar::literal(if *b { "true" } else { "false" })),
        Byml::I32(i) => Node::Scalar(Scalar::literal(i.to_string())),
        Byml::U32(u) => Node::Scalar(Scalar::tagged("!u", u.to_string())),
        Byml::I64(i) => Node::Scalar(Scalar::tagged("!l", i.to_string())),
        Byml::U64(u) => Node::Scalar(Scalar::tagged("!ul", u.to_string())),
        Byml::Float(f) => Node::Scalar(Scalar::literal(yaml::format_f32(*f))),
        Byml::Double(d) => Node::Scalar(Scalar::tagged("!d", yaml::format_f64(*d))),
        Byml::String(s) => Node::Scalar(Scalar::string(s.clone())),
        Byml::Binary(bytes) => Node::Scalar(Scalar::tagged("!!binary", BASE64.encode(bytes))),
        Byml::Array(items) => Node::Seq(Seq::block(items.iter().map(to_node).collect())),
        Byml::Hash(hash) => Node::Map(Map::block(
            None,
            hash.iter().map(|(key, item)| (Scalar::string(key.clone()), to_node(item))).collect(),
        )),
    }
}

fn syntax_error(mark: Mark, reason: impl Into<String>) -> crate::Error {
    crate::Error::TextSyntax { line: mark.line, col: mark.col, reason: reason.into() }
}

fn from_node(node: &Node) -> Result<Byml> {
    match node {
        Node::Map(map) => {
            let mut hash = Hash::with_capacity(map.entries.len());
            for (key, value) in &map.entries {
                ensure!(
                    hash.insert(key.value.clone(), from_node(value)?).is_none(),
                    DuplicateKeySnafu { key: key.value.clone() }
                );
            }
            Ok(Byml::Hash(hash))
        }
        Node::Seq(seq) => {
            let items: Result<Vec<Byml>> = seq.nodes.iter().map(from_node).collect();
            Ok(Byml::Array(items?))
        }
        Node::Scalar(scalar) => from_scalar(scalar),
    }
}

fn from_scalar(scalar: &Scalar) -> Result<Byml> {
    let value = scalar.value.as_str();
    if let Some(tag) = scalar.tag.as_deref() {
        return match tag {
            "!u" => yaml::parse_unsigned(value)
                .and_then(|v| u32::try_from(v).ok())
                .map(Byml::U32)
                .ok_or_else(|| syntax_error(scalar.mark, "expected an unsigned 32-bit integer")),
            "!l" => value
                .parse()
                .map(Byml::I64)
                .map_err(|_| syntax_error(scalar.mark, "expected a signed 64-bit integer")),
            "!ul" => yaml::parse_unsigned(value)
                .map(Byml::U64)
                .ok_or_else(|| syntax_error(scalar.mark, "expected an unsigned 64-bit integer")),
            "!f" => yaml::parse_f32(value)
                .map(Byml::Float)
                .ok_or_else(|| syntax_error(scalar.mark, "expected a 32-bit float")),
            "!d" => yaml::parse_f64(value)
                .map(Byml::Double)
                .ok_or_else(|| syntax_error(scalar.mark, "expected a 64-bit float")),
            "!!binary" => BASE64
                .decode(value)
                .map(Byml::Binary)
                .map_err(|_| syntax_error(scalar.mark, "expected base64 binary data")),
            "!str" => Ok(Byml::String(value.to_string())),
            _ => Err(syntax_error(scalar.mark, format!("unknown tag {tag}"))),
        };
    }
    if scalar.quoted {
        return Ok(Byml::String(value.to_string()));
    }
    if scalar.is_null() {
        return Ok(Byml::Null);
    }
    match value {
        "true" | "True" | "TRUE" => return Ok(Byml::Bool(true)),
        "false" | "False" | "FALSE" => return Ok(Byml::Bool(false)),
        _ => {}
    }
    // Plain scalars that look numeric resolve to the narrowest matching type:
    // i32 when the literal fits, i64 beyond that, u64 beyond i64, f32 last.
    if value.starts_with(|c: char| c.is_ascii_digit() || matches!(c, '-' | '+' | '.')) {
        if let Ok(i) = value.parse::<i64>() {
            return Ok(match i32::try_from(i) {
                Ok(i) => Byml::I32(i),
                Err(_) => Byml::I64(i),
            });
        }
        if let Ok(u) = value.parse::<u64>() {
            return Ok(Byml::U64(u));
        }
        if let Some(f) = yaml::parse_f32(value) {
            return Ok(Byml::Float(f));
        }
    }
    Ok(Byml::String(value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use korok_core::prelude::Endian;

    #[test]
    fn scalars_round_trip_with_exact_types() {
        let mut hash = Hash::new();
        hash.insert("i32".into(), Byml::I32(-42));
        hash.insert("u32".into(), Byml::U32(4_294_967_295));
        hash.insert("i64".into(), Byml::I64(-9_000_000_000));
        hash.insert("u64".into(), Byml::U64(u64::MAX));
        hash.insert("f32".into(), Byml::Float(3.5));
        hash.insert("f64".into(), Byml::Double(0.25));
        hash.insert("yes".into(), Byml::Bool(true));
        hash.insert("nothing".into(), Byml::Null);
        hash.insert("text".into(), Byml::String("plain words".into()));
        hash.insert("numberish".into(), Byml::String("123".into()));
        let doc = Byml::Hash(hash);

        let text = doc.to_text();
        assert_eq!(Byml::from_text(&text).unwrap(), doc);
    }

    #[test]
    fn u32_max_keeps_its_tag() {
        let doc = Byml::from_text("value: !u 4294967295\n").unwrap();
        assert_eq!(doc.as_hash().unwrap()["value"], Byml::U32(u32::MAX));
        let text = doc.to_text();
        assert!(text.contains("!u 4294967295"), "{text}");
        assert_eq!(Byml::from_text(&text).unwrap(), doc);
    }

    #[test]
    fn untagged_integers_default_to_i32() {
        let doc = Byml::from_text("a: 1\nb: 3000000000\nc: -3000000000\n").unwrap();
        let hash = doc.as_hash().unwrap();
        assert_eq!(hash["a"], Byml::I32(1));
        assert_eq!(hash["b"], Byml::I64(3_000_000_000));
        assert_eq!(hash["c"], Byml::I64(-3_000_000_000));
    }

    #[test]
    fn binary_nodes_use_base64() {
        let doc = Byml::Array(vec![Byml::Binary(vec![0xDE, 0xAD, 0xBE, 0xEF])]);
        let text = doc.to_text();
        assert!(text.contains("!!binary"), "{text}");
        assert_eq!(Byml::from_text(&text).unwrap(), doc);
    }

    #[test]
    fn key_order_survives_the_text_form() {
        let text = "zebra: 1\napple: 2\nmango: 3\n";
        let doc = Byml::from_text(text).unwrap();
        assert_eq!(doc.to_text(), text);
    }

    #[test]
    fn text_and_binary_agree() {
        let source = "\
names:
  - first
  - second
meta:
  count: !u 2
  ratio: 0.5
  id: !l 8589934592
flag: true
";
        let doc = Byml::from_text(source).unwrap();
        let binary = doc.to_binary(Endian::Little, 2).unwrap();
        let reparsed = Byml::from_binary(&binary).unwrap();
        assert_eq!(reparsed, doc);
        assert_eq!(Byml::from_text(&reparsed.to_text()).unwrap(), doc);
    }

    #[test]
    fn reports_positions_for_bad_tags() {
        let err = Byml::from_text("a: !q 3\n").unwrap_err();
        match err {
            crate::Error::TextSyntax { line, .. } => assert_eq!(line, 1),
            other => panic!("unexpected error {other:?}"),
        }
    }
}
