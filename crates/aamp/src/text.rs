use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use korok_core::yaml::{self, Map, Mark, Node, Scalar, Seq};
use snafu::prelude::*;

use crate::{
    types::{Color, Curve, Quat, Vec2, Vec3, Vec4, CURVE_FLOATS},
    DuplicateKeySnafu, Error, Name, Parameter, ParameterIO, ParameterList, ParameterObject,
    Result,
};

impl ParameterIO {
    /// Renders the archive as YAML. Known names render as strings; names the dictionary
    /// cannot resolve render as `!h 0x...` keys, which is lossless.
    #[must_use]
    pub fn to_text(&self) -> String {
        let root = Map {
            tag: Some("!io".into()),
            flow: false,
            entries: vec![
                (Scalar::literal("version"), Node::Scalar(Scalar::literal(self.version.to_string()))),
                (Scalar::literal("type"), Node::Scalar(Scalar::string(self.data_type.clone()))),
                (Scalar::literal("param_root"), list_to_node(&self.param_root)),
            ],
            mark: Mark::default(),
        };
        yaml::emit(&Node::Map(root))
    }

    /// Parses an archive from its YAML form.
    ///
    /// # Errors
    /// Returns [`TextSyntax`](crate::Error::TextSyntax) for malformed YAML or a node that
    /// does not fit the parameter model, and [`DuplicateKey`](crate::Error::DuplicateKey)
    /// for repeated child names.
    pub fn from_text(text: &str) -> Result<ParameterIO> {
        let node = yaml::parse(text)?;
        let Node::Map(root) = &node else {
            return Err(syntax_error(node.mark(), "expected an !io mapping"));
        };
        ensure_tag(root.tag.as_deref(), "!io", root.mark)?;

        let mut version = 0u32;
        let mut data_type = None;
        let mut param_root = None;
        for (key, value) in &root.entries {
            match key.value.as_str() {
                "version" => {
                    version = scalar_of(value)?
                        .value
                        .parse()
                        .map_err(|_| syntax_error(value.mark(), "expected a version number"))?;
                }
                "type" => data_type = Some(scalar_of(value)?.value.clone()),
                "param_root" => param_root = Some(node_to_list(value)?),
                _ => return Err(syntax_error(key.mark, "unknown parameter IO field")),
            }
        }
        let data_type =
            data_type.ok_or_else(|| syntax_error(root.mark, "missing \"type\" field"))?;
        let param_root =
            param_root.ok_or_else(|| syntax_error(root.mark, "missing \"param_root\" field"))?;
        Ok(ParameterIO { version, data_type, param_root })
    }
}

fn syntax_error(mark: Mark, reason: impl Into<String>) -> Error {
    Error::TextSyntax { line: mark.line, col: mark.col, reason: reason.into() }
}

fn ensure_tag(tag: Option<&str>, expected: &str, mark: Mark) -> Result<()> {
    match tag {
        Some(tag) if tag == expected => Ok(()),
        _ => Err(syntax_error(mark, format!("expected a {expected} node"))),
    }
}

fn scalar_of(node: &Node) -> Result<&Scalar> {
    match node {
        Node::Scalar(scalar) => Ok(scalar),
        _ => Err(syntax_error(node.mark(), "expected a scalar")),
    }
}

//-------------------------------------------------------------------------------------------------
// Emission
//-------------------------------------------------------------------------------------------------

fn name_scalar(name: Name) -> Scalar {
    match name.as_str() {
        Some(known) => Scalar::string(known),
        None => Scalar::tagged("!h", format!("{:#010X}", name.0)),
    }
}

fn list_to_node(list: &ParameterList) -> Node {
    let objects = list
        .objects
        .iter()
        .map(|(name, object)| (name_scalar(*name), object_to_node(object)))
        .collect();
    let lists = list
        .lists
        .iter()
        .map(|(name, child)| (name_scalar(*name), list_to_node(child)))
        .collect();
    Node::Map(Map::block(
        Some("!list".into()),
        vec![
            (Scalar::literal("objects"), Node::Map(Map::block(None, objects))),
            (Scalar::literal("lists"), Node::Map(Map::block(None, lists))),
        ],
    ))
}

fn object_to_node(object: &ParameterObject) -> Node {
    Node::Map(Map::block(
        Some("!obj".into()),
        object
            .0
            .iter()
            .map(|(name, value)| (name_scalar(*name), param_to_node(value)))
            .collect(),
    ))
}

fn float_seq(tag: &str, values: impl IntoIterator<Item = f32>) -> Node {
    Node::Seq(Seq::flow(
        Some(tag.into()),
        values
            .into_iter()
            .map(|v| Node::Scalar(Scalar::literal(yaml::format_f32(v))))
            .collect(),
    ))
}

fn param_to_node(value: &Parameter) -> Node {
    match value {
        Parameter::Bool(b) => Node::Scalar(Scalar::literal(if *b { "true" } else { "false" })),
        Parameter::F32(f) => Node::Scalar(Scalar::literal(yaml::format_f32(*f))),
        Parameter::Int(i) => Node::Scalar(Scalar::literal(i.to_string())),
        Parameter::U32(u) => Node::Scalar(Scalar::tagged("!u", u.to_string())),
        Parameter::Vec2(v) => float_seq("!vec2", [v.x, v.y]),
        Parameter::Vec3(v) => float_seq("!vec3", [v.x, v.y, v.z]),
        Parameter::Vec4(v) => float_seq("!vec4", [v.x, v.y, v.z, v.w]),
        Parameter::Color(c) => float_seq("!color", [c.r, c.g, c.b, c.a]),
        Parameter::Quat(q) => float_seq("!quat", [q.x, q.y, q.z, q.w]),
        Parameter::String32(s) => Node::Scalar(Scalar::tagged_string("!str32", s.clone())),
        Parameter::String64(s) => Node::Scalar(Scalar::tagged_string("!str64", s.clone())),
        Parameter::String256(s) => Node::Scalar(Scalar::tagged_string("!str256", s.clone())),
        Parameter::StringRef(s) => Node::Scalar(Scalar::string(s.clone())),
        Parameter::Curve1(curves) => curve_seq(curves),
        Parameter::Curve2(curves) => curve_seq(curves),
        Parameter::Curve3(curves) => curve_seq(curves),
        Parameter::Curve4(curves) => curve_seq(curves),
        Parameter::BufferInt(values) => Node::Seq(Seq::flow(
            Some("!buffer_int".into()),
            values.iter().map(|v| Node::Scalar(Scalar::literal(v.to_string()))).collect(),
        )),
        Parameter::BufferF32(values) => float_seq("!buffer_f32", values.iter().copied()),
        Parameter::BufferU32(values) => Node::Seq(Seq::flow(
            Some("!buffer_u32".into()),
            values.iter().map(|v| Node::Scalar(Scalar::literal(v.to_string()))).collect(),
        )),
        Parameter::BufferBinary(bytes) => {
            Node::Scalar(Scalar::tagged("!buffer_binary", BASE64.encode(bytes)))
        }
    }
}

fn curve_seq(curves: &[Curve]) -> Node {
    float_seq("!curve", curves.iter().flat_map(|curve| curve.floats))
}

//-------------------------------------------------------------------------------------------------
// Parsing
//-------------------------------------------------------------------------------------------------

fn name_from_scalar(key: &Scalar) -> Result<Name> {
    match key.tag.as_deref() {
        Some("!h") => yaml::parse_unsigned(&key.value)
            .and_then(|v| u32::try_from(v).ok())
            .map(Name)
            .ok_or_else(|| syntax_error(key.mark, "expected a 32-bit name hash")),
        Some(_) => Err(syntax_error(key.mark, "unexpected tag on a name")),
        None => Ok(Name::from(key.value.as_str())),
    }
}

fn node_to_list(node: &Node) -> Result<ParameterList> {
    let Node::Map(map) = node else {
        return Err(syntax_error(node.mark(), "expected a !list mapping"));
    };
    ensure_tag(map.tag.as_deref(), "!list", map.mark)?;

    let mut list = ParameterList::default();
    for (key, value) in &map.entries {
        match key.value.as_str() {
            "objects" => {
                let Node::Map(children) = value else {
                    return Err(syntax_error(value.mark(), "expected a mapping of objects"));
                };
                for (name, child) in &children.entries {
                    let name = name_from_scalar(name)?;
                    ensure!(
                        list.objects.insert(name, node_to_object(child)?).is_none(),
                        DuplicateKeySnafu { hash: name.0 }
                    );
                }
            }
            "lists" => {
                let Node::Map(children) = value else {
                    return Err(syntax_error(value.mark(), "expected a mapping of lists"));
                };
                for (name, child) in &children.entries {
                    let name = name_from_scalar(name)?;
                    ensure!(
                        list.lists.insert(name, node_to_list(child)?).is_none(),
                        DuplicateKeySnafu { hash: name.0 }
                    );
                }
            }
            _ => return Err(syntax_error(key.mark, "unknown parameter list field")),
        }
    }
    Ok(list)
}

fn node_to_object(node: &Node) -> Result<ParameterObject> {
    let Node::Map(map) = node else {
        return Err(syntax_error(node.mark(), "expected an !obj mapping"));
    };
    ensure_tag(map.tag.as_deref(), "!obj", map.mark)?;

    let mut object = ParameterObject::default();
    for (key, value) in &map.entries {
        let name = name_from_scalar(key)?;
        ensure!(
            object.0.insert(name, node_to_param(value)?).is_none(),
            DuplicateKeySnafu { hash: name.0 }
        );
    }
    Ok(object)
}

fn node_to_param(node: &Node) -> Result<Parameter> {
    match node {
        Node::Scalar(scalar) => scalar_to_param(scalar),
        Node::Seq(seq) => seq_to_param(seq),
        Node::Map(map) => Err(syntax_error(map.mark, "a parameter cannot be a mapping")),
    }
}

fn scalar_to_param(scalar: &Scalar) -> Result<Parameter> {
    let value = scalar.value.as_str();
    if let Some(tag) = scalar.tag.as_deref() {
        return match tag {
            "!u" => yaml::parse_unsigned(value)
                .and_then(|v| u32::try_from(v).ok())
                .map(Parameter::U32)
                .ok_or_else(|| syntax_error(scalar.mark, "expected an unsigned 32-bit integer")),
            "!str32" => Ok(Parameter::String32(value.to_string())),
            "!str64" => Ok(Parameter::String64(value.to_string())),
            "!str256" => Ok(Parameter::String256(value.to_string())),
            "!str" => Ok(Parameter::StringRef(value.to_string())),
            "!buffer_binary" => BASE64
                .decode(value)
                .map(Parameter::BufferBinary)
                .map_err(|_| syntax_error(scalar.mark, "expected base64 binary data")),
            _ => Err(syntax_error(scalar.mark, format!("unknown parameter tag {tag}"))),
        };
    }
    if scalar.quoted {
        return Ok(Parameter::StringRef(value.to_string()));
    }
    if scalar.is_null() {
        return Err(syntax_error(scalar.mark, "a parameter cannot be null"));
    }
    match value {
        "true" | "True" | "TRUE" => return Ok(Parameter::Bool(true)),
        "false" | "False" | "FALSE" => return Ok(Parameter::Bool(false)),
        _ => {}
    }
    if value.starts_with(|c: char| c.is_ascii_digit() || matches!(c, '-' | '+' | '.')) {
        if let Ok(i) = value.parse::<i32>() {
            return Ok(Parameter::Int(i));
        }
        if let Some(f) = yaml::parse_f32(value) {
            return Ok(Parameter::F32(f));
        }
    }
    Ok(Parameter::StringRef(value.to_string()))
}

fn seq_to_param(seq: &Seq) -> Result<Parameter> {
    let Some(tag) = seq.tag.as_deref() else {
        return Err(syntax_error(seq.mark, "a sequence parameter requires a tag"));
    };
    match tag {
        "!vec2" => {
            let [x, y] = float_array(seq)?;
            Ok(Parameter::Vec2(Vec2 { x, y }))
        }
        "!vec3" => {
            let [x, y, z] = float_array(seq)?;
            Ok(Parameter::Vec3(Vec3 { x, y, z }))
        }
        "!vec4" => {
            let [x, y, z, w] = float_array(seq)?;
            Ok(Parameter::Vec4(Vec4 { x, y, z, w }))
        }
        "!color" => {
            let [r, g, b, a] = float_array(seq)?;
            Ok(Parameter::Color(Color { r, g, b, a }))
        }
        "!quat" => {
            let [x, y, z, w] = float_array(seq)?;
            Ok(Parameter::Quat(Quat { x, y, z, w }))
        }
        "!curve" => curves_from_seq(seq),
        "!buffer_int" => Ok(Parameter::BufferInt(
            seq.nodes
                .iter()
                .map(|n| {
                    let scalar = scalar_of(n)?;
                    scalar
                        .value
                        .parse()
                        .map_err(|_| syntax_error(scalar.mark, "expected a 32-bit integer"))
                })
                .collect::<Result<_>>()?,
        )),
        "!buffer_f32" => Ok(Parameter::BufferF32(float_values(seq)?)),
        "!buffer_u32" => Ok(Parameter::BufferU32(
            seq.nodes
                .iter()
                .map(|n| {
                    let scalar = scalar_of(n)?;
                    yaml::parse_unsigned(&scalar.value)
                        .and_then(|v| u32::try_from(v).ok())
                        .ok_or_else(|| {
                            syntax_error(scalar.mark, "expected an unsigned 32-bit integer")
                        })
                })
                .collect::<Result<_>>()?,
        )),
        _ => Err(syntax_error(seq.mark, format!("unknown parameter tag {tag}"))),
    }
}

fn float_values(seq: &Seq) -> Result<Vec<f32>> {
    seq.nodes
        .iter()
        .map(|node| {
            let scalar = scalar_of(node)?;
            yaml::parse_f32(&scalar.value)
                .ok_or_else(|| syntax_error(scalar.mark, "expected a float"))
        })
        .collect()
}

fn float_array<const N: usize>(seq: &Seq) -> Result<[f32; N]> {
    let values = float_values(seq)?;
    values
        .try_into()
        .map_err(|_| syntax_error(seq.mark, "wrong number of components"))
}

fn curves_from_seq(seq: &Seq) -> Result<Parameter> {
    let values = float_values(seq)?;
    if values.is_empty() || values.len() % CURVE_FLOATS != 0 {
        return Err(syntax_error(seq.mark, "curve data must be a multiple of 30 floats"));
    }
    let mut curves = values.chunks_exact(CURVE_FLOATS).map(|chunk| {
        let mut curve = Curve::default();
        curve.floats.copy_from_slice(chunk);
        curve
    });
    match values.len() / CURVE_FLOATS {
        1 => Ok(Parameter::Curve1([curves.next().unwrap()])),
        2 => Ok(Parameter::Curve2([curves.next().unwrap(), curves.next().unwrap()])),
        3 => Ok(Parameter::Curve3([
            curves.next().unwrap(),
            curves.next().unwrap(),
            curves.next().unwrap(),
        ])),
        4 => Ok(Parameter::Curve4([
            curves.next().unwrap(),
            curves.next().unwrap(),
            curves.next().unwrap(),
            curves.next().unwrap(),
        ])),
        _ => Err(syntax_error(seq.mark, "at most four curves fit one parameter")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EMPTY_STRINGS_DOC: &str = r#"!io
version: 10
type: oead_test
param_root: !list
  objects:
    TestContent: !obj
      Str64_empty: !str64 ""
      Str64_empty2: !str64 ""
  lists: {}
"#;

    #[test]
    fn empty_tagged_strings_stay_strings() {
        let pio = ParameterIO::from_text(EMPTY_STRINGS_DOC).unwrap();
        assert_eq!(pio.data_type, "oead_test");
        assert_eq!(pio.version, 10);

        let object = pio.object("TestContent").unwrap();
        assert_eq!(object.get("Str64_empty"), Some(&Parameter::String64(String::new())));
        assert_eq!(object.get("Str64_empty2"), Some(&Parameter::String64(String::new())));

        // Both projections must preserve the empty strings.
        assert_eq!(ParameterIO::from_text(&pio.to_text()).unwrap(), pio);
        let binary = pio.to_binary().unwrap();
        assert_eq!(ParameterIO::from_binary(&binary).unwrap(), pio);
    }

    #[test]
    fn unknown_names_emit_hex_hashes() {
        let mut pio = ParameterIO::new("hash_test", 0);
        pio.param_root
            .objects
            .entry(Name(0xDEAD_BEEF))
            .or_default()
            .insert(Name(0x1234_5678), Parameter::U32(1));

        let text = pio.to_text();
        assert!(text.contains("!h 0xDEADBEEF"), "{text}");
        assert!(text.contains("!h 0x12345678"), "{text}");
        assert_eq!(ParameterIO::from_text(&text).unwrap(), pio);
    }

    #[test]
    fn known_names_render_readably() {
        let mut pio = ParameterIO::new("xml", 0);
        pio.param_root
            .objects
            .entry("Parameters".into())
            .or_default()
            .insert("UnitConfigName", Parameter::StringRef("Armor_001_Head".into()));

        let text = pio.to_text();
        assert!(text.contains("Parameters: !obj"), "{text}");
        assert!(text.contains("UnitConfigName: Armor_001_Head"), "{text}");
        assert_eq!(ParameterIO::from_text(&text).unwrap(), pio);
    }

    #[test]
    fn vector_and_buffer_parameters_round_trip() {
        let mut pio = ParameterIO::new("mix", 3);
        let obj = pio.param_root.objects.entry("Values".into()).or_default();
        obj.insert("Position", Parameter::Vec3(Vec3 { x: 1.5, y: -2.0, z: 0.0 }));
        obj.insert("Tint", Parameter::Color(Color { r: 1.0, g: 0.5, b: 0.0, a: 1.0 }));
        obj.insert("Rotation", Parameter::Quat(Quat { x: 0.0, y: 0.0, z: 0.0, w: 1.0 }));
        obj.insert("Ints", Parameter::BufferInt(vec![3, -4, 5]));
        obj.insert("Floats", Parameter::BufferF32(vec![0.25, 0.75]));
        obj.insert("Words", Parameter::BufferU32(vec![0xFFFF_FFFF]));
        obj.insert("Blob", Parameter::BufferBinary(vec![1, 2, 3, 4, 5]));
        let mut curve = Curve::default();
        curve.floats[7] = 7.5;
        obj.insert("Response", Parameter::Curve2([curve, Curve::default()]));

        let text = pio.to_text();
        let parsed = ParameterIO::from_text(&text).unwrap();
        assert_eq!(parsed, pio);
        // And across the binary form too.
        assert_eq!(
            ParameterIO::from_binary(&parsed.to_binary().unwrap()).unwrap(),
            pio
        );
    }

    #[test]
    fn untagged_scalars_infer_their_types() {
        let doc = r#"!io
version: 0
type: infer
param_root: !list
  objects:
    Obj: !obj
      Flag: true
      Count: 12
      Ratio: 0.5
      Label: plain_name
      Quoted: "123"
  lists: {}
"#;
        let pio = ParameterIO::from_text(doc).unwrap();
        let obj = pio.object("Obj").unwrap();
        assert_eq!(obj.get("Flag"), Some(&Parameter::Bool(true)));
        assert_eq!(obj.get("Count"), Some(&Parameter::Int(12)));
        assert_eq!(obj.get("Ratio"), Some(&Parameter::F32(0.5)));
        assert_eq!(obj.get("Label"), Some(&Parameter::StringRef("plain_name".into())));
        assert_eq!(obj.get("Quoted"), Some(&Parameter::StringRef("123".into())));
    }

    #[test]
    fn rejects_malformed_documents() {
        assert!(matches!(
            ParameterIO::from_text("version: 1\n"),
            Err(Error::TextSyntax { .. })
        ));
        let bad_tag = "!io\nversion: 0\ntype: t\nparam_root: !list\n  objects:\n    O: !obj\n      P: !what 3\n  lists: {}\n";
        assert!(matches!(ParameterIO::from_text(bad_tag), Err(Error::TextSyntax { .. })));
    }
}
