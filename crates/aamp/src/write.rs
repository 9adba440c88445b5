use hashbrown::HashMap;
use korok_core::prelude::*;
use snafu::prelude::*;

use crate::{
    parse::{HEADER_SIZE, LIST_RECORD_SIZE, OBJECT_RECORD_SIZE, PARAM_RECORD_SIZE},
    FileTooBigSnafu, Parameter, ParameterIO, ParameterList, ParameterObject, Result,
    TooDeepSnafu, MAGIC, MAX_DEPTH, VERSION,
};

/// Flags word: bit 0 = little endian, bit 1 = UTF-8 names and strings.
const FLAGS: u32 = 0b11;

impl ParameterIO {
    /// Serializes the archive.
    ///
    /// Record tables are laid out the way the runtime expects them: every list record, then
    /// every object record, then every parameter record, each list's (or object's) children
    /// occupying a consecutive block. Parameter data follows the record tables, with buffer
    /// payloads behind their length word; strings are pooled in their own section at the
    /// end. Identical payloads are shared, so round-trips preserve semantics rather than
    /// arbitrary input bytes.
    ///
    /// # Errors
    /// Returns [`TooDeep`](crate::Error::TooDeep) past the recursion limit, or
    /// [`FileTooBig`](crate::Error::FileTooBig) if a record offset overflows its field.
    pub fn to_binary(&self) -> Result<Vec<u8>> {
        // Flatten breadth-first so that sibling records are consecutive; the
        // offsets in a record are relative to that record, scaled by four.
        let mut lists: Vec<(u32, &ParameterList, usize)> =
            vec![(crate::names::hash_name("param_root"), &self.param_root, 0)];
        let mut list_children: Vec<(usize, usize)> = Vec::new();
        let mut objects: Vec<(u32, &ParameterObject)> = Vec::new();

        let mut index = 0;
        while index < lists.len() {
            let (_, list, depth) = lists[index];
            ensure!(depth < MAX_DEPTH, TooDeepSnafu);
            list_children.push((lists.len(), objects.len()));
            for (name, child) in &list.lists {
                lists.push((name.0, child, depth + 1));
            }
            for (name, object) in &list.objects {
                objects.push((name.0, object));
            }
            index += 1;
        }

        let mut params: Vec<(u32, &Parameter)> = Vec::new();
        let mut object_params: Vec<usize> = Vec::with_capacity(objects.len());
        for (_, object) in &objects {
            object_params.push(params.len());
            for (name, value) in &object.0 {
                params.push((name.0, value));
            }
        }

        let type_len = align_up(self.data_type.len() + 1, 4);
        let lists_base = HEADER_SIZE + type_len;
        let objects_base = lists_base + lists.len() * LIST_RECORD_SIZE;
        let params_base = objects_base + objects.len() * OBJECT_RECORD_SIZE;
        let data_base = params_base + params.len() * PARAM_RECORD_SIZE;

        // Parameter data and strings are laid out before any record is
        // emitted, since the records point forward into both sections.
        let mut data_section = DataWriter::new(Endian::Little);
        let mut data_offsets: HashMap<Vec<u8>, usize> = HashMap::new();
        let mut strings = DataWriter::new(Endian::Little);
        let mut string_offsets: HashMap<String, usize> = HashMap::new();

        enum Slot {
            Data(usize),
            String(usize),
        }

        let mut slots = Vec::with_capacity(params.len());
        for (_, value) in &params {
            match value.as_str() {
                Some(text) => {
                    let offset = *string_offsets.entry(text.to_string()).or_insert_with(|| {
                        let offset = strings.len();
                        strings.write_cstr(text);
                        strings.pad_to(4, 0);
                        offset
                    });
                    slots.push(Slot::String(offset));
                }
                None => {
                    let (payload, skip) = value_bytes(value);
                    let offset = match data_offsets.get(&payload) {
                        Some(&offset) => offset,
                        None => {
                            let offset = data_section.len() + skip;
                            data_offsets.insert(payload.clone(), offset);
                            data_section.write_all(&payload);
                            offset
                        }
                    };
                    slots.push(Slot::Data(offset));
                }
            }
        }

        let string_base = data_base + data_section.len();
        let file_size = string_base + strings.len();
        ensure!(u32::try_from(file_size).is_ok(), FileTooBigSnafu);

        let mut out = DataWriter::with_capacity(Endian::Little, file_size);
        out.write_all(&MAGIC);
        out.write_u32(VERSION);
        out.write_u32(FLAGS);
        out.write_u32(file_size as u32);
        out.write_u32(self.version);
        out.write_u32(type_len as u32);
        out.write_u32(lists.len() as u32);
        out.write_u32(objects.len() as u32);
        out.write_u32(params.len() as u32);
        out.write_u32(data_section.len() as u32);
        out.write_u32(strings.len() as u32);
        out.write_u32(0);

        out.write_cstr(&self.data_type);
        out.pad_to(4, 0);

        for (i, (hash, list, _)) in lists.iter().enumerate() {
            let record = lists_base + i * LIST_RECORD_SIZE;
            let (lists_start, objects_start) = list_children[i];
            out.write_u32(*hash);
            out.write_u16(if list.lists.is_empty() {
                0
            } else {
                relative16(record, lists_base + lists_start * LIST_RECORD_SIZE)?
            });
            out.write_u16(if list.objects.is_empty() {
                0
            } else {
                relative16(record, objects_base + objects_start * OBJECT_RECORD_SIZE)?
            });
            out.write_u16(list.lists.len() as u16);
            out.write_u16(list.objects.len() as u16);
        }

        for (j, (hash, object)) in objects.iter().enumerate() {
            let record = objects_base + j * OBJECT_RECORD_SIZE;
            out.write_u32(*hash);
            out.write_u16(if object.0.is_empty() {
                0
            } else {
                relative16(record, params_base + object_params[j] * PARAM_RECORD_SIZE)?
            });
            out.write_u16(object.0.len() as u16);
        }

        for (k, ((hash, value), slot)) in params.iter().zip(&slots).enumerate() {
            let record = params_base + k * PARAM_RECORD_SIZE;
            let target = match slot {
                Slot::Data(offset) => data_base + offset,
                Slot::String(offset) => string_base + offset,
            };
            let relative = (target - record) / 4;
            ensure!(relative <= 0x00FF_FFFF, FileTooBigSnafu);
            out.write_u32(*hash);
            out.write_u24(relative as u32);
            out.write_u8(value.param_type() as u8);
        }

        out.write_all(data_section.as_slice());
        out.write_all(strings.as_slice());
        debug_assert_eq!(out.len(), file_size);
        Ok(out.into_inner())
    }
}

/// Record-relative offset in four-byte units, as stored in list and object records.
fn relative16(record: usize, target: usize) -> Result<u16> {
    let relative = (target - record) / 4;
    u16::try_from(relative).ok().context(FileTooBigSnafu)
}

/// Serialized payload for a non-string parameter, plus the pointer's offset into it
/// (buffers are addressed past their length word).
fn value_bytes(value: &Parameter) -> (Vec<u8>, usize) {
    let mut out = DataWriter::new(Endian::Little);
    match value {
        Parameter::Bool(b) => out.write_u32(u32::from(*b)),
        Parameter::F32(f) => out.write_f32(*f),
        Parameter::Int(i) => out.write_i32(*i),
        Parameter::U32(u) => out.write_u32(*u),
        Parameter::Vec2(v) => {
            out.write_f32(v.x);
            out.write_f32(v.y);
        }
        Parameter::Vec3(v) => {
            out.write_f32(v.x);
            out.write_f32(v.y);
            out.write_f32(v.z);
        }
        Parameter::Vec4(v) => {
            out.write_f32(v.x);
            out.write_f32(v.y);
            out.write_f32(v.z);
            out.write_f32(v.w);
        }
        Parameter::Color(c) => {
            out.write_f32(c.r);
            out.write_f32(c.g);
            out.write_f32(c.b);
            out.write_f32(c.a);
        }
        Parameter::Quat(q) => {
            out.write_f32(q.x);
            out.write_f32(q.y);
            out.write_f32(q.z);
            out.write_f32(q.w);
        }
        Parameter::Curve1(curves) => write_curves(&mut out, curves),
        Parameter::Curve2(curves) => write_curves(&mut out, curves),
        Parameter::Curve3(curves) => write_curves(&mut out, curves),
        Parameter::Curve4(curves) => write_curves(&mut out, curves),
        Parameter::BufferInt(values) => {
            out.write_u32(values.len() as u32);
            for v in values {
                out.write_i32(*v);
            }
            return (out.into_inner(), 4);
        }
        Parameter::BufferF32(values) => {
            out.write_u32(values.len() as u32);
            for v in values {
                out.write_f32(*v);
            }
            return (out.into_inner(), 4);
        }
        Parameter::BufferU32(values) => {
            out.write_u32(values.len() as u32);
            for v in values {
                out.write_u32(*v);
            }
            return (out.into_inner(), 4);
        }
        Parameter::BufferBinary(bytes) => {
            out.write_u32(bytes.len() as u32);
            out.write_all(bytes);
            out.pad_to(4, 0);
            return (out.into_inner(), 4);
        }
        Parameter::String32(_)
        | Parameter::String64(_)
        | Parameter::String256(_)
        | Parameter::StringRef(_) => unreachable!("strings live in the string section"),
    }
    (out.into_inner(), 0)
}

fn write_curves(out: &mut DataWriter, curves: &[crate::types::Curve]) {
    for curve in curves {
        for value in curve.floats {
            out.write_f32(value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Color, Curve, Quat, Vec2, Vec3, Vec4};
    use crate::Error;

    fn full_coverage_pio() -> ParameterIO {
        let mut pio = ParameterIO::new("korok_test", 10);
        let obj = pio.param_root.objects.entry("Everything".into()).or_default();
        obj.insert("Bool", Parameter::Bool(true));
        obj.insert("F32", Parameter::F32(1.5));
        obj.insert("Int", Parameter::Int(-7));
        obj.insert("U32", Parameter::U32(u32::MAX));
        obj.insert("Vec2", Parameter::Vec2(Vec2 { x: 1.0, y: 2.0 }));
        obj.insert("Vec3", Parameter::Vec3(Vec3 { x: 1.0, y: 2.0, z: 3.0 }));
        obj.insert("Vec4", Parameter::Vec4(Vec4 { x: 1.0, y: 2.0, z: 3.0, w: 4.0 }));
        obj.insert("Color", Parameter::Color(Color { r: 0.5, g: 0.25, b: 0.125, a: 1.0 }));
        obj.insert("Quat", Parameter::Quat(Quat { x: 0.0, y: 0.0, z: 0.0, w: 1.0 }));
        obj.insert("Str32", Parameter::String32("short".into()));
        obj.insert("Str64", Parameter::String64("a longer string".into()));
        obj.insert("Str256", Parameter::String256("the longest fixed string".into()));
        obj.insert("StrRef", Parameter::StringRef("variable".into()));
        let mut curve = Curve::default();
        curve.floats[0] = 1.0;
        curve.floats[29] = -1.0;
        obj.insert("Curve1", Parameter::Curve1([curve]));
        obj.insert("Curve2", Parameter::Curve2([curve, Curve::default()]));
        obj.insert("BufInt", Parameter::BufferInt(vec![-1, 0, 1]));
        obj.insert("BufF32", Parameter::BufferF32(vec![0.5, 1.5]));
        obj.insert("BufU32", Parameter::BufferU32(vec![7, 8, 9]));
        obj.insert("BufBin", Parameter::BufferBinary(vec![0xDE, 0xAD, 0xBE]));

        let nested = pio.param_root.lists.entry("Nested".into()).or_default();
        let deep = nested.lists.entry("Deeper".into()).or_default();
        deep.objects.entry("Leaf".into()).or_default().insert("Value", Parameter::Int(42));
        pio
    }

    #[test]
    fn every_parameter_type_round_trips() {
        let pio = full_coverage_pio();
        let binary = pio.to_binary().unwrap();
        let parsed = ParameterIO::from_binary(&binary).unwrap();
        assert_eq!(parsed, pio);
        // Reserialization of a parse is stable.
        assert_eq!(parsed.to_binary().unwrap(), binary);
    }

    #[test]
    fn header_carries_type_and_version() {
        let pio = ParameterIO::new("oead_test", 10);
        let binary = pio.to_binary().unwrap();
        assert_eq!(&binary[..4], b"AAMP");
        let parsed = ParameterIO::from_binary(&binary).unwrap();
        assert_eq!(parsed.data_type, "oead_test");
        assert_eq!(parsed.version, 10);
    }

    #[test]
    fn equal_payloads_share_storage() {
        let mut pio = ParameterIO::new("dedup", 0);
        let obj = pio.param_root.objects.entry("Obj".into()).or_default();
        obj.insert("A", Parameter::StringRef("shared".into()));
        obj.insert("B", Parameter::StringRef("shared".into()));
        obj.insert("C", Parameter::Vec2(Vec2 { x: 9.0, y: 9.0 }));
        obj.insert("D", Parameter::Vec2(Vec2 { x: 9.0, y: 9.0 }));
        let binary = pio.to_binary().unwrap();

        let mut unshared = ParameterIO::new("dedup", 0);
        let obj = unshared.param_root.objects.entry("Obj".into()).or_default();
        obj.insert("A", Parameter::StringRef("shared".into()));
        obj.insert("B", Parameter::StringRef("other!".into()));
        obj.insert("C", Parameter::Vec2(Vec2 { x: 9.0, y: 9.0 }));
        obj.insert("D", Parameter::Vec2(Vec2 { x: 8.0, y: 8.0 }));
        assert!(binary.len() < unshared.to_binary().unwrap().len());

        assert_eq!(ParameterIO::from_binary(&binary).unwrap(), pio);
    }

    #[test]
    fn empty_archive_round_trips() {
        let pio = ParameterIO::new("xml", 0);
        let binary = pio.to_binary().unwrap();
        let parsed = ParameterIO::from_binary(&binary).unwrap();
        assert_eq!(parsed, pio);
        assert!(parsed.param_root.lists.is_empty());
        assert!(parsed.param_root.objects.is_empty());
    }

    #[test]
    fn sibling_order_is_preserved() {
        let mut pio = ParameterIO::new("order", 0);
        for name in ["Zeta", "Alpha", "Mu"] {
            pio.param_root.lists.entry(name.into()).or_default();
        }
        let binary = pio.to_binary().unwrap();
        let parsed = ParameterIO::from_binary(&binary).unwrap();
        let order: Vec<u32> = parsed.param_root.lists.keys().map(|n| n.0).collect();
        let expected: Vec<u32> =
            ["Zeta", "Alpha", "Mu"].iter().map(|n| crate::names::hash_name(n)).collect();
        assert_eq!(order, expected);
    }

    #[test]
    fn writer_rejects_runaway_nesting() {
        let mut pio = ParameterIO::new("deep", 0);
        let mut list = ParameterList::default();
        for _ in 0..MAX_DEPTH + 10 {
            let mut parent = ParameterList::default();
            parent.lists.insert("Child".into(), list);
            list = parent;
        }
        pio.param_root.lists.insert("Top".into(), list);
        assert!(matches!(pio.to_binary(), Err(Error::TooDeep)));
    }
}
