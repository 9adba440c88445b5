use korok_core::prelude::*;
use snafu::prelude::*;

use crate::{
    BadMagicSnafu, BadOffsetSnafu, BadTypeSnafu, BadVersionSnafu, DuplicateKeySnafu, Name,
    ParamType, Parameter, ParameterIO, ParameterList, ParameterObject, Result, TooDeepSnafu,
    types::{Color, Curve, Quat, Vec2, Vec3, Vec4, CURVE_FLOATS},
    MAGIC, MAX_DEPTH, VERSION,
};

/// Header size; every record offset in the file is relative to its own record, but the
/// type string and root list hang off the end of the header.
pub(crate) const HEADER_SIZE: usize = 0x30;

pub(crate) const LIST_RECORD_SIZE: usize = 12;
pub(crate) const OBJECT_RECORD_SIZE: usize = 8;
pub(crate) const PARAM_RECORD_SIZE: usize = 8;

impl ParameterIO {
    /// Parses an archive from its binary form.
    ///
    /// # Errors
    /// Returns [`BadMagic`](crate::Error::BadMagic), [`BadVersion`](crate::Error::BadVersion)
    /// for a version other than 2, [`Truncated`](crate::Error::Truncated)/
    /// [`BadOffset`](crate::Error::BadOffset) for malformed records,
    /// [`BadType`](crate::Error::BadType) for an unknown parameter type,
    /// [`DuplicateKey`](crate::Error::DuplicateKey) for a repeated child name, or
    /// [`TooDeep`](crate::Error::TooDeep) past the recursion limit.
    pub fn from_binary(data: &[u8]) -> Result<ParameterIO> {
        ensure!(data.len() >= HEADER_SIZE, crate::TruncatedSnafu { offset: data.len() });

        // Version 2 archives are always little-endian.
        let mut cursor = DataCursor::new(data, Endian::Little);
        let magic = cursor.read_exact(4)?;
        ensure!(magic == MAGIC, BadMagicSnafu);
        let version = cursor.read_u32()?;
        ensure!(version == VERSION, BadVersionSnafu { version });
        let _flags = cursor.read_u32()?;
        let file_size = cursor.read_u32()? as usize;
        ensure!(file_size <= data.len(), crate::TruncatedSnafu { offset: file_size });
        let pio_version = cursor.read_u32()?;
        let pio_offset = cursor.read_u32()? as usize;
        // Record counts and section sizes; the records themselves are
        // authoritative, so these are not cross-checked.
        cursor.skip(6 * 4)?;

        let data_type = cursor.read_cstr()?.to_string();

        let parser = Parser { cursor: DataCursor::new(data, Endian::Little) };
        let (_, param_root) = parser.parse_list(HEADER_SIZE + pio_offset, 0)?;

        Ok(ParameterIO { version: pio_version, data_type, param_root })
    }
}

struct Parser<'a> {
    cursor: DataCursor<'a>,
}

impl Parser<'_> {
    fn parse_list(&self, offset: usize, depth: usize) -> Result<(u32, ParameterList)> {
        ensure!(depth < MAX_DEPTH, TooDeepSnafu);
        let mut record = self.cursor.at(offset)?;
        let hash = record.read_u32()?;
        let lists_rel = record.read_u16()? as usize;
        let objects_rel = record.read_u16()? as usize;
        let list_count = record.read_u16()? as usize;
        let object_count = record.read_u16()? as usize;

        let mut list = ParameterList::default();
        let lists_base = offset + lists_rel * 4;
        for i in 0..list_count {
            let (child_hash, child) =
                self.parse_list(lists_base + i * LIST_RECORD_SIZE, depth + 1)?;
            ensure!(
                list.lists.insert(Name(child_hash), child).is_none(),
                DuplicateKeySnafu { hash: child_hash }
            );
        }

        let objects_base = offset + objects_rel * 4;
        for i in 0..object_count {
            let (child_hash, child) = self.parse_object(objects_base + i * OBJECT_RECORD_SIZE)?;
            ensure!(
                list.objects.insert(Name(child_hash), child).is_none(),
                DuplicateKeySnafu { hash: child_hash }
            );
        }

        Ok((hash, list))
    }

    fn parse_object(&self, offset: usize) -> Result<(u32, ParameterObject)> {
        let mut record = self.cursor.at(offset)?;
        let hash = record.read_u32()?;
        let params_rel = record.read_u16()? as usize;
        let param_count = record.read_u16()? as usize;

        let mut object = ParameterObject::default();
        let params_base = offset + params_rel * 4;
        for i in 0..param_count {
            let (child_hash, value) = self.parse_param(params_base + i * PARAM_RECORD_SIZE)?;
            ensure!(
                object.0.insert(Name(child_hash), value).is_none(),
                DuplicateKeySnafu { hash: child_hash }
            );
        }
        Ok((hash, object))
    }

    fn parse_param(&self, offset: usize) -> Result<(u32, Parameter)> {
        let mut record = self.cursor.at(offset)?;
        let hash = record.read_u32()?;
        let data_rel = record.read_u24()? as usize;
        let tag = record.read_u8()?;
        let param_type = ParamType::try_from(tag).ok().context(BadTypeSnafu { tag })?;

        let data_offset = offset + data_rel * 4;
        let mut data = self.cursor.at(data_offset)?;
        let value = match param_type {
            ParamType::Bool => Parameter::Bool(data.read_u32()? != 0),
            ParamType::F32 => Parameter::F32(data.read_f32()?),
            ParamType::Int => Parameter::Int(data.read_i32()?),
            ParamType::U32 => Parameter::U32(data.read_u32()?),
            ParamType::Vec2 => {
                Parameter::Vec2(Vec2 { x: data.read_f32()?, y: data.read_f32()? })
            }
            ParamType::Vec3 => Parameter::Vec3(Vec3 {
                x: data.read_f32()?,
                y: data.read_f32()?,
                z: data.read_f32()?,
            }),
            ParamType::Vec4 => Parameter::Vec4(Vec4 {
                x: data.read_f32()?,
                y: data.read_f32()?,
                z: data.read_f32()?,
                w: data.read_f32()?,
            }),
            ParamType::Color => Parameter::Color(Color {
                r: data.read_f32()?,
                g: data.read_f32()?,
                b: data.read_f32()?,
                a: data.read_f32()?,
            }),
            ParamType::Quat => Parameter::Quat(Quat {
                x: data.read_f32()?,
                y: data.read_f32()?,
                z: data.read_f32()?,
                w: data.read_f32()?,
            }),
            ParamType::String32 => Parameter::String32(data.read_cstr()?.to_string()),
            ParamType::String64 => Parameter::String64(data.read_cstr()?.to_string()),
            ParamType::String256 => Parameter::String256(data.read_cstr()?.to_string()),
            ParamType::StringRef => Parameter::StringRef(data.read_cstr()?.to_string()),
            ParamType::Curve1 => Parameter::Curve1([self.read_curve(&mut data)?]),
            ParamType::Curve2 => {
                Parameter::Curve2([self.read_curve(&mut data)?, self.read_curve(&mut data)?])
            }
            ParamType::Curve3 => Parameter::Curve3([
                self.read_curve(&mut data)?,
                self.read_curve(&mut data)?,
                self.read_curve(&mut data)?,
            ]),
            ParamType::Curve4 => Parameter::Curve4([
                self.read_curve(&mut data)?,
                self.read_curve(&mut data)?,
                self.read_curve(&mut data)?,
                self.read_curve(&mut data)?,
            ]),
            ParamType::BufferInt => {
                let count = self.buffer_len(data_offset)?;
                let mut values = Vec::with_capacity(count);
                for _ in 0..count {
                    values.push(data.read_i32()?);
                }
                Parameter::BufferInt(values)
            }
            ParamType::BufferF32 => {
                let count = self.buffer_len(data_offset)?;
                let mut values = Vec::with_capacity(count);
                for _ in 0..count {
                    values.push(data.read_f32()?);
                }
                Parameter::BufferF32(values)
            }
            ParamType::BufferU32 => {
                let count = self.buffer_len(data_offset)?;
                let mut values = Vec::with_capacity(count);
                for _ in 0..count {
                    values.push(data.read_u32()?);
                }
                Parameter::BufferU32(values)
            }
            ParamType::BufferBinary => {
                let count = self.buffer_len(data_offset)?;
                Parameter::BufferBinary(data.read_exact(count)?.to_vec())
            }
        };
        Ok((hash, value))
    }

    fn read_curve(&self, data: &mut DataCursor) -> Result<Curve> {
        let mut curve = Curve::default();
        for value in &mut curve.floats {
            *value = data.read_f32()?;
        }
        debug_assert_eq!(curve.floats.len(), CURVE_FLOATS);
        Ok(curve)
    }

    /// Buffers store their element count in the four bytes before the data pointer.
    fn buffer_len(&self, data_offset: usize) -> Result<usize> {
        ensure!(data_offset >= 4, BadOffsetSnafu { offset: data_offset });
        let mut cursor = self.cursor.at(data_offset - 4)?;
        Ok(cursor.read_u32()? as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[test]
    fn rejects_bad_magic() {
        let data = vec![0u8; 0x30];
        assert!(matches!(ParameterIO::from_binary(&data), Err(Error::BadMagic)));
    }

    #[test]
    fn rejects_bad_version() {
        let mut data = vec![0u8; 0x30];
        data[..4].copy_from_slice(b"AAMP");
        data[4..8].copy_from_slice(&3u32.to_le_bytes());
        assert!(matches!(
            ParameterIO::from_binary(&data),
            Err(Error::BadVersion { version: 3 })
        ));
    }

    #[test]
    fn rejects_truncated_header() {
        assert!(matches!(ParameterIO::from_binary(b"AAMP"), Err(Error::Truncated { .. })));
    }
}
