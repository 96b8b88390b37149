//! Lookup tables: a fixed-size array indexed by pixel value.

use crate::core::context::Context;
use crate::core::error::{VxError, VxResult};
use crate::core::memory::{MapGuard, MapLayout, SharedBuffer};
use crate::core::meta::MetaInfo;
use crate::core::reference::{AsHandle, Creation, Lut, ObjectData, Payload};
use crate::core::types::{DataType, ObjectType, Usage};
use serde::{Deserialize, Serialize};

pub struct LutData {
    pub data_type: DataType,
    pub count: usize,
    /// Index of input value 0.
    pub offset: usize,
    pub buffer: SharedBuffer,
}

impl LutData {
    fn byte_len(&self) -> usize {
        self.count * self.data_type.fixed_size().unwrap_or(1)
    }

    pub(crate) fn meta(&self) -> MetaInfo {
        MetaInfo::Lut {
            data_type: self.data_type,
            count: self.count,
        }
    }

    pub(crate) fn conform(&mut self, meta: &MetaInfo) -> VxResult<()> {
        let MetaInfo::Lut { data_type, count } = *meta else {
            return Err(VxError::InvalidType);
        };
        if data_type != self.data_type {
            return Err(VxError::InvalidType);
        }
        if count != self.count {
            return Err(VxError::InvalidDimension);
        }
        Ok(())
    }
}

impl Payload for LutData {
    fn project(data: &mut ObjectData) -> Option<&mut Self> {
        match data {
            ObjectData::Lut(d) => Some(d),
            _ => None,
        }
    }

    fn storage_bytes(&self) -> usize {
        self.byte_len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LutInfo {
    pub data_type: DataType,
    pub count: usize,
    pub offset: usize,
    pub size: usize,
}

impl Context {
    /// `UInt8` tables hold up to 256 entries, `Int16` tables up to 65536 centred on zero.
    pub fn create_lut(&self, data_type: DataType, count: usize) -> VxResult<Lut> {
        let (max, offset) = match data_type {
            DataType::UInt8 => (256, 0),
            DataType::Int16 => (65536, count / 2),
            _ => return Err(VxError::InvalidType),
        };
        if count == 0 || count > max {
            return Err(VxError::InvalidParameters);
        }
        let len = count * data_type.fixed_size().unwrap_or(1);
        let buffer = self.allocate_buffer(len)?;
        let data = LutData {
            data_type,
            count,
            offset,
            buffer,
        };
        match self.create_reference(Creation::external(ObjectType::Lut), ObjectData::Lut(data)) {
            Ok(h) => Ok(Lut(h)),
            Err(e) => {
                self.inner.memory.release(len);
                Err(e)
            }
        }
    }

    pub fn query_lut(&self, lut: Lut) -> VxResult<LutInfo> {
        self.with_payload::<LutData, _>(lut.handle(), |d| {
            Ok(LutInfo {
                data_type: d.data_type,
                count: d.count,
                offset: d.offset,
                size: d.byte_len(),
            })
        })
    }

    fn lut_storage(&self, lut: Lut) -> VxResult<(SharedBuffer, usize)> {
        self.check_accessible(lut.handle())?;
        self.with_payload::<LutData, _>(lut.handle(), |d| Ok((d.buffer.clone(), d.byte_len())))
    }

    /// Copy the whole table to or from `bytes`.
    pub fn copy_lut(&self, lut: Lut, bytes: &mut [u8], usage: Usage) -> VxResult<()> {
        let (buffer, len) = self.lut_storage(lut)?;
        if bytes.len() < len || usage == Usage::ReadWrite {
            return Err(VxError::InvalidParameters);
        }
        let mut guard = self.lock(&buffer, usage)?;
        if usage.writes() {
            guard.bytes_mut()?.copy_from_slice(&bytes[..len]);
            drop(guard);
            self.wrote(lut.handle());
        } else {
            bytes[..len].copy_from_slice(guard.bytes());
            drop(guard);
            self.read(lut.handle());
        }
        Ok(())
    }

    pub fn map_lut(&self, lut: Lut, usage: Usage) -> VxResult<MapGuard> {
        let (buffer, len) = self.lut_storage(lut)?;
        let stride = self.query_lut(lut)?.data_type.fixed_size().unwrap_or(1);
        let guard = self.lock(&buffer, usage)?;
        self.register_map(lut.handle(), usage, guard, 0, len, MapLayout::Items { stride, count: len / stride })
    }

    pub fn unmap_lut(&self, lut: Lut, map: MapGuard) -> VxResult<()> {
        self.object_of(lut.handle(), ObjectType::Lut)?;
        self.finish_map(lut.handle(), map)
    }

    pub(crate) fn lut_snapshot(&self, lut: Lut) -> VxResult<(LutInfo, Vec<u8>)> {
        let info = self.query_lut(lut)?;
        let buffer = self.with_payload::<LutData, _>(lut.handle(), |d| Ok(d.buffer.clone()))?;
        let guard = self.lock(&buffer, Usage::ReadOnly)?;
        Ok((info, guard.bytes().to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lut_shapes() {
        let ctx = Context::create().unwrap();
        let u8_lut = ctx.create_lut(DataType::UInt8, 256).unwrap();
        assert_eq!(ctx.query_lut(u8_lut).unwrap().offset, 0);
        let s16 = ctx.create_lut(DataType::Int16, 65536).unwrap();
        let info = ctx.query_lut(s16).unwrap();
        assert_eq!((info.offset, info.size), (32768, 131072));
        assert_eq!(ctx.create_lut(DataType::UInt8, 257), Err(VxError::InvalidParameters));
        assert_eq!(ctx.create_lut(DataType::Float32, 4), Err(VxError::InvalidType));
    }

    #[test]
    fn test_lut_copy_and_map() {
        let ctx = Context::create().unwrap();
        let lut = ctx.create_lut(DataType::UInt8, 256).unwrap();
        let mut table: Vec<u8> = (0..=255u8).rev().collect();
        ctx.copy_lut(lut, &mut table, Usage::WriteOnly).unwrap();
        let map = ctx.map_lut(lut, Usage::ReadOnly).unwrap();
        assert_eq!(map.as_slice()[0], 255);
        assert_eq!(map.as_slice()[255], 0);
        ctx.unmap_lut(lut, map).unwrap();
        let mut short = [0u8; 10];
        assert_eq!(ctx.copy_lut(lut, &mut short, Usage::ReadOnly), Err(VxError::InvalidParameters));
    }
}
