//! Scalars: a single typed value.

use crate::core::context::Context;
use crate::core::error::{VxError, VxResult};
use crate::core::meta::MetaInfo;
use crate::core::reference::{AsHandle, Creation, ObjectData, Payload, Scalar};
use crate::core::types::{DataType, ObjectType, ScalarValue, Usage};

pub struct ScalarData {
    pub value: ScalarValue,
}

impl ScalarData {
    pub(crate) fn meta(&self) -> MetaInfo {
        MetaInfo::Scalar {
            data_type: self.value.data_type(),
        }
    }

    pub(crate) fn conform(&mut self, meta: &MetaInfo) -> VxResult<()> {
        match meta {
            MetaInfo::Scalar { data_type } if *data_type == self.value.data_type() => Ok(()),
            _ => Err(VxError::InvalidType),
        }
    }
}

impl Payload for ScalarData {
    fn project(data: &mut ObjectData) -> Option<&mut Self> {
        match data {
            ObjectData::Scalar(d) => Some(d),
            _ => None,
        }
    }
}

impl Context {
    pub fn create_scalar(&self, value: ScalarValue) -> VxResult<Scalar> {
        let handle = self.create_reference(
            Creation::external(ObjectType::Scalar),
            ObjectData::Scalar(ScalarData { value }),
        )?;
        Ok(Scalar(handle))
    }

    /// Zero-valued scalar of `data_type`.
    pub fn create_scalar_of(&self, data_type: DataType) -> VxResult<Scalar> {
        self.create_scalar(ScalarValue::zero(data_type)?)
    }

    pub fn query_scalar_type(&self, scalar: Scalar) -> VxResult<DataType> {
        self.with_payload::<ScalarData, _>(scalar.handle(), |d| Ok(d.value.data_type()))
    }

    pub fn read_scalar(&self, scalar: Scalar) -> VxResult<ScalarValue> {
        self.check_accessible(scalar.handle())?;
        let value = self.with_payload::<ScalarData, _>(scalar.handle(), |d| Ok(d.value))?;
        self.read(scalar.handle());
        Ok(value)
    }

    /// Overwrite the value; its type must match the scalar's.
    pub fn write_scalar(&self, scalar: Scalar, value: ScalarValue) -> VxResult<()> {
        self.check_accessible(scalar.handle())?;
        self.with_payload::<ScalarData, _>(scalar.handle(), |d| {
            if d.value.data_type() != value.data_type() {
                return Err(VxError::InvalidType);
            }
            d.value = value;
            Ok(())
        })?;
        self.wrote(scalar.handle());
        Ok(())
    }

    /// Byte-level copy in the scalar's native representation.
    pub fn copy_scalar(&self, scalar: Scalar, bytes: &mut [u8], usage: Usage) -> VxResult<()> {
        match usage {
            Usage::ReadOnly => {
                let raw = self.read_scalar(scalar)?.to_bytes();
                let dst = bytes.get_mut(..raw.len()).ok_or(VxError::InvalidParameters)?;
                dst.copy_from_slice(&raw);
                Ok(())
            }
            Usage::WriteOnly => {
                let dt = self.query_scalar_type(scalar)?;
                self.write_scalar(scalar, ScalarValue::from_bytes(dt, bytes)?)
            }
            Usage::ReadWrite => Err(VxError::InvalidParameters),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_write_read() {
        let ctx = Context::create().unwrap();
        let s = ctx.create_scalar(ScalarValue::Int16(-3)).unwrap();
        assert_eq!(ctx.read_scalar(s).unwrap(), ScalarValue::Int16(-3));
        ctx.write_scalar(s, ScalarValue::Int16(7)).unwrap();
        assert_eq!(ctx.read_scalar(s).unwrap(), ScalarValue::Int16(7));
        assert_eq!(ctx.write_scalar(s, ScalarValue::UInt8(1)), Err(VxError::InvalidType));
        let info = ctx.query_reference(s).unwrap();
        assert_eq!((info.read_count, info.write_count), (2, 1));
    }

    #[test]
    fn test_scalar_byte_copy() {
        let ctx = Context::create().unwrap();
        let s = ctx.create_scalar_of(DataType::Float32).unwrap();
        let mut bytes = 2.5f32.to_ne_bytes();
        ctx.copy_scalar(s, &mut bytes, Usage::WriteOnly).unwrap();
        let mut out = [0u8; 4];
        ctx.copy_scalar(s, &mut out, Usage::ReadOnly).unwrap();
        assert_eq!(f32::from_ne_bytes(out), 2.5);
        assert_eq!(ctx.copy_scalar(s, &mut [0u8; 2], Usage::ReadOnly), Err(VxError::InvalidParameters));
        assert!(ctx.create_scalar_of(DataType::Rectangle).is_err());
    }
}
