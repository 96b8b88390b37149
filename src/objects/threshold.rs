//! Thresholds: binary or range comparison with configurable output values.

use crate::core::context::Context;
use crate::core::error::{VxError, VxResult};
use crate::core::meta::MetaInfo;
use crate::core::reference::{AsHandle, Creation, ObjectData, Payload, Threshold};
use crate::core::types::{DataType, ObjectType, ThresholdType};
use serde::{Deserialize, Serialize};

/// Settings of a threshold object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThresholdData {
    pub threshold_type: ThresholdType,
    pub data_type: DataType,
    /// Binary threshold: pixels above `value` are true.
    pub value: i32,
    /// Range threshold: pixels in `lower..=upper` are true.
    pub lower: i32,
    pub upper: i32,
    pub true_value: i32,
    pub false_value: i32,
}

impl ThresholdData {
    pub(crate) fn meta(&self) -> MetaInfo {
        MetaInfo::Threshold {
            threshold_type: self.threshold_type,
        }
    }

    pub(crate) fn conform(&mut self, meta: &MetaInfo) -> VxResult<()> {
        match meta {
            MetaInfo::Threshold { threshold_type } if *threshold_type == self.threshold_type => Ok(()),
            _ => Err(VxError::InvalidType),
        }
    }

    /// Output value for `pixel`.
    pub fn apply(&self, pixel: i32) -> i32 {
        let hit = match self.threshold_type {
            ThresholdType::Binary => pixel > self.value,
            ThresholdType::Range => pixel >= self.lower && pixel <= self.upper,
        };
        if hit {
            self.true_value
        } else {
            self.false_value
        }
    }
}

impl Payload for ThresholdData {
    fn project(data: &mut ObjectData) -> Option<&mut Self> {
        match data {
            ObjectData::Threshold(d) => Some(d),
            _ => None,
        }
    }
}

impl Context {
    /// `data_type` is the type of the compared pixels (`UInt8`, `Int16`, `UInt16`, `Int32`, `UInt32`).
    pub fn create_threshold(&self, threshold_type: ThresholdType, data_type: DataType) -> VxResult<Threshold> {
        let true_value = match data_type {
            DataType::UInt8 => 255,
            DataType::Int16 => i32::from(i16::MAX),
            DataType::UInt16 => i32::from(u16::MAX),
            DataType::Int32 | DataType::UInt32 => i32::MAX,
            _ => return Err(VxError::InvalidType),
        };
        let data = ThresholdData {
            threshold_type,
            data_type,
            value: 0,
            lower: 0,
            upper: 0,
            true_value,
            false_value: 0,
        };
        let handle = self.create_reference(Creation::external(ObjectType::Threshold), ObjectData::Threshold(data))?;
        Ok(Threshold(handle))
    }

    pub fn set_threshold_value(&self, threshold: Threshold, value: i32) -> VxResult<()> {
        self.update_threshold(threshold, |d| {
            if d.threshold_type != ThresholdType::Binary {
                return Err(VxError::NotCompatible);
            }
            d.value = value;
            Ok(())
        })
    }

    pub fn set_threshold_range(&self, threshold: Threshold, lower: i32, upper: i32) -> VxResult<()> {
        self.update_threshold(threshold, |d| {
            if d.threshold_type != ThresholdType::Range {
                return Err(VxError::NotCompatible);
            }
            if lower > upper {
                return Err(VxError::InvalidValue);
            }
            d.lower = lower;
            d.upper = upper;
            Ok(())
        })
    }

    pub fn set_threshold_outputs(&self, threshold: Threshold, true_value: i32, false_value: i32) -> VxResult<()> {
        self.update_threshold(threshold, |d| {
            d.true_value = true_value;
            d.false_value = false_value;
            Ok(())
        })
    }

    fn update_threshold(&self, threshold: Threshold, f: impl FnOnce(&mut ThresholdData) -> VxResult<()>) -> VxResult<()> {
        self.with_payload::<ThresholdData, _>(threshold.handle(), f)?;
        self.wrote(threshold.handle());
        Ok(())
    }

    pub fn query_threshold(&self, threshold: Threshold) -> VxResult<ThresholdData> {
        self.with_payload::<ThresholdData, _>(threshold.handle(), |d| Ok(*d))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binary_and_range() {
        let ctx = Context::create().unwrap();
        let bin = ctx.create_threshold(ThresholdType::Binary, DataType::UInt8).unwrap();
        ctx.set_threshold_value(bin, 100).unwrap();
        assert_eq!(ctx.set_threshold_range(bin, 0, 1), Err(VxError::NotCompatible));
        let t = ctx.query_threshold(bin).unwrap();
        assert_eq!((t.apply(100), t.apply(101)), (0, 255));

        let range = ctx.create_threshold(ThresholdType::Range, DataType::Int16).unwrap();
        ctx.set_threshold_range(range, -5, 5).unwrap();
        ctx.set_threshold_outputs(range, 1, -1).unwrap();
        let t = ctx.query_threshold(range).unwrap();
        assert_eq!((t.apply(-5), t.apply(6)), (1, -1));
        assert_eq!(ctx.set_threshold_range(range, 3, 2), Err(VxError::InvalidValue));
        assert!(ctx.create_threshold(ThresholdType::Binary, DataType::Float32).is_err());
    }
}
