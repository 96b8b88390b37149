//! Distributions: histograms over a value range split into equal bins.

use crate::core::context::Context;
use crate::core::error::{VxError, VxResult};
use crate::core::meta::MetaInfo;
use crate::core::reference::{AsHandle, Creation, Distribution, ObjectData, Payload};
use crate::core::types::{ObjectType, Usage};
use serde::{Deserialize, Serialize};

pub struct DistributionData {
    pub offset: i32,
    pub range: u32,
    pub bins: Vec<u32>,
}

impl DistributionData {
    pub(crate) fn meta(&self) -> MetaInfo {
        MetaInfo::Distribution {
            bins: self.bins.len(),
            offset: self.offset,
            range: self.range,
        }
    }

    pub(crate) fn conform(&mut self, meta: &MetaInfo) -> VxResult<()> {
        match *meta {
            MetaInfo::Distribution { bins, offset, range } => {
                if bins != self.bins.len() {
                    Err(VxError::InvalidDimension)
                } else if offset != self.offset || range != self.range {
                    Err(VxError::InvalidValue)
                } else {
                    Ok(())
                }
            }
            _ => Err(VxError::InvalidType),
        }
    }

    /// Bin receiving `value`, if it falls in range.
    pub fn bin_of(&self, value: i64) -> Option<usize> {
        let rel = value - i64::from(self.offset);
        if rel < 0 || rel >= i64::from(self.range) {
            return None;
        }
        Some((rel as u64 * self.bins.len() as u64 / u64::from(self.range)) as usize)
    }
}

impl Payload for DistributionData {
    fn project(data: &mut ObjectData) -> Option<&mut Self> {
        match data {
            ObjectData::Distribution(d) => Some(d),
            _ => None,
        }
    }

    fn storage_bytes(&self) -> usize {
        self.bins.len() * 4
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributionInfo {
    pub bins: usize,
    pub offset: i32,
    pub range: u32,
    /// Values per bin.
    pub window: u32,
}

impl Context {
    /// `range` values starting at `offset`, split into `bins` bins.
    pub fn create_distribution(&self, bins: usize, offset: i32, range: u32) -> VxResult<Distribution> {
        if bins == 0 || range == 0 || bins > range as usize {
            return Err(VxError::InvalidParameters);
        }
        self.inner.memory.allocate(bins * 4)?;
        let data = DistributionData {
            offset,
            range,
            bins: vec![0; bins],
        };
        match self.create_reference(Creation::external(ObjectType::Distribution), ObjectData::Distribution(data)) {
            Ok(h) => Ok(Distribution(h)),
            Err(e) => {
                self.inner.memory.release(bins * 4);
                Err(e)
            }
        }
    }

    pub fn query_distribution(&self, dist: Distribution) -> VxResult<DistributionInfo> {
        self.with_payload::<DistributionData, _>(dist.handle(), |d| {
            Ok(DistributionInfo {
                bins: d.bins.len(),
                offset: d.offset,
                range: d.range,
                window: d.range / d.bins.len() as u32,
            })
        })
    }

    pub fn copy_distribution(&self, dist: Distribution, bins: &mut [u32], usage: Usage) -> VxResult<()> {
        self.check_accessible(dist.handle())?;
        self.with_payload::<DistributionData, _>(dist.handle(), |d| {
            let n = d.bins.len();
            if bins.len() < n {
                return Err(VxError::InvalidParameters);
            }
            match usage {
                Usage::ReadOnly => bins[..n].copy_from_slice(&d.bins),
                Usage::WriteOnly => d.bins.copy_from_slice(&bins[..n]),
                Usage::ReadWrite => return Err(VxError::InvalidParameters),
            }
            Ok(())
        })?;
        if usage.writes() {
            self.wrote(dist.handle());
        } else {
            self.read(dist.handle());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bins() {
        let ctx = Context::create().unwrap();
        let dist = ctx.create_distribution(4, 10, 16).unwrap();
        let info = ctx.query_distribution(dist).unwrap();
        assert_eq!(info.window, 4);
        let mut counts = [1, 2, 3, 4];
        ctx.copy_distribution(dist, &mut counts, Usage::WriteOnly).unwrap();
        let mut out = [0u32; 4];
        ctx.copy_distribution(dist, &mut out, Usage::ReadOnly).unwrap();
        assert_eq!(out, counts);
        assert!(ctx.create_distribution(8, 0, 4).is_err());

        let data = DistributionData {
            offset: 10,
            range: 16,
            bins: vec![0; 4],
        };
        assert_eq!(data.bin_of(9), None);
        assert_eq!(data.bin_of(10), Some(0));
        assert_eq!(data.bin_of(25), Some(3));
        assert_eq!(data.bin_of(26), None);
    }
}
