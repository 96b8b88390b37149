//! Remap tables: a source coordinate for every destination pixel.

use crate::core::context::Context;
use crate::core::error::{VxError, VxResult};
use crate::core::meta::MetaInfo;
use crate::core::reference::{AsHandle, Creation, ObjectData, Payload, Remap};
use crate::core::types::{ObjectType, Usage};

pub struct RemapData {
    pub src_width: u32,
    pub src_height: u32,
    pub dst_width: u32,
    pub dst_height: u32,
    /// `(x, y)` source coordinate per destination pixel, row-major.
    pub points: Vec<[f32; 2]>,
}

impl RemapData {
    pub(crate) fn meta(&self) -> MetaInfo {
        MetaInfo::Remap {
            src_width: self.src_width,
            src_height: self.src_height,
            dst_width: self.dst_width,
            dst_height: self.dst_height,
        }
    }

    pub(crate) fn conform(&mut self, meta: &MetaInfo) -> VxResult<()> {
        match meta {
            MetaInfo::Remap { .. } if *meta == self.meta() => Ok(()),
            MetaInfo::Remap { .. } => Err(VxError::InvalidDimension),
            _ => Err(VxError::InvalidType),
        }
    }

    fn index(&self, x: u32, y: u32) -> VxResult<usize> {
        if x >= self.dst_width || y >= self.dst_height {
            return Err(VxError::InvalidValue);
        }
        Ok((y * self.dst_width + x) as usize)
    }
}

impl Payload for RemapData {
    fn project(data: &mut ObjectData) -> Option<&mut Self> {
        match data {
            ObjectData::Remap(d) => Some(d),
            _ => None,
        }
    }

    fn storage_bytes(&self) -> usize {
        self.points.len() * 8
    }
}

impl Context {
    pub fn create_remap(&self, src_width: u32, src_height: u32, dst_width: u32, dst_height: u32) -> VxResult<Remap> {
        if src_width == 0 || src_height == 0 || dst_width == 0 || dst_height == 0 {
            return Err(VxError::InvalidParameters);
        }
        let n = (dst_width * dst_height) as usize;
        self.inner.memory.allocate(n * 8)?;
        let data = RemapData {
            src_width,
            src_height,
            dst_width,
            dst_height,
            points: vec![[0.0; 2]; n],
        };
        match self.create_reference(Creation::external(ObjectType::Remap), ObjectData::Remap(data)) {
            Ok(h) => Ok(Remap(h)),
            Err(e) => {
                self.inner.memory.release(n * 8);
                Err(e)
            }
        }
    }

    pub fn set_remap_point(&self, remap: Remap, dst_x: u32, dst_y: u32, src_x: f32, src_y: f32) -> VxResult<()> {
        self.with_payload::<RemapData, _>(remap.handle(), |d| {
            let i = d.index(dst_x, dst_y)?;
            d.points[i] = [src_x, src_y];
            Ok(())
        })?;
        self.wrote(remap.handle());
        Ok(())
    }

    pub fn get_remap_point(&self, remap: Remap, dst_x: u32, dst_y: u32) -> VxResult<(f32, f32)> {
        let p = self.with_payload::<RemapData, _>(remap.handle(), |d| {
            let i = d.index(dst_x, dst_y)?;
            Ok(d.points[i])
        })?;
        self.read(remap.handle());
        Ok((p[0], p[1]))
    }

    /// Copy the whole table as `(x, y)` pairs.
    pub fn copy_remap(&self, remap: Remap, points: &mut [[f32; 2]], usage: Usage) -> VxResult<()> {
        self.with_payload::<RemapData, _>(remap.handle(), |d| {
            let n = d.points.len();
            if points.len() < n {
                return Err(VxError::InvalidParameters);
            }
            match usage {
                Usage::ReadOnly => points[..n].copy_from_slice(&d.points),
                Usage::WriteOnly => d.points.copy_from_slice(&points[..n]),
                Usage::ReadWrite => return Err(VxError::InvalidParameters),
            }
            Ok(())
        })?;
        if usage.writes() {
            self.wrote(remap.handle());
        } else {
            self.read(remap.handle());
        }
        Ok(())
    }

    /// `(src_width, src_height, dst_width, dst_height)`.
    pub fn query_remap(&self, remap: Remap) -> VxResult<(u32, u32, u32, u32)> {
        self.with_payload::<RemapData, _>(remap.handle(), |d| {
            Ok((d.src_width, d.src_height, d.dst_width, d.dst_height))
        })
    }

    pub(crate) fn remap_snapshot(&self, remap: Remap) -> VxResult<(u32, u32, Vec<[f32; 2]>)> {
        self.with_payload::<RemapData, _>(remap.handle(), |d| Ok((d.dst_width, d.dst_height, d.points.clone())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_points() {
        let ctx = Context::create().unwrap();
        let remap = ctx.create_remap(8, 8, 4, 2).unwrap();
        ctx.set_remap_point(remap, 3, 1, 6.5, 1.25).unwrap();
        assert_eq!(ctx.get_remap_point(remap, 3, 1).unwrap(), (6.5, 1.25));
        assert_eq!(ctx.set_remap_point(remap, 4, 0, 0.0, 0.0), Err(VxError::InvalidValue));
        let mut all = vec![[0.0f32; 2]; 8];
        ctx.copy_remap(remap, &mut all, Usage::ReadOnly).unwrap();
        assert_eq!(all[7], [6.5, 1.25]);
        assert_eq!(ctx.query_remap(remap).unwrap(), (8, 8, 4, 2));
    }
}
