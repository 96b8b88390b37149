//! Image pyramids: a fixed number of levels, each `scale` times the size of the one before.

use crate::core::context::Context;
use crate::core::error::{StatusFold, VxError, VxResult};
use crate::core::meta::MetaInfo;
use crate::core::reference::{AsHandle, Creation, Graph, Handle, Image, ObjectData, Payload, Pyramid, RefType};
use crate::core::types::{DfImage, ObjectType, SCALE_PYRAMID_HALF, SCALE_PYRAMID_ORB};
use serde::{Deserialize, Serialize};

/// Most levels a pyramid may have.
pub const MAX_PYRAMID_LEVELS: usize = 8;

pub struct PyramidData {
    pub num_levels: usize,
    pub scale: f32,
    pub width: u32,
    pub height: u32,
    pub format: DfImage,
    /// Level images, each holding an internal count. Empty until the geometry is known.
    pub levels: Vec<Handle>,
}

impl PyramidData {
    pub(crate) fn meta(&self) -> MetaInfo {
        MetaInfo::Pyramid {
            width: self.width,
            height: self.height,
            format: self.format,
            levels: self.num_levels,
            scale: self.scale,
        }
    }

    pub(crate) fn conform(&mut self, meta: &MetaInfo, is_virtual: bool) -> VxResult<()> {
        let MetaInfo::Pyramid {
            width,
            height,
            format,
            levels,
            scale,
        } = *meta
        else {
            return Err(VxError::InvalidType);
        };
        if levels != self.num_levels || scale != self.scale {
            return Err(VxError::InvalidValue);
        }
        if is_virtual && self.levels.is_empty() {
            if self.format != DfImage::Virt && self.format != format {
                return Err(VxError::InvalidFormat);
            }
            if (self.width != 0 && self.width != width) || (self.height != 0 && self.height != height) {
                return Err(VxError::InvalidDimension);
            }
            if format == DfImage::Virt {
                return Err(VxError::InvalidFormat);
            }
            self.width = width;
            self.height = height;
            self.format = format;
            return Ok(());
        }
        if self.format != format {
            return Err(VxError::InvalidFormat);
        }
        if (self.width, self.height) != (width, height) {
            return Err(VxError::InvalidDimension);
        }
        Ok(())
    }
}

impl Payload for PyramidData {
    fn project(data: &mut ObjectData) -> Option<&mut Self> {
        match data {
            ObjectData::Pyramid(d) => Some(d),
            _ => None,
        }
    }

    fn children(&self) -> Vec<Handle> {
        self.levels.clone()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PyramidInfo {
    pub levels: usize,
    pub scale: f32,
    pub width: u32,
    pub height: u32,
    pub format: DfImage,
}

/// Width and height of every level, rounding up.
///
/// ORB pyramids restart from an exact halving every fourth level so rounding error
/// does not accumulate.
pub fn pyramid_level_dims(width: u32, height: u32, scale: f32, levels: usize) -> Vec<(u32, u32)> {
    let mut dims = Vec::with_capacity(levels);
    let mut anchor = (width, height);
    for k in 0..levels {
        let d = if k == 0 {
            (width, height)
        } else if scale == SCALE_PYRAMID_ORB && k % 4 == 0 {
            let (w, h) = dims[k - 4];
            let d = (half_up(w), half_up(h));
            anchor = d;
            d
        } else if scale == SCALE_PYRAMID_ORB {
            let f = f64::from(scale).powi((k % 4) as i32);
            ((f64::from(anchor.0) * f).ceil() as u32, (f64::from(anchor.1) * f).ceil() as u32)
        } else {
            let (w, h) = dims[k - 1];
            (scale_up(w, scale), scale_up(h, scale))
        };
        dims.push(d);
    }
    dims
}

fn half_up(v: u32) -> u32 {
    v.div_ceil(2)
}

fn scale_up(v: u32, scale: f32) -> u32 {
    if scale == SCALE_PYRAMID_HALF {
        half_up(v)
    } else {
        (f64::from(v) * f64::from(scale)).ceil() as u32
    }
}

impl Context {
    fn validate_pyramid(levels: usize, scale: f32) -> VxResult<()> {
        if levels == 0 || levels > MAX_PYRAMID_LEVELS {
            return Err(VxError::InvalidParameters);
        }
        if scale != SCALE_PYRAMID_HALF && scale != SCALE_PYRAMID_ORB {
            return Err(VxError::InvalidParameters);
        }
        Ok(())
    }

    pub fn create_pyramid(&self, levels: usize, scale: f32, width: u32, height: u32, format: DfImage) -> VxResult<Pyramid> {
        Self::validate_pyramid(levels, scale)?;
        if format == DfImage::Virt {
            return Err(VxError::InvalidFormat);
        }
        if !format.supports_dimensions(width, height) {
            return Err(VxError::InvalidDimension);
        }
        let data = PyramidData {
            num_levels: levels,
            scale,
            width,
            height,
            format,
            levels: Vec::new(),
        };
        let pyramid = Pyramid(self.create_reference(Creation::external(ObjectType::Pyramid), ObjectData::Pyramid(data))?);
        if let Err(e) = self.realize_pyramid_levels(pyramid) {
            let _ = self.release(pyramid);
            return Err(e);
        }
        Ok(pyramid)
    }

    /// Graph-scoped pyramid; size and format may be left for verification to infer.
    pub fn create_virtual_pyramid(
        &self,
        graph: Graph,
        levels: usize,
        scale: f32,
        width: u32,
        height: u32,
        format: DfImage,
    ) -> VxResult<Pyramid> {
        self.object_of(graph.handle(), ObjectType::Graph)?;
        Self::validate_pyramid(levels, scale)?;
        let data = PyramidData {
            num_levels: levels,
            scale,
            width,
            height,
            format,
            levels: Vec::new(),
        };
        let handle = self.create_reference(
            Creation::virtual_in(ObjectType::Pyramid, graph.handle()),
            ObjectData::Pyramid(data),
        )?;
        Ok(Pyramid(handle))
    }

    /// Create the level images once width, height and format are known. Idempotent.
    pub(crate) fn realize_pyramid_levels(&self, pyramid: Pyramid) -> VxResult<()> {
        let (info, ready) = self.with_payload::<PyramidData, _>(pyramid.handle(), |d| {
            Ok((
                PyramidInfo {
                    levels: d.num_levels,
                    scale: d.scale,
                    width: d.width,
                    height: d.height,
                    format: d.format,
                },
                d.levels.is_empty() && d.width != 0 && d.height != 0 && d.format != DfImage::Virt,
            ))
        })?;
        if !ready {
            return Ok(());
        }
        let header = self.with_header(pyramid.handle(), |h| (h.is_virtual, h.scope))?;
        let mut levels = Vec::with_capacity(info.levels);
        let mut failure = None;
        for (w, h) in pyramid_level_dims(info.width, info.height, info.scale, info.levels) {
            let created = if header.0 {
                self.create_virtual_image(Graph(header.1), w, h, info.format)
            } else {
                self.create_image(w, h, info.format)
            };
            match created.and_then(|img| self.adopt(img.handle()).map(|_| img)) {
                Ok(img) => levels.push(img.handle()),
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }
        if let Some(e) = failure {
            let mut fold = StatusFold::new();
            for l in levels {
                fold.push(self.decrement(l, RefType::Internal));
            }
            return Err(e);
        }
        for &level in &levels {
            self.with_payload::<crate::objects::image::ImageData, _>(level, |d| {
                d.owner = Some(pyramid.handle());
                Ok(())
            })?;
        }
        log::trace!("pyramid {} realized with {} levels", pyramid, levels.len());
        self.with_payload::<PyramidData, _>(pyramid.handle(), |d| {
            d.levels = levels;
            Ok(())
        })
    }

    pub fn query_pyramid(&self, pyramid: Pyramid) -> VxResult<PyramidInfo> {
        self.with_payload::<PyramidData, _>(pyramid.handle(), |d| {
            Ok(PyramidInfo {
                levels: d.num_levels,
                scale: d.scale,
                width: d.width,
                height: d.height,
                format: d.format,
            })
        })
    }

    /// Level `index` of the pyramid. The caller receives a count and must release it.
    pub fn get_pyramid_level(&self, pyramid: Pyramid, index: usize) -> VxResult<Image> {
        let level = self.with_payload::<PyramidData, _>(pyramid.handle(), |d| {
            if index >= d.num_levels {
                return Err(VxError::InvalidParameters);
            }
            d.levels.get(index).copied().ok_or(VxError::NotAllocated)
        })?;
        self.increment(level, RefType::External)?;
        Ok(Image(level))
    }

    /// Level handles without touching counts.
    pub(crate) fn pyramid_levels(&self, pyramid: Pyramid) -> VxResult<Vec<Handle>> {
        self.with_payload::<PyramidData, _>(pyramid.handle(), |d| Ok(d.levels.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_half_levels_round_up() {
        assert_eq!(
            pyramid_level_dims(31, 17, SCALE_PYRAMID_HALF, 4),
            vec![(31, 17), (16, 9), (8, 5), (4, 3)]
        );
    }

    #[test]
    fn test_orb_reanchors() {
        let dims = pyramid_level_dims(640, 480, SCALE_PYRAMID_ORB, 6);
        assert_eq!(dims[0], (640, 480));
        assert_eq!(dims[1], (539, 404));
        assert_eq!(dims[4], (320, 240));
        assert_eq!(dims[5], (270, 202));
    }

    #[test]
    fn test_create_and_get_level() {
        let ctx = Context::create().unwrap();
        let pyr = ctx.create_pyramid(3, SCALE_PYRAMID_HALF, 16, 8, DfImage::U8).unwrap();
        let l2 = ctx.get_pyramid_level(pyr, 2).unwrap();
        let info = ctx.query_image(l2).unwrap();
        assert_eq!((info.width, info.height), (4, 2));
        assert_eq!(ctx.get_pyramid_level(pyr, 3), Err(VxError::InvalidParameters));

        // The level outlives the pyramid while the caller holds it.
        ctx.release(pyr).unwrap();
        assert!(ctx.is_valid(l2));
        ctx.release(l2).unwrap();
        assert!(!ctx.is_valid(l2));
    }

    #[test]
    fn test_rejects_bad_shape() {
        let ctx = Context::create().unwrap();
        assert!(ctx.create_pyramid(0, SCALE_PYRAMID_HALF, 8, 8, DfImage::U8).is_err());
        assert!(ctx.create_pyramid(9, SCALE_PYRAMID_HALF, 8, 8, DfImage::U8).is_err());
        assert!(ctx.create_pyramid(2, 0.3, 8, 8, DfImage::U8).is_err());
    }

    #[test]
    fn test_virtual_pyramid_levels_after_meta() {
        let ctx = Context::create().unwrap();
        let graph = ctx.create_graph().unwrap();
        let pyr = ctx.create_virtual_pyramid(graph, 2, SCALE_PYRAMID_HALF, 0, 0, DfImage::Virt).unwrap();
        assert!(ctx.pyramid_levels(pyr).unwrap().is_empty());
        let meta = MetaInfo::Pyramid {
            width: 10,
            height: 6,
            format: DfImage::U8,
            levels: 2,
            scale: SCALE_PYRAMID_HALF,
        };
        ctx.apply_meta(pyr.handle(), &meta).unwrap();
        let levels = ctx.pyramid_levels(pyr).unwrap();
        assert_eq!(levels.len(), 2);
        assert!(ctx.query_reference(levels[1]).unwrap().is_virtual);
        let bad = MetaInfo::Pyramid {
            width: 10,
            height: 6,
            format: DfImage::U8,
            levels: 3,
            scale: SCALE_PYRAMID_HALF,
        };
        assert_eq!(ctx.apply_meta(pyr.handle(), &bad), Err(VxError::InvalidValue));
    }

    proptest! {
        #[test]
        fn prop_half_levels_match_ceil(w in 1u32..4096, h in 1u32..4096, levels in 1usize..=8) {
            let dims = pyramid_level_dims(w, h, SCALE_PYRAMID_HALF, levels);
            prop_assert_eq!(dims.len(), levels);
            for (k, &(lw, lh)) in dims.iter().enumerate() {
                let div = 1u32 << k;
                prop_assert_eq!(lw, w.div_ceil(div));
                prop_assert_eq!(lh, h.div_ceil(div));
            }
        }
    }
}
