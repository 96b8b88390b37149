//! Data objects: the values nodes read and write.

pub mod array;
pub mod delay;
pub mod distribution;
pub mod image;
pub mod lut;
pub mod matrix;
pub mod object_array;
pub mod pyramid;
pub mod remap;
pub mod scalar;
pub mod tensor;
pub mod threshold;
pub mod user_data;

use crate::core::context::Context;
use crate::core::error::{VxError, VxResult};
use crate::core::meta::MetaInfo;
use crate::core::reference::{AsHandle, Graph, Handle, RefType};
use crate::core::types::{DataType, DfImage, ThresholdType};

impl Context {
    /// Create an object matching `meta`. Images, arrays, pyramids and tensors are virtual
    /// in `scope` when one is given. The new object holds one external count.
    pub(crate) fn create_from_meta(&self, meta: &MetaInfo, scope: Option<Graph>) -> VxResult<Handle> {
        let handle = match (meta, scope) {
            (MetaInfo::Image { width, height, format }, Some(g)) => {
                self.create_virtual_image(g, *width, *height, *format)?.handle()
            }
            (MetaInfo::Image { width, height, format }, None) => self.create_image(*width, *height, *format)?.handle(),
            (MetaInfo::Array { item_type, capacity }, Some(g)) => {
                self.create_virtual_array(g, Some(*item_type), *capacity)?.handle()
            }
            (MetaInfo::Array { item_type, capacity }, None) => self.create_array(*item_type, *capacity)?.handle(),
            (
                MetaInfo::Pyramid {
                    width,
                    height,
                    format,
                    levels,
                    scale,
                },
                scope,
            ) => match scope {
                Some(g) => self.create_virtual_pyramid(g, *levels, *scale, *width, *height, *format)?.handle(),
                None => self.create_pyramid(*levels, *scale, *width, *height, *format)?.handle(),
            },
            (
                MetaInfo::Tensor {
                    dims,
                    data_type,
                    fixed_point_position,
                },
                scope,
            ) => match scope {
                Some(g) => self.create_virtual_tensor(g, dims, *data_type, *fixed_point_position)?.handle(),
                None => self.create_tensor(dims, *data_type, *fixed_point_position)?.handle(),
            },
            (MetaInfo::Scalar { data_type }, _) => self.create_scalar_of(*data_type)?.handle(),
            (MetaInfo::Lut { data_type, count }, _) => self.create_lut(*data_type, *count)?.handle(),
            (MetaInfo::Matrix { data_type, rows, columns }, _) => {
                self.create_matrix(*data_type, *columns, *rows)?.handle()
            }
            (MetaInfo::Convolution { rows, columns }, _) => self.create_convolution(*columns, *rows)?.handle(),
            (MetaInfo::Distribution { bins, offset, range }, _) => {
                self.create_distribution(*bins, *offset, *range)?.handle()
            }
            (
                MetaInfo::Remap {
                    src_width,
                    src_height,
                    dst_width,
                    dst_height,
                },
                _,
            ) => self.create_remap(*src_width, *src_height, *dst_width, *dst_height)?.handle(),
            (MetaInfo::Threshold { threshold_type }, _) => {
                self.create_threshold(*threshold_type, DataType::UInt8)?.handle()
            }
            (MetaInfo::UserData { type_name, size }, Some(g)) => {
                self.create_virtual_user_data_object(g, type_name, *size)?.handle()
            }
            (MetaInfo::UserData { type_name, size }, None) => {
                self.create_user_data_object(type_name, *size, None)?.handle()
            }
            (MetaInfo::ObjectArray { .. }, _) | (MetaInfo::Unset, _) => return Err(VxError::NotSupported),
        };
        Ok(handle)
    }

    /// Turn the creator's external count into an internal one owned by a container.
    pub(crate) fn adopt(&self, handle: Handle) -> VxResult<()> {
        self.increment(handle, RefType::Internal)?;
        self.decrement(handle, RefType::External)?;
        Ok(())
    }

    /// Objects reachable through a container parameter: pyramid levels or object array items.
    pub(crate) fn elements_of(&self, handle: Handle) -> VxResult<Vec<Handle>> {
        use crate::core::reference::{ObjectArray, Pyramid};
        use crate::core::types::ObjectType;
        match self.object_type(handle)? {
            ObjectType::Pyramid => self.pyramid_levels(Pyramid(handle)),
            ObjectType::ObjectArray => self.object_array_items(ObjectArray(handle)),
            _ => Ok(Vec::new()),
        }
    }

    /// Pyramid or object array holding `handle`, with its position there.
    pub(crate) fn container_of(&self, handle: Handle) -> VxResult<Option<(Handle, usize)>> {
        use crate::core::types::ObjectType;
        let owner = match self.object_type(handle)? {
            ObjectType::Image => self.with_payload::<image::ImageData, _>(handle, |d| Ok(d.owner))?,
            _ => None,
        };
        let candidates: Vec<Handle> = match owner {
            Some(o) => vec![o],
            None => self
                .inner
                .table
                .read()
                .live_objects()
                .into_iter()
                .filter(|(_, _, o)| o.kind == ObjectType::ObjectArray)
                .map(|(index, generation, _)| Handle {
                    context: self.id(),
                    index,
                    generation,
                })
                .collect(),
        };
        for container in candidates {
            if let Ok(elements) = self.elements_of(container) {
                if let Some(position) = elements.iter().position(|h| *h == handle) {
                    return Ok(Some((container, position)));
                }
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{ObjectType, SCALE_PYRAMID_HALF};

    #[test]
    fn test_create_from_meta_kinds() {
        let ctx = Context::create().unwrap();
        let metas = [
            MetaInfo::Image {
                width: 4,
                height: 4,
                format: DfImage::U8,
            },
            MetaInfo::Pyramid {
                width: 8,
                height: 8,
                format: DfImage::U8,
                levels: 2,
                scale: SCALE_PYRAMID_HALF,
            },
            MetaInfo::Threshold {
                threshold_type: ThresholdType::Binary,
            },
            MetaInfo::Matrix {
                data_type: DataType::Int16,
                rows: 2,
                columns: 3,
            },
        ];
        for meta in &metas {
            let h = ctx.create_from_meta(meta, None).unwrap();
            assert_eq!(Some(ctx.object_type(h).unwrap()), meta.object_type());
            assert_eq!(&ctx.describe(h).unwrap(), meta);
        }
        assert_eq!(ctx.create_from_meta(&MetaInfo::Unset, None), Err(VxError::NotSupported));
    }

    #[test]
    fn test_adopt_moves_count() {
        let ctx = Context::create().unwrap();
        let h = ctx.create_scalar_of(DataType::Int32).unwrap().handle();
        ctx.adopt(h).unwrap();
        let info = ctx.query_reference(h).unwrap();
        assert_eq!((info.external_count, info.internal_count), (0, 1));
        assert_eq!(info.object_type, ObjectType::Scalar);
    }
}
