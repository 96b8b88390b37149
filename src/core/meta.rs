//! Meta formats: what an output must look like, as declared by a kernel validator.
//!
//! Verification hands each output validator a [`MetaFormat`] of the output's object kind.
//! The validator fills it in, then postprocessing either sizes a virtual output to match or
//! checks a concrete one against it.

use crate::core::context::Context;
use crate::core::error::{VxError, VxResult};
use crate::core::reference::{AsHandle, Handle, Image, Node, ObjectData, Payload};
use crate::core::types::{DataType, DfImage, ObjectType, Rectangle, ThresholdType};
use crate::objects::array::ArrayData;
use crate::objects::distribution::DistributionData;
use crate::objects::lut::LutData;
use crate::objects::matrix::{ConvolutionData, MatrixData};
use crate::objects::object_array::ObjectArrayData;
use crate::objects::pyramid::PyramidData;
use crate::objects::remap::RemapData;
use crate::objects::scalar::ScalarData;
use crate::objects::tensor::TensorData;
use crate::objects::threshold::ThresholdData;
use crate::objects::user_data::UserObjectData;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// Computes an output's valid rectangle from the valid rectangles of the node's image inputs.
pub type ValidRectFn = Arc<dyn Fn(&Context, Node, &[Rectangle]) -> VxResult<Rectangle> + Send + Sync>;

/// Attributes describing one data object, independent of its storage.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MetaInfo {
    /// Nothing set yet.
    Unset,
    Image {
        width: u32,
        height: u32,
        format: DfImage,
    },
    Pyramid {
        width: u32,
        height: u32,
        format: DfImage,
        levels: usize,
        scale: f32,
    },
    Scalar {
        data_type: DataType,
    },
    Array {
        item_type: DataType,
        capacity: usize,
    },
    Lut {
        data_type: DataType,
        count: usize,
    },
    Matrix {
        data_type: DataType,
        rows: usize,
        columns: usize,
    },
    Convolution {
        rows: usize,
        columns: usize,
    },
    Distribution {
        bins: usize,
        offset: i32,
        range: u32,
    },
    Remap {
        src_width: u32,
        src_height: u32,
        dst_width: u32,
        dst_height: u32,
    },
    Threshold {
        threshold_type: ThresholdType,
    },
    ObjectArray {
        count: usize,
        item: Box<MetaInfo>,
    },
    Tensor {
        dims: Vec<usize>,
        data_type: DataType,
        fixed_point_position: i8,
    },
    UserData {
        type_name: String,
        size: usize,
    },
}

impl MetaInfo {
    /// Object kind this description fits, `None` while unset.
    pub fn object_type(&self) -> Option<ObjectType> {
        let t = match self {
            MetaInfo::Unset => return None,
            MetaInfo::Image { .. } => ObjectType::Image,
            MetaInfo::Pyramid { .. } => ObjectType::Pyramid,
            MetaInfo::Scalar { .. } => ObjectType::Scalar,
            MetaInfo::Array { .. } => ObjectType::Array,
            MetaInfo::Lut { .. } => ObjectType::Lut,
            MetaInfo::Matrix { .. } => ObjectType::Matrix,
            MetaInfo::Convolution { .. } => ObjectType::Convolution,
            MetaInfo::Distribution { .. } => ObjectType::Distribution,
            MetaInfo::Remap { .. } => ObjectType::Remap,
            MetaInfo::Threshold { .. } => ObjectType::Threshold,
            MetaInfo::ObjectArray { .. } => ObjectType::ObjectArray,
            MetaInfo::Tensor { .. } => ObjectType::Tensor,
            MetaInfo::UserData { .. } => ObjectType::UserData,
        };
        Some(t)
    }
}

/// Output description filled in by a kernel's validator.
#[derive(Clone)]
pub struct MetaFormat {
    object_type: ObjectType,
    info: MetaInfo,
    valid_rect: Option<ValidRectFn>,
}

impl fmt::Debug for MetaFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetaFormat")
            .field("object_type", &self.object_type)
            .field("info", &self.info)
            .field("valid_rect", &self.valid_rect.is_some())
            .finish()
    }
}

impl MetaFormat {
    /// Empty meta format for an output of kind `object_type`.
    pub fn new(object_type: ObjectType) -> Self {
        Self {
            object_type,
            info: MetaInfo::Unset,
            valid_rect: None,
        }
    }

    pub fn object_type(&self) -> ObjectType {
        self.object_type
    }

    pub fn info(&self) -> &MetaInfo {
        &self.info
    }

    pub fn is_set(&self) -> bool {
        self.info != MetaInfo::Unset
    }

    pub fn valid_rect_callback(&self) -> Option<&ValidRectFn> {
        self.valid_rect.as_ref()
    }

    /// Set the whole description. Its kind must match this meta format's kind.
    pub fn set(&mut self, info: MetaInfo) -> VxResult<()> {
        if info.object_type() != Some(self.object_type) {
            return Err(VxError::InvalidParameters);
        }
        self.info = info;
        Ok(())
    }

    pub fn set_image(&mut self, width: u32, height: u32, format: DfImage) -> VxResult<()> {
        self.set(MetaInfo::Image { width, height, format })
    }

    pub fn set_scalar(&mut self, data_type: DataType) -> VxResult<()> {
        self.set(MetaInfo::Scalar { data_type })
    }

    pub fn set_array(&mut self, item_type: DataType, capacity: usize) -> VxResult<()> {
        self.set(MetaInfo::Array { item_type, capacity })
    }

    pub fn set_pyramid(&mut self, width: u32, height: u32, format: DfImage, levels: usize, scale: f32) -> VxResult<()> {
        self.set(MetaInfo::Pyramid {
            width,
            height,
            format,
            levels,
            scale,
        })
    }

    pub fn set_tensor(&mut self, dims: Vec<usize>, data_type: DataType, fixed_point_position: i8) -> VxResult<()> {
        self.set(MetaInfo::Tensor {
            dims,
            data_type,
            fixed_point_position,
        })
    }

    /// Only images take a valid-rectangle callback.
    pub fn set_valid_rect_callback(&mut self, callback: ValidRectFn) -> VxResult<()> {
        if self.object_type != ObjectType::Image {
            return Err(VxError::InvalidParameters);
        }
        self.valid_rect = Some(callback);
        Ok(())
    }

    /// Copy every attribute of an existing object of the same kind.
    pub fn set_from_reference(&mut self, ctx: &Context, reference: impl AsHandle) -> VxResult<()> {
        let info = ctx.describe(reference.handle())?;
        self.set(info)
    }
}

fn describe_payload<T: Payload>(data: &mut ObjectData, f: impl FnOnce(&T) -> MetaInfo) -> VxResult<MetaInfo> {
    T::project(data).map(|p| f(&*p)).ok_or(VxError::InvalidReference)
}

impl Context {
    /// Attributes of an existing object as a [`MetaInfo`].
    pub fn describe(&self, handle: Handle) -> VxResult<MetaInfo> {
        let object = self.object(handle)?;
        if object.kind == ObjectType::Image {
            return self.image_meta(Image(handle));
        }
        let mut data = object.data.lock();
        match object.kind {
            ObjectType::Pyramid => describe_payload::<PyramidData>(&mut data, PyramidData::meta),
            ObjectType::Scalar => describe_payload::<ScalarData>(&mut data, ScalarData::meta),
            ObjectType::Array => describe_payload::<ArrayData>(&mut data, ArrayData::meta),
            ObjectType::Lut => describe_payload::<LutData>(&mut data, LutData::meta),
            ObjectType::Matrix => describe_payload::<MatrixData>(&mut data, MatrixData::meta),
            ObjectType::Convolution => describe_payload::<ConvolutionData>(&mut data, ConvolutionData::meta),
            ObjectType::Distribution => describe_payload::<DistributionData>(&mut data, DistributionData::meta),
            ObjectType::Remap => describe_payload::<RemapData>(&mut data, RemapData::meta),
            ObjectType::Threshold => describe_payload::<ThresholdData>(&mut data, ThresholdData::meta),
            ObjectType::Tensor => describe_payload::<TensorData>(&mut data, TensorData::meta),
            ObjectType::UserData => describe_payload::<UserObjectData>(&mut data, UserObjectData::meta),
            ObjectType::ObjectArray => {
                let d = ObjectArrayData::project(&mut data).ok_or(VxError::InvalidReference)?;
                let count = d.items.len();
                let first = d.items.first().copied();
                drop(data);
                let item = match first {
                    Some(h) => self.describe(h)?,
                    None => MetaInfo::Unset,
                };
                Ok(MetaInfo::ObjectArray {
                    count,
                    item: Box::new(item),
                })
            }
            _ => Err(VxError::InvalidType),
        }
    }

    /// Make `handle` match `meta`: size a virtual object, or check a concrete one.
    pub(crate) fn apply_meta(&self, handle: Handle, meta: &MetaInfo) -> VxResult<()> {
        let object = self.object(handle)?;
        if meta.object_type() != Some(object.kind) {
            return Err(VxError::InvalidType);
        }
        let is_virtual = object.header.lock().is_virtual;
        let mut data = object.data.lock();
        let result = match &mut *data {
            ObjectData::Image(d) => d.conform(meta, is_virtual),
            ObjectData::Pyramid(d) => d.conform(meta, is_virtual),
            ObjectData::Scalar(d) => d.conform(meta),
            ObjectData::Array(d) => d.conform(meta, is_virtual),
            ObjectData::Lut(d) => d.conform(meta),
            ObjectData::Matrix(d) => d.conform(meta),
            ObjectData::Convolution(d) => d.conform(meta),
            ObjectData::Distribution(d) => d.conform(meta),
            ObjectData::Remap(d) => d.conform(meta),
            ObjectData::Threshold(d) => d.conform(meta),
            ObjectData::Tensor(d) => d.conform(meta, is_virtual),
            ObjectData::UserData(d) => d.conform(meta, is_virtual),
            ObjectData::ObjectArray(d) => {
                let MetaInfo::ObjectArray { count, item } = meta else {
                    return Err(VxError::InvalidType);
                };
                if d.items.len() != *count {
                    return Err(VxError::InvalidDimension);
                }
                let items = d.items.clone();
                drop(data);
                for h in items {
                    if **item != MetaInfo::Unset {
                        self.apply_meta(h, item)?;
                    }
                }
                return Ok(());
            }
            _ => Err(VxError::InvalidType),
        };
        drop(data);
        result?;
        if object.kind == ObjectType::Pyramid {
            self.realize_pyramid_levels(crate::core::reference::Pyramid(handle))?;
        }
        Ok(())
    }
}
