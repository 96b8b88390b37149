//! Core value types shared by every object family.
//!
//! The type system uses closed enums throughout:
//! - Object kinds, item types and pixel formats are finite sets
//! - Exhaustive matching catches a missing format at compile time
//! - serde handles them natively for graph descriptions and config files

use crate::core::error::{VxError, VxResult};
use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of a reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectType {
    Context,
    Graph,
    Node,
    Kernel,
    Image,
    Array,
    Lut,
    Scalar,
    Matrix,
    Convolution,
    Distribution,
    Remap,
    Pyramid,
    ObjectArray,
    Delay,
    Tensor,
    Threshold,
    UserData,
    /// Wildcard used in kernel signatures: accepts any data object.
    Reference,
}

impl ObjectType {
    /// Whether objects of this kind carry user data and may be node parameters.
    pub fn is_data_object(self) -> bool {
        !matches!(
            self,
            ObjectType::Context
                | ObjectType::Graph
                | ObjectType::Node
                | ObjectType::Kernel
                | ObjectType::Reference
        )
    }

    /// Whether a parameter declared as `self` accepts an object of kind `actual`.
    pub fn accepts(self, actual: ObjectType) -> bool {
        self == actual || (self == ObjectType::Reference && actual.is_data_object())
    }

    /// Lower-case name.
    pub fn name(self) -> &'static str {
        match self {
            ObjectType::Context => "context",
            ObjectType::Graph => "graph",
            ObjectType::Node => "node",
            ObjectType::Kernel => "kernel",
            ObjectType::Image => "image",
            ObjectType::Array => "array",
            ObjectType::Lut => "lut",
            ObjectType::Scalar => "scalar",
            ObjectType::Matrix => "matrix",
            ObjectType::Convolution => "convolution",
            ObjectType::Distribution => "distribution",
            ObjectType::Remap => "remap",
            ObjectType::Pyramid => "pyramid",
            ObjectType::ObjectArray => "object_array",
            ObjectType::Delay => "delay",
            ObjectType::Tensor => "tensor",
            ObjectType::Threshold => "threshold",
            ObjectType::UserData => "user_data_object",
            ObjectType::Reference => "reference",
        }
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Element type of scalars, arrays, matrices, LUTs and tensors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    Char,
    Int8,
    UInt8,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Float32,
    Float64,
    Enum,
    Size,
    Bool,
    DfImage,
    Rectangle,
    KeyPoint,
    Coordinates2d,
    Coordinates3d,
    /// A struct registered with `Context::register_user_struct`.
    UserStruct(u32),
}

impl DataType {
    /// Byte size of one item, `None` for user structs (sized by the context registry).
    pub fn fixed_size(self) -> Option<usize> {
        let size = match self {
            DataType::Char | DataType::Int8 | DataType::UInt8 | DataType::Bool => 1,
            DataType::Int16 | DataType::UInt16 => 2,
            DataType::Int32 | DataType::UInt32 | DataType::Float32 | DataType::Enum => 4,
            DataType::DfImage => 4,
            DataType::Int64 | DataType::UInt64 | DataType::Float64 => 8,
            DataType::Size => std::mem::size_of::<usize>(),
            DataType::Rectangle => std::mem::size_of::<Rectangle>(),
            DataType::KeyPoint => std::mem::size_of::<KeyPoint>(),
            DataType::Coordinates2d => std::mem::size_of::<Coordinates2d>(),
            DataType::Coordinates3d => std::mem::size_of::<Coordinates3d>(),
            DataType::UserStruct(_) => return None,
        };
        Some(size)
    }

    /// Whether a matrix may hold this type.
    pub fn is_matrix_type(self) -> bool {
        matches!(
            self,
            DataType::UInt8 | DataType::Int8 | DataType::Int16 | DataType::Int32 | DataType::Float32
        )
    }

    /// Whether a tensor may hold this type.
    pub fn is_tensor_type(self) -> bool {
        matches!(
            self,
            DataType::Int8 | DataType::UInt8 | DataType::Int16 | DataType::Float32
        )
    }
}

// ============================================================================
// Pod item structs
// ============================================================================

/// Axis-aligned rectangle, end-exclusive.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Pod, Zeroable, Serialize, Deserialize)]
pub struct Rectangle {
    pub start_x: u32,
    pub start_y: u32,
    pub end_x: u32,
    pub end_y: u32,
}

impl Rectangle {
    /// Create a rectangle from its corners.
    pub fn new(start_x: u32, start_y: u32, end_x: u32, end_y: u32) -> Self {
        Self {
            start_x,
            start_y,
            end_x,
            end_y,
        }
    }

    /// Rectangle covering a whole `width` x `height` image.
    pub fn full(width: u32, height: u32) -> Self {
        Self::new(0, 0, width, height)
    }

    pub fn width(&self) -> u32 {
        self.end_x.saturating_sub(self.start_x)
    }

    pub fn height(&self) -> u32 {
        self.end_y.saturating_sub(self.start_y)
    }

    /// Whether the rectangle covers no pixel or is inverted.
    pub fn is_empty(&self) -> bool {
        self.end_x <= self.start_x || self.end_y <= self.start_y
    }

    /// Whether the rectangle lies within a `width` x `height` image.
    pub fn fits_in(&self, width: u32, height: u32) -> bool {
        !self.is_empty() && self.end_x <= width && self.end_y <= height
    }

    /// Intersection of two rectangles.
    pub fn intersect(&self, other: &Rectangle) -> Option<Rectangle> {
        let r = Rectangle::new(
            self.start_x.max(other.start_x),
            self.start_y.max(other.start_y),
            self.end_x.min(other.end_x),
            self.end_y.min(other.end_y),
        );
        if r.is_empty() {
            None
        } else {
            Some(r)
        }
    }

    pub fn overlaps(&self, other: &Rectangle) -> bool {
        self.intersect(other).is_some()
    }
}

/// Feature point item.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable, Serialize, Deserialize)]
pub struct KeyPoint {
    pub x: i32,
    pub y: i32,
    pub strength: f32,
    pub scale: f32,
    pub orientation: f32,
    pub tracking_status: i32,
    pub error: f32,
}

/// 2D coordinate item.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Pod, Zeroable, Serialize, Deserialize)]
pub struct Coordinates2d {
    pub x: u32,
    pub y: u32,
}

/// 3D coordinate item.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Pod, Zeroable, Serialize, Deserialize)]
pub struct Coordinates3d {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

// ============================================================================
// Image formats
// ============================================================================

/// Image pixel format ("df_image" code).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DfImage {
    /// Unspecified; only valid for virtual images before verification.
    Virt,
    Rgb,
    Rgbx,
    Nv12,
    Nv21,
    Uyvy,
    Yuyv,
    Iyuv,
    Yuv4,
    U1,
    U8,
    U16,
    S16,
    U32,
    S32,
}

/// Storage shape of one plane of a format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaneShape {
    /// Horizontal subsampling factor.
    pub sub_x: u32,
    /// Vertical subsampling factor.
    pub sub_y: u32,
    /// Bytes per stored element; 0 for bit-packed planes.
    pub element_size: u32,
    /// Pixels covered by one stored element horizontally.
    pub pixels_per_element: u32,
}

impl DfImage {
    /// Number of planes.
    pub fn planes(self) -> usize {
        match self {
            DfImage::Virt => 0,
            DfImage::Nv12 | DfImage::Nv21 => 2,
            DfImage::Iyuv | DfImage::Yuv4 => 3,
            _ => 1,
        }
    }

    /// Number of channels.
    pub fn channels(self) -> usize {
        match self {
            DfImage::Virt => 0,
            DfImage::Rgbx => 4,
            DfImage::Rgb
            | DfImage::Nv12
            | DfImage::Nv21
            | DfImage::Uyvy
            | DfImage::Yuyv
            | DfImage::Iyuv
            | DfImage::Yuv4 => 3,
            _ => 1,
        }
    }

    /// Storage shape of `plane`, if the format has that plane.
    pub fn plane_shape(self, plane: usize) -> Option<PlaneShape> {
        if plane >= self.planes() {
            return None;
        }
        let full = |element_size| PlaneShape {
            sub_x: 1,
            sub_y: 1,
            element_size,
            pixels_per_element: 1,
        };
        let shape = match self {
            DfImage::Virt => return None,
            DfImage::Rgb => full(3),
            DfImage::Rgbx => full(4),
            DfImage::Uyvy | DfImage::Yuyv => full(2),
            DfImage::U1 => PlaneShape {
                sub_x: 1,
                sub_y: 1,
                element_size: 0,
                pixels_per_element: 8,
            },
            DfImage::U8 | DfImage::Yuv4 => full(1),
            DfImage::U16 | DfImage::S16 => full(2),
            DfImage::U32 | DfImage::S32 => full(4),
            DfImage::Nv12 | DfImage::Nv21 => {
                if plane == 0 {
                    full(1)
                } else {
                    PlaneShape {
                        sub_x: 2,
                        sub_y: 2,
                        element_size: 2,
                        pixels_per_element: 1,
                    }
                }
            }
            DfImage::Iyuv => {
                if plane == 0 {
                    full(1)
                } else {
                    PlaneShape {
                        sub_x: 2,
                        sub_y: 2,
                        element_size: 1,
                        pixels_per_element: 1,
                    }
                }
            }
        };
        Some(shape)
    }

    /// Whether an image of this format may have the given dimensions.
    pub fn supports_dimensions(self, width: u32, height: u32) -> bool {
        if width == 0 || height == 0 {
            return false;
        }
        match self {
            DfImage::Nv12 | DfImage::Nv21 | DfImage::Iyuv => width % 2 == 0 && height % 2 == 0,
            DfImage::Uyvy | DfImage::Yuyv => width % 2 == 0,
            _ => true,
        }
    }

    pub fn is_yuv(self) -> bool {
        matches!(
            self,
            DfImage::Nv12
                | DfImage::Nv21
                | DfImage::Uyvy
                | DfImage::Yuyv
                | DfImage::Iyuv
                | DfImage::Yuv4
        )
    }

    /// Four-character code of the format.
    pub fn fourcc(self) -> &'static str {
        match self {
            DfImage::Virt => "VIRT",
            DfImage::Rgb => "RGB2",
            DfImage::Rgbx => "RGBA",
            DfImage::Nv12 => "NV12",
            DfImage::Nv21 => "NV21",
            DfImage::Uyvy => "UYVY",
            DfImage::Yuyv => "YUYV",
            DfImage::Iyuv => "IYUV",
            DfImage::Yuv4 => "YUV4",
            DfImage::U1 => "U001",
            DfImage::U8 => "U008",
            DfImage::U16 => "U016",
            DfImage::S16 => "S016",
            DfImage::U32 => "U032",
            DfImage::S32 => "S032",
        }
    }
}

impl fmt::Display for DfImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.fourcc())
    }
}

/// Addressing of one image plane (or a patch of it) in a caller-visible buffer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchAddressing {
    /// Patch width in pixels.
    pub dim_x: u32,
    /// Patch height in pixels.
    pub dim_y: u32,
    /// Bytes between horizontally adjacent elements; 0 for bit-packed planes.
    pub stride_x: u32,
    /// Bits between horizontally adjacent pixels when `stride_x` is 0.
    pub stride_x_bits: u32,
    /// Bytes between rows.
    pub stride_y: u32,
    /// Horizontal subsampling.
    pub step_x: u32,
    /// Vertical subsampling.
    pub step_y: u32,
}

impl PatchAddressing {
    /// Byte offset of pixel `(x, y)` relative to the patch origin.
    pub fn offset(&self, x: u32, y: u32) -> usize {
        let row = (y / self.step_y.max(1)) as usize * self.stride_y as usize;
        if self.stride_x == 0 {
            row + (x as usize * self.stride_x_bits as usize) / 8
        } else {
            row + (x / self.step_x.max(1)) as usize * self.stride_x as usize
        }
    }

    /// Bytes needed to hold the patch.
    pub fn byte_len(&self) -> usize {
        let rows = self.dim_y.div_ceil(self.step_y.max(1)) as usize;
        rows * self.stride_y as usize
    }
}

/// Pixel channel selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    C0,
    C1,
    C2,
    C3,
    R,
    G,
    B,
    A,
    Y,
    U,
    V,
}

impl Channel {
    /// Interleaved byte index of this channel in an RGB/RGBX/YUV4-style pixel.
    pub fn index(self) -> usize {
        match self {
            Channel::C0 | Channel::R | Channel::Y => 0,
            Channel::C1 | Channel::G | Channel::U => 1,
            Channel::C2 | Channel::B | Channel::V => 2,
            Channel::C3 | Channel::A => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColorSpace {
    #[default]
    None,
    Bt601_525,
    Bt601_625,
    Bt709,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelRange {
    #[default]
    Full,
    Restricted,
}

// ============================================================================
// Pixel values and borders
// ============================================================================

/// A single pixel value, used for uniform images and constant borders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "format", content = "value", rename_all = "lowercase")]
pub enum PixelValue {
    U1(bool),
    U8(u8),
    U16(u16),
    S16(i16),
    U32(u32),
    S32(i32),
    Rgb([u8; 3]),
    Rgbx([u8; 4]),
    Yuv([u8; 3]),
}

impl Default for PixelValue {
    fn default() -> Self {
        PixelValue::U8(0)
    }
}

impl PixelValue {
    /// First channel as an 8-bit value (saturating).
    pub fn as_u8(&self) -> u8 {
        match *self {
            PixelValue::U1(b) => u8::from(b),
            PixelValue::U8(v) => v,
            PixelValue::U16(v) => v.min(255) as u8,
            PixelValue::S16(v) => v.clamp(0, 255) as u8,
            PixelValue::U32(v) => v.min(255) as u8,
            PixelValue::S32(v) => v.clamp(0, 255) as u8,
            PixelValue::Rgb(c) | PixelValue::Yuv(c) => c[0],
            PixelValue::Rgbx(c) => c[0],
        }
    }

    /// Bytes of one stored element of `plane` filled with this value.
    pub fn plane_element(&self, format: DfImage, plane: usize) -> VxResult<Vec<u8>> {
        let bytes = match (format, *self) {
            (DfImage::U1, PixelValue::U1(b)) => vec![if b { 0xFF } else { 0 }],
            (DfImage::U8, PixelValue::U8(v)) => vec![v],
            (DfImage::U16, PixelValue::U16(v)) => v.to_ne_bytes().to_vec(),
            (DfImage::S16, PixelValue::S16(v)) => v.to_ne_bytes().to_vec(),
            (DfImage::U32, PixelValue::U32(v)) => v.to_ne_bytes().to_vec(),
            (DfImage::S32, PixelValue::S32(v)) => v.to_ne_bytes().to_vec(),
            (DfImage::Rgb, PixelValue::Rgb(c)) => c.to_vec(),
            (DfImage::Rgbx, PixelValue::Rgbx(c)) => c.to_vec(),
            (DfImage::Yuv4 | DfImage::Iyuv, PixelValue::Yuv(c)) => vec![c[plane.min(2)]],
            (DfImage::Nv12, PixelValue::Yuv(c)) => {
                if plane == 0 {
                    vec![c[0]]
                } else {
                    vec![c[1], c[2]]
                }
            }
            (DfImage::Nv21, PixelValue::Yuv(c)) => {
                if plane == 0 {
                    vec![c[0]]
                } else {
                    vec![c[2], c[1]]
                }
            }
            (DfImage::Uyvy, PixelValue::Yuv(c)) => vec![c[1], c[0], c[2], c[0]],
            (DfImage::Yuyv, PixelValue::Yuv(c)) => vec![c[0], c[1], c[0], c[2]],
            _ => return Err(VxError::InvalidFormat),
        };
        Ok(bytes)
    }
}

/// How kernels treat pixels outside the image.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BorderMode {
    /// Out-of-image reads are unspecified; kernels shrink the valid region.
    #[default]
    Undefined,
    /// Out-of-image reads return a constant.
    Constant,
    /// Out-of-image reads return the nearest edge pixel.
    Replicate,
}

/// Border policy of a node or kernel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Border {
    pub mode: BorderMode,
    pub constant: PixelValue,
}

impl Border {
    pub fn undefined() -> Self {
        Self::default()
    }

    pub fn constant(value: PixelValue) -> Self {
        Self {
            mode: BorderMode::Constant,
            constant: value,
        }
    }

    pub fn replicate() -> Self {
        Self {
            mode: BorderMode::Replicate,
            constant: PixelValue::default(),
        }
    }
}

// ============================================================================
// Kernel signature and access enums
// ============================================================================

/// Direction of a kernel parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Input,
    Output,
    Bidirectional,
}

impl Direction {
    /// Whether the node writes to a parameter with this direction.
    pub fn writes(self) -> bool {
        matches!(self, Direction::Output | Direction::Bidirectional)
    }
}

/// Whether a kernel parameter must be set before verification.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterState {
    #[default]
    Required,
    Optional,
}

/// Host access mode for copy/map operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Usage {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

impl Usage {
    pub fn reads(self) -> bool {
        matches!(self, Usage::ReadOnly | Usage::ReadWrite)
    }

    pub fn writes(self) -> bool {
        matches!(self, Usage::WriteOnly | Usage::ReadWrite)
    }
}

/// Graph lifecycle state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GraphState {
    #[default]
    Unverified,
    Verifying,
    Verified,
    Running,
    Completed,
    Abandoned,
}

/// What a node completion callback asks the engine to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Action {
    Continue,
    Abandon,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdType {
    Binary,
    Range,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatrixPattern {
    Box,
    Cross,
    Disk,
    Other,
}

/// Pyramid scale between consecutive levels.
pub const SCALE_PYRAMID_HALF: f32 = 0.5;
/// Pyramid scale used by ORB feature pyramids: 2^(-1/4).
pub const SCALE_PYRAMID_ORB: f32 = 0.840_896_4;

// ============================================================================
// Scalar values
// ============================================================================

/// Typed value of a scalar object.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ScalarValue {
    Char(u8),
    Int8(i8),
    UInt8(u8),
    Int16(i16),
    UInt16(u16),
    Int32(i32),
    UInt32(u32),
    Int64(i64),
    UInt64(u64),
    Float32(f32),
    Float64(f64),
    Enum(i32),
    Size(usize),
    Bool(bool),
    DfImage(DfImage),
}

impl ScalarValue {
    /// Item type of this value.
    pub fn data_type(&self) -> DataType {
        match self {
            ScalarValue::Char(_) => DataType::Char,
            ScalarValue::Int8(_) => DataType::Int8,
            ScalarValue::UInt8(_) => DataType::UInt8,
            ScalarValue::Int16(_) => DataType::Int16,
            ScalarValue::UInt16(_) => DataType::UInt16,
            ScalarValue::Int32(_) => DataType::Int32,
            ScalarValue::UInt32(_) => DataType::UInt32,
            ScalarValue::Int64(_) => DataType::Int64,
            ScalarValue::UInt64(_) => DataType::UInt64,
            ScalarValue::Float32(_) => DataType::Float32,
            ScalarValue::Float64(_) => DataType::Float64,
            ScalarValue::Enum(_) => DataType::Enum,
            ScalarValue::Size(_) => DataType::Size,
            ScalarValue::Bool(_) => DataType::Bool,
            ScalarValue::DfImage(_) => DataType::DfImage,
        }
    }

    /// Zero value of a scalar type.
    pub fn zero(data_type: DataType) -> VxResult<Self> {
        let v = match data_type {
            DataType::Char => ScalarValue::Char(0),
            DataType::Int8 => ScalarValue::Int8(0),
            DataType::UInt8 => ScalarValue::UInt8(0),
            DataType::Int16 => ScalarValue::Int16(0),
            DataType::UInt16 => ScalarValue::UInt16(0),
            DataType::Int32 => ScalarValue::Int32(0),
            DataType::UInt32 => ScalarValue::UInt32(0),
            DataType::Int64 => ScalarValue::Int64(0),
            DataType::UInt64 => ScalarValue::UInt64(0),
            DataType::Float32 => ScalarValue::Float32(0.0),
            DataType::Float64 => ScalarValue::Float64(0.0),
            DataType::Enum => ScalarValue::Enum(0),
            DataType::Size => ScalarValue::Size(0),
            DataType::Bool => ScalarValue::Bool(false),
            DataType::DfImage => ScalarValue::DfImage(DfImage::Virt),
            _ => return Err(VxError::InvalidType),
        };
        Ok(v)
    }

    /// Value widened to `i64`, for kernels that read integer scalars.
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            ScalarValue::Char(v) | ScalarValue::UInt8(v) => Some(i64::from(v)),
            ScalarValue::Int8(v) => Some(i64::from(v)),
            ScalarValue::Int16(v) => Some(i64::from(v)),
            ScalarValue::UInt16(v) => Some(i64::from(v)),
            ScalarValue::Int32(v) | ScalarValue::Enum(v) => Some(i64::from(v)),
            ScalarValue::UInt32(v) => Some(i64::from(v)),
            ScalarValue::Int64(v) => Some(v),
            ScalarValue::UInt64(v) => i64::try_from(v).ok(),
            ScalarValue::Size(v) => i64::try_from(v).ok(),
            ScalarValue::Bool(v) => Some(i64::from(v)),
            ScalarValue::Float32(_) | ScalarValue::Float64(_) | ScalarValue::DfImage(_) => None,
        }
    }

    /// Value as `f64`, for kernels that read numeric scalars.
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            ScalarValue::Float32(v) => Some(f64::from(v)),
            ScalarValue::Float64(v) => Some(v),
            _ => self.as_i64().map(|v| v as f64),
        }
    }

    /// Native-endian bytes of the value.
    pub fn to_bytes(&self) -> Vec<u8> {
        match *self {
            ScalarValue::Char(v) | ScalarValue::UInt8(v) => vec![v],
            ScalarValue::Int8(v) => v.to_ne_bytes().to_vec(),
            ScalarValue::Int16(v) => v.to_ne_bytes().to_vec(),
            ScalarValue::UInt16(v) => v.to_ne_bytes().to_vec(),
            ScalarValue::Int32(v) | ScalarValue::Enum(v) => v.to_ne_bytes().to_vec(),
            ScalarValue::UInt32(v) => v.to_ne_bytes().to_vec(),
            ScalarValue::Int64(v) => v.to_ne_bytes().to_vec(),
            ScalarValue::UInt64(v) => v.to_ne_bytes().to_vec(),
            ScalarValue::Float32(v) => v.to_ne_bytes().to_vec(),
            ScalarValue::Float64(v) => v.to_ne_bytes().to_vec(),
            ScalarValue::Size(v) => v.to_ne_bytes().to_vec(),
            ScalarValue::Bool(v) => vec![u8::from(v)],
            ScalarValue::DfImage(f) => (dfimage_index(f) as u32).to_ne_bytes().to_vec(),
        }
    }

    /// Decode a value of `data_type` from native-endian bytes.
    pub fn from_bytes(data_type: DataType, bytes: &[u8]) -> VxResult<Self> {
        let size = data_type.fixed_size().ok_or(VxError::InvalidType)?;
        if bytes.len() < size {
            return Err(VxError::InvalidParameters);
        }
        let b = &bytes[..size];
        let arr = |n: usize| -> [u8; 8] {
            let mut out = [0u8; 8];
            out[..n].copy_from_slice(&b[..n]);
            out
        };
        let v = match data_type {
            DataType::Char => ScalarValue::Char(b[0]),
            DataType::Int8 => ScalarValue::Int8(b[0] as i8),
            DataType::UInt8 => ScalarValue::UInt8(b[0]),
            DataType::Bool => ScalarValue::Bool(b[0] != 0),
            DataType::Int16 => ScalarValue::Int16(i16::from_ne_bytes([b[0], b[1]])),
            DataType::UInt16 => ScalarValue::UInt16(u16::from_ne_bytes([b[0], b[1]])),
            DataType::Int32 => ScalarValue::Int32(i32::from_ne_bytes([b[0], b[1], b[2], b[3]])),
            DataType::Enum => ScalarValue::Enum(i32::from_ne_bytes([b[0], b[1], b[2], b[3]])),
            DataType::UInt32 => ScalarValue::UInt32(u32::from_ne_bytes([b[0], b[1], b[2], b[3]])),
            DataType::Float32 => ScalarValue::Float32(f32::from_ne_bytes([b[0], b[1], b[2], b[3]])),
            DataType::Int64 => ScalarValue::Int64(i64::from_ne_bytes(arr(8))),
            DataType::UInt64 => ScalarValue::UInt64(u64::from_ne_bytes(arr(8))),
            DataType::Float64 => ScalarValue::Float64(f64::from_ne_bytes(arr(8))),
            DataType::Size => {
                let mut raw = [0u8; std::mem::size_of::<usize>()];
                raw.copy_from_slice(b);
                ScalarValue::Size(usize::from_ne_bytes(raw))
            }
            DataType::DfImage => {
                let idx = u32::from_ne_bytes([b[0], b[1], b[2], b[3]]) as usize;
                ScalarValue::DfImage(*DFIMAGE_ORDER.get(idx).ok_or(VxError::InvalidValue)?)
            }
            _ => return Err(VxError::InvalidType),
        };
        Ok(v)
    }
}

const DFIMAGE_ORDER: [DfImage; 15] = [
    DfImage::Virt,
    DfImage::Rgb,
    DfImage::Rgbx,
    DfImage::Nv12,
    DfImage::Nv21,
    DfImage::Uyvy,
    DfImage::Yuyv,
    DfImage::Iyuv,
    DfImage::Yuv4,
    DfImage::U1,
    DfImage::U8,
    DfImage::U16,
    DfImage::S16,
    DfImage::U32,
    DfImage::S32,
];

fn dfimage_index(format: DfImage) -> usize {
    DFIMAGE_ORDER
        .iter()
        .position(|f| *f == format)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_wildcard_accepts_data_objects() {
        assert!(ObjectType::Reference.accepts(ObjectType::Image));
        assert!(ObjectType::Reference.accepts(ObjectType::Tensor));
        assert!(!ObjectType::Reference.accepts(ObjectType::Graph));
        assert!(!ObjectType::Image.accepts(ObjectType::Array));
    }

    #[test]
    fn test_plane_shapes() {
        assert_eq!(DfImage::Iyuv.planes(), 3);
        let uv = DfImage::Nv12.plane_shape(1).unwrap();
        assert_eq!((uv.sub_x, uv.sub_y, uv.element_size), (2, 2, 2));
        assert!(DfImage::U8.plane_shape(1).is_none());
        assert!(!DfImage::Nv12.supports_dimensions(3, 4));
        assert!(DfImage::U8.supports_dimensions(3, 5));
    }

    #[test]
    fn test_rectangle_ops() {
        let a = Rectangle::new(0, 0, 10, 10);
        let b = Rectangle::new(5, 5, 20, 20);
        assert_eq!(a.intersect(&b), Some(Rectangle::new(5, 5, 10, 10)));
        assert!(!a.overlaps(&Rectangle::new(10, 0, 12, 4)));
        assert!(a.fits_in(10, 10));
        assert!(!b.fits_in(10, 10));
    }

    #[test]
    fn test_addressing_offsets() {
        let addr = PatchAddressing {
            dim_x: 16,
            dim_y: 4,
            stride_x: 0,
            stride_x_bits: 1,
            stride_y: 2,
            step_x: 1,
            step_y: 1,
        };
        assert_eq!(addr.offset(9, 1), 3);
        assert_eq!(addr.byte_len(), 8);
    }

    #[test]
    fn test_scalar_bytes_round_trip() {
        let values = [
            ScalarValue::Int16(-7),
            ScalarValue::Float64(2.5),
            ScalarValue::Size(42),
            ScalarValue::DfImage(DfImage::Nv21),
        ];
        for v in values {
            let back = ScalarValue::from_bytes(v.data_type(), &v.to_bytes()).unwrap();
            assert_eq!(back, v);
        }
        assert_eq!(
            ScalarValue::from_bytes(DataType::Int32, &[1, 2]),
            Err(VxError::InvalidParameters)
        );
    }
}
