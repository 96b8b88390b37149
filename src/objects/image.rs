//! Images: planar storage, ROIs, uniform images and host patch access.

use crate::core::context::Context;
use crate::core::error::{VxError, VxResult};
use crate::core::memory::{MapGuard, MapLayout, SharedBuffer};
use crate::core::meta::MetaInfo;
use crate::core::reference::{AsHandle, Creation, Graph, Handle, Image, ObjectData, Payload, RefType};
use crate::core::types::{
    ChannelRange, ColorSpace, DfImage, ObjectType, PatchAddressing, PixelValue, PlaneShape, Rectangle,
    Usage,
};
use serde::{Deserialize, Serialize};

/// One plane of image storage.
#[derive(Clone)]
pub struct Plane {
    pub buffer: SharedBuffer,
    /// Byte offset of the image origin in `buffer`.
    pub offset: usize,
    pub stride_y: usize,
    pub shape: PlaneShape,
}

impl Plane {
    /// Addressing of a `width` x `height` region of this plane.
    pub fn addressing(&self, width: u32, height: u32) -> PatchAddressing {
        PatchAddressing {
            dim_x: width,
            dim_y: height,
            stride_x: self.shape.element_size,
            stride_x_bits: if self.shape.element_size == 0 {
                1
            } else {
                self.shape.element_size * 8
            },
            stride_y: self.stride_y as u32,
            step_x: self.shape.sub_x,
            step_y: self.shape.sub_y,
        }
    }
}

/// Payload of an image object.
pub struct ImageData {
    pub width: u32,
    pub height: u32,
    pub format: DfImage,
    pub space: ColorSpace,
    pub range: ChannelRange,
    pub planes: Vec<Plane>,
    pub valid: Rectangle,
    pub uniform: Option<PixelValue>,
    /// Image this one is a region of.
    pub parent: Option<Handle>,
    /// Outermost image owning the storage, and this image's rectangle in it.
    pub root: Option<(Handle, Rectangle)>,
    /// Pyramid or object array this image is an element of. Holds no count.
    pub owner: Option<Handle>,
    allocated: usize,
}

impl ImageData {
    fn new(width: u32, height: u32, format: DfImage) -> Self {
        Self {
            width,
            height,
            format,
            space: if format.is_yuv() {
                ColorSpace::Bt709
            } else {
                ColorSpace::None
            },
            range: ChannelRange::Full,
            planes: Vec::new(),
            valid: Rectangle::full(width, height),
            uniform: None,
            parent: None,
            root: None,
            owner: None,
            allocated: 0,
        }
    }

    pub fn is_allocated(&self) -> bool {
        !self.planes.is_empty()
    }

    /// Bytes of storage for one plane of a `width` x `height` image.
    fn plane_layout(format: DfImage, plane: usize, width: u32, height: u32) -> Option<(PlaneShape, usize, usize)> {
        let shape = format.plane_shape(plane)?;
        let cols = width.div_ceil(shape.sub_x) as usize;
        let stride_y = if shape.element_size == 0 {
            cols.div_ceil(8)
        } else {
            cols * shape.element_size as usize
        };
        let rows = height.div_ceil(shape.sub_y) as usize;
        Some((shape, stride_y, rows))
    }

    /// Total storage bytes of a freshly allocated image.
    pub fn storage_size(format: DfImage, width: u32, height: u32) -> usize {
        (0..format.planes())
            .filter_map(|p| Self::plane_layout(format, p, width, height))
            .map(|(_, stride, rows)| stride * rows)
            .sum()
    }

    /// Check `rect`/`plane` against this image for host access.
    fn check_patch(&self, rect: &Rectangle, plane: usize) -> VxResult<&Plane> {
        if !rect.fits_in(self.width, self.height) {
            return Err(VxError::InvalidParameters);
        }
        let p = self.planes.get(plane).ok_or(VxError::InvalidParameters)?;
        if rect.start_x % p.shape.sub_x != 0 || rect.start_y % p.shape.sub_y != 0 {
            return Err(VxError::InvalidParameters);
        }
        Ok(p)
    }

    pub(crate) fn conform(&mut self, meta: &MetaInfo, is_virtual: bool) -> VxResult<()> {
        let MetaInfo::Image { width, height, format } = *meta else {
            return Err(VxError::InvalidType);
        };
        if is_virtual {
            if self.format != DfImage::Virt && self.format != format {
                return Err(VxError::InvalidFormat);
            }
            if (self.width != 0 && self.width != width) || (self.height != 0 && self.height != height) {
                return Err(VxError::InvalidDimension);
            }
            if format == DfImage::Virt || !format.supports_dimensions(width, height) {
                return Err(VxError::InvalidFormat);
            }
            if self.is_allocated() && (self.width, self.height, self.format) != (width, height, format) {
                return Err(VxError::InvalidDimension);
            }
            self.width = width;
            self.height = height;
            self.format = format;
            if self.valid.is_empty() {
                self.valid = Rectangle::full(width, height);
            }
            Ok(())
        } else {
            if self.width != width || self.height != height {
                return Err(VxError::InvalidDimension);
            }
            if self.format != format {
                return Err(VxError::InvalidFormat);
            }
            Ok(())
        }
    }
}

impl Payload for ImageData {
    fn project(data: &mut ObjectData) -> Option<&mut Self> {
        match data {
            ObjectData::Image(d) => Some(d),
            _ => None,
        }
    }

    fn children(&self) -> Vec<Handle> {
        self.parent.into_iter().collect()
    }

    fn storage_bytes(&self) -> usize {
        self.allocated
    }
}

/// Attributes returned by [`Context::query_image`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageInfo {
    pub width: u32,
    pub height: u32,
    pub format: DfImage,
    pub planes: usize,
    pub space: ColorSpace,
    pub range: ChannelRange,
    /// Bytes of storage, 0 while unallocated.
    pub size: usize,
    pub is_uniform: bool,
    pub is_roi: bool,
}

fn copy_rows(
    src: &[u8],
    src_offset: usize,
    src_stride: usize,
    dst: &mut [u8],
    dst_offset: usize,
    dst_stride: usize,
    row_bytes: usize,
    rows: usize,
) -> VxResult<()> {
    for r in 0..rows {
        let s = src_offset + r * src_stride;
        let d = dst_offset + r * dst_stride;
        let src_row = src.get(s..s + row_bytes).ok_or(VxError::InvalidParameters)?;
        dst.get_mut(d..d + row_bytes)
            .ok_or(VxError::InvalidParameters)?
            .copy_from_slice(src_row);
    }
    Ok(())
}

fn get_bit(bytes: &[u8], bit: usize) -> bool {
    bytes[bit / 8] & (1 << (bit % 8)) != 0
}

fn set_bit(bytes: &mut [u8], bit: usize, value: bool) {
    if value {
        bytes[bit / 8] |= 1 << (bit % 8);
    } else {
        bytes[bit / 8] &= !(1 << (bit % 8));
    }
}

/// Row bytes of a patch `width` pixels wide in a plane.
fn patch_row_bytes(shape: &PlaneShape, width: u32) -> usize {
    if shape.element_size == 0 {
        (width as usize).div_ceil(8)
    } else {
        width.div_ceil(shape.sub_x) as usize * shape.element_size as usize
    }
}

impl Context {
    fn image_data<R>(&self, image: Image, f: impl FnOnce(&mut ImageData) -> VxResult<R>) -> VxResult<R> {
        self.with_payload::<ImageData, R>(image.handle(), f)
    }

    /// Create an image and allocate its storage.
    pub fn create_image(&self, width: u32, height: u32, format: DfImage) -> VxResult<Image> {
        if format == DfImage::Virt {
            return Err(VxError::InvalidFormat);
        }
        if !format.supports_dimensions(width, height) {
            return Err(VxError::InvalidDimension);
        }
        let data = ImageData::new(width, height, format);
        let handle = self.create_reference(Creation::external(ObjectType::Image), ObjectData::Image(data))?;
        let image = Image(handle);
        if let Err(e) = self.allocate_image(image) {
            let _ = self.release(image);
            return Err(e);
        }
        Ok(image)
    }

    /// Create a graph-scoped image whose size and format may be left for verification to infer.
    ///
    /// `width`/`height` of 0 and [`DfImage::Virt`] mean "unspecified".
    pub fn create_virtual_image(&self, graph: Graph, width: u32, height: u32, format: DfImage) -> VxResult<Image> {
        self.object_of(graph.handle(), ObjectType::Graph)?;
        if format != DfImage::Virt && width != 0 && height != 0 && !format.supports_dimensions(width, height) {
            return Err(VxError::InvalidDimension);
        }
        let data = ImageData::new(width, height, format);
        let handle = self.create_reference(
            Creation::virtual_in(ObjectType::Image, graph.handle()),
            ObjectData::Image(data),
        )?;
        Ok(Image(handle))
    }

    /// Create a read-only image with every pixel set to `value`.
    pub fn create_uniform_image(&self, width: u32, height: u32, format: DfImage, value: PixelValue) -> VxResult<Image> {
        let image = self.create_image(width, height, format)?;
        let fill = (|| -> VxResult<()> {
            let planes = self.image_data(image, |d| Ok(d.planes.clone()))?;
            for (p, plane) in planes.iter().enumerate() {
                let element = value.plane_element(format, p)?;
                let mut guard = self.lock(&plane.buffer, Usage::WriteOnly)?;
                let bytes = guard.bytes_mut()?;
                for chunk in bytes.chunks_mut(element.len()) {
                    let n = chunk.len();
                    chunk.copy_from_slice(&element[..n]);
                }
            }
            self.image_data(image, |d| {
                d.uniform = Some(value);
                Ok(())
            })
        })();
        if let Err(e) = fill {
            let _ = self.release(image);
            return Err(e);
        }
        Ok(image)
    }

    /// Create an image viewing `rect` of `parent`, sharing its storage.
    pub fn create_image_from_roi(&self, parent: Image, rect: Rectangle) -> VxResult<Image> {
        self.object_of(parent.handle(), ObjectType::Image)?;
        if self.with_header(parent.handle(), |h| h.is_virtual)? {
            return Err(VxError::InvalidParameters);
        }
        self.allocate_image(parent)?;
        let (data, root) = self.image_data(parent, |p| {
            if !rect.fits_in(p.width, p.height) {
                return Err(VxError::InvalidParameters);
            }
            let mut planes = Vec::with_capacity(p.planes.len());
            for plane in &p.planes {
                let shape = plane.shape;
                if rect.start_x % shape.sub_x != 0
                    || rect.start_y % shape.sub_y != 0
                    || (shape.element_size == 0 && rect.start_x % 8 != 0)
                {
                    return Err(VxError::InvalidParameters);
                }
                let addr = plane.addressing(p.width, p.height);
                let mut roi = plane.clone();
                roi.offset += addr.offset(rect.start_x, rect.start_y);
                planes.push(roi);
            }
            let mut data = ImageData::new(rect.width(), rect.height(), p.format);
            data.space = p.space;
            data.range = p.range;
            data.planes = planes;
            data.uniform = p.uniform;
            data.parent = Some(parent.handle());
            let valid = p
                .valid
                .intersect(&rect)
                .map(|v| Rectangle::new(v.start_x - rect.start_x, v.start_y - rect.start_y, v.end_x - rect.start_x, v.end_y - rect.start_y))
                .unwrap_or_default();
            data.valid = valid;
            let root = match p.root {
                Some((root, r)) => (
                    root,
                    Rectangle::new(
                        r.start_x + rect.start_x,
                        r.start_y + rect.start_y,
                        r.start_x + rect.end_x,
                        r.start_y + rect.end_y,
                    ),
                ),
                None => (parent.handle(), rect),
            };
            data.root = Some(root);
            Ok((data, root))
        })?;
        self.increment(parent.handle(), RefType::Internal)?;
        match self.create_reference(Creation::external(ObjectType::Image), ObjectData::Image(data)) {
            Ok(h) => {
                log::trace!("roi {:?} of {} (root {})", rect, parent, root.0);
                Ok(Image(h))
            }
            Err(e) => {
                let _ = self.decrement(parent.handle(), RefType::Internal);
                Err(e)
            }
        }
    }

    /// Allocate storage for an image if it has none yet. Idempotent.
    pub(crate) fn allocate_image(&self, image: Image) -> VxResult<()> {
        let object = self.object_of(image.handle(), ObjectType::Image)?;
        let mut data = object.data.lock();
        let d = ImageData::project(&mut data).ok_or(VxError::InvalidReference)?;
        if d.is_allocated() {
            return Ok(());
        }
        if d.format == DfImage::Virt || d.width == 0 || d.height == 0 {
            return Err(VxError::NotAllocated);
        }
        let mut planes = Vec::with_capacity(d.format.planes());
        let mut total = 0;
        for p in 0..d.format.planes() {
            let (shape, stride_y, rows) =
                ImageData::plane_layout(d.format, p, d.width, d.height).ok_or(VxError::InvalidFormat)?;
            let len = stride_y * rows;
            let buffer = match self.allocate_buffer(len) {
                Ok(b) => b,
                Err(e) => {
                    self.inner.memory.release(total);
                    return Err(e);
                }
            };
            total += len;
            planes.push(Plane {
                buffer,
                offset: 0,
                stride_y,
                shape,
            });
        }
        d.planes = planes;
        d.allocated = total;
        log::trace!("allocated {} bytes for {}x{} {} image {}", total, d.width, d.height, d.format, image);
        Ok(())
    }

    pub fn query_image(&self, image: Image) -> VxResult<ImageInfo> {
        self.image_data(image, |d| {
            Ok(ImageInfo {
                width: d.width,
                height: d.height,
                format: d.format,
                planes: d.format.planes(),
                space: d.space,
                range: d.range,
                size: if d.is_allocated() {
                    ImageData::storage_size(d.format, d.width, d.height)
                } else {
                    0
                },
                is_uniform: d.uniform.is_some(),
                is_roi: d.parent.is_some(),
            })
        })
    }

    /// Addressing of a whole plane of an allocated image.
    pub fn image_plane_addressing(&self, image: Image, plane: usize) -> VxResult<PatchAddressing> {
        self.image_data(image, |d| {
            let p = d.planes.get(plane).ok_or(VxError::InvalidParameters)?;
            Ok(p.addressing(d.width, d.height))
        })
    }

    pub fn set_image_color_space(&self, image: Image, space: ColorSpace) -> VxResult<()> {
        self.image_data(image, |d| {
            if !d.format.is_yuv() && space != ColorSpace::None {
                return Err(VxError::NotSupported);
            }
            d.space = space;
            Ok(())
        })
    }

    pub fn set_image_channel_range(&self, image: Image, range: ChannelRange) -> VxResult<()> {
        self.image_data(image, |d| {
            d.range = range;
            Ok(())
        })
    }

    /// Region of the image holding defined pixels.
    pub fn get_valid_region(&self, image: Image) -> VxResult<Rectangle> {
        self.image_data(image, |d| Ok(d.valid))
    }

    /// Set the valid region; `None` resets it to the whole image.
    pub fn set_image_valid_rectangle(&self, image: Image, rect: Option<Rectangle>) -> VxResult<()> {
        self.image_data(image, |d| {
            let rect = rect.unwrap_or_else(|| Rectangle::full(d.width, d.height));
            if rect.end_x > d.width || rect.end_y > d.height || rect.start_x > rect.end_x || rect.start_y > rect.end_y {
                return Err(VxError::InvalidParameters);
            }
            d.valid = rect;
            Ok(())
        })
    }

    fn image_patch_source(&self, image: Image, rect: &Rectangle, plane: usize, usage: Usage) -> VxResult<Plane> {
        self.check_accessible(image.handle())?;
        self.allocate_image(image)?;
        self.image_data(image, |d| {
            if usage.writes() && d.uniform.is_some() {
                return Err(VxError::NotSupported);
            }
            d.check_patch(rect, plane).cloned()
        })
    }

    /// Copy a patch of one plane into `buffer`, rows `stride_y` bytes apart.
    pub fn read_image_patch(&self, image: Image, rect: Rectangle, plane: usize, stride_y: usize, buffer: &mut [u8]) -> VxResult<()> {
        let p = self.image_patch_source(image, &rect, plane, Usage::ReadOnly)?;
        let row_bytes = patch_row_bytes(&p.shape, rect.width());
        let rows = rect.height().div_ceil(p.shape.sub_y) as usize;
        if stride_y < row_bytes || buffer.len() < stride_y * (rows - 1) + row_bytes {
            return Err(VxError::InvalidParameters);
        }
        let addr = p.addressing(rect.width(), rect.height());
        let guard = self.lock(&p.buffer, Usage::ReadOnly)?;
        let src = guard.bytes();
        if p.shape.element_size == 0 && rect.start_x % 8 != 0 {
            for y in 0..rows {
                let row = p.offset + (rect.start_y as usize + y) * p.stride_y;
                for x in 0..rect.width() as usize {
                    let bit = get_bit(&src[row..], rect.start_x as usize + x);
                    set_bit(&mut buffer[y * stride_y..], x, bit);
                }
            }
        } else {
            let start = p.offset + addr.offset(rect.start_x, rect.start_y);
            copy_rows(src, start, p.stride_y, buffer, 0, stride_y, row_bytes, rows)?;
        }
        drop(guard);
        self.read(image.handle());
        Ok(())
    }

    /// Copy `buffer` (rows `stride_y` bytes apart) into a patch of one plane.
    pub fn write_image_patch(&self, image: Image, rect: Rectangle, plane: usize, stride_y: usize, buffer: &[u8]) -> VxResult<()> {
        let p = self.image_patch_source(image, &rect, plane, Usage::WriteOnly)?;
        let row_bytes = patch_row_bytes(&p.shape, rect.width());
        let rows = rect.height().div_ceil(p.shape.sub_y) as usize;
        if stride_y < row_bytes || buffer.len() < stride_y * (rows - 1) + row_bytes {
            return Err(VxError::InvalidParameters);
        }
        let addr = p.addressing(rect.width(), rect.height());
        let mut guard = self.lock(&p.buffer, Usage::WriteOnly)?;
        let dst = guard.bytes_mut()?;
        if p.shape.element_size == 0 && (rect.start_x % 8 != 0 || rect.width() % 8 != 0) {
            for y in 0..rows {
                let row = p.offset + (rect.start_y as usize + y) * p.stride_y;
                for x in 0..rect.width() as usize {
                    let bit = get_bit(&buffer[y * stride_y..], x);
                    set_bit(&mut dst[row..], rect.start_x as usize + x, bit);
                }
            }
        } else {
            let start = p.offset + addr.offset(rect.start_x, rect.start_y);
            copy_rows(buffer, 0, stride_y, dst, start, p.stride_y, row_bytes, rows)?;
        }
        drop(guard);
        self.image_wrote(image);
        Ok(())
    }

    /// Read or write a patch depending on `usage`.
    ///
    /// Read-write is not a valid copy usage and fails with `InvalidParameters`.
    pub fn copy_image_patch(&self, image: Image, rect: Rectangle, plane: usize, stride_y: usize, buffer: &mut [u8], usage: Usage) -> VxResult<()> {
        match usage {
            Usage::ReadOnly => self.read_image_patch(image, rect, plane, stride_y, buffer),
            Usage::WriteOnly => self.write_image_patch(image, rect, plane, stride_y, buffer),
            Usage::ReadWrite => Err(VxError::InvalidParameters),
        }
    }

    /// Whole plane, tightly packed.
    pub fn read_image_plane(&self, image: Image, plane: usize) -> VxResult<Vec<u8>> {
        self.check_accessible(image.handle())?;
        let (rect, shape) = self.image_data(image, |d| {
            let shape = d.format.plane_shape(plane).ok_or(VxError::InvalidParameters)?;
            Ok((Rectangle::full(d.width, d.height), shape))
        })?;
        let stride = patch_row_bytes(&shape, rect.width());
        let mut out = vec![0u8; stride * rect.height().div_ceil(shape.sub_y) as usize];
        self.read_image_patch(image, rect, plane, stride, &mut out)?;
        Ok(out)
    }

    /// Overwrite a whole plane from tightly packed bytes.
    pub fn write_image_plane(&self, image: Image, plane: usize, bytes: &[u8]) -> VxResult<()> {
        self.check_accessible(image.handle())?;
        let (rect, shape) = self.image_data(image, |d| {
            let shape = d.format.plane_shape(plane).ok_or(VxError::InvalidParameters)?;
            Ok((Rectangle::full(d.width, d.height), shape))
        })?;
        let stride = patch_row_bytes(&shape, rect.width());
        self.write_image_patch(image, rect, plane, stride, bytes)
    }

    /// Zero-copy view of a patch of one plane.
    pub fn map_image_patch(&self, image: Image, rect: Rectangle, plane: usize, usage: Usage) -> VxResult<MapGuard> {
        let p = self.image_patch_source(image, &rect, plane, usage)?;
        let addr = p.addressing(rect.width(), rect.height());
        let start = p.offset + addr.offset(rect.start_x, rect.start_y);
        let rows = rect.height().div_ceil(p.shape.sub_y) as usize;
        let len = p.stride_y * (rows - 1) + patch_row_bytes(&p.shape, rect.width());
        let guard = self.lock(&p.buffer, usage)?;
        self.register_map(image.handle(), usage, guard, start, len, MapLayout::Image(addr))
    }

    pub fn unmap_image_patch(&self, image: Image, map: MapGuard) -> VxResult<()> {
        self.object_of(image.handle(), ObjectType::Image)?;
        let writes = map.usage().writes();
        self.finish_map(image.handle(), map)?;
        if writes {
            self.image_ancestors_wrote(image);
        }
        Ok(())
    }

    fn image_wrote(&self, image: Image) {
        self.wrote(image.handle());
        self.image_ancestors_wrote(image);
    }

    fn image_ancestors_wrote(&self, image: Image) {
        let mut current = self.image_data(image, |d| Ok(d.parent)).ok().flatten();
        while let Some(parent) = current {
            self.wrote(parent);
            current = self.image_data(Image(parent), |d| Ok(d.parent)).ok().flatten();
        }
    }

    /// Storage root and rectangle of an image, for overlap checks.
    pub(crate) fn image_extent(&self, image: Image) -> VxResult<(Handle, Rectangle)> {
        self.image_data(image, |d| {
            Ok(d.root.unwrap_or((image.handle(), Rectangle::full(d.width, d.height))))
        })
    }

    pub(crate) fn image_meta(&self, image: Image) -> VxResult<MetaInfo> {
        self.image_data(image, |d| {
            Ok(MetaInfo::Image {
                width: d.width,
                height: d.height,
                format: d.format,
            })
        })
    }
}
