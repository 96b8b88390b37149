//! Tiling execution engine.
//!
//! A tiling kernel is written against one tile of its output rather than whole images.
//! The engine stages every parameter into a [`TileParam`], walks the output image in
//! blocks of the kernel's declared size and calls:
//! - the **fast** function for full blocks whose neighborhood lies inside the image
//! - the **flexible** function for edge blocks and the right/bottom remainder strips
//!
//! The flexible function reads through the border-aware accessors of [`ImageTile`], so
//! kernel authors get `Undefined`, `Constant` and `Replicate` borders for free. After the
//! last tile the engine commits image, scalar, array, distribution and tensor outputs
//! back into their objects.

use crate::core::config::TARGET_TILING;
use crate::core::context::Context;
use crate::core::error::{StatusFold, VxError, VxResult};
use crate::core::reference::{
    Array, Convolution, Distribution, Handle, Image, Lut, Matrix, Remap, Scalar, Tensor, Threshold,
};
use crate::core::types::{
    Border, BorderMode, ChannelRange, ColorSpace, DfImage, Direction, ObjectType, PatchAddressing, PixelValue,
    Rectangle, ScalarValue, Usage,
};
use crate::objects::array::ArrayInfo;
use crate::objects::distribution::DistributionInfo;
use crate::objects::lut::LutInfo;
use crate::objects::matrix::MatrixInfo;
use crate::objects::tensor::TensorInfo;
use crate::objects::threshold::ThresholdData;
use crate::target::kernel::{KernelBody, KernelAttributes, Neighborhood, ParamSpec};
use crate::target::{Invocation, TargetBackend};
use std::sync::Arc;

/// Tile function: `(parameters, tile_memory)`.
pub type TileFn = Arc<dyn Fn(&mut [TileParam], &mut [u8]) -> VxResult<()> + Send + Sync>;

/// Staged copy of one plane, tightly packed.
#[derive(Debug, Clone, PartialEq)]
pub struct TilePlane {
    pub data: Vec<u8>,
    pub addressing: PatchAddressing,
}

/// Staged view of one image parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageTile {
    pub width: u32,
    pub height: u32,
    pub format: DfImage,
    pub space: ColorSpace,
    pub range: ChannelRange,
    pub valid: Rectangle,
    pub border: Border,
    /// Output tile currently being produced.
    pub tile: Rectangle,
    pub planes: Vec<TilePlane>,
}

fn packed_addressing(format: DfImage, plane: usize, width: u32, height: u32) -> VxResult<PatchAddressing> {
    let shape = format.plane_shape(plane).ok_or(VxError::InvalidFormat)?;
    let stride_y = if shape.element_size == 0 {
        (width as usize).div_ceil(8)
    } else {
        width.div_ceil(shape.sub_x) as usize * shape.element_size as usize
    };
    Ok(PatchAddressing {
        dim_x: width,
        dim_y: height,
        stride_x: shape.element_size,
        stride_x_bits: if shape.element_size == 0 { 1 } else { shape.element_size * 8 },
        stride_y: stride_y as u32,
        step_x: shape.sub_x,
        step_y: shape.sub_y,
    })
}

impl ImageTile {
    /// A zero-filled image tile.
    pub fn new(width: u32, height: u32, format: DfImage, border: Border) -> VxResult<Self> {
        let planes = (0..format.planes())
            .map(|p| {
                let addressing = packed_addressing(format, p, width, height)?;
                Ok(TilePlane {
                    data: vec![0; addressing.byte_len()],
                    addressing,
                })
            })
            .collect::<VxResult<Vec<_>>>()?;
        Ok(Self {
            width,
            height,
            format,
            space: ColorSpace::None,
            range: ChannelRange::Full,
            valid: Rectangle::full(width, height),
            border,
            tile: Rectangle::full(width, height),
            planes,
        })
    }

    /// Coordinates to read for `(x, y)`, or `None` when the constant border applies.
    fn resolve(&self, x: i64, y: i64) -> Option<(u32, u32)> {
        // An empty tile has no edge to replicate.
        if self.width == 0 || self.height == 0 {
            return None;
        }
        let inside = x >= 0 && y >= 0 && x < self.width as i64 && y < self.height as i64;
        if inside {
            return Some((x as u32, y as u32));
        }
        match self.border.mode {
            BorderMode::Constant => None,
            // Undefined borders may read anything; the nearest edge pixel is as good as any.
            BorderMode::Replicate | BorderMode::Undefined => Some((
                x.clamp(0, self.width as i64 - 1) as u32,
                y.clamp(0, self.height as i64 - 1) as u32,
            )),
        }
    }

    fn offset(&self, plane: usize, x: u32, y: u32) -> usize {
        self.planes[plane].addressing.offset(x, y)
    }

    /// One packed row of a plane.
    pub fn row(&self, plane: usize, y: u32) -> &[u8] {
        let p = &self.planes[plane];
        let start = (y / p.addressing.step_y.max(1)) as usize * p.addressing.stride_y as usize;
        &p.data[start..start + p.addressing.stride_y as usize]
    }

    pub fn row_mut(&mut self, plane: usize, y: u32) -> &mut [u8] {
        let p = &mut self.planes[plane];
        let start = (y / p.addressing.step_y.max(1)) as usize * p.addressing.stride_y as usize;
        &mut p.data[start..start + p.addressing.stride_y as usize]
    }

    /// 8-bit sample of plane 0, border applied.
    pub fn u8_at(&self, x: i64, y: i64) -> u8 {
        match self.resolve(x, y) {
            Some((x, y)) => self.planes[0].data[self.offset(0, x, y)],
            None => self.border.constant.as_u8(),
        }
    }

    pub fn set_u8(&mut self, x: u32, y: u32, value: u8) {
        let o = self.offset(0, x, y);
        self.planes[0].data[o] = value;
    }

    /// Signed 16-bit sample of plane 0, border applied.
    pub fn s16_at(&self, x: i64, y: i64) -> i16 {
        match self.resolve(x, y) {
            Some((x, y)) => {
                let o = self.offset(0, x, y);
                i16::from_ne_bytes([self.planes[0].data[o], self.planes[0].data[o + 1]])
            }
            None => match self.border.constant {
                PixelValue::S16(v) => v,
                other => i16::from(other.as_u8()),
            },
        }
    }

    pub fn set_s16(&mut self, x: u32, y: u32, value: i16) {
        let o = self.offset(0, x, y);
        self.planes[0].data[o..o + 2].copy_from_slice(&value.to_ne_bytes());
    }

    /// Bit of a U1 image, border applied.
    pub fn bit_at(&self, x: i64, y: i64) -> bool {
        match self.resolve(x, y) {
            Some((x, y)) => {
                let row = self.row(0, y);
                row[x as usize / 8] & (1 << (x % 8)) != 0
            }
            None => match self.border.constant {
                PixelValue::U1(b) => b,
                other => other.as_u8() != 0,
            },
        }
    }

    pub fn set_bit(&mut self, x: u32, y: u32, value: bool) {
        let row = self.row_mut(0, y);
        if value {
            row[x as usize / 8] |= 1 << (x % 8);
        } else {
            row[x as usize / 8] &= !(1 << (x % 8));
        }
    }

    /// Bytes of the element of `plane` holding pixel `(x, y)`.
    pub fn element(&self, plane: usize, x: u32, y: u32) -> &[u8] {
        let size = self.planes[plane].addressing.stride_x as usize;
        let o = self.offset(plane, x, y);
        &self.planes[plane].data[o..o + size]
    }

    pub fn element_mut(&mut self, plane: usize, x: u32, y: u32) -> &mut [u8] {
        let size = self.planes[plane].addressing.stride_x as usize;
        let o = self.offset(plane, x, y);
        &mut self.planes[plane].data[o..o + size]
    }
}

/// Staged view of one kernel parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum TileParam {
    Image(ImageTile),
    Scalar(ScalarValue),
    Matrix { info: MatrixInfo, data: Vec<u8> },
    Convolution { columns: usize, rows: usize, scale: u32, coefficients: Vec<i16> },
    Threshold(ThresholdData),
    Array { info: ArrayInfo, data: Vec<u8> },
    Lut { info: LutInfo, data: Vec<u8> },
    Distribution { info: DistributionInfo, bins: Vec<u32> },
    Remap { dst_width: u32, dst_height: u32, points: Vec<[f32; 2]> },
    Tensor { info: TensorInfo, data: Vec<u8> },
    /// Unset optional parameter.
    None,
}

impl TileParam {
    pub fn as_image(&self) -> VxResult<&ImageTile> {
        match self {
            TileParam::Image(t) => Ok(t),
            _ => Err(VxError::InvalidParameters),
        }
    }

    pub fn as_image_mut(&mut self) -> VxResult<&mut ImageTile> {
        match self {
            TileParam::Image(t) => Ok(t),
            _ => Err(VxError::InvalidParameters),
        }
    }

    pub fn as_scalar(&self) -> VxResult<ScalarValue> {
        match self {
            TileParam::Scalar(v) => Ok(*v),
            _ => Err(VxError::InvalidParameters),
        }
    }

    pub fn as_threshold(&self) -> VxResult<&ThresholdData> {
        match self {
            TileParam::Threshold(t) => Ok(t),
            _ => Err(VxError::InvalidParameters),
        }
    }
}

/// Borrow input images and one output image at once. Every input index must be below
/// `output`.
pub fn split_images<const N: usize>(
    params: &mut [TileParam],
    inputs: [usize; N],
    output: usize,
) -> VxResult<([&ImageTile; N], &mut ImageTile)> {
    if output >= params.len() || inputs.iter().any(|&i| i >= output) {
        return Err(VxError::InvalidParameters);
    }
    let (head, tail) = params.split_at_mut(output);
    let out = tail[0].as_image_mut()?;
    let head: &[TileParam] = head;
    let staged = inputs
        .iter()
        .map(|&i| head[i].as_image())
        .collect::<VxResult<Vec<_>>>()?;
    let staged: [&ImageTile; N] = staged.try_into().map_err(|_| VxError::InvalidParameters)?;
    Ok((staged, out))
}

/// One tile of the plan and whether the fast function may process it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlannedTile {
    pub rect: Rectangle,
    pub fast: bool,
}

/// Split a `width` x `height` output into tiles, raster order.
///
/// Full `block_width` x `block_height` blocks come first, row by row, each followed by
/// nothing; the right remainder strip of every block row and the bottom remainder strip
/// follow. A block goes to the fast function only when the kernel has one and the block's
/// neighborhood lies inside the image.
pub fn plan_tiles(
    width: u32,
    height: u32,
    block_width: u32,
    block_height: u32,
    neighborhood: Neighborhood,
    has_fast: bool,
) -> Vec<PlannedTile> {
    let (bw, bh) = (block_width.max(1), block_height.max(1));
    let full_w = (width / bw) * bw;
    let full_h = (height / bh) * bh;
    let interior = |r: &Rectangle| {
        r.start_x >= neighborhood.left
            && r.start_y >= neighborhood.top
            && r.end_x + neighborhood.right <= width
            && r.end_y + neighborhood.bottom <= height
    };

    let mut tiles = Vec::new();
    for y in (0..full_h).step_by(bh as usize) {
        for x in (0..full_w).step_by(bw as usize) {
            let rect = Rectangle::new(x, y, x + bw, y + bh);
            let fast = has_fast && interior(&rect);
            tiles.push(PlannedTile { rect, fast });
        }
        if full_w < width {
            tiles.push(PlannedTile {
                rect: Rectangle::new(full_w, y, width, y + bh),
                fast: false,
            });
        }
    }
    if full_h < height {
        tiles.push(PlannedTile {
            rect: Rectangle::new(0, full_h, width, height),
            fast: false,
        });
    }
    tiles
}

/// Run a plan over staged parameters.
pub fn run_plan(
    plan: &[PlannedTile],
    params: &mut [TileParam],
    fast: Option<&TileFn>,
    flexible: &TileFn,
    tile_memory: &mut [u8],
) -> VxResult<()> {
    for planned in plan {
        for p in params.iter_mut() {
            if let TileParam::Image(t) = p {
                t.tile = planned.rect;
            }
        }
        match (planned.fast, fast) {
            (true, Some(f)) => f(params, tile_memory)?,
            _ => flexible(params, tile_memory)?,
        }
    }
    Ok(())
}

fn stage_image(ctx: &Context, image: Image, border: Border, direction: Direction) -> VxResult<ImageTile> {
    let info = ctx.query_image(image)?;
    let mut tile = ImageTile::new(info.width, info.height, info.format, border)?;
    tile.space = info.space;
    tile.range = info.range;
    tile.valid = ctx.get_valid_region(image)?;
    if direction != Direction::Output {
        for (p, plane) in tile.planes.iter_mut().enumerate() {
            plane.data = ctx.read_image_plane(image, p)?;
        }
    }
    Ok(tile)
}

fn stage(ctx: &Context, handle: Handle, spec: &ParamSpec, border: Border) -> VxResult<TileParam> {
    let staged = match ctx.object_type(handle)? {
        ObjectType::Image => TileParam::Image(stage_image(ctx, Image(handle), border, spec.direction)?),
        ObjectType::Scalar => TileParam::Scalar(ctx.read_scalar(Scalar(handle))?),
        ObjectType::Matrix => {
            let (info, data) = ctx.matrix_snapshot(Matrix(handle))?;
            TileParam::Matrix { info, data }
        }
        ObjectType::Convolution => {
            let (columns, rows, scale, coefficients) = ctx.convolution_snapshot(Convolution(handle))?;
            TileParam::Convolution {
                columns,
                rows,
                scale,
                coefficients,
            }
        }
        ObjectType::Threshold => TileParam::Threshold(ctx.query_threshold(Threshold(handle))?),
        ObjectType::Array => {
            let (info, data) = ctx.array_snapshot(Array(handle))?;
            TileParam::Array { info, data }
        }
        ObjectType::Lut => {
            let (info, data) = ctx.lut_snapshot(Lut(handle))?;
            TileParam::Lut { info, data }
        }
        ObjectType::Distribution => {
            let info = ctx.query_distribution(Distribution(handle))?;
            let mut bins = vec![0u32; info.bins];
            ctx.copy_distribution(Distribution(handle), &mut bins, Usage::ReadOnly)?;
            TileParam::Distribution { info, bins }
        }
        ObjectType::Remap => {
            let (dst_width, dst_height, points) = ctx.remap_snapshot(Remap(handle))?;
            TileParam::Remap {
                dst_width,
                dst_height,
                points,
            }
        }
        ObjectType::Tensor => {
            let (info, data) = ctx.tensor_snapshot(Tensor(handle))?;
            TileParam::Tensor { info, data }
        }
        other => {
            log::warn!("tiling kernels cannot take a {} parameter", other);
            return Err(VxError::NotSupported);
        }
    };
    Ok(staged)
}

fn commit(ctx: &Context, handle: Handle, staged: &mut TileParam) -> VxResult<()> {
    match staged {
        TileParam::Image(tile) => {
            let mut fold = StatusFold::new();
            for (p, plane) in tile.planes.iter().enumerate() {
                fold.push(ctx.write_image_plane(Image(handle), p, &plane.data));
            }
            fold.finish()
        }
        TileParam::Scalar(value) => ctx.write_scalar(Scalar(handle), *value),
        TileParam::Array { data, .. } => ctx.array_commit(Array(handle), data),
        TileParam::Distribution { bins, .. } => ctx.copy_distribution(Distribution(handle), bins, Usage::WriteOnly),
        TileParam::Tensor { data, .. } => ctx.tensor_commit(Tensor(handle), data),
        _ => Ok(()),
    }
}

/// Valid region of an output: the intersection of same-sized input images' valid
/// regions, shrunk by the neighborhood when the border is undefined.
fn output_valid(
    params: &[TileParam],
    specs: &[ParamSpec],
    out: &ImageTile,
    attributes: &KernelAttributes,
    border: Border,
) -> Rectangle {
    let mut valid = Rectangle::full(out.width, out.height);
    for (param, spec) in params.iter().zip(specs) {
        if spec.direction != Direction::Input {
            continue;
        }
        if let TileParam::Image(t) = param {
            if (t.width, t.height) == (out.width, out.height) {
                valid = valid.intersect(&t.valid).unwrap_or_default();
            }
        }
    }
    if border.mode == BorderMode::Undefined && !attributes.neighborhood.is_empty() && !valid.is_empty() {
        let nb = attributes.neighborhood;
        valid = Rectangle::new(
            valid.start_x.max(nb.left),
            valid.start_y.max(nb.top),
            valid.end_x.min(out.width.saturating_sub(nb.right)),
            valid.end_y.min(out.height.saturating_sub(nb.bottom)),
        );
        if valid.is_empty() {
            valid = Rectangle::default();
        }
    }
    valid
}

/// Run a tiling kernel for one node: stage, tile, commit.
pub(crate) fn process_tiled(ctx: &Context, invocation: &Invocation) -> VxResult<()> {
    let kernel = &invocation.kernel;
    let KernelBody::Tiling { fast, flexible } = &kernel.body else {
        return Err(VxError::InvalidParameters);
    };
    let specs = kernel.signature();
    let attributes = kernel.attributes;
    if attributes.tile_memory_size > ctx.config().tile_memory_limit {
        log::warn!(
            "kernel '{}' wants {} bytes of tile memory, limit is {}",
            kernel.name,
            attributes.tile_memory_size,
            ctx.config().tile_memory_limit
        );
        return Err(VxError::NoMemory);
    }

    let mut params = Vec::with_capacity(specs.len());
    for (spec, handle) in specs.iter().zip(&invocation.params) {
        params.push(match handle {
            Some(h) => stage(ctx, *h, spec, invocation.border)?,
            None => TileParam::None,
        });
    }

    // The first output image decides the tile grid; kernels without one get a single call.
    let output = specs
        .iter()
        .zip(&params)
        .find(|(s, p)| s.direction.writes() && matches!(p, TileParam::Image(_)))
        .and_then(|(_, p)| p.as_image().ok());
    let whole = attributes.whole_image
        || params
            .iter()
            .any(|p| matches!(p, TileParam::Image(t) if t.format == DfImage::U1));
    let plan = match output {
        Some(out) if !whole => plan_tiles(
            out.width,
            out.height,
            attributes.block_width,
            attributes.block_height,
            attributes.neighborhood,
            fast.is_some(),
        ),
        Some(out) => vec![PlannedTile {
            rect: Rectangle::full(out.width, out.height),
            fast: false,
        }],
        None => vec![PlannedTile {
            rect: Rectangle::default(),
            fast: false,
        }],
    };
    log::trace!(
        "tiling '{}' in {} tile(s), {} fast",
        kernel.name,
        plan.len(),
        plan.iter().filter(|t| t.fast).count()
    );

    let mut tile_memory = vec![0u8; attributes.tile_memory_size];
    run_plan(&plan, &mut params, fast.as_ref(), flexible, &mut tile_memory)?;

    let mut fold = StatusFold::new();
    for i in 0..params.len() {
        let (Some(spec), Some(Some(handle))) = (specs.get(i), invocation.params.get(i)) else {
            continue;
        };
        if !spec.direction.writes() {
            continue;
        }
        if let TileParam::Image(out) = &params[i] {
            let valid = output_valid(&params, &specs, out, &attributes, invocation.border);
            fold.push(commit(ctx, *handle, &mut params[i]));
            fold.push(ctx.set_image_valid_rectangle(Image(*handle), Some(valid)));
        } else {
            fold.push(commit(ctx, *handle, &mut params[i]));
        }
    }
    fold.finish()
}

/// Target running tiling kernels block by block.
pub struct TilingTarget;

impl TargetBackend for TilingTarget {
    fn init(&self, ctx: &Context, target: &str) -> VxResult<()> {
        debug_assert_eq!(target, TARGET_TILING);
        crate::kernels::publish_tiling(ctx, target)
    }

    /// Kernels that keep the image size are the only ones the block splitter can tile.
    fn verify(&self, ctx: &Context, invocation: &Invocation) -> VxResult<()> {
        let kernel = &invocation.kernel;
        if !kernel.body.is_tiling() || kernel.attributes.whole_image {
            return Ok(());
        }
        let mut dims = None;
        for (spec, handle) in kernel.signature().iter().zip(&invocation.params) {
            let Some(h) = handle else { continue };
            if ctx.object_type(*h)? != ObjectType::Image {
                continue;
            }
            let info = ctx.query_image(Image(*h))?;
            match dims {
                None => dims = Some((info.width, info.height)),
                Some(d) if d != (info.width, info.height) => {
                    log::warn!(
                        "tiling kernel '{}' parameter ({:?}) is {}x{}, expected {}x{}",
                        kernel.name,
                        spec.direction,
                        info.width,
                        info.height,
                        d.0,
                        d.1
                    );
                    return Err(VxError::InvalidDimension);
                }
                Some(_) => {}
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn staged(width: u32, height: u32, pixels: &[u8], border: Border) -> Vec<TileParam> {
        let mut src = ImageTile::new(width, height, DfImage::U8, border).unwrap();
        src.planes[0].data.copy_from_slice(pixels);
        let dst = ImageTile::new(width, height, DfImage::U8, border).unwrap();
        vec![TileParam::Image(src), TileParam::Image(dst)]
    }

    #[test]
    fn test_plan_covers_every_pixel_once() {
        let plan = plan_tiles(70, 35, 16, 8, Neighborhood::square(1), true);
        let mut hits = vec![0u8; 70 * 35];
        for t in &plan {
            for y in t.rect.start_y..t.rect.end_y {
                for x in t.rect.start_x..t.rect.end_x {
                    hits[(y * 70 + x) as usize] += 1;
                }
            }
        }
        assert!(hits.iter().all(|&h| h == 1));
        // Blocks touching the top or left edge need the border and go flexible.
        assert!(!plan[0].fast);
        assert!(plan.iter().any(|t| t.fast));
        assert!(plan.iter().filter(|t| t.rect.end_x == 70 || t.rect.end_y == 35).all(|t| !t.fast));
    }

    #[test]
    fn test_plan_without_full_blocks() {
        let plan = plan_tiles(5, 3, 64, 16, Neighborhood::default(), true);
        assert_eq!(
            plan,
            vec![PlannedTile {
                rect: Rectangle::new(0, 0, 5, 3),
                fast: false
            }]
        );
    }

    #[test]
    fn test_border_accessors() {
        let mut t = ImageTile::new(2, 2, DfImage::U8, Border::constant(PixelValue::U8(9))).unwrap();
        t.set_u8(1, 1, 4);
        assert_eq!(t.u8_at(1, 1), 4);
        assert_eq!(t.u8_at(-1, 0), 9);
        t.border = Border::replicate();
        assert_eq!(t.u8_at(5, 5), 4);

        let mut bits = ImageTile::new(10, 1, DfImage::U1, Border::undefined()).unwrap();
        bits.set_bit(9, 0, true);
        assert!(bits.bit_at(9, 0) && bits.bit_at(12, 0));
        assert!(!bits.bit_at(8, 0));

        let mut wide = ImageTile::new(3, 1, DfImage::S16, Border::constant(PixelValue::S16(-3))).unwrap();
        wide.set_s16(2, 0, -300);
        assert_eq!(wide.s16_at(2, 0), -300);
        assert_eq!(wide.s16_at(3, 0), -3);
    }

    #[test]
    fn test_empty_tile_reads_border_constant() {
        let empty = ImageTile::new(0, 4, DfImage::U8, Border::replicate()).unwrap();
        assert_eq!(empty.u8_at(0, 0), 0);
        assert_eq!(empty.u8_at(-2, 7), 0);
        let flat = ImageTile::new(5, 0, DfImage::S16, Border::undefined()).unwrap();
        assert_eq!(flat.s16_at(1, 0), 0);
        let bits = ImageTile::new(0, 0, DfImage::U1, Border::replicate()).unwrap();
        assert!(!bits.bit_at(3, 3));
    }

    #[test]
    fn test_element_views_of_packed_rgb() {
        let mut t = ImageTile::new(3, 2, DfImage::Rgb, Border::undefined()).unwrap();
        t.element_mut(0, 2, 1).copy_from_slice(&[10, 20, 30]);
        assert_eq!(t.element(0, 2, 1), &[10, 20, 30]);
        assert_eq!(t.row(0, 1)[6..9], [10, 20, 30]);
    }

    #[test]
    fn test_split_images_rejects_bad_order() {
        let mut params = staged(2, 2, &[0; 4], Border::undefined());
        assert!(split_images(&mut params, [1], 0).is_err());
        assert!(split_images(&mut params, [0], 2).is_err());
        assert!(split_images(&mut params, [0], 1).is_ok());
    }

    #[test]
    fn test_output_valid_shrinks_for_undefined_border() {
        let params = staged(8, 8, &[0; 64], Border::undefined());
        let specs = [
            ParamSpec::required(Direction::Input, ObjectType::Image),
            ParamSpec::required(Direction::Output, ObjectType::Image),
        ];
        let attributes = KernelAttributes {
            neighborhood: Neighborhood::square(1),
            ..KernelAttributes::default()
        };
        let out = params[1].as_image().unwrap();
        assert_eq!(
            output_valid(&params, &specs, out, &attributes, Border::undefined()),
            Rectangle::new(1, 1, 7, 7)
        );
        assert_eq!(
            output_valid(&params, &specs, out, &attributes, Border::replicate()),
            Rectangle::full(8, 8)
        );
    }
}
