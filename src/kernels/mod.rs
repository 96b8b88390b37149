//! Built-in kernels.
//!
//! Each target publishes its kernels when it comes up: the tiling target gets the
//! pixelwise and neighborhood kernels written as tile functions, the C-model target
//! gets whole-image functions. Names follow `org.khronos.openvx.<kernel>`, and a kernel
//! published on both targets shares one signature so nodes can move between them.

mod bitwise;
mod color;
mod copy;
mod filter;
mod threshold;

use crate::core::context::Context;
use crate::core::error::{VxError, VxResult};
use crate::core::meta::MetaFormat;
use crate::core::reference::{Handle, Image};
use crate::core::types::DfImage;
use crate::objects::image::ImageInfo;
use crate::target::KernelDescriptor;

pub use color::channel_scalar;

/// Prefix of every built-in kernel name.
pub const KHRONOS_PREFIX: &str = "org.khronos.openvx";

pub const KERNEL_COLOR_CONVERT: u32 = 0x01;
pub const KERNEL_CHANNEL_EXTRACT: u32 = 0x02;
pub const KERNEL_THRESHOLD: u32 = 0x0D;
pub const KERNEL_BOX_3X3: u32 = 0x12;
pub const KERNEL_AND: u32 = 0x1C;
pub const KERNEL_OR: u32 = 0x1D;
pub const KERNEL_XOR: u32 = 0x1E;
pub const KERNEL_NOT: u32 = 0x1F;
pub const KERNEL_COPY: u32 = 0x3F;

/// Full name of a built-in kernel.
pub fn kernel_name(base: &str) -> String {
    format!("{}.{}", KHRONOS_PREFIX, base)
}

/// Kernels of the tiling target.
pub fn publish_tiling(ctx: &Context, target: &str) -> VxResult<()> {
    bitwise::publish_tiling(ctx, target)?;
    filter::publish(ctx, target)?;
    threshold::publish(ctx, target)?;
    Ok(())
}

/// Kernels of the C-model target.
pub fn publish_c_model(ctx: &Context, target: &str) -> VxResult<()> {
    bitwise::publish_c_model(ctx, target)?;
    color::publish(ctx, target)?;
    copy::publish(ctx, target)?;
    Ok(())
}

/// Publish and finalize one built-in kernel.
fn publish(ctx: &Context, target: &str, descriptor: KernelDescriptor) -> VxResult<()> {
    let kernel = ctx.publish_kernel(target, descriptor, false)?;
    ctx.finalize_kernel(kernel)
}

// ============================================================================
// Validator helpers
// ============================================================================

fn bound(params: &[Option<Handle>], index: usize) -> VxResult<Handle> {
    params.get(index).copied().flatten().ok_or(VxError::InvalidParameters)
}

/// Image parameter `index` as an [`Image`].
fn image_param(params: &[Option<Handle>], index: usize) -> VxResult<Image> {
    bound(params, index).map(Image)
}

/// Attributes of image parameter `index`.
fn image_info(ctx: &Context, params: &[Option<Handle>], index: usize) -> VxResult<ImageInfo> {
    ctx.query_image(image_param(params, index)?)
}

/// Inputs at `indices` share `allowed` formats, one format and one size. Returns the first.
fn matching_inputs(
    ctx: &Context,
    params: &[Option<Handle>],
    indices: &[usize],
    allowed: &[DfImage],
) -> VxResult<ImageInfo> {
    let first = image_info(ctx, params, indices[0])?;
    if !allowed.contains(&first.format) {
        return Err(VxError::InvalidFormat);
    }
    for &i in &indices[1..] {
        let other = image_info(ctx, params, i)?;
        if other.format != first.format {
            return Err(VxError::InvalidFormat);
        }
        if (other.width, other.height) != (first.width, first.height) {
            return Err(VxError::InvalidDimension);
        }
    }
    Ok(first)
}

/// Format the output at `index` asks for, or `fallback` when it leaves it open.
fn requested_format(ctx: &Context, params: &[Option<Handle>], index: usize, fallback: DfImage) -> VxResult<DfImage> {
    Ok(match image_info(ctx, params, index)?.format {
        DfImage::Virt => fallback,
        declared => declared,
    })
}

fn describe_image(metas: &mut [Option<MetaFormat>], index: usize, width: u32, height: u32, format: DfImage) -> VxResult<()> {
    match metas.get_mut(index).and_then(Option::as_mut) {
        Some(meta) => meta.set_image(width, height, format),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::{TARGET_C_MODEL, TARGET_TILING};

    #[test]
    fn test_targets_publish_builtins() {
        let ctx = Context::create().unwrap();
        let tiling = ctx.target_kernels(TARGET_TILING).unwrap();
        for base in ["and", "or", "xor", "not", "box_3x3", "threshold"] {
            assert!(tiling.contains(&kernel_name(base)), "tiling lacks {}", base);
        }
        let c_model = ctx.target_kernels(TARGET_C_MODEL).unwrap();
        for base in ["and", "color_convert", "channel_extract", "copy"] {
            assert!(c_model.contains(&kernel_name(base)), "c_model lacks {}", base);
        }
    }

    #[test]
    fn test_enum_lookup_prefers_tiling() {
        let ctx = Context::create().unwrap();
        let kernel = ctx.get_kernel_by_enum(KERNEL_AND).unwrap();
        let info = ctx.query_kernel(kernel).unwrap();
        assert_eq!(info.target, TARGET_TILING);
        assert!(info.is_tiling);
        let convert = ctx.get_kernel_by_enum(KERNEL_COLOR_CONVERT).unwrap();
        assert_eq!(ctx.query_kernel(convert).unwrap().target, TARGET_C_MODEL);
        assert_eq!(ctx.get_kernel_by_enum(0x7F_FFFF), Err(VxError::NotSupported));
    }

    #[test]
    fn test_and_on_both_targets_agree() {
        let ctx = Context::create().unwrap();
        let a = ctx.create_image(33, 7, DfImage::U8).unwrap();
        let b = ctx.create_image(33, 7, DfImage::U8).unwrap();
        let pa: Vec<u8> = (0..33 * 7).map(|i| (i * 7) as u8).collect();
        let pb: Vec<u8> = (0..33 * 7).map(|i| (i * 13 + 5) as u8).collect();
        ctx.write_image_plane(a, 0, &pa).unwrap();
        ctx.write_image_plane(b, 0, &pb).unwrap();

        let mut results = Vec::new();
        for target in ["tiling", "c_model"] {
            let graph = ctx.create_graph().unwrap();
            let out = ctx.create_image(33, 7, DfImage::U8).unwrap();
            let node = ctx
                .create_node_by_name(graph, &kernel_name("and"), &[Some(a.0), Some(b.0), Some(out.0)])
                .unwrap();
            ctx.set_node_target(node, target).unwrap();
            ctx.process_graph(graph).unwrap();
            results.push(ctx.read_image_plane(out, 0).unwrap());
        }
        let expected: Vec<u8> = pa.iter().zip(&pb).map(|(x, y)| x & y).collect();
        assert_eq!(results[0], expected);
        assert_eq!(results[1], expected);
    }
}
