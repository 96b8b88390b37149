//! Bitwise kernels: `and`, `or`, `xor` and `not` over U8 and U1 images.

use super::{describe_image, image_param, kernel_name, matching_inputs, publish};
use super::{KERNEL_AND, KERNEL_NOT, KERNEL_OR, KERNEL_XOR};
use crate::core::context::Context;
use crate::core::error::VxResult;
use crate::core::reference::{Handle, Node};
use crate::core::types::{DfImage, ObjectType};
use crate::target::tiling::split_images;
use crate::target::{KernelAttribute, KernelDescriptor, TileFn, TileParam};
use std::sync::Arc;

const FORMATS: [DfImage; 2] = [DfImage::U8, DfImage::U1];

type BinaryOp = fn(u8, u8) -> u8;
type UnaryOp = fn(u8) -> u8;

fn and(a: u8, b: u8) -> u8 {
    a & b
}

fn or(a: u8, b: u8) -> u8 {
    a | b
}

fn xor(a: u8, b: u8) -> u8 {
    a ^ b
}

fn not(a: u8) -> u8 {
    !a
}

fn binary_signature(descriptor: KernelDescriptor) -> KernelDescriptor {
    descriptor
        .input(ObjectType::Image)
        .input(ObjectType::Image)
        .output(ObjectType::Image)
        .with_validator(|ctx, _, params, metas| {
            let input = matching_inputs(ctx, params, &[0, 1], &FORMATS)?;
            describe_image(metas, 2, input.width, input.height, input.format)
        })
}

fn unary_signature(descriptor: KernelDescriptor) -> KernelDescriptor {
    descriptor
        .input(ObjectType::Image)
        .output(ObjectType::Image)
        .with_validator(|ctx, _, params, metas| {
            let input = matching_inputs(ctx, params, &[0], &FORMATS)?;
            describe_image(metas, 1, input.width, input.height, input.format)
        })
}

// ============================================================================
// Tiling
// ============================================================================

fn binary_fast(op: BinaryOp) -> TileFn {
    Arc::new(move |params: &mut [TileParam], _: &mut [u8]| {
        let ([a, b], out) = split_images(params, [0, 1], 2)?;
        let t = out.tile;
        let (x0, x1) = (t.start_x as usize, t.end_x as usize);
        for y in t.start_y..t.end_y {
            let (ra, rb) = (&a.row(0, y)[x0..x1], &b.row(0, y)[x0..x1]);
            for ((o, p), q) in out.row_mut(0, y)[x0..x1].iter_mut().zip(ra).zip(rb) {
                *o = op(*p, *q);
            }
        }
        Ok(())
    })
}

fn binary_flexible(op: BinaryOp) -> TileFn {
    Arc::new(move |params: &mut [TileParam], _: &mut [u8]| {
        let ([a, b], out) = split_images(params, [0, 1], 2)?;
        let t = out.tile;
        for y in t.start_y..t.end_y {
            for x in t.start_x..t.end_x {
                let (xi, yi) = (x as i64, y as i64);
                if out.format == DfImage::U1 {
                    let v = op(u8::from(a.bit_at(xi, yi)), u8::from(b.bit_at(xi, yi)));
                    out.set_bit(x, y, v & 1 != 0);
                } else {
                    out.set_u8(x, y, op(a.u8_at(xi, yi), b.u8_at(xi, yi)));
                }
            }
        }
        Ok(())
    })
}

fn unary_fast(op: UnaryOp) -> TileFn {
    Arc::new(move |params: &mut [TileParam], _: &mut [u8]| {
        let ([a], out) = split_images(params, [0], 1)?;
        let t = out.tile;
        let (x0, x1) = (t.start_x as usize, t.end_x as usize);
        for y in t.start_y..t.end_y {
            let src = &a.row(0, y)[x0..x1];
            for (o, p) in out.row_mut(0, y)[x0..x1].iter_mut().zip(src) {
                *o = op(*p);
            }
        }
        Ok(())
    })
}

fn unary_flexible(op: UnaryOp) -> TileFn {
    Arc::new(move |params: &mut [TileParam], _: &mut [u8]| {
        let ([a], out) = split_images(params, [0], 1)?;
        let t = out.tile;
        for y in t.start_y..t.end_y {
            for x in t.start_x..t.end_x {
                let (xi, yi) = (x as i64, y as i64);
                if out.format == DfImage::U1 {
                    out.set_bit(x, y, op(u8::from(a.bit_at(xi, yi))) & 1 != 0);
                } else {
                    out.set_u8(x, y, op(a.u8_at(xi, yi)));
                }
            }
        }
        Ok(())
    })
}

pub(super) fn publish_tiling(ctx: &Context, target: &str) -> VxResult<()> {
    let binaries: [(&str, u32, BinaryOp); 3] = [("and", KERNEL_AND, and), ("or", KERNEL_OR, or), ("xor", KERNEL_XOR, xor)];
    for (base, enumeration, op) in binaries {
        let descriptor = KernelDescriptor::tiling(kernel_name(base), enumeration, 3, Some(binary_fast(op)), binary_flexible(op))
            .with_attribute(KernelAttribute::BlockSize(64, 16));
        publish(ctx, target, binary_signature(descriptor))?;
    }
    let descriptor = KernelDescriptor::tiling(kernel_name("not"), KERNEL_NOT, 2, Some(unary_fast(not)), unary_flexible(not))
        .with_attribute(KernelAttribute::BlockSize(64, 16));
    publish(ctx, target, unary_signature(descriptor))
}

// ============================================================================
// C model
// ============================================================================

/// Whole-image AND. Packed U1 rows combine bytewise just like U8 rows.
fn and_function(ctx: &Context, _node: Node, params: &[Option<Handle>]) -> VxResult<()> {
    let (a, b, out) = (image_param(params, 0)?, image_param(params, 1)?, image_param(params, 2)?);
    let pa = ctx.read_image_plane(a, 0)?;
    let pb = ctx.read_image_plane(b, 0)?;
    let combined: Vec<u8> = pa.iter().zip(&pb).map(|(x, y)| x & y).collect();
    ctx.write_image_plane(out, 0, &combined)?;
    let valid = ctx.get_valid_region(a)?.intersect(&ctx.get_valid_region(b)?).unwrap_or_default();
    ctx.set_image_valid_rectangle(out, Some(valid))
}

pub(super) fn publish_c_model(ctx: &Context, target: &str) -> VxResult<()> {
    let descriptor = KernelDescriptor::function(kernel_name("and"), KERNEL_AND, 3, and_function);
    publish(ctx, target, binary_signature(descriptor))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::VxError;
    use crate::core::reference::Image;

    fn run_binary(ctx: &Context, base: &str, a: Image, b: Image, out: Image) -> VxResult<()> {
        let graph = ctx.create_graph()?;
        ctx.create_node_by_name(graph, &kernel_name(base), &[Some(a.0), Some(b.0), Some(out.0)])?;
        ctx.process_graph(graph)
    }

    #[test]
    fn test_or_xor_values() {
        let ctx = Context::create().unwrap();
        let a = ctx.create_image(70, 20, DfImage::U8).unwrap();
        let b = ctx.create_image(70, 20, DfImage::U8).unwrap();
        ctx.write_image_plane(a, 0, &vec![0b0101_0000; 1400]).unwrap();
        ctx.write_image_plane(b, 0, &vec![0b0110_0001; 1400]).unwrap();
        let out = ctx.create_image(70, 20, DfImage::U8).unwrap();

        run_binary(&ctx, "or", a, b, out).unwrap();
        assert!(ctx.read_image_plane(out, 0).unwrap().iter().all(|p| *p == 0b0111_0001));
        run_binary(&ctx, "xor", a, b, out).unwrap();
        assert!(ctx.read_image_plane(out, 0).unwrap().iter().all(|p| *p == 0b0011_0001));
    }

    #[test]
    fn test_not_on_bits() {
        let ctx = Context::create().unwrap();
        let a = ctx.create_image(16, 2, DfImage::U1).unwrap();
        ctx.write_image_plane(a, 0, &[0b1010_1010, 0xFF, 0x00, 0x0F]).unwrap();
        let out = ctx.create_image(16, 2, DfImage::U1).unwrap();
        let graph = ctx.create_graph().unwrap();
        ctx.create_node_by_name(graph, &kernel_name("not"), &[Some(a.0), Some(out.0)])
            .unwrap();
        ctx.process_graph(graph).unwrap();
        assert_eq!(ctx.read_image_plane(out, 0).unwrap(), vec![0b0101_0101, 0x00, 0xFF, 0xF0]);
    }

    #[test]
    fn test_mismatched_inputs_rejected() {
        let ctx = Context::create().unwrap();
        let a = ctx.create_image(8, 8, DfImage::U8).unwrap();
        let small = ctx.create_image(4, 8, DfImage::U8).unwrap();
        let wide = ctx.create_image(8, 8, DfImage::S16).unwrap();
        let out = ctx.create_image(8, 8, DfImage::U8).unwrap();
        assert_eq!(run_binary(&ctx, "and", a, small, out), Err(VxError::InvalidDimension));
        assert_eq!(run_binary(&ctx, "and", wide, wide, out), Err(VxError::InvalidFormat));
    }
}
