//! Threshold kernel. Runs as a single whole-image tile.

use super::{bound, describe_image, kernel_name, matching_inputs, requested_format, KERNEL_THRESHOLD};
use crate::core::context::Context;
use crate::core::error::{VxError, VxResult};
use crate::core::reference::Threshold;
use crate::core::types::{DfImage, ObjectType};
use crate::target::tiling::split_images;
use crate::target::{KernelAttribute, KernelDescriptor, TileFn, TileParam};
use std::sync::Arc;

fn threshold_flexible() -> TileFn {
    Arc::new(|params: &mut [TileParam], _: &mut [u8]| {
        let threshold = *params.get(1).ok_or(VxError::InvalidParameters)?.as_threshold()?;
        let ([src], dst) = split_images(params, [0], 2)?;
        let t = dst.tile;
        for y in t.start_y..t.end_y {
            for x in t.start_x..t.end_x {
                let (xi, yi) = (x as i64, y as i64);
                let pixel = match src.format {
                    DfImage::S16 => i32::from(src.s16_at(xi, yi)),
                    _ => i32::from(src.u8_at(xi, yi)),
                };
                let value = threshold.apply(pixel);
                match dst.format {
                    DfImage::U1 => dst.set_bit(x, y, value != 0),
                    _ => dst.set_u8(x, y, value.clamp(0, 255) as u8),
                }
            }
        }
        Ok(())
    })
}

pub(super) fn publish(ctx: &Context, target: &str) -> VxResult<()> {
    let descriptor = KernelDescriptor::tiling(kernel_name("threshold"), KERNEL_THRESHOLD, 3, None, threshold_flexible())
        .input(ObjectType::Image)
        .input(ObjectType::Threshold)
        .output(ObjectType::Image)
        .with_validator(|ctx, _, params, metas| {
            let input = matching_inputs(ctx, params, &[0], &[DfImage::U8, DfImage::S16])?;
            ctx.query_threshold(Threshold(bound(params, 1)?))?;
            let format = requested_format(ctx, params, 2, DfImage::U8)?;
            if !matches!(format, DfImage::U8 | DfImage::U1) {
                return Err(VxError::InvalidFormat);
            }
            describe_image(metas, 2, input.width, input.height, format)
        })
        .with_attribute(KernelAttribute::WholeImage(true));
    super::publish(ctx, target, descriptor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{DataType, ThresholdType};

    #[test]
    fn test_binary_threshold_to_bits() {
        let ctx = Context::create().unwrap();
        let src = ctx.create_image(8, 2, DfImage::U8).unwrap();
        ctx.write_image_plane(src, 0, &[0, 10, 20, 30, 40, 50, 60, 70, 70, 60, 50, 40, 30, 20, 10, 0])
            .unwrap();
        let threshold = ctx.create_threshold(ThresholdType::Binary, DataType::UInt8).unwrap();
        ctx.set_threshold_value(threshold, 35).unwrap();
        ctx.set_threshold_outputs(threshold, 1, 0).unwrap();
        let graph = ctx.create_graph().unwrap();
        let out = ctx.create_virtual_image(graph, 0, 0, DfImage::U1).unwrap();
        let node = ctx
            .create_node_by_name(graph, &kernel_name("threshold"), &[Some(src.0), Some(threshold.0), Some(out.0)])
            .unwrap();
        ctx.add_parameter_to_graph(graph, node, 2).unwrap();
        ctx.process_graph(graph).unwrap();

        let info = ctx.query_image(out).unwrap();
        assert_eq!((info.width, info.height, info.format), (8, 2, DfImage::U1));
        let bits = ctx.read_image_plane(out, 0).unwrap();
        assert_eq!(bits, vec![0b1111_0000, 0b0000_1111]);
    }

    #[test]
    fn test_range_threshold_to_u8() {
        let ctx = Context::create().unwrap();
        let src = ctx.create_image(4, 1, DfImage::U8).unwrap();
        ctx.write_image_plane(src, 0, &[5, 50, 100, 200]).unwrap();
        let threshold = ctx.create_threshold(ThresholdType::Range, DataType::UInt8).unwrap();
        ctx.set_threshold_range(threshold, 40, 150).unwrap();
        ctx.set_threshold_outputs(threshold, 255, 0).unwrap();
        let out = ctx.create_image(4, 1, DfImage::U8).unwrap();
        let graph = ctx.create_graph().unwrap();
        ctx.create_node_by_name(graph, &kernel_name("threshold"), &[Some(src.0), Some(threshold.0), Some(out.0)])
            .unwrap();
        ctx.process_graph(graph).unwrap();
        assert_eq!(ctx.read_image_plane(out, 0).unwrap(), vec![0, 255, 255, 0]);
    }

    #[test]
    fn test_rejects_wide_output() {
        let ctx = Context::create().unwrap();
        let src = ctx.create_image(4, 4, DfImage::U8).unwrap();
        let threshold = ctx.create_threshold(ThresholdType::Binary, DataType::UInt8).unwrap();
        let out = ctx.create_image(4, 4, DfImage::S16).unwrap();
        let graph = ctx.create_graph().unwrap();
        ctx.create_node_by_name(graph, &kernel_name("threshold"), &[Some(src.0), Some(threshold.0), Some(out.0)])
            .unwrap();
        assert_eq!(ctx.verify_graph(graph), Err(VxError::InvalidFormat));
    }
}
