//! 3x3 box filter.

use super::{describe_image, kernel_name, matching_inputs, KERNEL_BOX_3X3};
use crate::core::context::Context;
use crate::core::error::VxResult;
use crate::core::types::{DfImage, ObjectType};
use crate::target::tiling::split_images;
use crate::target::{KernelAttribute, KernelDescriptor, Neighborhood, TileFn, TileParam};
use std::sync::Arc;

/// Border-aware version for edge tiles.
fn box_flexible() -> TileFn {
    Arc::new(|params: &mut [TileParam], _: &mut [u8]| {
        let ([src], dst) = split_images(params, [0], 1)?;
        let t = dst.tile;
        for y in t.start_y..t.end_y {
            for x in t.start_x..t.end_x {
                let mut sum = 0u32;
                for dy in -1..=1i64 {
                    for dx in -1..=1i64 {
                        sum += u32::from(src.u8_at(x as i64 + dx, y as i64 + dy));
                    }
                }
                dst.set_u8(x, y, (sum / 9) as u8);
            }
        }
        Ok(())
    })
}

/// Interior blocks only: reads neighbor rows directly.
fn box_fast() -> TileFn {
    Arc::new(|params: &mut [TileParam], _: &mut [u8]| {
        let ([src], dst) = split_images(params, [0], 1)?;
        let t = dst.tile;
        for y in t.start_y..t.end_y {
            let rows = [src.row(0, y - 1), src.row(0, y), src.row(0, y + 1)];
            let out = dst.row_mut(0, y);
            for x in t.start_x as usize..t.end_x as usize {
                let sum: u32 = rows
                    .iter()
                    .map(|r| u32::from(r[x - 1]) + u32::from(r[x]) + u32::from(r[x + 1]))
                    .sum();
                out[x] = (sum / 9) as u8;
            }
        }
        Ok(())
    })
}

pub(super) fn publish(ctx: &Context, target: &str) -> VxResult<()> {
    let descriptor = KernelDescriptor::tiling(kernel_name("box_3x3"), KERNEL_BOX_3X3, 2, Some(box_fast()), box_flexible())
        .input(ObjectType::Image)
        .output(ObjectType::Image)
        .with_validator(|ctx, _, params, metas| {
            let input = matching_inputs(ctx, params, &[0], &[DfImage::U8])?;
            describe_image(metas, 1, input.width, input.height, DfImage::U8)
        })
        .with_attribute(KernelAttribute::BlockSize(32, 8))
        .with_attribute(KernelAttribute::Neighborhood(Neighborhood::square(1)));
    super::publish(ctx, target, descriptor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{Border, BorderMode, PixelValue, Rectangle};
    use crate::graph::NodeAttribute;
    use crate::target::tiling::{plan_tiles, run_plan, ImageTile, PlannedTile, TileParam};
    use proptest::prelude::*;

    fn staged(width: u32, height: u32, pixels: &[u8], border: Border) -> Vec<TileParam> {
        let mut src = ImageTile::new(width, height, DfImage::U8, border).unwrap();
        src.planes[0].data.copy_from_slice(pixels);
        let dst = ImageTile::new(width, height, DfImage::U8, border).unwrap();
        vec![TileParam::Image(src), TileParam::Image(dst)]
    }

    #[test]
    fn test_box_through_graph() {
        let ctx = Context::create().unwrap();
        let src = ctx.create_image(40, 12, DfImage::U8).unwrap();
        let pixels: Vec<u8> = (0..40 * 12).map(|i| ((i % 40) * 6) as u8).collect();
        ctx.write_image_plane(src, 0, &pixels).unwrap();
        let out = ctx.create_image(40, 12, DfImage::U8).unwrap();
        let graph = ctx.create_graph().unwrap();
        let node = ctx
            .create_node_by_name(graph, &kernel_name("box_3x3"), &[Some(src.0), Some(out.0)])
            .unwrap();
        ctx.set_node_attribute(node, NodeAttribute::Border(Border::replicate())).unwrap();
        ctx.process_graph(graph).unwrap();

        let result = ctx.read_image_plane(out, 0).unwrap();
        // Columns form a ramp, so an interior mean equals the center value.
        assert_eq!(result[5 * 40 + 10], pixels[5 * 40 + 10]);
        // Replicated left edge: (0 + 0 + 6) * 3 / 9.
        assert_eq!(result[5 * 40], 2);
        assert_eq!(ctx.get_valid_region(out).unwrap(), Rectangle::full(40, 12));
    }

    #[test]
    fn test_undefined_border_shrinks_valid_region() {
        let ctx = Context::create().unwrap();
        let src = ctx.create_image(16, 16, DfImage::U8).unwrap();
        let out = ctx.create_image(16, 16, DfImage::U8).unwrap();
        let graph = ctx.create_graph().unwrap();
        let node = ctx
            .create_node_by_name(graph, &kernel_name("box_3x3"), &[Some(src.0), Some(out.0)])
            .unwrap();
        assert_eq!(ctx.query_node(node).unwrap().border.mode, BorderMode::Undefined);
        ctx.process_graph(graph).unwrap();
        assert_eq!(ctx.get_valid_region(out).unwrap(), Rectangle::new(1, 1, 15, 15));
    }

    proptest! {
        #[test]
        fn prop_box_fast_path_matches_flexible(
            blocks_x in 1u32..4,
            blocks_y in 1u32..5,
            pixels in proptest::collection::vec(any::<u8>(), 96 * 32),
            constant in any::<u8>(),
        ) {
            let (w, h) = (blocks_x * 32, blocks_y * 8);
            let pixels = &pixels[..(w * h) as usize];
            let border = Border::constant(PixelValue::U8(constant));

            let mut tiled = staged(w, h, pixels, border);
            let plan = plan_tiles(w, h, 32, 8, Neighborhood::square(1), true);
            run_plan(&plan, &mut tiled, Some(&box_fast()), &box_flexible(), &mut []).unwrap();

            let mut whole = staged(w, h, pixels, border);
            let single = [PlannedTile { rect: Rectangle::full(w, h), fast: false }];
            run_plan(&single, &mut whole, None, &box_flexible(), &mut []).unwrap();

            prop_assert_eq!(&tiled[1], &whole[1]);
        }
    }
}
