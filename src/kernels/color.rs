//! Color conversion and channel extraction on the C-model target.
//!
//! Conversions pass through RGB. YUV uses BT.709 unless the source image is tagged as
//! BT.601, and values are truncated then saturated to `u8`.

use super::{bound, describe_image, image_param, kernel_name, matching_inputs, requested_format};
use super::{KERNEL_CHANNEL_EXTRACT, KERNEL_COLOR_CONVERT};
use crate::core::context::Context;
use crate::core::error::{VxError, VxResult};
use crate::core::reference::{Handle, Image, Node, Scalar};
use crate::core::types::{Channel, ColorSpace, DataType, DfImage, ObjectType, ScalarValue};
use crate::objects::image::ImageInfo;
use crate::target::KernelDescriptor;

const CONVERTIBLE: [DfImage; 4] = [DfImage::Rgb, DfImage::Rgbx, DfImage::Yuv4, DfImage::U8];
const EXTRACTABLE: [DfImage; 3] = [DfImage::Rgb, DfImage::Rgbx, DfImage::Yuv4];

/// Scalar selecting `channel` for a `channel_extract` node.
pub fn channel_scalar(ctx: &Context, channel: Channel) -> VxResult<Scalar> {
    ctx.create_scalar(ScalarValue::Enum(channel.index() as i32))
}

fn sat(value: f64) -> u8 {
    (value as i32).clamp(0, 255) as u8
}

fn yuv_to_rgb(y: u8, u: u8, v: u8, space: ColorSpace) -> [u8; 3] {
    let (y, u, v) = (f64::from(y), f64::from(u) - 128.0, f64::from(v) - 128.0);
    match space {
        ColorSpace::Bt601_525 | ColorSpace::Bt601_625 => {
            [sat(y + 1.403 * v), sat(y - 0.344 * u - 0.714 * v), sat(y + 1.773 * u)]
        }
        _ => [sat(y + 1.5748 * v), sat(y - 0.1873 * u - 0.4681 * v), sat(y + 1.8556 * u)],
    }
}

fn rgb_to_yuv([r, g, b]: [u8; 3]) -> [u8; 3] {
    let (r, g, b) = (f64::from(r), f64::from(g), f64::from(b));
    let y = 0.2126 * r + 0.7152 * g + 0.0722 * b;
    let u = -0.1146 * r - 0.3854 * g + 0.5 * b;
    let v = 0.5 * r - 0.4542 * g - 0.0458 * b;
    [sat(y), ((u as i32) + 128).clamp(0, 255) as u8, ((v as i32) + 128).clamp(0, 255) as u8]
}

fn load_rgb(ctx: &Context, image: Image, info: &ImageInfo) -> VxResult<Vec<[u8; 3]>> {
    Ok(match info.format {
        DfImage::Rgb => ctx.read_image_plane(image, 0)?.chunks_exact(3).map(|p| [p[0], p[1], p[2]]).collect(),
        DfImage::Rgbx => ctx.read_image_plane(image, 0)?.chunks_exact(4).map(|p| [p[0], p[1], p[2]]).collect(),
        DfImage::U8 => ctx.read_image_plane(image, 0)?.into_iter().map(|p| [p, p, p]).collect(),
        DfImage::Yuv4 => {
            let (y, u, v) = (ctx.read_image_plane(image, 0)?, ctx.read_image_plane(image, 1)?, ctx.read_image_plane(image, 2)?);
            y.iter()
                .zip(&u)
                .zip(&v)
                .map(|((y, u), v)| yuv_to_rgb(*y, *u, *v, info.space))
                .collect()
        }
        _ => return Err(VxError::InvalidFormat),
    })
}

fn store_rgb(ctx: &Context, image: Image, format: DfImage, pixels: &[[u8; 3]]) -> VxResult<()> {
    match format {
        DfImage::Rgb => ctx.write_image_plane(image, 0, &pixels.concat()),
        DfImage::Rgbx => {
            let bytes: Vec<u8> = pixels.iter().flat_map(|[r, g, b]| [*r, *g, *b, 255]).collect();
            ctx.write_image_plane(image, 0, &bytes)
        }
        DfImage::U8 => {
            let luma: Vec<u8> = pixels.iter().map(|p| rgb_to_yuv(*p)[0]).collect();
            ctx.write_image_plane(image, 0, &luma)
        }
        DfImage::Yuv4 => {
            let yuv: Vec<[u8; 3]> = pixels.iter().map(|p| rgb_to_yuv(*p)).collect();
            for plane in 0..3 {
                let bytes: Vec<u8> = yuv.iter().map(|p| p[plane]).collect();
                ctx.write_image_plane(image, plane, &bytes)?;
            }
            ctx.set_image_color_space(image, ColorSpace::Bt709)
        }
        _ => Err(VxError::InvalidFormat),
    }
}

fn color_convert(ctx: &Context, _node: Node, params: &[Option<Handle>]) -> VxResult<()> {
    let (input, output) = (image_param(params, 0)?, image_param(params, 1)?);
    let (src, dst) = (ctx.query_image(input)?, ctx.query_image(output)?);
    let pixels = load_rgb(ctx, input, &src)?;
    store_rgb(ctx, output, dst.format, &pixels)?;
    ctx.set_image_valid_rectangle(output, Some(ctx.get_valid_region(input)?))
}

fn channel_of(ctx: &Context, params: &[Option<Handle>]) -> VxResult<usize> {
    match ctx.read_scalar(Scalar(bound(params, 1)?))? {
        ScalarValue::Enum(index) => usize::try_from(index).map_err(|_| VxError::InvalidValue),
        _ => Err(VxError::InvalidType),
    }
}

fn channel_count(format: DfImage) -> usize {
    match format {
        DfImage::Rgbx => 4,
        _ => 3,
    }
}

fn channel_extract(ctx: &Context, _node: Node, params: &[Option<Handle>]) -> VxResult<()> {
    let (input, output) = (image_param(params, 0)?, image_param(params, 2)?);
    let info = ctx.query_image(input)?;
    let channel = channel_of(ctx, params)?;
    if channel >= channel_count(info.format) {
        return Err(VxError::InvalidValue);
    }
    let bytes = match info.format {
        DfImage::Yuv4 => ctx.read_image_plane(input, channel)?,
        format => {
            let step = channel_count(format);
            ctx.read_image_plane(input, 0)?.iter().skip(channel).step_by(step).copied().collect()
        }
    };
    ctx.write_image_plane(output, 0, &bytes)?;
    ctx.set_image_valid_rectangle(output, Some(ctx.get_valid_region(input)?))
}

pub(super) fn publish(ctx: &Context, target: &str) -> VxResult<()> {
    let convert = KernelDescriptor::function(kernel_name("color_convert"), KERNEL_COLOR_CONVERT, 2, color_convert)
        .input(ObjectType::Image)
        .output(ObjectType::Image)
        .with_validator(|ctx, _, params, metas| {
            let input = matching_inputs(ctx, params, &[0], &CONVERTIBLE)?;
            let format = requested_format(ctx, params, 1, DfImage::U8)?;
            if !CONVERTIBLE.contains(&format) || format == input.format {
                return Err(VxError::InvalidFormat);
            }
            describe_image(metas, 1, input.width, input.height, format)
        });
    super::publish(ctx, target, convert)?;

    let extract = KernelDescriptor::function(kernel_name("channel_extract"), KERNEL_CHANNEL_EXTRACT, 3, channel_extract)
        .input(ObjectType::Image)
        .input(ObjectType::Scalar)
        .output(ObjectType::Image)
        .with_validator(|ctx, _, params, metas| {
            let input = matching_inputs(ctx, params, &[0], &EXTRACTABLE)?;
            if ctx.query_scalar_type(Scalar(bound(params, 1)?))? != DataType::Enum {
                return Err(VxError::InvalidType);
            }
            if channel_of(ctx, params)? >= channel_count(input.format) {
                return Err(VxError::InvalidValue);
            }
            if requested_format(ctx, params, 2, DfImage::U8)? != DfImage::U8 {
                return Err(VxError::InvalidFormat);
            }
            describe_image(metas, 2, input.width, input.height, DfImage::U8)
        });
    super::publish(ctx, target, extract)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn primaries(ctx: &Context) -> Image {
        let image = ctx.create_image(3, 1, DfImage::Rgb).unwrap();
        ctx.write_image_plane(image, 0, &[255, 0, 0, 0, 255, 0, 0, 0, 255]).unwrap();
        image
    }

    #[test]
    fn test_virtual_output_takes_input_size() {
        let ctx = Context::create().unwrap();
        let input = ctx.create_image(32, 32, DfImage::Rgb).unwrap();
        let graph = ctx.create_graph().unwrap();
        let gray = ctx.create_virtual_image(graph, 0, 0, DfImage::Virt).unwrap();
        ctx.create_node_by_name(graph, &kernel_name("color_convert"), &[Some(input.0), Some(gray.0)])
            .unwrap();
        ctx.verify_graph(graph).unwrap();

        let info = ctx.query_image(gray).unwrap();
        assert_eq!((info.width, info.height, info.format), (32, 32, DfImage::U8));
    }

    #[test]
    fn test_rgb_to_luma() {
        let ctx = Context::create().unwrap();
        let input = primaries(&ctx);
        let out = ctx.create_image(3, 1, DfImage::U8).unwrap();
        let graph = ctx.create_graph().unwrap();
        ctx.create_node_by_name(graph, &kernel_name("color_convert"), &[Some(input.0), Some(out.0)])
            .unwrap();
        ctx.process_graph(graph).unwrap();
        assert_eq!(ctx.read_image_plane(out, 0).unwrap(), vec![54, 182, 18]);
    }

    #[test]
    fn test_yuv4_output_is_tagged_bt709() {
        let ctx = Context::create().unwrap();
        let input = primaries(&ctx);
        let out = ctx.create_image(3, 1, DfImage::Yuv4).unwrap();
        let graph = ctx.create_graph().unwrap();
        ctx.create_node_by_name(graph, &kernel_name("color_convert"), &[Some(input.0), Some(out.0)])
            .unwrap();
        ctx.process_graph(graph).unwrap();
        assert_eq!(ctx.query_image(out).unwrap().space, ColorSpace::Bt709);
        assert_eq!(ctx.read_image_plane(out, 0).unwrap(), vec![54, 182, 18]);
        // Blue pushes U up, red pushes V up.
        let (u, v) = (ctx.read_image_plane(out, 1).unwrap(), ctx.read_image_plane(out, 2).unwrap());
        assert!(u[2] > 200 && v[0] > 200);
    }

    #[test]
    fn test_same_format_rejected() {
        let ctx = Context::create().unwrap();
        let input = ctx.create_image(4, 4, DfImage::Rgb).unwrap();
        let out = ctx.create_image(4, 4, DfImage::Rgb).unwrap();
        let graph = ctx.create_graph().unwrap();
        ctx.create_node_by_name(graph, &kernel_name("color_convert"), &[Some(input.0), Some(out.0)])
            .unwrap();
        assert_eq!(ctx.verify_graph(graph), Err(VxError::InvalidFormat));
    }

    #[test]
    fn test_extract_channels() {
        let ctx = Context::create().unwrap();
        let input = ctx.create_image(2, 1, DfImage::Rgbx).unwrap();
        ctx.write_image_plane(input, 0, &[1, 2, 3, 4, 5, 6, 7, 8]).unwrap();
        for (channel, expected) in [(Channel::G, vec![2, 6]), (Channel::A, vec![4, 8])] {
            let selector = channel_scalar(&ctx, channel).unwrap();
            let out = ctx.create_image(2, 1, DfImage::U8).unwrap();
            let graph = ctx.create_graph().unwrap();
            ctx.create_node_by_name(
                graph,
                &kernel_name("channel_extract"),
                &[Some(input.0), Some(selector.0), Some(out.0)],
            )
            .unwrap();
            ctx.process_graph(graph).unwrap();
            assert_eq!(ctx.read_image_plane(out, 0).unwrap(), expected);
        }
    }

    #[test]
    fn test_alpha_of_rgb_is_invalid() {
        let ctx = Context::create().unwrap();
        let input = ctx.create_image(2, 2, DfImage::Rgb).unwrap();
        let selector = channel_scalar(&ctx, Channel::A).unwrap();
        let out = ctx.create_image(2, 2, DfImage::U8).unwrap();
        let graph = ctx.create_graph().unwrap();
        ctx.create_node_by_name(graph, &kernel_name("channel_extract"), &[Some(input.0), Some(selector.0), Some(out.0)])
            .unwrap();
        assert_eq!(ctx.verify_graph(graph), Err(VxError::InvalidValue));
    }
}
