//! Generic object copy.

use super::{bound, kernel_name, KERNEL_COPY};
use crate::core::context::Context;
use crate::core::error::{VxError, VxResult};
use crate::core::reference::{Array, Handle, Image, Node, Scalar, Tensor, UserData};
use crate::core::types::{ObjectType, Usage};
use crate::target::KernelDescriptor;

fn copy_function(ctx: &Context, _node: Node, params: &[Option<Handle>]) -> VxResult<()> {
    let (input, output) = (bound(params, 0)?, bound(params, 1)?);
    match ctx.object_type(input)? {
        ObjectType::Image => {
            let (src, dst) = (Image(input), Image(output));
            for plane in 0..ctx.query_image(src)?.planes {
                ctx.write_image_plane(dst, plane, &ctx.read_image_plane(src, plane)?)?;
            }
            ctx.set_image_valid_rectangle(dst, Some(ctx.get_valid_region(src)?))
        }
        ObjectType::Scalar => ctx.write_scalar(Scalar(output), ctx.read_scalar(Scalar(input))?),
        ObjectType::Array => {
            let (_, bytes) = ctx.array_snapshot(Array(input))?;
            ctx.array_commit(Array(output), &bytes)
        }
        ObjectType::Tensor => {
            let (_, bytes) = ctx.tensor_snapshot(Tensor(input))?;
            ctx.tensor_commit(Tensor(output), &bytes)
        }
        ObjectType::UserData => {
            let mut bytes = vec![0u8; ctx.query_user_data_object(UserData(input))?.size];
            ctx.copy_user_data_object(UserData(input), 0, &mut bytes, Usage::ReadOnly)?;
            ctx.copy_user_data_object(UserData(output), 0, &mut bytes, Usage::WriteOnly)
        }
        _ => Err(VxError::NotSupported),
    }
}

pub(super) fn publish(ctx: &Context, target: &str) -> VxResult<()> {
    let descriptor = KernelDescriptor::function(kernel_name("copy"), KERNEL_COPY, 2, copy_function)
        .input(ObjectType::Reference)
        .output(ObjectType::Reference)
        .with_validator(|ctx, _, params, metas| {
            let (input, output) = (bound(params, 0)?, bound(params, 1)?);
            let kind = ctx.object_type(input)?;
            if kind != ctx.object_type(output)? {
                return Err(VxError::InvalidType);
            }
            if !matches!(
                kind,
                ObjectType::Image | ObjectType::Scalar | ObjectType::Array | ObjectType::Tensor | ObjectType::UserData
            ) {
                return Err(VxError::NotSupported);
            }
            match metas.get_mut(1).and_then(Option::as_mut) {
                Some(meta) => meta.set_from_reference(ctx, input),
                None => Ok(()),
            }
        });
    super::publish(ctx, target, descriptor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{DataType, DfImage, Rectangle, ScalarValue};

    fn run_copy(ctx: &Context, input: Handle, output: Handle) -> VxResult<()> {
        let graph = ctx.create_graph()?;
        ctx.create_node_by_name(graph, &kernel_name("copy"), &[Some(input), Some(output)])?;
        ctx.process_graph(graph)
    }

    #[test]
    fn test_copy_image_keeps_valid_region() {
        let ctx = Context::create().unwrap();
        let src = ctx.create_image(6, 4, DfImage::U8).unwrap();
        let pixels: Vec<u8> = (0..24).collect();
        ctx.write_image_plane(src, 0, &pixels).unwrap();
        ctx.set_image_valid_rectangle(src, Some(Rectangle::new(1, 1, 5, 3))).unwrap();
        let dst = ctx.create_image(6, 4, DfImage::U8).unwrap();

        run_copy(&ctx, src.0, dst.0).unwrap();
        assert_eq!(ctx.read_image_plane(dst, 0).unwrap(), pixels);
        assert_eq!(ctx.get_valid_region(dst).unwrap(), Rectangle::new(1, 1, 5, 3));
    }

    #[test]
    fn test_copy_scalar_and_array() {
        let ctx = Context::create().unwrap();
        let a = ctx.create_scalar(ScalarValue::Int32(-7)).unwrap();
        let b = ctx.create_scalar(ScalarValue::Int32(0)).unwrap();
        run_copy(&ctx, a.0, b.0).unwrap();
        assert_eq!(ctx.read_scalar(b).unwrap(), ScalarValue::Int32(-7));

        let src = ctx.create_array(DataType::UInt16, 8).unwrap();
        ctx.add_array_items_of::<u16>(src, &[1, 2, 3]).unwrap();
        let dst = ctx.create_array(DataType::UInt16, 8).unwrap();
        run_copy(&ctx, src.0, dst.0).unwrap();
        assert_eq!(ctx.read_array_items::<u16>(dst).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_copy_user_data_into_virtual_blob() {
        let ctx = Context::create().unwrap();
        let src = ctx.create_user_data_object("state", 4, Some(&[4, 3, 2, 1])).unwrap();
        let graph = ctx.create_graph().unwrap();
        let middle = ctx.create_virtual_user_data_object(graph, "", 0).unwrap();
        let dst = ctx.create_user_data_object("state", 4, None).unwrap();
        ctx.create_node_by_name(graph, &kernel_name("copy"), &[Some(src.0), Some(middle.0)]).unwrap();
        ctx.create_node_by_name(graph, &kernel_name("copy"), &[Some(middle.0), Some(dst.0)]).unwrap();
        ctx.process_graph(graph).unwrap();

        let mut out = [0u8; 4];
        ctx.copy_user_data_object(dst, 0, &mut out, Usage::ReadOnly).unwrap();
        assert_eq!(out, [4, 3, 2, 1]);
        assert_eq!(ctx.query_user_data_object(middle).unwrap().type_name, "state");

        let wrong = ctx.create_user_data_object("other", 4, None).unwrap();
        assert_eq!(run_copy(&ctx, src.0, wrong.0), Err(VxError::InvalidType));
    }

    #[test]
    fn test_copy_between_kinds_rejected() {
        let ctx = Context::create().unwrap();
        let image = ctx.create_image(2, 2, DfImage::U8).unwrap();
        let scalar = ctx.create_scalar(ScalarValue::UInt8(1)).unwrap();
        assert_eq!(run_copy(&ctx, image.0, scalar.0), Err(VxError::InvalidType));
    }
}
