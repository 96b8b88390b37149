//! Object arrays: a fixed number of homogeneous objects cloned from an exemplar.

use crate::core::context::Context;
use crate::core::error::{StatusFold, VxError, VxResult};
use crate::core::reference::{AsHandle, Creation, Graph, Handle, ObjectArray, ObjectData, Payload, RefType};
use crate::core::types::ObjectType;

pub struct ObjectArrayData {
    pub item_type: ObjectType,
    /// Items, each holding an internal count.
    pub items: Vec<Handle>,
}

impl Payload for ObjectArrayData {
    fn project(data: &mut ObjectData) -> Option<&mut Self> {
        match data {
            ObjectData::ObjectArray(d) => Some(d),
            _ => None,
        }
    }

    fn children(&self) -> Vec<Handle> {
        self.items.clone()
    }
}

fn item_kind_allowed(kind: ObjectType) -> bool {
    kind.is_data_object() && !matches!(kind, ObjectType::ObjectArray | ObjectType::Delay)
}

impl Context {
    /// `count` objects shaped like `exemplar`.
    pub fn create_object_array(&self, exemplar: impl AsHandle, count: usize) -> VxResult<ObjectArray> {
        self.build_object_array(exemplar.handle(), count, None)
    }

    /// Graph-scoped object array; image, array, pyramid and tensor items are virtual.
    pub fn create_virtual_object_array(&self, graph: Graph, exemplar: impl AsHandle, count: usize) -> VxResult<ObjectArray> {
        self.object_of(graph.handle(), ObjectType::Graph)?;
        self.build_object_array(exemplar.handle(), count, Some(graph))
    }

    fn build_object_array(&self, exemplar: Handle, count: usize, scope: Option<Graph>) -> VxResult<ObjectArray> {
        let kind = self.object_type(exemplar)?;
        if !item_kind_allowed(kind) {
            return Err(VxError::InvalidType);
        }
        if count == 0 {
            return Err(VxError::InvalidParameters);
        }
        let meta = self.describe(exemplar)?;
        let mut items = Vec::with_capacity(count);
        for _ in 0..count {
            match self.create_from_meta(&meta, scope).and_then(|h| self.adopt(h).map(|_| h)) {
                Ok(h) => items.push(h),
                Err(e) => {
                    let mut fold = StatusFold::new();
                    for h in items {
                        fold.push(self.decrement(h, RefType::Internal));
                    }
                    return Err(e);
                }
            }
        }
        let creation = match scope {
            Some(g) => Creation::virtual_in(ObjectType::ObjectArray, g.handle()),
            None => Creation::external(ObjectType::ObjectArray),
        };
        let data = ObjectArrayData {
            item_type: kind,
            items: items.clone(),
        };
        let handle = match self.create_reference(creation, ObjectData::ObjectArray(data)) {
            Ok(h) => h,
            Err(e) => {
                for h in items {
                    let _ = self.decrement(h, RefType::Internal);
                }
                return Err(e);
            }
        };
        for &item in &items {
            if kind == ObjectType::Image {
                self.with_payload::<crate::objects::image::ImageData, _>(item, |d| {
                    d.owner = Some(handle);
                    Ok(())
                })?;
            }
        }
        Ok(ObjectArray(handle))
    }

    /// `(item_type, count)`.
    pub fn query_object_array(&self, array: ObjectArray) -> VxResult<(ObjectType, usize)> {
        self.with_payload::<ObjectArrayData, _>(array.handle(), |d| Ok((d.item_type, d.items.len())))
    }

    /// Item `index`. The caller receives a count and must release it.
    pub fn get_object_array_item(&self, array: ObjectArray, index: usize) -> VxResult<Handle> {
        let item = self.with_payload::<ObjectArrayData, _>(array.handle(), |d| {
            d.items.get(index).copied().ok_or(VxError::InvalidParameters)
        })?;
        self.increment(item, RefType::External)?;
        Ok(item)
    }

    pub(crate) fn object_array_items(&self, array: ObjectArray) -> VxResult<Vec<Handle>> {
        self.with_payload::<ObjectArrayData, _>(array.handle(), |d| Ok(d.items.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::reference::{Image, Scalar};
    use crate::core::types::{DfImage, ScalarValue};

    #[test]
    fn test_items_follow_exemplar() {
        let ctx = Context::create().unwrap();
        let exemplar = ctx.create_image(5, 3, DfImage::S16).unwrap();
        let arr = ctx.create_object_array(exemplar, 4).unwrap();
        assert_eq!(ctx.query_object_array(arr).unwrap(), (ObjectType::Image, 4));
        let item = ctx.get_object_array_item(arr, 3).unwrap();
        let info = ctx.query_image(Image(item)).unwrap();
        assert_eq!((info.width, info.height, info.format), (5, 3, DfImage::S16));
        assert_eq!(ctx.get_object_array_item(arr, 4), Err(VxError::InvalidParameters));
        ctx.release_reference(item).unwrap();

        let items = ctx.object_array_items(arr).unwrap();
        ctx.release(arr).unwrap();
        assert!(items.iter().all(|&h| !ctx.is_valid(h)));
    }

    #[test]
    fn test_scalar_items_and_rejected_kinds() {
        let ctx = Context::create().unwrap();
        let s = ctx.create_scalar(ScalarValue::UInt16(9)).unwrap();
        let arr = ctx.create_object_array(s, 2).unwrap();
        let item = ctx.get_object_array_item(arr, 0).unwrap();
        assert_eq!(ctx.read_scalar(Scalar(item)).unwrap(), ScalarValue::UInt16(0));
        assert_eq!(ctx.create_object_array(arr, 2), Err(VxError::InvalidType));
        assert_eq!(ctx.create_object_array(s, 0), Err(VxError::InvalidParameters));
    }
}
