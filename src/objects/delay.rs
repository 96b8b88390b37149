//! Delays: rings of same-shaped objects that rotate together.
//!
//! Logical index 0 is the current slot, -1 the previous one, down to `-(count - 1)`.
//! Node parameters bound to a slot are recorded with their logical position, so aging
//! can move every binding one step back in time.

use crate::core::context::Context;
use crate::core::error::{StatusFold, VxError, VxResult};
use crate::core::meta::MetaInfo;
use crate::core::reference::{
    AsHandle, Creation, Delay, DelayLink, Handle, Node, ObjectArray, ObjectData, Payload, Pyramid, RefType,
};
use crate::core::types::ObjectType;
use serde::{Deserialize, Serialize};

/// A node parameter bound to a delay slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelayBinding {
    pub node: Node,
    pub index: u32,
    /// Logical position (`-index`) the parameter was bound at.
    pub position: usize,
}

pub struct DelayData {
    pub kind: ObjectType,
    /// Slot objects, each holding an internal count.
    pub refs: Vec<Handle>,
    /// Physical slot of logical index 0.
    pub index: usize,
    pub bindings: Vec<DelayBinding>,
    /// Per-level delays of a pyramid delay, each holding an internal count.
    pub sub_delays: Vec<Delay>,
    pub parent: Option<Delay>,
}

impl DelayData {
    fn physical(&self, position: usize) -> usize {
        (self.index + position) % self.refs.len()
    }

    fn position_of(&self, slot: usize) -> usize {
        (slot + self.refs.len() - self.index) % self.refs.len()
    }
}

impl Payload for DelayData {
    fn project(data: &mut ObjectData) -> Option<&mut Self> {
        match data {
            ObjectData::Delay(d) => Some(d),
            _ => None,
        }
    }

    fn children(&self) -> Vec<Handle> {
        self.refs
            .iter()
            .copied()
            .chain(self.sub_delays.iter().map(|d| d.handle()))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelayInfo {
    pub object_type: ObjectType,
    pub count: usize,
}

impl Context {
    /// Ring of `count` objects shaped like `exemplar`.
    pub fn create_delay(&self, exemplar: impl AsHandle, count: usize) -> VxResult<Delay> {
        let exemplar = exemplar.handle();
        let kind = self.object_type(exemplar)?;
        if !kind.is_data_object() || kind == ObjectType::Delay {
            return Err(VxError::InvalidType);
        }
        if count == 0 {
            return Err(VxError::InvalidParameters);
        }
        let meta = self.describe(exemplar)?;
        let mut refs = Vec::with_capacity(count);
        for _ in 0..count {
            let slot = self
                .create_slot(exemplar, &meta)
                .and_then(|h| self.adopt(h).map(|_| h));
            match slot {
                Ok(h) => refs.push(h),
                Err(e) => {
                    let mut fold = StatusFold::new();
                    for h in refs {
                        fold.push(self.decrement(h, RefType::Internal));
                    }
                    return Err(e);
                }
            }
        }
        let data = DelayData {
            kind,
            refs: refs.clone(),
            index: 0,
            bindings: Vec::new(),
            sub_delays: Vec::new(),
            parent: None,
        };
        let handle = match self.create_reference(Creation::external(ObjectType::Delay), ObjectData::Delay(data)) {
            Ok(h) => h,
            Err(e) => {
                for h in refs {
                    let _ = self.decrement(h, RefType::Internal);
                }
                return Err(e);
            }
        };
        let delay = Delay(handle);
        self.link_slots(delay, &refs)?;
        if kind == ObjectType::Pyramid {
            if let Err(e) = self.create_level_delays(delay, &refs) {
                let _ = self.release(delay);
                return Err(e);
            }
        }
        log::debug!("created delay {} of {} {}(s)", delay, count, kind);
        Ok(delay)
    }

    fn create_slot(&self, exemplar: Handle, meta: &MetaInfo) -> VxResult<Handle> {
        match meta {
            MetaInfo::ObjectArray { count, .. } => {
                let items = self.object_array_items(ObjectArray(exemplar))?;
                let first = items.first().copied().ok_or(VxError::InvalidParameters)?;
                Ok(self.create_object_array(first, *count)?.handle())
            }
            _ => self.create_from_meta(meta, None),
        }
    }

    fn link_slots(&self, delay: Delay, refs: &[Handle]) -> VxResult<()> {
        for (slot, h) in refs.iter().enumerate() {
            self.with_header(*h, |hd| {
                hd.delay = Some(DelayLink {
                    delay: delay.handle(),
                    slot,
                })
            })?;
        }
        Ok(())
    }

    /// One image delay per pyramid level, aged along with the pyramid delay.
    fn create_level_delays(&self, delay: Delay, pyramids: &[Handle]) -> VxResult<()> {
        let levels: Vec<Vec<Handle>> = pyramids
            .iter()
            .map(|p| self.pyramid_levels(Pyramid(*p)))
            .collect::<VxResult<_>>()?;
        let depth = levels.first().map(Vec::len).unwrap_or(0);
        let mut subs = Vec::with_capacity(depth);
        for level in 0..depth {
            let refs: Vec<Handle> = levels.iter().map(|l| l[level]).collect();
            for h in &refs {
                self.increment(*h, RefType::Internal)?;
            }
            let data = DelayData {
                kind: ObjectType::Image,
                refs: refs.clone(),
                index: 0,
                bindings: Vec::new(),
                sub_delays: Vec::new(),
                parent: Some(delay),
            };
            let sub = match self.create_reference(Creation::internal(ObjectType::Delay, self.handle()), ObjectData::Delay(data)) {
                Ok(h) => Delay(h),
                Err(e) => {
                    for h in refs {
                        let _ = self.decrement(h, RefType::Internal);
                    }
                    return Err(e);
                }
            };
            subs.push(sub);
            self.with_payload::<DelayData, _>(delay.handle(), |d| {
                d.sub_delays.push(sub);
                Ok(())
            })?;
            self.link_slots(sub, &refs)?;
        }
        log::trace!("delay {} tracks {} pyramid level(s)", delay, subs.len());
        Ok(())
    }

    pub fn query_delay(&self, delay: Delay) -> VxResult<DelayInfo> {
        self.with_payload::<DelayData, _>(delay.handle(), |d| {
            Ok(DelayInfo {
                object_type: d.kind,
                count: d.refs.len(),
            })
        })
    }

    /// Object at logical `index` (0 current, -1 previous, ...). No count is added.
    pub fn get_reference_from_delay(&self, delay: Delay, index: i32) -> VxResult<Handle> {
        self.with_payload::<DelayData, _>(delay.handle(), |d| {
            let position = index.unsigned_abs() as usize;
            if index > 0 || position >= d.refs.len() {
                return Err(VxError::InvalidParameters);
            }
            Ok(d.refs[d.physical(position)])
        })
    }

    /// Rotate the ring one step and rebind every node parameter bound to it.
    ///
    /// The object at index 0 moves to -1, and the oldest object becomes index 0.
    pub fn age_delay(&self, delay: Delay) -> VxResult<()> {
        let (rebinds, subs) = self.with_payload::<DelayData, _>(delay.handle(), |d| {
            let count = d.refs.len();
            d.index = (d.index + count - 1) % count;
            let rebinds: Vec<(Node, u32, Handle)> = d
                .bindings
                .iter()
                .map(|b| (b.node, b.index, d.refs[d.physical(b.position)]))
                .collect();
            Ok((rebinds, d.sub_delays.clone()))
        })?;
        for (node, index, value) in rebinds {
            self.rebind_node_parameter(node, index, value)?;
        }
        for sub in subs {
            self.age_delay(sub)?;
        }
        log::trace!("aged delay {}", delay);
        Ok(())
    }

    /// Record that `node` parameter `index` now binds `handle`, if it is a delay slot.
    pub(crate) fn delay_bind(&self, handle: Handle, node: Node, index: u32) -> VxResult<()> {
        let Some(link) = self.with_header(handle, |h| h.delay)? else {
            return Ok(());
        };
        let bound = self.with_payload::<DelayData, _>(link.delay, |d| {
            let position = d.position_of(link.slot);
            d.bindings.push(DelayBinding { node, index, position });
            Ok(())
        });
        match bound {
            // The delay was released; its former slots behave as plain objects.
            Err(VxError::InvalidReference) => Ok(()),
            other => other,
        }
    }

    pub(crate) fn delay_unbind(&self, handle: Handle, node: Node, index: u32) {
        let Ok(Some(link)) = self.with_header(handle, |h| h.delay) else {
            return;
        };
        let _ = self.with_payload::<DelayData, _>(link.delay, |d| {
            d.bindings.retain(|b| b.node != node || b.index != index);
            Ok(())
        });
    }

    pub(crate) fn delay_bindings(&self, delay: Delay) -> VxResult<Vec<DelayBinding>> {
        self.with_payload::<DelayData, _>(delay.handle(), |d| Ok(d.bindings.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{DataType, DfImage, ScalarValue, SCALE_PYRAMID_HALF};
    use crate::kernels::KERNEL_AND;

    #[test]
    fn test_index_convention() {
        let ctx = Context::create().unwrap();
        let exemplar = ctx.create_scalar_of(DataType::Int32).unwrap();
        let delay = ctx.create_delay(exemplar, 3).unwrap();
        assert_eq!(
            ctx.query_delay(delay).unwrap(),
            DelayInfo {
                object_type: ObjectType::Scalar,
                count: 3
            }
        );
        let slots: Vec<Handle> = (0..3).map(|i| ctx.get_reference_from_delay(delay, -i).unwrap()).collect();
        assert!(ctx.get_reference_from_delay(delay, 1).is_err());
        assert!(ctx.get_reference_from_delay(delay, -3).is_err());

        ctx.age_delay(delay).unwrap();
        assert_eq!(ctx.get_reference_from_delay(delay, -1).unwrap(), slots[0]);
        assert_eq!(ctx.get_reference_from_delay(delay, -2).unwrap(), slots[1]);
        assert_eq!(ctx.get_reference_from_delay(delay, 0).unwrap(), slots[2]);

        let link = ctx.query_reference(slots[1]).unwrap().delay.unwrap();
        assert_eq!((link.delay, link.slot), (delay.handle(), 1));
    }

    #[test]
    fn test_aging_rebinds_node_parameters() {
        let ctx = Context::create().unwrap();
        let graph = ctx.create_graph().unwrap();
        let exemplar = ctx.create_image(8, 8, DfImage::U8).unwrap();
        let delay = ctx.create_delay(exemplar, 2).unwrap();
        let kernel = ctx.get_kernel_by_enum(KERNEL_AND).unwrap();
        let node = ctx.create_generic_node(graph, kernel).unwrap();

        let current = ctx.get_reference_from_delay(delay, 0).unwrap();
        let previous = ctx.get_reference_from_delay(delay, -1).unwrap();
        ctx.set_parameter_by_index(node, 0, previous).unwrap();
        ctx.set_parameter_by_index(node, 2, current).unwrap();
        assert_eq!(ctx.delay_bindings(delay).unwrap().len(), 2);

        ctx.age_delay(delay).unwrap();
        assert_eq!(ctx.node_parameter(node, 0).unwrap().value, Some(current));
        assert_eq!(ctx.node_parameter(node, 2).unwrap().value, Some(previous));
        assert_eq!(ctx.query_reference(current).unwrap().internal_count, 2);

        let plain = ctx.create_image(8, 8, DfImage::U8).unwrap();
        ctx.set_parameter_by_index(node, 0, plain).unwrap();
        assert_eq!(ctx.delay_bindings(delay).unwrap().len(), 1);
        ctx.release(node).unwrap();
        ctx.release(graph).unwrap();
        assert!(ctx.delay_bindings(delay).unwrap().is_empty());
    }

    #[test]
    fn test_pyramid_levels_age_together() {
        let ctx = Context::create().unwrap();
        let exemplar = ctx.create_pyramid(2, SCALE_PYRAMID_HALF, 8, 8, DfImage::U8).unwrap();
        let delay = ctx.create_delay(exemplar, 2).unwrap();
        let p0 = ctx.get_reference_from_delay(delay, 0).unwrap();
        let level = ctx.pyramid_levels(Pyramid(p0)).unwrap()[1];
        let link = ctx.query_reference(level).unwrap().delay.unwrap();
        assert_ne!(link.delay, delay.handle());

        let sub = Delay(link.delay);
        assert_eq!(ctx.get_reference_from_delay(sub, 0).unwrap(), level);
        ctx.age_delay(delay).unwrap();
        assert_eq!(ctx.get_reference_from_delay(sub, -1).unwrap(), level);
        assert_eq!(ctx.get_reference_from_delay(delay, -1).unwrap(), p0);

        ctx.release(delay).unwrap();
        assert!(!ctx.is_valid(sub));
        assert!(!ctx.is_valid(level));
    }

    #[test]
    fn test_rejects_bad_exemplars() {
        let ctx = Context::create().unwrap();
        let s = ctx.create_scalar(ScalarValue::UInt8(0)).unwrap();
        assert_eq!(ctx.create_delay(s, 0), Err(VxError::InvalidParameters));
        let d = ctx.create_delay(s, 2).unwrap();
        assert_eq!(ctx.create_delay(d, 2), Err(VxError::InvalidType));
        let graph = ctx.create_graph().unwrap();
        assert_eq!(ctx.create_delay(graph, 2), Err(VxError::InvalidType));
    }
}
