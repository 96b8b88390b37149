//! Reference model: handles, the object table and the dual-count lifetime rules.
//!
//! Every object lives in the context's [`ReferenceTable`] as an `Arc<RefObject>`. Callers
//! hold [`Handle`]s (slot index + generation + owning context id), never pointers, so a
//! handle to a destroyed object is detected instead of dereferenced. Each object carries
//! two counts:
//! - `external`: held by user-facing handles (`create_*` returns one, `release` drops it)
//! - `internal`: held by framework structures (graph → node, node → parameter, ...)
//!
//! The object is destroyed exactly once, when both counts reach zero.

use crate::core::context::Context;
use crate::core::error::{StatusFold, VxError, VxResult};
use crate::core::types::ObjectType;
use crate::graph::structure::{GraphData, NodeData};
use crate::objects::array::ArrayData;
use crate::objects::delay::DelayData;
use crate::objects::distribution::DistributionData;
use crate::objects::image::ImageData;
use crate::objects::lut::LutData;
use crate::objects::matrix::{ConvolutionData, MatrixData};
use crate::objects::object_array::ObjectArrayData;
use crate::objects::pyramid::PyramidData;
use crate::objects::remap::RemapData;
use crate::objects::scalar::ScalarData;
use crate::objects::tensor::TensorData;
use crate::objects::threshold::ThresholdData;
use crate::objects::user_data::UserObjectData;
use crate::target::kernel::KernelData;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use uuid::Uuid;

const MAGIC_ALIVE: u32 = 0x5658_5246;
const MAGIC_DEAD: u32 = 0xDEAD_0BEC;

/// Unique identifier of a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContextId(pub Uuid);

impl ContextId {
    /// Create a new random context ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ContextId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

/// Generation-checked handle to any object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Handle {
    pub(crate) context: ContextId,
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

impl Handle {
    /// Slot index in the reference table.
    pub fn index(&self) -> u32 {
        self.index
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}.{}", self.context, self.index, self.generation)
    }
}

/// Anything that wraps a [`Handle`].
pub trait AsHandle {
    fn handle(&self) -> Handle;
}

impl AsHandle for Handle {
    fn handle(&self) -> Handle {
        *self
    }
}

/// A handle statically known to point at one object kind.
pub trait TypedReference: AsHandle + Copy {
    /// Object kind behind this handle type.
    const TYPE: ObjectType;

    #[doc(hidden)]
    fn from_handle(handle: Handle) -> Self;
}

macro_rules! typed_handle {
    ($($(#[$meta:meta])* $name:ident => $kind:ident;)*) => {
        $(
            $(#[$meta])*
            #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
            pub struct $name(pub(crate) Handle);

            impl AsHandle for $name {
                fn handle(&self) -> Handle {
                    self.0
                }
            }

            impl TypedReference for $name {
                const TYPE: ObjectType = ObjectType::$kind;

                fn from_handle(handle: Handle) -> Self {
                    Self(handle)
                }
            }

            impl From<$name> for Handle {
                fn from(value: $name) -> Handle {
                    value.0
                }
            }

            impl fmt::Display for $name {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    write!(f, "{}({})", ObjectType::$kind, self.0)
                }
            }
        )*
    };
}

typed_handle! {
    /// Handle to a graph.
    Graph => Graph;
    /// Handle to a node.
    Node => Node;
    /// Handle to a kernel.
    Kernel => Kernel;
    /// Handle to an image.
    Image => Image;
    /// Handle to an array.
    Array => Array;
    /// Handle to a lookup table.
    Lut => Lut;
    /// Handle to a scalar.
    Scalar => Scalar;
    /// Handle to a matrix.
    Matrix => Matrix;
    /// Handle to a convolution.
    Convolution => Convolution;
    /// Handle to a distribution.
    Distribution => Distribution;
    /// Handle to a remap table.
    Remap => Remap;
    /// Handle to an image pyramid.
    Pyramid => Pyramid;
    /// Handle to an object array.
    ObjectArray => ObjectArray;
    /// Handle to a delay.
    Delay => Delay;
    /// Handle to a tensor.
    Tensor => Tensor;
    /// Handle to a threshold.
    Threshold => Threshold;
    /// Handle to a user data object.
    UserData => UserData;
}

/// Which count an increment/decrement touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefType {
    External,
    Internal,
}

/// Back-link from a delay slot object to its delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelayLink {
    /// Owning delay.
    pub delay: Handle,
    /// Physical slot in the delay's ring.
    pub slot: usize,
}

/// Mutable bookkeeping of one object.
#[derive(Debug, Clone)]
pub struct RefHeader {
    pub external: u32,
    pub internal: u32,
    /// Context handle, or the graph a virtual object belongs to.
    pub scope: Handle,
    pub is_virtual: bool,
    pub is_accessible: bool,
    pub delay: Option<DelayLink>,
    pub name: String,
    pub read_count: u64,
    pub write_count: u64,
    /// Graph of every node parameter bound to this object, one entry per binding.
    pub bound_in: Vec<Graph>,
}

/// Type-specific payload of an object.
pub enum ObjectData {
    Context,
    Graph(Box<GraphData>),
    Node(Box<NodeData>),
    Kernel(Box<KernelData>),
    Image(ImageData),
    Array(ArrayData),
    Lut(LutData),
    Scalar(ScalarData),
    Matrix(MatrixData),
    Convolution(ConvolutionData),
    Distribution(DistributionData),
    Remap(RemapData),
    Pyramid(PyramidData),
    ObjectArray(ObjectArrayData),
    Delay(DelayData),
    Tensor(TensorData),
    Threshold(ThresholdData),
    UserData(UserObjectData),
    Released,
}

/// Projection from [`ObjectData`] onto one payload type.
pub trait Payload: Send + 'static {
    fn project(data: &mut ObjectData) -> Option<&mut Self>;

    /// Objects this payload holds an internal count on.
    fn children(&self) -> Vec<Handle> {
        Vec::new()
    }

    /// Bytes charged to the context memory tracker.
    fn storage_bytes(&self) -> usize {
        0
    }
}

macro_rules! dispatch {
    ($data:expr, $p:ident => $body:expr, $default:expr) => {
        match $data {
            ObjectData::Graph($p) => $body,
            ObjectData::Node($p) => $body,
            ObjectData::Kernel($p) => $body,
            ObjectData::Image($p) => $body,
            ObjectData::Array($p) => $body,
            ObjectData::Lut($p) => $body,
            ObjectData::Scalar($p) => $body,
            ObjectData::Matrix($p) => $body,
            ObjectData::Convolution($p) => $body,
            ObjectData::Distribution($p) => $body,
            ObjectData::Remap($p) => $body,
            ObjectData::Pyramid($p) => $body,
            ObjectData::ObjectArray($p) => $body,
            ObjectData::Delay($p) => $body,
            ObjectData::Tensor($p) => $body,
            ObjectData::Threshold($p) => $body,
            ObjectData::UserData($p) => $body,
            ObjectData::Context | ObjectData::Released => $default,
        }
    };
}

impl ObjectData {
    pub fn children(&self) -> Vec<Handle> {
        dispatch!(self, p => p.children(), Vec::new())
    }

    pub fn storage_bytes(&self) -> usize {
        dispatch!(self, p => p.storage_bytes(), 0)
    }
}

/// One live object.
pub struct RefObject {
    pub(crate) kind: ObjectType,
    magic: AtomicU32,
    pub(crate) header: Mutex<RefHeader>,
    pub(crate) data: Mutex<ObjectData>,
}

impl RefObject {
    pub(crate) fn new(kind: ObjectType, header: RefHeader, data: ObjectData) -> Self {
        Self {
            kind,
            magic: AtomicU32::new(MAGIC_ALIVE),
            header: Mutex::new(header),
            data: Mutex::new(data),
        }
    }

    pub(crate) fn is_alive(&self) -> bool {
        self.magic.load(Ordering::Acquire) == MAGIC_ALIVE
    }

    fn kill(&self) {
        self.magic.store(MAGIC_DEAD, Ordering::Release);
    }
}

struct Slot {
    generation: u32,
    object: Option<Arc<RefObject>>,
}

/// Fixed-capacity, generation-checked slot table of every live object.
pub struct ReferenceTable {
    slots: Vec<Slot>,
    free: Vec<u32>,
    capacity: usize,
    live: usize,
}

impl ReferenceTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            capacity,
            live: 0,
        }
    }

    /// Store an object, returning `(index, generation)`.
    pub fn insert(&mut self, object: Arc<RefObject>) -> VxResult<(u32, u32)> {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.object = Some(object);
            self.live += 1;
            return Ok((index, slot.generation));
        }
        if self.slots.len() >= self.capacity {
            return Err(VxError::NoResources);
        }
        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 1,
            object: Some(object),
        });
        self.live += 1;
        Ok((index, 1))
    }

    pub fn get(&self, index: u32, generation: u32) -> Option<Arc<RefObject>> {
        let slot = self.slots.get(index as usize)?;
        if slot.generation != generation {
            return None;
        }
        slot.object.clone()
    }

    /// Free a slot; the generation bump invalidates every outstanding handle to it.
    pub fn remove(&mut self, index: u32, generation: u32) -> Option<Arc<RefObject>> {
        let slot = self.slots.get_mut(index as usize)?;
        if slot.generation != generation {
            return None;
        }
        let object = slot.object.take()?;
        slot.generation = slot.generation.wrapping_add(1).max(1);
        self.free.push(index);
        self.live -= 1;
        Some(object)
    }

    /// `(index, generation, object)` of every live slot.
    pub fn live_objects(&self) -> Vec<(u32, u32, Arc<RefObject>)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.object.clone().map(|o| (i as u32, s.generation, o)))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }
}

/// Snapshot of an object's bookkeeping, returned by `query_reference`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceInfo {
    pub object_type: ObjectType,
    pub external_count: u32,
    pub internal_count: u32,
    pub name: String,
    pub is_virtual: bool,
    pub is_accessible: bool,
    pub read_count: u64,
    pub write_count: u64,
    pub scope: Handle,
    pub delay: Option<DelayLink>,
}

/// How a new object starts out.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Creation {
    pub kind: ObjectType,
    pub reftype: RefType,
    pub scope: Option<Handle>,
    pub is_virtual: bool,
}

impl Creation {
    pub fn external(kind: ObjectType) -> Self {
        Self {
            kind,
            reftype: RefType::External,
            scope: None,
            is_virtual: false,
        }
    }

    pub fn internal(kind: ObjectType, scope: Handle) -> Self {
        Self {
            kind,
            reftype: RefType::Internal,
            scope: Some(scope),
            is_virtual: false,
        }
    }

    /// Externally held, scoped to `scope` (nodes are scoped to their graph).
    pub fn scoped(kind: ObjectType, scope: Handle) -> Self {
        Self {
            kind,
            reftype: RefType::External,
            scope: Some(scope),
            is_virtual: false,
        }
    }

    pub fn virtual_in(kind: ObjectType, graph: Handle) -> Self {
        Self {
            kind,
            reftype: RefType::External,
            scope: Some(graph),
            is_virtual: true,
        }
    }
}

// ============================================================================
// Lifetime management
// ============================================================================

impl Context {
    /// Allocate a table slot for a new object with one count of the requested kind.
    pub(crate) fn create_reference(&self, creation: Creation, data: ObjectData) -> VxResult<Handle> {
        let header = RefHeader {
            external: u32::from(creation.reftype == RefType::External),
            internal: u32::from(creation.reftype == RefType::Internal),
            scope: creation.scope.unwrap_or_else(|| self.handle()),
            is_virtual: creation.is_virtual,
            is_accessible: !creation.is_virtual,
            delay: None,
            name: String::new(),
            read_count: 0,
            write_count: 0,
            bound_in: Vec::new(),
        };
        let object = Arc::new(RefObject::new(creation.kind, header, data));
        let (index, generation) = match self.inner.table.write().insert(object) {
            Ok(slot) => slot,
            Err(e) => {
                self.add_log_entry(None, e, &format!("reference table full creating {}", creation.kind));
                return Err(e);
            }
        };
        let handle = Handle {
            context: self.id(),
            index,
            generation,
        };
        log::trace!("created {} {}", creation.kind, handle);
        Ok(handle)
    }

    /// Resolve a handle to its live object.
    pub(crate) fn object(&self, handle: Handle) -> VxResult<Arc<RefObject>> {
        if handle.context != self.id() {
            return Err(VxError::InvalidReference);
        }
        let object = self
            .inner
            .table
            .read()
            .get(handle.index, handle.generation)
            .ok_or(VxError::InvalidReference)?;
        if !object.is_alive() {
            return Err(VxError::InvalidReference);
        }
        Ok(object)
    }

    /// Resolve a handle and check its kind.
    pub(crate) fn object_of(&self, handle: Handle, kind: ObjectType) -> VxResult<Arc<RefObject>> {
        let object = self.object(handle)?;
        if object.kind != kind {
            return Err(VxError::InvalidReference);
        }
        Ok(object)
    }

    /// Whether a handle points at a live object of this context.
    pub fn is_valid(&self, handle: impl AsHandle) -> bool {
        self.object(handle.handle()).is_ok()
    }

    /// Kind of a live object.
    pub fn object_type(&self, handle: impl AsHandle) -> VxResult<ObjectType> {
        Ok(self.object(handle.handle())?.kind)
    }

    /// Convert an untyped handle to a typed one, checking its kind.
    pub fn downcast<T: TypedReference>(&self, handle: Handle) -> VxResult<T> {
        self.object_of(handle, T::TYPE)?;
        Ok(T::from_handle(handle))
    }

    /// Run `f` on the payload of `handle`, which must be of type `T`.
    pub(crate) fn with_payload<T: Payload, R>(
        &self,
        handle: Handle,
        f: impl FnOnce(&mut T) -> VxResult<R>,
    ) -> VxResult<R> {
        let object = self.object(handle)?;
        let mut data = object.data.lock();
        let payload = T::project(&mut data).ok_or(VxError::InvalidReference)?;
        f(payload)
    }

    /// Run `f` on the header of `handle`.
    pub(crate) fn with_header<R>(&self, handle: Handle, f: impl FnOnce(&mut RefHeader) -> R) -> VxResult<R> {
        let object = self.object(handle)?;
        let mut header = object.header.lock();
        Ok(f(&mut header))
    }

    pub(crate) fn increment(&self, handle: Handle, reftype: RefType) -> VxResult<u32> {
        let object = self.object(handle)?;
        let mut header = object.header.lock();
        match reftype {
            RefType::External => header.external += 1,
            RefType::Internal => header.internal += 1,
        }
        Ok(header.external + header.internal)
    }

    /// Drop one count; destroys the object when both counts reach zero.
    pub(crate) fn decrement(&self, handle: Handle, reftype: RefType) -> VxResult<u32> {
        let object = self.object(handle)?;
        let remaining = {
            let mut header = object.header.lock();
            let count = match reftype {
                RefType::External => &mut header.external,
                RefType::Internal => &mut header.internal,
            };
            if *count == 0 {
                return Err(VxError::InvalidReference);
            }
            *count -= 1;
            header.external + header.internal
        };
        if remaining == 0 {
            self.destroy(handle)?;
        }
        Ok(remaining)
    }

    fn destroy(&self, handle: Handle) -> VxResult<()> {
        let object = self
            .inner
            .table
            .write()
            .remove(handle.index, handle.generation)
            .ok_or(VxError::InvalidReference)?;
        object.kill();
        log::trace!("destroying {} {}", object.kind, handle);

        let mut fold = StatusFold::new();
        fold.push(self.before_destroy(handle, &object));

        let data = std::mem::replace(&mut *object.data.lock(), ObjectData::Released);
        self.inner.memory.release(data.storage_bytes());
        let children = data.children();
        drop(data);
        for child in children {
            fold.push(self.decrement(child, RefType::Internal));
        }
        fold.finish()
    }

    /// Kind-specific teardown that needs the object's payload while it is still readable.
    fn before_destroy(&self, handle: Handle, object: &RefObject) -> VxResult<()> {
        match object.kind {
            ObjectType::Graph => self.teardown_graph(Graph(handle), object),
            ObjectType::Node => self.teardown_node(Node(handle), object),
            _ => Ok(()),
        }
    }

    /// Add an external count to an object the caller wants to keep.
    pub fn retain_reference(&self, reference: impl AsHandle) -> VxResult<()> {
        self.increment(reference.handle(), RefType::External).map(|_| ())
    }

    /// Drop the caller's count on an object.
    pub fn release_reference(&self, reference: impl AsHandle) -> VxResult<()> {
        let handle = reference.handle();
        if handle == self.handle() {
            return Err(VxError::InvalidReference);
        }
        self.decrement(handle, RefType::External).map(|_| ())
    }

    /// Alias of [`Context::release_reference`] for typed handles.
    pub fn release<T: TypedReference>(&self, reference: T) -> VxResult<()> {
        self.release_reference(reference)
    }

    /// Snapshot the bookkeeping of an object.
    pub fn query_reference(&self, reference: impl AsHandle) -> VxResult<ReferenceInfo> {
        let object = self.object(reference.handle())?;
        let h = object.header.lock();
        Ok(ReferenceInfo {
            object_type: object.kind,
            external_count: h.external,
            internal_count: h.internal,
            name: h.name.clone(),
            is_virtual: h.is_virtual,
            is_accessible: h.is_accessible,
            read_count: h.read_count,
            write_count: h.write_count,
            scope: h.scope,
            delay: h.delay,
        })
    }

    pub fn set_reference_name(&self, reference: impl AsHandle, name: &str) -> VxResult<()> {
        self.with_header(reference.handle(), |h| h.name = name.to_string())
    }

    /// Context an object belongs to.
    pub fn get_context(&self, reference: impl AsHandle) -> VxResult<Handle> {
        self.object(reference.handle())?;
        Ok(self.handle())
    }

    /// Fail with `OptimizedAway` if a virtual object is not currently host-accessible.
    pub(crate) fn check_accessible(&self, handle: Handle) -> VxResult<()> {
        self.with_header(handle, |h| {
            if h.is_virtual && !h.is_accessible {
                Err(VxError::OptimizedAway)
            } else {
                Ok(())
            }
        })?
    }

    /// Read hook for host and kernel reads.
    pub(crate) fn read(&self, handle: Handle) {
        let _ = self.with_header(handle, |h| h.read_count += 1);
    }

    /// Write hook: bumps the write count and marks graphs that consume the object stale.
    pub(crate) fn wrote(&self, handle: Handle) {
        if self.with_header(handle, |h| h.write_count += 1).is_err() {
            return;
        }
        self.contaminate_graphs(handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::DfImage;

    #[test]
    fn test_table_generation_invalidates_old_handles() {
        let ctx = Context::create().unwrap();
        let img = ctx.create_image(8, 8, DfImage::U8).unwrap();
        let stale = img.handle();
        ctx.release(img).unwrap();
        assert!(!ctx.is_valid(stale));
        assert_eq!(ctx.query_reference(stale), Err(VxError::InvalidReference));

        // The slot gets reused with a new generation.
        let again = ctx.create_image(8, 8, DfImage::U8).unwrap();
        assert_eq!(again.handle().index(), stale.index());
        assert_ne!(again.handle(), stale);
    }

    #[test]
    fn test_release_underflow_is_rejected() {
        let ctx = Context::create().unwrap();
        let img = ctx.create_image(4, 4, DfImage::U8).unwrap();
        ctx.retain_reference(img).unwrap();
        assert_eq!(ctx.query_reference(img).unwrap().external_count, 2);
        ctx.release(img).unwrap();
        ctx.release(img).unwrap();
        assert_eq!(ctx.release(img), Err(VxError::InvalidReference));
    }

    #[test]
    fn test_handles_from_other_context_rejected() {
        let a = Context::create().unwrap();
        let b = Context::create().unwrap();
        let img = a.create_image(4, 4, DfImage::U8).unwrap();
        assert_eq!(b.query_reference(img), Err(VxError::InvalidReference));
        assert!(b.downcast::<Image>(img.handle()).is_err());
        assert!(a.downcast::<Image>(img.handle()).is_ok());
        assert!(a.downcast::<Array>(img.handle()).is_err());
    }

    #[test]
    fn test_table_capacity() {
        let mut table = ReferenceTable::new(2);
        let obj = || {
            Arc::new(RefObject::new(
                ObjectType::Scalar,
                RefHeader {
                    external: 1,
                    internal: 0,
                    scope: Handle {
                        context: ContextId::new(),
                        index: 0,
                        generation: 1,
                    },
                    is_virtual: false,
                    is_accessible: true,
                    delay: None,
                    name: String::new(),
                    read_count: 0,
                    write_count: 0,
                    bound_in: Vec::new(),
                },
                ObjectData::Released,
            ))
        };
        let (i, g) = table.insert(obj()).unwrap();
        table.insert(obj()).unwrap();
        assert_eq!(table.insert(obj()).unwrap_err(), VxError::NoResources);
        assert!(table.remove(i, g).is_some());
        assert!(table.remove(i, g).is_none());
        assert_eq!(table.len(), 1);
        assert!(table.insert(obj()).is_ok());
    }

    #[test]
    fn test_name_and_counts() {
        let ctx = Context::create().unwrap();
        let img = ctx.create_image(2, 2, DfImage::U8).unwrap();
        ctx.set_reference_name(img, "input").unwrap();
        let info = ctx.query_reference(img).unwrap();
        assert_eq!(info.name, "input");
        assert_eq!(info.object_type, ObjectType::Image);
        assert_eq!((info.external_count, info.internal_count), (1, 0));
        assert_eq!(ctx.get_context(img).unwrap(), ctx.handle());
    }
}
