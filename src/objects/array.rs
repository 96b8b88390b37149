//! Arrays: a growable list of fixed-size items up to a capacity.

use crate::core::context::Context;
use crate::core::error::{VxError, VxResult};
use crate::core::memory::{MapGuard, MapLayout, SharedBuffer};
use crate::core::meta::MetaInfo;
use crate::core::reference::{Array, AsHandle, Creation, Graph, ObjectData, Payload};
use crate::core::types::{DataType, ObjectType, Usage};
use bytemuck::Pod;
use serde::{Deserialize, Serialize};

pub struct ArrayData {
    /// `None` only for virtual arrays awaiting verification.
    pub item_type: Option<DataType>,
    pub item_size: usize,
    pub capacity: usize,
    pub num_items: usize,
    pub buffer: Option<SharedBuffer>,
}

impl ArrayData {
    pub(crate) fn meta(&self) -> MetaInfo {
        match self.item_type {
            Some(item_type) => MetaInfo::Array {
                item_type,
                capacity: self.capacity,
            },
            None => MetaInfo::Unset,
        }
    }

    pub(crate) fn conform(&mut self, meta: &MetaInfo, is_virtual: bool) -> VxResult<()> {
        let MetaInfo::Array { item_type, capacity } = *meta else {
            return Err(VxError::InvalidType);
        };
        if is_virtual {
            if self.item_type.is_some_and(|t| t != item_type) {
                return Err(VxError::InvalidType);
            }
            if self.buffer.is_some() && self.item_type != Some(item_type) {
                return Err(VxError::InvalidType);
            }
            self.item_type = Some(item_type);
            if self.capacity == 0 {
                self.capacity = capacity;
            }
            if self.capacity == 0 {
                return Err(VxError::InvalidDimension);
            }
            Ok(())
        } else {
            if self.item_type != Some(item_type) {
                return Err(VxError::InvalidType);
            }
            if self.capacity < capacity {
                return Err(VxError::InvalidDimension);
            }
            Ok(())
        }
    }

    fn storage(&self) -> VxResult<&SharedBuffer> {
        self.buffer.as_ref().ok_or(VxError::NotAllocated)
    }
}

impl Payload for ArrayData {
    fn project(data: &mut ObjectData) -> Option<&mut Self> {
        match data {
            ObjectData::Array(d) => Some(d),
            _ => None,
        }
    }

    fn storage_bytes(&self) -> usize {
        if self.buffer.is_some() {
            self.capacity * self.item_size
        } else {
            0
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArrayInfo {
    pub item_type: Option<DataType>,
    pub item_size: usize,
    pub num_items: usize,
    pub capacity: usize,
}

impl Context {
    fn array_data<R>(&self, array: Array, f: impl FnOnce(&mut ArrayData) -> VxResult<R>) -> VxResult<R> {
        self.with_payload::<ArrayData, R>(array.handle(), f)
    }

    pub fn create_array(&self, item_type: DataType, capacity: usize) -> VxResult<Array> {
        if capacity == 0 {
            return Err(VxError::InvalidParameters);
        }
        let item_size = self.item_size(item_type)?;
        let buffer = self.allocate_buffer(capacity * item_size)?;
        let data = ArrayData {
            item_type: Some(item_type),
            item_size,
            capacity,
            num_items: 0,
            buffer: Some(buffer),
        };
        match self.create_reference(Creation::external(ObjectType::Array), ObjectData::Array(data)) {
            Ok(h) => Ok(Array(h)),
            Err(e) => {
                self.inner.memory.release(capacity * item_size);
                Err(e)
            }
        }
    }

    /// Graph-scoped array; item type and capacity may be left for verification to infer.
    pub fn create_virtual_array(&self, graph: Graph, item_type: Option<DataType>, capacity: usize) -> VxResult<Array> {
        self.object_of(graph.handle(), ObjectType::Graph)?;
        let item_size = match item_type {
            Some(t) => self.item_size(t)?,
            None => 0,
        };
        let data = ArrayData {
            item_type,
            item_size,
            capacity,
            num_items: 0,
            buffer: None,
        };
        let handle = self.create_reference(
            Creation::virtual_in(ObjectType::Array, graph.handle()),
            ObjectData::Array(data),
        )?;
        Ok(Array(handle))
    }

    /// Allocate storage for a virtual array once its shape is known. Idempotent.
    pub(crate) fn allocate_array(&self, array: Array) -> VxResult<()> {
        let item_size = match self.array_data(array, |d| Ok((d.buffer.is_some(), d.item_type)))? {
            (true, _) => return Ok(()),
            (false, Some(t)) => self.item_size(t)?,
            (false, None) => return Err(VxError::NotAllocated),
        };
        self.array_data(array, |d| {
            if d.buffer.is_some() {
                return Ok(());
            }
            if d.capacity == 0 {
                return Err(VxError::NotAllocated);
            }
            d.item_size = item_size;
            d.buffer = Some(self.allocate_buffer(d.capacity * item_size)?);
            Ok(())
        })
    }

    pub fn query_array(&self, array: Array) -> VxResult<ArrayInfo> {
        self.array_data(array, |d| {
            Ok(ArrayInfo {
                item_type: d.item_type,
                item_size: d.item_size,
                num_items: d.num_items,
                capacity: d.capacity,
            })
        })
    }

    /// Append `count` items read from `bytes`, `stride` bytes apart.
    pub fn add_array_items(&self, array: Array, count: usize, bytes: &[u8], stride: usize) -> VxResult<()> {
        self.check_accessible(array.handle())?;
        self.allocate_array(array)?;
        let (buffer, item_size, start) = self.array_data(array, |d| {
            if d.num_items + count > d.capacity {
                return Err(VxError::InvalidParameters);
            }
            Ok((d.storage()?.clone(), d.item_size, d.num_items))
        })?;
        if count == 0 {
            return Ok(());
        }
        if stride < item_size || bytes.len() < stride * (count - 1) + item_size {
            return Err(VxError::InvalidParameters);
        }
        {
            let mut guard = self.lock(&buffer, Usage::WriteOnly)?;
            let dst = guard.bytes_mut()?;
            for i in 0..count {
                let d = (start + i) * item_size;
                dst[d..d + item_size].copy_from_slice(&bytes[i * stride..i * stride + item_size]);
            }
        }
        self.array_data(array, |d| {
            d.num_items += count;
            Ok(())
        })?;
        self.wrote(array.handle());
        Ok(())
    }

    /// Append typed items, packed.
    pub fn add_array_items_of<T: Pod>(&self, array: Array, items: &[T]) -> VxResult<()> {
        let size = std::mem::size_of::<T>();
        if self.query_array(array)?.item_size != size {
            return Err(VxError::InvalidType);
        }
        self.add_array_items(array, items.len(), bytemuck::cast_slice(items), size)
    }

    /// Shrink the item count; growing fails.
    pub fn truncate_array(&self, array: Array, new_num_items: usize) -> VxResult<()> {
        self.check_accessible(array.handle())?;
        self.array_data(array, |d| {
            if new_num_items > d.num_items {
                return Err(VxError::InvalidParameters);
            }
            d.num_items = new_num_items;
            Ok(())
        })?;
        self.wrote(array.handle());
        Ok(())
    }

    fn array_range(&self, array: Array, start: usize, end: usize) -> VxResult<(SharedBuffer, usize)> {
        self.check_accessible(array.handle())?;
        self.allocate_array(array)?;
        self.array_data(array, |d| {
            if start >= end || end > d.num_items {
                return Err(VxError::InvalidParameters);
            }
            Ok((d.storage()?.clone(), d.item_size))
        })
    }

    /// Copy items `start..end` to or from `bytes`, items `stride` bytes apart.
    pub fn copy_array_range(&self, array: Array, start: usize, end: usize, stride: usize, bytes: &mut [u8], usage: Usage) -> VxResult<()> {
        if usage == Usage::ReadWrite {
            return Err(VxError::InvalidParameters);
        }
        let (buffer, item_size) = self.array_range(array, start, end)?;
        let count = end - start;
        if stride < item_size || bytes.len() < stride * (count - 1) + item_size {
            return Err(VxError::InvalidParameters);
        }
        let mut guard = self.lock(&buffer, usage)?;
        if usage.writes() {
            let dst = guard.bytes_mut()?;
            for i in 0..count {
                let d = (start + i) * item_size;
                dst[d..d + item_size].copy_from_slice(&bytes[i * stride..i * stride + item_size]);
            }
            drop(guard);
            self.wrote(array.handle());
        } else {
            let src = guard.bytes();
            for i in 0..count {
                let s = (start + i) * item_size;
                bytes[i * stride..i * stride + item_size].copy_from_slice(&src[s..s + item_size]);
            }
            drop(guard);
            self.read(array.handle());
        }
        Ok(())
    }

    /// All current items, typed.
    pub fn read_array_items<T: Pod>(&self, array: Array) -> VxResult<Vec<T>> {
        let info = self.query_array(array)?;
        if info.item_size != std::mem::size_of::<T>() {
            return Err(VxError::InvalidType);
        }
        if info.num_items == 0 {
            return Ok(Vec::new());
        }
        let mut bytes = vec![0u8; info.num_items * info.item_size];
        self.copy_array_range(array, 0, info.num_items, info.item_size, &mut bytes, Usage::ReadOnly)?;
        Ok(bytes.chunks_exact(info.item_size).map(bytemuck::pod_read_unaligned).collect())
    }

    /// Zero-copy view of items `start..end`.
    pub fn map_array_range(&self, array: Array, start: usize, end: usize, usage: Usage) -> VxResult<MapGuard> {
        let (buffer, item_size) = self.array_range(array, start, end)?;
        let guard = self.lock(&buffer, usage)?;
        self.register_map(
            array.handle(),
            usage,
            guard,
            start * item_size,
            (end - start) * item_size,
            MapLayout::Items {
                stride: item_size,
                count: end - start,
            },
        )
    }

    pub fn unmap_array_range(&self, array: Array, map: MapGuard) -> VxResult<()> {
        self.object_of(array.handle(), ObjectType::Array)?;
        self.finish_map(array.handle(), map)
    }

    /// Bytes of the first `num_items` items, for kernels and tiling snapshots.
    pub(crate) fn array_snapshot(&self, array: Array) -> VxResult<(ArrayInfo, Vec<u8>)> {
        self.allocate_array(array)?;
        let (info, buffer) = self.array_data(array, |d| {
            Ok((
                ArrayInfo {
                    item_type: d.item_type,
                    item_size: d.item_size,
                    num_items: d.num_items,
                    capacity: d.capacity,
                },
                d.storage()?.clone(),
            ))
        })?;
        let guard = self.lock(&buffer, Usage::ReadOnly)?;
        let bytes = guard.bytes()[..info.num_items * info.item_size].to_vec();
        Ok((info, bytes))
    }

    /// Replace the whole content with `bytes` (a multiple of the item size).
    pub(crate) fn array_commit(&self, array: Array, bytes: &[u8]) -> VxResult<()> {
        self.allocate_array(array)?;
        let (buffer, item_size, capacity) =
            self.array_data(array, |d| Ok((d.storage()?.clone(), d.item_size, d.capacity)))?;
        if item_size == 0 || bytes.len() % item_size != 0 || bytes.len() / item_size > capacity {
            return Err(VxError::InvalidParameters);
        }
        {
            let mut guard = self.lock(&buffer, Usage::WriteOnly)?;
            guard.bytes_mut()?[..bytes.len()].copy_from_slice(bytes);
        }
        self.array_data(array, |d| {
            d.num_items = bytes.len() / item_size;
            Ok(())
        })?;
        self.wrote(array.handle());
        Ok(())
    }
}
