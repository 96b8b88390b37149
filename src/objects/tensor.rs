//! Tensors: up to six dimensions with explicit byte strides, and views sharing storage.

use crate::core::context::Context;
use crate::core::error::{VxError, VxResult};
use crate::core::memory::{MapGuard, MapLayout, SharedBuffer};
use crate::core::meta::MetaInfo;
use crate::core::reference::{AsHandle, Creation, Graph, Handle, ObjectData, Payload, RefType, Tensor};
use crate::core::types::{DataType, ObjectType, Usage};
use serde::{Deserialize, Serialize};

/// Highest supported rank.
pub const MAX_TENSOR_DIMS: usize = 6;

pub struct TensorData {
    pub dims: Vec<usize>,
    pub data_type: DataType,
    pub fixed_point_position: i8,
    /// Byte stride of each dimension.
    pub strides: Vec<usize>,
    pub buffer: Option<SharedBuffer>,
    /// Byte offset of element zero in `buffer`.
    pub offset: usize,
    pub parent: Option<Handle>,
    /// Outermost tensor owning the storage, and this tensor's `start..end` box in it.
    pub root: Option<(Handle, Vec<usize>, Vec<usize>)>,
    allocated: usize,
}

impl TensorData {
    fn element_size(&self) -> usize {
        self.data_type.fixed_size().unwrap_or(1)
    }

    pub(crate) fn meta(&self) -> MetaInfo {
        MetaInfo::Tensor {
            dims: self.dims.clone(),
            data_type: self.data_type,
            fixed_point_position: self.fixed_point_position,
        }
    }

    pub(crate) fn conform(&mut self, meta: &MetaInfo, is_virtual: bool) -> VxResult<()> {
        let MetaInfo::Tensor {
            dims,
            data_type,
            fixed_point_position,
        } = meta
        else {
            return Err(VxError::InvalidType);
        };
        if *data_type != self.data_type {
            return Err(VxError::InvalidType);
        }
        if *fixed_point_position != self.fixed_point_position {
            return Err(VxError::InvalidValue);
        }
        if is_virtual && self.dims.is_empty() && self.buffer.is_none() {
            check_dims(dims)?;
            self.dims = dims.clone();
            self.strides = packed_strides(dims, self.element_size());
            return Ok(());
        }
        if &self.dims != dims {
            return Err(VxError::InvalidDimension);
        }
        Ok(())
    }

    fn byte_span(&self, start: &[usize], end: &[usize]) -> (usize, usize) {
        let first: usize = start.iter().zip(&self.strides).map(|(s, st)| s * st).sum();
        let last: usize = end.iter().zip(&self.strides).map(|(e, st)| (e - 1) * st).sum();
        (self.offset + first, last - first + self.element_size())
    }

    fn check_box(&self, start: &[usize], end: &[usize]) -> VxResult<()> {
        if start.len() != self.dims.len() || end.len() != self.dims.len() {
            return Err(VxError::InvalidParameters);
        }
        for ((s, e), d) in start.iter().zip(end).zip(&self.dims) {
            if s >= e || e > d {
                return Err(VxError::InvalidParameters);
            }
        }
        Ok(())
    }
}

impl Payload for TensorData {
    fn project(data: &mut ObjectData) -> Option<&mut Self> {
        match data {
            ObjectData::Tensor(d) => Some(d),
            _ => None,
        }
    }

    fn children(&self) -> Vec<Handle> {
        self.parent.into_iter().collect()
    }

    fn storage_bytes(&self) -> usize {
        self.allocated
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TensorInfo {
    pub dims: Vec<usize>,
    pub data_type: DataType,
    pub fixed_point_position: i8,
    pub strides: Vec<usize>,
    pub is_view: bool,
}

fn check_dims(dims: &[usize]) -> VxResult<()> {
    if dims.is_empty() || dims.len() > MAX_TENSOR_DIMS || dims.contains(&0) {
        return Err(VxError::InvalidDimension);
    }
    Ok(())
}

fn packed_strides(dims: &[usize], element_size: usize) -> Vec<usize> {
    let mut strides = Vec::with_capacity(dims.len());
    let mut acc = element_size;
    for &d in dims {
        strides.push(acc);
        acc *= d;
    }
    strides
}

/// Call `f` with the byte offsets (per `a_strides` and `b_strides`) of every element of a
/// box with extents `extent`, dimension 0 fastest.
fn for_each_element(extent: &[usize], a_strides: &[usize], b_strides: &[usize], mut f: impl FnMut(usize, usize)) {
    let mut index = vec![0usize; extent.len()];
    loop {
        let a = index.iter().zip(a_strides).map(|(i, s)| i * s).sum();
        let b = index.iter().zip(b_strides).map(|(i, s)| i * s).sum();
        f(a, b);
        let mut d = 0;
        loop {
            if d == extent.len() {
                return;
            }
            index[d] += 1;
            if index[d] < extent[d] {
                break;
            }
            index[d] = 0;
            d += 1;
        }
    }
}

impl Context {
    fn tensor_data<R>(&self, tensor: Tensor, f: impl FnOnce(&mut TensorData) -> VxResult<R>) -> VxResult<R> {
        self.with_payload::<TensorData, R>(tensor.handle(), f)
    }

    pub fn create_tensor(&self, dims: &[usize], data_type: DataType, fixed_point_position: i8) -> VxResult<Tensor> {
        check_dims(dims)?;
        if !data_type.is_tensor_type() {
            return Err(VxError::InvalidType);
        }
        let element = data_type.fixed_size().unwrap_or(1);
        let len = dims.iter().product::<usize>() * element;
        let buffer = self.allocate_buffer(len)?;
        let data = TensorData {
            dims: dims.to_vec(),
            data_type,
            fixed_point_position,
            strides: packed_strides(dims, element),
            buffer: Some(buffer),
            offset: 0,
            parent: None,
            root: None,
            allocated: len,
        };
        match self.create_reference(Creation::external(ObjectType::Tensor), ObjectData::Tensor(data)) {
            Ok(h) => Ok(Tensor(h)),
            Err(e) => {
                self.inner.memory.release(len);
                Err(e)
            }
        }
    }

    /// Graph-scoped tensor; empty `dims` leaves the shape for verification to infer.
    pub fn create_virtual_tensor(&self, graph: Graph, dims: &[usize], data_type: DataType, fixed_point_position: i8) -> VxResult<Tensor> {
        self.object_of(graph.handle(), ObjectType::Graph)?;
        if !dims.is_empty() {
            check_dims(dims)?;
        }
        if !data_type.is_tensor_type() {
            return Err(VxError::InvalidType);
        }
        let data = TensorData {
            dims: dims.to_vec(),
            data_type,
            fixed_point_position,
            strides: packed_strides(dims, data_type.fixed_size().unwrap_or(1)),
            buffer: None,
            offset: 0,
            parent: None,
            root: None,
            allocated: 0,
        };
        let handle = self.create_reference(
            Creation::virtual_in(ObjectType::Tensor, graph.handle()),
            ObjectData::Tensor(data),
        )?;
        Ok(Tensor(handle))
    }

    /// Allocate a virtual tensor's storage once its shape is known. Idempotent.
    pub(crate) fn allocate_tensor(&self, tensor: Tensor) -> VxResult<()> {
        self.tensor_data(tensor, |d| {
            if d.buffer.is_some() {
                return Ok(());
            }
            if d.dims.is_empty() {
                return Err(VxError::NotAllocated);
            }
            let len = d.dims.iter().product::<usize>() * d.element_size();
            d.buffer = Some(self.allocate_buffer(len)?);
            d.allocated = len;
            Ok(())
        })
    }

    /// View of `start..end` of `tensor`, sharing its storage.
    pub fn create_tensor_from_view(&self, tensor: Tensor, start: &[usize], end: &[usize]) -> VxResult<Tensor> {
        if self.with_header(tensor.handle(), |h| h.is_virtual)? {
            return Err(VxError::InvalidParameters);
        }
        let data = self.tensor_data(tensor, |p| {
            p.check_box(start, end)?;
            let first: usize = start.iter().zip(&p.strides).map(|(s, st)| s * st).sum();
            let root = match &p.root {
                Some((root, rs, _)) => {
                    let s: Vec<usize> = rs.iter().zip(start).map(|(a, b)| a + b).collect();
                    let e: Vec<usize> = rs.iter().zip(end).map(|(a, b)| a + b).collect();
                    (*root, s, e)
                }
                None => (tensor.handle(), start.to_vec(), end.to_vec()),
            };
            Ok(TensorData {
                dims: start.iter().zip(end).map(|(s, e)| e - s).collect(),
                data_type: p.data_type,
                fixed_point_position: p.fixed_point_position,
                strides: p.strides.clone(),
                buffer: p.buffer.clone(),
                offset: p.offset + first,
                parent: Some(tensor.handle()),
                root: Some(root),
                allocated: 0,
            })
        })?;
        self.increment(tensor.handle(), RefType::Internal)?;
        match self.create_reference(Creation::external(ObjectType::Tensor), ObjectData::Tensor(data)) {
            Ok(h) => Ok(Tensor(h)),
            Err(e) => {
                let _ = self.decrement(tensor.handle(), RefType::Internal);
                Err(e)
            }
        }
    }

    pub fn query_tensor(&self, tensor: Tensor) -> VxResult<TensorInfo> {
        self.tensor_data(tensor, |d| {
            Ok(TensorInfo {
                dims: d.dims.clone(),
                data_type: d.data_type,
                fixed_point_position: d.fixed_point_position,
                strides: d.strides.clone(),
                is_view: d.parent.is_some(),
            })
        })
    }

    /// Copy the box `start..end` to or from `bytes` laid out with `user_strides`.
    pub fn copy_tensor_patch(
        &self,
        tensor: Tensor,
        start: &[usize],
        end: &[usize],
        user_strides: &[usize],
        bytes: &mut [u8],
        usage: Usage,
    ) -> VxResult<()> {
        if usage == Usage::ReadWrite {
            return Err(VxError::InvalidParameters);
        }
        self.check_accessible(tensor.handle())?;
        self.allocate_tensor(tensor)?;
        let (buffer, strides, base, element) = self.tensor_data(tensor, |d| {
            d.check_box(start, end)?;
            let base = d.offset + start.iter().zip(&d.strides).map(|(s, st)| s * st).sum::<usize>();
            Ok((d.buffer.clone().ok_or(VxError::NotAllocated)?, d.strides.clone(), base, d.element_size()))
        })?;
        let extent: Vec<usize> = start.iter().zip(end).map(|(s, e)| e - s).collect();
        if user_strides.len() != extent.len() || user_strides[0] < element {
            return Err(VxError::InvalidParameters);
        }
        let needed = extent.iter().zip(user_strides).map(|(e, s)| (e - 1) * s).sum::<usize>() + element;
        if bytes.len() < needed {
            return Err(VxError::InvalidParameters);
        }
        let mut guard = self.lock(&buffer, usage)?;
        if usage.writes() {
            let dst = guard.bytes_mut()?;
            for_each_element(&extent, &strides, user_strides, |t, u| {
                dst[base + t..base + t + element].copy_from_slice(&bytes[u..u + element]);
            });
            drop(guard);
            self.wrote(tensor.handle());
        } else {
            let src = guard.bytes();
            for_each_element(&extent, &strides, user_strides, |t, u| {
                bytes[u..u + element].copy_from_slice(&src[base + t..base + t + element]);
            });
            drop(guard);
            self.read(tensor.handle());
        }
        Ok(())
    }

    /// Zero-copy view of the box `start..end`, addressed with the tensor's own strides.
    pub fn map_tensor_patch(&self, tensor: Tensor, start: &[usize], end: &[usize], usage: Usage) -> VxResult<MapGuard> {
        self.check_accessible(tensor.handle())?;
        self.allocate_tensor(tensor)?;
        let (buffer, offset, len, strides) = self.tensor_data(tensor, |d| {
            d.check_box(start, end)?;
            let (offset, len) = d.byte_span(start, end);
            Ok((d.buffer.clone().ok_or(VxError::NotAllocated)?, offset, len, d.strides.clone()))
        })?;
        let dims = start.iter().zip(end).map(|(s, e)| e - s).collect();
        let guard = self.lock(&buffer, usage)?;
        self.register_map(tensor.handle(), usage, guard, offset, len, MapLayout::Tensor { dims, strides })
    }

    pub fn unmap_tensor_patch(&self, tensor: Tensor, map: MapGuard) -> VxResult<()> {
        self.object_of(tensor.handle(), ObjectType::Tensor)?;
        self.finish_map(tensor.handle(), map)
    }

    /// Storage root and box of a tensor, for overlap checks.
    pub(crate) fn tensor_extent(&self, tensor: Tensor) -> VxResult<(Handle, Vec<usize>, Vec<usize>)> {
        self.tensor_data(tensor, |d| {
            Ok(d.root
                .clone()
                .unwrap_or_else(|| (tensor.handle(), vec![0; d.dims.len()], d.dims.clone())))
        })
    }

    /// Whole tensor, packed with dimension 0 fastest.
    pub(crate) fn tensor_snapshot(&self, tensor: Tensor) -> VxResult<(TensorInfo, Vec<u8>)> {
        self.allocate_tensor(tensor)?;
        let info = self.query_tensor(tensor)?;
        let element = info.data_type.fixed_size().unwrap_or(1);
        let packed = packed_strides(&info.dims, element);
        let (buffer, base) = self.tensor_data(tensor, |d| Ok((d.buffer.clone().ok_or(VxError::NotAllocated)?, d.offset)))?;
        let mut out = vec![0u8; info.dims.iter().product::<usize>() * element];
        let guard = self.lock(&buffer, Usage::ReadOnly)?;
        let src = guard.bytes();
        for_each_element(&info.dims, &info.strides, &packed, |t, u| {
            out[u..u + element].copy_from_slice(&src[base + t..base + t + element]);
        });
        Ok((info, out))
    }

    /// Write a packed snapshot back.
    pub(crate) fn tensor_commit(&self, tensor: Tensor, bytes: &[u8]) -> VxResult<()> {
        let info = self.query_tensor(tensor)?;
        let element = info.data_type.fixed_size().unwrap_or(1);
        let packed = packed_strides(&info.dims, element);
        if bytes.len() != info.dims.iter().product::<usize>() * element {
            return Err(VxError::InvalidParameters);
        }
        let (buffer, base) = self.tensor_data(tensor, |d| Ok((d.buffer.clone().ok_or(VxError::NotAllocated)?, d.offset)))?;
        {
            let mut guard = self.lock(&buffer, Usage::WriteOnly)?;
            let dst = guard.bytes_mut()?;
            for_each_element(&info.dims, &info.strides, &packed, |t, u| {
                dst[base + t..base + t + element].copy_from_slice(&bytes[u..u + element]);
            });
        }
        self.wrote(tensor.handle());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rank_and_type_limits() {
        let ctx = Context::create().unwrap();
        assert_eq!(ctx.create_tensor(&[1; 7], DataType::UInt8, 0), Err(VxError::InvalidDimension));
        assert_eq!(ctx.create_tensor(&[2, 0], DataType::UInt8, 0), Err(VxError::InvalidDimension));
        assert_eq!(ctx.create_tensor(&[2], DataType::Float64, 0), Err(VxError::InvalidType));
        let t = ctx.create_tensor(&[2, 3, 4], DataType::Int16, 8).unwrap();
        let info = ctx.query_tensor(t).unwrap();
        assert_eq!(info.strides, vec![2, 4, 12]);
        assert_eq!(info.fixed_point_position, 8);
    }

    #[test]
    fn test_patch_copy_with_user_strides() {
        let ctx = Context::create().unwrap();
        let t = ctx.create_tensor(&[4, 3], DataType::UInt8, 0).unwrap();
        let mut all: Vec<u8> = (0..12).collect();
        ctx.copy_tensor_patch(t, &[0, 0], &[4, 3], &[1, 4], &mut all, Usage::WriteOnly).unwrap();

        // Transposed read of the 2x2 box at (1, 1).
        let mut out = [0u8; 4];
        ctx.copy_tensor_patch(t, &[1, 1], &[3, 3], &[2, 1], &mut out, Usage::ReadOnly).unwrap();
        assert_eq!(out, [5, 9, 6, 10]);
    }

    #[test]
    fn test_view_shares_storage() {
        let ctx = Context::create().unwrap();
        let t = ctx.create_tensor(&[4, 4], DataType::UInt8, 0).unwrap();
        let view = ctx.create_tensor_from_view(t, &[1, 2], &[3, 4]).unwrap();
        assert_eq!(ctx.query_tensor(view).unwrap().dims, vec![2, 2]);
        let mut ones = [1u8; 4];
        ctx.copy_tensor_patch(view, &[0, 0], &[2, 2], &[1, 2], &mut ones, Usage::WriteOnly).unwrap();
        let (_, packed) = ctx.tensor_snapshot(t).unwrap();
        assert_eq!(packed[2 * 4 + 1], 1);
        assert_eq!(packed[3 * 4 + 2], 1);
        assert_eq!(packed[0], 0);
        assert_eq!(ctx.tensor_extent(view).unwrap(), (t.handle(), vec![1, 2], vec![3, 4]));

        let nested = ctx.create_tensor_from_view(view, &[1, 0], &[2, 1]).unwrap();
        assert_eq!(ctx.tensor_extent(nested).unwrap(), (t.handle(), vec![2, 2], vec![3, 3]));
        assert!(ctx.create_tensor_from_view(t, &[0, 0], &[5, 1]).is_err());
    }

    #[test]
    fn test_map_patch() {
        let ctx = Context::create().unwrap();
        let t = ctx.create_tensor(&[3, 2], DataType::Int16, 0).unwrap();
        let mut map = ctx.map_tensor_patch(t, &[1, 0], &[3, 2], Usage::WriteOnly).unwrap();
        assert_eq!(
            map.layout(),
            &MapLayout::Tensor {
                dims: vec![2, 2],
                strides: vec![2, 6]
            }
        );
        // Element (1, 1) of the patch is element (2, 1) of the tensor.
        map.as_mut_slice().unwrap()[2 + 6..2 + 6 + 2].copy_from_slice(&7i16.to_ne_bytes());
        ctx.unmap_tensor_patch(t, map).unwrap();
        let (_, packed) = ctx.tensor_snapshot(t).unwrap();
        let values: Vec<i16> = packed.chunks_exact(2).map(|c| i16::from_ne_bytes([c[0], c[1]])).collect();
        assert_eq!(values, vec![0, 0, 0, 0, 0, 7]);
    }
}
