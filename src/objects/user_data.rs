//! User data objects: a fixed-size opaque byte blob tagged with a type name.
//!
//! The runtime never looks inside the blob. Two user data objects are interchangeable when
//! their type names and sizes match, which is what verification checks for outputs.

use crate::core::context::Context;
use crate::core::error::{VxError, VxResult};
use crate::core::memory::{MapGuard, MapLayout, SharedBuffer};
use crate::core::meta::MetaInfo;
use crate::core::reference::{AsHandle, Creation, Graph, ObjectData, Payload, UserData};
use crate::core::types::{ObjectType, Usage};
use serde::{Deserialize, Serialize};

/// Longest type name kept, terminator included; longer names are cut.
pub const MAX_TYPE_NAME: usize = 64;

pub struct UserObjectData {
    pub type_name: String,
    /// 0 only for virtual objects awaiting verification.
    pub size: usize,
    pub buffer: Option<SharedBuffer>,
}

impl UserObjectData {
    pub(crate) fn meta(&self) -> MetaInfo {
        if self.size == 0 {
            return MetaInfo::Unset;
        }
        MetaInfo::UserData {
            type_name: self.type_name.clone(),
            size: self.size,
        }
    }

    pub(crate) fn conform(&mut self, meta: &MetaInfo, is_virtual: bool) -> VxResult<()> {
        let MetaInfo::UserData { type_name, size } = meta else {
            return Err(VxError::InvalidType);
        };
        // Virtual objects adopt whatever they left open.
        if (!is_virtual || !self.type_name.is_empty()) && self.type_name != *type_name {
            return Err(VxError::InvalidType);
        }
        if (!is_virtual || self.size != 0) && self.size != *size {
            return Err(VxError::InvalidDimension);
        }
        self.type_name = type_name.clone();
        self.size = *size;
        Ok(())
    }

    fn storage(&self) -> VxResult<&SharedBuffer> {
        self.buffer.as_ref().ok_or(VxError::NotAllocated)
    }
}

impl Payload for UserObjectData {
    fn project(data: &mut ObjectData) -> Option<&mut Self> {
        match data {
            ObjectData::UserData(d) => Some(d),
            _ => None,
        }
    }

    fn storage_bytes(&self) -> usize {
        if self.buffer.is_some() {
            self.size
        } else {
            0
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserDataInfo {
    pub type_name: String,
    pub size: usize,
}

fn clip_type_name(name: &str) -> String {
    name.chars().take(MAX_TYPE_NAME - 1).collect()
}

impl Context {
    fn user_data<R>(&self, object: UserData, f: impl FnOnce(&mut UserObjectData) -> VxResult<R>) -> VxResult<R> {
        self.with_payload::<UserObjectData, R>(object.handle(), f)
    }

    /// Blob of `size` bytes, zeroed or filled from `initial` (which must hold `size` bytes).
    pub fn create_user_data_object(&self, type_name: &str, size: usize, initial: Option<&[u8]>) -> VxResult<UserData> {
        if size == 0 {
            return Err(VxError::InvalidParameters);
        }
        let content = match initial {
            Some(bytes) => Some(bytes.get(..size).ok_or(VxError::InvalidParameters)?),
            None => None,
        };
        let buffer = self.allocate_buffer(size)?;
        if let Some(bytes) = content {
            buffer.write().copy_from_slice(bytes);
        }
        let data = UserObjectData {
            type_name: clip_type_name(type_name),
            size,
            buffer: Some(buffer),
        };
        match self.create_reference(Creation::external(ObjectType::UserData), ObjectData::UserData(data)) {
            Ok(h) => Ok(UserData(h)),
            Err(e) => {
                self.inner.memory.release(size);
                Err(e)
            }
        }
    }

    /// Graph-scoped blob. An empty type name or a zero size is left for verification to fill in.
    pub fn create_virtual_user_data_object(&self, graph: Graph, type_name: &str, size: usize) -> VxResult<UserData> {
        self.object_of(graph.handle(), ObjectType::Graph)?;
        let data = UserObjectData {
            type_name: clip_type_name(type_name),
            size,
            buffer: None,
        };
        let handle = self.create_reference(
            Creation::virtual_in(ObjectType::UserData, graph.handle()),
            ObjectData::UserData(data),
        )?;
        Ok(UserData(handle))
    }

    /// Allocate storage once the size is known. Idempotent.
    pub(crate) fn allocate_user_data_object(&self, object: UserData) -> VxResult<()> {
        self.user_data(object, |d| {
            if d.buffer.is_some() {
                return Ok(());
            }
            if d.size == 0 {
                return Err(VxError::NotAllocated);
            }
            d.buffer = Some(self.allocate_buffer(d.size)?);
            Ok(())
        })
    }

    pub fn query_user_data_object(&self, object: UserData) -> VxResult<UserDataInfo> {
        self.user_data(object, |d| {
            Ok(UserDataInfo {
                type_name: d.type_name.clone(),
                size: d.size,
            })
        })
    }

    fn user_data_range(&self, object: UserData, offset: usize, len: usize) -> VxResult<SharedBuffer> {
        self.check_accessible(object.handle())?;
        self.allocate_user_data_object(object)?;
        self.user_data(object, |d| {
            if offset.checked_add(len).map_or(true, |end| end > d.size) {
                return Err(VxError::InvalidParameters);
            }
            Ok(d.storage()?.clone())
        })
    }

    /// Copy `bytes.len()` bytes at `offset` out of (`ReadOnly`) or into (`WriteOnly`) the blob.
    pub fn copy_user_data_object(&self, object: UserData, offset: usize, bytes: &mut [u8], usage: Usage) -> VxResult<()> {
        if usage == Usage::ReadWrite || bytes.is_empty() {
            return Err(VxError::InvalidParameters);
        }
        let buffer = self.user_data_range(object, offset, bytes.len())?;
        let mut guard = self.lock(&buffer, usage)?;
        let range = offset..offset + bytes.len();
        if usage.writes() {
            guard.bytes_mut()?[range].copy_from_slice(bytes);
            drop(guard);
            self.wrote(object.handle());
        } else {
            bytes.copy_from_slice(&guard.bytes()[range]);
            drop(guard);
            self.read(object.handle());
        }
        Ok(())
    }

    /// Zero-copy view of `size` bytes at `offset`; a zero `size` maps through the end.
    pub fn map_user_data_object(&self, object: UserData, offset: usize, size: usize, usage: Usage) -> VxResult<MapGuard> {
        let total = self.query_user_data_object(object)?.size;
        let len = if size == 0 { total.saturating_sub(offset) } else { size };
        if len == 0 {
            return Err(VxError::InvalidParameters);
        }
        let buffer = self.user_data_range(object, offset, len)?;
        let guard = self.lock(&buffer, usage)?;
        self.register_map(object.handle(), usage, guard, offset, len, MapLayout::Bytes)
    }

    pub fn unmap_user_data_object(&self, object: UserData, map: MapGuard) -> VxResult<()> {
        self.object_of(object.handle(), ObjectType::UserData)?;
        self.finish_map(object.handle(), map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_and_copy() {
        let ctx = Context::create().unwrap();
        let blob = ctx.create_user_data_object("calib", 8, Some(&[1, 2, 3, 4, 5, 6, 7, 8])).unwrap();
        assert_eq!(
            ctx.query_user_data_object(blob).unwrap(),
            UserDataInfo {
                type_name: "calib".to_string(),
                size: 8
            }
        );

        let mut middle = [0u8; 3];
        ctx.copy_user_data_object(blob, 2, &mut middle, Usage::ReadOnly).unwrap();
        assert_eq!(middle, [3, 4, 5]);

        let mut patch = [9u8, 9];
        ctx.copy_user_data_object(blob, 6, &mut patch, Usage::WriteOnly).unwrap();
        let mut all = [0u8; 8];
        ctx.copy_user_data_object(blob, 0, &mut all, Usage::ReadOnly).unwrap();
        assert_eq!(all, [1, 2, 3, 4, 5, 6, 9, 9]);

        assert_eq!(
            ctx.copy_user_data_object(blob, 7, &mut [0u8; 2], Usage::ReadOnly),
            Err(VxError::InvalidParameters)
        );
        assert_eq!(
            ctx.copy_user_data_object(blob, 0, &mut [], Usage::ReadOnly),
            Err(VxError::InvalidParameters)
        );
        let info = ctx.query_reference(blob).unwrap();
        assert_eq!((info.read_count, info.write_count), (2, 1));
    }

    #[test]
    fn test_creation_checks() {
        let ctx = Context::create().unwrap();
        assert_eq!(ctx.create_user_data_object("x", 0, None), Err(VxError::InvalidParameters));
        assert_eq!(ctx.create_user_data_object("x", 4, Some(&[1, 2])), Err(VxError::InvalidParameters));

        let zeroed = ctx.create_user_data_object("x", 4, None).unwrap();
        let mut out = [7u8; 4];
        ctx.copy_user_data_object(zeroed, 0, &mut out, Usage::ReadOnly).unwrap();
        assert_eq!(out, [0; 4]);

        let long = "n".repeat(100);
        let clipped = ctx.create_user_data_object(&long, 1, None).unwrap();
        assert_eq!(ctx.query_user_data_object(clipped).unwrap().type_name.len(), MAX_TYPE_NAME - 1);
    }

    #[test]
    fn test_map_write_then_read() {
        let ctx = Context::create().unwrap();
        let blob = ctx.create_user_data_object("pair", 8, None).unwrap();
        let mut map = ctx.map_user_data_object(blob, 4, 0, Usage::WriteOnly).unwrap();
        assert_eq!(map.layout(), &MapLayout::Bytes);
        map.as_mut_slice().unwrap().copy_from_slice(&0xDEAD_BEEFu32.to_ne_bytes());
        assert_eq!(ctx.outstanding_maps(blob.handle()), 1);
        ctx.unmap_user_data_object(blob, map).unwrap();
        assert_eq!(ctx.outstanding_maps(blob.handle()), 0);

        let map = ctx.map_user_data_object(blob, 0, 8, Usage::ReadOnly).unwrap();
        assert_eq!(&map.as_slice()[..4], &[0; 4]);
        assert_eq!(map.as_slice()[4..], 0xDEAD_BEEFu32.to_ne_bytes());
        ctx.unmap_user_data_object(blob, map).unwrap();

        assert!(ctx.map_user_data_object(blob, 6, 4, Usage::ReadOnly).is_err());
        assert!(ctx.map_user_data_object(blob, 8, 0, Usage::ReadOnly).is_err());
    }

    #[test]
    fn test_virtual_object_takes_shape_from_meta() {
        let ctx = Context::create().unwrap();
        let graph = ctx.create_graph().unwrap();
        let blob = ctx.create_virtual_user_data_object(graph, "", 0).unwrap();
        assert_eq!(ctx.describe(blob.handle()).unwrap(), MetaInfo::Unset);

        let meta = MetaInfo::UserData {
            type_name: "state".to_string(),
            size: 16,
        };
        ctx.apply_meta(blob.handle(), &meta).unwrap();
        ctx.allocate_user_data_object(blob).unwrap();
        assert_eq!(ctx.query_user_data_object(blob).unwrap().size, 16);
        assert_eq!(ctx.describe(blob.handle()).unwrap(), meta);

        let other = ctx.create_user_data_object("other", 16, None).unwrap();
        assert_eq!(ctx.apply_meta(other.handle(), &meta), Err(VxError::InvalidType));
        let short = ctx.create_user_data_object("state", 8, None).unwrap();
        assert_eq!(ctx.apply_meta(short.handle(), &meta), Err(VxError::InvalidDimension));
    }
}
