//! Backing storage, plane locks and the map/accessor tables.
//!
//! Object payloads live in [`SharedBuffer`]s. Host access goes through timed per-buffer
//! read/write locks: any number of readers, or one writer. A writer that cannot get the
//! lock within the configured timeout fails with `NoResources` instead of racing.
//!
//! `map_*` calls hand out a [`MapGuard`] registered in the context's map table. The guard
//! must be handed back to the matching `unmap_*` call; presenting it for a different object
//! fails with `InvalidReference`. A guard dropped without unmapping just frees its entry.

use crate::core::context::Context;
use crate::core::error::{VxError, VxResult};
use crate::core::reference::Handle;
use crate::core::types::{PatchAddressing, Usage};
use parking_lot::lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use parking_lot::{Mutex, RawRwLock, RwLock};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Reference-counted, lockable byte storage.
pub type SharedBuffer = Arc<RwLock<Vec<u8>>>;

/// Allocate a zeroed buffer.
pub fn new_buffer(len: usize) -> SharedBuffer {
    Arc::new(RwLock::new(vec![0u8; len]))
}

/// Tracks bytes of object storage against the context limit.
#[derive(Debug)]
pub struct MemoryTracker {
    current: AtomicUsize,
    peak: AtomicUsize,
    limit: usize,
}

impl MemoryTracker {
    pub fn new(limit: usize) -> Self {
        Self {
            current: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            limit,
        }
    }

    /// Try to reserve memory. Returns true if successful.
    pub fn try_allocate(&self, bytes: usize) -> bool {
        let mut current = self.current.load(Ordering::Relaxed);
        loop {
            let next = match current.checked_add(bytes) {
                Some(n) if n <= self.limit => n,
                _ => return false,
            };
            match self
                .current
                .compare_exchange_weak(current, next, Ordering::SeqCst, Ordering::Relaxed)
            {
                Ok(_) => {
                    self.peak.fetch_max(next, Ordering::Relaxed);
                    return true;
                }
                Err(c) => current = c,
            }
        }
    }

    /// Reserve memory or fail with `NoMemory`.
    pub fn allocate(&self, bytes: usize) -> VxResult<()> {
        if self.try_allocate(bytes) {
            Ok(())
        } else {
            log::warn!(
                "allocation of {} bytes exceeds memory limit ({} of {} in use)",
                bytes,
                self.current_usage(),
                self.limit
            );
            Err(VxError::NoMemory)
        }
    }

    pub fn release(&self, bytes: usize) {
        let _ = self
            .current
            .fetch_update(Ordering::SeqCst, Ordering::Relaxed, |c| Some(c.saturating_sub(bytes)));
    }

    pub fn current_usage(&self) -> usize {
        self.current.load(Ordering::Relaxed)
    }

    pub fn peak_usage(&self) -> usize {
        self.peak.load(Ordering::Relaxed)
    }

    pub fn limit(&self) -> usize {
        self.limit
    }
}

/// A held read or write lock on one buffer.
pub enum PlaneGuard {
    Read(ArcRwLockReadGuard<RawRwLock, Vec<u8>>),
    Write(ArcRwLockWriteGuard<RawRwLock, Vec<u8>>),
}

impl PlaneGuard {
    pub fn bytes(&self) -> &[u8] {
        match self {
            PlaneGuard::Read(g) => g.as_slice(),
            PlaneGuard::Write(g) => g.as_slice(),
        }
    }

    /// Mutable bytes; read guards refuse.
    pub fn bytes_mut(&mut self) -> VxResult<&mut [u8]> {
        match self {
            PlaneGuard::Read(_) => Err(VxError::NotSupported),
            PlaneGuard::Write(g) => Ok(g.as_mut_slice()),
        }
    }
}

/// Lock a buffer for `usage`, waiting at most `timeout`.
pub fn lock_buffer(buffer: &SharedBuffer, usage: Usage, timeout: Duration) -> VxResult<PlaneGuard> {
    let guard = if usage.writes() {
        buffer.try_write_arc_for(timeout).map(PlaneGuard::Write)
    } else {
        buffer.try_read_arc_for(timeout).map(PlaneGuard::Read)
    };
    guard.ok_or_else(|| {
        log::warn!("timed out waiting for a {:?} plane lock", usage);
        VxError::NoResources
    })
}

/// Token identifying one outstanding map or access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MapId(pub u32);

/// One outstanding map or legacy access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessEntry {
    pub reference: Handle,
    pub usage: Usage,
    /// Whether the runtime allocated a host copy for this entry.
    pub allocated: bool,
}

/// Linear-scan slot table of outstanding maps or accesses.
#[derive(Debug)]
pub struct AccessTable {
    entries: Vec<Option<AccessEntry>>,
    capacity: usize,
}

impl AccessTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Vec::new(),
            capacity,
        }
    }

    pub fn add(&mut self, entry: AccessEntry) -> VxResult<MapId> {
        if let Some(i) = self.entries.iter().position(Option::is_none) {
            self.entries[i] = Some(entry);
            return Ok(MapId(i as u32 + 1));
        }
        if self.entries.len() >= self.capacity {
            return Err(VxError::NoResources);
        }
        self.entries.push(Some(entry));
        Ok(MapId(self.entries.len() as u32))
    }

    pub fn find(&self, id: MapId) -> Option<&AccessEntry> {
        let i = (id.0 as usize).checked_sub(1)?;
        self.entries.get(i)?.as_ref()
    }

    /// Remove the entry for `id`; it must belong to `reference`.
    pub fn remove(&mut self, id: MapId, reference: Handle) -> VxResult<AccessEntry> {
        let i = (id.0 as usize).checked_sub(1).ok_or(VxError::InvalidReference)?;
        let slot = self.entries.get_mut(i).ok_or(VxError::InvalidReference)?;
        if slot.as_ref().map(|e| e.reference) != Some(reference) {
            return Err(VxError::InvalidReference);
        }
        slot.take().ok_or(VxError::InvalidReference)
    }

    fn discard(&mut self, id: MapId) {
        if let Some(slot) = (id.0 as usize).checked_sub(1).and_then(|i| self.entries.get_mut(i)) {
            *slot = None;
        }
    }

    /// Number of outstanding entries for `reference`.
    pub fn count_for(&self, reference: Handle) -> usize {
        self.entries
            .iter()
            .flatten()
            .filter(|e| e.reference == reference)
            .count()
    }
}

/// Shape of the memory a [`MapGuard`] exposes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MapLayout {
    /// An image plane patch.
    Image(PatchAddressing),
    /// `count` items, `stride` bytes apart.
    Items { stride: usize, count: usize },
    /// A tensor patch.
    Tensor { dims: Vec<usize>, strides: Vec<usize> },
    /// Plain bytes.
    Bytes,
}

/// Zero-copy host view of an object's memory.
pub struct MapGuard {
    id: MapId,
    reference: Handle,
    usage: Usage,
    layout: MapLayout,
    guard: PlaneGuard,
    offset: usize,
    len: usize,
    table: Arc<Mutex<AccessTable>>,
    finished: bool,
}

impl MapGuard {
    pub fn id(&self) -> MapId {
        self.id
    }

    pub fn usage(&self) -> Usage {
        self.usage
    }

    pub fn layout(&self) -> &MapLayout {
        &self.layout
    }

    /// Addressing of an image map.
    pub fn addressing(&self) -> Option<PatchAddressing> {
        match self.layout {
            MapLayout::Image(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.guard.bytes()[self.offset..self.offset + self.len]
    }

    /// Mutable view; only for write or read-write maps.
    pub fn as_mut_slice(&mut self) -> VxResult<&mut [u8]> {
        let (offset, len) = (self.offset, self.len);
        Ok(&mut self.guard.bytes_mut()?[offset..offset + len])
    }
}

impl Drop for MapGuard {
    fn drop(&mut self) {
        if !self.finished {
            self.table.lock().discard(self.id);
        }
    }
}

impl Context {
    /// Register a map of `len` bytes at `offset` in the locked buffer.
    pub(crate) fn register_map(
        &self,
        reference: Handle,
        usage: Usage,
        guard: PlaneGuard,
        offset: usize,
        len: usize,
        layout: MapLayout,
    ) -> VxResult<MapGuard> {
        if offset + len > guard.bytes().len() {
            return Err(VxError::InvalidParameters);
        }
        let id = self.inner.maps.lock().add(AccessEntry {
            reference,
            usage,
            allocated: false,
        })?;
        log::trace!("mapped {} as {:?} ({} bytes)", reference, id, len);
        Ok(MapGuard {
            id,
            reference,
            usage,
            layout,
            guard,
            offset,
            len,
            table: Arc::clone(&self.inner.maps),
            finished: false,
        })
    }

    /// Close a map; the guard must belong to `reference`. Runs the write hook for write maps.
    pub(crate) fn finish_map(&self, reference: Handle, mut map: MapGuard) -> VxResult<()> {
        if map.reference != reference {
            return Err(VxError::InvalidReference);
        }
        self.inner.maps.lock().remove(map.id, reference)?;
        map.finished = true;
        let usage = map.usage;
        drop(map);
        if usage.writes() {
            self.wrote(reference);
        } else {
            self.read(reference);
        }
        Ok(())
    }

    /// Number of outstanding maps on an object.
    pub fn outstanding_maps(&self, reference: Handle) -> usize {
        self.inner.maps.lock().count_for(reference)
    }

    /// Plane lock with the configured timeout.
    pub(crate) fn lock(&self, buffer: &SharedBuffer, usage: Usage) -> VxResult<PlaneGuard> {
        lock_buffer(buffer, usage, self.inner.config.lock_timeout())
    }

    /// Allocate a tracked buffer.
    pub(crate) fn allocate_buffer(&self, len: usize) -> VxResult<SharedBuffer> {
        self.inner.memory.allocate(len)?;
        Ok(new_buffer(len))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_memory_tracker_limits() {
        let tracker = MemoryTracker::new(100);
        assert!(tracker.try_allocate(60));
        assert!(!tracker.try_allocate(50));
        assert_eq!(tracker.allocate(50), Err(VxError::NoMemory));
        tracker.release(60);
        assert!(tracker.try_allocate(100));
        assert_eq!(tracker.peak_usage(), 100);
        tracker.release(1000);
        assert_eq!(tracker.current_usage(), 0);
    }

    #[test]
    fn test_writer_excludes_reader() {
        let buffer = new_buffer(4);
        let writer = lock_buffer(&buffer, Usage::WriteOnly, Duration::from_millis(10)).unwrap();
        let other = Arc::clone(&buffer);
        let res = thread::spawn(move || {
            lock_buffer(&other, Usage::ReadOnly, Duration::from_millis(10)).map(|_| ())
        })
        .join()
        .unwrap();
        assert_eq!(res, Err(VxError::NoResources));
        drop(writer);
        assert!(lock_buffer(&buffer, Usage::ReadOnly, Duration::from_millis(10)).is_ok());
    }

    #[test]
    fn test_readers_share() {
        let buffer = new_buffer(4);
        let mut a = lock_buffer(&buffer, Usage::ReadOnly, Duration::from_millis(10)).unwrap();
        let b = lock_buffer(&buffer, Usage::ReadOnly, Duration::from_millis(10)).unwrap();
        assert_eq!(a.bytes(), b.bytes());
        assert_eq!(a.bytes_mut().unwrap_err(), VxError::NotSupported);
    }

    #[test]
    fn test_access_table_slots() {
        let ctx = Context::create().unwrap();
        let h = ctx.handle();
        let mut table = AccessTable::new(2);
        let entry = AccessEntry {
            reference: h,
            usage: Usage::ReadOnly,
            allocated: false,
        };
        let a = table.add(entry).unwrap();
        let b = table.add(entry).unwrap();
        assert_eq!(table.add(entry), Err(VxError::NoResources));
        assert_eq!(table.count_for(h), 2);
        table.remove(a, h).unwrap();
        assert_eq!(table.remove(a, h), Err(VxError::InvalidReference));
        assert_eq!(table.remove(MapId(0), h), Err(VxError::InvalidReference));
        assert!(table.find(b).is_some());
        assert_eq!(table.add(entry).unwrap(), a);
    }
}
