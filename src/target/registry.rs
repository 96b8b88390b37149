//! Per-target kernel table.

use crate::core::error::{VxError, VxResult};
use crate::core::reference::Kernel;
use indexmap::IndexMap;

/// One published kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelEntry {
    pub kernel: Kernel,
    pub enumeration: u32,
    /// Set once the kernel is finalized; lookups skip disabled entries.
    pub enabled: bool,
}

/// Fixed-capacity table of the kernels one target publishes, in publication order.
#[derive(Debug)]
pub struct KernelTable {
    kernels: IndexMap<String, KernelEntry>,
    capacity: usize,
}

impl KernelTable {
    /// Create an empty table holding at most `capacity` kernels.
    pub fn new(capacity: usize) -> Self {
        Self {
            kernels: IndexMap::new(),
            capacity,
        }
    }

    /// Add a disabled entry.
    pub fn insert(&mut self, name: &str, kernel: Kernel, enumeration: u32) -> VxResult<()> {
        if self.kernels.contains_key(name) {
            return Err(VxError::InvalidParameters);
        }
        if self.kernels.len() >= self.capacity {
            log::warn!("kernel table full ({} slots), cannot add '{}'", self.capacity, name);
            return Err(VxError::NoResources);
        }
        self.kernels.insert(
            name.to_string(),
            KernelEntry {
                kernel,
                enumeration,
                enabled: false,
            },
        );
        Ok(())
    }

    /// Enabled kernel by name.
    pub fn get(&self, name: &str) -> Option<&KernelEntry> {
        self.kernels.get(name).filter(|e| e.enabled)
    }

    /// Enabled kernel by enumeration.
    pub fn by_enum(&self, enumeration: u32) -> Option<&KernelEntry> {
        self.kernels.values().find(|e| e.enabled && e.enumeration == enumeration)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.kernels.contains_key(name)
    }

    /// Enable or disable a kernel. Returns false if it is not in the table.
    pub fn set_enabled(&mut self, name: &str, enabled: bool) -> bool {
        match self.kernels.get_mut(name) {
            Some(entry) => {
                entry.enabled = enabled;
                true
            }
            None => false,
        }
    }

    /// Remove a kernel, keeping the order of the rest.
    pub fn unregister(&mut self, name: &str) -> Option<KernelEntry> {
        self.kernels.shift_remove(name)
    }

    /// Names of enabled kernels.
    pub fn names(&self) -> Vec<String> {
        self.kernels
            .iter()
            .filter(|(_, e)| e.enabled)
            .map(|(n, _)| n.clone())
            .collect()
    }

    /// Empty the table, returning every entry.
    pub fn drain(&mut self) -> Vec<KernelEntry> {
        self.kernels.drain(..).map(|(_, e)| e).collect()
    }

    pub fn len(&self) -> usize {
        self.kernels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kernels.is_empty()
    }

    pub fn enabled_count(&self) -> usize {
        self.kernels.values().filter(|e| e.enabled).count()
    }
}
