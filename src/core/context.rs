//! The context: root of every object, target and table.
//!
//! A [`Context`] is a cheap, cloneable handle to shared state. Several independent contexts
//! may exist at once; handles carry their context id and are rejected by any other context.

use crate::core::config::ContextConfig;
use crate::core::error::{StatusFold, VxError, VxResult};
use crate::core::memory::{AccessTable, MemoryTracker};
use crate::core::reference::{ContextId, Handle, ObjectData, RefHeader, RefObject, ReferenceTable};
use crate::core::types::{Border, DataType, ObjectType};
use crate::target::{KernelModule, Target};
use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

/// Vendor id reported by `query_context`.
pub const VENDOR_ID: u16 = 0x0BAD;

/// First id handed out to user-registered structs.
pub const USER_STRUCT_BASE: u32 = 0x100;

/// Callback receiving error-log entries.
pub type LogCallback = Arc<dyn Fn(Option<Handle>, VxError, &str) + Send + Sync>;

/// One error-log entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub reference: Option<Handle>,
    pub status: VxError,
    pub message: String,
}

struct LogRing {
    entries: VecDeque<LogEntry>,
    capacity: usize,
    enabled: bool,
    callback: Option<(LogCallback, bool)>,
}

/// A user-registered item type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserStruct {
    pub size: usize,
    pub name: Option<String>,
}

/// Summary returned by [`Context::query_context`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextInfo {
    pub vendor_id: u16,
    pub version: String,
    pub implementation: String,
    pub references: usize,
    pub modules: usize,
    pub targets: Vec<String>,
    pub unique_kernels: usize,
    pub user_structs: usize,
    pub immediate_border: Border,
    pub memory_in_use: usize,
    pub memory_peak: usize,
    pub memory_limit: usize,
}

pub(crate) struct ContextInner {
    pub(crate) id: ContextId,
    pub(crate) config: ContextConfig,
    pub(crate) table: RwLock<ReferenceTable>,
    pub(crate) targets: RwLock<Vec<Target>>,
    pub(crate) modules: Mutex<IndexMap<String, ModuleEntry>>,
    pub(crate) user_structs: Mutex<IndexMap<u32, UserStruct>>,
    pub(crate) maps: Arc<Mutex<AccessTable>>,
    pub(crate) memory: MemoryTracker,
    pub(crate) next_user_kernel: AtomicU32,
    pub(crate) next_user_library: AtomicU32,
    log: Mutex<LogRing>,
    log_serial: Mutex<()>,
    immediate_border: Mutex<Border>,
    alive: AtomicBool,
}

pub(crate) struct ModuleEntry {
    pub module: Arc<dyn KernelModule>,
    pub loaded: bool,
    pub kernels: Vec<crate::core::reference::Kernel>,
}

/// Root object owning every reference, target and kernel module.
#[derive(Clone)]
pub struct Context {
    pub(crate) inner: Arc<ContextInner>,
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context").field("id", &self.inner.id).finish()
    }
}

impl Context {
    /// Create a context with the default configuration.
    pub fn create() -> VxResult<Self> {
        Self::with_config(ContextConfig::default())
    }

    /// Create a context and bring up the configured targets.
    pub fn with_config(config: ContextConfig) -> VxResult<Self> {
        config.validate().map_err(|e| {
            log::error!("{}", e);
            VxError::InvalidParameters
        })?;
        let id = ContextId::new();
        let inner = ContextInner {
            id,
            table: RwLock::new(ReferenceTable::new(config.max_references)),
            targets: RwLock::new(Vec::new()),
            modules: Mutex::new(IndexMap::new()),
            user_structs: Mutex::new(IndexMap::new()),
            maps: Arc::new(Mutex::new(AccessTable::new(config.max_references))),
            memory: MemoryTracker::new(config.memory_limit),
            next_user_kernel: AtomicU32::new(0),
            next_user_library: AtomicU32::new(1),
            log: Mutex::new(LogRing {
                entries: VecDeque::new(),
                capacity: config.log_capacity,
                enabled: true,
                callback: None,
            }),
            log_serial: Mutex::new(()),
            immediate_border: Mutex::new(config.immediate_border),
            alive: AtomicBool::new(true),
            config,
        };
        let ctx = Context {
            inner: Arc::new(inner),
        };

        let self_handle = Handle {
            context: id,
            index: 0,
            generation: 1,
        };
        let object = Arc::new(RefObject::new(
            ObjectType::Context,
            RefHeader {
                external: 1,
                internal: 0,
                scope: self_handle,
                is_virtual: false,
                is_accessible: true,
                delay: None,
                name: "context".to_string(),
                read_count: 0,
                write_count: 0,
                bound_in: Vec::new(),
            },
            ObjectData::Context,
        ));
        let slot = ctx.inner.table.write().insert(object)?;
        debug_assert_eq!(slot, (0, 1));

        ctx.init_targets()?;
        log::debug!(
            "context {} created with {} target(s)",
            id,
            ctx.inner.targets.read().len()
        );
        Ok(ctx)
    }

    /// Id of this context.
    pub fn id(&self) -> ContextId {
        self.inner.id
    }

    /// Handle of the context object itself.
    pub fn handle(&self) -> Handle {
        Handle {
            context: self.inner.id,
            index: 0,
            generation: 1,
        }
    }

    pub fn config(&self) -> &ContextConfig {
        &self.inner.config
    }

    /// Whether the context has not been released.
    pub fn is_alive(&self) -> bool {
        self.inner.alive.load(Ordering::Acquire)
    }

    /// Tear the context down: unload modules, deinitialize targets and drop every object.
    ///
    /// Every outstanding handle becomes invalid. A second call fails with `InvalidReference`.
    pub fn release_context(&self) -> VxResult<()> {
        if !self.inner.alive.swap(false, Ordering::AcqRel) {
            return Err(VxError::InvalidReference);
        }
        let mut fold = StatusFold::new();

        let loaded: Vec<String> = self
            .inner
            .modules
            .lock()
            .iter()
            .filter(|(_, m)| m.loaded)
            .map(|(n, _)| n.clone())
            .collect();
        for name in loaded {
            fold.push(self.unload_kernels(&name));
        }
        fold.push(self.deinit_targets());

        let leaked = {
            let mut table = self.inner.table.write();
            let live = table.live_objects();
            let mut leaked = 0usize;
            for (index, generation, object) in live {
                if object.kind != ObjectType::Context {
                    leaked += 1;
                }
                table.remove(index, generation);
                *object.data.lock() = ObjectData::Released;
            }
            leaked
        };
        if leaked > 0 {
            log::warn!("context {} released with {} live reference(s)", self.id(), leaked);
        }
        self.inner.memory.release(self.inner.memory.current_usage());
        log::debug!("context {} released", self.id());
        fold.finish()
    }

    /// Summary of the context state.
    pub fn query_context(&self) -> ContextInfo {
        let targets = self.inner.targets.read();
        let mut names: Vec<String> = Vec::new();
        for t in targets.iter() {
            for name in t.kernels.names() {
                if !names.contains(&name) {
                    names.push(name);
                }
            }
        }
        ContextInfo {
            vendor_id: VENDOR_ID,
            version: crate::VERSION.to_string(),
            implementation: crate::NAME.to_string(),
            references: self.inner.table.read().len(),
            modules: self.inner.modules.lock().values().filter(|m| m.loaded).count(),
            targets: targets.iter().map(|t| t.name.clone()).collect(),
            unique_kernels: names.len(),
            user_structs: self.inner.user_structs.lock().len(),
            immediate_border: *self.inner.immediate_border.lock(),
            memory_in_use: self.inner.memory.current_usage(),
            memory_peak: self.inner.memory.peak_usage(),
            memory_limit: self.inner.memory.limit(),
        }
    }

    pub fn immediate_border(&self) -> Border {
        *self.inner.immediate_border.lock()
    }

    pub fn set_immediate_border(&self, border: Border) {
        *self.inner.immediate_border.lock() = border;
    }

    /// Bytes of object storage currently charged to this context.
    pub fn memory_in_use(&self) -> usize {
        self.inner.memory.current_usage()
    }

    // ========================================================================
    // User structs
    // ========================================================================

    /// Register an opaque item type of `size` bytes for arrays and scalars.
    pub fn register_user_struct(&self, size: usize) -> VxResult<DataType> {
        self.register_user_struct_inner(size, None)
    }

    /// Register a named item type; names must be unique.
    pub fn register_user_struct_with_name(&self, size: usize, name: &str) -> VxResult<DataType> {
        if name.is_empty() {
            return Err(VxError::InvalidParameters);
        }
        self.register_user_struct_inner(size, Some(name.to_string()))
    }

    fn register_user_struct_inner(&self, size: usize, name: Option<String>) -> VxResult<DataType> {
        if size == 0 {
            return Err(VxError::InvalidParameters);
        }
        let mut structs = self.inner.user_structs.lock();
        if name.is_some() && structs.values().any(|s| s.name == name) {
            return Err(VxError::InvalidParameters);
        }
        if structs.len() >= self.inner.config.max_references {
            return Err(VxError::NoResources);
        }
        let id = USER_STRUCT_BASE + structs.len() as u32;
        structs.insert(id, UserStruct { size, name });
        Ok(DataType::UserStruct(id))
    }

    pub fn user_struct_by_name(&self, name: &str) -> VxResult<DataType> {
        self.inner
            .user_structs
            .lock()
            .iter()
            .find(|(_, s)| s.name.as_deref() == Some(name))
            .map(|(id, _)| DataType::UserStruct(*id))
            .ok_or(VxError::Failure)
    }

    pub fn user_struct_name(&self, data_type: DataType) -> VxResult<Option<String>> {
        match data_type {
            DataType::UserStruct(id) => self
                .inner
                .user_structs
                .lock()
                .get(&id)
                .map(|s| s.name.clone())
                .ok_or(VxError::InvalidType),
            _ => Err(VxError::InvalidParameters),
        }
    }

    /// Byte size of an item type, resolving user structs.
    pub fn item_size(&self, data_type: DataType) -> VxResult<usize> {
        match data_type {
            DataType::UserStruct(id) => self
                .inner
                .user_structs
                .lock()
                .get(&id)
                .map(|s| s.size)
                .ok_or(VxError::InvalidType),
            other => other.fixed_size().ok_or(VxError::InvalidType),
        }
    }

    // ========================================================================
    // Error log
    // ========================================================================

    /// Append an entry to the error log and forward it to the log callback.
    pub fn add_log_entry(&self, reference: Option<Handle>, status: VxError, message: &str) {
        log::debug!(
            "log entry [{}]: {} ({})",
            reference.map(|r| r.to_string()).unwrap_or_else(|| "-".to_string()),
            message,
            status
        );
        let callback = {
            let mut ring = self.inner.log.lock();
            if !ring.enabled {
                return;
            }
            if ring.capacity > 0 {
                if ring.entries.len() >= ring.capacity {
                    ring.entries.pop_front();
                }
                ring.entries.push_back(LogEntry {
                    reference,
                    status,
                    message: message.to_string(),
                });
            }
            ring.callback.clone()
        };
        if let Some((cb, reentrant)) = callback {
            if reentrant {
                cb(reference, status, message);
            } else {
                let _serial = self.inner.log_serial.lock();
                cb(reference, status, message);
            }
        }
    }

    /// Entries currently in the log ring, oldest first.
    pub fn log_entries(&self) -> Vec<LogEntry> {
        self.inner.log.lock().entries.iter().cloned().collect()
    }

    /// Install or clear the log callback. Non-reentrant callbacks are serialized.
    pub fn register_log_callback(&self, callback: Option<LogCallback>, reentrant: bool) {
        self.inner.log.lock().callback = callback.map(|cb| (cb, reentrant));
    }

    pub fn set_logging_enabled(&self, enabled: bool) {
        self.inner.log.lock().enabled = enabled;
    }
}
