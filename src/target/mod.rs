//! Targets: execution backends and the kernels they publish.
//!
//! Targets are kept in priority order. Kernel lookups scan them front to back, so when
//! two targets publish the same kernel name the higher-priority one wins.

pub mod c_model;
pub mod kernel;
pub mod registry;
pub mod tiling;

use crate::core::config::TARGET_C_MODEL;
use crate::core::context::{Context, ModuleEntry};
use crate::core::error::{StatusFold, VxError, VxResult};
use crate::core::reference::{AsHandle, Handle, Kernel, Node, RefType};
use crate::core::types::Border;
use crate::target::kernel::{KernelBody, KernelData};
use crate::target::registry::KernelTable;
use std::sync::Arc;

pub use c_model::CModelTarget;
pub use kernel::{KernelAttribute, KernelAttributes, KernelDescriptor, KernelInfo, Neighborhood, ParamSpec, Validation};
pub use tiling::{ImageTile, TileFn, TileParam, TilingTarget};

/// Target names that match every target.
const ABSTRACT_TARGETS: [&str; 4] = ["any", "default", "performance", "power"];

/// One node call handed to a target.
pub struct Invocation {
    pub node: Node,
    pub kernel: KernelData,
    pub params: Vec<Option<Handle>>,
    /// Effective border of the node.
    pub border: Border,
}

/// An execution backend.
pub trait TargetBackend: Send + Sync {
    /// Publish this target's kernels.
    fn init(&self, ctx: &Context, target: &str) -> VxResult<()>;

    fn deinit(&self, _ctx: &Context) -> VxResult<()> {
        Ok(())
    }

    /// Target-specific check of a node during verification.
    fn verify(&self, _ctx: &Context, _invocation: &Invocation) -> VxResult<()> {
        Ok(())
    }

    /// Run one node.
    fn process(&self, ctx: &Context, invocation: &Invocation) -> VxResult<()> {
        match &invocation.kernel.body {
            KernelBody::Function(f) => f(ctx, invocation.node, &invocation.params),
            KernelBody::Tiling { .. } => tiling::process_tiled(ctx, invocation),
        }
    }
}

/// A configured target.
pub struct Target {
    pub name: String,
    pub priority: u32,
    pub(crate) backend: Arc<dyn TargetBackend>,
    pub(crate) kernels: KernelTable,
}

impl Target {
    /// Whether a requested target name designates this target.
    ///
    /// Matches the full name, the last dotted component (`tiling` for `khronos.tiling`),
    /// or one of the abstract names `any`, `default`, `performance` and `power`.
    pub fn matches(&self, requested: &str) -> bool {
        let requested = requested.to_ascii_lowercase();
        requested == self.name.to_ascii_lowercase()
            || ABSTRACT_TARGETS.contains(&requested.as_str())
            || self.name.rsplit('.').next().is_some_and(|last| last.eq_ignore_ascii_case(&requested))
    }

    /// Whether this target can run `kernel_name` when `requested` is asked for.
    pub fn supports(&self, requested: &str, kernel_name: &str) -> bool {
        let (_, base) = kernel::split_kernel_name(kernel_name);
        self.matches(requested) && self.kernels.get(base).is_some()
    }

    pub fn kernel_count(&self) -> usize {
        self.kernels.enabled_count()
    }
}

fn builtin_backend(name: &str) -> Option<Arc<dyn TargetBackend>> {
    match name {
        crate::core::config::TARGET_C_MODEL => Some(Arc::new(CModelTarget)),
        crate::core::config::TARGET_TILING => Some(Arc::new(TilingTarget)),
        _ => None,
    }
}

/// A named set of kernels published on demand by [`Context::load_kernels`].
pub trait KernelModule: Send + Sync {
    fn name(&self) -> &str;

    /// Add and finalize this module's kernels, returning one handle per kernel.
    fn publish(&self, ctx: &Context) -> VxResult<Vec<Kernel>>;
}

impl Context {
    /// Bring up every enabled target in priority order.
    pub(crate) fn init_targets(&self) -> VxResult<()> {
        let order: Vec<_> = self.inner.config.target_order().into_iter().cloned().collect();
        for config in order {
            let Some(backend) = builtin_backend(&config.name) else {
                log::warn!("unknown target '{}' skipped", config.name);
                continue;
            };
            self.inner.targets.write().push(Target {
                name: config.name.clone(),
                priority: config.priority,
                backend: Arc::clone(&backend),
                kernels: KernelTable::new(self.inner.config.max_kernels_per_target),
            });
            if let Err(e) = backend.init(self, &config.name) {
                log::error!("target '{}' failed to initialize: {}", config.name, e);
                let _ = self.deinit_targets();
                return Err(e);
            }
            log::debug!("target '{}' up (priority {})", config.name, config.priority);
        }
        Ok(())
    }

    /// Deinitialize every target and drop its kernel table.
    pub(crate) fn deinit_targets(&self) -> VxResult<()> {
        let targets = std::mem::take(&mut *self.inner.targets.write());
        let mut fold = StatusFold::new();
        for mut target in targets {
            fold.push(target.backend.deinit(self));
            for entry in target.kernels.drain() {
                fold.push(self.decrement(entry.kernel.handle(), RefType::Internal));
            }
            log::debug!("target '{}' down", target.name);
        }
        fold.finish()
    }

    /// Target a kernel name prefix designates, or the default target for user kernels.
    pub(crate) fn resolve_target_name(&self, prefix: Option<&str>) -> VxResult<String> {
        let targets = self.inner.targets.read();
        let found = match prefix {
            Some(p) => targets.iter().find(|t| t.matches(p)),
            None => targets
                .iter()
                .find(|t| t.name == TARGET_C_MODEL)
                .or_else(|| targets.first()),
        };
        found.map(|t| t.name.clone()).ok_or(VxError::NotSupported)
    }

    pub(crate) fn with_target_mut<R>(&self, name: &str, f: impl FnOnce(&mut Target) -> R) -> VxResult<R> {
        let mut targets = self.inner.targets.write();
        let target = targets.iter_mut().find(|t| t.name == name).ok_or(VxError::NotSupported)?;
        Ok(f(target))
    }

    pub(crate) fn backend(&self, name: &str) -> VxResult<Arc<dyn TargetBackend>> {
        self.inner
            .targets
            .read()
            .iter()
            .find(|t| t.name == name)
            .map(|t| Arc::clone(&t.backend))
            .ok_or(VxError::NotSupported)
    }

    /// First target, in priority order, that supports `kernel_name` under `requested`.
    pub(crate) fn find_supporting_target(&self, requested: &str, kernel_name: &str) -> Option<(String, Kernel)> {
        let (_, base) = kernel::split_kernel_name(kernel_name);
        self.inner
            .targets
            .read()
            .iter()
            .find(|t| t.supports(requested, base))
            .and_then(|t| t.kernels.get(base).map(|e| (t.name.clone(), e.kernel)))
    }

    /// Whether the target named exactly `target` still publishes `kernel_name`.
    pub(crate) fn target_publishes(&self, target: &str, kernel_name: &str) -> bool {
        self.inner
            .targets
            .read()
            .iter()
            .any(|t| t.name == target && t.supports(target, kernel_name))
    }

    /// Names of the configured targets in priority order.
    pub fn target_names(&self) -> Vec<String> {
        self.inner.targets.read().iter().map(|t| t.name.clone()).collect()
    }

    /// Names of the finalized kernels a target publishes.
    pub fn target_kernels(&self, target: &str) -> VxResult<Vec<String>> {
        self.inner
            .targets
            .read()
            .iter()
            .find(|t| t.name == target)
            .map(|t| t.kernels.names())
            .ok_or(VxError::NotSupported)
    }

    // ========================================================================
    // Kernel modules
    // ========================================================================

    /// Make a module available to [`Context::load_kernels`].
    pub fn register_kernel_module(&self, module: Box<dyn KernelModule>) -> VxResult<()> {
        let name = module.name().to_string();
        let mut modules = self.inner.modules.lock();
        if name.is_empty() || modules.contains_key(&name) {
            return Err(VxError::InvalidParameters);
        }
        modules.insert(
            name,
            ModuleEntry {
                module: Arc::from(module),
                loaded: false,
                kernels: Vec::new(),
            },
        );
        Ok(())
    }

    /// Publish the kernels of a registered module. Loading twice is a no-op.
    pub fn load_kernels(&self, name: &str) -> VxResult<()> {
        let module = {
            let modules = self.inner.modules.lock();
            let entry = modules.get(name).ok_or(VxError::InvalidModule)?;
            if entry.loaded {
                return Ok(());
            }
            Arc::clone(&entry.module)
        };
        // The module publishes through the context; the module table stays unlocked meanwhile.
        let published = module.publish(self);
        let kernels = match published {
            Ok(k) => k,
            Err(e) => {
                self.add_log_entry(None, e, &format!("module '{}' failed to load", name));
                return Err(e);
            }
        };
        log::debug!("loaded module '{}' with {} kernel(s)", name, kernels.len());
        if let Some(entry) = self.inner.modules.lock().get_mut(name) {
            entry.loaded = true;
            entry.kernels = kernels;
        }
        Ok(())
    }

    /// Unpublish the kernels a module added.
    pub fn unload_kernels(&self, name: &str) -> VxResult<()> {
        let kernels = {
            let mut modules = self.inner.modules.lock();
            let entry = modules.get_mut(name).ok_or(VxError::InvalidModule)?;
            if !entry.loaded {
                return Err(VxError::InvalidParameters);
            }
            entry.loaded = false;
            std::mem::take(&mut entry.kernels)
        };
        let mut fold = StatusFold::new();
        for kernel in kernels {
            fold.push(self.remove_kernel(kernel));
        }
        log::debug!("unloaded module '{}'", name);
        fold.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::{ContextConfig, TargetConfig, TARGET_TILING};
    use crate::core::types::ObjectType;

    struct DoublerModule;

    impl KernelModule for DoublerModule {
        fn name(&self) -> &str {
            "test.doubler"
        }

        fn publish(&self, ctx: &Context) -> VxResult<Vec<Kernel>> {
            let desc = KernelDescriptor::function("test.double", 0x9_0001, 2, |_, _, _| Ok(()))
                .input(ObjectType::Scalar)
                .output(ObjectType::Scalar)
                .with_validator(|_, _, _, _| Ok(()));
            let kernel = ctx.add_kernel(desc)?;
            ctx.finalize_kernel(kernel)?;
            Ok(vec![kernel])
        }
    }

    #[test]
    fn test_target_matching() {
        let ctx = Context::create().unwrap();
        let targets = ctx.inner.targets.read();
        let tiling = targets.iter().find(|t| t.name == TARGET_TILING).unwrap();
        assert!(tiling.matches("khronos.tiling"));
        assert!(tiling.matches("TILING"));
        assert!(tiling.matches("default"));
        assert!(!tiling.matches("c_model"));
        assert!(tiling.supports("any", "org.khronos.openvx.and"));
        assert!(!tiling.supports("any", "org.khronos.openvx.color_convert"));
        assert!(tiling.kernel_count() > 0);
    }

    #[test]
    fn test_priority_decides_competing_kernels() {
        let ctx = Context::create().unwrap();
        let and = ctx.get_kernel_by_name("org.khronos.openvx.and").unwrap();
        assert_eq!(ctx.query_kernel(and).unwrap().target, TARGET_TILING);

        let config = ContextConfig::default().with_targets(vec![
            TargetConfig::new(TARGET_TILING, 5),
            TargetConfig::new(TARGET_C_MODEL, 1),
        ]);
        let ctx = Context::with_config(config).unwrap();
        let and = ctx.get_kernel_by_name("org.khronos.openvx.and").unwrap();
        assert_eq!(ctx.query_kernel(and).unwrap().target, TARGET_C_MODEL);
        assert_eq!(ctx.target_names(), vec![TARGET_C_MODEL, TARGET_TILING]);
    }

    #[test]
    fn test_unknown_targets_are_skipped() {
        let config = ContextConfig::default().with_targets(vec![
            TargetConfig::new("vendor.dsp", 0),
            TargetConfig::new(TARGET_C_MODEL, 1),
        ]);
        let ctx = Context::with_config(config).unwrap();
        assert_eq!(ctx.target_names(), vec![TARGET_C_MODEL]);
        assert!(ctx.target_kernels("vendor.dsp").is_err());
        assert!(ctx
            .target_kernels(TARGET_C_MODEL)
            .unwrap()
            .contains(&"org.khronos.openvx.color_convert".to_string()));
    }

    #[test]
    fn test_module_load_and_unload() {
        let ctx = Context::create().unwrap();
        assert_eq!(ctx.load_kernels("test.doubler"), Err(VxError::InvalidModule));
        ctx.register_kernel_module(Box::new(DoublerModule)).unwrap();
        assert_eq!(
            ctx.register_kernel_module(Box::new(DoublerModule)),
            Err(VxError::InvalidParameters)
        );
        ctx.load_kernels("test.doubler").unwrap();
        ctx.load_kernels("test.doubler").unwrap();
        assert_eq!(ctx.query_context().modules, 1);
        let k = ctx.get_kernel_by_name("test.double").unwrap();
        ctx.release(k).unwrap();

        ctx.unload_kernels("test.doubler").unwrap();
        assert_eq!(ctx.get_kernel_by_name("test.double"), Err(VxError::NotSupported));
        assert_eq!(ctx.unload_kernels("test.doubler"), Err(VxError::InvalidParameters));
        assert_eq!(ctx.query_context().modules, 0);
    }
}
