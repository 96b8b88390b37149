//! Kernels: named units of work with a declared parameter signature.
//!
//! A kernel is published on exactly one target. Its descriptor carries:
//! - The body, either a whole-node function or a pair of tile functions
//! - The parameter signature (direction, object kind, required/optional per slot)
//! - Validators that type the outputs during verification
//! - Optional node initialize/deinitialize hooks and scheduling attributes
//!
//! A kernel added through [`Context::add_kernel`] stays invisible to lookups until every
//! parameter is declared and [`Context::finalize_kernel`] has been called.

use crate::core::context::Context;
use crate::core::error::{VxError, VxResult};
use crate::core::meta::MetaFormat;
use crate::core::reference::{AsHandle, Creation, Handle, Kernel, Node, ObjectData, Payload, RefType};
use crate::core::types::{Border, Direction, ObjectType, ParameterState};
use crate::target::tiling::TileFn;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Whole-node kernel function. `params[i]` is `None` for an unset optional parameter.
pub type KernelFn = Arc<dyn Fn(&Context, Node, &[Option<Handle>]) -> VxResult<()> + Send + Sync>;

/// Validator over the whole node. `metas[i]` is `Some` for every output parameter.
pub type ValidateFn =
    Arc<dyn Fn(&Context, Node, &[Option<Handle>], &mut [Option<MetaFormat>]) -> VxResult<()> + Send + Sync>;

/// Checks one input parameter.
pub type InputValidatorFn = Arc<dyn Fn(&Context, Node, u32) -> VxResult<()> + Send + Sync>;

/// Describes one output parameter.
pub type OutputValidatorFn = Arc<dyn Fn(&Context, Node, u32, &mut MetaFormat) -> VxResult<()> + Send + Sync>;

/// Node initialize or deinitialize hook.
pub type NodeHook = Arc<dyn Fn(&Context, Node, &[Option<Handle>]) -> VxResult<()> + Send + Sync>;

/// How a kernel does its work.
#[derive(Clone)]
pub enum KernelBody {
    Function(KernelFn),
    /// Tile functions. `fast` only ever sees interior tiles.
    Tiling { fast: Option<TileFn>, flexible: TileFn },
}

impl KernelBody {
    pub fn is_tiling(&self) -> bool {
        matches!(self, KernelBody::Tiling { .. })
    }
}

/// How verification types the outputs of a kernel.
#[derive(Clone)]
pub enum Validation {
    /// No validator. Only tiling kernels may omit one; their image outputs then
    /// mirror the first image input.
    None,
    /// One callback for the whole node.
    Node(ValidateFn),
    /// One callback per input and one per output parameter.
    PerParameter {
        input: InputValidatorFn,
        output: OutputValidatorFn,
    },
}

/// Declared signature of one parameter slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub direction: Direction,
    pub object_type: ObjectType,
    pub state: ParameterState,
}

impl ParamSpec {
    pub fn new(direction: Direction, object_type: ObjectType, state: ParameterState) -> Self {
        Self {
            direction,
            object_type,
            state,
        }
    }

    pub fn required(direction: Direction, object_type: ObjectType) -> Self {
        Self::new(direction, object_type, ParameterState::Required)
    }
}

/// Pixels a tile function reads around its output tile.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Neighborhood {
    pub left: u32,
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
}

impl Neighborhood {
    pub fn square(radius: u32) -> Self {
        Self {
            left: radius,
            top: radius,
            right: radius,
            bottom: radius,
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Scheduling attributes of a kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelAttributes {
    /// Per-node scratch memory allocated at initialization.
    pub local_data_size: usize,
    /// Per-invocation scratch memory handed to tile functions.
    pub tile_memory_size: usize,
    /// Default border of nodes created from this kernel.
    pub border: Border,
    pub block_width: u32,
    pub block_height: u32,
    pub neighborhood: Neighborhood,
    /// Process the whole image as a single flexible tile.
    pub whole_image: bool,
}

impl Default for KernelAttributes {
    fn default() -> Self {
        Self {
            local_data_size: 0,
            tile_memory_size: 0,
            border: Border::undefined(),
            block_width: 64,
            block_height: 16,
            neighborhood: Neighborhood::default(),
            whole_image: false,
        }
    }
}

/// Settable kernel attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelAttribute {
    LocalDataSize(usize),
    TileMemorySize(usize),
    Border(Border),
    BlockSize(u32, u32),
    Neighborhood(Neighborhood),
    WholeImage(bool),
}

/// Everything needed to publish a kernel.
#[derive(Clone)]
pub struct KernelDescriptor {
    pub name: String,
    pub enumeration: u32,
    pub body: KernelBody,
    pub num_params: usize,
    pub params: Vec<Option<ParamSpec>>,
    pub validation: Validation,
    pub initialize: Option<NodeHook>,
    pub deinitialize: Option<NodeHook>,
    pub attributes: KernelAttributes,
}

impl fmt::Debug for KernelDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KernelDescriptor")
            .field("name", &self.name)
            .field("enumeration", &self.enumeration)
            .field("tiling", &self.body.is_tiling())
            .field("num_params", &self.num_params)
            .finish()
    }
}

impl KernelDescriptor {
    fn new(name: impl Into<String>, enumeration: u32, body: KernelBody, num_params: usize) -> Self {
        Self {
            name: name.into(),
            enumeration,
            body,
            num_params,
            params: vec![None; num_params],
            validation: Validation::None,
            initialize: None,
            deinitialize: None,
            attributes: KernelAttributes::default(),
        }
    }

    /// Kernel run as one call per node.
    pub fn function<F>(name: impl Into<String>, enumeration: u32, num_params: usize, f: F) -> Self
    where
        F: Fn(&Context, Node, &[Option<Handle>]) -> VxResult<()> + Send + Sync + 'static,
    {
        Self::new(name, enumeration, KernelBody::Function(Arc::new(f)), num_params)
    }

    /// Kernel run tile by tile.
    pub fn tiling(name: impl Into<String>, enumeration: u32, num_params: usize, fast: Option<TileFn>, flexible: TileFn) -> Self {
        Self::new(name, enumeration, KernelBody::Tiling { fast, flexible }, num_params)
    }

    /// Declare the next undeclared parameter slot.
    pub fn with_parameter(mut self, direction: Direction, object_type: ObjectType, state: ParameterState) -> Self {
        let spec = ParamSpec::new(direction, object_type, state);
        match self.params.iter_mut().find(|p| p.is_none()) {
            Some(slot) => *slot = Some(spec),
            None => {
                self.params.push(Some(spec));
                self.num_params = self.params.len();
            }
        }
        self
    }

    pub fn input(self, object_type: ObjectType) -> Self {
        self.with_parameter(Direction::Input, object_type, ParameterState::Required)
    }

    pub fn optional_input(self, object_type: ObjectType) -> Self {
        self.with_parameter(Direction::Input, object_type, ParameterState::Optional)
    }

    pub fn output(self, object_type: ObjectType) -> Self {
        self.with_parameter(Direction::Output, object_type, ParameterState::Required)
    }

    pub fn with_validator<F>(mut self, f: F) -> Self
    where
        F: Fn(&Context, Node, &[Option<Handle>], &mut [Option<MetaFormat>]) -> VxResult<()> + Send + Sync + 'static,
    {
        self.validation = Validation::Node(Arc::new(f));
        self
    }

    pub fn with_io_validators(mut self, input: InputValidatorFn, output: OutputValidatorFn) -> Self {
        self.validation = Validation::PerParameter { input, output };
        self
    }

    pub fn with_initialize(mut self, hook: NodeHook) -> Self {
        self.initialize = Some(hook);
        self
    }

    pub fn with_deinitialize(mut self, hook: NodeHook) -> Self {
        self.deinitialize = Some(hook);
        self
    }

    pub fn with_attribute(mut self, attribute: KernelAttribute) -> Self {
        apply_attribute(&mut self.attributes, attribute);
        self
    }

    /// Check the descriptor before it is published.
    fn check(&self, max_parameters: usize) -> VxResult<()> {
        if self.name.is_empty() || self.num_params == 0 || self.num_params > max_parameters {
            return Err(VxError::InvalidParameters);
        }
        if self.params.len() != self.num_params {
            return Err(VxError::InvalidParameters);
        }
        if matches!(self.validation, Validation::None) && !self.body.is_tiling() {
            return Err(VxError::InvalidParameters);
        }
        Ok(())
    }
}

fn apply_attribute(attributes: &mut KernelAttributes, attribute: KernelAttribute) {
    match attribute {
        KernelAttribute::LocalDataSize(n) => attributes.local_data_size = n,
        KernelAttribute::TileMemorySize(n) => attributes.tile_memory_size = n,
        KernelAttribute::Border(b) => attributes.border = b,
        KernelAttribute::BlockSize(w, h) => {
            attributes.block_width = w;
            attributes.block_height = h;
        }
        KernelAttribute::Neighborhood(n) => attributes.neighborhood = n,
        KernelAttribute::WholeImage(w) => attributes.whole_image = w,
    }
}

/// Payload of a kernel object.
#[derive(Clone)]
pub struct KernelData {
    /// Name without any target prefix.
    pub name: String,
    pub enumeration: u32,
    /// Target the kernel is published on.
    pub target: String,
    pub body: KernelBody,
    pub params: Vec<Option<ParamSpec>>,
    pub validation: Validation,
    pub initialize: Option<NodeHook>,
    pub deinitialize: Option<NodeHook>,
    pub attributes: KernelAttributes,
    pub finalized: bool,
    /// Published by a user or a module rather than a target.
    pub user: bool,
}

impl KernelData {
    /// Declared signature; only meaningful once finalized.
    pub fn signature(&self) -> Vec<ParamSpec> {
        self.params.iter().flatten().copied().collect()
    }
}

impl Payload for KernelData {
    fn project(data: &mut ObjectData) -> Option<&mut Self> {
        match data {
            ObjectData::Kernel(d) => Some(d.as_mut()),
            _ => None,
        }
    }
}

/// Attributes returned by [`Context::query_kernel`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelInfo {
    pub name: String,
    pub enumeration: u32,
    pub target: String,
    pub parameters: usize,
    pub attributes: KernelAttributes,
    pub is_tiling: bool,
    pub finalized: bool,
}

/// Vendor id reserved for user kernels and libraries.
pub const VENDOR_ID_USER: u32 = 0xFFE;

/// Highest kernel offset within a library.
pub const KERNEL_OFFSET_MAX: u32 = 0xFFF;

/// Highest library id.
pub const LIBRARY_ID_MAX: u32 = 0xFF;

/// First enumeration of `library` under `vendor`.
pub const fn kernel_base(vendor: u32, library: u32) -> u32 {
    ((vendor & 0xFFF) << 20) | ((library & 0xFF) << 12)
}

/// Split `<target>:<kernel>` into its parts. Names without `:` have no target prefix.
pub fn split_kernel_name(name: &str) -> (Option<&str>, &str) {
    match name.split_once(':') {
        Some((target, kernel)) if !target.is_empty() => (Some(target), kernel),
        Some((_, kernel)) => (None, kernel),
        None => (None, name),
    }
}

impl Context {
    /// Hand out the next unused user kernel enumeration.
    ///
    /// Fails with `NoResources` once every offset of the user vendor's library 0 is taken.
    pub fn allocate_user_kernel_id(&self) -> VxResult<u32> {
        let offset = self
            .inner
            .next_user_kernel
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| (n <= KERNEL_OFFSET_MAX).then_some(n + 1))
            .map_err(|_| VxError::NoResources)?;
        Ok(kernel_base(VENDOR_ID_USER, 0) + offset)
    }

    /// Hand out the next unused user library id. Library 0 is kept for
    /// [`allocate_user_kernel_id`](Self::allocate_user_kernel_id).
    pub fn allocate_user_kernel_library_id(&self) -> VxResult<u32> {
        self.inner
            .next_user_library
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| (n <= LIBRARY_ID_MAX).then_some(n + 1))
            .map_err(|_| VxError::NoResources)
    }

    /// Publish an unfinalized kernel.
    ///
    /// A `<target>:` prefix on the name selects the target; otherwise the kernel goes to
    /// the C-model target, or the first target when that one is not configured.
    pub fn add_kernel(&self, descriptor: KernelDescriptor) -> VxResult<Kernel> {
        let (prefix, base) = split_kernel_name(&descriptor.name);
        let target = self.resolve_target_name(prefix)?;
        let mut descriptor = descriptor.clone();
        descriptor.name = base.to_string();
        let kernel = self.publish_kernel(&target, descriptor, true)?;
        self.increment(kernel.handle(), RefType::External)?;
        Ok(kernel)
    }

    /// Publish a kernel on `target`. The target's table holds the only count.
    pub(crate) fn publish_kernel(&self, target: &str, descriptor: KernelDescriptor, user: bool) -> VxResult<Kernel> {
        if let Err(e) = descriptor.check(self.inner.config.max_parameters) {
            self.add_log_entry(None, e, &format!("rejected kernel '{}'", descriptor.name));
            return Err(e);
        }
        let data = KernelData {
            name: descriptor.name.clone(),
            enumeration: descriptor.enumeration,
            target: target.to_string(),
            body: descriptor.body,
            params: descriptor.params,
            validation: descriptor.validation,
            initialize: descriptor.initialize,
            deinitialize: descriptor.deinitialize,
            attributes: descriptor.attributes,
            finalized: false,
            user,
        };
        let handle = self.create_reference(
            Creation::internal(ObjectType::Kernel, self.handle()),
            ObjectData::Kernel(Box::new(data)),
        )?;
        let kernel = Kernel(handle);
        let inserted = self.with_target_mut(target, |t| t.kernels.insert(&descriptor.name, kernel, descriptor.enumeration));
        if let Err(e) = inserted.and_then(|r| r) {
            let _ = self.decrement(handle, RefType::Internal);
            return Err(e);
        }
        self.set_reference_name(kernel, &descriptor.name)?;
        log::trace!("published kernel '{}' on {}", descriptor.name, target);
        Ok(kernel)
    }

    /// Declare parameter `index` of an unfinalized kernel.
    pub fn add_parameter_to_kernel(
        &self,
        kernel: Kernel,
        index: usize,
        direction: Direction,
        object_type: ObjectType,
        state: ParameterState,
    ) -> VxResult<()> {
        if !object_type.is_data_object() && object_type != ObjectType::Reference {
            return Err(VxError::InvalidType);
        }
        self.with_payload::<KernelData, _>(kernel.handle(), |d| {
            if d.finalized {
                return Err(VxError::NotSupported);
            }
            let slot = d.params.get_mut(index).ok_or(VxError::InvalidParameters)?;
            *slot = Some(ParamSpec::new(direction, object_type, state));
            Ok(())
        })
    }

    /// Lock the signature and make the kernel visible to lookups.
    pub fn finalize_kernel(&self, kernel: Kernel) -> VxResult<()> {
        let (name, target) = self.with_payload::<KernelData, _>(kernel.handle(), |d| {
            if d.finalized {
                return Ok((d.name.clone(), d.target.clone()));
            }
            if d.params.iter().any(Option::is_none) {
                return Err(VxError::InvalidParameters);
            }
            d.finalized = true;
            Ok((d.name.clone(), d.target.clone()))
        })?;
        self.with_target_mut(&target, |t| t.kernels.set_enabled(&name, true))?;
        log::debug!("finalized kernel '{}' on {}", name, target);
        Ok(())
    }

    /// Unpublish a user kernel and release the caller's handle to it.
    ///
    /// Nodes already created from the kernel keep it alive.
    pub fn remove_kernel(&self, kernel: Kernel) -> VxResult<()> {
        let (name, target, user) =
            self.with_payload::<KernelData, _>(kernel.handle(), |d| Ok((d.name.clone(), d.target.clone(), d.user)))?;
        if !user {
            return Err(VxError::NotSupported);
        }
        self.unpublish_kernel(&target, &name)?;
        self.decrement(kernel.handle(), RefType::External)?;
        Ok(())
    }

    /// Drop a kernel from its target table along with the table's count.
    pub(crate) fn unpublish_kernel(&self, target: &str, name: &str) -> VxResult<()> {
        let entry = self
            .with_target_mut(target, |t| t.kernels.unregister(name))?
            .ok_or(VxError::InvalidParameters)?;
        log::trace!("unpublished kernel '{}' from {}", name, target);
        self.decrement(entry.kernel.handle(), RefType::Internal).map(|_| ())
    }

    /// Finalized kernel by name. A `<target>:` prefix restricts the search to that target.
    ///
    /// The caller receives a count and must release it.
    pub fn get_kernel_by_name(&self, name: &str) -> VxResult<Kernel> {
        let (prefix, base) = split_kernel_name(name);
        let found = self.inner.targets.read().iter().find_map(|t| {
            if prefix.is_some_and(|p| !t.matches(p)) {
                return None;
            }
            t.kernels.get(base).map(|e| e.kernel)
        });
        let kernel = found.ok_or(VxError::NotSupported)?;
        self.increment(kernel.handle(), RefType::External)?;
        Ok(kernel)
    }

    /// Finalized kernel by enumeration, first target in priority order wins.
    pub fn get_kernel_by_enum(&self, enumeration: u32) -> VxResult<Kernel> {
        let found = self
            .inner
            .targets
            .read()
            .iter()
            .find_map(|t| t.kernels.by_enum(enumeration).map(|e| e.kernel));
        let kernel = found.ok_or(VxError::NotSupported)?;
        self.increment(kernel.handle(), RefType::External)?;
        Ok(kernel)
    }

    pub fn query_kernel(&self, kernel: Kernel) -> VxResult<KernelInfo> {
        self.with_payload::<KernelData, _>(kernel.handle(), |d| {
            Ok(KernelInfo {
                name: d.name.clone(),
                enumeration: d.enumeration,
                target: d.target.clone(),
                parameters: d.params.len(),
                attributes: d.attributes,
                is_tiling: d.body.is_tiling(),
                finalized: d.finalized,
            })
        })
    }

    /// Declared signature of parameter `index`.
    pub fn kernel_parameter(&self, kernel: Kernel, index: usize) -> VxResult<ParamSpec> {
        self.with_payload::<KernelData, _>(kernel.handle(), |d| {
            d.params.get(index).copied().flatten().ok_or(VxError::InvalidParameters)
        })
    }

    /// Change an attribute. Only the local data size may change after finalization.
    pub fn set_kernel_attribute(&self, kernel: Kernel, attribute: KernelAttribute) -> VxResult<()> {
        self.with_payload::<KernelData, _>(kernel.handle(), |d| {
            if d.finalized && !matches!(attribute, KernelAttribute::LocalDataSize(_)) {
                return Err(VxError::NotSupported);
            }
            if let KernelAttribute::BlockSize(w, h) = attribute {
                if w == 0 || h == 0 {
                    return Err(VxError::InvalidValue);
                }
            }
            apply_attribute(&mut d.attributes, attribute);
            Ok(())
        })
    }

    /// Copy of a kernel's descriptor, for verification and dispatch.
    pub(crate) fn kernel_data(&self, kernel: Kernel) -> VxResult<KernelData> {
        self.with_payload::<KernelData, _>(kernel.handle(), |d| Ok(d.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::{TARGET_C_MODEL, TARGET_TILING};

    fn noop_descriptor(name: &str) -> KernelDescriptor {
        KernelDescriptor::function(name, 0x7_0001, 2, |_, _, _| Ok(()))
            .with_validator(|_, _, _, _| Ok(()))
    }

    #[test]
    fn test_split_kernel_name() {
        assert_eq!(split_kernel_name("khronos.tiling:vx.and"), (Some("khronos.tiling"), "vx.and"));
        assert_eq!(split_kernel_name("vx.and"), (None, "vx.and"));
        assert_eq!(split_kernel_name(":vx.and"), (None, "vx.and"));
    }

    #[test]
    fn test_descriptor_checks() {
        let no_validator = KernelDescriptor::function("k", 1, 1, |_, _, _| Ok(()));
        assert_eq!(no_validator.check(16), Err(VxError::InvalidParameters));
        let empty = KernelDescriptor::function("", 1, 1, |_, _, _| Ok(())).with_validator(|_, _, _, _| Ok(()));
        assert_eq!(empty.check(16), Err(VxError::InvalidParameters));
        let too_many = noop_descriptor("k");
        assert_eq!(too_many.check(1), Err(VxError::InvalidParameters));
        assert!(noop_descriptor("k").check(16).is_ok());
    }

    #[test]
    fn test_user_kernel_lifecycle() {
        let ctx = Context::create().unwrap();
        let kernel = ctx.add_kernel(noop_descriptor("user.noop")).unwrap();
        assert_eq!(ctx.get_kernel_by_name("user.noop"), Err(VxError::NotSupported));
        assert_eq!(ctx.finalize_kernel(kernel), Err(VxError::InvalidParameters));

        ctx.add_parameter_to_kernel(kernel, 0, Direction::Input, ObjectType::Image, ParameterState::Required)
            .unwrap();
        ctx.add_parameter_to_kernel(kernel, 1, Direction::Output, ObjectType::Image, ParameterState::Required)
            .unwrap();
        assert_eq!(
            ctx.add_parameter_to_kernel(kernel, 2, Direction::Input, ObjectType::Image, ParameterState::Required),
            Err(VxError::InvalidParameters)
        );
        ctx.finalize_kernel(kernel).unwrap();
        assert_eq!(
            ctx.add_parameter_to_kernel(kernel, 0, Direction::Input, ObjectType::Array, ParameterState::Required),
            Err(VxError::NotSupported)
        );

        let found = ctx.get_kernel_by_name("user.noop").unwrap();
        assert_eq!(found, kernel);
        assert_eq!(ctx.get_kernel_by_enum(0x7_0001).unwrap(), kernel);
        let info = ctx.query_kernel(kernel).unwrap();
        assert_eq!(info.target, TARGET_C_MODEL);
        assert_eq!(info.parameters, 2);
        assert!(info.finalized && !info.is_tiling);
        ctx.release(found).unwrap();

        ctx.remove_kernel(kernel).unwrap();
        assert!(!ctx.is_valid(kernel));
        assert_eq!(ctx.get_kernel_by_name("user.noop"), Err(VxError::NotSupported));
    }

    #[test]
    fn test_target_prefix_selects_table() {
        let ctx = Context::create().unwrap();
        let kernel = ctx
            .add_kernel(
                noop_descriptor("khronos.tiling:user.pair")
                    .input(ObjectType::Scalar)
                    .output(ObjectType::Scalar),
            )
            .unwrap();
        ctx.finalize_kernel(kernel).unwrap();
        assert_eq!(ctx.query_kernel(kernel).unwrap().target, TARGET_TILING);
        assert_eq!(ctx.get_kernel_by_name("khronos.c_model:user.pair"), Err(VxError::NotSupported));
        let k = ctx.get_kernel_by_name("khronos.tiling:user.pair").unwrap();
        assert_eq!(k, kernel);
        assert_eq!(ctx.add_kernel(noop_descriptor("nowhere:user.x")), Err(VxError::NotSupported));
    }

    #[test]
    fn test_user_kernel_ids_are_unique_and_bounded() {
        let ctx = Context::create().unwrap();
        let first = ctx.allocate_user_kernel_id().unwrap();
        assert_eq!(first, kernel_base(VENDOR_ID_USER, 0));
        assert_eq!(ctx.allocate_user_kernel_id().unwrap(), first + 1);
        for _ in 2..=KERNEL_OFFSET_MAX {
            ctx.allocate_user_kernel_id().unwrap();
        }
        assert_eq!(ctx.allocate_user_kernel_id(), Err(VxError::NoResources));

        let libraries: Vec<u32> = (0..LIBRARY_ID_MAX)
            .map(|_| ctx.allocate_user_kernel_library_id().unwrap())
            .collect();
        assert_eq!(libraries.first(), Some(&1));
        assert_eq!(libraries.last(), Some(&LIBRARY_ID_MAX));
        assert_eq!(ctx.allocate_user_kernel_library_id(), Err(VxError::NoResources));
    }

    #[test]
    fn test_allocated_id_finds_user_kernel() {
        let ctx = Context::create().unwrap();
        let id = ctx.allocate_user_kernel_id().unwrap();
        let kernel = ctx
            .add_kernel(
                KernelDescriptor::function("user.allocated", id, 1, |_, _, _| Ok(()))
                    .with_validator(|_, _, _, _| Ok(()))
                    .input(ObjectType::Scalar),
            )
            .unwrap();
        ctx.finalize_kernel(kernel).unwrap();
        assert_eq!(ctx.get_kernel_by_enum(id).unwrap(), kernel);
        // A second context starts its own sequence.
        assert_eq!(Context::create().unwrap().allocate_user_kernel_id().unwrap(), id);
    }

    #[test]
    fn test_builtin_kernels_cannot_be_removed() {
        let ctx = Context::create().unwrap();
        let and = ctx.get_kernel_by_name("org.khronos.openvx.and").unwrap();
        assert_eq!(ctx.query_kernel(and).unwrap().target, TARGET_TILING);
        assert_eq!(ctx.remove_kernel(and), Err(VxError::NotSupported));
        assert_eq!(
            ctx.set_kernel_attribute(and, KernelAttribute::WholeImage(true)),
            Err(VxError::NotSupported)
        );
        ctx.set_kernel_attribute(and, KernelAttribute::LocalDataSize(32)).unwrap();
        assert_eq!(ctx.query_kernel(and).unwrap().attributes.local_data_size, 32);
    }
}
