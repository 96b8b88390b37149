//! Individual verification stages.
//!
//! Each stage checks one aspect of a graph and may fill in the plan for the stages after
//! it. A stage that fails reports every issue it found; later stages do not run.

use crate::core::context::Context;
use crate::core::error::{VerifyIssue, VxError, VxResult};
use crate::core::meta::MetaFormat;
use crate::core::reference::{Array, Handle, Image, Node, Tensor, UserData};
use crate::core::types::{Direction, ObjectType, ParameterState, Rectangle};
use crate::graph::topology::TopologyAnalyzer;
use crate::target::kernel::{ParamSpec, Validation};
use crate::target::Invocation;
use crate::validation::pipeline::{PlannedNode, VerifyPlan};

/// One verification stage.
pub trait ValidationStage: Send + Sync {
    fn name(&self) -> &str;

    /// Check the plan. Returns every issue found on failure.
    fn validate(&self, plan: &mut VerifyPlan<'_>) -> Result<(), Vec<VerifyIssue>>;
}

fn issue(stage: &str, node: Option<Node>, parameter: Option<u32>, status: VxError, message: impl Into<String>) -> VerifyIssue {
    VerifyIssue {
        stage: stage.to_string(),
        node: node.map(|n| n.0),
        parameter,
        status,
        message: message.into(),
    }
}

/// Allocate backing storage for an object and everything it contains.
fn allocate_storage(ctx: &Context, handle: Handle) -> VxResult<()> {
    match ctx.object_type(handle)? {
        ObjectType::Image => ctx.allocate_image(Image(handle)),
        ObjectType::Array => ctx.allocate_array(Array(handle)),
        ObjectType::Tensor => ctx.allocate_tensor(Tensor(handle)),
        ObjectType::UserData => ctx.allocate_user_data_object(UserData(handle)),
        ObjectType::Pyramid | ObjectType::ObjectArray => {
            for element in ctx.elements_of(handle)? {
                allocate_storage(ctx, element)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

// ============================================================================
// Parameters
// ============================================================================

/// Required parameters are bound, bound objects have the declared kind and virtual
/// objects belong to this graph or one of its ancestors.
pub struct ParameterStage;

impl ParameterStage {
    fn check_bound(&self, ctx: &Context, planned: &PlannedNode, index: usize, spec: &ParamSpec, handle: Handle) -> Result<(), VerifyIssue> {
        let fail = |status, message: String| issue(self.name(), Some(planned.node), Some(index as u32), status, message);
        let kind = ctx
            .object_type(handle)
            .map_err(|e| fail(e, format!("parameter {} is not a live object", index)))?;
        if !spec.object_type.accepts(kind) {
            return Err(fail(
                VxError::InvalidType,
                format!("expected {}, bound to {}", spec.object_type, kind),
            ));
        }
        let graph = ctx.node_graph(planned.node).map_err(|e| fail(e, "node has no graph".to_string()))?;
        let (is_virtual, scope) = ctx
            .with_header(handle, |h| (h.is_virtual, h.scope))
            .map_err(|e| fail(e, "unreadable header".to_string()))?;
        if is_virtual && !ctx.graph_in_scope(graph, scope).unwrap_or(false) {
            return Err(fail(VxError::InvalidScope, "virtual object from another graph".to_string()));
        }
        Ok(())
    }
}

impl ValidationStage for ParameterStage {
    fn name(&self) -> &str {
        "parameters"
    }

    fn validate(&self, plan: &mut VerifyPlan<'_>) -> Result<(), Vec<VerifyIssue>> {
        let ctx = plan.ctx;
        let mut issues = Vec::new();
        for planned in &plan.nodes {
            let signature = planned.kernel.signature();
            for (i, spec) in signature.iter().enumerate() {
                match planned.params.get(i).copied().flatten() {
                    None if spec.state == ParameterState::Required => issues.push(issue(
                        self.name(),
                        Some(planned.node),
                        Some(i as u32),
                        VxError::NotSufficient,
                        format!("required parameter {} of '{}' is unset", i, planned.kernel.name),
                    )),
                    None => {}
                    Some(h) => {
                        if let Err(e) = self.check_bound(ctx, planned, i, spec, h) {
                            issues.push(e);
                        }
                    }
                }
            }
            if let Some(flags) = &planned.replicated {
                if let Err(e) = ctx.replica_params(&planned.params, Some(flags)) {
                    issues.push(issue(
                        self.name(),
                        Some(planned.node),
                        None,
                        e,
                        "replicated parameters disagree on the replica count",
                    ));
                }
            }
        }
        if issues.is_empty() {
            Ok(())
        } else {
            Err(issues)
        }
    }
}

// ============================================================================
// Topology
// ============================================================================

/// Derives dependencies, rejects cycles and fixes the execution order.
pub struct TopologyStage;

impl ValidationStage for TopologyStage {
    fn name(&self) -> &str {
        "topology"
    }

    fn validate(&self, plan: &mut VerifyPlan<'_>) -> Result<(), Vec<VerifyIssue>> {
        if plan.nodes.is_empty() {
            return Err(vec![issue(self.name(), None, None, VxError::InvalidGraph, "graph has no nodes")]);
        }
        let ctx = plan.ctx;
        let views = plan
            .nodes
            .iter()
            .map(|n| ctx.node_view(n.node))
            .collect::<VxResult<Vec<_>>>()
            .map_err(|e| vec![issue(self.name(), None, None, e, "cannot derive node dependencies")])?;
        let analyzer = TopologyAnalyzer::new(&views);
        let order = analyzer.topological_sort().map_err(|e| {
            vec![issue(self.name(), None, None, e, "nodes form a cycle")]
        })?;
        let waves = analyzer
            .parallel_batches()
            .map_err(|e| vec![issue(self.name(), None, None, e, "nodes form a cycle")])?;
        plan.heads = analyzer.heads();
        plan.order = order;
        plan.waves = waves;
        log::trace!(
            "graph {}: {} node(s), {} head(s), {} wave(s)",
            plan.graph,
            plan.nodes.len(),
            plan.heads.len(),
            plan.waves.len()
        );
        plan.views = views;
        Ok(())
    }
}

// ============================================================================
// Single writer
// ============================================================================

/// No two nodes may write overlapping storage.
pub struct SingleWriterStage;

impl ValidationStage for SingleWriterStage {
    fn name(&self) -> &str {
        "single_writer"
    }

    fn validate(&self, plan: &mut VerifyPlan<'_>) -> Result<(), Vec<VerifyIssue>> {
        let analyzer = TopologyAnalyzer::new(&plan.views);
        match analyzer.writer_conflict() {
            Some((a, b)) => Err(vec![issue(
                self.name(),
                Some(plan.nodes[b].node),
                None,
                VxError::MultipleWriters,
                format!("nodes {} and {} write the same data", plan.nodes[a].node, plan.nodes[b].node),
            )]),
            None => Ok(()),
        }
    }
}

// ============================================================================
// Meta formats
// ============================================================================

/// Runs the kernels' validators in dependency order, sizes virtual outputs from the
/// formats they report and allocates them.
pub struct MetaFormatStage;

impl MetaFormatStage {
    fn fail(&self, node: Node, parameter: Option<usize>, status: VxError, message: String) -> VerifyIssue {
        issue(self.name(), Some(node), parameter.map(|p| p as u32), status, message)
    }

    fn run_validators(&self, ctx: &Context, planned: &PlannedNode, signature: &[ParamSpec]) -> Result<Vec<Option<MetaFormat>>, VerifyIssue> {
        let node = planned.node;
        let name = &planned.kernel.name;
        let mut metas: Vec<Option<MetaFormat>> = vec![None; signature.len()];
        for (i, spec) in signature.iter().enumerate() {
            if spec.direction != Direction::Output {
                continue;
            }
            if let Some(h) = planned.params[i] {
                let kind = ctx.object_type(h).map_err(|e| self.fail(node, Some(i), e, "dead output".to_string()))?;
                metas[i] = Some(MetaFormat::new(kind));
            }
        }
        match &planned.kernel.validation {
            Validation::Node(validate) => validate(ctx, node, &planned.params, &mut metas)
                .map_err(|e| self.fail(node, None, e, format!("validator of '{}' rejected the node", name)))?,
            Validation::PerParameter { input, output } => {
                for (i, spec) in signature.iter().enumerate() {
                    if spec.direction != Direction::Output && planned.params[i].is_some() {
                        input(ctx, node, i as u32)
                            .map_err(|e| self.fail(node, Some(i), e, format!("'{}' rejected input {}", name, i)))?;
                    }
                }
                for (i, meta) in metas.iter_mut().enumerate() {
                    if let Some(meta) = meta {
                        output(ctx, node, i as u32, meta)
                            .map_err(|e| self.fail(node, Some(i), e, format!("'{}' rejected output {}", name, i)))?;
                    }
                }
            }
            Validation::None => {
                // Image outputs take the shape of the first image input.
                let first_image = signature
                    .iter()
                    .zip(&planned.params)
                    .filter(|(s, _)| s.direction != Direction::Output)
                    .filter_map(|(_, p)| *p)
                    .find(|h| ctx.object_type(*h).ok() == Some(ObjectType::Image));
                for (i, meta) in metas.iter_mut().enumerate() {
                    let (Some(meta), Some(h)) = (meta, planned.params[i]) else { continue };
                    let source = match (meta.object_type(), first_image) {
                        (ObjectType::Image, Some(input)) => input,
                        _ => h,
                    };
                    let info = ctx.describe(source).map_err(|e| self.fail(node, Some(i), e, "cannot describe".to_string()))?;
                    meta.set(info).map_err(|e| self.fail(node, Some(i), e, "incompatible shape".to_string()))?;
                }
            }
        }
        Ok(metas)
    }

    fn validate_node(&self, ctx: &Context, planned: &PlannedNode) -> Result<(), VerifyIssue> {
        let node = planned.node;
        let signature = planned.kernel.signature();
        let metas = self.run_validators(ctx, planned, &signature)?;

        let input_rects: Vec<Rectangle> = signature
            .iter()
            .zip(&planned.params)
            .filter(|(s, _)| s.direction == Direction::Input)
            .filter_map(|(_, p)| *p)
            .filter(|h| ctx.object_type(*h).ok() == Some(ObjectType::Image))
            .filter_map(|h| ctx.get_valid_region(Image(h)).ok())
            .collect();

        for (i, meta) in metas.iter().enumerate() {
            let (Some(meta), Some(h)) = (meta, planned.params[i]) else { continue };
            if !meta.is_set() {
                return Err(self.fail(
                    node,
                    Some(i),
                    VxError::InvalidParameters,
                    format!("'{}' left output {} undescribed", planned.kernel.name, i),
                ));
            }
            ctx.apply_meta(h, meta.info()).map_err(|e| {
                self.fail(node, Some(i), e, format!("output {} does not match {:?}", i, meta.info()))
            })?;
            let is_virtual = ctx.with_header(h, |hd| hd.is_virtual).unwrap_or(false);
            if is_virtual {
                allocate_storage(ctx, h).map_err(|e| self.fail(node, Some(i), e, "cannot allocate".to_string()))?;
            }
            if let Some(callback) = meta.valid_rect_callback() {
                let rect = callback(ctx, node, &input_rects)
                    .map_err(|e| self.fail(node, Some(i), e, "valid rectangle callback failed".to_string()))?;
                ctx.set_image_valid_rectangle(Image(h), Some(rect))
                    .map_err(|e| self.fail(node, Some(i), e, "valid rectangle out of bounds".to_string()))?;
            }
        }
        Ok(())
    }
}

impl ValidationStage for MetaFormatStage {
    fn name(&self) -> &str {
        "meta_format"
    }

    fn validate(&self, plan: &mut VerifyPlan<'_>) -> Result<(), Vec<VerifyIssue>> {
        for &i in &plan.order {
            self.validate_node(plan.ctx, &plan.nodes[i]).map_err(|e| vec![e])?;
        }
        Ok(())
    }
}

// ============================================================================
// Targets
// ============================================================================

/// Lets each node's target veto it.
pub struct TargetStage;

impl ValidationStage for TargetStage {
    fn name(&self) -> &str {
        "target"
    }

    fn validate(&self, plan: &mut VerifyPlan<'_>) -> Result<(), Vec<VerifyIssue>> {
        let ctx = plan.ctx;
        for planned in plan.nodes.iter_mut() {
            if planned.child.is_some() {
                continue;
            }
            let node = planned.node;
            let fail = |e: VxError, message: String| vec![issue(self.name(), Some(node), None, e, message)];
            // The kernel may have been unpublished since the node was created.
            if !ctx.target_publishes(&planned.target, &planned.kernel.name) {
                let name = planned.kernel.name.clone();
                let (target, kernel) = ctx
                    .find_supporting_target("any", &name)
                    .ok_or_else(|| fail(VxError::NotSupported, format!("no target publishes '{}'", name)))?;
                ctx.rebind_node(node, &target, kernel)
                    .map_err(|e| fail(e, format!("cannot move '{}' to target '{}'", name, target)))?;
                planned.kernel = ctx
                    .kernel_data(kernel)
                    .map_err(|e| fail(e, format!("kernel '{}' vanished", name)))?;
                log::debug!("node {} re-targeted to {} for '{}'", node, target, name);
                planned.target = target;
            }
            let backend = ctx
                .backend(&planned.target)
                .map_err(|e| fail(e, format!("target '{}' is not available", planned.target)))?;
            let replicas = ctx
                .replica_params(&planned.params, planned.replicated.as_deref())
                .map_err(|e| fail(e, "replicas disagree".to_string()))?;
            let invocation = Invocation {
                node,
                kernel: planned.kernel.clone(),
                params: replicas.into_iter().next().unwrap_or_default(),
                border: planned.border,
            };
            backend
                .verify(ctx, &invocation)
                .map_err(|e| fail(e, format!("target '{}' refused '{}'", planned.target, planned.kernel.name)))?;
        }
        Ok(())
    }
}

// ============================================================================
// Initialization
// ============================================================================

/// Allocates node local data and runs the kernels' initialize hooks.
pub struct InitializeStage;

impl ValidationStage for InitializeStage {
    fn name(&self) -> &str {
        "initialize"
    }

    fn validate(&self, plan: &mut VerifyPlan<'_>) -> Result<(), Vec<VerifyIssue>> {
        let ctx = plan.ctx;
        let limit = ctx.config().tile_memory_limit;
        for &i in &plan.order {
            let planned = &plan.nodes[i];
            let node = planned.node;
            let fail = |e: VxError, message: String| vec![issue(self.name(), Some(node), None, e, message)];
            let attributes = planned.kernel.attributes;
            if planned.kernel.body.is_tiling() && attributes.tile_memory_size > limit {
                return Err(fail(
                    VxError::NoMemory,
                    format!("{} bytes of tile memory exceed the limit of {}", attributes.tile_memory_size, limit),
                ));
            }
            let initialized = ctx
                .node_data(node, |d| {
                    if !d.initialized && d.local_data_size > 0 {
                        d.local_data = Some(vec![0; d.local_data_size]);
                    }
                    Ok(d.initialized)
                })
                .map_err(|e| fail(e, "node vanished".to_string()))?;
            if initialized {
                continue;
            }
            if let Some(hook) = &planned.kernel.initialize {
                hook(ctx, node, &planned.params)
                    .map_err(|e| fail(e, format!("initialize of '{}' failed", planned.kernel.name)))?;
            }
            ctx.node_data(node, |d| {
                d.initialized = true;
                Ok(())
            })
            .map_err(|e| fail(e, "node vanished".to_string()))?;
        }
        Ok(())
    }
}
