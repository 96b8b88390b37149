//! Graph verification and execution.
//!
//! [`Context::verify_graph`] runs the validation pipeline and records the order it
//! settles on. [`Context::process_graph`] runs a verified graph node by node (or wave by
//! wave when `parallel_waves` is on), and [`Context::schedule_graph`] does the same on the
//! rayon pool with [`Context::wait_graph`] collecting the outcome.
//!
//! A node whose kernel fails abandons the run. Nodes that already ran keep whatever they
//! wrote; nothing is rolled back.

use crate::core::context::Context;
use crate::core::error::{VerifyReport, VxError, VxResult};
use crate::core::reference::{AsHandle, Graph, Handle, Node};
use crate::core::types::{Action, GraphState};
use crate::target::Invocation;
use crate::validation::pipeline::{ValidationPipeline, VerifyPlan};
use rayon::prelude::*;
use std::time::{Duration, Instant};

/// How a run spreads over threads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutionOptions {
    /// Run the nodes of one dependency wave concurrently.
    pub parallel_waves: bool,
    /// Run the replicas of a replicated node concurrently.
    pub parallel_replicas: bool,
}

impl ExecutionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Options taken from the context configuration.
    pub fn from_config(ctx: &Context) -> Self {
        let config = ctx.config();
        Self {
            parallel_waves: config.parallel_waves,
            parallel_replicas: config.parallel_replicas,
        }
    }

    pub fn with_parallel_waves(mut self, parallel: bool) -> Self {
        self.parallel_waves = parallel;
        self
    }

    pub fn with_parallel_replicas(mut self, parallel: bool) -> Self {
        self.parallel_replicas = parallel;
        self
    }
}

/// Counters for one run.
#[derive(Debug, Clone, Default)]
pub struct ExecutionStats {
    pub total_duration: Duration,
    pub nodes_executed: usize,
    /// Kernel invocations, one per replica.
    pub invocations: usize,
}

/// Runs the nodes of one verified graph.
pub struct ExecutionEngine<'a> {
    ctx: &'a Context,
    options: ExecutionOptions,
}

impl<'a> ExecutionEngine<'a> {
    pub fn new(ctx: &'a Context) -> Self {
        Self {
            ctx,
            options: ExecutionOptions::from_config(ctx),
        }
    }

    pub fn with_options(mut self, options: ExecutionOptions) -> Self {
        self.options = options;
        self
    }

    /// Run every node of `graph` in its verified order.
    ///
    /// The graph must already be marked `Running`. Virtual objects bound to its nodes are
    /// host-accessible for the duration of the run.
    pub fn execute(&self, graph: Graph) -> VxResult<ExecutionStats> {
        let start = Instant::now();
        let (nodes, order, waves) = self
            .ctx
            .graph_data(graph, |g| Ok((g.nodes.clone(), g.order.clone(), g.waves.clone())))?;
        for node in &nodes {
            self.ctx.node_data(*node, |d| {
                d.executed = false;
                d.status = Ok(());
                Ok(())
            })?;
        }

        let (virtuals, exposed) = self.virtual_objects(graph, &nodes)?;
        self.set_accessible(&virtuals, true);
        let mut stats = ExecutionStats::default();
        let result = if self.options.parallel_waves {
            self.run_waves(&waves, &mut stats)
        } else {
            self.run_sequential(&order, &mut stats)
        };
        let hidden: Vec<Handle> = virtuals.into_iter().filter(|h| !exposed.contains(h)).collect();
        self.set_accessible(&hidden, false);

        stats.total_duration = start.elapsed();
        log::debug!(
            "graph {} ran {} node(s), {} invocation(s) in {:?}",
            graph,
            stats.nodes_executed,
            stats.invocations,
            stats.total_duration
        );
        result.map(|()| stats)
    }

    fn run_sequential(&self, order: &[Node], stats: &mut ExecutionStats) -> VxResult<()> {
        for node in order {
            stats.invocations += self.run_node(*node)?;
            stats.nodes_executed += 1;
        }
        Ok(())
    }

    fn run_waves(&self, waves: &[Vec<Node>], stats: &mut ExecutionStats) -> VxResult<()> {
        for wave in waves {
            let results: Vec<VxResult<usize>> = wave.par_iter().map(|n| self.run_node(*n)).collect();
            // Every node of the wave has finished; the first failure in wave order wins.
            for result in results {
                stats.invocations += result?;
                stats.nodes_executed += 1;
            }
        }
        Ok(())
    }

    /// Run one node and its completion callback. Returns the number of kernel invocations.
    fn run_node(&self, node: Node) -> VxResult<usize> {
        let ctx = self.ctx;
        let (kernel, target, params, replicated, border, child, callback) = ctx.node_data(node, |d| {
            Ok((
                d.kernel,
                d.target.clone(),
                d.params.clone(),
                d.replicated.clone(),
                d.border,
                d.child,
                d.callback.clone(),
            ))
        })?;
        let kernel = ctx.kernel_data(kernel)?;

        let start = Instant::now();
        let (result, invocations) = match child {
            Some(child) => (self.run_child(child, &params), 1),
            None => match ctx.replica_params(&params, replicated.as_deref()) {
                Ok(replicas) => {
                    let count = replicas.len();
                    let backend = ctx.backend(&target)?;
                    let invoke = |params: Vec<Option<Handle>>| {
                        backend.process(
                            ctx,
                            &Invocation {
                                node,
                                kernel: kernel.clone(),
                                params,
                                border,
                            },
                        )
                    };
                    let result = if self.options.parallel_replicas && count > 1 {
                        replicas
                            .into_par_iter()
                            .map(invoke)
                            .collect::<Vec<_>>()
                            .into_iter()
                            .collect::<VxResult<Vec<()>>>()
                            .map(|_| ())
                    } else {
                        replicas.into_iter().try_for_each(invoke)
                    };
                    (result, count)
                }
                Err(e) => (Err(e), 0),
            },
        };
        let elapsed = start.elapsed();

        ctx.node_data(node, |d| {
            d.perf.record(elapsed);
            d.executed = true;
            d.status = result;
            Ok(())
        })?;
        if let Err(e) = result {
            log::error!("node {} ({} on {}) failed: {}", node, kernel.name, target, e);
            ctx.add_log_entry(Some(node.handle()), e, &format!("kernel '{}' failed", kernel.name));
            return Err(e);
        }
        log::trace!("node {} ({}) done in {:?}", node, kernel.name, elapsed);

        if let Some(callback) = callback {
            if callback(ctx, node) == Action::Abandon {
                log::debug!("node {} callback abandoned the run", node);
                return Err(VxError::GraphAbandoned);
            }
        }
        Ok(invocations)
    }

    /// Bind the node's parameters to the child's graph parameters and run the child.
    fn run_child(&self, child: Graph, params: &[Option<Handle>]) -> VxResult<()> {
        for (index, value) in params.iter().enumerate() {
            if let Some(h) = value {
                self.ctx.set_graph_parameter_by_index(child, index as u32, *h)?;
            }
        }
        self.ctx.process_graph(child)
    }

    /// Virtual objects the nodes touch, and those among them exposed as graph parameters.
    fn virtual_objects(&self, graph: Graph, nodes: &[Node]) -> VxResult<(Vec<Handle>, Vec<Handle>)> {
        let ctx = self.ctx;
        let mut reached: Vec<Handle> = Vec::new();
        for node in nodes {
            let params = ctx.node_data(*node, |d| Ok(d.params.clone()))?;
            for h in params.into_iter().flatten() {
                let mut found = vec![h];
                found.extend(ctx.elements_of(h)?);
                if let Some((container, _)) = ctx.container_of(h)? {
                    found.push(container);
                    found.extend(ctx.elements_of(container)?);
                }
                for f in found {
                    if !reached.contains(&f) {
                        reached.push(f);
                    }
                }
            }
        }
        let mut virtuals = Vec::new();
        for h in reached {
            if ctx.with_header(h, |hdr| hdr.is_virtual)? {
                virtuals.push(h);
            }
        }

        let parameters = ctx.graph_data(graph, |g| Ok(g.parameters.clone()))?;
        let mut exposed = Vec::new();
        for p in parameters {
            if let Some(h) = ctx.node_parameter(p.node, p.index)?.value {
                exposed.push(h);
                exposed.extend(ctx.elements_of(h)?);
            }
        }
        Ok((virtuals, exposed))
    }

    fn set_accessible(&self, handles: &[Handle], accessible: bool) {
        for h in handles {
            let _ = self.ctx.with_header(*h, |hdr| hdr.is_accessible = accessible);
        }
    }
}

impl Context {
    /// Check a graph and prepare it to run.
    ///
    /// Stages run in order and the first failing stage ends verification. Issues land in
    /// the graph's [`VerifyReport`] and the context log. Re-verifying a graph first
    /// deinitializes its nodes so their initialize hooks run again.
    pub fn verify_graph(&self, graph: Graph) -> VxResult<()> {
        let previously = self.graph_data(graph, |g| {
            if g.state == GraphState::Running {
                return Err(VxError::GraphScheduled);
            }
            let previously = g.verified || g.reverify;
            g.state = GraphState::Verifying;
            g.verified = false;
            Ok(previously)
        })?;
        if previously {
            for node in self.graph_nodes(graph)? {
                if let Err(e) = self.deinitialize_node(node) {
                    log::warn!("node {} deinitialize failed: {}", node, e);
                }
            }
        }

        let report = match VerifyPlan::new(self, graph) {
            Ok(mut plan) => {
                let report = ValidationPipeline::default_pipeline().validate(&mut plan);
                let positions = |list: &[usize]| list.iter().map(|i| plan.nodes[*i].node).collect::<Vec<_>>();
                let heads = positions(&plan.heads);
                let order = positions(&plan.order);
                let waves: Vec<Vec<Node>> = plan.waves.iter().map(|w| positions(w)).collect();
                self.graph_data(graph, |g| {
                    g.heads = heads;
                    g.order = order;
                    g.waves = waves;
                    Ok(())
                })?;
                report
            }
            Err(e) => {
                let mut report = VerifyReport::new();
                report.add_issue(crate::core::error::VerifyIssue {
                    stage: "snapshot".to_string(),
                    node: None,
                    parameter: None,
                    status: e,
                    message: "graph nodes could not be read".to_string(),
                });
                report
            }
        };

        if !report.success {
            log::warn!("graph {} failed verification: {}", graph, report.summary());
            let status = report.status().err().unwrap_or(VxError::InvalidGraph);
            self.add_log_entry(Some(graph.handle()), status, &report.summary());
        } else {
            log::debug!("graph {} verified in {}us", graph, report.duration_us);
        }
        let status = report.status();
        self.graph_data(graph, |g| {
            g.verified = report.success;
            g.reverify = false;
            g.state = if report.success {
                GraphState::Verified
            } else {
                GraphState::Unverified
            };
            g.report = report;
            Ok(())
        })?;
        status
    }

    /// Verify when needed and mark the graph running.
    fn begin_run(&self, graph: Graph) -> VxResult<()> {
        let stale = self.graph_data(graph, |g| match g.state {
            GraphState::Running => Err(VxError::GraphScheduled),
            _ => Ok(!g.verified || g.reverify),
        })?;
        if stale {
            self.verify_graph(graph)?;
        }
        self.graph_data(graph, |g| {
            g.state = GraphState::Running;
            Ok(())
        })
    }

    /// Record the outcome of a run, aging registered delays after a successful one.
    fn finish_run(&self, graph: Graph, result: VxResult<ExecutionStats>) -> VxResult<()> {
        let mut status = result.map(|_| ());
        if status.is_ok() {
            // Aging rebinds parameters; the graph is still marked running so the rebinds
            // only flag it for re-verification.
            let delays = self.graph_data(graph, |g| Ok(g.delays.clone()))?;
            for delay in delays {
                if let Err(e) = self.age_delay(delay) {
                    status = Err(e);
                    break;
                }
            }
        }
        self.graph_data(graph, |g| {
            g.status = status;
            g.state = if status.is_ok() {
                GraphState::Completed
            } else {
                GraphState::Abandoned
            };
            Ok(())
        })?;
        if let Err(e) = status {
            log::error!("graph {} abandoned: {}", graph, e);
        }
        status
    }

    fn run_graph(&self, graph: Graph) -> VxResult<()> {
        let start = Instant::now();
        let result = ExecutionEngine::new(self).execute(graph);
        let elapsed = start.elapsed();
        let _ = self.graph_data(graph, |g| {
            g.perf.record(elapsed);
            Ok(())
        });
        self.finish_run(graph, result)
    }

    /// Run a graph once, verifying it first if it is not verified.
    pub fn process_graph(&self, graph: Graph) -> VxResult<()> {
        self.begin_run(graph)?;
        self.run_graph(graph)
    }

    /// Start a run on the rayon pool. Collect its outcome with [`Context::wait_graph`].
    pub fn schedule_graph(&self, graph: Graph) -> VxResult<()> {
        self.begin_run(graph)?;
        let (tx, rx) = crossbeam::channel::bounded(1);
        self.graph_data(graph, |g| {
            g.pending = Some(rx);
            Ok(())
        })?;
        // The run keeps the graph alive until it reports back.
        self.retain_reference(graph)?;
        let ctx = self.clone();
        rayon::spawn(move || {
            let result = ctx.run_graph(graph);
            let _ = tx.send(result);
            if let Err(e) = ctx.release_reference(graph) {
                log::warn!("graph {} release after scheduled run failed: {}", graph, e);
            }
        });
        log::debug!("graph {} scheduled", graph);
        Ok(())
    }

    /// Block until the scheduled run of `graph` finishes and return its status.
    pub fn wait_graph(&self, graph: Graph) -> VxResult<()> {
        let pending = self.graph_data(graph, |g| Ok(g.pending.take()))?;
        match pending {
            Some(rx) => rx.recv().unwrap_or(Err(VxError::Failure)),
            None => Err(VxError::Failure),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::ContextConfig;
    use crate::core::reference::Image;
    use crate::core::types::{DataType, DfImage, ObjectType, ScalarValue, SCALE_PYRAMID_HALF};
    use crate::graph::NodeCallback;
    use crate::target::KernelDescriptor;
    use std::sync::Arc;

    fn filled(ctx: &Context, w: u32, h: u32, value: u8) -> Image {
        let img = ctx.create_image(w, h, DfImage::U8).unwrap();
        ctx.write_image_plane(img, 0, &vec![value; (w * h) as usize]).unwrap();
        img
    }

    fn and_node(ctx: &Context, graph: Graph, a: Image, b: Image, out: Image) -> Node {
        ctx.create_node_by_name(graph, "org.khronos.openvx.and", &[Some(a.0), Some(b.0), Some(out.0)])
            .unwrap()
    }

    /// Scalar to scalar kernel that fails when the input is zero.
    fn publish_guard(ctx: &Context) {
        let kernel = ctx
            .add_kernel(
                KernelDescriptor::function("test.guard", 0x7_0200, 2, |ctx, _, params| {
                    let input = crate::core::reference::Scalar(params[0].ok_or(VxError::InvalidParameters)?);
                    let output = crate::core::reference::Scalar(params[1].ok_or(VxError::InvalidParameters)?);
                    match ctx.read_scalar(input)? {
                        ScalarValue::UInt8(0) => Err(VxError::Failure),
                        ScalarValue::UInt8(v) => ctx.write_scalar(output, ScalarValue::UInt8(v + 1)),
                        _ => Err(VxError::InvalidType),
                    }
                })
                .input(ObjectType::Scalar)
                .output(ObjectType::Scalar)
                .with_validator(|_, _, _, metas| {
                    match metas[1].as_mut() {
                        Some(meta) => meta.set_scalar(DataType::UInt8),
                        None => Ok(()),
                    }
                }),
            )
            .unwrap();
        ctx.finalize_kernel(kernel).unwrap();
    }

    #[test]
    fn test_and_graph_end_to_end() {
        let ctx = Context::create().unwrap();
        let graph = ctx.create_graph().unwrap();
        let a = filled(&ctx, 64, 64, 0b1100_1100);
        let b = filled(&ctx, 64, 64, 0b1010_1010);
        let out = ctx.create_image(64, 64, DfImage::U8).unwrap();
        and_node(&ctx, graph, a, b, out);

        ctx.verify_graph(graph).unwrap();
        assert_eq!(ctx.query_graph(graph).unwrap().state, GraphState::Verified);
        ctx.process_graph(graph).unwrap();
        let info = ctx.query_graph(graph).unwrap();
        assert_eq!(info.state, GraphState::Completed);
        assert_eq!(info.perf.num, 1);
        let pixels = ctx.read_image_plane(out, 0).unwrap();
        assert!(pixels.iter().all(|p| *p == 0b1000_1000));
    }

    #[test]
    fn test_process_verifies_on_demand() {
        let ctx = Context::create().unwrap();
        let graph = ctx.create_graph().unwrap();
        let a = filled(&ctx, 8, 8, 7);
        let out = ctx.create_image(8, 8, DfImage::U8).unwrap();
        and_node(&ctx, graph, a, a, out);
        ctx.process_graph(graph).unwrap();
        assert!(ctx.is_graph_verified(graph).unwrap());
        assert!(ctx.read_image_plane(out, 0).unwrap().iter().all(|p| *p == 7));

        // An incomplete graph never runs.
        let broken = ctx.create_graph().unwrap();
        let kernel = ctx.get_kernel_by_name("org.khronos.openvx.and").unwrap();
        ctx.create_generic_node(broken, kernel).unwrap();
        assert_eq!(ctx.process_graph(broken), Err(VxError::NotSufficient));
        assert_eq!(ctx.query_graph(broken).unwrap().state, GraphState::Unverified);
    }

    #[test]
    fn test_failing_node_abandons_run() {
        let ctx = Context::create().unwrap();
        publish_guard(&ctx);
        let graph = ctx.create_graph().unwrap();
        let zero = ctx.create_scalar(ScalarValue::UInt8(0)).unwrap();
        let mid = ctx.create_scalar_of(DataType::UInt8).unwrap();
        let last = ctx.create_scalar_of(DataType::UInt8).unwrap();
        let a = ctx.create_node_by_name(graph, "test.guard", &[Some(zero.0), Some(mid.0)]).unwrap();
        let b = ctx.create_node_by_name(graph, "test.guard", &[Some(mid.0), Some(last.0)]).unwrap();

        assert_eq!(ctx.process_graph(graph), Err(VxError::Failure));
        let info = ctx.query_graph(graph).unwrap();
        assert_eq!(info.state, GraphState::Abandoned);
        assert_eq!(info.status, Err(VxError::Failure));
        let first = ctx.query_node(a).unwrap();
        assert!(first.executed);
        assert_eq!(first.status, Err(VxError::Failure));
        assert!(!ctx.query_node(b).unwrap().executed);
        assert!(ctx.log_entries().iter().any(|e| e.status == VxError::Failure));
    }

    #[test]
    fn test_cycle_never_verifies() {
        let ctx = Context::create().unwrap();
        let graph = ctx.create_graph().unwrap();
        let x = ctx.create_image(8, 8, DfImage::U8).unwrap();
        let y = ctx.create_image(8, 8, DfImage::U8).unwrap();
        let not = ctx.get_kernel_by_name("org.khronos.openvx.not").unwrap();
        let a = ctx.create_generic_node(graph, not).unwrap();
        let b = ctx.create_generic_node(graph, not).unwrap();
        ctx.set_parameter_by_index(a, 0, y).unwrap();
        ctx.set_parameter_by_index(a, 1, x).unwrap();
        ctx.set_parameter_by_index(b, 0, x).unwrap();
        ctx.set_parameter_by_index(b, 1, y).unwrap();

        assert_eq!(ctx.verify_graph(graph), Err(VxError::InvalidGraph));
        let info = ctx.query_graph(graph).unwrap();
        assert_eq!(info.state, GraphState::Unverified);
        assert!(!info.verified);
    }

    #[test]
    fn test_virtual_objects_hidden_after_run() {
        let ctx = Context::create().unwrap();
        let graph = ctx.create_graph().unwrap();
        let a = filled(&ctx, 8, 8, 0x0F);
        let hidden = ctx.create_virtual_image(graph, 0, 0, DfImage::Virt).unwrap();
        let shown = ctx.create_virtual_image(graph, 0, 0, DfImage::Virt).unwrap();
        and_node(&ctx, graph, a, a, hidden);
        let not = ctx
            .create_node_by_name(graph, "org.khronos.openvx.not", &[Some(hidden.0), Some(shown.0)])
            .unwrap();
        ctx.add_parameter_to_graph(graph, not, 1).unwrap();

        assert_eq!(ctx.read_image_plane(shown, 0), Err(VxError::OptimizedAway));
        ctx.process_graph(graph).unwrap();
        assert_eq!(ctx.read_image_plane(hidden, 0), Err(VxError::OptimizedAway));
        let pixels = ctx.read_image_plane(shown, 0).unwrap();
        assert!(pixels.iter().all(|p| *p == 0xF0));
    }

    #[test]
    fn test_callback_abandons() {
        let ctx = Context::create().unwrap();
        let graph = ctx.create_graph().unwrap();
        let a = filled(&ctx, 4, 4, 1);
        let mid = ctx.create_image(4, 4, DfImage::U8).unwrap();
        let out = ctx.create_image(4, 4, DfImage::U8).unwrap();
        let first = and_node(&ctx, graph, a, a, mid);
        let second = and_node(&ctx, graph, mid, mid, out);
        let stop: NodeCallback = Arc::new(|_, _| Action::Abandon);
        ctx.assign_node_callback(first, Some(stop)).unwrap();

        assert_eq!(ctx.process_graph(graph), Err(VxError::GraphAbandoned));
        assert_eq!(ctx.query_graph(graph).unwrap().state, GraphState::Abandoned);
        assert!(ctx.query_node(first).unwrap().executed);
        assert!(!ctx.query_node(second).unwrap().executed);
    }

    #[test]
    fn test_schedule_and_wait() {
        let ctx = Context::create().unwrap();
        let graph = ctx.create_graph().unwrap();
        let a = filled(&ctx, 16, 16, 0x3C);
        let out = ctx.create_image(16, 16, DfImage::U8).unwrap();
        and_node(&ctx, graph, a, a, out);

        assert_eq!(ctx.wait_graph(graph), Err(VxError::Failure));
        ctx.schedule_graph(graph).unwrap();
        ctx.wait_graph(graph).unwrap();
        assert_eq!(ctx.query_graph(graph).unwrap().state, GraphState::Completed);
        assert!(ctx.read_image_plane(out, 0).unwrap().iter().all(|p| *p == 0x3C));
        // One outcome per schedule.
        assert_eq!(ctx.wait_graph(graph), Err(VxError::Failure));
    }

    #[test]
    fn test_auto_aging_rotates_delay() {
        let ctx = Context::create().unwrap();
        publish_guard(&ctx);
        let exemplar = ctx.create_scalar_of(DataType::UInt8).unwrap();
        let delay = ctx.create_delay(exemplar, 2).unwrap();
        let current = ctx.get_reference_from_delay(delay, 0).unwrap();
        let previous = ctx.get_reference_from_delay(delay, -1).unwrap();
        ctx.write_scalar(crate::core::reference::Scalar(previous), ScalarValue::UInt8(1))
            .unwrap();

        // Each run reads the previous slot and writes the current one.
        let graph = ctx.create_graph().unwrap();
        let node = ctx
            .create_node_by_name(graph, "test.guard", &[Some(previous), Some(current)])
            .unwrap();
        ctx.register_auto_aging(graph, delay).unwrap();

        ctx.process_graph(graph).unwrap();
        assert_eq!(ctx.node_parameter(node, 0).unwrap().value, Some(current));
        ctx.process_graph(graph).unwrap();
        let newest = ctx.get_reference_from_delay(delay, -1).unwrap();
        assert_eq!(
            ctx.read_scalar(crate::core::reference::Scalar(newest)).unwrap(),
            ScalarValue::UInt8(3)
        );
    }

    #[test]
    fn test_replicated_node_runs_every_level() {
        let ctx = Context::create().unwrap();
        let graph = ctx.create_graph().unwrap();
        let input = ctx.create_pyramid(3, SCALE_PYRAMID_HALF, 16, 16, DfImage::U8).unwrap();
        let output = ctx.create_pyramid(3, SCALE_PYRAMID_HALF, 16, 16, DfImage::U8).unwrap();
        for level in 0..3 {
            let img = ctx.get_pyramid_level(input, level).unwrap();
            let size = ctx.query_image(img).unwrap();
            ctx.write_image_plane(img, 0, &vec![0x55; (size.width * size.height) as usize])
                .unwrap();
        }
        let in0 = ctx.get_pyramid_level(input, 0).unwrap();
        let out0 = ctx.get_pyramid_level(output, 0).unwrap();
        let node = ctx
            .create_node_by_name(graph, "org.khronos.openvx.not", &[Some(in0.0), Some(out0.0)])
            .unwrap();
        ctx.replicate_node(graph, node, &[true, true]).unwrap();

        ctx.process_graph(graph).unwrap();
        for level in 0..3 {
            let img = ctx.get_pyramid_level(output, level).unwrap();
            assert!(ctx.read_image_plane(img, 0).unwrap().iter().all(|p| *p == 0xAA));
        }
    }

    #[test]
    fn test_child_graph_replaces_kernel() {
        let ctx = Context::create().unwrap();
        let child = ctx.create_graph().unwrap();
        let slots: Vec<Image> = (0..3).map(|_| ctx.create_image(8, 8, DfImage::U8).unwrap()).collect();
        let inner = and_node(&ctx, child, slots[0], slots[1], slots[2]);
        for i in 0..3 {
            ctx.add_parameter_to_graph(child, inner, i).unwrap();
        }

        let graph = ctx.create_graph().unwrap();
        let a = filled(&ctx, 8, 8, 0xF0);
        let b = filled(&ctx, 8, 8, 0x3C);
        let out = ctx.create_image(8, 8, DfImage::U8).unwrap();
        let outer = and_node(&ctx, graph, a, b, out);
        ctx.set_child_graph_of_node(outer, Some(child)).unwrap();

        ctx.process_graph(graph).unwrap();
        assert!(ctx.read_image_plane(out, 0).unwrap().iter().all(|p| *p == 0x30));
        assert_eq!(ctx.query_graph(child).unwrap().state, GraphState::Completed);
    }

    #[test]
    fn test_parallel_waves_match_sequential() {
        let config = ContextConfig::default().with_parallel_waves(true).with_parallel_replicas(true);
        let ctx = Context::with_config(config).unwrap();
        let graph = ctx.create_graph().unwrap();
        let a = filled(&ctx, 32, 32, 0xFF);
        let b = filled(&ctx, 32, 32, 0x0F);
        let left = ctx.create_virtual_image(graph, 0, 0, DfImage::Virt).unwrap();
        let right = ctx.create_virtual_image(graph, 0, 0, DfImage::Virt).unwrap();
        let out = ctx.create_image(32, 32, DfImage::U8).unwrap();
        and_node(&ctx, graph, a, b, left);
        ctx.create_node_by_name(graph, "org.khronos.openvx.not", &[Some(b.0), Some(right.0)])
            .unwrap();
        ctx.create_node_by_name(graph, "org.khronos.openvx.or", &[Some(left.0), Some(right.0), Some(out.0)])
            .unwrap();

        ctx.process_graph(graph).unwrap();
        assert!(ctx.read_image_plane(out, 0).unwrap().iter().all(|p| *p == 0xFF));
        let waves = ctx.graph_data(graph, |g| Ok(g.waves.len())).unwrap();
        assert_eq!(waves, 2);
    }

    #[test]
    fn test_reverify_after_rebind() {
        let ctx = Context::create().unwrap();
        let graph = ctx.create_graph().unwrap();
        let a = filled(&ctx, 8, 8, 2);
        let b = filled(&ctx, 8, 8, 6);
        let out = ctx.create_image(8, 8, DfImage::U8).unwrap();
        let node = and_node(&ctx, graph, a, a, out);
        ctx.process_graph(graph).unwrap();
        ctx.set_parameter_by_index(node, 1, b).unwrap();
        assert!(!ctx.is_graph_verified(graph).unwrap());
        ctx.process_graph(graph).unwrap();
        assert!(ctx.read_image_plane(out, 0).unwrap().iter().all(|p| *p == 2));
    }
}
