//! Graph and node structure.
//!
//! A graph owns its nodes: it holds an internal count on each, and each node holds
//! internal counts on its kernel, its bound parameters and its child graph. Edges are
//! never stored. They are derived from which node writes what when the graph is verified.
//!
//! Any change that can invalidate a verified graph (a new node, a rebound parameter, a
//! host write to a consumed object) sets `reverify`, and the next `process_graph`
//! verifies again before running.

use crate::core::context::Context;
use crate::core::error::{StatusFold, VerifyReport, VxError, VxResult};
use crate::core::reference::{
    AsHandle, Creation, Delay, Graph, Handle, Kernel, Node, ObjectData, Payload, RefObject, RefType,
};
use crate::core::types::{Action, Border, GraphState, ObjectType};
use crate::execution::perf::Perf;
use crate::target::kernel::{KernelData, ParamSpec};
use crossbeam::channel::Receiver;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Called after a node completes; `Action::Abandon` stops the run.
pub type NodeCallback = Arc<dyn Fn(&Context, Node) -> Action + Send + Sync>;

/// A node parameter exposed at graph level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphParameter {
    pub node: Node,
    pub index: u32,
}

/// Payload of a graph object.
pub struct GraphData {
    /// Nodes in creation order, each holding an internal count.
    pub nodes: Vec<Node>,
    /// Nodes with no producer inside the graph, from the last verification.
    pub heads: Vec<Node>,
    pub state: GraphState,
    pub verified: bool,
    pub reverify: bool,
    pub parameters: Vec<GraphParameter>,
    /// Delays aged after every completed run, each holding an internal count.
    pub delays: Vec<Delay>,
    /// Graph whose node runs this one as a child.
    pub parent: Option<Graph>,
    /// Execution order from the last verification.
    pub order: Vec<Node>,
    /// `order` grouped into waves of mutually independent nodes.
    pub waves: Vec<Vec<Node>>,
    pub perf: Perf,
    /// Outcome of the last run.
    pub status: VxResult<()>,
    pub report: VerifyReport,
    pub(crate) pending: Option<Receiver<VxResult<()>>>,
}

impl GraphData {
    fn new() -> Self {
        Self {
            nodes: Vec::new(),
            heads: Vec::new(),
            state: GraphState::Unverified,
            verified: false,
            reverify: false,
            parameters: Vec::new(),
            delays: Vec::new(),
            parent: None,
            order: Vec::new(),
            waves: Vec::new(),
            perf: Perf::default(),
            status: Ok(()),
            report: VerifyReport::new(),
            pending: None,
        }
    }

    /// Forget the last verification.
    fn invalidate(&mut self) {
        if self.verified {
            self.reverify = true;
        }
        if self.state != GraphState::Running {
            self.state = GraphState::Unverified;
        }
    }
}

impl Payload for GraphData {
    fn project(data: &mut ObjectData) -> Option<&mut Self> {
        match data {
            ObjectData::Graph(d) => Some(d.as_mut()),
            _ => None,
        }
    }

    fn children(&self) -> Vec<Handle> {
        self.nodes
            .iter()
            .map(|n| n.handle())
            .chain(self.delays.iter().map(|d| d.handle()))
            .collect()
    }
}

/// Payload of a node object.
pub struct NodeData {
    /// Owning graph; the node holds no count on it.
    pub graph: Graph,
    pub kernel: Kernel,
    /// Target that runs the node.
    pub target: String,
    /// Bound parameters, each holding an internal count.
    pub params: Vec<Option<Handle>>,
    pub status: VxResult<()>,
    pub executed: bool,
    pub border: Border,
    pub local_data_size: usize,
    pub local_data: Option<Vec<u8>>,
    pub perf: Perf,
    pub callback: Option<NodeCallback>,
    /// Graph run in place of the kernel body.
    pub child: Option<Graph>,
    /// Per-parameter replication flags.
    pub replicated: Option<Vec<bool>>,
    pub initialized: bool,
}

impl NodeData {
    fn new(graph: Graph, kernel: Kernel, data: &KernelData) -> Self {
        Self {
            graph,
            kernel,
            target: data.target.clone(),
            params: vec![None; data.params.len()],
            status: Ok(()),
            executed: false,
            border: data.attributes.border,
            local_data_size: data.attributes.local_data_size,
            local_data: None,
            perf: Perf::default(),
            callback: None,
            child: None,
            replicated: None,
            initialized: false,
        }
    }
}

impl Payload for NodeData {
    fn project(data: &mut ObjectData) -> Option<&mut Self> {
        match data {
            ObjectData::Node(d) => Some(d.as_mut()),
            _ => None,
        }
    }

    fn children(&self) -> Vec<Handle> {
        std::iter::once(self.kernel.handle())
            .chain(self.params.iter().flatten().copied())
            .chain(self.child.map(|g| g.handle()))
            .collect()
    }
}

/// Settable node attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeAttribute {
    Border(Border),
    LocalDataSize(usize),
}

/// Attributes returned by [`Context::query_node`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeInfo {
    pub kernel: String,
    pub target: String,
    pub status: VxResult<()>,
    pub executed: bool,
    pub perf: Perf,
    pub border: Border,
    pub local_data_size: usize,
    pub parameters: usize,
    pub replicated: Option<Vec<bool>>,
    pub has_child: bool,
}

/// Attributes returned by [`Context::query_graph`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphInfo {
    pub state: GraphState,
    pub nodes: usize,
    pub parameters: usize,
    pub delays: usize,
    pub perf: Perf,
    pub status: VxResult<()>,
    pub verified: bool,
}

/// One node parameter with its declared signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parameter {
    pub node: Node,
    pub index: u32,
    pub spec: ParamSpec,
    pub value: Option<Handle>,
}

impl Context {
    pub(crate) fn graph_data<R>(&self, graph: Graph, f: impl FnOnce(&mut GraphData) -> VxResult<R>) -> VxResult<R> {
        self.with_payload::<GraphData, R>(graph.handle(), f)
    }

    pub(crate) fn node_data<R>(&self, node: Node, f: impl FnOnce(&mut NodeData) -> VxResult<R>) -> VxResult<R> {
        self.with_payload::<NodeData, R>(node.handle(), f)
    }

    // ========================================================================
    // Graphs
    // ========================================================================

    pub fn create_graph(&self) -> VxResult<Graph> {
        let handle = self.create_reference(
            Creation::external(ObjectType::Graph),
            ObjectData::Graph(Box::new(GraphData::new())),
        )?;
        log::debug!("created graph {}", handle);
        Ok(Graph(handle))
    }

    pub fn query_graph(&self, graph: Graph) -> VxResult<GraphInfo> {
        self.graph_data(graph, |g| {
            Ok(GraphInfo {
                state: g.state,
                nodes: g.nodes.len(),
                parameters: g.parameters.len(),
                delays: g.delays.len(),
                perf: g.perf,
                status: g.status,
                verified: g.verified && !g.reverify,
            })
        })
    }

    /// Whether the graph passed verification and nothing has invalidated it since.
    pub fn is_graph_verified(&self, graph: Graph) -> VxResult<bool> {
        self.graph_data(graph, |g| Ok(g.verified && !g.reverify))
    }

    /// Report of the last verification.
    pub fn verify_report(&self, graph: Graph) -> VxResult<VerifyReport> {
        self.graph_data(graph, |g| Ok(g.report.clone()))
    }

    /// Nodes of a graph in creation order.
    pub fn graph_nodes(&self, graph: Graph) -> VxResult<Vec<Node>> {
        self.graph_data(graph, |g| Ok(g.nodes.clone()))
    }

    fn check_not_running(&self, graph: Graph) -> VxResult<()> {
        self.graph_data(graph, |g| match g.state {
            GraphState::Running => Err(VxError::GraphScheduled),
            _ => Ok(()),
        })
    }

    /// Require re-verification before the next run.
    pub(crate) fn mark_reverify(&self, graph: Graph) {
        let _ = self.graph_data(graph, |g| {
            g.invalidate();
            Ok(())
        });
    }

    /// Whether `scope` is `graph` or one of its ancestors.
    pub(crate) fn graph_in_scope(&self, graph: Graph, scope: Handle) -> VxResult<bool> {
        let mut current = Some(graph);
        while let Some(g) = current {
            if g.handle() == scope {
                return Ok(true);
            }
            current = self.graph_data(g, |d| Ok(d.parent))?;
        }
        Ok(false)
    }

    /// Expose parameter `index` of `node` as the next graph parameter.
    pub fn add_parameter_to_graph(&self, graph: Graph, node: Node, index: u32) -> VxResult<u32> {
        let owner = self.node_data(node, |d| {
            if index as usize >= d.params.len() {
                return Err(VxError::InvalidParameters);
            }
            Ok(d.graph)
        })?;
        if owner != graph {
            return Err(VxError::InvalidParameters);
        }
        let max = self.inner.config.max_parameters;
        self.graph_data(graph, |g| {
            if g.parameters.len() >= max {
                return Err(VxError::NoResources);
            }
            g.parameters.push(GraphParameter { node, index });
            Ok(g.parameters.len() as u32 - 1)
        })
    }

    /// Bind `value` to graph parameter `index`.
    pub fn set_graph_parameter_by_index(&self, graph: Graph, index: u32, value: impl AsHandle) -> VxResult<()> {
        let p = self.get_graph_parameter_by_index(graph, index)?;
        self.set_parameter_by_index(p.node, p.index, value)
    }

    pub fn get_graph_parameter_by_index(&self, graph: Graph, index: u32) -> VxResult<GraphParameter> {
        self.graph_data(graph, |g| {
            g.parameters.get(index as usize).copied().ok_or(VxError::InvalidParameters)
        })
    }

    /// Age `delay` after every completed run of `graph`.
    pub fn register_auto_aging(&self, graph: Graph, delay: Delay) -> VxResult<()> {
        self.object_of(delay.handle(), ObjectType::Delay)?;
        let already = self.graph_data(graph, |g| Ok(g.delays.contains(&delay)))?;
        if already {
            return Ok(());
        }
        self.increment(delay.handle(), RefType::Internal)?;
        self.graph_data(graph, |g| {
            g.delays.push(delay);
            Ok(())
        })
    }

    /// Graph torn down: run the deinitialize hooks of its nodes while they still resolve.
    pub(crate) fn teardown_graph(&self, graph: Graph, object: &RefObject) -> VxResult<()> {
        let nodes = {
            let mut data = object.data.lock();
            match GraphData::project(&mut data) {
                Some(g) => {
                    g.pending = None;
                    g.nodes.clone()
                }
                None => return Ok(()),
            }
        };
        let mut fold = StatusFold::new();
        for node in nodes {
            fold.push(self.deinitialize_node(node));
        }
        log::trace!("graph {} torn down", graph);
        fold.finish()
    }

    /// Set `reverify` on every idle verified graph with a node bound to `handle`.
    pub(crate) fn contaminate_graphs(&self, handle: Handle) {
        let Ok(bound) = self.with_header(handle, |h| h.bound_in.clone()) else {
            return;
        };
        let mut graphs: Vec<Graph> = Vec::with_capacity(bound.len());
        for graph in bound {
            if !graphs.contains(&graph) {
                graphs.push(graph);
            }
        }
        for graph in graphs {
            let _ = self.graph_data(graph, |g| {
                if g.verified && g.state != GraphState::Running {
                    log::trace!("graph {} needs re-verification after a write to {}", graph, handle);
                    g.reverify = true;
                }
                Ok(())
            });
        }
    }

    fn note_binding(&self, handle: Handle, graph: Graph) {
        let _ = self.with_header(handle, |h| h.bound_in.push(graph));
    }

    fn drop_binding(&self, handle: Handle, graph: Graph) {
        let _ = self.with_header(handle, |h| {
            if let Some(i) = h.bound_in.iter().position(|g| *g == graph) {
                h.bound_in.swap_remove(i);
            }
        });
    }

    // ========================================================================
    // Nodes
    // ========================================================================

    /// Instantiate a finalized kernel in `graph`.
    pub fn create_generic_node(&self, graph: Graph, kernel: Kernel) -> VxResult<Node> {
        let data = self.kernel_data(kernel)?;
        if !data.finalized {
            return Err(VxError::InvalidReference);
        }
        let max = self.inner.config.max_nodes_per_graph;
        let count = self.graph_data(graph, |g| match g.state {
            GraphState::Running => Err(VxError::GraphScheduled),
            _ => Ok(g.nodes.len()),
        })?;
        if count >= max {
            self.add_log_entry(Some(graph.handle()), VxError::NoResources, "graph node table full");
            return Err(VxError::NoResources);
        }

        self.increment(kernel.handle(), RefType::Internal)?;
        let created = self.create_reference(
            Creation::scoped(ObjectType::Node, graph.handle()),
            ObjectData::Node(Box::new(NodeData::new(graph, kernel, &data))),
        );
        let handle = match created {
            Ok(h) => h,
            Err(e) => {
                let _ = self.decrement(kernel.handle(), RefType::Internal);
                return Err(e);
            }
        };
        let node = Node(handle);
        self.increment(handle, RefType::Internal)?;
        self.graph_data(graph, |g| {
            g.nodes.push(node);
            g.invalidate();
            Ok(())
        })?;
        self.set_reference_name(node, &data.name)?;
        log::debug!("node {} ({}) added to graph {}", node, data.name, graph);
        Ok(node)
    }

    /// Look a kernel up by name and instantiate it with `params` bound in order.
    pub fn create_node_by_name(&self, graph: Graph, kernel_name: &str, params: &[Option<Handle>]) -> VxResult<Node> {
        let kernel = self.get_kernel_by_name(kernel_name)?;
        let created = self.create_generic_node(graph, kernel);
        self.release(kernel)?;
        let node = created?;
        for (i, p) in params.iter().enumerate() {
            if let Some(h) = p {
                if let Err(e) = self.set_parameter_by_index(node, i as u32, *h) {
                    let _ = self.remove_node(node);
                    return Err(e);
                }
            }
        }
        Ok(node)
    }

    /// Bind `value` to parameter `index` of `node`.
    pub fn set_parameter_by_index(&self, node: Node, index: u32, value: impl AsHandle) -> VxResult<()> {
        let value = value.handle();
        let (graph, kernel, current) = self.node_data(node, |d| {
            let current = *d.params.get(index as usize).ok_or(VxError::InvalidParameters)?;
            Ok((d.graph, d.kernel, current))
        })?;
        if current == Some(value) {
            return Ok(());
        }
        self.check_not_running(graph)?;
        let spec = self.kernel_parameter(kernel, index as usize)?;
        let kind = self.object_type(value)?;
        if !spec.object_type.accepts(kind) {
            log::warn!("node {} parameter {}: expected {}, got {}", node, index, spec.object_type, kind);
            return Err(VxError::InvalidType);
        }
        let (is_virtual, scope) = self.with_header(value, |h| (h.is_virtual, h.scope))?;
        if is_virtual && !self.graph_in_scope(graph, scope)? {
            return Err(VxError::InvalidScope);
        }

        let old = self.swap_parameter(node, index, Some(value))?;
        if let Some(old) = old {
            self.delay_unbind(old, node, index);
        }
        self.delay_bind(value, node, index)?;
        self.mark_reverify(graph);
        Ok(())
    }

    /// Clear an optional parameter.
    pub fn unset_parameter_by_index(&self, node: Node, index: u32) -> VxResult<()> {
        let graph = self.node_data(node, |d| Ok(d.graph))?;
        self.check_not_running(graph)?;
        if let Some(old) = self.swap_parameter(node, index, None)? {
            self.delay_unbind(old, node, index);
        }
        self.mark_reverify(graph);
        Ok(())
    }

    /// Replace a bound parameter without touching delay bindings. Used by delay aging.
    pub(crate) fn rebind_node_parameter(&self, node: Node, index: u32, value: Handle) -> VxResult<()> {
        let graph = self.node_data(node, |d| Ok(d.graph))?;
        self.swap_parameter(node, index, Some(value))?;
        self.mark_reverify(graph);
        Ok(())
    }

    /// Move the node's internal count from the old occupant of `index` to `value`.
    fn swap_parameter(&self, node: Node, index: u32, value: Option<Handle>) -> VxResult<Option<Handle>> {
        if let Some(h) = value {
            self.increment(h, RefType::Internal)?;
        }
        let swapped = self.node_data(node, |d| {
            let slot = d.params.get_mut(index as usize).ok_or(VxError::InvalidParameters)?;
            Ok((std::mem::replace(slot, value), d.graph))
        });
        let (old, graph) = match swapped {
            Ok(swapped) => swapped,
            Err(e) => {
                if let Some(h) = value {
                    let _ = self.decrement(h, RefType::Internal);
                }
                return Err(e);
            }
        };
        if let Some(h) = value {
            self.note_binding(h, graph);
        }
        if let Some(h) = old {
            self.drop_binding(h, graph);
            self.decrement(h, RefType::Internal)?;
        }
        Ok(old)
    }

    /// Parameter `index` of `node` with its declared signature.
    pub fn node_parameter(&self, node: Node, index: u32) -> VxResult<Parameter> {
        let (kernel, value) = self.node_data(node, |d| {
            let value = *d.params.get(index as usize).ok_or(VxError::InvalidParameters)?;
            Ok((d.kernel, value))
        })?;
        let spec = self.kernel_parameter(kernel, index as usize)?;
        Ok(Parameter {
            node,
            index,
            spec,
            value,
        })
    }

    pub fn query_node(&self, node: Node) -> VxResult<NodeInfo> {
        let (kernel, info) = self.node_data(node, |d| {
            Ok((
                d.kernel,
                NodeInfo {
                    kernel: String::new(),
                    target: d.target.clone(),
                    status: d.status,
                    executed: d.executed,
                    perf: d.perf,
                    border: d.border,
                    local_data_size: d.local_data_size,
                    parameters: d.params.len(),
                    replicated: d.replicated.clone(),
                    has_child: d.child.is_some(),
                },
            ))
        })?;
        let name = self.kernel_data(kernel).map(|k| k.name).unwrap_or_default();
        Ok(NodeInfo { kernel: name, ..info })
    }

    pub fn set_node_attribute(&self, node: Node, attribute: NodeAttribute) -> VxResult<()> {
        let graph = self.node_data(node, |d| Ok(d.graph))?;
        self.check_not_running(graph)?;
        self.node_data(node, |d| {
            match attribute {
                NodeAttribute::Border(b) => d.border = b,
                NodeAttribute::LocalDataSize(n) => {
                    if d.initialized {
                        return Err(VxError::NotSupported);
                    }
                    d.local_data_size = n;
                }
            }
            Ok(())
        })?;
        self.mark_reverify(graph);
        Ok(())
    }

    /// Run the node on the first target matching `target` that publishes its kernel.
    pub fn set_node_target(&self, node: Node, target: &str) -> VxResult<()> {
        let (graph, kernel) = self.node_data(node, |d| Ok((d.graph, d.kernel)))?;
        self.check_not_running(graph)?;
        let name = self.kernel_data(kernel)?.name;
        let (target_name, found) = self.find_supporting_target(target, &name).ok_or(VxError::NotSupported)?;
        self.rebind_node(node, &target_name, found)?;
        log::debug!("node {} moved to target {}", node, target_name);
        self.mark_reverify(graph);
        Ok(())
    }

    /// Point `node` at `kernel` published on `target`, moving the node's kernel count.
    pub(crate) fn rebind_node(&self, node: Node, target: &str, kernel: Kernel) -> VxResult<()> {
        let current = self.node_data(node, |d| Ok(d.kernel))?;
        if kernel != current {
            if self.kernel_data(kernel)?.signature() != self.kernel_data(current)?.signature() {
                return Err(VxError::NotCompatible);
            }
            self.increment(kernel.handle(), RefType::Internal)?;
            self.node_data(node, |d| {
                d.kernel = kernel;
                Ok(())
            })?;
            self.decrement(current.handle(), RefType::Internal)?;
        }
        self.node_data(node, |d| {
            d.target = target.to_string();
            Ok(())
        })
    }

    /// Install or clear the completion callback. Replacing an installed one is refused.
    pub fn assign_node_callback(&self, node: Node, callback: Option<NodeCallback>) -> VxResult<()> {
        self.node_data(node, |d| {
            if callback.is_some() && d.callback.is_some() {
                return Err(VxError::NotSupported);
            }
            d.callback = callback;
            Ok(())
        })
    }

    /// Remove a node from its graph and release the caller's handle to it.
    pub fn remove_node(&self, node: Node) -> VxResult<()> {
        let graph = self.node_data(node, |d| Ok(d.graph))?;
        self.check_not_running(graph)?;
        self.deinitialize_node(node)?;
        self.graph_data(graph, |g| {
            let position = g.nodes.iter().position(|n| *n == node).ok_or(VxError::InvalidNode)?;
            g.nodes.remove(position);
            g.parameters.retain(|p| p.node != node);
            g.heads.retain(|n| *n != node);
            g.order.retain(|n| *n != node);
            g.waves.iter_mut().for_each(|w| w.retain(|n| *n != node));
            g.invalidate();
            Ok(())
        })?;
        self.decrement(node.handle(), RefType::Internal)?;
        self.decrement(node.handle(), RefType::External)?;
        log::debug!("node {} removed from graph {}", node, graph);
        Ok(())
    }

    /// Run `node` once per level/item of the containers its flagged parameters belong to.
    ///
    /// Each flagged parameter must be bound to the first level of a pyramid or the first
    /// item of an object array.
    pub fn replicate_node(&self, graph: Graph, node: Node, replicate: &[bool]) -> VxResult<()> {
        let (owner, params) = self.node_data(node, |d| Ok((d.graph, d.params.clone())))?;
        if owner != graph || replicate.len() != params.len() || !replicate.iter().any(|r| *r) {
            return Err(VxError::InvalidParameters);
        }
        self.check_not_running(graph)?;
        for (i, flag) in replicate.iter().enumerate() {
            if !*flag {
                continue;
            }
            let h = params[i].ok_or(VxError::InvalidParameters)?;
            match self.container_of(h)? {
                Some((_, 0)) => {}
                _ => return Err(VxError::InvalidParameters),
            }
        }
        self.node_data(node, |d| {
            d.replicated = Some(replicate.to_vec());
            Ok(())
        })?;
        self.mark_reverify(graph);
        Ok(())
    }

    /// Parameter lists of every replica of a node, or the node's own list when it is not
    /// replicated. All replicated parameters must yield the same number of replicas.
    pub(crate) fn replica_params(&self, params: &[Option<Handle>], replicated: Option<&[bool]>) -> VxResult<Vec<Vec<Option<Handle>>>> {
        let Some(flags) = replicated else {
            return Ok(vec![params.to_vec()]);
        };
        let mut columns: Vec<(usize, Vec<Handle>)> = Vec::new();
        for (i, flag) in flags.iter().enumerate() {
            if !*flag {
                continue;
            }
            let h = params.get(i).copied().flatten().ok_or(VxError::InvalidParameters)?;
            let (container, _) = self.container_of(h)?.ok_or(VxError::InvalidParameters)?;
            columns.push((i, self.elements_of(container)?));
        }
        let count = columns.first().map(|(_, e)| e.len()).ok_or(VxError::InvalidParameters)?;
        if columns.iter().any(|(_, e)| e.len() != count) {
            return Err(VxError::InvalidParameters);
        }
        Ok((0..count)
            .map(|r| {
                let mut replica = params.to_vec();
                for (i, elements) in &columns {
                    replica[*i] = Some(elements[r]);
                }
                replica
            })
            .collect())
    }

    /// Run `child` in place of the node's kernel. Its graph parameters must mirror the
    /// kernel signature one to one.
    pub fn set_child_graph_of_node(&self, node: Node, child: Option<Graph>) -> VxResult<()> {
        let (graph, kernel, current) = self.node_data(node, |d| Ok((d.graph, d.kernel, d.child)))?;
        self.check_not_running(graph)?;
        if let Some(c) = child {
            if c == graph {
                return Err(VxError::InvalidGraph);
            }
            let signature = self.kernel_data(kernel)?.signature();
            let exposed = self.graph_data(c, |g| Ok(g.parameters.clone()))?;
            if exposed.len() != signature.len() {
                return Err(VxError::InvalidGraph);
            }
            for (spec, p) in signature.iter().zip(&exposed) {
                let inner = self.node_parameter(p.node, p.index)?.spec;
                if inner.direction != spec.direction || inner.object_type != spec.object_type {
                    return Err(VxError::InvalidGraph);
                }
            }
            self.increment(c.handle(), RefType::Internal)?;
            self.graph_data(c, |g| {
                g.parent = Some(graph);
                Ok(())
            })?;
        }
        self.node_data(node, |d| {
            d.child = child;
            Ok(())
        })?;
        if let Some(old) = current {
            let _ = self.graph_data(old, |g| {
                g.parent = None;
                Ok(())
            });
            self.decrement(old.handle(), RefType::Internal)?;
        }
        self.mark_reverify(graph);
        Ok(())
    }

    pub fn get_child_graph_of_node(&self, node: Node) -> VxResult<Option<Graph>> {
        self.node_data(node, |d| Ok(d.child))
    }

    /// Graph a node belongs to.
    pub fn node_graph(&self, node: Node) -> VxResult<Graph> {
        self.node_data(node, |d| Ok(d.graph))
    }

    /// Borrow the node's local data block, allocated during verification.
    pub fn with_node_local_data<R>(&self, node: Node, f: impl FnOnce(&mut [u8]) -> R) -> VxResult<R> {
        self.node_data(node, |d| match d.local_data.as_mut() {
            Some(block) => Ok(f(block)),
            None => Err(VxError::NotAllocated),
        })
    }

    /// Run the kernel's deinitialize hook if the node was initialized.
    pub(crate) fn deinitialize_node(&self, node: Node) -> VxResult<()> {
        let (kernel, params) = match self.node_data(node, |d| {
            if !d.initialized {
                return Ok(None);
            }
            d.initialized = false;
            d.local_data = None;
            Ok(Some((d.kernel, d.params.clone())))
        })? {
            Some(state) => state,
            None => return Ok(()),
        };
        match self.kernel_data(kernel)?.deinitialize {
            Some(hook) => hook(self, node, &params),
            None => Ok(()),
        }
    }

    /// Node torn down: finish deinitialization and drop its delay bindings.
    pub(crate) fn teardown_node(&self, node: Node, object: &RefObject) -> VxResult<()> {
        let (graph, kernel, params, initialized) = {
            let mut data = object.data.lock();
            match NodeData::project(&mut data) {
                Some(d) => (d.graph, d.kernel, d.params.clone(), std::mem::take(&mut d.initialized)),
                None => return Ok(()),
            }
        };
        let mut fold = StatusFold::new();
        if initialized {
            if let Some(hook) = fold.push(self.kernel_data(kernel)).and_then(|k| k.deinitialize) {
                fold.push(hook(self, node, &params));
            }
        }
        for (i, p) in params.iter().enumerate() {
            if let Some(h) = p {
                self.drop_binding(*h, graph);
                self.delay_unbind(*h, node, i as u32);
            }
        }
        fold.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::ContextConfig;
    use crate::core::types::{DfImage, PixelValue, SCALE_PYRAMID_HALF};
    use crate::kernels::KERNEL_AND;

    fn and_node(ctx: &Context, graph: Graph) -> Node {
        let kernel = ctx.get_kernel_by_enum(KERNEL_AND).unwrap();
        let node = ctx.create_generic_node(graph, kernel).unwrap();
        ctx.release(kernel).unwrap();
        node
    }

    #[test]
    fn test_node_holds_counts() {
        let ctx = Context::create().unwrap();
        let graph = ctx.create_graph().unwrap();
        let a = ctx.create_image(8, 8, DfImage::U8).unwrap();
        let node = and_node(&ctx, graph);
        assert_eq!(ctx.query_graph(graph).unwrap().nodes, 1);

        ctx.set_parameter_by_index(node, 0, a).unwrap();
        assert_eq!(ctx.query_reference(a).unwrap().internal_count, 1);
        ctx.set_parameter_by_index(node, 1, a).unwrap();
        assert_eq!(ctx.query_reference(a).unwrap().internal_count, 2);
        ctx.unset_parameter_by_index(node, 1).unwrap();
        assert_eq!(ctx.query_reference(a).unwrap().internal_count, 1);

        // The image outlives the caller's handle while the node binds it.
        ctx.release(a).unwrap();
        assert!(ctx.is_valid(a));
        ctx.release(node).unwrap();
        ctx.release(graph).unwrap();
        assert!(!ctx.is_valid(node));
        assert!(!ctx.is_valid(a));
    }

    #[test]
    fn test_parameter_type_and_scope_checks() {
        let ctx = Context::create().unwrap();
        let graph = ctx.create_graph().unwrap();
        let other = ctx.create_graph().unwrap();
        let node = and_node(&ctx, graph);
        let scalar = ctx.create_scalar(crate::core::types::ScalarValue::UInt8(1)).unwrap();
        assert_eq!(ctx.set_parameter_by_index(node, 0, scalar), Err(VxError::InvalidType));
        assert_eq!(ctx.set_parameter_by_index(node, 7, scalar), Err(VxError::InvalidParameters));

        let foreign = ctx.create_virtual_image(other, 8, 8, DfImage::U8).unwrap();
        assert_eq!(ctx.set_parameter_by_index(node, 2, foreign), Err(VxError::InvalidScope));
        let local = ctx.create_virtual_image(graph, 8, 8, DfImage::U8).unwrap();
        ctx.set_parameter_by_index(node, 2, local).unwrap();
        let info = ctx.node_parameter(node, 2).unwrap();
        assert_eq!(info.value, Some(local.handle()));
        assert_eq!(info.spec.object_type, ObjectType::Image);
    }

    #[test]
    fn test_unfinalized_kernel_cannot_back_a_node() {
        let ctx = Context::create().unwrap();
        let graph = ctx.create_graph().unwrap();
        let kernel = ctx
            .add_kernel(
                crate::target::KernelDescriptor::function("test.raw", 0x7_1000, 1, |_, _, _| Ok(()))
                    .with_validator(|_, _, _, _| Ok(())),
            )
            .unwrap();
        assert_eq!(ctx.create_generic_node(graph, kernel), Err(VxError::InvalidReference));
    }

    #[test]
    fn test_node_limit() {
        let ctx = Context::with_config(ContextConfig::default().with_max_nodes_per_graph(1)).unwrap();
        let graph = ctx.create_graph().unwrap();
        and_node(&ctx, graph);
        let kernel = ctx.get_kernel_by_enum(KERNEL_AND).unwrap();
        assert_eq!(ctx.create_generic_node(graph, kernel), Err(VxError::NoResources));
    }

    #[test]
    fn test_remove_node_releases_everything() {
        let ctx = Context::create().unwrap();
        let graph = ctx.create_graph().unwrap();
        let node = and_node(&ctx, graph);
        ctx.add_parameter_to_graph(graph, node, 0).unwrap();
        ctx.remove_node(node).unwrap();
        assert!(!ctx.is_valid(node));
        let info = ctx.query_graph(graph).unwrap();
        assert_eq!((info.nodes, info.parameters), (0, 0));
    }

    #[test]
    fn test_write_marks_only_consuming_graphs() {
        let ctx = Context::create().unwrap();
        let bindings = |h: Handle| ctx.with_header(h, |hd| hd.bound_in.len()).unwrap();
        let first = ctx.create_graph().unwrap();
        let second = ctx.create_graph().unwrap();
        let a = ctx.create_image(8, 8, DfImage::U8).unwrap();
        let b = ctx.create_image(8, 8, DfImage::U8).unwrap();
        let n1 = and_node(&ctx, first);
        let n2 = and_node(&ctx, second);
        for (node, input) in [(n1, a), (n2, b)] {
            ctx.set_parameter_by_index(node, 0, input).unwrap();
            ctx.set_parameter_by_index(node, 1, input).unwrap();
            let out = ctx.create_image(8, 8, DfImage::U8).unwrap();
            ctx.set_parameter_by_index(node, 2, out).unwrap();
        }
        assert_eq!(bindings(a.handle()), 2);
        ctx.verify_graph(first).unwrap();
        ctx.verify_graph(second).unwrap();

        ctx.wrote(a.handle());
        assert!(!ctx.is_graph_verified(first).unwrap());
        assert!(ctx.is_graph_verified(second).unwrap());

        ctx.set_parameter_by_index(n1, 1, b).unwrap();
        assert_eq!((bindings(a.handle()), bindings(b.handle())), (1, 3));
        ctx.remove_node(n1).unwrap();
        assert_eq!((bindings(a.handle()), bindings(b.handle())), (0, 2));
        ctx.wrote(b.handle());
        assert!(!ctx.is_graph_verified(second).unwrap());
    }

    #[test]
    fn test_graph_parameters() {
        let ctx = Context::create().unwrap();
        let graph = ctx.create_graph().unwrap();
        let other = ctx.create_graph().unwrap();
        let node = and_node(&ctx, graph);
        assert_eq!(ctx.add_parameter_to_graph(other, node, 0), Err(VxError::InvalidParameters));
        assert_eq!(ctx.add_parameter_to_graph(graph, node, 9), Err(VxError::InvalidParameters));
        assert_eq!(ctx.add_parameter_to_graph(graph, node, 2).unwrap(), 0);
        let img = ctx.create_image(4, 4, DfImage::U8).unwrap();
        ctx.set_graph_parameter_by_index(graph, 0, img).unwrap();
        assert_eq!(ctx.node_parameter(node, 2).unwrap().value, Some(img.handle()));
        assert_eq!(
            ctx.get_graph_parameter_by_index(graph, 0).unwrap(),
            GraphParameter { node, index: 2 }
        );
        assert!(ctx.get_graph_parameter_by_index(graph, 1).is_err());
    }

    #[test]
    fn test_callback_cannot_be_replaced() {
        let ctx = Context::create().unwrap();
        let graph = ctx.create_graph().unwrap();
        let node = and_node(&ctx, graph);
        let cb: NodeCallback = Arc::new(|_, _| Action::Continue);
        ctx.assign_node_callback(node, Some(cb.clone())).unwrap();
        assert_eq!(ctx.assign_node_callback(node, Some(cb.clone())), Err(VxError::NotSupported));
        ctx.assign_node_callback(node, None).unwrap();
        ctx.assign_node_callback(node, Some(cb)).unwrap();
    }

    #[test]
    fn test_node_attributes_and_target() {
        let ctx = Context::create().unwrap();
        let graph = ctx.create_graph().unwrap();
        let node = and_node(&ctx, graph);
        let border = Border::constant(PixelValue::U8(9));
        ctx.set_node_attribute(node, NodeAttribute::Border(border)).unwrap();
        ctx.set_node_attribute(node, NodeAttribute::LocalDataSize(32)).unwrap();
        let info = ctx.query_node(node).unwrap();
        assert_eq!(info.border, border);
        assert_eq!(info.local_data_size, 32);
        assert_eq!(info.kernel, "org.khronos.openvx.and");
        assert_eq!(info.target, crate::core::config::TARGET_TILING);

        ctx.set_node_target(node, "c_model").unwrap();
        assert_eq!(ctx.query_node(node).unwrap().target, crate::core::config::TARGET_C_MODEL);
        assert_eq!(ctx.set_node_target(node, "vendor.dsp"), Err(VxError::NotSupported));
    }

    #[test]
    fn test_replication_requires_first_level() {
        let ctx = Context::create().unwrap();
        let graph = ctx.create_graph().unwrap();
        let a = ctx.create_pyramid(3, SCALE_PYRAMID_HALF, 16, 16, DfImage::U8).unwrap();
        let b = ctx.create_pyramid(3, SCALE_PYRAMID_HALF, 16, 16, DfImage::U8).unwrap();
        let out = ctx.create_pyramid(2, SCALE_PYRAMID_HALF, 16, 16, DfImage::U8).unwrap();
        let node = and_node(&ctx, graph);
        let a0 = ctx.get_pyramid_level(a, 0).unwrap();
        let b1 = ctx.get_pyramid_level(b, 1).unwrap();
        let o0 = ctx.get_pyramid_level(out, 0).unwrap();
        ctx.set_parameter_by_index(node, 0, a0).unwrap();
        ctx.set_parameter_by_index(node, 1, b1).unwrap();
        ctx.set_parameter_by_index(node, 2, o0).unwrap();
        assert_eq!(
            ctx.replicate_node(graph, node, &[true, true, true]),
            Err(VxError::InvalidParameters)
        );
        ctx.replicate_node(graph, node, &[true, false, true]).unwrap();

        // Level counts disagree: 3 against 2.
        let params = ctx.node_data(node, |d| Ok(d.params.clone())).unwrap();
        assert_eq!(
            ctx.replica_params(&params, Some(&[true, false, true])),
            Err(VxError::InvalidParameters)
        );
        let replicas = ctx.replica_params(&params, Some(&[true, false, false])).unwrap();
        assert_eq!(replicas.len(), 3);
        assert!(replicas.iter().all(|r| r[1] == Some(b1.handle())));
    }

    #[test]
    fn test_child_graph_must_mirror_signature() {
        let ctx = Context::create().unwrap();
        let graph = ctx.create_graph().unwrap();
        let child = ctx.create_graph().unwrap();
        let node = and_node(&ctx, graph);
        assert_eq!(ctx.set_child_graph_of_node(node, Some(child)), Err(VxError::InvalidGraph));

        let inner = and_node(&ctx, child);
        for i in 0..3 {
            ctx.add_parameter_to_graph(child, inner, i).unwrap();
        }
        ctx.set_child_graph_of_node(node, Some(child)).unwrap();
        assert_eq!(ctx.get_child_graph_of_node(node).unwrap(), Some(child));
        assert_eq!(ctx.query_reference(child).unwrap().internal_count, 1);
        ctx.set_child_graph_of_node(node, None).unwrap();
        assert_eq!(ctx.query_reference(child).unwrap().internal_count, 0);
    }
}
