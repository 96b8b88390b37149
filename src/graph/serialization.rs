//! Graph descriptions for tooling: a JSON snapshot and a DOT rendering.

use crate::core::context::Context;
use crate::core::error::{status_code, VxResult};
use crate::core::reference::{AsHandle, Graph, Handle};
use crate::core::types::{Direction, GraphState, ObjectType, ParameterState};
use crate::execution::perf::Perf;
use crate::graph::structure::GraphParameter;
use crate::graph::topology::TopologyAnalyzer;
use petgraph::dot::{Config, Dot};
use petgraph::graph::DiGraph;
use serde::{Deserialize, Serialize};

/// One bound (or unbound) node parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDescription {
    pub index: u32,
    pub direction: Direction,
    pub object_type: ObjectType,
    pub state: ParameterState,
    /// Name of the bound object, `None` when unset.
    pub value: Option<String>,
    pub is_virtual: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDescription {
    pub name: String,
    pub kernel: String,
    pub target: String,
    pub executed: bool,
    /// Status code of the last run, 0 for success.
    pub status: i32,
    pub perf: Perf,
    pub replicated: Option<Vec<bool>>,
    pub child_graph: Option<String>,
    pub parameters: Vec<ParameterDescription>,
}

/// Snapshot of a graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphDescription {
    pub version: String,
    pub name: String,
    pub state: GraphState,
    pub verified: bool,
    pub perf: Perf,
    pub nodes: Vec<NodeDescription>,
    /// Graph parameters as `(node position, parameter index)`.
    pub parameters: Vec<(usize, u32)>,
    /// Producer to consumer, by node position. Empty when the nodes form a cycle.
    pub edges: Vec<(usize, usize)>,
}

impl GraphDescription {
    /// Current format version.
    pub const VERSION: &'static str = "1.0.0";

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

impl Context {
    fn reference_name(&self, handle: Handle) -> String {
        match self.query_reference(handle) {
            Ok(info) if !info.name.is_empty() => info.name,
            _ => handle.to_string(),
        }
    }

    /// Producer/consumer pairs among a graph's nodes, by position.
    fn graph_edges(&self, graph: Graph) -> VxResult<Vec<(usize, usize)>> {
        let nodes = self.graph_nodes(graph)?;
        let views = nodes
            .iter()
            .map(|n| self.node_view(*n))
            .collect::<VxResult<Vec<_>>>()?;
        let analyzer = TopologyAnalyzer::new(&views);
        Ok((0..views.len())
            .flat_map(|a| analyzer.successors(a).iter().map(move |b| (a, *b)))
            .collect())
    }

    /// Snapshot a graph's nodes, bindings and dependencies.
    pub fn describe_graph(&self, graph: Graph) -> VxResult<GraphDescription> {
        let info = self.query_graph(graph)?;
        let nodes = self.graph_nodes(graph)?;
        let mut described = Vec::with_capacity(nodes.len());
        for node in &nodes {
            let n = self.query_node(*node)?;
            let mut parameters = Vec::with_capacity(n.parameters);
            for index in 0..n.parameters as u32 {
                let p = self.node_parameter(*node, index)?;
                let is_virtual = match p.value {
                    Some(h) => self.query_reference(h)?.is_virtual,
                    None => false,
                };
                parameters.push(ParameterDescription {
                    index,
                    direction: p.spec.direction,
                    object_type: p.spec.object_type,
                    state: p.spec.state,
                    value: p.value.map(|h| self.reference_name(h)),
                    is_virtual,
                });
            }
            let child = self.get_child_graph_of_node(*node)?;
            described.push(NodeDescription {
                name: self.reference_name(node.handle()),
                kernel: n.kernel,
                target: n.target,
                executed: n.executed,
                status: status_code(&n.status),
                perf: n.perf,
                replicated: n.replicated,
                child_graph: child.map(|g| self.reference_name(g.handle())),
                parameters,
            });
        }
        let exposed: Vec<GraphParameter> = self.graph_data(graph, |g| Ok(g.parameters.clone()))?;
        let parameters = exposed
            .iter()
            .filter_map(|p| nodes.iter().position(|n| *n == p.node).map(|i| (i, p.index)))
            .collect();
        let edges = self.graph_edges(graph).unwrap_or_default();
        Ok(GraphDescription {
            version: GraphDescription::VERSION.to_string(),
            name: self.reference_name(graph.handle()),
            state: info.state,
            verified: info.verified,
            perf: info.perf,
            nodes: described,
            parameters,
            edges,
        })
    }

    /// Render a graph's dependency structure in Graphviz DOT.
    pub fn export_graph_dot(&self, graph: Graph) -> VxResult<String> {
        let nodes = self.graph_nodes(graph)?;
        let mut dag: DiGraph<String, &str> = DiGraph::new();
        let mut indices = Vec::with_capacity(nodes.len());
        for node in &nodes {
            let info = self.query_node(*node)?;
            indices.push(dag.add_node(format!("{} @ {}", info.kernel, info.target)));
        }
        for (a, b) in self.graph_edges(graph)? {
            dag.add_edge(indices[a], indices[b], "");
        }
        Ok(format!("{}", Dot::with_config(&dag, &[Config::EdgeNoLabel])))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::DfImage;
    use crate::kernels::{KERNEL_AND, KERNEL_NOT};

    fn two_node_graph(ctx: &Context) -> Graph {
        let graph = ctx.create_graph().unwrap();
        let a = ctx.create_image(8, 8, DfImage::U8).unwrap();
        let b = ctx.create_image(8, 8, DfImage::U8).unwrap();
        let mid = ctx.create_virtual_image(graph, 0, 0, DfImage::Virt).unwrap();
        let out = ctx.create_image(8, 8, DfImage::U8).unwrap();
        let and = ctx.get_kernel_by_enum(KERNEL_AND).unwrap();
        let not = ctx.get_kernel_by_enum(KERNEL_NOT).unwrap();
        let n0 = ctx.create_generic_node(graph, and).unwrap();
        let n1 = ctx.create_generic_node(graph, not).unwrap();
        ctx.set_parameter_by_index(n0, 0, a).unwrap();
        ctx.set_parameter_by_index(n0, 1, b).unwrap();
        ctx.set_parameter_by_index(n0, 2, mid).unwrap();
        ctx.set_parameter_by_index(n1, 0, mid).unwrap();
        ctx.set_parameter_by_index(n1, 1, out).unwrap();
        ctx.add_parameter_to_graph(graph, n1, 1).unwrap();
        graph
    }

    #[test]
    fn test_describe_graph() {
        let ctx = Context::create().unwrap();
        let graph = two_node_graph(&ctx);
        let desc = ctx.describe_graph(graph).unwrap();
        assert_eq!(desc.nodes.len(), 2);
        assert_eq!(desc.edges, vec![(0, 1)]);
        assert_eq!(desc.parameters, vec![(1, 1)]);
        assert_eq!(desc.nodes[0].kernel, "org.khronos.openvx.and");
        assert!(desc.nodes[1].parameters[0].is_virtual);
        assert_eq!(desc.state, GraphState::Unverified);

        let json = desc.to_json().unwrap();
        assert!(json.contains("\"edges\""));
        assert_eq!(GraphDescription::from_json(&json).unwrap(), desc);
    }

    #[test]
    fn test_export_dot() {
        let ctx = Context::create().unwrap();
        let graph = two_node_graph(&ctx);
        let dot = ctx.export_graph_dot(graph).unwrap();
        assert!(dot.starts_with("digraph"));
        assert!(dot.contains("org.khronos.openvx.not"));
        assert!(dot.contains("0 -> 1"));
    }
}
