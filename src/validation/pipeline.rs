//! Verification pipeline.

use crate::core::context::Context;
use crate::core::error::{VerifyReport, VxResult};
use crate::core::reference::{Graph, Handle, Node};
use crate::core::types::Border;
use crate::graph::topology::NodeView;
use crate::target::kernel::KernelData;
use crate::validation::stages::{
    InitializeStage, MetaFormatStage, ParameterStage, SingleWriterStage, TargetStage, TopologyStage,
    ValidationStage,
};
use std::time::Instant;

/// A node as verification sees it: a copy of its state taken before the stages run.
#[derive(Clone)]
pub struct PlannedNode {
    pub node: Node,
    pub kernel: KernelData,
    pub target: String,
    pub params: Vec<Option<Handle>>,
    pub replicated: Option<Vec<bool>>,
    pub border: Border,
    pub child: Option<Graph>,
}

/// Working state threaded through the stages.
pub struct VerifyPlan<'a> {
    pub ctx: &'a Context,
    pub graph: Graph,
    /// Nodes in creation order.
    pub nodes: Vec<PlannedNode>,
    /// Filled by the topology stage.
    pub views: Vec<NodeView>,
    pub heads: Vec<usize>,
    pub order: Vec<usize>,
    pub waves: Vec<Vec<usize>>,
}

impl<'a> VerifyPlan<'a> {
    /// Snapshot the nodes of `graph`.
    pub fn new(ctx: &'a Context, graph: Graph) -> VxResult<Self> {
        let mut nodes = Vec::new();
        for node in ctx.graph_nodes(graph)? {
            let (kernel, target, params, replicated, border, child) = ctx.node_data(node, |d| {
                Ok((
                    d.kernel,
                    d.target.clone(),
                    d.params.clone(),
                    d.replicated.clone(),
                    d.border,
                    d.child,
                ))
            })?;
            nodes.push(PlannedNode {
                node,
                kernel: ctx.kernel_data(kernel)?,
                target,
                params,
                replicated,
                border,
                child,
            });
        }
        Ok(Self {
            ctx,
            graph,
            nodes,
            views: Vec::new(),
            heads: Vec::new(),
            order: Vec::new(),
            waves: Vec::new(),
        })
    }
}

/// Ordered set of verification stages. The first failing stage ends the run.
pub struct ValidationPipeline {
    stages: Vec<Box<dyn ValidationStage>>,
}

impl ValidationPipeline {
    pub fn new(stages: Vec<Box<dyn ValidationStage>>) -> Self {
        Self { stages }
    }

    /// Every stage `verify_graph` runs, in order.
    pub fn default_pipeline() -> Self {
        Self {
            stages: vec![
                Box::new(ParameterStage),
                Box::new(TopologyStage),
                Box::new(SingleWriterStage),
                Box::new(MetaFormatStage),
                Box::new(TargetStage),
                Box::new(InitializeStage),
            ],
        }
    }

    /// Checks that leave objects and nodes untouched.
    pub fn structural_pipeline() -> Self {
        Self {
            stages: vec![Box::new(ParameterStage), Box::new(TopologyStage), Box::new(SingleWriterStage)],
        }
    }

    pub fn add_stage(&mut self, stage: Box<dyn ValidationStage>) {
        self.stages.push(stage);
    }

    pub fn validate(&self, plan: &mut VerifyPlan<'_>) -> VerifyReport {
        let start = Instant::now();
        let mut report = VerifyReport::new();
        for stage in &self.stages {
            report.stages_run.push(stage.name().to_string());
            if let Err(issues) = stage.validate(plan) {
                for issue in issues {
                    report.add_issue(issue);
                }
                break;
            }
        }
        report.duration_us = start.elapsed().as_micros() as u64;
        report
    }
}

impl Default for ValidationPipeline {
    fn default() -> Self {
        Self::default_pipeline()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::VxError;
    use crate::core::types::DfImage;
    use crate::kernels::KERNEL_AND;

    #[test]
    fn test_structural_pipeline_on_incomplete_node() {
        let ctx = Context::create().unwrap();
        let graph = ctx.create_graph().unwrap();
        let a = ctx.create_image(4, 4, DfImage::U8).unwrap();
        let kernel = ctx.get_kernel_by_enum(KERNEL_AND).unwrap();
        let node = ctx.create_generic_node(graph, kernel).unwrap();
        ctx.set_parameter_by_index(node, 0, a).unwrap();

        let mut plan = VerifyPlan::new(&ctx, graph).unwrap();
        let report = ValidationPipeline::structural_pipeline().validate(&mut plan);
        assert!(!report.success);
        assert_eq!(report.stages_run, vec!["parameters".to_string()]);
        // Parameters 1 and 2 are both missing.
        assert_eq!(report.issues.len(), 2);
        assert_eq!(report.status(), Err(VxError::NotSufficient));
        assert_eq!(report.issues[0].parameter, Some(1));
    }

    #[test]
    fn test_empty_graph_is_invalid() {
        let ctx = Context::create().unwrap();
        let graph = ctx.create_graph().unwrap();
        let mut plan = VerifyPlan::new(&ctx, graph).unwrap();
        let report = ValidationPipeline::default_pipeline().validate(&mut plan);
        assert_eq!(report.status(), Err(VxError::InvalidGraph));
        assert_eq!(report.issues[0].stage, "topology");
    }
    /// Rejects graphs with more than `limit` nodes.
    struct NodeBudget {
        limit: usize,
    }

    impl ValidationStage for NodeBudget {
        fn name(&self) -> &str {
            "node_budget"
        }

        fn validate(&self, plan: &mut VerifyPlan<'_>) -> Result<(), Vec<crate::core::error::VerifyIssue>> {
            if plan.nodes.len() <= self.limit {
                return Ok(());
            }
            Err(vec![crate::core::error::VerifyIssue {
                stage: self.name().to_string(),
                node: None,
                parameter: None,
                status: VxError::NoResources,
                message: format!("{} nodes", plan.nodes.len()),
            }])
        }
    }

    #[test]
    fn test_custom_stage_runs_last() {
        let ctx = Context::create().unwrap();
        let graph = ctx.create_graph().unwrap();
        let a = ctx.create_image(4, 4, DfImage::U8).unwrap();
        let b = ctx.create_image(4, 4, DfImage::U8).unwrap();
        for out in [ctx.create_image(4, 4, DfImage::U8).unwrap(), ctx.create_image(4, 4, DfImage::U8).unwrap()] {
            ctx.create_node_by_name(graph, "org.khronos.openvx.and", &[Some(a.0), Some(b.0), Some(out.0)])
                .unwrap();
        }

        let mut pipeline = ValidationPipeline::structural_pipeline();
        pipeline.add_stage(Box::new(NodeBudget { limit: 1 }));
        let mut plan = VerifyPlan::new(&ctx, graph).unwrap();
        let report = pipeline.validate(&mut plan);
        assert_eq!(report.stages_run.last().map(String::as_str), Some("node_budget"));
        assert_eq!(report.status(), Err(VxError::NoResources));
    }
}
