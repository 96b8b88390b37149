//! Graph verification.
//!
//! `verify_graph` runs a [`ValidationPipeline`] of stages over a snapshot of the graph's
//! nodes. Stages run in order and the first failing stage ends verification with the
//! status of its first issue.

pub mod pipeline;
pub mod stages;

pub use pipeline::{PlannedNode, ValidationPipeline, VerifyPlan};
pub use stages::{
    InitializeStage, MetaFormatStage, ParameterStage, SingleWriterStage, TargetStage, TopologyStage,
    ValidationStage,
};
