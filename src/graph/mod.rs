//! Graphs of kernel nodes.
//!
//! A graph is a set of nodes whose data dependencies are derived from their bound
//! parameters: a node that reads what another writes runs after it. Graphs are built
//! here, ordered by [`topology`], checked by the validation pipeline and run by the
//! execution engine.

pub mod serialization;
pub mod structure;
pub mod topology;

pub use serialization::{GraphDescription, NodeDescription, ParameterDescription};
pub use structure::{GraphInfo, GraphParameter, NodeAttribute, NodeCallback, NodeInfo, Parameter};
pub use topology::{Extent, NodeView, TopologyAnalyzer};
