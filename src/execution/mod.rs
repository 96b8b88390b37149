//! Graph execution.
//!
//! [`engine`] verifies and runs graphs; [`perf`] keeps the timing records nodes and
//! graphs accumulate across runs.

pub mod engine;
pub mod perf;

pub use engine::{ExecutionEngine, ExecutionOptions, ExecutionStats};
pub use perf::Perf;
