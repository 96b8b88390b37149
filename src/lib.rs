//! # vxrt - OpenVX graph runtime
//!
//! vxrt runs computer-vision graphs in the OpenVX style: a [`Context`](core::context::Context)
//! owns reference-counted data objects and kernels, graphs connect kernel nodes through
//! the objects they read and write, and verification resolves everything that can be
//! decided before the first run.
//!
//! ## Features
//!
//! - **Verified graphs**: ordering, single-writer, scope and format checks run once in
//!   `verify_graph`; virtual outputs get their size and format from kernel validators
//! - **Targets**: kernels live on prioritized targets; the tiling target splits images into
//!   blocks with fast interior and border-aware edge paths
//! - **Parallel execution**: independent nodes run in waves and replicated nodes run their
//!   copies on the rayon pool
//! - **Delays**: ring buffers of objects that age automatically after each run
//! - **Extensible**: user kernels with validators, local data and tile functions
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use vxrt::prelude::*;
//!
//! let ctx = Context::create()?;
//! let a = ctx.create_image(640, 480, DfImage::U8)?;
//! let b = ctx.create_image(640, 480, DfImage::U8)?;
//!
//! let graph = ctx.create_graph()?;
//! let masked = ctx.create_virtual_image(graph, 0, 0, DfImage::Virt)?;
//! let out = ctx.create_image(640, 480, DfImage::U8)?;
//! ctx.create_node_by_name(graph, &kernel_name("and"), &[Some(a.0), Some(b.0), Some(masked.0)])?;
//! ctx.create_node_by_name(graph, &kernel_name("box_3x3"), &[Some(masked.0), Some(out.0)])?;
//!
//! ctx.verify_graph(graph)?;
//! ctx.process_graph(graph)?;
//! ```
//!
//! ## Architecture
//!
//! - [`core`]: context, references, status codes, memory and meta formats
//! - [`objects`]: images, arrays, scalars, pyramids, delays, tensors and the rest
//! - [`target`]: kernels, targets and the tiling machinery
//! - [`kernels`]: built-in kernels
//! - [`graph`]: graph and node construction, topology, descriptions
//! - [`validation`]: the verification pipeline
//! - [`execution`]: the execution engine
//! - [`io`]: image file import and export

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod core;
pub mod execution;
pub mod graph;
pub mod io;
pub mod kernels;
pub mod objects;
pub mod target;
pub mod validation;

/// Prelude module for convenient imports.
///
/// Import everything commonly needed with:
/// ```rust,ignore
/// use vxrt::prelude::*;
/// ```
pub mod prelude {
    // Context and configuration
    pub use crate::core::config::{ContextConfig, TargetConfig, TARGET_C_MODEL, TARGET_TILING};
    pub use crate::core::context::{Context, LogEntry};

    // Handles
    pub use crate::core::reference::{
        Array, AsHandle, Convolution, Delay, Distribution, Graph, Handle, Image, Kernel, Lut, Matrix, Node,
        ObjectArray, Pyramid, Remap, Scalar, Tensor, Threshold, UserData,
    };

    // Value types
    pub use crate::core::types::{
        Action, Border, BorderMode, Channel, ColorSpace, DataType, DfImage, Direction, GraphState, ObjectType,
        ParameterState, PixelValue, Rectangle, ScalarValue, ThresholdType, Usage,
    };

    // Errors
    pub use crate::core::error::{VerifyReport, VxError, VxResult};

    // Meta formats
    pub use crate::core::meta::{MetaFormat, MetaInfo};

    // Objects
    pub use crate::objects::image::ImageInfo;

    // Kernels and targets
    pub use crate::kernels::{channel_scalar, kernel_name};
    pub use crate::target::{KernelAttribute, KernelDescriptor, Neighborhood, TileFn, TileParam};

    // Graph
    pub use crate::graph::{GraphInfo, NodeAttribute, NodeInfo};

    // Validation
    pub use crate::validation::ValidationPipeline;

    // Execution
    pub use crate::execution::{ExecutionEngine, ExecutionOptions, ExecutionStats, Perf};
}

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name.
pub const NAME: &str = env!("CARGO_PKG_NAME");

#[cfg(test)]
mod tests {
    use super::prelude::*;

    #[test]
    fn test_version() {
        assert!(!super::VERSION.is_empty());
        assert_eq!(super::NAME, "vxrt");
    }

    #[test]
    fn test_two_stage_pipeline() {
        let ctx = Context::create().unwrap();
        let a = ctx.create_image(48, 24, DfImage::U8).unwrap();
        let b = ctx.create_image(48, 24, DfImage::U8).unwrap();
        ctx.write_image_plane(a, 0, &vec![0xF0; 48 * 24]).unwrap();
        ctx.write_image_plane(b, 0, &vec![0x3C; 48 * 24]).unwrap();

        let graph = ctx.create_graph().unwrap();
        let masked = ctx.create_virtual_image(graph, 0, 0, DfImage::Virt).unwrap();
        let out = ctx.create_image(48, 24, DfImage::U8).unwrap();
        ctx.create_node_by_name(graph, &kernel_name("and"), &[Some(a.0), Some(b.0), Some(masked.0)])
            .unwrap();
        let blur = ctx
            .create_node_by_name(graph, &kernel_name("box_3x3"), &[Some(masked.0), Some(out.0)])
            .unwrap();
        ctx.set_node_attribute(blur, NodeAttribute::Border(Border::replicate())).unwrap();

        ctx.verify_graph(graph).unwrap();
        ctx.process_graph(graph).unwrap();
        // A uniform image is unchanged by a box filter with a replicated border.
        assert!(ctx.read_image_plane(out, 0).unwrap().iter().all(|p| *p == 0x30));
        assert_eq!(ctx.query_graph(graph).unwrap().state, GraphState::Completed);
    }

    #[test]
    fn test_status_codes_round_trip() {
        for error in [VxError::Failure, VxError::InvalidGraph, VxError::ReferenceNonzero] {
            assert_eq!(VxError::from_code(error.code()), Some(error));
        }
        assert_eq!(VxError::from_code(0), None);
    }
}
