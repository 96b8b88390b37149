//! The generic C-model target: whole-node functions run one node at a time.

use crate::core::context::Context;
use crate::core::error::VxResult;
use crate::target::TargetBackend;

/// Reference target. Runs whatever body a kernel has, tiling kernels included.
pub struct CModelTarget;

impl TargetBackend for CModelTarget {
    fn init(&self, ctx: &Context, target: &str) -> VxResult<()> {
        crate::kernels::publish_c_model(ctx, target)
    }

    fn deinit(&self, _ctx: &Context) -> VxResult<()> {
        log::trace!("c_model target shutting down");
        Ok(())
    }
}
