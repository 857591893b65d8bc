// This module defines the Pass trait and the pipeline driver. Passes run strictly in
// sequence per function and operate on an exclusively owned IrFunction; the session
// is shared by reference and all of its interior state is synchronized, so the
// driver itself is safe to call for different functions from different threads. The
// first error aborts the current function only. Pass order is fixed: lowering first
// (it creates registers and call instructions), then inline-cache slots over the
// stable stream, then the allocator (which is the last pass allowed to insert
// instructions), then the debug pass, whose byte lengths depend on final indices.

//! Lowering passes and the per-function pipeline driver.

pub mod builtins;
pub mod debuginfo;
pub mod ic;
pub mod intrinsics;
pub mod regalloc;

pub use debuginfo::DebugInfoPass;
pub use ic::IcPass;
pub use intrinsics::{BuiltinLowering, IntrinsicLowering};
pub use regalloc::RegAlloc;

use log::debug;

use crate::error::CompileResult;
use crate::ir::IrFunction;
use crate::session::CompilationSession;

/// One pipeline stage. Each pass owns the function for the duration of its
/// run and leaves the stream in the representation the next pass expects.
pub trait Pass {
    fn name(&self) -> &'static str;

    fn run(&mut self, func: &mut IrFunction, session: &CompilationSession) -> CompileResult<()>;
}

/// Run the full lowering pipeline over one function.
///
/// The lowering mode is chosen from the session options; the inline-cache
/// pass is skipped when disabled. Errors abort this function only, leaving
/// the session usable for the remaining functions of the program.
pub fn lower_function(
    func: &mut IrFunction,
    session: &CompilationSession,
) -> CompileResult<()> {
    let mut passes: Vec<Box<dyn Pass>> = Vec::with_capacity(4);
    if session.options().variant_lowering {
        passes.push(Box::new(BuiltinLowering::new()));
    } else {
        passes.push(Box::new(IntrinsicLowering::new()));
    }
    if session.options().enable_ic {
        passes.push(Box::new(IcPass::new()));
    }
    passes.push(Box::new(RegAlloc::new()));
    passes.push(Box::new(DebugInfoPass::new()));

    for pass in &mut passes {
        debug!("{}: running {}", func.name, pass.name());
        pass.run(func, session)?;
    }
    session.record_function_lowered(func.insns.len());
    Ok(())
}
