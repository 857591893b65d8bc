// This module implements the inline-cache slot pass. It walks the lowered stream
// once and hands every cache-carrying instruction the running slot offset, then
// advances the offset by that instruction's slot count. The per-function slot space
// is 16 bits; running over it is deliberately not an error, only a diagnostic, and
// the saturated total is still recorded on the function so the caller can see it.

//! Inline-cache slot assignment.

use log::error;

use crate::error::CompileResult;
use crate::ir::IrFunction;
use crate::session::CompilationSession;

use super::Pass;

/// Soft ceiling of the per-function slot space.
const IC_SLOT_LIMIT: u32 = 0xFFFF;

#[derive(Default)]
pub struct IcPass;

impl IcPass {
    pub fn new() -> Self {
        Self
    }
}

impl Pass for IcPass {
    fn name(&self) -> &'static str {
        "inline-cache"
    }

    fn run(&mut self, func: &mut IrFunction, _session: &CompilationSession) -> CompileResult<()> {
        let mut ic_size: u32 = 0;

        for insn in &mut func.insns {
            let Some(site) = insn.ic.as_mut() else {
                continue;
            };
            site.offset = Some(ic_size);
            ic_size += u32::from(site.slots);
        }

        if ic_size >= IC_SLOT_LIMIT {
            error!(
                "inline-cache pass: <{}> slot size overflow, total: {ic_size}",
                func.name
            );
        }
        func.ic_size = ic_size;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{IcSite, Insn, Op, Operand};
    use crate::session::{CompilationSession, CompileOptions};

    fn session() -> CompilationSession {
        CompilationSession::new(CompileOptions::default())
    }

    fn cached_call(slots: u16) -> Insn {
        let mut insn = Insn::new(Op::CallShort, vec![Operand::Str("f".into())]);
        insn.ic = Some(IcSite::new(slots));
        insn
    }

    #[test]
    fn offsets_advance_by_slot_count() {
        let mut func = IrFunction::new("f", 0);
        func.add(cached_call(2));
        func.add(Insn::return_undefined());
        func.add(cached_call(1));
        func.add(cached_call(4));

        IcPass::new().run(&mut func, &session()).unwrap();

        let offsets: Vec<Option<u32>> = func
            .insns
            .iter()
            .map(|i| i.ic.as_ref().and_then(|site| site.offset))
            .collect();
        assert_eq!(offsets, vec![Some(0), None, Some(2), Some(3)]);
        assert_eq!(func.ic_size, 7);
    }

    #[test]
    fn ineligible_instructions_are_skipped() {
        let mut func = IrFunction::new("f", 0);
        func.add(Insn::return_undefined());
        IcPass::new().run(&mut func, &session()).unwrap();
        assert_eq!(func.ic_size, 0);
    }

    #[test]
    fn overflow_completes_with_a_diagnostic_only() {
        let mut func = IrFunction::new("big", 0);
        // 8200 sites of 8 slots each: 65600, past the 16-bit ceiling.
        for _ in 0..8200 {
            func.add(cached_call(8));
        }

        IcPass::new().run(&mut func, &session()).unwrap();

        assert!(func.ic_size >= 0xFFFF);
        // Every site still got an offset; the pass does not abort mid-stream.
        assert!(func.insns.iter().all(|i| i
            .ic
            .as_ref()
            .is_none_or(|site| site.offset.is_some())));
    }
}
