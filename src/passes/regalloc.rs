// This module implements the constraint register allocator, the last pass that may
// mutate the instruction stream. Phase 1 binds physical indices to locals, then the
// free temporary pool, then the needed cache registers, strictly increasing from
// zero. Phase 2 walks the stream, picks the format with the fewest out-of-range
// register operands for each instruction and repairs the rest with spill/restore
// moves through low-index scratch registers. Phase 3 gives range instructions a
// contiguous register block when their operands are not already consecutive, and
// phase 4 prepends the moves that bind declared parameters to their locals. Spill
// slots are pooled per function; scratch search never leaves the 256-register
// window because a scratch must itself be encodable in the narrow formats.

//! Register index assignment and format-constraint repair.

use crate::error::{CompileError, CompileResult};
use crate::ir::format::{count_invalid_regs, slot_for};
use crate::ir::{Format, Insn, IrFunction, Op, Operand, OperandKind, RegisterPool, VReg};
use crate::session::CompilationSession;

use super::Pass;

/// Ceiling of the 4-bit register class.
const MAX_REG_A: u32 = 16;
/// Scratch registers are searched in this window only.
const MAX_REG_B: u32 = 256;
/// Size of the physical index space.
const MAX_REG_C: u32 = 65536;

#[derive(Default)]
pub struct RegAlloc;

impl RegAlloc {
    pub fn new() -> Self {
        Self
    }
}

impl Pass for RegAlloc {
    fn name(&self) -> &'static str {
        "regalloc"
    }

    fn run(&mut self, func: &mut IrFunction, session: &CompilationSession) -> CompileResult<()> {
        let locals = func.locals.clone();
        let temps = func.temps.clone();
        let cache_regs = func.cache.needed_in_order();

        let mut alloc = Allocator::new(func.name.clone(), &mut func.pool);

        // Phase 1: allocation order is part of the encoding contract.
        for &reg in locals.iter().chain(&temps).chain(&cache_regs) {
            alloc.assign(reg)?;
        }

        // Phases 2 and 3: repair the stream against the chosen formats.
        let insns = std::mem::take(&mut func.insns);
        let mut out = Vec::with_capacity(insns.len());
        for (index, mut insn) in insns.into_iter().enumerate() {
            if insn.is_range() {
                if alloc.check_range(&insn, index)? {
                    out.push(insn);
                } else {
                    let (head, tail) = alloc.adjust_range(&mut insn)?;
                    out.extend(head);
                    out.push(insn);
                    out.extend(tail);
                }
                continue;
            }

            let formats = insn.op.formats();
            if formats.is_empty() {
                out.push(insn);
                continue;
            }
            let mut min = usize::MAX;
            let mut min_format = formats[0];
            for &format in formats {
                let invalid = count_invalid_regs(alloc.pool, &insn.operands, format);
                if invalid < min {
                    min = invalid;
                    min_format = format;
                }
            }
            if min == 0 {
                out.push(insn);
            } else {
                let (head, tail) = alloc.repair(&mut insn, min_format)?;
                out.extend(head);
                out.push(insn);
                out.extend(tail);
            }
        }
        func.insns = out;

        // Phase 4: parameters arrive in the highest indices; bind them to
        // their declared locals ahead of the body.
        let mut prologue = Vec::with_capacity(func.params_count);
        for i in 0..func.params_count {
            let param = alloc.pool.alloc();
            alloc.assign(param)?;
            prologue.push(Insn::mov(locals[i], param));
        }
        func.insns.splice(0..0, prologue);

        func.total_regs = alloc.next_index;
        session.record_moves_inserted(alloc.moves_inserted);
        Ok(())
    }
}

/// Per-run allocator state. Reset for every function; nothing leaks across.
struct Allocator<'a> {
    function: String,
    pool: &'a mut RegisterPool,
    /// Next free physical index.
    next_index: u32,
    /// Registers by physical index, for scratch search.
    used: Vec<VReg>,
    /// Scratch-ineligibility flags, parallel to `used`.
    flagged: Vec<bool>,
    /// Indices flagged during the current repair, cleared afterwards.
    marked: Vec<usize>,
    /// Free spill-slot pool.
    spills: Vec<VReg>,
    moves_inserted: usize,
}

impl<'a> Allocator<'a> {
    fn new(function: String, pool: &'a mut RegisterPool) -> Self {
        Self {
            function,
            pool,
            next_index: 0,
            used: Vec::new(),
            flagged: Vec::new(),
            marked: Vec::new(),
            spills: Vec::new(),
            moves_inserted: 0,
        }
    }

    /// Bind the next physical index to `reg`.
    fn assign(&mut self, reg: VReg) -> CompileResult<()> {
        if self.next_index >= MAX_REG_C {
            return Err(CompileError::RegistersExhausted {
                function: self.function.clone(),
            });
        }
        self.pool.set_index(reg, self.next_index);
        self.used.push(reg);
        self.flagged.push(false);
        self.next_index += 1;
        Ok(())
    }

    fn alloc_spill(&mut self) -> CompileResult<VReg> {
        if let Some(spill) = self.spills.pop() {
            return Ok(spill);
        }
        let spill = self.pool.alloc();
        self.assign(spill)?;
        Ok(spill)
    }

    fn free_spill(&mut self, spill: VReg) {
        self.spills.push(spill);
    }

    /// Mark a register ineligible as scratch for the current repair.
    fn mark_ineligible(&mut self, reg: VReg) {
        if let Some(index) = self.pool.index(reg) {
            let index = index as usize;
            if index < self.flagged.len() && !self.flagged[index] {
                self.flagged[index] = true;
                self.marked.push(index);
            }
        }
    }

    fn clear_flags(&mut self) {
        for index in self.marked.drain(..) {
            self.flagged[index] = false;
        }
    }

    /// Find one scratch register whose index fits below `ceiling`.
    ///
    /// Search never leaves the low 256-register window. For the 4-bit class
    /// the first unflagged candidate decides: indices are scanned in order,
    /// so a candidate at or past 16 means the whole class is taken.
    fn find_scratch(&mut self, ceiling: u32) -> CompileResult<VReg> {
        let window = (MAX_REG_B as usize).min(self.used.len());
        for i in 0..window {
            if self.flagged[i] {
                continue;
            }
            if ceiling == MAX_REG_A && i as u32 >= MAX_REG_A {
                return Err(CompileError::NoScratchInClass {
                    function: self.function.clone(),
                });
            }
            self.flagged[i] = true;
            self.marked.push(i);
            return Ok(self.used[i]);
        }
        Err(CompileError::NoScratchAvailable {
            function: self.function.clone(),
        })
    }

    /// Find `count` consecutive scratch registers below `ceiling`.
    fn find_scratch_block(&mut self, ceiling: u32, count: usize) -> CompileResult<Vec<VReg>> {
        let window = (ceiling.min(MAX_REG_B) as usize).min(self.used.len());
        let mut start = 0;
        while start + count <= window {
            match (start..start + count).find(|&i| self.flagged[i]) {
                Some(blocked) => start = blocked + 1,
                None => {
                    for i in start..start + count {
                        self.flagged[i] = true;
                        self.marked.push(i);
                    }
                    return Ok(self.used[start..start + count].to_vec());
                }
            }
        }
        Err(CompileError::NoScratchBlock {
            function: self.function.clone(),
            count,
        })
    }

    /// Spill-repair one instruction against `format`.
    ///
    /// Every overflowing register operand is rerouted through a scratch
    /// register: save the scratch to a spill slot, copy per the slot role
    /// (source before, destination after), restore the scratch. Returns the
    /// compensating moves to place around the instruction.
    fn repair(
        &mut self,
        insn: &mut Insn,
        format: Format,
    ) -> CompileResult<(Vec<Insn>, Vec<Insn>)> {
        let mut head = Vec::new();
        let mut tail = Vec::new();
        let mut used_spills = Vec::new();

        // The instruction's own registers must not be picked as scratch.
        for operand in &insn.operands {
            if let Operand::Reg(reg) = operand {
                let reg = *reg;
                self.mark_ineligible(reg);
            }
        }

        for (j, operand) in insn.operands.iter_mut().enumerate() {
            let Operand::Reg(origin) = *operand else {
                continue;
            };
            let Some(slot) = slot_for(format, j) else {
                continue;
            };
            let index = self.pool.index(origin).ok_or_else(|| {
                CompileError::InvalidRegister {
                    function: self.function.clone(),
                    detail: invalid_reg_detail(self.pool, origin),
                }
            })?;
            let ceiling = 1u32 << slot.width;
            if index < ceiling {
                continue;
            }

            let spill = self.alloc_spill()?;
            used_spills.push(spill);
            let scratch = self.find_scratch(ceiling)?;

            head.push(Insn::mov(spill, scratch));
            *operand = Operand::Reg(scratch);
            match slot.kind {
                OperandKind::SrcReg => head.push(Insn::mov(scratch, origin)),
                OperandKind::DstReg => tail.push(Insn::mov(origin, scratch)),
                OperandKind::SrcDstReg => {
                    head.push(Insn::mov(scratch, origin));
                    tail.push(Insn::mov(origin, scratch));
                }
                _ => {}
            }
            tail.push(Insn::mov(scratch, spill));
        }

        for spill in used_spills.into_iter().rev() {
            self.free_spill(spill);
        }
        self.clear_flags();
        self.finish_moves(insn, &mut head, &mut tail);
        Ok((head, tail))
    }

    /// Whether a range instruction's register block is already valid.
    ///
    /// Valid means the first register index is below the range slot's ceiling
    /// and every following index is exactly one greater than the previous. A
    /// first index at or above the ceiling just means the block must be
    /// repaired. Later indices past the ceiling are fine: only the first is
    /// encoded. A discontinuity below the ceiling depends on who built the
    /// instruction: `call.range` comes out of the lowering pass, whose mixed
    /// pass-through and materialized arguments are legitimately scattered, so
    /// it falls through to block repair; the dyn-range forms are built by the
    /// front end, where a scattered block indicates an upstream bug and is
    /// fatal.
    fn check_range(&self, insn: &Insn, index: usize) -> CompileResult<bool> {
        let Some(first_slot) = insn.first_reg_slot() else {
            return Ok(true);
        };
        let regs = &insn.operands[first_slot..];
        let Some(first) = regs.first() else {
            return Ok(true);
        };
        let ceiling = self.range_ceiling(insn);

        let mut prev = self.reg_index(first)?;
        if prev >= ceiling {
            return Ok(false);
        }
        for operand in &regs[1..] {
            let current = self.reg_index(operand)?;
            if current != prev + 1 {
                if insn.op == Op::CallRange {
                    return Ok(false);
                }
                return Err(CompileError::SequenceNotContinuous {
                    function: self.function.clone(),
                    index,
                });
            }
            prev = current;
        }
        Ok(true)
    }

    /// Reroute a range instruction's registers through a contiguous scratch
    /// block: spill-save each block register, copy the operand values in, and
    /// restore afterwards. Costs 2×N moves and N spill slots.
    fn adjust_range(&mut self, insn: &mut Insn) -> CompileResult<(Vec<Insn>, Vec<Insn>)> {
        let Some(first_slot) = insn.first_reg_slot() else {
            return Ok((Vec::new(), Vec::new()));
        };
        let count = insn.operands.len() - first_slot;
        let ceiling = self.range_ceiling(insn);
        let block = self.find_scratch_block(ceiling, count)?;

        let mut head = Vec::new();
        let mut tail = Vec::new();
        let mut used_spills = Vec::new();
        // Block slots whose original value has been displaced into a spill.
        let mut saved: Vec<(VReg, VReg)> = Vec::new();

        for (i, operand) in insn.operands[first_slot..].iter_mut().enumerate() {
            let Operand::Reg(origin) = *operand else {
                return Err(CompileError::InvalidRegister {
                    function: self.function.clone(),
                    detail: format!("range operand {} is not a register", first_slot + i),
                });
            };
            let spill = self.alloc_spill()?;
            used_spills.push(spill);
            head.push(Insn::mov(spill, block[i]));
            // An operand may itself sit in an earlier block slot that the
            // copy-in already overwrote; its value lives in that slot's
            // spill now.
            let source = saved
                .iter()
                .find(|(slot, _)| *slot == origin)
                .map(|(_, spill)| *spill)
                .unwrap_or(origin);
            head.push(Insn::mov(block[i], source));
            saved.push((block[i], spill));
            *operand = Operand::Reg(block[i]);
            tail.push(Insn::mov(block[i], spill));
        }

        for spill in used_spills.into_iter().rev() {
            self.free_spill(spill);
        }
        self.clear_flags();
        self.finish_moves(insn, &mut head, &mut tail);
        Ok((head, tail))
    }

    fn range_ceiling(&self, insn: &Insn) -> u32 {
        let first_slot = insn.first_reg_slot().unwrap_or(0);
        let width = insn.op.formats()[0]
            .get(first_slot)
            .map(|slot| slot.width)
            .unwrap_or(8);
        1u32 << width
    }

    fn reg_index(&self, operand: &Operand) -> CompileResult<u32> {
        let Operand::Reg(reg) = operand else {
            return Err(CompileError::InvalidRegister {
                function: self.function.clone(),
                detail: "range operand is not a register".into(),
            });
        };
        self.pool
            .index(*reg)
            .ok_or_else(|| CompileError::InvalidRegister {
                function: self.function.clone(),
                detail: invalid_reg_detail(self.pool, *reg),
            })
    }

    /// Tag compensating moves with the repaired instruction's position and
    /// count them for the session statistics.
    fn finish_moves(&mut self, insn: &Insn, head: &mut [Insn], tail: &mut [Insn]) {
        for emitted in head.iter_mut().chain(tail.iter_mut()) {
            emitted.pos = insn.pos.clone();
        }
        self.moves_inserted += head.len() + tail.len();
    }
}

fn invalid_reg_detail(pool: &RegisterPool, reg: VReg) -> String {
    match pool.trace_of(reg) {
        Some(trace) => format!("{reg:?} has no physical index, acquired at:\n{trace}"),
        None => format!("{reg:?} has no physical index"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{CachedValue, Imm, Op};
    use crate::session::{CompilationSession, CompileOptions};

    fn session() -> CompilationSession {
        CompilationSession::new(CompileOptions::default())
    }

    fn run(func: &mut IrFunction) -> CompileResult<()> {
        RegAlloc::new().run(func, &session())
    }

    fn indices(func: &IrFunction, insn: &Insn) -> Vec<u32> {
        insn.operands
            .iter()
            .filter_map(|operand| match operand {
                Operand::Reg(reg) => func.pool.index(*reg),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn assignment_order_is_locals_temps_cache() {
        let mut func = IrFunction::new("f", 0);
        let l0 = func.new_local();
        let l1 = func.new_local();
        let t0 = func.get_temp();
        func.free_temps([t0]);
        let g = func.cache.get(&mut func.pool, CachedValue::Global);

        run(&mut func).unwrap();

        assert_eq!(func.pool.index(l0), Some(0));
        assert_eq!(func.pool.index(l1), Some(1));
        assert_eq!(func.pool.index(t0), Some(2));
        assert_eq!(func.pool.index(g), Some(3));
        assert_eq!(func.total_regs, 4);
    }

    #[test]
    fn parameters_bind_to_the_highest_indices() {
        let mut func = IrFunction::new("f", 2);
        let p0 = func.new_local();
        let p1 = func.new_local();
        func.add(Insn::return_undefined());

        run(&mut func).unwrap();

        // Two prologue moves ahead of the body.
        assert_eq!(func.insns.len(), 3);
        assert_eq!(func.insns[0].op, Op::MovDyn);
        assert_eq!(indices(&func, &func.insns[0]), vec![0, 2]);
        assert_eq!(indices(&func, &func.insns[1]), vec![1, 3]);
        assert_eq!(func.total_regs, 4);
        let _ = (p0, p1);
    }

    #[test]
    fn spill_repair_for_oversized_dst_register() {
        let mut func = IrFunction::new("f", 0);
        let locals: Vec<VReg> = (0..300).map(|_| func.new_local()).collect();
        func.add(Insn::sta(locals[299]));
        func.add(Insn::return_undefined());

        run(&mut func).unwrap();

        // mov spill, scratch / sta.dyn scratch / mov origin, scratch /
        // mov scratch, spill / return.undefined
        assert_eq!(func.insns.len(), 5);
        assert_eq!(indices(&func, &func.insns[0]), vec![300, 0]);
        assert_eq!(func.insns[1].op, Op::StaDyn);
        assert_eq!(indices(&func, &func.insns[1]), vec![0]);
        assert_eq!(indices(&func, &func.insns[2]), vec![299, 0]);
        assert_eq!(indices(&func, &func.insns[3]), vec![0, 300]);
        assert_eq!(func.insns[4].op, Op::ReturnUndefined);
        assert_eq!(func.total_regs, 301);
    }

    #[test]
    fn src_register_is_copied_in_before_the_instruction() {
        let mut func = IrFunction::new("f", 0);
        let locals: Vec<VReg> = (0..300).map(|_| func.new_local()).collect();
        func.add(Insn::lda(locals[299]));

        run(&mut func).unwrap();

        // mov spill, scratch / mov scratch, origin / lda.dyn scratch /
        // mov scratch, spill
        assert_eq!(func.insns.len(), 4);
        assert_eq!(indices(&func, &func.insns[0]), vec![300, 0]);
        assert_eq!(indices(&func, &func.insns[1]), vec![0, 299]);
        assert_eq!(func.insns[2].op, Op::LdaDyn);
        assert_eq!(indices(&func, &func.insns[2]), vec![0]);
        assert_eq!(indices(&func, &func.insns[3]), vec![0, 300]);
    }

    #[test]
    fn wide_mov_needs_no_repair() {
        let mut func = IrFunction::new("f", 0);
        let locals: Vec<VReg> = (0..300).map(|_| func.new_local()).collect();
        func.add(Insn::mov(locals[299], locals[0]));

        run(&mut func).unwrap();

        // The 16-bit mov.dyn format absorbs the large index.
        assert_eq!(func.insns.len(), 1);
        assert_eq!(func.total_regs, 300);
    }

    fn range_call(args: &[VReg]) -> Insn {
        let mut operands = vec![
            Operand::Imm(Imm::Int(0)),
            Operand::Imm(Imm::Int(args.len() as i64)),
        ];
        operands.extend(args.iter().map(|&r| Operand::Reg(r)));
        Insn::new(Op::CalliDynRange, operands)
    }

    #[test]
    fn contiguous_range_is_left_alone() {
        let mut func = IrFunction::new("f", 0);
        let locals: Vec<VReg> = (0..4).map(|_| func.new_local()).collect();
        func.add(range_call(&locals));

        run(&mut func).unwrap();
        assert_eq!(func.insns.len(), 1);
    }

    #[test]
    fn oversized_range_gets_a_contiguous_block() {
        let mut func = IrFunction::new("f", 0);
        let locals: Vec<VReg> = (0..300).map(|_| func.new_local()).collect();
        func.add(range_call(&locals[297..300]));

        run(&mut func).unwrap();

        // Per block slot: spill-save + copy-in before the call, one restore
        // after it. 6 head moves, the call, 3 tail moves.
        assert_eq!(func.insns.len(), 10);
        let call = &func.insns[6];
        assert_eq!(call.op, Op::CalliDynRange);
        assert_eq!(indices(&func, call), vec![0, 1, 2]);
        // Each block register was saved to a fresh spill slot first.
        assert_eq!(indices(&func, &func.insns[0]), vec![300, 0]);
        assert_eq!(indices(&func, &func.insns[1]), vec![0, 297]);
        assert_eq!(indices(&func, &func.insns[9]), vec![2, 302]);
    }

    #[test]
    fn scattered_call_range_block_is_repaired() {
        let mut func = IrFunction::new("f", 0);
        let locals: Vec<VReg> = (0..5).map(|_| func.new_local()).collect();
        let mut operands = vec![Operand::Str("g".into()), Operand::Imm(Imm::Int(5))];
        for i in [0, 4, 1, 2, 3] {
            operands.push(Operand::Reg(locals[i]));
        }
        func.add(Insn::new(Op::CallRange, operands));

        run(&mut func).unwrap();

        let call = func
            .insns
            .iter()
            .find(|insn| insn.op == Op::CallRange)
            .expect("call survives");
        assert_eq!(indices(&func, call), vec![0, 1, 2, 3, 4]);
        // 2 moves per block slot in, 1 out.
        assert_eq!(func.insns.len(), 16);
        // The operand living in block slot 1 was overwritten before its own
        // copy-in, so slot 2 reads it back from slot 1's spill register.
        assert_eq!(indices(&func, &func.insns[5]), vec![2, 6]);
    }

    #[test]
    fn non_contiguous_range_below_ceiling_is_fatal() {
        let mut func = IrFunction::new("f", 0);
        let locals: Vec<VReg> = (0..6).map(|_| func.new_local()).collect();
        func.add(range_call(&[locals[0], locals[2], locals[4]]));

        let err = run(&mut func).unwrap_err();
        assert!(matches!(
            err,
            CompileError::SequenceNotContinuous { index: 0, .. }
        ));
    }

    #[test]
    fn moves_are_counted_in_session_stats() {
        let mut func = IrFunction::new("f", 0);
        let locals: Vec<VReg> = (0..300).map(|_| func.new_local()).collect();
        func.add(Insn::lda(locals[299]));

        let session = session();
        RegAlloc::new().run(&mut func, &session).unwrap();
        assert_eq!(session.stats().moves_inserted, 3);
    }

    #[test]
    fn repair_moves_carry_the_source_position() {
        let mut func = IrFunction::new("f", 0);
        let locals: Vec<VReg> = (0..300).map(|_| func.new_local()).collect();
        let mut insn = Insn::lda(locals[299]);
        insn.pos = crate::ir::DebugPos::at(3, 1, "a255;");
        func.add(insn);

        run(&mut func).unwrap();
        for insn in &func.insns {
            assert_eq!(insn.pos.line, 3);
        }
    }
}
