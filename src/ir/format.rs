// This module holds the static format tables for every opcode plus the format
// selection and byte-length model. Both the register allocator (when deciding
// whether an instruction needs spill repair) and the debug position pass (when
// computing byte spans) resolve encodings through the same pure functions here,
// so the two can never drift apart. Trailing operands of variable-length range
// instructions reuse the last declared slot descriptor.

//! Instruction formats and the shared encoding-size model.

use super::pool::RegisterPool;
use super::{Format, FormatSlot, Insn, Op, Operand, OperandKind};

const fn s(kind: OperandKind, width: u8) -> FormatSlot {
    FormatSlot { kind, width }
}

use OperandKind::{DstReg, Id, Imm, Label, SrcReg, StringId};

pub(crate) static LDA_DYN: &[Format] = &[&[s(SrcReg, 8)]];
pub(crate) static STA_DYN: &[Format] = &[&[s(DstReg, 8)]];
pub(crate) static LDAI_DYN: &[Format] = &[&[s(Imm, 32)]];
pub(crate) static FLDAI_DYN: &[Format] = &[&[s(Imm, 64)]];
pub(crate) static LDA_STR: &[Format] = &[&[s(StringId, 32)]];
pub(crate) static MOV_DYN: &[Format] = &[
    &[s(DstReg, 8), s(SrcReg, 8)],
    &[s(DstReg, 16), s(SrcReg, 16)],
];
pub(crate) static JMP: &[Format] = &[&[s(Label, 8)], &[s(Label, 16)], &[s(Label, 32)]];
pub(crate) static RETURN_UNDEFINED: &[Format] = &[&[]];
pub(crate) static CALL_SHORT: &[Format] = &[&[s(Id, 32), s(SrcReg, 8), s(SrcReg, 8)]];
pub(crate) static CALL: &[Format] = &[&[
    s(Id, 32),
    s(SrcReg, 8),
    s(SrcReg, 8),
    s(SrcReg, 8),
    s(SrcReg, 8),
]];
pub(crate) static CALL_RANGE: &[Format] = &[&[s(Id, 32), s(Imm, 16), s(SrcReg, 16)]];
// The range register slot is 8 bits wide; wider sequences get block-repaired.
pub(crate) static CALLI_DYN_RANGE: &[Format] = &[&[s(Imm, 8), s(Imm, 16), s(SrcReg, 8)]];
pub(crate) static BUILTIN_ACC: &[Format] = &[&[s(Imm, 8)]];
pub(crate) static BUILTIN_R2I: &[Format] = &[&[s(Imm, 8), s(Imm, 16), s(SrcReg, 16)]];

/// Slot descriptor for operand `i`; trailing operands of variable-length
/// instructions reuse the last slot.
pub fn slot_for(format: Format, i: usize) -> Option<&'static FormatSlot> {
    format.get(i).or_else(|| format.last())
}

/// Whether a physical index is addressable by a slot of the given width.
pub fn fits(index: u32, width: u8) -> bool {
    width >= 32 || u64::from(index) < (1u64 << width)
}

/// Count register operands whose final index overflows its slot in `format`.
///
/// Unassigned registers count as valid; emission rejects them later.
pub fn count_invalid_regs(pool: &RegisterPool, operands: &[Operand], format: Format) -> usize {
    operands
        .iter()
        .enumerate()
        .filter(|(i, operand)| {
            let Operand::Reg(reg) = operand else {
                return false;
            };
            match (pool.index(*reg), slot_for(format, *i)) {
                (Some(index), Some(slot)) => !fits(index, slot.width),
                _ => false,
            }
        })
        .count()
}

/// Index of the narrowest format that fits every register operand.
///
/// Pure function of the final operand indices; falls back to the widest
/// format when none fits (the allocator guarantees that never happens in a
/// repaired stream).
pub fn narrowest_format(pool: &RegisterPool, insn: &Insn) -> usize {
    let formats = insn.op.formats();
    for (i, format) in formats.iter().enumerate() {
        if count_invalid_regs(pool, &insn.operands, format) == 0 {
            return i;
        }
    }
    formats.len().saturating_sub(1)
}

/// Byte length of an instruction under its narrowest admissible format.
///
/// One opcode byte plus the slot widths rounded up to whole bytes. Range
/// calls count only the two leading metadata slots; the register block is
/// encoded out of line. Pseudo instructions are zero length.
pub fn byte_len(pool: &RegisterPool, insn: &Insn) -> u32 {
    if matches!(insn.op, Op::LabelDef | Op::ScopeMarker(_)) {
        return 0;
    }
    let formats = insn.op.formats();
    if formats.is_empty() {
        return 0;
    }
    let format = formats[narrowest_format(pool, insn)];
    let bits: u32 = match insn.op {
        Op::CallRange | Op::CalliDynRange => format
            .iter()
            .take(2)
            .map(|slot| u32::from(slot.width))
            .sum(),
        _ => format.iter().map(|slot| u32::from(slot.width)).sum(),
    };
    1 + (bits + 7) / 8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Imm as ImmVal;

    #[test]
    fn narrowest_format_tracks_index_magnitude() {
        let mut pool = RegisterPool::new();
        let lo = pool.alloc();
        let hi = pool.alloc();
        pool.set_index(lo, 3);
        pool.set_index(hi, 300);

        let narrow = Insn::mov(lo, lo);
        assert_eq!(narrowest_format(&pool, &narrow), 0);

        let wide = Insn::mov(lo, hi);
        assert_eq!(narrowest_format(&pool, &wide), 1);
    }

    #[test]
    fn byte_len_follows_selected_format() {
        let mut pool = RegisterPool::new();
        let lo = pool.alloc();
        let hi = pool.alloc();
        pool.set_index(lo, 1);
        pool.set_index(hi, 4000);

        // mov.dyn v8, v8: opcode + 2 bytes.
        assert_eq!(byte_len(&pool, &Insn::mov(lo, lo)), 3);
        // mov.dyn v16, v16: opcode + 4 bytes.
        assert_eq!(byte_len(&pool, &Insn::mov(lo, hi)), 5);
        // return.undefined: opcode only.
        assert_eq!(byte_len(&pool, &Insn::return_undefined()), 1);
    }

    #[test]
    fn range_call_counts_metadata_slots_only() {
        let mut pool = RegisterPool::new();
        let regs: Vec<_> = (0..6)
            .map(|i| {
                let v = pool.alloc();
                pool.set_index(v, i);
                v
            })
            .collect();
        let mut operands = vec![
            Operand::Str("f".into()),
            Operand::Imm(ImmVal::Int(regs.len() as i64)),
        ];
        operands.extend(regs.iter().map(|&r| Operand::Reg(r)));
        let insn = Insn::new(Op::CallRange, operands);
        // opcode + id32 + imm16, regardless of the register count.
        assert_eq!(byte_len(&pool, &insn), 7);
    }

    #[test]
    fn pseudo_instructions_are_zero_length() {
        let pool = RegisterPool::new();
        let label = Insn::label(crate::ir::Label(0));
        assert_eq!(byte_len(&pool, &label), 0);
        let marker = Insn::new(Op::ScopeMarker(0), vec![]);
        assert_eq!(byte_len(&pool, &marker), 0);
    }

    #[test]
    fn trailing_operands_reuse_last_slot() {
        let format = CALL_RANGE[0];
        assert_eq!(slot_for(format, 2).map(|s| s.width), Some(16));
        assert_eq!(slot_for(format, 9).map(|s| s.width), Some(16));
    }
}
