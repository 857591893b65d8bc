// This module is the central hub for the backend's IR model: operands, immediates,
// labels, instruction formats, opcodes and the instruction struct itself, together
// with the submodules for the register arena (pool), the reserved constant registers
// (cache), the format/byte-length model shared by the allocator and the debug pass
// (format), and the per-function container (function). Instructions are created by
// the front end or by a lowering pass and are only ever replaced by expansion; the
// passes rebuild the stream as a fresh vector instead of splicing in place.

//! IR model for the bytecode lowering pipeline.
//!
//! An [`Insn`] is a tagged operation: an opcode, an ordered operand list and a
//! mutable debug-position record. Register operands hold [`VReg`] handles into
//! the function's [`RegisterPool`]; the physical index lives in the pool, so
//! repairs redirect operands without touching shared state.

pub mod cache;
pub mod format;
pub mod function;
pub mod pool;

pub use cache::{CachedValue, RegCache, CACHE_LIST};
pub use function::{CatchEntry, IrFunction, LabelPair, ScopeSpan, SourcePoint, VariableDebugInfo};
pub use pool::{RegisterPool, VReg};

use serde::Serialize;

/// Role and bit-width of one operand slot within an encoding.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FormatSlot {
    pub kind: OperandKind,
    pub width: u8,
}

/// One candidate encoding: an ordered list of slot descriptors.
///
/// An instruction with several formats is one operation with several
/// encodings, distinguished only by the maximum register index each slot can
/// address. Format lists are ordered narrowest first.
pub type Format = &'static [FormatSlot];

/// Operand roles as seen by the encoder.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OperandKind {
    SrcReg,
    DstReg,
    SrcDstReg,
    Imm,
    StringId,
    Id,
    Label,
}

impl OperandKind {
    pub fn is_reg(self) -> bool {
        matches!(
            self,
            OperandKind::SrcReg | OperandKind::DstReg | OperandKind::SrcDstReg
        )
    }
}

/// Immediate value with its numeric kind.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Imm {
    Int(i64),
    Long(i64),
    Float(f64),
}

impl Imm {
    pub fn as_f64(self) -> f64 {
        match self {
            Imm::Int(v) | Imm::Long(v) => v as f64,
            Imm::Float(v) => v,
        }
    }

    pub fn as_int(self) -> Option<i64> {
        match self {
            Imm::Int(v) | Imm::Long(v) => Some(v),
            Imm::Float(_) => None,
        }
    }
}

/// Jump-target identity, materialized late as `LABEL_{id}`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Label(pub u32);

impl Label {
    pub fn name(self) -> String {
        format!("LABEL_{}", self.0)
    }
}

/// One instruction operand. Immutable once constructed except for the
/// register case, whose physical index lives in the pool.
#[derive(Clone, Debug, PartialEq)]
pub enum Operand {
    Imm(Imm),
    Str(String),
    Lbl(Label),
    Reg(VReg),
}

/// Where an intrinsic delivers its result.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResultDst {
    None,
    Acc,
    Reg,
}

/// Inline-cache site of a cache-eligible intrinsic.
#[derive(Clone, Debug, PartialEq)]
pub struct IcSite {
    /// How many slots this instruction kind consumes.
    pub slots: u16,
    /// Slot base, assigned by the inline-cache pass.
    pub offset: Option<u32>,
}

impl IcSite {
    pub fn new(slots: u16) -> Self {
        Self {
            slots,
            offset: None,
        }
    }
}

/// Synthetic placeholder for a higher-level runtime operation.
///
/// Lowered into a concrete call sequence by the intrinsic pass; the operand
/// roles come from the first (and only) format the front end declared.
#[derive(Clone, Debug, PartialEq)]
pub struct IntrinsicOp {
    pub mnemonic: String,
    pub arg_kinds: Vec<OperandKind>,
    pub result: ResultDst,
    pub ic: Option<IcSite>,
}

impl IntrinsicOp {
    pub fn new(mnemonic: impl Into<String>, arg_kinds: Vec<OperandKind>, result: ResultDst) -> Self {
        Self {
            mnemonic: mnemonic.into(),
            arg_kinds,
            result,
            ic: None,
        }
    }

    pub fn with_ic(mut self, slots: u16) -> Self {
        self.ic = Some(IcSite::new(slots));
        self
    }
}

/// Opcodes known to the backend.
///
/// `LabelDef` and `ScopeMarker` are zero-width pseudo instructions;
/// `Intrinsic` never survives the lowering pass.
#[derive(Clone, Debug, PartialEq)]
pub enum Op {
    LdaDyn,
    StaDyn,
    LdaiDyn,
    FldaiDyn,
    LdaStr,
    MovDyn,
    Jmp,
    ReturnUndefined,
    CallShort,
    Call,
    CallRange,
    CalliDynRange,
    BuiltinAcc,
    BuiltinR2i,
    LabelDef,
    ScopeMarker(u32),
    Intrinsic(IntrinsicOp),
}

impl Op {
    /// Candidate encodings, narrowest first. Pseudo instructions and
    /// intrinsics have none.
    pub fn formats(&self) -> &'static [Format] {
        match self {
            Op::LdaDyn => format::LDA_DYN,
            Op::StaDyn => format::STA_DYN,
            Op::LdaiDyn => format::LDAI_DYN,
            Op::FldaiDyn => format::FLDAI_DYN,
            Op::LdaStr => format::LDA_STR,
            Op::MovDyn => format::MOV_DYN,
            Op::Jmp => format::JMP,
            Op::ReturnUndefined => format::RETURN_UNDEFINED,
            Op::CallShort => format::CALL_SHORT,
            Op::Call => format::CALL,
            Op::CallRange => format::CALL_RANGE,
            Op::CalliDynRange => format::CALLI_DYN_RANGE,
            Op::BuiltinAcc => format::BUILTIN_ACC,
            Op::BuiltinR2i => format::BUILTIN_R2I,
            Op::LabelDef | Op::ScopeMarker(_) | Op::Intrinsic(_) => &[],
        }
    }

    pub fn mnemonic(&self) -> &str {
        match self {
            Op::LdaDyn => "lda.dyn",
            Op::StaDyn => "sta.dyn",
            Op::LdaiDyn => "ldai.dyn",
            Op::FldaiDyn => "fldai.dyn",
            Op::LdaStr => "lda.str",
            Op::MovDyn => "mov.dyn",
            Op::Jmp => "jmp",
            Op::ReturnUndefined => "return.undefined",
            Op::CallShort => "call.short",
            Op::Call => "call",
            Op::CallRange => "call.range",
            Op::CalliDynRange => "calli.dyn.range",
            Op::BuiltinAcc => "builtin.acc",
            Op::BuiltinR2i => "builtin.r2i",
            Op::LabelDef => "label",
            Op::ScopeMarker(_) => "scope.marker",
            Op::Intrinsic(i) => &i.mnemonic,
        }
    }
}

/// How the front end tagged the source node behind an instruction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum NodeKind {
    Normal,
    Invalid,
    FirstNodeOfFunction,
}

/// Per-instruction debug position record.
///
/// Byte bounds are [left, right) offsets into the final encoded stream,
/// computed by the debug pass after allocation.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DebugPos {
    pub bound_left: Option<u32>,
    pub bound_right: Option<u32>,
    pub line: i32,
    pub column: i32,
    pub whole_line: Option<String>,
    pub node_kind: Option<NodeKind>,
}

impl Default for DebugPos {
    fn default() -> Self {
        Self {
            bound_left: None,
            bound_right: None,
            line: -1,
            column: -1,
            whole_line: None,
            node_kind: Some(NodeKind::FirstNodeOfFunction),
        }
    }
}

impl DebugPos {
    pub fn at(line: i32, column: i32, whole_line: impl Into<String>) -> Self {
        Self {
            bound_left: None,
            bound_right: None,
            line,
            column,
            whole_line: Some(whole_line.into()),
            node_kind: Some(NodeKind::Normal),
        }
    }
}

/// A single instruction of the stream.
#[derive(Clone, Debug, PartialEq)]
pub struct Insn {
    pub op: Op,
    pub operands: Vec<Operand>,
    pub pos: DebugPos,
    /// Inline-cache site; carried over from the originating intrinsic by the
    /// lowering pass, filled in by the inline-cache pass.
    pub ic: Option<IcSite>,
}

impl Insn {
    pub fn new(op: Op, operands: Vec<Operand>) -> Self {
        Self {
            op,
            operands,
            pos: DebugPos::default(),
            ic: None,
        }
    }

    pub fn mnemonic(&self) -> &str {
        self.op.mnemonic()
    }

    /// `mov.dyn dst, src`
    pub fn mov(dst: VReg, src: VReg) -> Self {
        Self::new(Op::MovDyn, vec![Operand::Reg(dst), Operand::Reg(src)])
    }

    /// `lda.dyn src`: load a register into the accumulator.
    pub fn lda(src: VReg) -> Self {
        Self::new(Op::LdaDyn, vec![Operand::Reg(src)])
    }

    /// `sta.dyn dst`: store the accumulator into a register.
    pub fn sta(dst: VReg) -> Self {
        Self::new(Op::StaDyn, vec![Operand::Reg(dst)])
    }

    /// `ldai.dyn imm`: load an int/long immediate into the accumulator.
    pub fn ldai(imm: Imm) -> Self {
        Self::new(Op::LdaiDyn, vec![Operand::Imm(imm)])
    }

    /// `fldai.dyn imm`: load a float immediate into the accumulator.
    pub fn fldai(imm: Imm) -> Self {
        Self::new(Op::FldaiDyn, vec![Operand::Imm(imm)])
    }

    /// `lda.str id`: load an interned string constant.
    pub fn lda_str(id: impl Into<String>) -> Self {
        Self::new(Op::LdaStr, vec![Operand::Str(id.into())])
    }

    pub fn label(label: Label) -> Self {
        Self::new(Op::LabelDef, vec![Operand::Lbl(label)])
    }

    pub fn return_undefined() -> Self {
        Self::new(Op::ReturnUndefined, vec![])
    }

    /// Whether this instruction belongs to the range family: its trailing
    /// register operands must form a contiguous increasing block.
    pub fn is_range(&self) -> bool {
        match &self.op {
            Op::CallRange | Op::CalliDynRange => true,
            Op::BuiltinR2i => matches!(
                self.operands.first(),
                Some(Operand::Imm(imm)) if matches!(imm.as_int(), Some(1) | Some(3) | Some(4))
            ),
            _ => false,
        }
    }

    /// Index of the first register operand slot, per the first format.
    pub fn first_reg_slot(&self) -> Option<usize> {
        let formats = self.op.formats();
        let first = formats.first()?;
        first.iter().position(|slot| slot.kind.is_reg())
    }
}
