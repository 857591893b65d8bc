// This module implements the intrinsic lowering pass in both of its modes. The
// default mode rewrites every synthetic intrinsic instruction into a concrete call
// to a named runtime function (call.short/call/call.range depending on arity); the
// variant mode instead targets the builtin calling convention through the static
// mnemonic table in passes::builtins. Both modes record each distinct mnemonic into
// the session's declaration registry before the first expansion, materialize
// immediate and string operands through the accumulator into reusable temporary
// registers, and copy the original instruction's debug position onto everything
// they emit. The output stream is rebuilt as a fresh vector rather than spliced.

//! Intrinsic lowering: synthetic placeholders into real call sequences.

use crate::error::{CompileError, CompileResult};
use crate::ir::{
    Imm, Insn, IntrinsicOp, IrFunction, Op, Operand, OperandKind, RegisterPool, ResultDst, VReg,
};
use crate::session::CompilationSession;

use super::builtins::{builtin_code, BuiltinFamily, DEFINE_GLOBAL_VAR};
use super::Pass;

/// Runtime namespace intrinsic calls resolve against.
const INTRINSIC_NAMESPACE: &str = "Ecmascript.Intrinsics";

/// Default lowering: intrinsics become external function calls.
#[derive(Default)]
pub struct IntrinsicLowering {
    expander: Expander,
}

impl IntrinsicLowering {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Pass for IntrinsicLowering {
    fn name(&self) -> &'static str {
        "intrinsic-lowering"
    }

    fn run(&mut self, func: &mut IrFunction, session: &CompilationSession) -> CompileResult<()> {
        run_lowering(&mut self.expander, func, session, Mode::Call)
    }
}

/// Variant lowering: intrinsics become builtin instructions.
#[derive(Default)]
pub struct BuiltinLowering {
    expander: Expander,
}

impl BuiltinLowering {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Pass for BuiltinLowering {
    fn name(&self) -> &'static str {
        "builtin-lowering"
    }

    fn run(&mut self, func: &mut IrFunction, session: &CompilationSession) -> CompileResult<()> {
        run_lowering(&mut self.expander, func, session, Mode::Builtin)
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mode {
    Call,
    Builtin,
}

/// Pass-local temporary pool. Temporaries are reused between expansions and
/// handed to the function's free pool at the end so the allocator sees them.
#[derive(Default)]
struct Expander {
    temps: Vec<VReg>,
}

impl Expander {
    fn get_temp(&mut self, pool: &mut RegisterPool) -> VReg {
        self.temps.pop().unwrap_or_else(|| pool.alloc())
    }

    fn recycle(&mut self, used: Vec<VReg>) {
        self.temps.extend(used);
    }
}

fn run_lowering(
    expander: &mut Expander,
    func: &mut IrFunction,
    session: &CompilationSession,
    mode: Mode,
) -> CompileResult<()> {
    let insns = std::mem::take(&mut func.insns);
    let mut out = Vec::with_capacity(insns.len());

    for insn in insns {
        let Op::Intrinsic(ref intr) = insn.op else {
            out.push(insn);
            continue;
        };

        if !session.is_declared(&intr.mnemonic) {
            session.declare_intrinsic(&intr.mnemonic, insn.operands.len(), intr.result)?;
        }

        let (mut expansion, used_temps) = match mode {
            Mode::Call => expand_to_call(expander, &mut func.pool, intr, &insn.operands)?,
            Mode::Builtin => expand_to_builtin(expander, &mut func.pool, intr, &insn.operands)?,
        };
        session.record_intrinsic_expanded();

        // The cache site moves onto the concrete call that replaces the
        // intrinsic, always the last instruction of the expansion.
        if let Some(call) = expansion.last_mut() {
            call.ic = insn.ic.clone().or_else(|| intr.ic.clone());
        }

        for mut emitted in expansion {
            emitted.pos = insn.pos.clone();
            out.push(emitted);
        }
        expander.recycle(used_temps);
    }

    func.insns = out;
    // The allocator must see the extra registers this pass consumed.
    func.temps.append(&mut expander.temps);
    Ok(())
}

/// Materialize intrinsic operands into call-argument registers.
///
/// Source registers pass through; immediates and strings are loaded through
/// the accumulator into a temporary. Destination-register shapes are a
/// front-end contract violation, not a recoverable condition.
fn materialize_args(
    expander: &mut Expander,
    pool: &mut RegisterPool,
    intr: &IntrinsicOp,
    operands: &[Operand],
    expansion: &mut Vec<Insn>,
    used_temps: &mut Vec<VReg>,
) -> CompileResult<Vec<VReg>> {
    let mut call_args = Vec::with_capacity(operands.len());

    for (i, operand) in operands.iter().enumerate() {
        let kind = intr.arg_kinds.get(i).copied().ok_or_else(|| {
            CompileError::UnknownOperandKind {
                mnemonic: intr.mnemonic.clone(),
            }
        })?;

        if intr.result == ResultDst::Reg {
            return Err(CompileError::IntrinsicOperands {
                mnemonic: intr.mnemonic.clone(),
            });
        }

        match (kind, operand) {
            (OperandKind::SrcReg, Operand::Reg(reg)) => call_args.push(*reg),
            (OperandKind::Imm, Operand::Imm(imm)) => {
                let temp = expander.get_temp(pool);
                match imm {
                    Imm::Int(_) | Imm::Long(_) => expansion.push(Insn::ldai(*imm)),
                    Imm::Float(_) => expansion.push(Insn::fldai(*imm)),
                }
                expansion.push(Insn::sta(temp));
                call_args.push(temp);
                used_temps.push(temp);
            }
            (OperandKind::StringId | OperandKind::Id, Operand::Str(id)) => {
                let temp = expander.get_temp(pool);
                expansion.push(Insn::lda_str(id.clone()));
                expansion.push(Insn::sta(temp));
                call_args.push(temp);
                used_temps.push(temp);
            }
            (OperandKind::DstReg | OperandKind::SrcDstReg, _) => {
                return Err(CompileError::IntrinsicOperands {
                    mnemonic: intr.mnemonic.clone(),
                });
            }
            _ => {
                return Err(CompileError::UnknownOperandKind {
                    mnemonic: intr.mnemonic.clone(),
                });
            }
        }
    }

    Ok(call_args)
}

fn expand_to_call(
    expander: &mut Expander,
    pool: &mut RegisterPool,
    intr: &IntrinsicOp,
    operands: &[Operand],
) -> CompileResult<(Vec<Insn>, Vec<VReg>)> {
    let mut expansion = Vec::new();
    let mut used_temps = Vec::new();
    let call_args =
        materialize_args(expander, pool, intr, operands, &mut expansion, &mut used_temps)?;

    let callee = format!("{INTRINSIC_NAMESPACE}.{}", intr.mnemonic);
    let mut call_operands = vec![Operand::Str(callee)];
    let op = match call_args.len() {
        0..=2 => Op::CallShort,
        3..=4 => Op::Call,
        n => {
            call_operands.push(Operand::Imm(Imm::Int(n as i64)));
            Op::CallRange
        }
    };
    call_operands.extend(call_args.into_iter().map(Operand::Reg));
    expansion.push(Insn::new(op, call_operands));

    Ok((expansion, used_temps))
}

fn expand_to_builtin(
    expander: &mut Expander,
    pool: &mut RegisterPool,
    intr: &IntrinsicOp,
    operands: &[Operand],
) -> CompileResult<(Vec<Insn>, Vec<VReg>)> {
    let code = builtin_code(&intr.mnemonic).ok_or_else(|| CompileError::UnknownBuiltin {
        mnemonic: intr.mnemonic.clone(),
    })?;

    let mut expansion = Vec::new();
    let mut used_temps = Vec::new();

    // Only global-variable definition materializes its operands; everything
    // else passes registers straight through to the builtin form.
    let regs: Vec<VReg> = if intr.mnemonic == DEFINE_GLOBAL_VAR {
        materialize_args(expander, pool, intr, operands, &mut expansion, &mut used_temps)?
    } else {
        operands
            .iter()
            .map(|operand| match operand {
                Operand::Reg(reg) => Ok(*reg),
                _ => Err(CompileError::IntrinsicOperands {
                    mnemonic: intr.mnemonic.clone(),
                }),
            })
            .collect::<CompileResult<_>>()?
    };

    let builtin = match code.family {
        BuiltinFamily::Acc => {
            if !regs.is_empty() {
                return Err(CompileError::IntrinsicOperands {
                    mnemonic: intr.mnemonic.clone(),
                });
            }
            Insn::new(Op::BuiltinAcc, vec![Operand::Imm(Imm::Int(code.subcode))])
        }
        BuiltinFamily::R2i => {
            // The second immediate is the argument count; the leading
            // callee register is not counted.
            let argc = regs.len().saturating_sub(1) as i64;
            let mut builtin_operands = vec![
                Operand::Imm(Imm::Int(code.subcode)),
                Operand::Imm(Imm::Int(argc)),
            ];
            builtin_operands.extend(regs.into_iter().map(Operand::Reg));
            Insn::new(Op::BuiltinR2i, builtin_operands)
        }
    };
    expansion.push(builtin);

    Ok((expansion, used_temps))
}
