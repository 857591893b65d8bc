// This module is the output data contract: a serializable, behavior-free model of
// the lowered program handed to the external assembler. The builder collects one
// emitted function per lowered IrFunction, interns string operands into a
// program-wide deduplicated table, deduplicates literal-array buffers by content,
// and prefixes the whole program with the intrinsic declarations recorded in the
// session registry. Emission is also the checkpoint for the pipeline's output
// invariants: a register operand without a physical index is an internal error
// (in debug builds the report carries the backtrace of the temporary acquisition
// that produced the register), and every referenced label must be defined exactly
// once in its function.

//! Emission data model and program builder.

use hashbrown::{HashMap, HashSet};
use serde::Serialize;

use crate::error::{CompileError, CompileResult};
use crate::ir::{DebugPos, Insn, IrFunction, Op, Operand, VariableDebugInfo};
use crate::session::{CompilationSession, IntrinsicDecl};

/// One literal-array element.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub enum Literal {
    Bool(bool),
    Int(i64),
    Double(f64),
    Str(String),
    Method(String),
}

/// Function signature as the assembler expects it. The return type is always
/// `any` and is left implicit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Signature {
    pub params: usize,
}

/// One final instruction: mnemonic plus fully resolved operand lists.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EmittedIns {
    pub op: String,
    pub regs: Vec<u32>,
    pub ids: Vec<String>,
    pub imms: Vec<f64>,
    pub label: Option<String>,
    pub ic_offset: Option<u32>,
    pub debug_pos_info: DebugPos,
}

/// One begin/end/handler triple of the exception table.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CatchTableEntry {
    pub begin: String,
    pub end: String,
    pub catch_begin: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EmittedFunction {
    pub name: String,
    pub signature: Signature,
    /// Register count excluding the trailing parameter registers.
    pub regs_num: u32,
    pub ins: Vec<EmittedIns>,
    pub labels: Vec<String>,
    pub catch_tables: Vec<CatchTableEntry>,
    pub variables: Option<Vec<VariableDebugInfo>>,
    pub source_file: String,
    pub ic_size: u32,
}

/// The whole lowered program, ready for serialization.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Program {
    /// External signatures, ahead of all function bodies.
    pub intrinsics: Vec<IntrinsicDecl>,
    pub functions: Vec<EmittedFunction>,
    pub strings: Vec<String>,
    pub literal_arrays: Vec<Vec<Literal>>,
}

/// Accumulates lowered functions into a [`Program`].
pub struct ProgramBuilder<'a> {
    session: &'a CompilationSession,
    functions: Vec<EmittedFunction>,
    strings: Vec<String>,
    seen_strings: HashSet<String>,
    literal_arrays: Vec<Vec<Literal>>,
}

impl<'a> ProgramBuilder<'a> {
    pub fn new(session: &'a CompilationSession) -> Self {
        Self {
            session,
            functions: Vec::new(),
            strings: Vec::new(),
            seen_strings: HashSet::new(),
            literal_arrays: Vec::new(),
        }
    }

    /// Intern one string into the program-wide table.
    fn intern(&mut self, value: &str) {
        if self.seen_strings.insert(value.to_string()) {
            self.strings.push(value.to_string());
        }
    }

    /// Register a literal-array buffer, deduplicated by content. Returns the
    /// buffer's program-wide id.
    pub fn add_literal_array(&mut self, buffer: Vec<Literal>) -> usize {
        if let Some(id) = self.literal_arrays.iter().position(|b| *b == buffer) {
            return id;
        }
        self.literal_arrays.push(buffer);
        self.literal_arrays.len() - 1
    }

    /// Convert one fully lowered function into its emitted form.
    pub fn add_function(&mut self, func: &IrFunction) -> CompileResult<()> {
        check_labels(func)?;

        let mut ins = Vec::with_capacity(func.insns.len());
        let mut labels = Vec::new();

        for insn in &func.insns {
            if insn.op == Op::LabelDef {
                if let Some(Operand::Lbl(label)) = insn.operands.first() {
                    labels.push(label.name());
                }
            }
            ins.push(self.emit_insn(func, insn)?);
        }

        let catch_tables = func
            .catch_tables
            .iter()
            .flat_map(|entry| {
                entry.pairs.iter().map(|pair| CatchTableEntry {
                    begin: pair.begin.name(),
                    end: pair.end.name(),
                    catch_begin: entry.catch_begin.name(),
                })
            })
            .collect();

        let variables = if func.variables.is_empty() {
            None
        } else {
            Some(func.variables.clone())
        };

        self.functions.push(EmittedFunction {
            name: func.name.clone(),
            signature: Signature {
                params: func.params_count,
            },
            regs_num: func.total_regs.saturating_sub(func.params_count as u32),
            ins,
            labels,
            catch_tables,
            variables,
            source_file: func.source_file.clone(),
            ic_size: func.ic_size,
        });
        Ok(())
    }

    fn emit_insn(&mut self, func: &IrFunction, insn: &Insn) -> CompileResult<EmittedIns> {
        let mut regs = Vec::new();
        let mut ids = Vec::new();
        let mut imms = Vec::new();
        let mut label = None;

        // Range-style instructions encode only the first register of their
        // block; the rest is implied by the argument count.
        let range = insn.is_range() || matches!(insn.op, Op::BuiltinR2i);

        for operand in &insn.operands {
            match operand {
                Operand::Reg(reg) => {
                    if range && !regs.is_empty() {
                        continue;
                    }
                    let index = func.pool.index(*reg).ok_or_else(|| {
                        CompileError::InvalidRegister {
                            function: func.name.clone(),
                            detail: match func.pool.trace_of(*reg) {
                                Some(trace) => {
                                    format!("{reg:?} has no physical index, acquired at:\n{trace}")
                                }
                                None => format!("{reg:?} has no physical index"),
                            },
                        }
                    })?;
                    regs.push(index);
                }
                Operand::Str(value) => {
                    self.intern(value);
                    ids.push(value.clone());
                }
                Operand::Imm(imm) => imms.push(imm.as_f64()),
                Operand::Lbl(target) => label = Some(target.name()),
            }
        }

        Ok(EmittedIns {
            op: insn.mnemonic().to_string(),
            regs,
            ids,
            imms,
            label,
            ic_offset: insn.ic.as_ref().and_then(|site| site.offset),
            debug_pos_info: insn.pos.clone(),
        })
    }

    /// Seal the program: declarations first, then bodies.
    pub fn finish(self) -> Program {
        Program {
            intrinsics: self.session.intrinsic_decls(),
            functions: self.functions,
            strings: self.strings,
            literal_arrays: self.literal_arrays,
        }
    }
}

/// Every label referenced by a jump or catch region must be defined exactly
/// once in the function's stream.
fn check_labels(func: &IrFunction) -> CompileResult<()> {
    let mut defs: HashMap<String, usize> = HashMap::new();
    for insn in &func.insns {
        if insn.op == Op::LabelDef {
            if let Some(Operand::Lbl(label)) = insn.operands.first() {
                *defs.entry(label.name()).or_insert(0) += 1;
            }
        }
    }

    let referenced = func
        .insns
        .iter()
        .filter(|insn| insn.op != Op::LabelDef)
        .flat_map(|insn| &insn.operands)
        .filter_map(|operand| match operand {
            Operand::Lbl(target) => Some(target.name()),
            _ => None,
        });
    let catch_refs = func.catch_tables.iter().flat_map(|entry| {
        entry
            .pairs
            .iter()
            .flat_map(move |pair| [pair.begin, pair.end, entry.catch_begin])
            .map(|label| label.name())
    });
    for label in referenced.chain(catch_refs) {
        if defs.get(&label).copied() != Some(1) {
            return Err(CompileError::InvalidLabel {
                function: func.name.clone(),
                label,
            });
        }
    }
    Ok(())
}
