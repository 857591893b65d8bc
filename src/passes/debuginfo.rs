// This module implements the debug position pass, which runs after allocation
// because instruction byte lengths depend on the selected encoding and therefore on
// final register indices. It tiles the stream with cumulative [left, right) byte
// spans through the shared length model, fills the positions the front end could
// not attribute from the function's first statement, aliases each label's span to
// the instruction that follows it, and in debug mode derives variable lifetime
// records from the scope markers. Scope markers are stripped at the end in both
// modes; release mode additionally drops source text and node kinds, keeping only
// the numeric position data.

//! Byte-span and variable debug info computation.

use crate::error::CompileResult;
use crate::ir::format::byte_len;
use crate::ir::{IrFunction, NodeKind, Op, VariableDebugInfo};
use crate::session::CompilationSession;

use super::Pass;

#[derive(Default)]
pub struct DebugInfoPass;

impl DebugInfoPass {
    pub fn new() -> Self {
        Self
    }
}

impl Pass for DebugInfoPass {
    fn name(&self) -> &'static str {
        "debuginfo"
    }

    fn run(&mut self, func: &mut IrFunction, session: &CompilationSession) -> CompileResult<()> {
        fill_unattributed_positions(func);
        set_byte_spans(func);

        if session.options().debug_mode {
            set_variable_records(func);
        }
        strip_scope_markers(func);
        if !session.options().debug_mode {
            for insn in &mut func.insns {
                insn.pos.whole_line = None;
                insn.pos.node_kind = None;
            }
        }
        Ok(())
    }
}

/// Give instructions the front end could not attribute the position of the
/// function's first statement.
fn fill_unattributed_positions(func: &mut IrFunction) {
    let Some(first) = func.first_stmt.clone() else {
        return;
    };
    for insn in &mut func.insns {
        if insn.pos.node_kind == Some(NodeKind::FirstNodeOfFunction) {
            insn.pos.line = first.line;
            insn.pos.column = first.column;
            insn.pos.whole_line = Some(first.text.clone());
        }
    }
}

/// Tile the stream with cumulative byte spans.
///
/// Zero-length instructions get an empty span at the running offset; a label
/// additionally takes over the span of the instruction that follows it, so
/// breakpoints on a label land on the first real instruction behind it.
fn set_byte_spans(func: &mut IrFunction) {
    let mut offset = 0u32;
    for i in 0..func.insns.len() {
        let length = byte_len(&func.pool, &func.insns[i]);
        func.insns[i].pos.bound_left = Some(offset);
        func.insns[i].pos.bound_right = Some(offset + length);
        offset += length;

        if i > 0 && func.insns[i - 1].op == Op::LabelDef {
            let pos = func.insns[i].pos.clone();
            func.insns[i - 1].pos = pos;
        }
    }
}

/// Derive one lifetime record per bound variable of every scope span.
///
/// Start and length are instruction indices between the scope's markers,
/// taken before the markers are stripped. Variables that never got a
/// physical register are skipped.
fn set_variable_records(func: &mut IrFunction) {
    let marker_index = |id: u32| {
        func.insns
            .iter()
            .position(|insn| insn.op == Op::ScopeMarker(id))
    };

    let mut records = Vec::new();
    for scope in &func.scopes {
        let (Some(start), Some(end)) = (
            marker_index(scope.start_marker),
            marker_index(scope.end_marker),
        ) else {
            continue;
        };
        for (name, reg) in &scope.bindings {
            let Some(index) = func.pool.index(*reg) else {
                continue;
            };
            records.push(VariableDebugInfo {
                name: name.clone(),
                signature: "any".into(),
                signature_type: "any".into(),
                reg: index,
                start: start as u32,
                length: (end - start + 1) as u32,
            });
        }
    }
    func.variables.extend(records);
}

fn strip_scope_markers(func: &mut IrFunction) {
    func.insns
        .retain(|insn| !matches!(insn.op, Op::ScopeMarker(_)));
}
