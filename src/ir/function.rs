// This module defines IrFunction, the per-function container every pass operates on:
// the instruction stream, the virtual register arena, the locals list, the free
// temporary pool, the reserved cache registers, scope spans for variable debug
// records, catch-table entries and the function-level results the passes write back
// (inline-cache size, total register count). A function is exclusively owned by the
// single pass currently running; pools are per-function and never leak across.

//! Per-function IR container.

use serde::Serialize;

use super::cache::RegCache;
use super::pool::{RegisterPool, VReg};
use super::{Insn, Label, Op};

/// A try-region delimited by two labels.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LabelPair {
    pub begin: Label,
    pub end: Label,
}

/// Exception-table entry: every listed region funnels into one catch label.
#[derive(Clone, Debug, PartialEq)]
pub struct CatchEntry {
    pub catch_begin: Label,
    pub pairs: Vec<LabelPair>,
}

/// Source-level variables bound between a pair of scope markers.
#[derive(Clone, Debug)]
pub struct ScopeSpan {
    pub start_marker: u32,
    pub end_marker: u32,
    pub bindings: Vec<(String, VReg)>,
}

/// Lifetime record of one source variable, produced by the debug pass.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct VariableDebugInfo {
    pub name: String,
    pub signature: String,
    pub signature_type: String,
    pub reg: u32,
    /// First instruction index of the enclosing scope.
    pub start: u32,
    /// Number of instructions the scope covers.
    pub length: u32,
}

/// Line, column and text of the statement a position record points at.
#[derive(Clone, Debug, PartialEq)]
pub struct SourcePoint {
    pub line: i32,
    pub column: i32,
    pub text: String,
}

/// One function's IR stream plus the state the passes share.
pub struct IrFunction {
    pub name: String,
    pub params_count: usize,
    pub source_file: String,
    pub insns: Vec<Insn>,
    pub pool: RegisterPool,
    /// Local variable registers; the first `params_count` are parameters.
    pub locals: Vec<VReg>,
    /// Free temporary pool. Registers here are not currently in use; the
    /// allocator assigns indices to exactly this set after the locals.
    pub temps: Vec<VReg>,
    pub cache: RegCache,
    pub scopes: Vec<ScopeSpan>,
    pub catch_tables: Vec<CatchEntry>,
    pub variables: Vec<VariableDebugInfo>,
    /// Position of the function's first statement, used to fill in
    /// instructions the front end could not attribute.
    pub first_stmt: Option<SourcePoint>,
    pub ic_size: u32,
    pub total_regs: u32,
    next_label: u32,
    next_marker: u32,
}

impl IrFunction {
    pub fn new(name: impl Into<String>, params_count: usize) -> Self {
        Self {
            name: name.into(),
            params_count,
            source_file: String::new(),
            insns: Vec::new(),
            pool: RegisterPool::new(),
            locals: Vec::new(),
            temps: Vec::new(),
            cache: RegCache::new(),
            scopes: Vec::new(),
            catch_tables: Vec::new(),
            variables: Vec::new(),
            first_stmt: None,
            ic_size: 0,
            total_regs: 0,
            next_label: 0,
            next_marker: 0,
        }
    }

    pub fn add(&mut self, insn: Insn) {
        self.insns.push(insn);
    }

    /// Create a local variable register. Parameter locals must be created
    /// first, in declaration order.
    pub fn new_local(&mut self) -> VReg {
        let reg = self.pool.alloc();
        self.locals.push(reg);
        reg
    }

    /// Hand out a temporary register, reusing the free pool when possible.
    pub fn get_temp(&mut self) -> VReg {
        let reg = if self.temps.is_empty() {
            self.pool.alloc()
        } else {
            self.temps.remove(0)
        };
        self.pool.mark_acquired(reg);
        reg
    }

    /// Return temporaries to the front of the free pool.
    pub fn free_temps(&mut self, temps: impl IntoIterator<Item = VReg>) {
        let returned: Vec<VReg> = temps.into_iter().collect();
        for &reg in &returned {
            self.pool.mark_released(reg);
        }
        self.temps.splice(0..0, returned);
    }

    pub fn new_label(&mut self) -> Label {
        let label = Label(self.next_label);
        self.next_label += 1;
        label
    }

    /// Insert a scope-open marker; pair it with [`IrFunction::close_scope`].
    pub fn open_scope(&mut self) -> u32 {
        let id = self.next_marker;
        self.next_marker += 1;
        self.add(Insn::new(Op::ScopeMarker(id), vec![]));
        id
    }

    /// Insert the matching close marker and record the variables bound in
    /// between. Unbound variables are skipped later by the debug pass.
    pub fn close_scope(&mut self, start_marker: u32, bindings: Vec<(String, VReg)>) {
        let id = self.next_marker;
        self.next_marker += 1;
        self.add(Insn::new(Op::ScopeMarker(id), vec![]));
        self.scopes.push(ScopeSpan {
            start_marker,
            end_marker: id,
            bindings,
        });
    }

    /// Record a try-region with its catch entry. Regions may share a catch
    /// label; they end up in the same [`CatchEntry`].
    pub fn add_catch_region(&mut self, begin: Label, end: Label, catch_begin: Label) {
        let pair = LabelPair { begin, end };
        if let Some(entry) = self
            .catch_tables
            .iter_mut()
            .find(|entry| entry.catch_begin == catch_begin)
        {
            entry.pairs.push(pair);
        } else {
            self.catch_tables.push(CatchEntry {
                catch_begin,
                pairs: vec![pair],
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn temps_are_reused_front_first() {
        let mut func = IrFunction::new("f", 0);
        let a = func.get_temp();
        let b = func.get_temp();
        assert_ne!(a, b);
        func.free_temps([a]);
        let c = func.get_temp();
        assert_eq!(a, c);
    }

    #[test]
    fn scope_markers_pair_up() {
        let mut func = IrFunction::new("f", 0);
        let start = func.open_scope();
        let v = func.new_local();
        func.close_scope(start, vec![("x".into(), v)]);
        assert_eq!(func.scopes.len(), 1);
        assert_eq!(func.scopes[0].start_marker, start);
        assert_eq!(func.insns.len(), 2);
    }

    #[test]
    fn catch_regions_share_entries() {
        let mut func = IrFunction::new("f", 0);
        let (b1, e1) = (func.new_label(), func.new_label());
        let (b2, e2) = (func.new_label(), func.new_label());
        let handler = func.new_label();
        func.add_catch_region(b1, e1, handler);
        func.add_catch_region(b2, e2, handler);
        assert_eq!(func.catch_tables.len(), 1);
        assert_eq!(func.catch_tables[0].pairs.len(), 2);
    }
}
