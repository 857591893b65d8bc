// This module provides the compilation-session context shared by all functions of one
// program: the fixed configuration object, the intrinsic declaration registry and
// lightweight lowering statistics. The registry is the only cross-function shared
// state in the pipeline; it is guarded by a mutex with an insert-if-absent operation
// so per-function lowering stays safe if the caller chooses to fan functions out
// across threads. Declarations are consumed by emission, which writes one external
// function signature per distinct intrinsic mnemonic ahead of all function bodies.

//! Compilation session: configuration, intrinsic registry, statistics.

use std::fmt;
use std::sync::Mutex;

use hashbrown::HashMap;
use serde::Serialize;

use crate::error::{CompileError, CompileResult};
use crate::ir::ResultDst;

/// Compilation-mode flags, passed in by the embedder.
#[derive(Clone, Copy, Debug)]
pub struct CompileOptions {
    /// Full debug info: variable records, source text on position records.
    pub debug_mode: bool,
    /// Target the builtin calling convention instead of intrinsic calls.
    pub variant_lowering: bool,
    /// Run the inline-cache slot pass.
    pub enable_ic: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            debug_mode: false,
            variant_lowering: false,
            enable_ic: true,
        }
    }
}

/// External function signature of one intrinsic.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct IntrinsicDecl {
    pub name: String,
    pub arity: usize,
    /// `"void"` for accumulator-less intrinsics, `"any"` otherwise.
    pub return_type: &'static str,
}

/// Session-wide lowering statistics.
#[derive(Clone, Debug, Default)]
pub struct SessionStats {
    pub functions_lowered: usize,
    pub total_insns: usize,
    pub intrinsics_expanded: usize,
    pub moves_inserted: usize,
}

impl fmt::Display for SessionStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Lowering statistics:")?;
        writeln!(f, "  Functions lowered: {}", self.functions_lowered)?;
        writeln!(f, "  Instructions produced: {}", self.total_insns)?;
        writeln!(f, "  Intrinsics expanded: {}", self.intrinsics_expanded)?;
        writeln!(f, "  Repair moves inserted: {}", self.moves_inserted)
    }
}

/// Shared context for one compilation.
///
/// Owns the configuration and the intrinsic declaration registry. Functions
/// are lowered against a shared reference; all interior state is guarded.
pub struct CompilationSession {
    options: CompileOptions,
    intrinsics: Mutex<HashMap<String, IntrinsicDecl>>,
    stats: Mutex<SessionStats>,
}

impl CompilationSession {
    pub fn new(options: CompileOptions) -> Self {
        Self {
            options,
            intrinsics: Mutex::new(HashMap::new()),
            stats: Mutex::new(SessionStats::default()),
        }
    }

    pub fn options(&self) -> &CompileOptions {
        &self.options
    }

    /// Whether `mnemonic` already has a declaration record.
    pub fn is_declared(&self, mnemonic: &str) -> bool {
        self.intrinsics
            .lock()
            .expect("intrinsic registry lock")
            .contains_key(mnemonic)
    }

    /// Record the declaration of an intrinsic, once per distinct mnemonic.
    ///
    /// Later calls with the same mnemonic are no-ops, so lowering the same
    /// intrinsic from several call sites (or several functions) yields
    /// exactly one registry entry.
    pub fn declare_intrinsic(
        &self,
        mnemonic: &str,
        arity: usize,
        result: ResultDst,
    ) -> CompileResult<()> {
        let return_type = match result {
            ResultDst::None => "void",
            ResultDst::Acc => "any",
            ResultDst::Reg => {
                return Err(CompileError::IntrinsicResultKind {
                    mnemonic: mnemonic.to_string(),
                })
            }
        };
        let mut registry = self.intrinsics.lock().expect("intrinsic registry lock");
        registry
            .entry(mnemonic.to_string())
            .or_insert_with(|| IntrinsicDecl {
                name: mnemonic.to_string(),
                arity,
                return_type,
            });
        Ok(())
    }

    /// Declarations recorded so far, sorted by name for stable emission.
    pub fn intrinsic_decls(&self) -> Vec<IntrinsicDecl> {
        let registry = self.intrinsics.lock().expect("intrinsic registry lock");
        let mut decls: Vec<IntrinsicDecl> = registry.values().cloned().collect();
        decls.sort_by(|a, b| a.name.cmp(&b.name));
        decls
    }

    pub fn record_function_lowered(&self, insns: usize) {
        let mut stats = self.stats.lock().expect("stats lock");
        stats.functions_lowered += 1;
        stats.total_insns += insns;
    }

    pub fn record_intrinsic_expanded(&self) {
        self.stats.lock().expect("stats lock").intrinsics_expanded += 1;
    }

    pub fn record_moves_inserted(&self, count: usize) {
        self.stats.lock().expect("stats lock").moves_inserted += count;
    }

    pub fn stats(&self) -> SessionStats {
        self.stats.lock().expect("stats lock").clone()
    }
}
