// This module defines error types for the bytecode lowering backend using the thiserror
// crate for idiomatic Rust error handling. CompileError is the main error enum covering
// the failure taxonomy of the pipeline: construction errors raised when the front end
// hands us a malformed intrinsic shape, resource-exhaustion errors from the register
// allocator, and guarded invariant violations that indicate an internal backend bug.
// Each variant carries relevant context (function names, mnemonics, instruction indices)
// for diagnosis. The module also provides CompileResult<T> as a convenience type alias.

//! Error types for the lowering pipeline.
//!
//! Using thiserror for more idiomatic error handling.

use thiserror::Error;

/// Main error type for bytecode lowering.
///
/// All variants are fatal for the function being compiled; there is no
/// partial-success state. The inline-cache slot overflow is deliberately
/// absent here: it is a logged diagnostic, not an error.
#[derive(Error, Debug)]
pub enum CompileError {
    /// Intrinsic tried to produce its result somewhere other than the
    /// accumulator, or carried a destination-register operand.
    #[error("intrinsic {mnemonic} has unexpected operand kinds")]
    IntrinsicOperands { mnemonic: String },

    /// An operand kind the expander has no materialization rule for.
    #[error("unknown operand kind for intrinsic {mnemonic}")]
    UnknownOperandKind { mnemonic: String },

    /// Result kind of an intrinsic declaration is not `void` or `any`.
    #[error("result kind of intrinsic {mnemonic} is not implemented")]
    IntrinsicResultKind { mnemonic: String },

    /// Variant lowering found no builtin encoding for a mnemonic.
    #[error("no builtin encoding for intrinsic {mnemonic}")]
    UnknownBuiltin { mnemonic: String },

    /// The 16-bit physical register index space ran out.
    #[error("register space exhausted in function {function}")]
    RegistersExhausted { function: String },

    /// Spill repair needed a scratch register from the 16-register encoding
    /// class and every one of them was already in use by the instruction.
    #[error("no scratch register available below the 16-register class in {function}")]
    NoScratchInClass { function: String },

    /// Spill repair found no scratch register in the low 256-register window.
    #[error("no scratch register available for spill repair in {function}")]
    NoScratchAvailable { function: String },

    /// Range repair found no contiguous block of scratch registers.
    #[error("no contiguous block of {count} scratch registers in {function}")]
    NoScratchBlock { function: String, count: usize },

    /// Register operands of a range instruction do not form a strictly
    /// increasing contiguous sequence and cannot be repaired.
    #[error("register sequence of range instruction #{index} in {function} is not continuous")]
    SequenceNotContinuous { function: String, index: usize },

    /// A register operand survived the pipeline without a physical index.
    #[error("invalid register in {function}: {detail}")]
    InvalidRegister { function: String, detail: String },

    /// A referenced jump target is missing or multiply defined.
    #[error("label {label} referenced in {function} is not defined exactly once")]
    InvalidLabel { function: String, label: String },
}

/// Result type alias for lowering operations.
pub type CompileResult<T> = Result<T, CompileError>;
