//! bclower - Bytecode lowering for a register-based dynamic-language VM.
//!
//! The crate takes a per-function IR stream built by a front end (virtual
//! registers, synthetic intrinsic placeholders, unresolved labels) and turns
//! it into format-valid bytecode: intrinsics become real call sequences,
//! cache-eligible instructions receive inline-cache slots, the allocator
//! binds physical register indices and repairs format constraints with
//! spill/restore moves, and the debug pass annotates every instruction with
//! byte-accurate position spans.
//!
//! # Primary Usage
//!
//! ```ignore
//! use bclower::{CompilationSession, CompileOptions, IrFunction, ProgramBuilder};
//! use bclower::passes::lower_function;
//!
//! let session = CompilationSession::new(CompileOptions::default());
//!
//! // The front end fills `func` with instructions, locals and scopes.
//! let mut func = IrFunction::new("foo", 2);
//! lower_function(&mut func, &session)?;
//!
//! let mut builder = ProgramBuilder::new(&session);
//! builder.add_function(&func)?;
//! let program = builder.finish();
//! ```
//!
//! # Architecture
//!
//! - [`ir`] - IR model (instructions, formats, register arena, functions)
//! - [`passes`] - Lowering pipeline (intrinsics, inline cache, allocator, debug)
//! - [`session`] - Shared compilation context and intrinsic registry
//! - [`emit`] - Serializable output contract for the external assembler

pub mod emit;
pub mod error;
pub mod ir;
pub mod passes;
pub mod session;

pub use emit::{EmittedFunction, EmittedIns, Literal, Program, ProgramBuilder};
pub use error::{CompileError, CompileResult};
pub use ir::{Insn, IrFunction, Label, Op, Operand, RegisterPool, VReg};
pub use passes::lower_function;
pub use session::{CompilationSession, CompileOptions, SessionStats};
