// This module implements the per-function virtual register arena. Virtual registers
// are opaque identities: instructions and the allocator share the same record through
// a stable integer handle rather than aliased references, so redirecting an operand
// during spill repair is a write to one arena slot. Physical indices start unassigned
// and are bound exactly once by the register allocator. In debug builds each record
// can carry the backtrace of the temporary acquisition that produced it, which is
// used to catch double-acquisition bugs and to annotate invalid-register reports.

//! Virtual register handles and their backing arena.

use std::fmt;

/// Handle of a virtual register inside a [`RegisterPool`].
///
/// Identity, not value: two handles compare equal only if they refer to the
/// same register record.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct VReg(u32);

impl fmt::Debug for VReg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

struct RegRecord {
    /// Physical index, assigned by the allocator. `None` until then.
    index: Option<u32>,
    /// Where the register was handed out as a temporary, debug builds only.
    #[cfg(debug_assertions)]
    trace: Option<std::backtrace::Backtrace>,
}

/// Arena of virtual register records for one function.
#[derive(Default)]
pub struct RegisterPool {
    records: Vec<RegRecord>,
}

impl RegisterPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a fresh virtual register with no physical index.
    pub fn alloc(&mut self) -> VReg {
        let handle = VReg(self.records.len() as u32);
        self.records.push(RegRecord {
            index: None,
            #[cfg(debug_assertions)]
            trace: None,
        });
        handle
    }

    /// Number of registers ever created in this function.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Physical index of `reg`, if the allocator has assigned one.
    pub fn index(&self, reg: VReg) -> Option<u32> {
        self.records[reg.0 as usize].index
    }

    /// Bind a physical index. The allocator calls this exactly once per
    /// register; spill repair redirects operands instead of rebinding.
    pub fn set_index(&mut self, reg: VReg, index: u32) {
        self.records[reg.0 as usize].index = Some(index);
    }

    /// Record that `reg` was handed out as a temporary.
    ///
    /// Debug builds capture a backtrace and panic on double acquisition,
    /// which would otherwise surface much later as register corruption.
    pub(crate) fn mark_acquired(&mut self, reg: VReg) {
        #[cfg(debug_assertions)]
        {
            let record = &mut self.records[reg.0 as usize];
            assert!(
                record.trace.is_none(),
                "temporary register {reg:?} acquired twice"
            );
            record.trace = Some(std::backtrace::Backtrace::capture());
        }
        #[cfg(not(debug_assertions))]
        let _ = reg;
    }

    /// Record that `reg` went back to the free pool.
    pub(crate) fn mark_released(&mut self, reg: VReg) {
        #[cfg(debug_assertions)]
        {
            self.records[reg.0 as usize].trace = None;
        }
        #[cfg(not(debug_assertions))]
        let _ = reg;
    }

    /// Render the acquisition backtrace of `reg`, when one was captured.
    pub fn trace_of(&self, reg: VReg) -> Option<String> {
        #[cfg(debug_assertions)]
        {
            return self.records[reg.0 as usize]
                .trace
                .as_ref()
                .map(|t| t.to_string());
        }
        #[cfg(not(debug_assertions))]
        {
            let _ = reg;
            None
        }
    }
}
