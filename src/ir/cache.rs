// This module tracks the reserved cache registers holding well-known constant values
// (undefined, true, false, the hole sentinel, null, the global object, NaN, Infinity
// and the lexical environment). The front end materializes these lazily; only the ones
// actually requested are flagged as needed, and the register allocator assigns indices
// to exactly that subset, after locals and temporaries, in the fixed enum order below.

//! Reserved registers for well-known constant values.

use super::pool::{RegisterPool, VReg};

/// Well-known constants that may be pinned into a reserved register.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CachedValue {
    Undefined,
    True,
    False,
    Hole,
    Null,
    Global,
    NaN,
    Infinity,
    LexEnv,
}

/// Allocation order for cache registers. The allocator walks this exact
/// sequence; changing it changes the emitted register numbering.
pub const CACHE_LIST: [CachedValue; 9] = [
    CachedValue::Undefined,
    CachedValue::True,
    CachedValue::False,
    CachedValue::Hole,
    CachedValue::Null,
    CachedValue::Global,
    CachedValue::NaN,
    CachedValue::Infinity,
    CachedValue::LexEnv,
];

/// Per-function cache register table. A slot is `None` until first requested.
#[derive(Default)]
pub struct RegCache {
    slots: [Option<VReg>; CACHE_LIST.len()],
}

impl RegCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot_of(which: CachedValue) -> usize {
        CACHE_LIST
            .iter()
            .position(|&c| c == which)
            .unwrap_or(CACHE_LIST.len() - 1)
    }

    /// Fetch the register pinned to `which`, creating it on first use.
    pub fn get(&mut self, pool: &mut RegisterPool, which: CachedValue) -> VReg {
        let slot = Self::slot_of(which);
        if let Some(reg) = self.slots[slot] {
            return reg;
        }
        let reg = pool.alloc();
        self.slots[slot] = Some(reg);
        reg
    }

    /// Registers that were actually requested, in allocation order.
    pub fn needed_in_order(&self) -> Vec<VReg> {
        self.slots.iter().filter_map(|s| *s).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lazily_created_and_stable() {
        let mut pool = RegisterPool::new();
        let mut cache = RegCache::new();
        let t = cache.get(&mut pool, CachedValue::True);
        let t2 = cache.get(&mut pool, CachedValue::True);
        assert_eq!(t, t2);
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn needed_follow_list_order() {
        let mut pool = RegisterPool::new();
        let mut cache = RegCache::new();
        let g = cache.get(&mut pool, CachedValue::Global);
        let u = cache.get(&mut pool, CachedValue::Undefined);
        // Undefined precedes Global in CACHE_LIST regardless of request order.
        assert_eq!(cache.needed_in_order(), vec![u, g]);
    }
}
