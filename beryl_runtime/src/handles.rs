//! Handle table: relocation-stable identity for boxed values.
//!
//! Identity is a handle, never a raw address. The collector may move an
//! object between any two safepoint polls, so code that held a direct
//! reference across a poll must re-read it through the table; the test
//! harness exercises this by rebuilding the table's backing allocations
//! in place, which changes every address while preserving every handle.

use crate::boxed::BoxedValue;
use beryl_core::ObjId;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Process-wide table of live boxed instances.
pub struct HandleTable {
    slots: RwLock<FxHashMap<u64, Arc<BoxedValue>>>,
    /// Next handle to issue. `0` is reserved for the null reference.
    next: AtomicU64,
    /// Relocation epochs observed (diagnostics).
    relocations: AtomicU64,
}

impl HandleTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self {
            slots: RwLock::new(FxHashMap::default()),
            next: AtomicU64::new(1),
            relocations: AtomicU64::new(0),
        }
    }

    /// Allocate identity for a boxed value.
    pub fn allocate(&self, value: BoxedValue) -> ObjId {
        let id = ObjId(self.next.fetch_add(1, Ordering::Relaxed));
        self.slots.write().insert(id.raw(), Arc::new(value));
        id
    }

    /// Re-read a boxed value through its handle.
    ///
    /// This is the only valid way to reach an object after a safepoint
    /// poll; a cached `Arc` from before the poll may point at the
    /// object's pre-relocation copy.
    pub fn get(&self, id: ObjId) -> Option<Arc<BoxedValue>> {
        self.slots.read().get(&id.raw()).cloned()
    }

    /// Number of live handles.
    pub fn len(&self) -> usize {
        self.slots.read().len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Relocation epochs performed so far.
    pub fn relocation_count(&self) -> u64 {
        self.relocations.load(Ordering::Relaxed)
    }

    /// Simulate a moving collection: every object is re-allocated, every
    /// handle stays valid, every pre-relocation address goes stale.
    pub fn relocate_all(&self) {
        let mut slots = self.slots.write();
        for value in slots.values_mut() {
            let moved = (**value).clone();
            *value = Arc::new(moved);
        }
        self.relocations.fetch_add(1, Ordering::Relaxed);
    }
}

impl Default for HandleTable {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================
