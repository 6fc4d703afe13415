//! Deopt snapshots.
//!
//! A snapshot is recorded at the deopt point and consumed exactly once
//! by the materializer. Each slot captures one live local, argument, or
//! in-flight return value.

use super::DeoptReason;
use beryl_core::{ObjId, Scalar};
use beryl_layout::ValueTypeId;
use beryl_runtime::FlatPayload;
use smallvec::SmallVec;

/// One live value at the deopt point.
#[derive(Debug, Clone)]
pub enum SnapshotValue {
    /// A primitive word.
    Primitive(Scalar),
    /// An already heap-resident reference; its identity is the value.
    Boxed(Option<ObjId>),
    /// A scalarized value: byte-exact field state plus null-marker
    /// standing. `origin` names the heap object this value was loaded
    /// from, when the compiler could prove it was never mutated since.
    Flat {
        type_id: ValueTypeId,
        bytes: Box<[u8]>,
        null: bool,
        origin: Option<ObjId>,
    },
}

impl SnapshotValue {
    /// Capture a non-null flat value.
    pub fn flat(payload: &FlatPayload, origin: Option<ObjId>) -> Self {
        SnapshotValue::Flat {
            type_id: payload.descriptor().id,
            bytes: payload.snapshot(),
            null: false,
            origin,
        }
    }

    /// Capture a null-marked flat value.
    pub fn flat_null(type_id: ValueTypeId) -> Self {
        SnapshotValue::Flat {
            type_id,
            bytes: Box::default(),
            null: true,
            origin: None,
        }
    }
}

/// Everything the interpreter needs to take over at one deopt point.
#[derive(Debug, Clone)]
pub struct DeoptSnapshot {
    /// Why compiled code bailed out.
    pub reason: DeoptReason,
    /// Bytecode offset to resume at.
    pub bc_offset: u32,
    /// Live values in frame order.
    pub slots: SmallVec<[SnapshotValue; 8]>,
}

impl DeoptSnapshot {
    /// Create an empty snapshot.
    pub fn new(reason: DeoptReason, bc_offset: u32) -> Self {
        Self {
            reason,
            bc_offset,
            slots: SmallVec::new(),
        }
    }

    /// Record a live value.
    pub fn record(&mut self, value: SnapshotValue) {
        self.slots.push(value);
    }

    /// Number of live values.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether nothing is live.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

// =============================================================================
// Tests
// =============================================================================
