//! Materialization: rebuilding boxed state from a snapshot.
//!
//! Rules:
//! - A flat value the compiler proved identical to a heap-resident
//!   object reuses that object's identity instead of allocating a
//!   duplicate; the proof is re-checked against the live object's bytes,
//!   so a stale origin falls back to a fresh allocation.
//! - A null-marked value materializes as null, never as a zero-filled
//!   default instance.
//! - Rehydration is raw byte adoption; no constructor or initializer
//!   runs.
//! - A trap inside a private-buffer window rolls the buffer back; a
//!   half-patched buffer never escapes.

use super::snapshot::{DeoptSnapshot, SnapshotValue};
use super::stats::DeoptStats;
use crate::context::EngineContext;
use beryl_core::{BerylResult, ObjId, Scalar};
use beryl_runtime::{BufferHandle, FlatPayload};

/// One interpreter-visible value produced by materialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Materialized {
    /// A primitive word.
    Primitive(Scalar),
    /// A reference, possibly null.
    Ref(Option<ObjId>),
}

/// Rebuilds interpreter state from deopt snapshots.
pub struct DeoptMaterializer<'e> {
    ctx: &'e EngineContext,
    stats: DeoptStats,
}

impl<'e> DeoptMaterializer<'e> {
    /// Create a materializer over the shared engine.
    pub fn new(ctx: &'e EngineContext) -> Self {
        Self {
            ctx,
            stats: DeoptStats::new(),
        }
    }

    /// Materialization statistics.
    #[inline]
    pub fn stats(&self) -> &DeoptStats {
        &self.stats
    }

    /// Consume a snapshot, producing one value per live slot.
    pub fn materialize(&self, snapshot: DeoptSnapshot) -> BerylResult<Vec<Materialized>> {
        self.stats.record_deopt();
        let mut out = Vec::with_capacity(snapshot.len());
        for slot in snapshot.slots {
            out.push(self.materialize_slot(slot)?);
        }
        Ok(out)
    }

    fn materialize_slot(&self, slot: SnapshotValue) -> BerylResult<Materialized> {
        match slot {
            SnapshotValue::Primitive(scalar) => Ok(Materialized::Primitive(scalar)),
            SnapshotValue::Boxed(reference) => Ok(Materialized::Ref(reference)),
            SnapshotValue::Flat { null: true, .. } => {
                self.stats.record_null_materialized();
                Ok(Materialized::Ref(None))
            }
            SnapshotValue::Flat {
                type_id,
                bytes,
                origin,
                ..
            } => {
                if let Some(id) = origin {
                    if let Some(existing) = self.ctx.handles().get(id) {
                        if existing.type_id() == type_id
                            && existing.payload().bytes() == &bytes[..]
                        {
                            self.stats.record_identity_reused();
                            return Ok(Materialized::Ref(Some(id)));
                        }
                    }
                }
                let desc = self.ctx.registry().descriptor(type_id)?;
                // Raw rehydration: the snapshot bytes already carry every
                // field and marker; adopting them runs no constructor.
                let payload = FlatPayload::from_bytes(desc, bytes)?;
                let buffered = self.ctx.coordinator().buffer(&payload, None)?;
                self.stats.record_materialized();
                Ok(Materialized::Ref(Some(buffered.identity())))
            }
        }
    }

    /// Roll back a private buffer a trap interrupted.
    pub fn rollback_private(&self, handle: BufferHandle) {
        self.ctx.coordinator().abandon_private(handle);
        self.stats.record_buffer_rolled_back();
    }
}

// =============================================================================
// Tests
// =============================================================================
