//! Buffering: identity on demand for flat values.
//!
//! A flat value acquires identity ("buffers") when the program needs an
//! object: a store into a reference array, a pass through a supertyped
//! signature, a reflective invocation. Buffering is dominance-aware: when
//! the caller can prove an equal value was already buffered on a path
//! that dominates the current use, the prior instance is reused instead
//! of allocating again. The proof is threaded explicitly as a
//! [`BufferedInstance`] record; reuse is refused whenever the snapshot no
//! longer matches the bytes being buffered, so a stale proof can never
//! resurrect mutated state.
//!
//! The private buffer is the one sanctioned mutation window: `begin`
//! yields an owned handle, fields are patched one by one, and `finish`
//! publishes the result as an immutable boxed instance. Publication
//! fences apply at finish, not per field write; the handle is owned, so
//! no other thread can observe the window. `abandon` rolls the window
//! back without leaking anything.

use crate::atomic::publish_fence;
use crate::boxed::BoxedValue;
use crate::handles::HandleTable;
use crate::payload::FlatPayload;
use crate::stats::BufferStats;
use beryl_core::{BerylResult, ObjId, Scalar};
use beryl_layout::{DescriptorSource, FieldPath, ValueTypeDescriptor, ValueTypeId, null_marker};
use std::sync::Arc;

// =============================================================================
// Buffered Instances
// =============================================================================

/// Record of one completed buffering: which identity was allocated and
/// the byte-exact field snapshot it was allocated from.
#[derive(Debug, Clone)]
pub struct BufferedInstance {
    identity: ObjId,
    type_id: ValueTypeId,
    snapshot: Box<[u8]>,
}

impl BufferedInstance {
    /// The allocated identity.
    #[inline]
    pub fn identity(&self) -> ObjId {
        self.identity
    }

    /// The buffered type.
    #[inline]
    pub fn type_id(&self) -> ValueTypeId {
        self.type_id
    }

    /// The field snapshot taken at buffering time.
    #[inline]
    pub fn snapshot(&self) -> &[u8] {
        &self.snapshot
    }
}

// =============================================================================
// Coordinator
// =============================================================================

/// Allocates identity for flat values, reusing dominating allocations.
pub struct BufferingCoordinator {
    handles: Arc<HandleTable>,
    stats: BufferStats,
}

impl BufferingCoordinator {
    /// Create a coordinator over a handle table.
    pub fn new(handles: Arc<HandleTable>) -> Self {
        Self {
            handles,
            stats: BufferStats::new(),
        }
    }

    /// The coordinator's handle table.
    #[inline]
    pub fn handles(&self) -> &Arc<HandleTable> {
        &self.handles
    }

    /// Buffering statistics.
    #[inline]
    pub fn stats(&self) -> &BufferStats {
        &self.stats
    }

    /// Give `payload` identity.
    ///
    /// When `dominating` carries a prior buffering whose type and
    /// snapshot still match the payload byte-for-byte, that identity is
    /// reused and no allocation happens. A mismatched or dangling prior
    /// is ignored: control flow that cannot prove dominance simply
    /// passes `None` and pays for a fresh allocation.
    pub fn buffer(
        &self,
        payload: &FlatPayload,
        dominating: Option<&BufferedInstance>,
    ) -> BerylResult<BufferedInstance> {
        if let Some(prior) = dominating {
            if prior.type_id == payload.descriptor().id
                && prior.snapshot[..] == *payload.bytes()
                && self.handles.get(prior.identity).is_some()
            {
                self.stats.record_reuse_hit();
                return Ok(prior.clone());
            }
        }

        let identity = self.handles.allocate(BoxedValue::new(payload.clone()));
        self.stats.record_allocated();
        Ok(BufferedInstance {
            identity,
            type_id: payload.descriptor().id,
            snapshot: payload.snapshot(),
        })
    }

    /// Open a private buffer for `desc`, starting at the default value.
    pub fn begin_private(
        &self,
        source: &dyn DescriptorSource,
        desc: Arc<ValueTypeDescriptor>,
    ) -> BerylResult<BufferHandle> {
        self.stats.record_private_begun();
        let mut payload = FlatPayload::zeroed(Arc::clone(&desc));
        null_marker::mark_all_present(source, &desc, payload.bytes_mut())?;
        Ok(BufferHandle { payload })
    }

    /// Close a private buffer, publishing it as an immutable instance.
    ///
    /// The publication fence happens here, once, not at each field patch.
    pub fn finish_private(&self, handle: BufferHandle) -> BerylResult<BufferedInstance> {
        publish_fence();
        let snapshot = handle.payload.snapshot();
        let type_id = handle.payload.descriptor().id;
        let identity = self.handles.allocate(BoxedValue::new(handle.payload));
        self.stats.record_private_finished();
        Ok(BufferedInstance {
            identity,
            type_id,
            snapshot,
        })
    }

    /// Roll a private buffer back.
    ///
    /// Nothing was allocated and nothing escapes: the pre-buffer state is
    /// exactly restored by dropping the handle.
    pub fn abandon_private(&self, handle: BufferHandle) {
        drop(handle);
        self.stats.record_private_abandoned();
    }
}

// =============================================================================
// Private Buffer Handle
// =============================================================================

/// An open private buffer.
///
/// The handle owns its payload; confinement is by ownership, not by
/// locking. Until it is passed to `finish_private` the value has no
/// identity and no other thread can reach it.
#[derive(Debug)]
pub struct BufferHandle {
    payload: FlatPayload,
}

impl BufferHandle {
    /// Patch a data leaf (descriptor leaf order).
    pub fn set_leaf(&mut self, index: usize, value: Scalar) -> BerylResult<()> {
        self.payload.write_leaf(index, value)
    }

    /// Patch a field through a path.
    pub fn set_field(
        &mut self,
        source: &dyn DescriptorSource,
        path: &FieldPath,
        value: Scalar,
    ) -> BerylResult<()> {
        self.payload.write(source, path, value)
    }

    /// The buffer's descriptor.
    #[inline]
    pub fn descriptor(&self) -> &Arc<ValueTypeDescriptor> {
        self.payload.descriptor()
    }

    /// Read back the in-progress payload (the owning thread only; the
    /// handle is not shareable).
    #[inline]
    pub fn payload(&self) -> &FlatPayload {
        &self.payload
    }
}

// =============================================================================
// Tests
// =============================================================================
