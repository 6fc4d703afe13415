//! Safepoint polls and simulated relocation.
//!
//! The engine never caches a raw address across a poll: object access
//! goes through the handle table, and a poll may relocate every object.
//! In-flight multi-step operations are written so that shared state is
//! either fully pre- or fully post-operation at every poll; private
//! buffers are invisible to other threads by ownership, so a poll inside
//! the window observes nothing half-built.

use beryl_runtime::HandleTable;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Safepoint coordination for one engine instance.
pub struct Safepoint {
    handles: Arc<HandleTable>,
    polls: AtomicU64,
    relocation_pending: AtomicBool,
}

impl Safepoint {
    /// Create a safepoint tied to a handle table.
    pub fn new(handles: Arc<HandleTable>) -> Self {
        Self {
            handles,
            polls: AtomicU64::new(0),
            relocation_pending: AtomicBool::new(false),
        }
    }

    /// Arm the next poll to relocate every object.
    pub fn request_relocation(&self) {
        self.relocation_pending.store(true, Ordering::Release);
    }

    /// Poll. If a relocation was requested, it happens here, between two
    /// well-formed engine states.
    pub fn poll(&self) {
        self.polls.fetch_add(1, Ordering::Relaxed);
        if self.relocation_pending.swap(false, Ordering::AcqRel) {
            self.handles.relocate_all();
        }
    }

    /// Number of polls taken.
    pub fn poll_count(&self) -> u64 {
        self.polls.load(Ordering::Relaxed)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_poll_without_request_is_cheap() {
        let safepoint = Safepoint::new(Arc::new(HandleTable::new()));
        safepoint.poll();
        safepoint.poll();
        assert_eq!(safepoint.poll_count(), 2);
        assert_eq!(safepoint.handles.relocation_count(), 0);
    }

    #[test]
    fn test_requested_relocation_fires_once() {
        let handles = Arc::new(HandleTable::new());
        let safepoint = Safepoint::new(Arc::clone(&handles));
        safepoint.request_relocation();
        safepoint.poll();
        safepoint.poll();
        assert_eq!(handles.relocation_count(), 1);
    }
}
