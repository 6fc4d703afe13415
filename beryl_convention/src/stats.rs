//! Calling-convention statistics.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for plan construction and invalidation.
#[derive(Debug, Default)]
pub struct ConventionStats {
    plans_built: AtomicU64,
    invalidations: AtomicU64,
    boxed_fallbacks: AtomicU64,
}

impl ConventionStats {
    /// Create zeroed stats.
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn record_plan_built(&self) {
        self.plans_built.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_invalidation(&self) {
        self.invalidations.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_boxed_fallback(&self) {
        self.boxed_fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    /// Take a point-in-time snapshot.
    pub fn snapshot(&self) -> ConventionStatsSnapshot {
        ConventionStatsSnapshot {
            plans_built: self.plans_built.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
            boxed_fallbacks: self.boxed_fallbacks.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of [`ConventionStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConventionStatsSnapshot {
    pub plans_built: u64,
    pub invalidations: u64,
    pub boxed_fallbacks: u64,
}

// =============================================================================
// Tests
// =============================================================================
