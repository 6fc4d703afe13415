//! Deoptimization statistics.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for deoptimization and materialization activity.
#[derive(Debug, Default)]
pub struct DeoptStats {
    deopts: AtomicU64,
    materialized: AtomicU64,
    identity_reused: AtomicU64,
    nulls_materialized: AtomicU64,
    buffers_rolled_back: AtomicU64,
}

impl DeoptStats {
    /// Create zeroed stats.
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn record_deopt(&self) {
        self.deopts.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_materialized(&self) {
        self.materialized.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_identity_reused(&self) {
        self.identity_reused.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_null_materialized(&self) {
        self.nulls_materialized.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_buffer_rolled_back(&self) {
        self.buffers_rolled_back.fetch_add(1, Ordering::Relaxed);
    }

    /// Take a point-in-time snapshot.
    pub fn snapshot(&self) -> DeoptStatsSnapshot {
        DeoptStatsSnapshot {
            deopts: self.deopts.load(Ordering::Relaxed),
            materialized: self.materialized.load(Ordering::Relaxed),
            identity_reused: self.identity_reused.load(Ordering::Relaxed),
            nulls_materialized: self.nulls_materialized.load(Ordering::Relaxed),
            buffers_rolled_back: self.buffers_rolled_back.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of [`DeoptStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeoptStatsSnapshot {
    pub deopts: u64,
    pub materialized: u64,
    pub identity_reused: u64,
    pub nulls_materialized: u64,
    pub buffers_rolled_back: u64,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_counting() {
        let stats = DeoptStats::new();
        stats.record_deopt();
        stats.record_materialized();
        stats.record_identity_reused();
        let snap = stats.snapshot();
        assert_eq!(snap.deopts, 1);
        assert_eq!(snap.materialized, 1);
        assert_eq!(snap.identity_reused, 1);
        assert_eq!(snap.buffers_rolled_back, 0);
    }
}
