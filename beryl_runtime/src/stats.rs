//! Runtime access and buffering statistics.

use std::sync::atomic::{AtomicU64, Ordering};

// =============================================================================
// Access Stats
// =============================================================================

/// Counters for the flat-slot copy protocol.
#[derive(Debug, Default)]
pub struct AccessStats {
    word_reads: AtomicU64,
    seqlock_reads: AtomicU64,
    seqlock_writes: AtomicU64,
    seqlock_retries: AtomicU64,
}

impl AccessStats {
    /// Create zeroed stats.
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn record_word_read(&self) {
        self.word_reads.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_seqlock_read(&self) {
        self.seqlock_reads.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_seqlock_write(&self) {
        self.seqlock_writes.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_seqlock_retry(&self) {
        self.seqlock_retries.fetch_add(1, Ordering::Relaxed);
    }

    /// Take a point-in-time snapshot.
    pub fn snapshot(&self) -> AccessStatsSnapshot {
        AccessStatsSnapshot {
            word_reads: self.word_reads.load(Ordering::Relaxed),
            seqlock_reads: self.seqlock_reads.load(Ordering::Relaxed),
            seqlock_writes: self.seqlock_writes.load(Ordering::Relaxed),
            seqlock_retries: self.seqlock_retries.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of [`AccessStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessStatsSnapshot {
    pub word_reads: u64,
    pub seqlock_reads: u64,
    pub seqlock_writes: u64,
    pub seqlock_retries: u64,
}

// =============================================================================
// Buffer Stats
// =============================================================================

/// Counters for buffering activity.
#[derive(Debug, Default)]
pub struct BufferStats {
    allocated: AtomicU64,
    reuse_hits: AtomicU64,
    private_begun: AtomicU64,
    private_finished: AtomicU64,
    private_abandoned: AtomicU64,
}

impl BufferStats {
    /// Create zeroed stats.
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn record_allocated(&self) {
        self.allocated.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_reuse_hit(&self) {
        self.reuse_hits.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_private_begun(&self) {
        self.private_begun.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_private_finished(&self) {
        self.private_finished.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_private_abandoned(&self) {
        self.private_abandoned.fetch_add(1, Ordering::Relaxed);
    }

    /// Take a point-in-time snapshot.
    pub fn snapshot(&self) -> BufferStatsSnapshot {
        BufferStatsSnapshot {
            allocated: self.allocated.load(Ordering::Relaxed),
            reuse_hits: self.reuse_hits.load(Ordering::Relaxed),
            private_begun: self.private_begun.load(Ordering::Relaxed),
            private_finished: self.private_finished.load(Ordering::Relaxed),
            private_abandoned: self.private_abandoned.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of [`BufferStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferStatsSnapshot {
    pub allocated: u64,
    pub reuse_hits: u64,
    pub private_begun: u64,
    pub private_finished: u64,
    pub private_abandoned: u64,
}

// =============================================================================
// Tests
// =============================================================================
