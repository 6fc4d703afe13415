//! Tear-free access to flat slots.
//!
//! Specified as a copy protocol rather than "insert a barrier": a reader
//! copies the whole payload out, a writer copies the whole payload in,
//! and the sequence counter decides whether a read raced a write. Because
//! the protocol is the only way any tier touches a shared flat slot, an
//! optimizer that reorders surrounding code cannot break it; there is no
//! per-tier barrier placement to get wrong.
//!
//! Two modes, chosen from the descriptor's atomicity class:
//!
//! - `NaturallyAtomic`: the payload (null marker included) fits one
//!   aligned machine word; a single atomic load/store is the protocol.
//! - `RequiresBarrier`: a per-slot sequence lock. Writers claim the slot
//!   by bumping the sequence to odd, copy, then release to even. Readers
//!   retry until they observe the same even sequence on both sides of
//!   their copy: the copy then fully preceded or fully followed every
//!   write.
//!
//! The payload bytes are `AtomicU8`s accessed relaxed; the sequence
//! counter carries the acquire/release edges. A reader can observe mixed
//! bytes mid-copy, but never *return* them.

use crate::stats::AccessStats;
use beryl_layout::{AtomicClass, ValueTypeDescriptor};
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering, fence};

// =============================================================================
// Publication Fences
// =============================================================================

/// Fence before publishing a freshly initialized flat-containing
/// structure through a shared reference.
#[inline]
pub fn publish_fence() {
    fence(Ordering::Release);
}

/// Fence after acquiring a published structure, before reading elements.
#[inline]
pub fn acquire_fence() {
    fence(Ordering::Acquire);
}

// =============================================================================
// Atomic Slot
// =============================================================================

enum Mode {
    /// Payload packed into one atomic word.
    Word { cell: AtomicU64, size: usize },
    /// Sequence-locked multi-word payload.
    SeqLock {
        seq: AtomicU64,
        data: Box<[AtomicU8]>,
    },
}

/// One shared flat slot (a field or an array element).
pub struct AtomicSlot {
    mode: Mode,
}

impl AtomicSlot {
    /// Create a zeroed slot for instances of `desc`.
    ///
    /// # Panics
    /// Panics if the descriptor is `NeverFlat`; such types have no flat
    /// slots, the caller must fall back to boxed references.
    pub fn new(desc: &ValueTypeDescriptor) -> Self {
        let size = desc.payload_size as usize;
        let mode = match desc.atomic_class {
            AtomicClass::NaturallyAtomic => Mode::Word {
                cell: AtomicU64::new(0),
                size,
            },
            AtomicClass::RequiresBarrier => Mode::SeqLock {
                seq: AtomicU64::new(0),
                data: (0..size).map(|_| AtomicU8::new(0)).collect(),
            },
            AtomicClass::NeverFlat => {
                panic!("no flat slot for never-flat type {}", desc.name)
            }
        };
        Self { mode }
    }

    /// Create a slot holding `bytes`.
    pub fn with_bytes(desc: &ValueTypeDescriptor, bytes: &[u8], stats: &AccessStats) -> Self {
        let slot = Self::new(desc);
        slot.write(bytes, stats);
        slot
    }

    /// Copy the payload out, tear-free.
    pub fn read(&self, stats: &AccessStats) -> Box<[u8]> {
        match &self.mode {
            Mode::Word { cell, size } => {
                stats.record_word_read();
                let word = cell.load(Ordering::Acquire);
                word.to_le_bytes()[..*size].into()
            }
            Mode::SeqLock { seq, data } => {
                stats.record_seqlock_read();
                loop {
                    let before = seq.load(Ordering::Acquire);
                    if before & 1 == 1 {
                        stats.record_seqlock_retry();
                        std::hint::spin_loop();
                        continue;
                    }
                    let copy: Box<[u8]> =
                        data.iter().map(|b| b.load(Ordering::Relaxed)).collect();
                    fence(Ordering::Acquire);
                    let after = seq.load(Ordering::Relaxed);
                    if before == after {
                        return copy;
                    }
                    stats.record_seqlock_retry();
                    std::hint::spin_loop();
                }
            }
        }
    }

    /// Copy a payload in, tear-free.
    ///
    /// # Panics
    /// Panics if `bytes` does not match the slot's payload size; sizes
    /// come from one shared descriptor, so a mismatch is an engine bug.
    pub fn write(&self, bytes: &[u8], stats: &AccessStats) {
        match &self.mode {
            Mode::Word { cell, size } => {
                assert_eq!(bytes.len(), *size, "payload size mismatch");
                let mut word = [0u8; 8];
                word[..bytes.len()].copy_from_slice(bytes);
                cell.store(u64::from_le_bytes(word), Ordering::Release);
            }
            Mode::SeqLock { seq, data } => {
                assert_eq!(bytes.len(), data.len(), "payload size mismatch");
                stats.record_seqlock_write();
                // Claim the slot: even -> odd. Concurrent writers
                // serialize on this transition.
                let mut current = seq.load(Ordering::Relaxed);
                loop {
                    if current & 1 == 1 {
                        std::hint::spin_loop();
                        current = seq.load(Ordering::Relaxed);
                        continue;
                    }
                    match seq.compare_exchange_weak(
                        current,
                        current + 1,
                        Ordering::AcqRel,
                        Ordering::Relaxed,
                    ) {
                        Ok(_) => break,
                        Err(observed) => current = observed,
                    }
                }
                for (cell, &byte) in data.iter().zip(bytes) {
                    cell.store(byte, Ordering::Relaxed);
                }
                // Release: the byte stores happen-before the even sequence.
                seq.store(current + 2, Ordering::Release);
            }
        }
    }

    /// Payload size this slot transports.
    pub fn payload_size(&self) -> usize {
        match &self.mode {
            Mode::Word { size, .. } => *size,
            Mode::SeqLock { data, .. } => data.len(),
        }
    }
}

impl std::fmt::Debug for AtomicSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.mode {
            Mode::Word { size, .. } => write!(f, "AtomicSlot::Word({} bytes)", size),
            Mode::SeqLock { data, .. } => write!(f, "AtomicSlot::SeqLock({} bytes)", data.len()),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
