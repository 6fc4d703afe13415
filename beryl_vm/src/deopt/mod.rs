//! Deoptimization support.
//!
//! When compiled code bails out to the interpreter, every scalarized
//! value live at the bail-out point must reappear as the boxed state the
//! interpreter expects. The snapshot captures field bytes and null state
//! at the deopt point; the materializer rehydrates boxed instances from
//! it without running any constructor, reusing existing identities where
//! the snapshot proves them current.

mod materializer;
mod snapshot;
mod stats;

pub use materializer::{DeoptMaterializer, Materialized};
pub use snapshot::{DeoptSnapshot, SnapshotValue};
pub use stats::{DeoptStats, DeoptStatsSnapshot};

// =============================================================================
// Deopt Reason
// =============================================================================

/// Why compiled code deoptimized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DeoptReason {
    /// Type guard failed - value had unexpected type.
    TypeGuard = 0,
    /// Null observed where compiled code assumed non-null.
    NullCheck = 1,
    /// Array bounds check failed.
    BoundsCheck = 2,
    /// Uncommon trap - rarely-taken path.
    UncommonTrap = 3,
    /// Call-site scalarization assumption invalidated by a new target.
    ConventionMismatch = 4,
    /// Explicit deopt request (debugging).
    Explicit = 5,
}

impl DeoptReason {
    /// Convert from raw u8 value.
    #[inline]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::TypeGuard),
            1 => Some(Self::NullCheck),
            2 => Some(Self::BoundsCheck),
            3 => Some(Self::UncommonTrap),
            4 => Some(Self::ConventionMismatch),
            5 => Some(Self::Explicit),
            _ => None,
        }
    }
}

impl std::fmt::Display for DeoptReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::TypeGuard => "type guard",
            Self::NullCheck => "null check",
            Self::BoundsCheck => "bounds check",
            Self::UncommonTrap => "uncommon trap",
            Self::ConventionMismatch => "convention mismatch",
            Self::Explicit => "explicit",
        };
        write!(f, "{}", name)
    }
}

// =============================================================================
// Tests
// =============================================================================
