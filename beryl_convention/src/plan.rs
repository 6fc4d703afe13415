//! Call-site plans.
//!
//! A plan records, per argument and for the return value, whether the
//! value travels scalarized (one slot per data leaf, plus a marker slot
//! for nullable parameters) or boxed (one reference slot). Plans are
//! immutable once published; a site swaps in a whole new version when
//! resolution state changes.

use crate::registers::{FloatReg, IntReg};
use beryl_core::LeafKind;
use beryl_layout::ValueTypeId;
use smallvec::SmallVec;

// =============================================================================
// Assignments
// =============================================================================

/// Where one transported word lives during the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Assignment {
    /// An integer argument register.
    Int(IntReg),
    /// A float argument register.
    Float(FloatReg),
    /// A slot in the stack-extension area.
    ///
    /// Extension slots are indexed from zero within their own area; the
    /// frame's saved link lives outside it, so no slot index can alias
    /// the link regardless of how far the extension grows.
    Stack(u16),
}

impl std::fmt::Display for Assignment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Assignment::Int(reg) => write!(f, "{}", reg),
            Assignment::Float(reg) => write!(f, "{}", reg),
            Assignment::Stack(slot) => write!(f, "sp[{}]", slot),
        }
    }
}

/// Metadata for the prologue's copy-back of spilled leaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackExtension {
    /// Number of extension slots the plan uses.
    pub slot_count: u16,
}

// =============================================================================
// Argument & Return Slots
// =============================================================================

/// How one argument travels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgSlot {
    /// A primitive leaf in a single slot.
    Primitive(LeafKind, Assignment),
    /// A value passed one slot per data leaf, descriptor order, nested
    /// leaves expanded in place.
    Scalarized {
        type_id: ValueTypeId,
        assignments: SmallVec<[Assignment; 8]>,
        /// Slots carrying nested null markers (one per nullable nested
        /// level, descriptor order). Without these, nested null state
        /// would not survive the call.
        nested_markers: SmallVec<[Assignment; 4]>,
        /// Slot carrying the null marker for nullable parameters.
        null_marker: Option<Assignment>,
    },
    /// A value passed as one reference slot.
    Boxed(ValueTypeId, Assignment),
}

impl ArgSlot {
    /// Whether this argument travels scalarized.
    #[inline]
    pub fn is_scalarized(&self) -> bool {
        matches!(self, ArgSlot::Scalarized { .. })
    }
}

/// How the return value travels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetSlot {
    /// No return value.
    Void,
    /// A primitive leaf.
    Primitive(LeafKind, Assignment),
    /// Scalarized return, one slot per leaf.
    Scalarized {
        type_id: ValueTypeId,
        assignments: SmallVec<[Assignment; 8]>,
        nested_markers: SmallVec<[Assignment; 4]>,
        null_marker: Option<Assignment>,
    },
    /// Boxed return.
    Boxed(ValueTypeId, Assignment),
}

// =============================================================================
// Mismatch Adapters
// =============================================================================

/// Boundary work installed when caller and callee disagree on
/// scalarization. The mismatch is a performance event, never a
/// correctness one: the adapter converts and the call proceeds boxed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterKind {
    /// Scalarized values buffer into boxes at the boundary.
    BufferAtBoundary,
    /// Boxed values unpack into leaves at the boundary.
    UnpackAtBoundary,
    /// Both directions (mixed disagreement across positions).
    Bidirectional,
}

impl AdapterKind {
    /// Combine the adapter needs of two argument positions.
    pub fn merge(a: Option<AdapterKind>, b: Option<AdapterKind>) -> Option<AdapterKind> {
        match (a, b) {
            (None, x) | (x, None) => x,
            (Some(x), Some(y)) if x == y => Some(x),
            _ => Some(AdapterKind::Bidirectional),
        }
    }
}

// =============================================================================
// Call Site Plan
// =============================================================================

/// One immutable version of a call site's convention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallSitePlan {
    /// Per-argument transport.
    pub args: Vec<ArgSlot>,
    /// Return transport.
    pub ret: RetSlot,
    /// Total stack-extension slots used by arguments.
    pub extension: Option<StackExtension>,
    /// Boundary adapter, present on resolution mismatch.
    pub adapter: Option<AdapterKind>,
    /// Plan version, bumped on every rebuild of the owning site.
    pub version: u32,
}

impl CallSitePlan {
    /// Whether any argument or the return travels scalarized.
    pub fn any_scalarized(&self) -> bool {
        self.args.iter().any(ArgSlot::is_scalarized)
            || matches!(self.ret, RetSlot::Scalarized { .. })
    }

    /// Whether two plans agree on transport layout for every position.
    ///
    /// Version and adapter are excluded: agreement is about where words
    /// travel, which is what all targets of a virtual site must share.
    pub fn layout_agrees(&self, other: &CallSitePlan) -> bool {
        self.args == other.args && self.ret == other.ret && self.extension == other.extension
    }
}

// =============================================================================
// Tests
// =============================================================================
