//! Planned value-type layouts.
//!
//! A `ValueTypeDescriptor` is the single source of truth for how one value
//! type is represented flat: field offsets, payload size, reference
//! census, atomicity class, and null-marker placement. It is computed once
//! by the planner, published through the registry, and never mutated.

use beryl_core::LeafKind;
use beryl_core::intern::InternedString;

// =============================================================================
// Type ID
// =============================================================================

/// Unique identifier for a value type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct ValueTypeId(pub u32);

impl ValueTypeId {
    /// Get the raw id.
    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for ValueTypeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "t{}", self.0)
    }
}

// =============================================================================
// Atomicity Class
// =============================================================================

/// How an access to a flat instance of the type must be bracketed.
///
/// The classification is a per-type fact: every tier reads it from the
/// same descriptor, so the tearing-prevention strategy cannot diverge
/// between interpreter and compiled code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AtomicClass {
    /// Payload (including any null marker) fits one naturally aligned
    /// machine word; a single aligned load/store is already atomic.
    NaturallyAtomic,
    /// Multi-word payload, or a payload mixed with a null marker; reads
    /// and writes go through the copy protocol.
    RequiresBarrier,
    /// The type never flattens; instances are always boxed references.
    NeverFlat,
}

impl AtomicClass {
    /// Whether plain aligned loads/stores suffice.
    #[inline]
    pub const fn is_word_atomic(self) -> bool {
        matches!(self, AtomicClass::NaturallyAtomic)
    }
}

// =============================================================================
// Field Slots
// =============================================================================

/// Planned representation of one declared field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotKind {
    /// Primitive leaf at the slot offset.
    Leaf(LeafKind),
    /// Nested value flattened in place. `null_marker` is the absolute
    /// offset (within the enclosing payload) of the nested level's
    /// marker byte, present iff the field is nullable.
    Flat {
        id: ValueTypeId,
        null_marker: Option<u32>,
    },
    /// Nested value kept as a reference: either its type never flattens
    /// or its flattened footprint exceeded the configured thresholds.
    Boxed { id: ValueTypeId },
}

/// One planned field: name, byte offset, representation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSlot {
    /// Field name (interned).
    pub name: InternedString,
    /// Byte offset within the payload.
    pub offset: u32,
    /// Planned representation.
    pub kind: SlotKind,
}

/// One data leaf in the fully flattened view, in descriptor order.
///
/// This is the table the calling convention traverses: nested flat fields
/// are already expanded in place, null-marker bytes excluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeafSlot {
    /// Byte offset within the payload.
    pub offset: u32,
    /// Leaf kind.
    pub kind: LeafKind,
}

// =============================================================================
// Descriptor
// =============================================================================

/// Immutable planned layout of one value type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueTypeDescriptor {
    /// The type's id.
    pub id: ValueTypeId,
    /// The type's name.
    pub name: InternedString,
    /// Planned fields in declaration order.
    pub fields: Vec<FieldSlot>,
    /// Total payload size in bytes, null marker included, padded to
    /// `alignment`.
    pub payload_size: u32,
    /// Payload alignment (max leaf alignment, at least 1).
    pub alignment: u32,
    /// Number of reference leaves after full recursive flattening.
    pub oop_count: u32,
    /// Whether instances may be represented flat.
    pub flattenable: bool,
    /// Access-bracketing class.
    pub atomic_class: AtomicClass,
    /// Offset of this type's own null-marker byte, present iff the type
    /// is used in a nullable-flat context. Reuses a padding hole when one
    /// exists, else appended past the fields.
    pub null_marker: Option<u32>,
    /// Fully flattened data-leaf table in descriptor order.
    pub leaves: Vec<LeafSlot>,
    /// Offsets of every nullable nested level's marker byte, at any
    /// depth, in descriptor order. The type's own marker is not listed.
    /// A scalarized transport must carry these alongside the data
    /// leaves or nested null state would not survive a call.
    pub marker_slots: Vec<u32>,
}

impl ValueTypeDescriptor {
    /// Number of data leaves after full flattening.
    #[inline]
    pub fn leaf_count(&self) -> usize {
        self.leaves.len()
    }

    /// Whether this is the zero-field special case.
    #[inline]
    pub fn is_empty_type(&self) -> bool {
        self.fields.is_empty()
    }

    /// Look up a field index by name.
    pub fn field_index(&self, name: &InternedString) -> Option<usize> {
        self.fields.iter().position(|f| &f.name == name)
    }

    /// Get a field slot by index.
    #[inline]
    pub fn field(&self, index: usize) -> Option<&FieldSlot> {
        self.fields.get(index)
    }

    /// Whether the payload carries any reference leaf.
    #[inline]
    pub fn has_references(&self) -> bool {
        self.oop_count > 0
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use beryl_core::intern::intern;

    fn leaf_field(name: &str, offset: u32, kind: LeafKind) -> FieldSlot {
        FieldSlot {
            name: intern(name),
            offset,
            kind: SlotKind::Leaf(kind),
        }
    }

    #[test]
    fn test_value_type_id() {
        assert_eq!(ValueTypeId(7).raw(), 7);
        assert_eq!(format!("{}", ValueTypeId(7)), "t7");
    }

    #[test]
    fn test_atomic_class() {
        assert!(AtomicClass::NaturallyAtomic.is_word_atomic());
        assert!(!AtomicClass::RequiresBarrier.is_word_atomic());
        assert!(!AtomicClass::NeverFlat.is_word_atomic());
    }

    #[test]
    fn test_descriptor_field_lookup() {
        let desc = ValueTypeDescriptor {
            id: ValueTypeId(1),
            name: intern("Pair"),
            fields: vec![
                leaf_field("x", 0, LeafKind::I32),
                leaf_field("y", 4, LeafKind::I32),
            ],
            payload_size: 8,
            alignment: 4,
            oop_count: 0,
            flattenable: true,
            atomic_class: AtomicClass::NaturallyAtomic,
            null_marker: None,
            leaves: vec![
                LeafSlot { offset: 0, kind: LeafKind::I32 },
                LeafSlot { offset: 4, kind: LeafKind::I32 },
            ],
            marker_slots: vec![],
        };

        assert_eq!(desc.field_index(&intern("y")), Some(1));
        assert_eq!(desc.field_index(&intern("z")), None);
        assert_eq!(desc.leaf_count(), 2);
        assert!(!desc.is_empty_type());
        assert!(!desc.has_references());
    }
}
