//! Value arrays: flat element storage with a boxed fallback.
//!
//! A flat array stores one payload per element, accessed through the
//! copy protocol so per-element atomicity holds even when the array
//! escapes through a racy handoff. Null-restricted arrays start at the
//! element type's default value and reject null stores at the write
//! site; nullable arrays carry the element type's null marker and start
//! all-null.
//!
//! Element types that never flatten fall back to an array of references,
//! which is also what an all-boxed implementation would produce; the two
//! variants must be observationally indistinguishable apart from
//! allocation counts.

use crate::atomic::AtomicSlot;
use crate::boxed::BoxedValue;
use crate::handles::HandleTable;
use crate::payload::FlatPayload;
use crate::stats::AccessStats;
use beryl_core::{BerylError, BerylResult, ObjId};
use beryl_layout::{AtomicClass, DescriptorSource, ValueTypeDescriptor, null_marker};
use parking_lot::RwLock;
use std::sync::Arc;

// =============================================================================
// Nullness
// =============================================================================

/// Element nullability of a value array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArrayNullness {
    /// Elements are never null; the array starts at the type's default.
    NullRestricted,
    /// Elements may be null; the array starts all-null.
    Nullable,
}

// =============================================================================
// Flat Arrays
// =============================================================================

/// An array of flat elements.
pub struct FlatArray {
    desc: Arc<ValueTypeDescriptor>,
    nullness: ArrayNullness,
    slots: Vec<AtomicSlot>,
}

impl FlatArray {
    /// Create a flat array of `len` elements.
    pub fn new(
        source: &dyn DescriptorSource,
        desc: Arc<ValueTypeDescriptor>,
        len: usize,
        nullness: ArrayNullness,
        stats: &AccessStats,
    ) -> BerylResult<Self> {
        if !desc.flattenable {
            return Err(BerylError::invalid(format!(
                "{} does not flatten; use a reference array",
                desc.name
            )));
        }
        if nullness == ArrayNullness::Nullable && desc.null_marker.is_none() {
            return Err(BerylError::invalid(format!(
                "nullable array of {} requires a null marker in its layout",
                desc.name
            )));
        }

        let slots = match nullness {
            ArrayNullness::Nullable => {
                // All-zero is logical null for every element.
                (0..len).map(|_| AtomicSlot::new(&desc)).collect()
            }
            ArrayNullness::NullRestricted => {
                // Default value: zero fields, every nullable level present.
                let mut default = FlatPayload::zeroed(Arc::clone(&desc));
                null_marker::mark_all_present(source, &desc, default.bytes_mut())?;
                (0..len)
                    .map(|_| AtomicSlot::with_bytes(&desc, default.bytes(), stats))
                    .collect()
            }
        };

        Ok(Self {
            desc,
            nullness,
            slots,
        })
    }

    /// Element count.
    #[inline]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether the array has no elements.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Element descriptor.
    #[inline]
    pub fn descriptor(&self) -> &Arc<ValueTypeDescriptor> {
        &self.desc
    }

    /// Element nullability.
    #[inline]
    pub fn nullness(&self) -> ArrayNullness {
        self.nullness
    }

    fn slot(&self, index: usize) -> BerylResult<&AtomicSlot> {
        self.slots.get(index).ok_or_else(|| {
            BerylError::invalid(format!(
                "index {} out of bounds for length {}",
                index,
                self.slots.len()
            ))
        })
    }

    /// Copy the element at `index` out; `None` is a null element.
    pub fn get(&self, index: usize, stats: &AccessStats) -> BerylResult<Option<FlatPayload>> {
        let bytes = self.slot(index)?.read(stats);
        let payload = FlatPayload::from_bytes(Arc::clone(&self.desc), bytes)?;
        if self.nullness == ArrayNullness::Nullable && payload.is_logically_null() {
            return Ok(None);
        }
        Ok(Some(payload))
    }

    /// Whether the element at `index` is null.
    pub fn is_null(&self, index: usize, stats: &AccessStats) -> BerylResult<bool> {
        Ok(self.get(index, stats)?.is_none())
    }

    /// Store a non-null value into the element at `index`.
    pub fn store(
        &self,
        index: usize,
        value: &FlatPayload,
        stats: &AccessStats,
    ) -> BerylResult<()> {
        if value.descriptor().id != self.desc.id {
            return Err(BerylError::array_store(format!(
                "cannot store {} into {}[]",
                value.descriptor().name,
                self.desc.name
            )));
        }
        let slot = self.slot(index)?;
        match self.desc.null_marker {
            Some(offset) => {
                // Keep the marker authoritative even when the incoming
                // payload came from a null-restricted context.
                let mut bytes = value.snapshot();
                null_marker::write_marker(&mut bytes, offset, true);
                slot.write(&bytes, stats);
            }
            None => slot.write(value.bytes(), stats),
        }
        Ok(())
    }

    /// Store null into the element at `index`.
    ///
    /// Rejected at the write site for null-restricted arrays.
    pub fn store_null(&self, index: usize, stats: &AccessStats) -> BerylResult<()> {
        if self.nullness == ArrayNullness::NullRestricted {
            return Err(BerylError::null_restriction(format!(
                "{}[] is null-restricted",
                self.desc.name
            )));
        }
        let slot = self.slot(index)?;
        slot.write(&vec![0u8; self.desc.payload_size as usize], stats);
        Ok(())
    }
}

// =============================================================================
// Boxed Fallback
// =============================================================================

/// Reference-array fallback for element types that never flatten.
pub struct BoxedRefArray {
    desc: Arc<ValueTypeDescriptor>,
    nullness: ArrayNullness,
    slots: RwLock<Vec<Option<ObjId>>>,
}

impl BoxedRefArray {
    /// Create a reference array of `len` elements.
    ///
    /// Null-restricted arrays allocate one shared default instance; a
    /// default element is indistinguishable from any other equal value.
    pub fn new(
        source: &dyn DescriptorSource,
        desc: Arc<ValueTypeDescriptor>,
        len: usize,
        nullness: ArrayNullness,
        handles: &HandleTable,
    ) -> BerylResult<Self> {
        let slots = match nullness {
            ArrayNullness::Nullable => vec![None; len],
            ArrayNullness::NullRestricted => {
                let mut default = FlatPayload::zeroed(Arc::clone(&desc));
                null_marker::mark_all_present(source, &desc, default.bytes_mut())?;
                let id = handles.allocate(BoxedValue::new(default));
                vec![Some(id); len]
            }
        };
        Ok(Self {
            desc,
            nullness,
            slots: RwLock::new(slots),
        })
    }

    /// Element count.
    pub fn len(&self) -> usize {
        self.slots.read().len()
    }

    /// Whether the array has no elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Element descriptor.
    #[inline]
    pub fn descriptor(&self) -> &Arc<ValueTypeDescriptor> {
        &self.desc
    }

    /// Element nullability.
    #[inline]
    pub fn nullness(&self) -> ArrayNullness {
        self.nullness
    }

    /// Read the reference at `index`.
    pub fn get(&self, index: usize) -> BerylResult<Option<ObjId>> {
        self.slots.read().get(index).copied().ok_or_else(|| {
            BerylError::invalid(format!("index {} out of bounds", index))
        })
    }

    /// Store a reference at `index`, type-checked against the element type.
    pub fn store(&self, index: usize, id: ObjId, handles: &HandleTable) -> BerylResult<()> {
        let value = handles
            .get(id)
            .ok_or_else(|| BerylError::invalid(format!("dangling handle {}", id)))?;
        if value.type_id() != self.desc.id {
            return Err(BerylError::array_store(format!(
                "cannot store {} into {}[]",
                value.descriptor().name,
                self.desc.name
            )));
        }
        let mut slots = self.slots.write();
        let slot = slots
            .get_mut(index)
            .ok_or_else(|| BerylError::invalid(format!("index {} out of bounds", index)))?;
        *slot = Some(id);
        Ok(())
    }

    /// Store null at `index`; rejected for null-restricted arrays.
    pub fn store_null(&self, index: usize) -> BerylResult<()> {
        if self.nullness == ArrayNullness::NullRestricted {
            return Err(BerylError::null_restriction(format!(
                "{}[] is null-restricted",
                self.desc.name
            )));
        }
        let mut slots = self.slots.write();
        let slot = slots
            .get_mut(index)
            .ok_or_else(|| BerylError::invalid(format!("index {} out of bounds", index)))?;
        *slot = None;
        Ok(())
    }
}

// =============================================================================
// Value Arrays
// =============================================================================

/// A value array in whichever representation the element type allows.
pub enum ValueArray {
    /// Elements stored flat.
    Flat(FlatArray),
    /// Elements stored as references (element type never flattens).
    Boxed(BoxedRefArray),
}

impl ValueArray {
    /// Create an array, choosing the representation from the element
    /// type's atomicity class.
    pub fn new(
        source: &dyn DescriptorSource,
        desc: Arc<ValueTypeDescriptor>,
        len: usize,
        nullness: ArrayNullness,
        handles: &HandleTable,
        stats: &AccessStats,
    ) -> BerylResult<Self> {
        match desc.atomic_class {
            AtomicClass::NeverFlat => Ok(ValueArray::Boxed(BoxedRefArray::new(
                source, desc, len, nullness, handles,
            )?)),
            _ => Ok(ValueArray::Flat(FlatArray::new(
                source, desc, len, nullness, stats,
            )?)),
        }
    }

    /// Element count.
    pub fn len(&self) -> usize {
        match self {
            ValueArray::Flat(a) => a.len(),
            ValueArray::Boxed(a) => a.len(),
        }
    }

    /// Whether the array has no elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Element descriptor.
    pub fn descriptor(&self) -> &Arc<ValueTypeDescriptor> {
        match self {
            ValueArray::Flat(a) => a.descriptor(),
            ValueArray::Boxed(a) => a.descriptor(),
        }
    }

    /// Element nullability.
    pub fn nullness(&self) -> ArrayNullness {
        match self {
            ValueArray::Flat(a) => a.nullness(),
            ValueArray::Boxed(a) => a.nullness(),
        }
    }

    /// Copy the element at `index` out as a payload; `None` is null.
    ///
    /// Both representations answer identically: flattening is not
    /// observable through this interface.
    pub fn get_payload(
        &self,
        index: usize,
        handles: &HandleTable,
        stats: &AccessStats,
    ) -> BerylResult<Option<FlatPayload>> {
        match self {
            ValueArray::Flat(a) => a.get(index, stats),
            ValueArray::Boxed(a) => match a.get(index)? {
                None => Ok(None),
                Some(id) => {
                    let value = handles
                        .get(id)
                        .ok_or_else(|| BerylError::invalid(format!("dangling handle {}", id)))?;
                    Ok(Some(value.payload().clone()))
                }
            },
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use beryl_core::intern::intern;
    use beryl_core::{EngineConfig, ErrorKind, LeafKind, Scalar};
    use beryl_layout::{DeclFlags, FieldDecl, LayoutRegistry, TypeDecl, ValueTypeId};

    fn registry(config: EngineConfig) -> LayoutRegistry {
        let registry = LayoutRegistry::new(config);
        registry
            .declare(
                ValueTypeId(1),
                TypeDecl::new(
                    intern("Elem"),
                    vec![
                        FieldDecl::leaf(intern("x"), LeafKind::I64),
                        FieldDecl::leaf(intern("y"), LeafKind::I64),
                    ],
                )
                .with_flags(DeclFlags::NULLABLE_USE | DeclFlags::ATOMIC_USE),
            )
            .unwrap();
        registry.resolve(ValueTypeId(1)).unwrap();
        registry
    }

    fn elem(registry: &LayoutRegistry, x: i64, y: i64) -> FlatPayload {
        let desc = registry.descriptor(ValueTypeId(1)).unwrap();
        FlatPayload::construct(registry, desc, &[Scalar::I64(x), Scalar::I64(y)]).unwrap()
    }

    #[test]
    fn test_null_restricted_starts_at_default() {
        let registry = registry(EngineConfig::default());
        let desc = registry.descriptor(ValueTypeId(1)).unwrap();
        let stats = AccessStats::new();
        let array =
            FlatArray::new(&registry, desc, 3, ArrayNullness::NullRestricted, &stats).unwrap();

        let first = array.get(0, &stats).unwrap().unwrap();
        assert_eq!(first.read_leaf(0).unwrap(), Scalar::I64(0));
        assert!(!array.is_null(2, &stats).unwrap());
    }

    #[test]
    fn test_nullable_starts_all_null() {
        let registry = registry(EngineConfig::default());
        let desc = registry.descriptor(ValueTypeId(1)).unwrap();
        let stats = AccessStats::new();
        let array = FlatArray::new(&registry, desc, 3, ArrayNullness::Nullable, &stats).unwrap();

        for i in 0..3 {
            assert!(array.is_null(i, &stats).unwrap());
        }
    }

    #[test]
    fn test_store_and_get_roundtrip() {
        let registry = registry(EngineConfig::default());
        let desc = registry.descriptor(ValueTypeId(1)).unwrap();
        let stats = AccessStats::new();
        let array = FlatArray::new(&registry, desc, 2, ArrayNullness::Nullable, &stats).unwrap();

        array.store(1, &elem(&registry, 5, 6), &stats).unwrap();
        let out = array.get(1, &stats).unwrap().unwrap();
        assert_eq!(out.read_leaf(0).unwrap(), Scalar::I64(5));
        assert_eq!(out.read_leaf(1).unwrap(), Scalar::I64(6));
        assert!(array.is_null(0, &stats).unwrap());
    }

    #[test]
    fn test_null_store_rejected_on_restricted_array() {
        let registry = registry(EngineConfig::default());
        let desc = registry.descriptor(ValueTypeId(1)).unwrap();
        let stats = AccessStats::new();
        let array =
            FlatArray::new(&registry, desc, 2, ArrayNullness::NullRestricted, &stats).unwrap();

        let err = array.store_null(0, &stats).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NullRestriction);
    }

    #[test]
    fn test_null_store_then_null_read() {
        let registry = registry(EngineConfig::default());
        let desc = registry.descriptor(ValueTypeId(1)).unwrap();
        let stats = AccessStats::new();
        let array = FlatArray::new(&registry, desc, 1, ArrayNullness::Nullable, &stats).unwrap();

        array.store(0, &elem(&registry, 1, 2), &stats).unwrap();
        assert!(!array.is_null(0, &stats).unwrap());
        array.store_null(0, &stats).unwrap();
        assert!(array.is_null(0, &stats).unwrap());
    }

    #[test]
    fn test_wrong_type_store_is_array_store_error() {
        let registry = registry(EngineConfig::default());
        registry
            .declare(
                ValueTypeId(2),
                TypeDecl::new(
                    intern("Other"),
                    vec![FieldDecl::leaf(intern("v"), LeafKind::I64)],
                ),
            )
            .unwrap();
        registry.resolve(ValueTypeId(2)).unwrap();

        let desc = registry.descriptor(ValueTypeId(1)).unwrap();
        let other_desc = registry.descriptor(ValueTypeId(2)).unwrap();
        let stats = AccessStats::new();
        let array = FlatArray::new(&registry, desc, 1, ArrayNullness::Nullable, &stats).unwrap();

        let wrong =
            FlatPayload::construct(&registry, other_desc, &[Scalar::I64(1)]).unwrap();
        let err = array.store(0, &wrong, &stats).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ArrayStore);
    }

    #[test]
    fn test_never_flat_elements_fall_back_to_references() {
        let config = EngineConfig {
            max_flat_size_bytes: 8,
            ..Default::default()
        };
        let registry = registry(config);
        let desc = registry.descriptor(ValueTypeId(1)).unwrap();
        assert_eq!(desc.atomic_class, AtomicClass::NeverFlat);

        let handles = HandleTable::new();
        let stats = AccessStats::new();
        let array = ValueArray::new(
            &registry,
            desc,
            2,
            ArrayNullness::Nullable,
            &handles,
            &stats,
        )
        .unwrap();
        assert!(matches!(array, ValueArray::Boxed(_)));

        // Stores and reads behave like the flat variant would.
        if let ValueArray::Boxed(ref boxed) = array {
            let id = handles.allocate(BoxedValue::new(elem(&registry, 9, 9)));
            boxed.store(0, id, &handles).unwrap();
        }
        let out = array.get_payload(0, &handles, &stats).unwrap().unwrap();
        assert_eq!(out.read_leaf(0).unwrap(), Scalar::I64(9));
        assert!(array.get_payload(1, &handles, &stats).unwrap().is_none());
    }

    #[test]
    fn test_zero_length_array() {
        let registry = registry(EngineConfig::default());
        let desc = registry.descriptor(ValueTypeId(1)).unwrap();
        let stats = AccessStats::new();
        let array =
            FlatArray::new(&registry, desc, 0, ArrayNullness::NullRestricted, &stats).unwrap();
        assert!(array.is_empty());
        assert!(array.get(0, &stats).is_err());
    }
}
