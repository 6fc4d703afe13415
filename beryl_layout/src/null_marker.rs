//! Null-marker maintenance and path-based payload access.
//!
//! A nullable flat field or element records logical nullness in a
//! one-byte side-band marker inside the payload (`0` = null, non-zero =
//! present), so an all-zero payload reads as null in nullable contexts.
//! Deeply nested nullable fields carry one marker per independently
//! nullable level.
//!
//! Reads walk the path and short-circuit at the first null marker; bytes
//! of deeper levels are never inspected. Writes through an intermediate
//! null level fail: the intermediate container does not exist, and the
//! caller must assign it first.

use crate::descriptor::{FieldSlot, SlotKind, ValueTypeDescriptor, ValueTypeId};
use beryl_core::{BerylError, BerylResult, LeafKind, Scalar};
use smallvec::SmallVec;
use std::sync::Arc;

// =============================================================================
// Descriptor Source
// =============================================================================

/// Resolver for nested descriptors during a path walk.
///
/// Implemented by the layout registry; tests may implement it over a
/// plain map.
pub trait DescriptorSource {
    /// Resolve a published descriptor.
    fn descriptor_of(&self, id: ValueTypeId) -> BerylResult<Arc<ValueTypeDescriptor>>;
}

// =============================================================================
// Field Paths
// =============================================================================

/// A path of field indices, one per nesting level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPath(SmallVec<[u16; 4]>);

impl FieldPath {
    /// Create a path from field indices.
    pub fn new(indices: &[u16]) -> Self {
        Self(SmallVec::from_slice(indices))
    }

    /// Path segments in order.
    #[inline]
    pub fn segments(&self) -> &[u16] {
        &self.0
    }

    /// Number of levels.
    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the path is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Result of a path read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathValue {
    /// A marker along the path was null.
    Null,
    /// The path ended at a primitive or reference leaf.
    Leaf(Scalar),
    /// The path ended at a flat nested field; its payload bytes are
    /// returned by copy.
    Flat(ValueTypeId, Box<[u8]>),
}

// =============================================================================
// Marker Primitives
// =============================================================================

/// Read a marker byte. Non-zero means the level is present.
#[inline]
pub fn read_marker(bytes: &[u8], offset: u32) -> bool {
    bytes[offset as usize] != 0
}

/// Write a marker byte.
#[inline]
pub fn write_marker(bytes: &mut [u8], offset: u32, present: bool) {
    bytes[offset as usize] = present as u8;
}

/// Set every marker reachable in `bytes` to "present".
///
/// Constructors call this once on a freshly built payload: a constructed
/// value is non-null at every level, including markers of nested types
/// that are only nullable in other contexts.
pub fn mark_all_present(
    source: &dyn DescriptorSource,
    desc: &ValueTypeDescriptor,
    bytes: &mut [u8],
) -> BerylResult<()> {
    mark_present_at(source, desc, bytes, 0)
}

fn mark_present_at(
    source: &dyn DescriptorSource,
    desc: &ValueTypeDescriptor,
    bytes: &mut [u8],
    base: u32,
) -> BerylResult<()> {
    if let Some(marker) = desc.null_marker {
        write_marker(bytes, base + marker, true);
    }
    for field in &desc.fields {
        if let SlotKind::Flat { id, .. } = field.kind {
            let sub = source.descriptor_of(id)?;
            mark_present_at(source, &sub, bytes, base + field.offset)?;
        }
    }
    Ok(())
}

// =============================================================================
// Path Walks
// =============================================================================

/// Location of a path's final segment.
struct WalkEnd {
    /// Byte offset of the payload enclosing the final field. Slot and
    /// marker offsets in `slot` are relative to this base.
    enclosing_base: u32,
    /// The final field slot.
    slot: FieldSlot,
}

/// Walk `path` down to its final segment.
///
/// Returns `None` when a null intermediate level short-circuits the walk
/// (reads); with `fail_on_intermediate_null` the same condition is an
/// error instead (writes).
fn walk(
    source: &dyn DescriptorSource,
    desc: &Arc<ValueTypeDescriptor>,
    bytes: &[u8],
    path: &FieldPath,
    fail_on_intermediate_null: bool,
) -> BerylResult<Option<WalkEnd>> {
    if path.is_empty() {
        return Err(BerylError::field_missing("empty field path"));
    }

    let mut current = Arc::clone(desc);
    let mut base: u32 = 0;
    let segments = path.segments();

    for (level, &index) in segments.iter().enumerate() {
        let slot = current
            .field(index as usize)
            .ok_or_else(|| {
                BerylError::field_missing(format!("no field {} on {}", index, current.name))
            })?
            .clone();

        if level + 1 == segments.len() {
            return Ok(Some(WalkEnd {
                enclosing_base: base,
                slot,
            }));
        }

        match slot.kind {
            SlotKind::Flat { id, null_marker } => {
                if let Some(marker) = null_marker {
                    if !read_marker(bytes, base + marker) {
                        if fail_on_intermediate_null {
                            return Err(BerylError::null_restriction(format!(
                                "intermediate field {} of {} is null",
                                slot.name, current.name
                            )));
                        }
                        return Ok(None);
                    }
                }
                base += slot.offset;
                current = source.descriptor_of(id)?;
            }
            _ => {
                return Err(BerylError::field_missing(format!(
                    "path descends into non-flat field {} of {}",
                    slot.name, current.name
                )));
            }
        }
    }
    unreachable!("loop returns on the final segment")
}

/// Read the value at `path`, short-circuiting at the first null level.
pub fn read_path(
    source: &dyn DescriptorSource,
    desc: &Arc<ValueTypeDescriptor>,
    bytes: &[u8],
    path: &FieldPath,
) -> BerylResult<PathValue> {
    let Some(end) = walk(source, desc, bytes, path, false)? else {
        return Ok(PathValue::Null);
    };
    let offset = end.enclosing_base + end.slot.offset;
    match end.slot.kind {
        SlotKind::Leaf(kind) => Ok(PathValue::Leaf(Scalar::read_from(bytes, offset, kind))),
        SlotKind::Boxed { .. } => Ok(PathValue::Leaf(Scalar::read_from(
            bytes,
            offset,
            LeafKind::Ref,
        ))),
        SlotKind::Flat { id, null_marker } => {
            if let Some(marker) = null_marker {
                if !read_marker(bytes, end.enclosing_base + marker) {
                    return Ok(PathValue::Null);
                }
            }
            let sub = source.descriptor_of(id)?;
            let start = offset as usize;
            let stop = start + sub.payload_size as usize;
            Ok(PathValue::Flat(id, bytes[start..stop].into()))
        }
    }
}

/// Whether any marker along `path` (final level included) is null.
pub fn is_null_at(
    source: &dyn DescriptorSource,
    desc: &Arc<ValueTypeDescriptor>,
    bytes: &[u8],
    path: &FieldPath,
) -> BerylResult<bool> {
    match read_path(source, desc, bytes, path)? {
        PathValue::Null => Ok(true),
        PathValue::Leaf(Scalar::Ref(r)) => Ok(r.is_none()),
        _ => Ok(false),
    }
}

/// Write a leaf scalar at `path`.
///
/// Fails with a null-restriction error when an intermediate level is
/// null: the enclosing container must be assigned first.
pub fn write_path(
    source: &dyn DescriptorSource,
    desc: &Arc<ValueTypeDescriptor>,
    bytes: &mut [u8],
    path: &FieldPath,
    value: Scalar,
) -> BerylResult<()> {
    let end = walk(source, desc, bytes, path, true)?
        .expect("write walk errors on intermediate null");
    let offset = end.enclosing_base + end.slot.offset;
    match end.slot.kind {
        SlotKind::Leaf(kind) => {
            if kind != value.kind() {
                return Err(BerylError::class_cast(format!(
                    "cannot store {} into {} slot",
                    value.kind(),
                    kind
                )));
            }
            value.write_to(bytes, offset);
            Ok(())
        }
        SlotKind::Boxed { .. } => match value {
            Scalar::Ref(_) => {
                value.write_to(bytes, offset);
                Ok(())
            }
            other => Err(BerylError::class_cast(format!(
                "cannot store {} into reference slot",
                other.kind()
            ))),
        },
        SlotKind::Flat { .. } => Err(BerylError::invalid(
            "flat field requires write_flat_value or write_flat_null",
        )),
    }
}

/// Store logical null into the nullable flat field at `path`.
///
/// Zeroes the nested payload (marker byte included) so a later equality
/// or re-publication never observes stale field bytes behind the null.
pub fn write_flat_null(
    source: &dyn DescriptorSource,
    desc: &Arc<ValueTypeDescriptor>,
    bytes: &mut [u8],
    path: &FieldPath,
) -> BerylResult<()> {
    let end = walk(source, desc, bytes, path, true)?
        .expect("write walk errors on intermediate null");
    match end.slot.kind {
        SlotKind::Flat { id, null_marker: Some(_) } => {
            let sub = source.descriptor_of(id)?;
            let start = (end.enclosing_base + end.slot.offset) as usize;
            bytes[start..start + sub.payload_size as usize].fill(0);
            Ok(())
        }
        SlotKind::Flat { null_marker: None, .. } => Err(BerylError::null_restriction(format!(
            "field {} is null-restricted",
            end.slot.name
        ))),
        _ => Err(BerylError::invalid("path does not end at a flat field")),
    }
}

/// Store a non-null nested payload into the flat field at `path`.
pub fn write_flat_value(
    source: &dyn DescriptorSource,
    desc: &Arc<ValueTypeDescriptor>,
    bytes: &mut [u8],
    path: &FieldPath,
    sub_payload: &[u8],
) -> BerylResult<()> {
    let end = walk(source, desc, bytes, path, true)?
        .expect("write walk errors on intermediate null");
    match end.slot.kind {
        SlotKind::Flat { id, null_marker } => {
            let sub = source.descriptor_of(id)?;
            if sub_payload.len() != sub.payload_size as usize {
                return Err(BerylError::class_cast(format!(
                    "payload size {} does not match {} ({} bytes)",
                    sub_payload.len(),
                    sub.name,
                    sub.payload_size
                )));
            }
            let start = (end.enclosing_base + end.slot.offset) as usize;
            bytes[start..start + sub_payload.len()].copy_from_slice(sub_payload);
            if let Some(marker) = null_marker {
                write_marker(bytes, end.enclosing_base + marker, true);
            }
            Ok(())
        }
        _ => Err(BerylError::invalid("path does not end at a flat field")),
    }
}

// =============================================================================
// Tests
// =============================================================================
