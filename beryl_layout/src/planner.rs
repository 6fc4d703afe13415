//! Layout planning: recursive flattening, padding, markers, cycles.
//!
//! The planner turns declarations into descriptors. Nested value fields
//! flatten in place when the nested type is itself flattenable; a nested
//! type whose flattened footprint exceeds the configured thresholds stays
//! a reference field, while the declaring type may still flatten. A
//! nullable nested field flattens only when the nested descriptor carries
//! a null marker; otherwise there is no flat representation of "null" and
//! the field stays boxed.
//!
//! Flatten-containment cycles are rejected over the declared field graph
//! before any layout is computed. The check runs on declarations, not
//! planned descriptors, and ignores the thresholds: the limits are
//! tunable (including "unlimited"), so a cycle must be impossible under
//! every configuration, and it must be rejected at resolution time rather
//! than discovered by runaway recursion at plan time.

use crate::decl::{DeclFlags, FieldDeclKind, TypeDecl};
use crate::descriptor::{
    AtomicClass, FieldSlot, LeafSlot, SlotKind, ValueTypeDescriptor, ValueTypeId,
};
use crate::stats::LayoutStats;
use beryl_core::{BerylError, BerylResult, EngineConfig, LeafKind};
use rustc_hash::FxHashMap;
use std::sync::Arc;

// =============================================================================
// Cycle Detection
// =============================================================================

/// DFS visit state for cycle detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Visit {
    OnStack,
    Done,
}

// =============================================================================
// Planner
// =============================================================================

/// Computes descriptors from declarations.
///
/// The planner memoizes within one planning session; cross-session
/// memoization (and the once-only publication guarantee) is the
/// registry's job.
pub struct TypeLayoutPlanner<'a> {
    config: &'a EngineConfig,
    decls: &'a FxHashMap<ValueTypeId, TypeDecl>,
    planned: FxHashMap<ValueTypeId, Arc<ValueTypeDescriptor>>,
    stats: &'a LayoutStats,
}

impl<'a> TypeLayoutPlanner<'a> {
    /// Create a planner over a declaration set.
    pub fn new(
        config: &'a EngineConfig,
        decls: &'a FxHashMap<ValueTypeId, TypeDecl>,
        stats: &'a LayoutStats,
    ) -> Self {
        Self {
            config,
            decls,
            planned: FxHashMap::default(),
            stats,
        }
    }

    /// Plan the layout of `id`, planning nested types as needed.
    pub fn plan(&mut self, id: ValueTypeId) -> BerylResult<Arc<ValueTypeDescriptor>> {
        self.check_cycles(id)?;
        self.plan_resolved(id)
    }

    /// All descriptors planned so far in this session.
    pub fn take_planned(self) -> FxHashMap<ValueTypeId, Arc<ValueTypeDescriptor>> {
        self.planned
    }

    // -------------------------------------------------------------------------
    // Cycle rejection
    // -------------------------------------------------------------------------

    /// Reject flatten-containment cycles reachable from `root`.
    fn check_cycles(&self, root: ValueTypeId) -> BerylResult<()> {
        let mut states: FxHashMap<ValueTypeId, Visit> = FxHashMap::default();
        self.visit(root, &mut states)
    }

    fn visit(
        &self,
        id: ValueTypeId,
        states: &mut FxHashMap<ValueTypeId, Visit>,
    ) -> BerylResult<()> {
        match states.get(&id) {
            Some(Visit::Done) => return Ok(()),
            Some(Visit::OnStack) => {
                self.stats.record_cycle_rejected();
                let name = self
                    .decls
                    .get(&id)
                    .map(|d| d.name.as_str().to_owned())
                    .unwrap_or_else(|| format!("{}", id));
                return Err(BerylError::layout_cycle(format!(
                    "value type {} flat-contains itself",
                    name
                )));
            }
            None => {}
        }
        states.insert(id, Visit::OnStack);

        if let Some(decl) = self.decls.get(&id) {
            for field in &decl.fields {
                if let FieldDeclKind::Value { id: nested, .. } = field.kind {
                    self.visit(nested, states)?;
                }
            }
        }

        states.insert(id, Visit::Done);
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Layout
    // -------------------------------------------------------------------------

    /// Plan `id` assuming cycle freedom has been established.
    fn plan_resolved(&mut self, id: ValueTypeId) -> BerylResult<Arc<ValueTypeDescriptor>> {
        if let Some(existing) = self.planned.get(&id) {
            return Ok(Arc::clone(existing));
        }

        let decl = self.decls.get(&id).ok_or_else(|| {
            BerylError::uninitialized(format!("value type {} is not resolved", id))
        })?;

        let mut cursor: u32 = 0;
        let mut alignment: u32 = 1;
        // Padding holes as (offset, len), available for the null marker.
        let mut holes: Vec<(u32, u32)> = Vec::new();
        let mut fields = Vec::with_capacity(decl.fields.len());
        let mut leaves = Vec::new();
        let mut marker_slots = Vec::new();
        let mut oop_count: u32 = 0;

        for field in &decl.fields {
            match field.kind {
                FieldDeclKind::Leaf(kind) => {
                    cursor = Self::align_to(cursor, kind.alignment(), &mut holes);
                    fields.push(FieldSlot {
                        name: field.name.clone(),
                        offset: cursor,
                        kind: SlotKind::Leaf(kind),
                    });
                    leaves.push(LeafSlot {
                        offset: cursor,
                        kind,
                    });
                    if kind.is_reference() {
                        oop_count += 1;
                    }
                    alignment = alignment.max(kind.alignment());
                    cursor += kind.size_bytes();
                }
                FieldDeclKind::Value { id: nested, nullable } => {
                    let sub = self.plan_resolved(nested)?;
                    let can_flatten =
                        sub.flattenable && (!nullable || sub.null_marker.is_some());

                    if can_flatten {
                        cursor = Self::align_to(cursor, sub.alignment, &mut holes);
                        let marker = if nullable {
                            // Checked above: a nullable flat field requires
                            // the nested descriptor to carry a marker.
                            Some(cursor + sub.null_marker.unwrap())
                        } else {
                            None
                        };
                        fields.push(FieldSlot {
                            name: field.name.clone(),
                            offset: cursor,
                            kind: SlotKind::Flat {
                                id: nested,
                                null_marker: marker,
                            },
                        });
                        for leaf in &sub.leaves {
                            leaves.push(LeafSlot {
                                offset: cursor + leaf.offset,
                                kind: leaf.kind,
                            });
                        }
                        if let Some(m) = marker {
                            marker_slots.push(m);
                        }
                        for &nested_marker in &sub.marker_slots {
                            marker_slots.push(cursor + nested_marker);
                        }
                        oop_count += sub.oop_count;
                        alignment = alignment.max(sub.alignment);
                        cursor += sub.payload_size;
                    } else {
                        let ref_kind = LeafKind::Ref;
                        cursor = Self::align_to(cursor, ref_kind.alignment(), &mut holes);
                        fields.push(FieldSlot {
                            name: field.name.clone(),
                            offset: cursor,
                            kind: SlotKind::Boxed { id: nested },
                        });
                        leaves.push(LeafSlot {
                            offset: cursor,
                            kind: ref_kind,
                        });
                        oop_count += 1;
                        alignment = alignment.max(ref_kind.alignment());
                        cursor += ref_kind.size_bytes();
                    }
                }
            }
        }

        // Null marker: reuse a padding hole, else append one byte.
        let null_marker = if decl.flags.contains(DeclFlags::NULLABLE_USE) {
            if let Some(hole) = holes.iter_mut().find(|(_, len)| *len >= 1) {
                let offset = hole.0;
                hole.0 += 1;
                hole.1 -= 1;
                self.stats.record_marker_reused();
                Some(offset)
            } else {
                let offset = cursor;
                cursor += 1;
                self.stats.record_marker_appended();
                Some(offset)
            }
        } else {
            None
        };

        let payload_size = Self::round_up(cursor, alignment);

        let flattenable = self.config.allows_flat_size(payload_size)
            && self.config.allows_flat_oops(oop_count);

        let atomic_class = if !flattenable {
            AtomicClass::NeverFlat
        } else if payload_size <= self.config.machine_word_bytes {
            AtomicClass::NaturallyAtomic
        } else {
            AtomicClass::RequiresBarrier
        };

        let descriptor = Arc::new(ValueTypeDescriptor {
            id,
            name: decl.name.clone(),
            fields,
            payload_size,
            alignment,
            oop_count,
            flattenable,
            atomic_class,
            null_marker,
            leaves,
            marker_slots,
        });

        self.stats.record_planned();
        self.planned.insert(id, Arc::clone(&descriptor));
        Ok(descriptor)
    }

    /// Align `cursor` up to `align`, recording any padding hole.
    fn align_to(cursor: u32, align: u32, holes: &mut Vec<(u32, u32)>) -> u32 {
        let aligned = Self::round_up(cursor, align);
        if aligned > cursor {
            holes.push((cursor, aligned - cursor));
        }
        aligned
    }

    #[inline]
    fn round_up(value: u32, align: u32) -> u32 {
        debug_assert!(align.is_power_of_two());
        (value + align - 1) & !(align - 1)
    }
}

// =============================================================================
// Tests
// =============================================================================
