//! Plan construction.
//!
//! Scalarization is a joint decision: the type must flatten, and both
//! caller and callee must have resolved it at their own compile time. A
//! one-sided resolution produces a boxed plan with a mismatch adapter;
//! both-sided ignorance produces a plain boxed plan. The traversal is
//! deterministic descriptor order, so any two parties building a plan
//! for the same signature and resolution state produce identical slots.
//!
//! Register-budget overflow spills leaves to the stack-extension area in
//! traversal order. A scalarized return must fit the register budget
//! outright; a return wider than the budget is returned boxed by both
//! sides instead of extending the caller's frame from the callee.

use crate::plan::{
    AdapterKind, ArgSlot, Assignment, CallSitePlan, RetSlot, StackExtension,
};
use crate::registers::{FloatReg, IntReg};
use crate::stats::ConventionStats;
use beryl_core::LeafKind;
use beryl_layout::{LayoutRegistry, ValueTypeDescriptor, ValueTypeId};
use rustc_hash::FxHashSet;
use smallvec::SmallVec;
use std::sync::Arc;

// =============================================================================
// Signatures
// =============================================================================

/// Declared type of one parameter or return position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    /// A primitive leaf.
    Primitive(LeafKind),
    /// A value type.
    Value(ValueTypeId),
}

/// One parameter or return position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParamSpec {
    /// Declared type.
    pub ty: ParamType,
    /// Whether null is a legal value at this position.
    pub nullable: bool,
}

impl ParamSpec {
    /// A primitive position.
    pub fn primitive(kind: LeafKind) -> Self {
        Self {
            ty: ParamType::Primitive(kind),
            nullable: false,
        }
    }

    /// A null-restricted value position.
    pub fn value(id: ValueTypeId) -> Self {
        Self {
            ty: ParamType::Value(id),
            nullable: false,
        }
    }

    /// A nullable value position.
    pub fn nullable_value(id: ValueTypeId) -> Self {
        Self {
            ty: ParamType::Value(id),
            nullable: true,
        }
    }
}

/// A resolved method signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    /// Parameter positions in order.
    pub params: Vec<ParamSpec>,
    /// Return position, absent for void.
    pub ret: Option<ParamSpec>,
}

impl Signature {
    /// Create a signature.
    pub fn new(params: Vec<ParamSpec>, ret: Option<ParamSpec>) -> Self {
        Self { params, ret }
    }
}

// =============================================================================
// Resolution Views
// =============================================================================

/// Which value types one side (caller or callee) had resolved at its
/// own compile time.
#[derive(Debug, Clone, Default)]
pub struct SideView {
    resolved: FxHashSet<ValueTypeId>,
}

impl SideView {
    /// An empty view: nothing resolved.
    pub fn new() -> Self {
        Self::default()
    }

    /// A view with the given types resolved.
    pub fn with(ids: &[ValueTypeId]) -> Self {
        Self {
            resolved: ids.iter().copied().collect(),
        }
    }

    /// Mark a type resolved.
    pub fn mark_resolved(&mut self, id: ValueTypeId) {
        self.resolved.insert(id);
    }

    /// Whether this side resolved `id`.
    #[inline]
    pub fn is_resolved(&self, id: ValueTypeId) -> bool {
        self.resolved.contains(&id)
    }
}

// =============================================================================
// Slot Allocator
// =============================================================================

/// Deterministic register/stack assignment in traversal order.
struct SlotAlloc {
    next_int: usize,
    next_float: usize,
    next_stack: u16,
    int_budget: usize,
    float_budget: usize,
}

impl SlotAlloc {
    fn new(int_budget: usize, float_budget: usize) -> Self {
        Self {
            next_int: 0,
            next_float: 0,
            next_stack: 0,
            int_budget: int_budget.min(IntReg::ARGS.len()),
            float_budget: float_budget.min(FloatReg::ARGS.len()),
        }
    }

    fn alloc_int(&mut self) -> Assignment {
        if self.next_int < self.int_budget {
            let reg = IntReg::ARGS[self.next_int];
            self.next_int += 1;
            Assignment::Int(reg)
        } else {
            let slot = self.next_stack;
            self.next_stack += 1;
            Assignment::Stack(slot)
        }
    }

    fn alloc_float(&mut self) -> Assignment {
        if self.next_float < self.float_budget {
            let reg = FloatReg::ARGS[self.next_float];
            self.next_float += 1;
            Assignment::Float(reg)
        } else {
            let slot = self.next_stack;
            self.next_stack += 1;
            Assignment::Stack(slot)
        }
    }

    fn alloc_for(&mut self, kind: LeafKind) -> Assignment {
        match kind {
            LeafKind::F32 | LeafKind::F64 => self.alloc_float(),
            _ => self.alloc_int(),
        }
    }

    fn extension(&self) -> Option<StackExtension> {
        if self.next_stack > 0 {
            Some(StackExtension {
                slot_count: self.next_stack,
            })
        } else {
            None
        }
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Builds call-site plans against the shared layout registry.
pub struct ConventionBuilder {
    registry: Arc<LayoutRegistry>,
    stats: ConventionStats,
}

impl ConventionBuilder {
    /// Create a builder.
    pub fn new(registry: Arc<LayoutRegistry>) -> Self {
        Self {
            registry,
            stats: ConventionStats::new(),
        }
    }

    /// The builder's registry.
    #[inline]
    pub fn registry(&self) -> &Arc<LayoutRegistry> {
        &self.registry
    }

    /// Plan-construction statistics.
    #[inline]
    pub fn stats(&self) -> &ConventionStats {
        &self.stats
    }

    /// A flattenable published descriptor, if one exists.
    fn flat_descriptor(&self, id: ValueTypeId) -> Option<Arc<ValueTypeDescriptor>> {
        self.registry.try_descriptor(id).filter(|d| d.flattenable)
    }

    /// Build one plan version for `signature` under the given views.
    pub fn build_plan(
        &self,
        signature: &Signature,
        caller: &SideView,
        callee: &SideView,
        version: u32,
    ) -> CallSitePlan {
        let config = self.registry.config();
        let mut alloc = SlotAlloc::new(config.int_register_budget, config.float_register_budget);
        let mut adapter = None;
        let mut args = Vec::with_capacity(signature.params.len());

        for param in &signature.params {
            let (slot, position_adapter) = self.plan_position(param, caller, callee, &mut alloc);
            adapter = AdapterKind::merge(adapter, position_adapter);
            args.push(slot);
        }
        let extension = alloc.extension();

        let ret = match &signature.ret {
            None => RetSlot::Void,
            Some(spec) => {
                let (slot, ret_adapter) = self.plan_return(spec, caller, callee, config);
                adapter = AdapterKind::merge(adapter, ret_adapter);
                slot
            }
        };

        self.stats.record_plan_built();
        CallSitePlan {
            args,
            ret,
            extension,
            adapter,
            version,
        }
    }

    /// Build the all-boxed fallback plan for `signature`.
    ///
    /// Used by virtual sites whose targets disagree on scalarization:
    /// every value position travels boxed and no adapter is involved,
    /// because every target understands the boxed convention.
    pub fn build_boxed_plan(&self, signature: &Signature, version: u32) -> CallSitePlan {
        let config = self.registry.config();
        let mut alloc = SlotAlloc::new(config.int_register_budget, config.float_register_budget);
        let args = signature
            .params
            .iter()
            .map(|param| match param.ty {
                ParamType::Primitive(kind) => ArgSlot::Primitive(kind, alloc.alloc_for(kind)),
                ParamType::Value(id) => ArgSlot::Boxed(id, alloc.alloc_int()),
            })
            .collect();
        let extension = alloc.extension();
        let ret = match &signature.ret {
            None => RetSlot::Void,
            Some(spec) => match spec.ty {
                ParamType::Primitive(kind) => {
                    let mut ret_alloc =
                        SlotAlloc::new(config.int_register_budget, config.float_register_budget);
                    RetSlot::Primitive(kind, ret_alloc.alloc_for(kind))
                }
                ParamType::Value(id) => RetSlot::Boxed(id, Assignment::Int(IntReg::A0)),
            },
        };
        self.stats.record_plan_built();
        self.stats.record_boxed_fallback();
        CallSitePlan {
            args,
            ret,
            extension,
            adapter: None,
            version,
        }
    }

    fn plan_position(
        &self,
        param: &ParamSpec,
        caller: &SideView,
        callee: &SideView,
        alloc: &mut SlotAlloc,
    ) -> (ArgSlot, Option<AdapterKind>) {
        let id = match param.ty {
            ParamType::Primitive(kind) => {
                return (ArgSlot::Primitive(kind, alloc.alloc_for(kind)), None);
            }
            ParamType::Value(id) => id,
        };

        match self.flat_descriptor(id) {
            Some(desc) if caller.is_resolved(id) && callee.is_resolved(id) => {
                let mut assignments: SmallVec<[Assignment; 8]> =
                    SmallVec::with_capacity(desc.leaves.len());
                for leaf in &desc.leaves {
                    assignments.push(alloc.alloc_for(leaf.kind));
                }
                let mut nested_markers: SmallVec<[Assignment; 4]> =
                    SmallVec::with_capacity(desc.marker_slots.len());
                for _ in &desc.marker_slots {
                    nested_markers.push(alloc.alloc_int());
                }
                let null_marker = param.nullable.then(|| alloc.alloc_int());
                (
                    ArgSlot::Scalarized {
                        type_id: id,
                        assignments,
                        nested_markers,
                        null_marker,
                    },
                    None,
                )
            }
            maybe_desc => {
                let slot = ArgSlot::Boxed(id, alloc.alloc_int());
                let flattenable = maybe_desc.is_some();
                let adapter = match (
                    flattenable && caller.is_resolved(id),
                    flattenable && callee.is_resolved(id),
                ) {
                    // Caller compiled with the flat view, callee did not:
                    // the caller's scalarized value buffers at the boundary.
                    (true, false) => Some(AdapterKind::BufferAtBoundary),
                    // Callee expects the flat view, caller passes boxed:
                    // unpack at entry.
                    (false, true) => Some(AdapterKind::UnpackAtBoundary),
                    _ => None,
                };
                (slot, adapter)
            }
        }
    }

    fn plan_return(
        &self,
        spec: &ParamSpec,
        caller: &SideView,
        callee: &SideView,
        config: &beryl_core::EngineConfig,
    ) -> (RetSlot, Option<AdapterKind>) {
        let id = match spec.ty {
            ParamType::Primitive(kind) => {
                let mut alloc =
                    SlotAlloc::new(config.int_register_budget, config.float_register_budget);
                return (RetSlot::Primitive(kind, alloc.alloc_for(kind)), None);
            }
            ParamType::Value(id) => id,
        };

        if let Some(desc) = self.flat_descriptor(id) {
            if caller.is_resolved(id) && callee.is_resolved(id) {
                // Returns get a fresh register file; they must fit it
                // outright, the callee does not extend the caller's frame.
                let mut alloc =
                    SlotAlloc::new(config.int_register_budget, config.float_register_budget);
                let mut assignments: SmallVec<[Assignment; 8]> =
                    SmallVec::with_capacity(desc.leaves.len());
                let mut fits = true;
                for leaf in &desc.leaves {
                    match alloc.alloc_for(leaf.kind) {
                        Assignment::Stack(_) => {
                            fits = false;
                            break;
                        }
                        assignment => assignments.push(assignment),
                    }
                }
                let mut nested_markers: SmallVec<[Assignment; 4]> =
                    SmallVec::with_capacity(desc.marker_slots.len());
                if fits {
                    for _ in &desc.marker_slots {
                        match alloc.alloc_int() {
                            Assignment::Stack(_) => {
                                fits = false;
                                break;
                            }
                            assignment => nested_markers.push(assignment),
                        }
                    }
                }
                let null_marker = if fits && spec.nullable {
                    match alloc.alloc_int() {
                        Assignment::Stack(_) => {
                            fits = false;
                            None
                        }
                        assignment => Some(assignment),
                    }
                } else {
                    None
                };
                if fits {
                    return (
                        RetSlot::Scalarized {
                            type_id: id,
                            assignments,
                            nested_markers,
                            null_marker,
                        },
                        None,
                    );
                }
                // Too wide: both sides agree on a boxed return.
                return (
                    RetSlot::Boxed(id, Assignment::Int(IntReg::A0)),
                    None,
                );
            }
        }

        let flattenable = self.flat_descriptor(id).is_some();
        let adapter = match (
            flattenable && caller.is_resolved(id),
            flattenable && callee.is_resolved(id),
        ) {
            (false, true) => Some(AdapterKind::BufferAtBoundary),
            (true, false) => Some(AdapterKind::UnpackAtBoundary),
            _ => None,
        };
        (RetSlot::Boxed(id, Assignment::Int(IntReg::A0)), adapter)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use beryl_core::EngineConfig;
    use beryl_core::intern::intern;
    use beryl_layout::{DeclFlags, FieldDecl, TypeDecl};

    fn registry_with(
        config: EngineConfig,
        types: Vec<(u32, TypeDecl)>,
    ) -> Arc<LayoutRegistry> {
        let registry = Arc::new(LayoutRegistry::new(config));
        for (id, decl) in types {
            registry.declare(ValueTypeId(id), decl).unwrap();
        }
        registry
    }

    fn pair_decl() -> TypeDecl {
        TypeDecl::new(
            intern("Pair"),
            vec![
                FieldDecl::leaf(intern("x"), LeafKind::I32),
                FieldDecl::leaf(intern("y"), LeafKind::I32),
            ],
        )
    }

    fn resolved_both(registry: &Arc<LayoutRegistry>, ids: &[ValueTypeId]) -> (SideView, SideView) {
        for &id in ids {
            registry.resolve(id).unwrap();
        }
        (SideView::with(ids), SideView::with(ids))
    }

    #[test]
    fn test_scalarized_when_both_sides_resolved() {
        let registry = registry_with(EngineConfig::default(), vec![(1, pair_decl())]);
        let (caller, callee) = resolved_both(&registry, &[ValueTypeId(1)]);
        let builder = ConventionBuilder::new(Arc::clone(&registry));

        let sig = Signature::new(vec![ParamSpec::value(ValueTypeId(1))], None);
        let plan = builder.build_plan(&sig, &caller, &callee, 0);

        match &plan.args[0] {
            ArgSlot::Scalarized {
                assignments,
                null_marker,
                ..
            } => {
                assert_eq!(
                    assignments.as_slice(),
                    &[
                        Assignment::Int(IntReg::A0),
                        Assignment::Int(IntReg::A1)
                    ]
                );
                assert!(null_marker.is_none());
            }
            other => panic!("expected scalarized, got {:?}", other),
        }
        assert!(plan.adapter.is_none());
        assert!(plan.extension.is_none());
    }

    #[test]
    fn test_nullable_parameter_gets_marker_slot() {
        let registry = registry_with(
            EngineConfig::default(),
            vec![(1, pair_decl().with_flags(DeclFlags::NULLABLE_USE))],
        );
        let (caller, callee) = resolved_both(&registry, &[ValueTypeId(1)]);
        let builder = ConventionBuilder::new(registry);

        let sig = Signature::new(vec![ParamSpec::nullable_value(ValueTypeId(1))], None);
        let plan = builder.build_plan(&sig, &caller, &callee, 0);

        match &plan.args[0] {
            ArgSlot::Scalarized { null_marker, .. } => {
                assert_eq!(*null_marker, Some(Assignment::Int(IntReg::A2)));
            }
            other => panic!("expected scalarized, got {:?}", other),
        }
    }

    #[test]
    fn test_unresolved_callee_boxes_with_adapter() {
        let registry = registry_with(EngineConfig::default(), vec![(1, pair_decl())]);
        registry.resolve(ValueTypeId(1)).unwrap();
        let caller = SideView::with(&[ValueTypeId(1)]);
        let callee = SideView::new();
        let builder = ConventionBuilder::new(registry);

        let sig = Signature::new(vec![ParamSpec::value(ValueTypeId(1))], None);
        let plan = builder.build_plan(&sig, &caller, &callee, 0);

        assert!(matches!(plan.args[0], ArgSlot::Boxed(ValueTypeId(1), _)));
        assert_eq!(plan.adapter, Some(AdapterKind::BufferAtBoundary));
    }

    #[test]
    fn test_unresolved_caller_boxes_with_unpack_adapter() {
        let registry = registry_with(EngineConfig::default(), vec![(1, pair_decl())]);
        registry.resolve(ValueTypeId(1)).unwrap();
        let caller = SideView::new();
        let callee = SideView::with(&[ValueTypeId(1)]);
        let builder = ConventionBuilder::new(registry);

        let sig = Signature::new(vec![ParamSpec::value(ValueTypeId(1))], None);
        let plan = builder.build_plan(&sig, &caller, &callee, 0);

        assert!(matches!(plan.args[0], ArgSlot::Boxed(..)));
        assert_eq!(plan.adapter, Some(AdapterKind::UnpackAtBoundary));
    }

    #[test]
    fn test_never_flat_type_boxes_without_adapter() {
        let config = EngineConfig {
            max_flat_size_bytes: 0,
            ..Default::default()
        };
        let registry = registry_with(config, vec![(1, pair_decl())]);
        let (caller, callee) = resolved_both(&registry, &[ValueTypeId(1)]);
        let builder = ConventionBuilder::new(registry);

        let sig = Signature::new(vec![ParamSpec::value(ValueTypeId(1))], None);
        let plan = builder.build_plan(&sig, &caller, &callee, 0);

        assert!(matches!(plan.args[0], ArgSlot::Boxed(..)));
        // Both sides see the same never-flat layout: no mismatch.
        assert!(plan.adapter.is_none());
    }

    #[test]
    fn test_register_overflow_extends_stack() {
        // Ten i64 leaves against a six-register budget.
        let wide = TypeDecl::new(
            intern("Wide10"),
            (0..10)
                .map(|i| FieldDecl::leaf(intern(&format!("w{}", i)), LeafKind::I64))
                .collect(),
        );
        let config = EngineConfig {
            max_flat_size_bytes: -1,
            ..Default::default()
        };
        let registry = registry_with(config, vec![(1, wide)]);
        let (caller, callee) = resolved_both(&registry, &[ValueTypeId(1)]);
        let builder = ConventionBuilder::new(registry);

        let sig = Signature::new(vec![ParamSpec::value(ValueTypeId(1))], None);
        let plan = builder.build_plan(&sig, &caller, &callee, 0);

        match &plan.args[0] {
            ArgSlot::Scalarized { assignments, .. } => {
                assert_eq!(assignments.len(), 10);
                // First six in registers, last four spilled.
                assert_eq!(assignments[5], Assignment::Int(IntReg::A5));
                assert_eq!(assignments[6], Assignment::Stack(0));
                assert_eq!(assignments[9], Assignment::Stack(3));
            }
            other => panic!("expected scalarized, got {:?}", other),
        }
        assert_eq!(plan.extension, Some(StackExtension { slot_count: 4 }));
    }

    #[test]
    fn test_mixed_int_float_assignment() {
        let mixed = TypeDecl::new(
            intern("Mixed"),
            vec![
                FieldDecl::leaf(intern("i"), LeafKind::I64),
                FieldDecl::leaf(intern("f"), LeafKind::F64),
                FieldDecl::leaf(intern("j"), LeafKind::I32),
            ],
        );
        let registry = registry_with(EngineConfig::default(), vec![(1, mixed)]);
        let (caller, callee) = resolved_both(&registry, &[ValueTypeId(1)]);
        let builder = ConventionBuilder::new(registry);

        let sig = Signature::new(vec![ParamSpec::value(ValueTypeId(1))], None);
        let plan = builder.build_plan(&sig, &caller, &callee, 0);

        match &plan.args[0] {
            ArgSlot::Scalarized { assignments, .. } => {
                assert_eq!(assignments[0], Assignment::Int(IntReg::A0));
                assert_eq!(assignments[1], Assignment::Float(FloatReg::F0));
                assert_eq!(assignments[2], Assignment::Int(IntReg::A1));
            }
            other => panic!("expected scalarized, got {:?}", other),
        }
    }

    #[test]
    fn test_scalarized_return_in_registers() {
        let registry = registry_with(EngineConfig::default(), vec![(1, pair_decl())]);
        let (caller, callee) = resolved_both(&registry, &[ValueTypeId(1)]);
        let builder = ConventionBuilder::new(registry);

        let sig = Signature::new(vec![], Some(ParamSpec::value(ValueTypeId(1))));
        let plan = builder.build_plan(&sig, &caller, &callee, 0);

        match &plan.ret {
            RetSlot::Scalarized { assignments, .. } => {
                assert_eq!(assignments.len(), 2);
            }
            other => panic!("expected scalarized return, got {:?}", other),
        }
    }

    #[test]
    fn test_oversized_return_boxes() {
        let wide = TypeDecl::new(
            intern("Wide10"),
            (0..10)
                .map(|i| FieldDecl::leaf(intern(&format!("w{}", i)), LeafKind::I64))
                .collect(),
        );
        let config = EngineConfig {
            max_flat_size_bytes: -1,
            ..Default::default()
        };
        let registry = registry_with(config, vec![(1, wide)]);
        let (caller, callee) = resolved_both(&registry, &[ValueTypeId(1)]);
        let builder = ConventionBuilder::new(registry);

        let sig = Signature::new(vec![], Some(ParamSpec::value(ValueTypeId(1))));
        let plan = builder.build_plan(&sig, &caller, &callee, 0);
        assert!(matches!(plan.ret, RetSlot::Boxed(..)));
        assert!(plan.adapter.is_none());
    }

    #[test]
    fn test_determinism() {
        let registry = registry_with(EngineConfig::default(), vec![(1, pair_decl())]);
        let (caller, callee) = resolved_both(&registry, &[ValueTypeId(1)]);
        let builder = ConventionBuilder::new(registry);

        let sig = Signature::new(
            vec![
                ParamSpec::primitive(LeafKind::I64),
                ParamSpec::value(ValueTypeId(1)),
                ParamSpec::primitive(LeafKind::F64),
            ],
            Some(ParamSpec::value(ValueTypeId(1))),
        );
        let a = builder.build_plan(&sig, &caller, &callee, 0);
        let b = builder.build_plan(&sig, &caller, &callee, 0);
        assert_eq!(a, b);
    }
}
