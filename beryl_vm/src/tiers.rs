//! Execution tiers.
//!
//! Three tiers execute the engine's operations. The interpreter passes
//! values semantically; the baseline tier physically transports them
//! through a scalar frame per the call-site plan; the optimizing tier
//! does the same and additionally threads buffering-reuse hints. All
//! three consult the same descriptors, plans, and copy protocol, and
//! every operation, including which exception a bad call throws, must
//! be observably identical across them.

use crate::context::EngineContext;
use crate::frame::{ScalarFrame, pack_value, unpack_value};
use beryl_convention::adapter::unpack_argument;
use beryl_convention::{ArgSlot, CallSitePlan, ParamSpec, ParamType, RetSlot, Signature};
use beryl_core::{BerylError, BerylResult, ObjId, Scalar};
use beryl_layout::{FieldPath, PathValue, ValueTypeId};
use beryl_runtime::{ArrayNullness, BufferedInstance, FlatPayload, ValueArray};
use std::cell::RefCell;
use std::sync::Arc;

// =============================================================================
// Tiers
// =============================================================================

/// An execution tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    /// Semantic evaluation, no physical transport.
    Interpreter,
    /// Plan-driven transport, no reuse analysis.
    Baseline,
    /// Plan-driven transport with buffering-reuse hints.
    Optimizing,
}

impl Tier {
    /// All tiers, for cross-tier assertions.
    pub const ALL: [Tier; 3] = [Tier::Interpreter, Tier::Baseline, Tier::Optimizing];
}

// =============================================================================
// Call Values
// =============================================================================

/// A value crossing a call boundary, at the semantic level.
#[derive(Debug, Clone)]
pub enum CallValue {
    /// A primitive leaf.
    Primitive(Scalar),
    /// An inline value, possibly null.
    Value(Option<FlatPayload>),
}

impl CallValue {
    /// The payload, if this is a non-null value.
    pub fn as_payload(&self) -> Option<&FlatPayload> {
        match self {
            CallValue::Value(Some(p)) => Some(p),
            _ => None,
        }
    }

    /// Observable equality: primitives by scalar, values by
    /// substitutability.
    pub fn observably_eq(&self, other: &CallValue) -> bool {
        match (self, other) {
            (CallValue::Primitive(a), CallValue::Primitive(b)) => a == b,
            (CallValue::Value(None), CallValue::Value(None)) => true,
            (CallValue::Value(Some(a)), CallValue::Value(Some(b))) => a.value_eq(b),
            _ => false,
        }
    }
}

/// A callee body: receives the arguments as the callee observes them.
pub type CallBody<'a> =
    &'a dyn Fn(&TierExecutor<'_>, &[CallValue]) -> BerylResult<CallValue>;

// =============================================================================
// Tier Executor
// =============================================================================

/// One tier's view of the shared engine.
pub struct TierExecutor<'e> {
    tier: Tier,
    ctx: &'e EngineContext,
    /// Optimizing-tier hint: the most recent buffering on this path.
    /// Correctness never depends on it; the coordinator re-validates
    /// the snapshot before any reuse.
    reuse_hint: RefCell<Option<BufferedInstance>>,
}

impl<'e> TierExecutor<'e> {
    /// Create an executor for `tier`.
    pub fn new(tier: Tier, ctx: &'e EngineContext) -> Self {
        Self {
            tier,
            ctx,
            reuse_hint: RefCell::new(None),
        }
    }

    /// This executor's tier.
    #[inline]
    pub fn tier(&self) -> Tier {
        self.tier
    }

    /// The shared engine context.
    #[inline]
    pub fn context(&self) -> &EngineContext {
        self.ctx
    }

    // -------------------------------------------------------------------------
    // Value operations
    // -------------------------------------------------------------------------

    /// Construct a value from leaves in descriptor order.
    pub fn construct(&self, id: ValueTypeId, leaves: &[Scalar]) -> BerylResult<FlatPayload> {
        let desc = self.ctx.registry().descriptor(id)?;
        FlatPayload::construct(self.ctx.registry().as_ref(), desc, leaves)
    }

    /// Read a field path.
    pub fn field_get(&self, value: &FlatPayload, path: &FieldPath) -> BerylResult<PathValue> {
        value.read(self.ctx.registry().as_ref(), path)
    }

    /// Write a leaf through a field path.
    pub fn field_set(
        &self,
        value: &mut FlatPayload,
        path: &FieldPath,
        scalar: Scalar,
    ) -> BerylResult<()> {
        value.write(self.ctx.registry().as_ref(), path, scalar)
    }

    /// Give a value identity, with tier-appropriate reuse.
    pub fn buffer(&self, value: &FlatPayload) -> BerylResult<ObjId> {
        let buffered = match self.tier {
            Tier::Optimizing => {
                let hint = self.reuse_hint.borrow().clone();
                let buffered = self.ctx.coordinator().buffer(value, hint.as_ref())?;
                *self.reuse_hint.borrow_mut() = Some(buffered.clone());
                buffered
            }
            _ => self.ctx.coordinator().buffer(value, None)?,
        };
        Ok(buffered.identity())
    }

    /// Forget the buffering hint: control flow merged and dominance can
    /// no longer be proven.
    pub fn clear_reuse_hint(&self) {
        *self.reuse_hint.borrow_mut() = None;
    }

    /// Create a value array.
    pub fn array_new(
        &self,
        id: ValueTypeId,
        len: usize,
        nullness: ArrayNullness,
    ) -> BerylResult<ValueArray> {
        let desc = self.ctx.registry().descriptor(id)?;
        ValueArray::new(
            self.ctx.registry().as_ref(),
            desc,
            len,
            nullness,
            self.ctx.handles(),
            self.ctx.access_stats(),
        )
    }

    /// Read an array element.
    pub fn array_get(&self, array: &ValueArray, index: usize) -> BerylResult<Option<FlatPayload>> {
        array.get_payload(index, self.ctx.handles(), self.ctx.access_stats())
    }

    /// Store into an array element.
    pub fn array_store(
        &self,
        array: &ValueArray,
        index: usize,
        value: Option<&FlatPayload>,
    ) -> BerylResult<()> {
        match array {
            ValueArray::Flat(flat) => match value {
                Some(payload) => flat.store(index, payload, self.ctx.access_stats()),
                None => flat.store_null(index, self.ctx.access_stats()),
            },
            ValueArray::Boxed(boxed) => match value {
                Some(payload) => {
                    let id = self.buffer(payload)?;
                    boxed.store(index, id, self.ctx.handles())
                }
                None => boxed.store_null(index),
            },
        }
    }

    // -------------------------------------------------------------------------
    // Calls
    // -------------------------------------------------------------------------

    /// Invoke `body` through `plan`.
    ///
    /// The interpreter validates and passes values through; compiled
    /// tiers pack the arguments into a scalar frame, poll the safepoint
    /// mid-call, and unpack on the callee side. Results and thrown
    /// errors must not differ between the two paths.
    pub fn invoke(
        &self,
        plan: &CallSitePlan,
        signature: &Signature,
        args: &[CallValue],
        body: CallBody<'_>,
    ) -> BerylResult<CallValue> {
        self.check_args(signature, args)?;

        let result = match self.tier {
            Tier::Interpreter => body(self, args)?,
            Tier::Baseline | Tier::Optimizing => self.invoke_compiled(plan, args, body)?,
        };

        if let Some(ret_spec) = &signature.ret {
            self.check_one(ret_spec, &result).map_err(|err| {
                BerylError::new(err.kind(), format!("return: {}", err.message()))
            })?;
        }
        Ok(result)
    }

    fn invoke_compiled(
        &self,
        plan: &CallSitePlan,
        args: &[CallValue],
        body: CallBody<'_>,
    ) -> BerylResult<CallValue> {
        if plan.args.len() != args.len() {
            return Err(BerylError::invalid(format!(
                "plan expects {} arguments, got {}",
                plan.args.len(),
                args.len()
            )));
        }
        let registry = self.ctx.registry();
        let mut frame = ScalarFrame::new(plan.extension);

        // Pack.
        for (slot, arg) in plan.args.iter().zip(args) {
            match (slot, arg) {
                (ArgSlot::Primitive(_, assignment), CallValue::Primitive(scalar)) => {
                    frame.write(*assignment, scalar.to_transport_word());
                }
                (
                    ArgSlot::Scalarized {
                        type_id,
                        assignments,
                        nested_markers,
                        null_marker,
                    },
                    CallValue::Value(value),
                ) => {
                    let desc = registry.descriptor(*type_id)?;
                    pack_value(
                        &mut frame,
                        &desc,
                        assignments,
                        nested_markers,
                        *null_marker,
                        value.as_ref(),
                    )?;
                }
                (ArgSlot::Boxed(type_id, assignment), CallValue::Value(value)) => {
                    let word = match value {
                        None => 0,
                        Some(payload) => {
                            if payload.descriptor().id != *type_id {
                                return Err(BerylError::class_cast(format!(
                                    "cannot pass {} where {} expected",
                                    payload.descriptor().name,
                                    registry.descriptor(*type_id)?.name
                                )));
                            }
                            self.buffer(payload)?.raw()
                        }
                    };
                    frame.write(*assignment, word);
                }
                (slot, _) => {
                    return Err(BerylError::class_cast(format!(
                        "argument does not match plan slot {:?}",
                        slot
                    )));
                }
            }
        }

        // Any object may move here; everything live is reachable through
        // handles, nothing through a raw address.
        self.ctx.safepoint().poll();

        // Unpack on the callee side.
        let mut callee_args = Vec::with_capacity(plan.args.len());
        for slot in &plan.args {
            let value = match slot {
                ArgSlot::Primitive(kind, assignment) => CallValue::Primitive(
                    Scalar::from_transport_word(*kind, frame.read(*assignment)),
                ),
                ArgSlot::Scalarized {
                    type_id,
                    assignments,
                    nested_markers,
                    null_marker,
                } => {
                    let desc = registry.descriptor(*type_id)?;
                    CallValue::Value(unpack_value(
                        &frame,
                        registry.as_ref(),
                        &desc,
                        assignments,
                        nested_markers,
                        *null_marker,
                    )?)
                }
                ArgSlot::Boxed(type_id, assignment) => {
                    let word = frame.read(*assignment);
                    let reference = (word != 0).then_some(ObjId(word));
                    let desc = registry.descriptor(*type_id)?;
                    // Re-reads through the handle table: the poll above
                    // may have moved the object. Nullness was already
                    // enforced when the argument was packed.
                    CallValue::Value(unpack_argument(
                        self.ctx.handles(),
                        reference,
                        &desc,
                        true,
                    )?)
                }
            };
            callee_args.push(value);
        }

        let result = body(self, &callee_args)?;

        // Transport the return value back.
        match &plan.ret {
            RetSlot::Void => Ok(result),
            RetSlot::Primitive(kind, assignment) => match result {
                CallValue::Primitive(scalar) if scalar.kind() == *kind => {
                    let mut ret_frame = ScalarFrame::new(None);
                    ret_frame.write(*assignment, scalar.to_transport_word());
                    Ok(CallValue::Primitive(Scalar::from_transport_word(
                        *kind,
                        ret_frame.read(*assignment),
                    )))
                }
                other => Err(BerylError::class_cast(format!(
                    "return does not match plan: {:?}",
                    other
                ))),
            },
            RetSlot::Scalarized {
                type_id,
                assignments,
                nested_markers,
                null_marker,
            } => {
                let desc = registry.descriptor(*type_id)?;
                let CallValue::Value(value) = result else {
                    return Err(BerylError::class_cast("primitive returned for value"));
                };
                let mut ret_frame = ScalarFrame::new(None);
                pack_value(
                    &mut ret_frame,
                    &desc,
                    assignments,
                    nested_markers,
                    *null_marker,
                    value.as_ref(),
                )?;
                Ok(CallValue::Value(unpack_value(
                    &ret_frame,
                    registry.as_ref(),
                    &desc,
                    assignments,
                    nested_markers,
                    *null_marker,
                )?))
            }
            RetSlot::Boxed(type_id, _) => {
                let CallValue::Value(value) = result else {
                    return Err(BerylError::class_cast("primitive returned for value"));
                };
                match value {
                    None => Ok(CallValue::Value(None)),
                    Some(payload) => {
                        if payload.descriptor().id != *type_id {
                            return Err(BerylError::class_cast(format!(
                                "cannot return {} where {} expected",
                                payload.descriptor().name,
                                registry.descriptor(*type_id)?.name
                            )));
                        }
                        let id = self.buffer(&payload)?;
                        let boxed = self.ctx.handles().get(id).ok_or_else(|| {
                            BerylError::invalid(format!("dangling handle {}", id))
                        })?;
                        Ok(CallValue::Value(Some(boxed.payload().clone())))
                    }
                }
            }
        }
    }

    // -------------------------------------------------------------------------
    // Validation
    // -------------------------------------------------------------------------

    /// Signature checks shared by every tier, so every tier throws the
    /// same errors for the same bad call.
    fn check_args(&self, signature: &Signature, args: &[CallValue]) -> BerylResult<()> {
        if signature.params.len() != args.len() {
            return Err(BerylError::invalid(format!(
                "signature expects {} arguments, got {}",
                signature.params.len(),
                args.len()
            )));
        }
        for (spec, arg) in signature.params.iter().zip(args) {
            self.check_one(spec, arg)?;
        }
        Ok(())
    }

    fn check_one(&self, spec: &ParamSpec, value: &CallValue) -> BerylResult<()> {
        match (spec.ty, value) {
            (ParamType::Primitive(kind), CallValue::Primitive(scalar)) => {
                if scalar.kind() == kind {
                    Ok(())
                } else {
                    Err(BerylError::class_cast(format!(
                        "expected {}, got {}",
                        kind,
                        scalar.kind()
                    )))
                }
            }
            (ParamType::Value(id), CallValue::Value(Some(payload))) => {
                if payload.descriptor().id == id {
                    Ok(())
                } else {
                    Err(BerylError::class_cast(format!(
                        "expected {}, got {}",
                        id,
                        payload.descriptor().id
                    )))
                }
            }
            (ParamType::Value(id), CallValue::Value(None)) => {
                if spec.nullable {
                    Ok(())
                } else {
                    Err(BerylError::null_restriction(format!(
                        "null passed for null-restricted {} position",
                        id
                    )))
                }
            }
            _ => Err(BerylError::class_cast("value/primitive mismatch")),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use beryl_convention::{ConventionBuilder, SideView};
    use beryl_core::intern::intern;
    use beryl_core::{EngineConfig, ErrorKind, LeafKind};
    use beryl_layout::{FieldDecl, TypeDecl};

    fn setup() -> (EngineContext, CallSitePlan, Signature) {
        let ctx = EngineContext::new(EngineConfig::default());
        ctx.registry()
            .declare(
                ValueTypeId(1),
                TypeDecl::new(
                    intern("Pair"),
                    vec![
                        FieldDecl::leaf(intern("x"), LeafKind::I32),
                        FieldDecl::leaf(intern("y"), LeafKind::I32),
                    ],
                ),
            )
            .unwrap();
        ctx.registry().resolve(ValueTypeId(1)).unwrap();

        let view = SideView::with(&[ValueTypeId(1)]);
        let builder = ConventionBuilder::new(Arc::clone(ctx.registry()));
        let signature = Signature::new(
            vec![ParamSpec::value(ValueTypeId(1))],
            Some(ParamSpec::value(ValueTypeId(1))),
        );
        let plan = builder.build_plan(&signature, &view, &view, 0);
        (ctx, plan, signature)
    }

    /// Swap the pair's fields, constructing a new value in the callee.
    fn swap_body(
        executor: &TierExecutor<'_>,
        args: &[CallValue],
    ) -> BerylResult<CallValue> {
        let payload = args[0].as_payload().expect("non-null pair");
        let x = payload.read_leaf(0)?;
        let y = payload.read_leaf(1)?;
        let swapped = executor.construct(ValueTypeId(1), &[y, x])?;
        Ok(CallValue::Value(Some(swapped)))
    }

    #[test]
    fn test_all_tiers_agree_on_result() {
        let (ctx, plan, signature) = setup();
        let mut results = Vec::new();
        for tier in Tier::ALL {
            let executor = TierExecutor::new(tier, &ctx);
            let arg = executor
                .construct(ValueTypeId(1), &[Scalar::I32(3), Scalar::I32(4)])
                .unwrap();
            let out = executor
                .invoke(
                    &plan,
                    &signature,
                    &[CallValue::Value(Some(arg))],
                    &swap_body,
                )
                .unwrap();
            results.push(out);
        }
        assert!(results[0].observably_eq(&results[1]));
        assert!(results[1].observably_eq(&results[2]));
    }

    #[test]
    fn test_all_tiers_agree_on_null_restriction() {
        let (ctx, plan, signature) = setup();
        for tier in Tier::ALL {
            let executor = TierExecutor::new(tier, &ctx);
            let err = executor
                .invoke(&plan, &signature, &[CallValue::Value(None)], &swap_body)
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::NullRestriction, "{:?}", tier);
        }
    }

    #[test]
    fn test_all_tiers_agree_on_class_cast() {
        let (ctx, plan, signature) = setup();
        ctx.registry()
            .declare(
                ValueTypeId(2),
                TypeDecl::new(
                    intern("Other"),
                    vec![FieldDecl::leaf(intern("v"), LeafKind::I64)],
                ),
            )
            .unwrap();
        ctx.registry().resolve(ValueTypeId(2)).unwrap();

        for tier in Tier::ALL {
            let executor = TierExecutor::new(tier, &ctx);
            let wrong = executor
                .construct(ValueTypeId(2), &[Scalar::I64(1)])
                .unwrap();
            let err = executor
                .invoke(
                    &plan,
                    &signature,
                    &[CallValue::Value(Some(wrong))],
                    &swap_body,
                )
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::ClassCast, "{:?}", tier);
        }
    }

    #[test]
    fn test_relocation_during_call_is_transparent() {
        let (ctx, _plan, _signature) = setup();
        // Boxed transport forces the callee to go through the handle
        // table after the mid-call poll.
        let view = SideView::with(&[ValueTypeId(1)]);
        let builder = ConventionBuilder::new(Arc::clone(ctx.registry()));
        let signature = Signature::new(
            vec![ParamSpec::value(ValueTypeId(1))],
            Some(ParamSpec::value(ValueTypeId(1))),
        );
        // Callee never resolved the type: boxed convention with adapter.
        let plan = builder.build_plan(&signature, &view, &SideView::new(), 0);
        assert!(!plan.args[0].is_scalarized());

        let executor = TierExecutor::new(Tier::Baseline, &ctx);
        let arg = executor
            .construct(ValueTypeId(1), &[Scalar::I32(7), Scalar::I32(8)])
            .unwrap();
        ctx.safepoint().request_relocation();
        let out = executor
            .invoke(
                &plan,
                &signature,
                &[CallValue::Value(Some(arg.clone()))],
                &swap_body,
            )
            .unwrap();

        assert_eq!(ctx.handles().relocation_count(), 1);
        let expected = executor
            .construct(ValueTypeId(1), &[Scalar::I32(8), Scalar::I32(7)])
            .unwrap();
        assert!(out.observably_eq(&CallValue::Value(Some(expected))));
    }

    #[test]
    fn test_optimizing_tier_reuses_buffered_identity() {
        let (ctx, _, _) = setup();
        let executor = TierExecutor::new(Tier::Optimizing, &ctx);
        let value = executor
            .construct(ValueTypeId(1), &[Scalar::I32(1), Scalar::I32(2)])
            .unwrap();

        let a = executor.buffer(&value).unwrap();
        let b = executor.buffer(&value).unwrap();
        assert_eq!(a, b);
        assert_eq!(ctx.coordinator().stats().snapshot().allocated, 1);

        // After a merge, dominance is unprovable: fresh allocation.
        executor.clear_reuse_hint();
        let c = executor.buffer(&value).unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn test_baseline_tier_always_allocates() {
        let (ctx, _, _) = setup();
        let executor = TierExecutor::new(Tier::Baseline, &ctx);
        let value = executor
            .construct(ValueTypeId(1), &[Scalar::I32(1), Scalar::I32(2)])
            .unwrap();
        let a = executor.buffer(&value).unwrap();
        let b = executor.buffer(&value).unwrap();
        assert_ne!(a, b);
    }
}
