//! Deopt reconstruction: the interpreter resumes with exactly the state
//! an un-deoptimized continuation would have computed.

use std::sync::Arc;

use beryl_core::intern::intern;
use beryl_core::{EngineConfig, LeafKind, Scalar};
use beryl_layout::{DeclFlags, FieldDecl, TypeDecl, ValueTypeId};
use beryl_runtime::{ArrayNullness, BoxedValue, FlatArray, FlatPayload};
use beryl_vm::{
    DeoptMaterializer, DeoptReason, DeoptSnapshot, EngineContext, Materialized, SnapshotValue,
};

const PAIR: ValueTypeId = ValueTypeId(1);

fn engine() -> EngineContext {
    let ctx = EngineContext::new(EngineConfig {
        max_flat_size_bytes: -1,
        ..Default::default()
    });
    ctx.registry()
        .declare(
            PAIR,
            TypeDecl::new(
                intern("Pair"),
                vec![
                    FieldDecl::leaf(intern("x"), LeafKind::I32),
                    FieldDecl::leaf(intern("y"), LeafKind::I32),
                ],
            )
            .with_flags(DeclFlags::NULLABLE_USE),
        )
        .unwrap();
    ctx.registry().resolve(PAIR).unwrap();
    ctx
}

fn pair(ctx: &EngineContext, x: i32, y: i32) -> FlatPayload {
    let desc = ctx.registry().descriptor(PAIR).unwrap();
    FlatPayload::construct(
        ctx.registry().as_ref(),
        desc,
        &[Scalar::I32(x), Scalar::I32(y)],
    )
    .unwrap()
}

/// Trap with a nullable flat array of `n` elements live (odd indices
/// null) and check the interpreter sees exactly what the continuation
/// would have.
#[test]
fn flattened_array_reconstructs_for_small_lengths() {
    for n in 0..=3usize {
        let ctx = engine();
        let desc = ctx.registry().descriptor(PAIR).unwrap();
        let array = FlatArray::new(
            ctx.registry().as_ref(),
            Arc::clone(&desc),
            n,
            ArrayNullness::Nullable,
            ctx.access_stats(),
        )
        .unwrap();
        for i in (0..n).step_by(2) {
            array
                .store(i, &pair(&ctx, i as i32, i as i32 * 10), ctx.access_stats())
                .unwrap();
        }

        // The compiled frame holds each element scalarized; the trap
        // snapshots them all.
        let mut snapshot = DeoptSnapshot::new(DeoptReason::UncommonTrap, 17);
        for i in 0..n {
            match array.get(i, ctx.access_stats()).unwrap() {
                Some(payload) => snapshot.record(SnapshotValue::flat(&payload, None)),
                None => snapshot.record(SnapshotValue::flat_null(PAIR)),
            }
        }

        let materializer = DeoptMaterializer::new(&ctx);
        let rebuilt = materializer.materialize(snapshot).unwrap();
        assert_eq!(rebuilt.len(), n, "length {}", n);

        // The continuation's view: the array itself.
        for i in 0..n {
            let expected = array.get(i, ctx.access_stats()).unwrap();
            match (expected, rebuilt[i]) {
                (None, Materialized::Ref(None)) => {}
                (Some(payload), Materialized::Ref(Some(id))) => {
                    let boxed = ctx.handles().get(id).unwrap();
                    assert!(
                        boxed.payload().value_eq(&payload),
                        "element {} of length-{} array diverged",
                        i,
                        n
                    );
                }
                (expected, got) => {
                    panic!("element {}: expected {:?}, got {:?}", i, expected, got)
                }
            }
        }
    }
}

/// A value loaded from the heap and never mutated keeps its identity
/// through the deopt instead of being duplicated.
#[test]
fn heap_loaded_value_keeps_identity_through_deopt() {
    let ctx = engine();
    let value = pair(&ctx, 7, 8);
    let origin = ctx.handles().allocate(BoxedValue::new(value.clone()));

    let mut snapshot = DeoptSnapshot::new(DeoptReason::TypeGuard, 3);
    snapshot.record(SnapshotValue::flat(&value, Some(origin)));
    snapshot.record(SnapshotValue::Primitive(Scalar::I64(11)));

    let materializer = DeoptMaterializer::new(&ctx);
    let rebuilt = materializer.materialize(snapshot).unwrap();

    assert_eq!(rebuilt[0], Materialized::Ref(Some(origin)));
    assert_eq!(rebuilt[1], Materialized::Primitive(Scalar::I64(11)));
    // No duplicate allocation happened.
    assert_eq!(ctx.handles().len(), 1);
}

/// A trap during a private-buffer window rolls back; the interpreter
/// resumes from the pre-buffer state with nothing leaked.
#[test]
fn trap_mid_buffer_window_rolls_back_cleanly() {
    let ctx = engine();
    let desc = ctx.registry().descriptor(PAIR).unwrap();
    let materializer = DeoptMaterializer::new(&ctx);

    // Pre-buffer state: one live primitive.
    let mut snapshot = DeoptSnapshot::new(DeoptReason::UncommonTrap, 5);
    snapshot.record(SnapshotValue::Primitive(Scalar::I64(1)));

    let mut handle = ctx
        .coordinator()
        .begin_private(ctx.registry().as_ref(), desc)
        .unwrap();
    handle.set_leaf(0, Scalar::I32(42)).unwrap();
    // Trap fires here, mid-window.
    materializer.rollback_private(handle);
    let rebuilt = materializer.materialize(snapshot).unwrap();

    assert_eq!(rebuilt, vec![Materialized::Primitive(Scalar::I64(1))]);
    assert!(ctx.handles().is_empty(), "half-finished buffer escaped");
    assert_eq!(materializer.stats().snapshot().buffers_rolled_back, 1);
}
