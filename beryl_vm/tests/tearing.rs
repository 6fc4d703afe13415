//! Concurrency properties: no torn reads, safe publication.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use beryl_core::intern::intern;
use beryl_core::{EngineConfig, LeafKind, Scalar};
use beryl_layout::{DeclFlags, FieldDecl, TypeDecl, ValueTypeId};
use beryl_runtime::{
    AccessStats, ArrayNullness, FlatArray, FlatPayload, acquire_fence, publish_fence,
};
use beryl_vm::EngineContext;

const PAIR: ValueTypeId = ValueTypeId(1);

/// Two i64 fields that every writer keeps equal; a torn read would
/// observe them different.
fn engine() -> EngineContext {
    let ctx = EngineContext::new(EngineConfig {
        max_flat_size_bytes: -1,
        ..Default::default()
    });
    ctx.registry()
        .declare(
            PAIR,
            TypeDecl::new(
                intern("Mirror"),
                vec![
                    FieldDecl::leaf(intern("x"), LeafKind::I64),
                    FieldDecl::leaf(intern("y"), LeafKind::I64),
                ],
            )
            .with_flags(DeclFlags::NULLABLE_USE | DeclFlags::ATOMIC_USE),
        )
        .unwrap();
    ctx.registry().resolve(PAIR).unwrap();
    ctx
}

fn mirror(ctx: &EngineContext, v: i64) -> FlatPayload {
    let desc = ctx.registry().descriptor(PAIR).unwrap();
    FlatPayload::construct(
        ctx.registry().as_ref(),
        desc,
        &[Scalar::I64(v), Scalar::I64(v)],
    )
    .unwrap()
}

fn mirror_fields(payload: &FlatPayload) -> (i64, i64) {
    let Scalar::I64(x) = payload.read_leaf(0).unwrap() else {
        unreachable!()
    };
    let Scalar::I64(y) = payload.read_leaf(1).unwrap() else {
        unreachable!()
    };
    (x, y)
}

// =============================================================================
// No Tearing
// =============================================================================

#[test]
fn concurrent_element_traffic_never_tears() {
    const PAIRS: usize = 2;
    const READS_PER_PAIR: usize = 1_000_000;

    let ctx = Arc::new(engine());
    let desc = ctx.registry().descriptor(PAIR).unwrap();
    let stats = Arc::new(AccessStats::new());
    let array = Arc::new(
        FlatArray::new(
            ctx.registry().as_ref(),
            desc,
            PAIRS,
            ArrayNullness::NullRestricted,
            &stats,
        )
        .unwrap(),
    );
    let stop = Arc::new(AtomicBool::new(false));

    // One plain-store writer and one private-buffer writer, so both
    // update paths face the readers.
    let writers: Vec<_> = (0..PAIRS)
        .map(|slot| {
            let ctx = Arc::clone(&ctx);
            let array = Arc::clone(&array);
            let stats = Arc::clone(&stats);
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                let mut i: i64 = 1;
                while !stop.load(Ordering::Relaxed) {
                    // The second slot takes the private-buffer update path
                    // periodically; each finish allocates, so not every
                    // iteration.
                    let value = if slot == 0 || i % 1024 != 0 {
                        mirror(&ctx, i)
                    } else {
                        // Private-buffer path: patch fields one by one,
                        // publish at finish.
                        let desc = ctx.registry().descriptor(PAIR).unwrap();
                        let mut handle = ctx
                            .coordinator()
                            .begin_private(ctx.registry().as_ref(), desc)
                            .unwrap();
                        handle.set_leaf(0, Scalar::I64(i)).unwrap();
                        handle.set_leaf(1, Scalar::I64(i)).unwrap();
                        let buffered = ctx.coordinator().finish_private(handle).unwrap();
                        ctx.handles()
                            .get(buffered.identity())
                            .unwrap()
                            .payload()
                            .clone()
                    };
                    array.store(slot, &value, &stats).unwrap();
                    i = i.wrapping_add(1);
                }
            })
        })
        .collect();

    let readers: Vec<_> = (0..PAIRS)
        .map(|slot| {
            let array = Arc::clone(&array);
            let stats = Arc::clone(&stats);
            thread::spawn(move || {
                for _ in 0..READS_PER_PAIR {
                    let payload = array.get(slot, &stats).unwrap().unwrap();
                    let (x, y) = mirror_fields(&payload);
                    assert_eq!(x, y, "torn read observed in slot {}", slot);
                }
            })
        })
        .collect();

    for reader in readers {
        reader.join().unwrap();
    }
    stop.store(true, Ordering::Relaxed);
    for writer in writers {
        writer.join().unwrap();
    }
}

// =============================================================================
// Publication
// =============================================================================

#[test]
fn volatile_style_publication_shows_initialized_elements() {
    let ctx = engine();
    let desc = ctx.registry().descriptor(PAIR).unwrap();
    let stats = Arc::new(AccessStats::new());

    for round in 0..100 {
        let array = FlatArray::new(
            ctx.registry().as_ref(),
            Arc::clone(&desc),
            4,
            ArrayNullness::NullRestricted,
            &stats,
        )
        .unwrap();
        for i in 0..4 {
            array.store(i, &mirror(&ctx, round + 1), &stats).unwrap();
        }
        // Publish through a shared reference with a release fence, as a
        // volatile store would.
        publish_fence();
        let shared = Arc::new(array);

        let reader = {
            let shared = Arc::clone(&shared);
            let stats = Arc::clone(&stats);
            thread::spawn(move || {
                acquire_fence();
                for i in 0..4 {
                    let payload = shared.get(i, &stats).unwrap().unwrap();
                    let (x, y) = mirror_fields(&payload);
                    assert_eq!(x, y);
                    assert_ne!(x, 0, "observed uninitialized element");
                }
            })
        };
        reader.join().unwrap();
    }
}
