//! Boundary adapters for mismatched call sites.
//!
//! When a plan carries an adapter, the boundary converts between the
//! scalarized and boxed forms instead of corrupting either: the
//! optimistic side's flat values buffer into boxes, and boxed arguments
//! unpack into leaves for a callee that expects them flat. Conversion
//! preserves the exceptions a fully boxed call would throw: null into a
//! null-restricted position, wrong dynamic type, dangling reference.

use beryl_core::{BerylError, BerylResult, ObjId};
use beryl_layout::ValueTypeDescriptor;
use beryl_runtime::{BufferingCoordinator, FlatPayload, HandleTable};
use std::sync::Arc;

/// Box a scalarized value at the call boundary.
///
/// No dominance is threaded: the adapter sits on the slow path of a
/// mismatched call, so a fresh allocation per call is the expected cost.
pub fn buffer_argument(
    coordinator: &BufferingCoordinator,
    payload: &FlatPayload,
) -> BerylResult<ObjId> {
    Ok(coordinator.buffer(payload, None)?.identity())
}

/// Unpack a boxed argument into the flat form the callee expects.
pub fn unpack_argument(
    handles: &HandleTable,
    reference: Option<ObjId>,
    expected: &Arc<ValueTypeDescriptor>,
    nullable: bool,
) -> BerylResult<Option<FlatPayload>> {
    let id = match reference {
        None if nullable => return Ok(None),
        None => {
            return Err(BerylError::null_restriction(format!(
                "null passed for null-restricted {} parameter",
                expected.name
            )));
        }
        Some(id) => id,
    };
    let boxed = handles
        .get(id)
        .ok_or_else(|| BerylError::invalid(format!("dangling handle {}", id)))?;
    if boxed.type_id() != expected.id {
        return Err(BerylError::class_cast(format!(
            "{} passed where {} expected",
            boxed.descriptor().name,
            expected.name
        )));
    }
    Ok(Some(boxed.payload().clone()))
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use beryl_core::intern::intern;
    use beryl_core::{EngineConfig, ErrorKind, LeafKind, Scalar};
    use beryl_layout::{FieldDecl, LayoutRegistry, TypeDecl, ValueTypeId};

    fn setup() -> (LayoutRegistry, BufferingCoordinator) {
        let registry = LayoutRegistry::new(EngineConfig::default());
        registry
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
        registry
            .declare(
                ValueTypeId(2),
                TypeDecl::new(
                    intern("Other"),
                    vec![FieldDecl::leaf(intern("v"), LeafKind::I64)],
                ),
            )
            .unwrap();
        registry.resolve(ValueTypeId(1)).unwrap();
        registry.resolve(ValueTypeId(2)).unwrap();
        let coordinator =
            BufferingCoordinator::new(Arc::new(beryl_runtime::HandleTable::new()));
        (registry, coordinator)
    }

    #[test]
    fn test_buffer_then_unpack_roundtrip() {
        let (registry, coordinator) = setup();
        let desc = registry.descriptor(ValueTypeId(1)).unwrap();
        let payload = FlatPayload::construct(
            &registry,
            Arc::clone(&desc),
            &[Scalar::I32(3), Scalar::I32(4)],
        )
        .unwrap();

        let id = buffer_argument(&coordinator, &payload).unwrap();
        let unpacked = unpack_argument(coordinator.handles(), Some(id), &desc, false)
            .unwrap()
            .unwrap();
        assert!(unpacked.value_eq(&payload));
    }

    #[test]
    fn test_null_into_restricted_position() {
        let (registry, coordinator) = setup();
        let desc = registry.descriptor(ValueTypeId(1)).unwrap();
        let err = unpack_argument(coordinator.handles(), None, &desc, false).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NullRestriction);
    }

    #[test]
    fn test_null_into_nullable_position() {
        let (registry, coordinator) = setup();
        let desc = registry.descriptor(ValueTypeId(1)).unwrap();
        let out = unpack_argument(coordinator.handles(), None, &desc, true).unwrap();
        assert!(out.is_none());
    }

    #[test]
    fn test_wrong_type_is_class_cast() {
        let (registry, coordinator) = setup();
        let pair_desc = registry.descriptor(ValueTypeId(1)).unwrap();
        let other_desc = registry.descriptor(ValueTypeId(2)).unwrap();
        let payload =
            FlatPayload::construct(&registry, other_desc, &[Scalar::I64(9)]).unwrap();
        let id = buffer_argument(&coordinator, &payload).unwrap();

        let err = unpack_argument(coordinator.handles(), Some(id), &pair_desc, false)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ClassCast);
    }
}
