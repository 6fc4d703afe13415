//! Boxed instances of inline values.
//!
//! A `BoxedValue` is a flat payload that has acquired heap identity: it
//! lives behind a handle and can be stored wherever an object reference
//! is expected. Boxed instances are immutable after publication; the only
//! mutable window is the private buffer (see `buffer`), which ends before
//! the handle exists.

use crate::payload::FlatPayload;
use beryl_core::{BerylError, BerylResult, ObjId};
use beryl_layout::{ValueTypeDescriptor, ValueTypeId};
use std::sync::Arc;

/// An inline value with heap identity.
#[derive(Debug, Clone)]
pub struct BoxedValue {
    payload: FlatPayload,
}

impl BoxedValue {
    /// Box a payload.
    pub fn new(payload: FlatPayload) -> Self {
        Self { payload }
    }

    /// The value's descriptor.
    #[inline]
    pub fn descriptor(&self) -> &Arc<ValueTypeDescriptor> {
        self.payload.descriptor()
    }

    /// The value's type id.
    #[inline]
    pub fn type_id(&self) -> ValueTypeId {
        self.payload.descriptor().id
    }

    /// The boxed payload.
    #[inline]
    pub fn payload(&self) -> &FlatPayload {
        &self.payload
    }

    /// Substitutability equality: same type, same field values.
    ///
    /// Two distinct boxed instances of the same value compare equal; the
    /// empty type compares equal without inspecting any payload byte.
    pub fn value_eq(&self, other: &BoxedValue) -> bool {
        self.payload.value_eq(&other.payload)
    }

    /// Identity-based clone, which inline types do not support.
    ///
    /// Mirrors how a non-cloneable object behaves: the attempt itself is
    /// the error, regardless of field content.
    pub fn clone_identity(&self) -> BerylResult<ObjId> {
        Err(BerylError::clone_unsupported(format!(
            "{} is an inline type and has no cloneable identity",
            self.descriptor().name
        )))
    }
}

// =============================================================================
// Tests
// =============================================================================
