//! Flat payload storage.
//!
//! A `FlatPayload` owns the byte image of one flat value: data leaves,
//! padding, and null-marker bytes, laid out exactly as the descriptor
//! planned. Payloads are canonical: construction zero-fills, leaf writes
//! touch only their own extent, and nulling a nested field zeroes its
//! whole region, so padding bytes are always zero and byte equality
//! coincides with field-for-field substitutability equality.

use beryl_core::{BerylError, BerylResult, Scalar};
use beryl_layout::{
    DescriptorSource, FieldPath, PathValue, ValueTypeDescriptor, null_marker,
};
use std::sync::Arc;

/// The byte image of one flat value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlatPayload {
    desc: Arc<ValueTypeDescriptor>,
    bytes: Box<[u8]>,
}

impl FlatPayload {
    /// All-zero payload: the default value in null-restricted contexts,
    /// logical null in nullable ones.
    pub fn zeroed(desc: Arc<ValueTypeDescriptor>) -> Self {
        let bytes = vec![0u8; desc.payload_size as usize].into_boxed_slice();
        Self { desc, bytes }
    }

    /// Construct a non-null value from leaves in descriptor order.
    ///
    /// Marks every nullable level present; this is the engine's
    /// constructor path, also used when re-packing a scalarized value.
    pub fn construct(
        source: &dyn DescriptorSource,
        desc: Arc<ValueTypeDescriptor>,
        leaves: &[Scalar],
    ) -> BerylResult<Self> {
        if leaves.len() != desc.leaves.len() {
            return Err(BerylError::invalid(format!(
                "{} expects {} leaves, got {}",
                desc.name,
                desc.leaves.len(),
                leaves.len()
            )));
        }
        let mut payload = Self::zeroed(Arc::clone(&desc));
        for (slot, value) in desc.leaves.iter().zip(leaves) {
            if slot.kind != value.kind() {
                return Err(BerylError::class_cast(format!(
                    "leaf of {} expects {}, got {}",
                    desc.name,
                    slot.kind,
                    value.kind()
                )));
            }
            value.write_to(&mut payload.bytes, slot.offset);
        }
        null_marker::mark_all_present(source, &desc, &mut payload.bytes)?;
        Ok(payload)
    }

    /// Adopt raw bytes previously produced for the same descriptor.
    pub fn from_bytes(desc: Arc<ValueTypeDescriptor>, bytes: Box<[u8]>) -> BerylResult<Self> {
        if bytes.len() != desc.payload_size as usize {
            return Err(BerylError::class_cast(format!(
                "{} bytes do not fit {} ({} expected)",
                bytes.len(),
                desc.name,
                desc.payload_size
            )));
        }
        Ok(Self { desc, bytes })
    }

    /// The payload's descriptor.
    #[inline]
    pub fn descriptor(&self) -> &Arc<ValueTypeDescriptor> {
        &self.desc
    }

    /// Raw payload bytes.
    #[inline]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Mutable raw payload bytes.
    #[inline]
    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    /// Byte-exact copy of the payload.
    #[inline]
    pub fn snapshot(&self) -> Box<[u8]> {
        self.bytes.clone()
    }

    /// Read the data leaf at `index` (descriptor leaf order).
    pub fn read_leaf(&self, index: usize) -> BerylResult<Scalar> {
        let slot = self.desc.leaves.get(index).ok_or_else(|| {
            BerylError::field_missing(format!("{} has no leaf {}", self.desc.name, index))
        })?;
        Ok(Scalar::read_from(&self.bytes, slot.offset, slot.kind))
    }

    /// Write the data leaf at `index` (descriptor leaf order).
    pub fn write_leaf(&mut self, index: usize, value: Scalar) -> BerylResult<()> {
        let slot = self.desc.leaves.get(index).ok_or_else(|| {
            BerylError::field_missing(format!("{} has no leaf {}", self.desc.name, index))
        })?;
        if slot.kind != value.kind() {
            return Err(BerylError::class_cast(format!(
                "leaf {} of {} expects {}, got {}",
                index,
                self.desc.name,
                slot.kind,
                value.kind()
            )));
        }
        value.write_to(&mut self.bytes, slot.offset);
        Ok(())
    }

    /// All data leaves in descriptor order.
    pub fn leaves(&self) -> Vec<Scalar> {
        self.desc
            .leaves
            .iter()
            .map(|slot| Scalar::read_from(&self.bytes, slot.offset, slot.kind))
            .collect()
    }

    /// Read through a field path, consulting null markers.
    pub fn read(&self, source: &dyn DescriptorSource, path: &FieldPath) -> BerylResult<PathValue> {
        null_marker::read_path(source, &self.desc, &self.bytes, path)
    }

    /// Write a leaf scalar through a field path.
    pub fn write(
        &mut self,
        source: &dyn DescriptorSource,
        path: &FieldPath,
        value: Scalar,
    ) -> BerylResult<()> {
        null_marker::write_path(source, &self.desc, &mut self.bytes, path, value)
    }

    /// Null out a nullable nested flat field.
    pub fn write_null(&mut self, source: &dyn DescriptorSource, path: &FieldPath) -> BerylResult<()> {
        null_marker::write_flat_null(source, &self.desc, &mut self.bytes, path)
    }

    /// Assign a nested flat field from another payload of the field's type.
    pub fn write_nested(
        &mut self,
        source: &dyn DescriptorSource,
        path: &FieldPath,
        nested: &FlatPayload,
    ) -> BerylResult<()> {
        null_marker::write_flat_value(source, &self.desc, &mut self.bytes, path, nested.bytes())
    }

    /// Whether this payload reads as logical null in a nullable context.
    ///
    /// Only meaningful for descriptors carrying a null marker.
    pub fn is_logically_null(&self) -> bool {
        match self.desc.null_marker {
            Some(offset) => !null_marker::read_marker(&self.bytes, offset),
            None => false,
        }
    }

    /// Substitutability equality: same type, same field values.
    ///
    /// Payload bytes are canonical (see module docs), so this is byte
    /// equality after a descriptor check. References compare by handle,
    /// floats by bit pattern, exactly as substitutability requires.
    pub fn value_eq(&self, other: &FlatPayload) -> bool {
        self.desc.id == other.desc.id && self.bytes == other.bytes
    }
}

// =============================================================================
// Tests
// =============================================================================
