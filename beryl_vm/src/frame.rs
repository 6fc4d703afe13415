//! Scalar frames: the physical transport for scalarized calls.
//!
//! A frame models the callee-visible register file plus the
//! stack-extension area that overflow leaves spill into. The frame link
//! is stored apart from the addressable registers and slots: no
//! `Assignment` can name it, so argument transport cannot clobber it no
//! matter how large the extension grows, and the epilogue always
//! restores the link the collector last observed.

use beryl_convention::{Assignment, IntReg, StackExtension};
use beryl_core::{BerylError, BerylResult, Scalar};
use beryl_layout::{DescriptorSource, ValueTypeDescriptor, null_marker};
use beryl_runtime::FlatPayload;
use std::sync::Arc;

/// One call's register file and stack extension.
#[derive(Debug, Clone)]
pub struct ScalarFrame {
    int_regs: [u64; 8],
    float_regs: [u64; 8],
    stack: Vec<u64>,
    link: u64,
}

impl ScalarFrame {
    /// Create a frame with room for `extension`.
    pub fn new(extension: Option<StackExtension>) -> Self {
        let slots = extension.map_or(0, |e| e.slot_count as usize);
        Self {
            int_regs: [0; 8],
            float_regs: [0; 8],
            stack: vec![0; slots],
            link: 0,
        }
    }

    /// Write a transported word.
    ///
    /// # Panics
    /// Panics on an assignment naming the frame link or an out-of-range
    /// extension slot; plans never produce either, so both are engine
    /// bugs rather than program errors.
    pub fn write(&mut self, assignment: Assignment, word: u64) {
        match assignment {
            Assignment::Int(reg) => {
                assert!(reg.is_allocatable(), "frame link is not a data register");
                self.int_regs[reg.encoding() as usize] = word;
            }
            Assignment::Float(reg) => {
                self.float_regs[reg.encoding() as usize] = word;
            }
            Assignment::Stack(slot) => {
                self.stack[slot as usize] = word;
            }
        }
    }

    /// Read a transported word.
    pub fn read(&self, assignment: Assignment) -> u64 {
        match assignment {
            Assignment::Int(reg) => {
                assert!(reg.is_allocatable(), "frame link is not a data register");
                self.int_regs[reg.encoding() as usize]
            }
            Assignment::Float(reg) => self.float_regs[reg.encoding() as usize],
            Assignment::Stack(slot) => self.stack[slot as usize],
        }
    }

    /// Save the frame link.
    pub fn set_link(&mut self, link: u64) {
        self.link = link;
    }

    /// The saved frame link.
    pub fn link(&self) -> u64 {
        self.link
    }
}

// =============================================================================
// Value Transport
// =============================================================================

/// Pack a value (or null) into the frame per its scalarized slots.
pub fn pack_value(
    frame: &mut ScalarFrame,
    desc: &ValueTypeDescriptor,
    assignments: &[Assignment],
    nested_markers: &[Assignment],
    null_marker: Option<Assignment>,
    value: Option<&FlatPayload>,
) -> BerylResult<()> {
    match value {
        Some(payload) => {
            if payload.descriptor().id != desc.id {
                return Err(BerylError::class_cast(format!(
                    "cannot pass {} where {} expected",
                    payload.descriptor().name,
                    desc.name
                )));
            }
            for (slot, assignment) in desc.leaves.iter().zip(assignments) {
                let scalar = Scalar::read_from(payload.bytes(), slot.offset, slot.kind);
                frame.write(*assignment, scalar.to_transport_word());
            }
            for (&offset, assignment) in desc.marker_slots.iter().zip(nested_markers) {
                let present = null_marker::read_marker(payload.bytes(), offset);
                frame.write(*assignment, present as u64);
            }
            if let Some(marker) = null_marker {
                frame.write(marker, 1);
            }
            Ok(())
        }
        None => {
            let marker = null_marker.ok_or_else(|| {
                BerylError::null_restriction(format!(
                    "null passed for null-restricted {} value",
                    desc.name
                ))
            })?;
            frame.write(marker, 0);
            for assignment in assignments {
                frame.write(*assignment, 0);
            }
            for assignment in nested_markers {
                frame.write(*assignment, 0);
            }
            Ok(())
        }
    }
}

/// Unpack a value (or null) from the frame.
///
/// Reconstruction is leaf-by-leaf followed by marker restoration; no
/// constructor runs. Nested null levels come back exactly as sent
/// because their markers traveled in their own slots.
pub fn unpack_value(
    frame: &ScalarFrame,
    source: &dyn DescriptorSource,
    desc: &Arc<ValueTypeDescriptor>,
    assignments: &[Assignment],
    nested_markers: &[Assignment],
    null_marker: Option<Assignment>,
) -> BerylResult<Option<FlatPayload>> {
    if let Some(marker) = null_marker {
        if frame.read(marker) == 0 {
            return Ok(None);
        }
    }
    let leaves: Vec<Scalar> = desc
        .leaves
        .iter()
        .zip(assignments)
        .map(|(slot, assignment)| {
            Scalar::from_transport_word(slot.kind, frame.read(*assignment))
        })
        .collect();
    let mut payload = FlatPayload::construct(source, Arc::clone(desc), &leaves)?;
    for (&offset, assignment) in desc.marker_slots.iter().zip(nested_markers) {
        let present = frame.read(*assignment) != 0;
        null_marker::write_marker(payload.bytes_mut(), offset, present);
    }
    Ok(Some(payload))
}

/// Restore the allocatable scratch state after unpacking.
///
/// The epilogue contract: the frame link is returned exactly as saved,
/// never reconstructed from a data register or extension slot.
pub fn restore_link(frame: &ScalarFrame) -> u64 {
    frame.link()
}

// =============================================================================
// Tests
// =============================================================================
