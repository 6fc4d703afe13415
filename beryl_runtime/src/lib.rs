//! Runtime representation of inline values.
//!
//! This crate provides:
//! - Flat payload storage with typed leaf access (`FlatPayload`)
//! - The tear-free access protocol (`AtomicSlot`): word-atomic loads for
//!   naturally atomic types, a per-slot sequence lock for everything else
//! - Flat and boxed-fallback value arrays (`ValueArray`, `FlatArray`)
//! - Boxed instances with handle-based identity (`BoxedValue`,
//!   `HandleTable`)
//! - The buffering coordinator: identity on demand, dominance-aware
//!   reuse, and the two-phase private-buffer builder
//!
//! Every execution tier reads and writes flat state exclusively through
//! these types; the copy protocol lives in exactly one place, so tearing
//! behavior cannot differ between interpreted and compiled code.

#![deny(unsafe_op_in_unsafe_fn)]

pub mod atomic;
pub mod array;
pub mod boxed;
pub mod buffer;
pub mod handles;
pub mod payload;
pub mod stats;

pub use array::{ArrayNullness, BoxedRefArray, FlatArray, ValueArray};
pub use atomic::{AtomicSlot, acquire_fence, publish_fence};
pub use boxed::BoxedValue;
pub use buffer::{BufferHandle, BufferedInstance, BufferingCoordinator};
pub use handles::HandleTable;
pub use payload::FlatPayload;
pub use stats::{AccessStats, BufferStats};
