//! Execution tiers and deoptimization for the inline-value engine.
//!
//! This crate provides:
//! - The engine context shared by every tier (`EngineContext`)
//! - Tiered executors (`Tier`, `TierExecutor`): the interpreter passes
//!   values semantically, the compiled tiers physically transport them
//!   through scalar frames per the call-site plan, with observably
//!   identical results
//! - Scalar frames with stack extension (`ScalarFrame`)
//! - Safepoint polls with simulated object relocation (`Safepoint`)
//! - Deoptimization snapshots and the materializer that rehydrates
//!   boxed state for the interpreter
//!
//! Cross-tier determinism is the dominant correctness property: every
//! tier consults the same descriptors, the same plans, and the same
//! copy protocol, so agreement is structural rather than re-verified.

#![deny(unsafe_op_in_unsafe_fn)]

pub mod context;
pub mod deopt;
pub mod frame;
pub mod safepoint;
pub mod tiers;

pub use context::EngineContext;
pub use deopt::{DeoptMaterializer, DeoptReason, DeoptSnapshot, Materialized, SnapshotValue};
pub use frame::ScalarFrame;
pub use safepoint::Safepoint;
pub use tiers::{CallValue, Tier, TierExecutor};
