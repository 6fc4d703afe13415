//! Per-type layout planning for inline values.
//!
//! This crate provides:
//! - Type declarations as fed in by resolution (`TypeDecl`, `FieldDecl`)
//! - Planned layouts (`ValueTypeDescriptor`, `FieldSlot`, `AtomicClass`)
//! - The layout planner: recursive flattening under configurable
//!   thresholds, padding-aware null-marker placement, cycle rejection
//! - Path-based null-marker access over raw payloads
//! - The process-wide append-only descriptor registry
//!
//! A descriptor is computed exactly once per type and is immutable after
//! publication. Every execution tier consults the same descriptor, which
//! is what makes cross-tier layout agreement a construction property
//! rather than something to re-verify per tier.

#![deny(unsafe_op_in_unsafe_fn)]

pub mod decl;
pub mod descriptor;
pub mod null_marker;
pub mod planner;
pub mod registry;
pub mod stats;

pub use decl::{DeclFlags, FieldDecl, FieldDeclKind, TypeDecl};
pub use descriptor::{
    AtomicClass, FieldSlot, LeafSlot, SlotKind, ValueTypeDescriptor, ValueTypeId,
};
pub use null_marker::{DescriptorSource, FieldPath, PathValue};
pub use planner::TypeLayoutPlanner;
pub use registry::{LayoutRegistry, global_registry};
pub use stats::LayoutStats;
