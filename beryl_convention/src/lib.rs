//! Scalarized calling conventions for inline values.
//!
//! This crate provides:
//! - The reference register file (`IntReg`, `FloatReg`, `RegSet`)
//! - Call-site plans (`CallSitePlan`, `ArgSlot`, `Assignment`) with
//!   stack extension for oversized payloads
//! - The plan builder: deterministic descriptor-order scalarization,
//!   register-budget overflow, mismatch adapters
//! - Call sites with atomically swapped plan versions and
//!   virtual-dispatch agreement checking
//! - Boundary adapters that buffer or unpack when caller and callee
//!   disagree
//!
//! A call site scalarizes a value parameter only when caller and callee
//! resolved the type identically and the layout says it flattens; any
//! disagreement falls back to the boxed convention with an adapter at
//! the boundary, never to silent corruption.

#![deny(unsafe_op_in_unsafe_fn)]

pub mod adapter;
pub mod builder;
pub mod plan;
pub mod registers;
pub mod site;
pub mod stats;

pub use adapter::{buffer_argument, unpack_argument};
pub use builder::{ConventionBuilder, ParamSpec, ParamType, SideView, Signature};
pub use plan::{AdapterKind, ArgSlot, Assignment, CallSitePlan, RetSlot, StackExtension};
pub use registers::{FloatReg, IntReg, RegSet};
pub use site::{CallSite, DispatchDecision, TargetId, VirtualCallSite};
pub use stats::ConventionStats;
