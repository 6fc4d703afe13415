//! Core vocabulary for the Beryl inline-value engine.
//!
//! This crate provides:
//! - Leaf scalar values with byte-exact payload encoding (`Scalar`, `LeafKind`)
//! - Object handles that survive relocation (`ObjId`)
//! - The engine-wide error type (`BerylError`, `BerylResult`)
//! - Engine configuration (`EngineConfig`)
//! - String interning for field names

#![deny(unsafe_op_in_unsafe_fn)]

pub mod config;
pub mod error;
pub mod intern;
pub mod value;

pub use config::EngineConfig;
pub use error::{BerylError, BerylResult, ErrorKind};
pub use value::{LeafKind, ObjId, Scalar};
