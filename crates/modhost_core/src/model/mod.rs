//! Module host domain model.
//!
//! # Responsibility
//! - Define the code-defined module catalog entry (`ModuleDescriptor`).
//! - Define per-process lifecycle state and persisted failure records.
//!
//! # Invariants
//! - Every module is identified by a stable `ModuleId`.
//! - Descriptors are immutable once registered.

pub mod descriptor;
pub mod state;
