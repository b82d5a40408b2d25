//! Store-agnostic model primitives.
//!
//! # Responsibility
//! - Define the entity leaf, change notifications and the reversible edit
//!   log used by the persistence core.
//!
//! # Invariants
//! - Nothing in this module reads or writes the attribute store.

pub mod entity;
pub mod events;
pub mod undo;
