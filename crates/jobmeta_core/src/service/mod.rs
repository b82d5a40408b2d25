//! Services the persistence core consults but does not own.
//!
//! # Responsibility
//! - Keep external policy (authorization) behind traits so the model stays
//!   storage- and host-agnostic.

pub mod security;
