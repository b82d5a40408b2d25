//! Store boundary of the persistence core.
//!
//! # Responsibility
//! - Define the attribute store contract consumed by the unit of work.
//! - Keep SQL details and schema vocabulary behind that contract.
//!
//! # Invariants
//! - The persistence core reaches stored records only through
//!   `AttributeStore`.

pub mod attribute_store;
pub mod schema;
