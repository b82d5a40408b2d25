//! Edit-permission seam.
//!
//! # Responsibility
//! - Define the authorization query the editability check runs against.
//! - Provide an in-memory grant table for embedding and tests.
//!
//! # Invariants
//! - A service error is never treated as a grant by callers.

use std::collections::{BTreeMap, BTreeSet};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Failure reported by a permission backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionError {
    message: String,
}

impl PermissionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl Display for PermissionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "permission check failed: {}", self.message)
    }
}

impl Error for PermissionError {}

/// Answers whether the current principal holds `permission` on a record.
pub trait PermissionService {
    fn is_authorized(&self, resource_ref: &str, permission: &str) -> Result<bool, PermissionError>;
}

/// Explicit `(resource, permission)` grants; everything else is denied.
#[derive(Debug, Clone, Default)]
pub struct PermissionGrants {
    grants: BTreeMap<String, BTreeSet<String>>,
}

impl PermissionGrants {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grant(mut self, resource_ref: &str, permission: &str) -> Self {
        self.grants
            .entry(resource_ref.to_string())
            .or_default()
            .insert(permission.to_string());
        self
    }
}

impl PermissionService for PermissionGrants {
    fn is_authorized(&self, resource_ref: &str, permission: &str) -> Result<bool, PermissionError> {
        Ok(self
            .grants
            .get(resource_ref)
            .is_some_and(|granted| granted.contains(permission)))
    }
}
