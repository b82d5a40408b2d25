//! Model configuration.
//!
//! # Responsibility
//! - Carry the settings a unit of work reads instead of process globals.
//!
//! # Invariants
//! - Every field has a default; partial documents deserialize.

use serde::{Deserialize, Serialize};

/// Settings for one unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Record reversible edits for undo/redo.
    pub undo_supported: bool,
    /// Name substituted when a loaded record has a blank name.
    pub placeholder_name: String,
    /// Seed of generated temporary ids (`$<seed><n>`).
    pub temporary_id_seed: String,
    /// Permission asked of the permission service by the editability check.
    pub edit_permission: String,
    /// Role of the property group holding entity user properties.
    pub user_properties_role: String,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            undo_supported: true,
            placeholder_name: "Untitled".to_string(),
            temporary_id_seed: "NEW".to_string(),
            edit_permission: "WriteMetadata".to_string(),
            user_properties_role: "UserProperties".to_string(),
        }
    }
}
