//! Entity leaf model.
//!
//! # Responsibility
//! - Hold identity, display fields, dirty state and ad-hoc user properties
//!   of one job-model object.
//!
//! # Invariants
//! - `name` is never blank.
//! - A freshly constructed entity is dirty iff its id is temporary.
//! - `user_properties` is created on first write and never shrinks back to
//!   `None`.
//! - The entity knows nothing about the store it is synchronized with.

use crate::repo::schema::is_temporary_id;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Identifier of a model object: temporary (`$...`) or store-assigned.
pub type ObjectId = String;

/// Rejected entity mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityValidationError {
    /// Name is empty or whitespace only.
    BlankName,
    /// User property key is empty or whitespace only.
    BlankUserPropertyKey,
}

impl Display for EntityValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BlankName => write!(f, "name must not be blank"),
            Self::BlankUserPropertyKey => write!(f, "user property key must not be blank"),
        }
    }
}

impl Error for EntityValidationError {}

/// Identity, naming and dirty state of one model object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    id: ObjectId,
    name: String,
    description: String,
    dirty: bool,
    user_properties: Option<BTreeMap<String, String>>,
}

impl Entity {
    /// Creates an entity; it starts dirty when `id` is temporary.
    pub fn new(id: impl Into<ObjectId>, name: impl Into<String>) -> Result<Self, EntityValidationError> {
        let id = id.into();
        let name = validate_name(name.into())?;
        let dirty = is_temporary_id(&id);
        Ok(Self {
            id,
            name,
            description: String::new(),
            dirty,
            user_properties: None,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Returns whether the id has not been accepted by the store yet.
    pub fn is_new(&self) -> bool {
        is_temporary_id(&self.id)
    }

    pub fn user_properties(&self) -> Option<&BTreeMap<String, String>> {
        self.user_properties.as_ref()
    }

    pub fn user_property(&self, key: &str) -> Option<&str> {
        self.user_properties
            .as_ref()
            .and_then(|properties| properties.get(key))
            .map(String::as_str)
    }

    pub(crate) fn set_id(&mut self, id: ObjectId) {
        self.id = id;
    }

    /// Writes a stored name without validation; legacy data may be blank.
    pub(crate) fn set_loaded_name(&mut self, name: String) {
        self.name = name;
    }

    pub(crate) fn set_description(&mut self, description: String) {
        self.description = description;
    }

    pub(crate) fn set_user_property(&mut self, key: String, value: Option<String>) {
        let properties = self.user_properties.get_or_insert_with(BTreeMap::new);
        match value {
            Some(value) => {
                properties.insert(key, value);
            }
            None => {
                properties.remove(&key);
            }
        }
    }

    pub(crate) fn replace_user_properties(&mut self, properties: Option<BTreeMap<String, String>>) {
        self.user_properties = properties;
    }

    pub(crate) fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub(crate) fn mark_clean(&mut self) {
        self.dirty = false;
    }
}

/// Validates a candidate name and returns it unchanged when accepted.
pub fn validate_name(name: String) -> Result<String, EntityValidationError> {
    if name.trim().is_empty() {
        return Err(EntityValidationError::BlankName);
    }
    Ok(name)
}

#[cfg(test)]
mod tests {
    use super::{validate_name, Entity, EntityValidationError};

    #[test]
    fn new_entity_is_dirty_only_for_temporary_ids() {
        let created = Entity::new("$NEW1", "Sort1").expect("valid entity");
        assert!(created.is_dirty());
        assert!(created.is_new());

        let loaded = Entity::new("A5.B1", "Sort1").expect("valid entity");
        assert!(!loaded.is_dirty());
        assert!(!loaded.is_new());
    }

    #[test]
    fn blank_names_are_rejected() {
        assert_eq!(
            Entity::new("$NEW1", "   ").expect_err("blank name"),
            EntityValidationError::BlankName
        );

        assert!(validate_name(String::new()).is_err());
        assert_eq!(validate_name("Sort1".to_string()).as_deref(), Ok("Sort1"));
    }

    #[test]
    fn user_properties_are_created_lazily() {
        let mut entity = Entity::new("$NEW1", "Sort1").expect("valid entity");
        assert!(entity.user_properties().is_none());

        entity.set_user_property("owner".to_string(), Some("etl".to_string()));
        assert_eq!(entity.user_property("owner"), Some("etl"));

        entity.set_user_property("owner".to_string(), None);
        assert!(entity.user_properties().is_some_and(|props| props.is_empty()));
    }
}
