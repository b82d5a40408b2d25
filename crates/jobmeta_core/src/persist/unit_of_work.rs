//! Unit-of-work context.
//!
//! # Responsibility
//! - Own the model registry, undo log, listener bus and configuration that
//!   every model operation runs against.
//! - Create objects and apply undoable field mutations.
//!
//! # Invariants
//! - Every mutator records one reversible edit (when undo is supported),
//!   applies it, marks the object changed and notifies listeners.
//! - In copy/paste mode mutations do not mark objects changed and deletes
//!   keep the registry entry.
//! - Undo/redo replays never record new edits.

use crate::config::ModelConfig;
use crate::model::entity::{validate_name, Entity, EntityValidationError, ObjectId};
use crate::model::events::{EventBus, ListenerId, ModelEvent, ModelListener};
use crate::model::undo::{Direction, FieldEdit, FieldSelector, UndoLog, UndoableEdit};
use crate::persist::object::{ObjectBody, ObjectState, PersistentObject};
use crate::persist::registry::ModelRegistry;
use crate::persist::selectors;
use crate::persist::{PersistError, PersistResult};
use crate::repo::schema::{is_temporary_id, RecordType};
use crate::service::security::PermissionService;
use log::debug;
use std::sync::Arc;

/// Mode flag replacing the ambient "copy/paste in progress" switch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WorkMode {
    #[default]
    Normal,
    /// Objects are being duplicated; changes are not tracked and deletes
    /// keep registry entries.
    CopyPaste,
}

/// Context passed to every model operation.
pub struct UnitOfWork {
    pub(crate) registry: ModelRegistry,
    pub(crate) undo: UndoLog<ModelRegistry>,
    pub(crate) events: EventBus,
    pub(crate) config: ModelConfig,
    pub(crate) mode: WorkMode,
    pub(crate) permissions: Option<Arc<dyn PermissionService>>,
}

impl Default for UnitOfWork {
    fn default() -> Self {
        Self::new(ModelConfig::default())
    }
}

impl UnitOfWork {
    pub fn new(config: ModelConfig) -> Self {
        Self {
            registry: ModelRegistry::new(),
            undo: UndoLog::new(),
            events: EventBus::new(),
            config,
            mode: WorkMode::Normal,
            permissions: None,
        }
    }

    /// Installs the permission service consulted by the editability check.
    pub fn with_permission_service(mut self, permissions: Arc<dyn PermissionService>) -> Self {
        self.permissions = Some(permissions);
        self
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    pub fn mode(&self) -> WorkMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: WorkMode) {
        self.mode = mode;
    }

    pub fn is_copy_paste_in_progress(&self) -> bool {
        self.mode == WorkMode::CopyPaste
    }

    pub fn object(&self, id: &str) -> Option<&PersistentObject> {
        self.registry.get_object(id)
    }

    /// Lifecycle state; `Modified` covers member and list changes too.
    pub fn state(&self, id: &str) -> PersistResult<ObjectState> {
        let object = self
            .registry
            .get_object(id)
            .ok_or_else(|| PersistError::ObjectNotFound(id.to_string()))?;
        Ok(if object.deleted {
            ObjectState::Deleted
        } else if object.entity.is_new() {
            ObjectState::New
        } else if self.object_changed(object) {
            ObjectState::Modified
        } else {
            ObjectState::Saved
        })
    }

    pub(crate) fn live_object(&self, id: &str) -> PersistResult<&PersistentObject> {
        match self.registry.get_object(id) {
            Some(object) if object.deleted => Err(PersistError::ObjectDeleted(id.to_string())),
            Some(object) => Ok(object),
            None => Err(PersistError::ObjectNotFound(id.to_string())),
        }
    }

    pub(crate) fn live_object_mut(&mut self, id: &str) -> PersistResult<&mut PersistentObject> {
        match self.registry.get_object_mut(id) {
            Some(object) if object.deleted => Err(PersistError::ObjectDeleted(id.to_string())),
            Some(object) => Ok(object),
            None => Err(PersistError::ObjectNotFound(id.to_string())),
        }
    }

    /// Creates a new object under a fresh temporary id.
    pub fn create_object(&mut self, record_type: RecordType, name: &str) -> PersistResult<ObjectId> {
        let id = self
            .registry
            .create_id_for_new_object(&self.config.temporary_id_seed);
        self.insert_new(id, record_type, name, ObjectBody::for_record_type(record_type))
    }

    /// Creates a new object under a caller-chosen temporary id.
    pub fn create_object_with_id(
        &mut self,
        id: &str,
        record_type: RecordType,
        name: &str,
    ) -> PersistResult<ObjectId> {
        if !is_temporary_id(id) || self.registry.contains(id) {
            return Err(PersistError::InvalidMember {
                member_id: id.to_string(),
                expected: "unused temporary id",
                actual: record_type,
            });
        }
        self.insert_new(
            id.to_string(),
            record_type,
            name,
            ObjectBody::for_record_type(record_type),
        )
    }

    pub fn create_note(&mut self, name: &str, text: &str) -> PersistResult<ObjectId> {
        let id = self
            .registry
            .create_id_for_new_object(&self.config.temporary_id_seed);
        let body = ObjectBody::Note {
            text: text.to_string(),
        };
        self.insert_new(id, RecordType::Document, name, body)
    }

    pub fn create_document(&mut self, name: &str, text: &str) -> PersistResult<ObjectId> {
        let id = self
            .registry
            .create_id_for_new_object(&self.config.temporary_id_seed);
        let body = ObjectBody::Document {
            text: text.to_string(),
        };
        self.insert_new(id, RecordType::Document, name, body)
    }

    pub fn create_extended_attribute(&mut self, name: &str, value: &str) -> PersistResult<ObjectId> {
        let id = self
            .registry
            .create_id_for_new_object(&self.config.temporary_id_seed);
        let body = ObjectBody::ExtendedAttribute {
            value: value.to_string(),
        };
        self.insert_new(id, RecordType::ExtendedAttribute, name, body)
    }

    pub fn create_responsible_party(
        &mut self,
        name: &str,
        person_id: Option<&str>,
        role: &str,
    ) -> PersistResult<ObjectId> {
        let id = self
            .registry
            .create_id_for_new_object(&self.config.temporary_id_seed);
        let body = ObjectBody::ResponsibleParty {
            person_id: person_id.map(str::to_string),
            role: role.to_string(),
        };
        self.insert_new(id, RecordType::ResponsibleParty, name, body)
    }

    fn insert_new(
        &mut self,
        id: ObjectId,
        record_type: RecordType,
        name: &str,
        body: ObjectBody,
    ) -> PersistResult<ObjectId> {
        let entity = Entity::new(id.clone(), name)?;
        self.registry
            .put_object(PersistentObject::new(entity, record_type, body));
        debug!(
            "event=object_create module=persist status=ok record_type={}",
            record_type.as_str()
        );
        Ok(id)
    }

    pub(crate) fn perform(
        &mut self,
        edit: Box<dyn UndoableEdit<ModelRegistry>>,
    ) -> PersistResult<()> {
        edit.apply(&mut self.registry, Direction::Redo)?;
        if self.config.undo_supported {
            self.undo.record(edit);
        }
        Ok(())
    }

    /// Marks an object dirty unless copy/paste is in progress.
    pub(crate) fn set_changed(&mut self, id: &str) {
        if self.mode == WorkMode::CopyPaste {
            return;
        }
        if let Some(object) = self.registry.get_object_mut(id) {
            object.entity.mark_dirty();
        }
    }

    pub(crate) fn emit_changed(
        &self,
        id: &str,
        field: &'static str,
        old_value: Option<String>,
        new_value: Option<String>,
    ) {
        self.events
            .emit(&ModelEvent::changed(id, field, old_value, new_value));
    }

    fn set_string_field(
        &mut self,
        id: &str,
        selector: FieldSelector<ModelRegistry, String>,
        old: String,
        new: String,
    ) -> PersistResult<()> {
        if old == new {
            return Ok(());
        }
        self.perform(Box::new(FieldEdit::new(
            id,
            selector,
            old.clone(),
            new.clone(),
        )))?;
        self.set_changed(id);
        self.emit_changed(id, selector.name, Some(old), Some(new));
        Ok(())
    }

    /// Renames an object; blank names are rejected and leave it unchanged.
    pub fn set_name(&mut self, id: &str, name: &str) -> PersistResult<()> {
        let name = validate_name(name.to_string())?;
        let old = self.live_object(id)?.entity.name().to_string();
        self.set_string_field(id, selectors::NAME, old, name)
    }

    pub fn set_description(&mut self, id: &str, description: &str) -> PersistResult<()> {
        let old = self.live_object(id)?.entity.description().to_string();
        self.set_string_field(id, selectors::DESCRIPTION, old, description.to_string())
    }

    pub fn set_user_property(&mut self, id: &str, key: &str, value: &str) -> PersistResult<()> {
        self.write_user_property(id, key, Some(value.to_string()))
    }

    pub fn remove_user_property(&mut self, id: &str, key: &str) -> PersistResult<()> {
        self.write_user_property(id, key, None)
    }

    fn write_user_property(
        &mut self,
        id: &str,
        key: &str,
        value: Option<String>,
    ) -> PersistResult<()> {
        if key.trim().is_empty() {
            return Err(EntityValidationError::BlankUserPropertyKey.into());
        }
        let old = self
            .live_object(id)?
            .entity
            .user_property(key)
            .map(str::to_string);
        if old == value {
            return Ok(());
        }
        self.perform(Box::new(FieldEdit::new(
            id,
            selectors::USER_PROPERTY,
            (key.to_string(), old.clone()),
            (key.to_string(), value.clone()),
        )))?;
        self.set_changed(id);
        self.emit_changed(id, selectors::USER_PROPERTY.name, old, value);
        Ok(())
    }

    /// Replaces the text of a note or document member.
    pub fn set_text(&mut self, id: &str, text: &str) -> PersistResult<()> {
        let object = self.live_object(id)?;
        let old = object
            .text()
            .map(str::to_string)
            .ok_or_else(|| wrong_kind(object, "note or document"))?;
        self.set_string_field(id, selectors::TEXT, old, text.to_string())
    }

    pub fn set_extended_value(&mut self, id: &str, value: &str) -> PersistResult<()> {
        let object = self.live_object(id)?;
        let ObjectBody::ExtendedAttribute { value: old } = &object.body else {
            return Err(wrong_kind(object, "extended attribute"));
        };
        let old = old.clone();
        self.set_string_field(id, selectors::EXTENDED_VALUE, old, value.to_string())
    }

    pub fn set_responsible_role(&mut self, id: &str, role: &str) -> PersistResult<()> {
        let object = self.live_object(id)?;
        let ObjectBody::ResponsibleParty { role: old, .. } = &object.body else {
            return Err(wrong_kind(object, "responsible party"));
        };
        let old = old.clone();
        self.set_string_field(id, selectors::RESPONSIBLE_ROLE, old, role.to_string())
    }

    pub fn set_responsible_person(&mut self, id: &str, person_id: Option<&str>) -> PersistResult<()> {
        let object = self.live_object(id)?;
        let ObjectBody::ResponsibleParty { person_id: old, .. } = &object.body else {
            return Err(wrong_kind(object, "responsible party"));
        };
        let old = old.clone();
        let new = person_id.map(str::to_string);
        if old == new {
            return Ok(());
        }
        self.perform(Box::new(FieldEdit::new(
            id,
            selectors::RESPONSIBLE_PERSON,
            old.clone(),
            new.clone(),
        )))?;
        self.set_changed(id);
        self.emit_changed(id, selectors::RESPONSIBLE_PERSON.name, old, new);
        Ok(())
    }

    pub fn start_compound(&mut self) {
        self.undo.start_compound();
    }

    pub fn end_compound(&mut self) {
        self.undo.end_compound();
    }

    pub fn can_undo(&self) -> bool {
        self.undo.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.undo.can_redo()
    }

    pub fn undo(&mut self) -> PersistResult<()> {
        if self.undo.is_compound_open() {
            return Err(PersistError::CompoundEditOpen);
        }
        let edit = self.undo.pop_undo().ok_or(PersistError::NothingToUndo)?;
        if let Err(err) = edit.apply(&mut self.registry, Direction::Undo) {
            self.undo.push_undo(edit);
            return Err(err.into());
        }
        self.after_replay(edit.as_ref());
        self.undo.push_redo(edit);
        Ok(())
    }

    pub fn redo(&mut self) -> PersistResult<()> {
        if self.undo.is_compound_open() {
            return Err(PersistError::CompoundEditOpen);
        }
        let edit = self.undo.pop_redo().ok_or(PersistError::NothingToRedo)?;
        if let Err(err) = edit.apply(&mut self.registry, Direction::Redo) {
            self.undo.push_redo(edit);
            return Err(err.into());
        }
        self.after_replay(edit.as_ref());
        self.undo.push_undo(edit);
        Ok(())
    }

    fn after_replay(&mut self, edit: &dyn UndoableEdit<ModelRegistry>) {
        for id in edit.object_ids() {
            match self.registry.get_object_mut(id) {
                Some(object) => {
                    object.entity.mark_dirty();
                    self.events
                        .emit(&ModelEvent::changed(id, edit.label(), None, None));
                }
                None => self.events.emit(&ModelEvent::deleted(id)),
            }
        }
    }

    pub fn add_listener(&mut self, id: &str, listener: Arc<dyn ModelListener>) -> ListenerId {
        self.events.subscribe(id, listener)
    }

    pub fn remove_listener(&mut self, id: &str, handle: ListenerId) -> bool {
        self.events.unsubscribe(id, handle)
    }

    /// Forwards events of `from` to the listeners of `to`.
    pub fn ripple(&mut self, from: &str, to: &str) {
        self.events.ripple(from, to);
    }
}

fn wrong_kind(object: &PersistentObject, expected: &'static str) -> PersistError {
    PersistError::InvalidMember {
        member_id: object.id().to_string(),
        expected,
        actual: object.record_type,
    }
}
