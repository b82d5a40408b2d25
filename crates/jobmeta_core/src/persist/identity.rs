//! Identity and change-tracking lifecycle.
//!
//! # Responsibility
//! - Save, load and delete objects through an `AttributeStore` unit.
//! - Broadcast temporary -> permanent id substitutions to every live object,
//!   listener key and undo edit.
//! - Move owned sub-objects into and out of an owner's deleted queue.
//!
//! # Invariants
//! - Saving an unchanged object issues no store call.
//! - Deferred deletions are flushed before the owner's own fields are
//!   written.
//! - A failed save/load/delete rolls the store unit back and leaves the
//!   registry exactly as it was before the call.
//! - Deleting an object that was never persisted is a no-op.

use crate::model::entity::Entity;
use crate::model::events::ModelEvent;
use crate::persist::attributes::{AttributeReader, AttributeWriter};
use crate::persist::composite::read_document_body;
use crate::persist::object::{ObjectBody, PersistentObject};
use crate::persist::selectors::QueueEdit;
use crate::persist::unit_of_work::{UnitOfWork, WorkMode};
use crate::persist::{PersistError, PersistResult};
use crate::repo::attribute_store::{AttributeStore, IdMap, StoreError, StoreResult};
use crate::repo::schema::{
    is_temporary_id, Association, RecordType, DOCUMENT_TYPE_DOCUMENT, DOCUMENT_TYPE_NOTE,
    FIELD_DESC, FIELD_DOCUMENT_TYPE, FIELD_NAME, FIELD_ROLE, FIELD_STORED_TEXT, FIELD_VALUE,
};
use log::{debug, error, info, warn};

/// Result of a save request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    /// Nothing had changed; the store was not called.
    Unchanged,
    /// Changes were committed; `id_map` lists the ids the store assigned.
    Saved { id_map: IdMap },
}

fn write_body_fields<S: AttributeStore + ?Sized>(
    id: &str,
    body: &ObjectBody,
    store: &mut S,
) -> StoreResult<()> {
    match body {
        ObjectBody::Note { text } => {
            store.set_field(id, FIELD_DOCUMENT_TYPE, DOCUMENT_TYPE_NOTE)?;
            store.set_field(id, FIELD_STORED_TEXT, text)
        }
        ObjectBody::Document { text } => {
            store.set_field(id, FIELD_DOCUMENT_TYPE, DOCUMENT_TYPE_DOCUMENT)?;
            store.set_field(id, FIELD_STORED_TEXT, text)
        }
        ObjectBody::ExtendedAttribute { value } => store.set_field(id, FIELD_VALUE, value),
        ObjectBody::ResponsibleParty { person_id, role } => {
            store.set_field(id, FIELD_ROLE, role)?;
            let persons: Vec<String> = person_id.iter().cloned().collect();
            store.set_association(id, Association::Persons, &persons)
        }
        ObjectBody::Plain | ObjectBody::Container(_) => Ok(()),
    }
}

impl UnitOfWork {
    /// Own dirty flag, pending deletions, list changes or changed members.
    pub fn is_changed(&self, id: &str) -> PersistResult<bool> {
        Ok(self.object_changed(self.live_object(id)?))
    }

    pub(crate) fn object_changed(&self, object: &PersistentObject) -> bool {
        if object.deleted {
            return false;
        }
        if object.has_local_changes() {
            return true;
        }
        object.container().is_some_and(|parts| {
            parts.member_ids().any(|member_id| {
                self.registry
                    .get_object(member_id)
                    .is_some_and(PersistentObject::has_local_changes)
            })
        })
    }

    /// Persists one object and its changed members in a single store unit.
    pub fn save<S: AttributeStore + ?Sized>(
        &mut self,
        id: &str,
        store: &mut S,
    ) -> PersistResult<SaveOutcome> {
        let object = self
            .registry
            .get_object(id)
            .ok_or_else(|| PersistError::ObjectNotFound(id.to_string()))?;
        if !self.object_changed(object) {
            debug!("event=uow_save module=persist status=skip reason=unchanged");
            return Ok(SaveOutcome::Unchanged);
        }
        let record_type = object.record_type;

        let snapshot = self.registry.clone();
        store.begin()?;
        let result = match self.save_object(id, store) {
            Ok(()) => store.commit().map_err(PersistError::from),
            Err(err) => Err(err),
        };

        match result {
            Ok(id_map) => {
                self.update_ids(&id_map);
                info!(
                    "event=uow_save module=persist status=ok record_type={} remapped={}",
                    record_type.as_str(),
                    id_map.len()
                );
                Ok(SaveOutcome::Saved { id_map })
            }
            Err(err) => {
                if let Err(rollback_err) = store.rollback() {
                    warn!(
                        "event=uow_save module=persist status=degraded reason=rollback_failed error={rollback_err}"
                    );
                }
                self.registry = snapshot;
                error!(
                    "event=uow_save module=persist status=error record_type={} error={err}",
                    record_type.as_str()
                );
                Err(err)
            }
        }
    }

    pub(crate) fn save_object<S: AttributeStore + ?Sized>(
        &mut self,
        id: &str,
        store: &mut S,
    ) -> PersistResult<()> {
        let queued = std::mem::take(&mut self.live_object_mut(id)?.deleted_objects);
        for mut queued_object in queued {
            if queued_object.entity.is_new() {
                continue;
            }
            self.delete_records(&mut queued_object, store)?;
        }

        let role = self.config.user_properties_role.clone();
        let (object, ids) = self
            .registry
            .object_and_ids_mut(id)
            .ok_or_else(|| PersistError::ObjectNotFound(id.to_string()))?;
        store.acquire_record(id, object.record_type)?;
        store.set_field(id, FIELD_NAME, object.entity.name())?;
        store.set_field(id, FIELD_DESC, object.entity.description())?;
        write_body_fields(id, &object.body, store)?;

        let staged = std::mem::take(&mut object.staged);
        let mut writer = AttributeWriter::new(object.entity.id(), &mut object.cache, &mut *store, ids);
        for option in staged.options.values() {
            writer.flush_option(option)?;
        }
        for (name, objects) in &staged.custom_lists {
            writer.save_custom_list(name, objects)?;
        }
        if let Some(properties) = object.entity.user_properties() {
            writer.save_user_properties(&role, properties)?;
        }

        if object.body.as_container().is_some() {
            self.save_container_parts(id, store)?;
        }
        if let Some(object) = self.registry.get_object_mut(id) {
            object.entity.mark_clean();
        }
        Ok(())
    }

    /// Rewrites temporary ids across the whole registry, listener keys and
    /// undo history.
    pub fn update_ids(&mut self, id_map: &IdMap) {
        if id_map.is_empty() {
            return;
        }
        self.registry.rekey(id_map);
        self.collapse_responsible_parties();
        self.events.remap_ids(id_map);
        self.undo.remap_ids(id_map);
        info!(
            "event=id_remap module=persist status=ok remapped={}",
            id_map.len()
        );
    }

    /// Replaces a persisted object (and its members) with the store state.
    pub fn load<S: AttributeStore + ?Sized>(&mut self, id: &str, store: &S) -> PersistResult<()> {
        let existing = self.live_object(id)?;
        if existing.entity.is_new() {
            debug!("event=uow_load module=persist status=skip reason=not_persisted");
            return Ok(());
        }
        let record_type = existing.record_type;
        let mut members = Vec::new();
        let result = self.read_object(id, record_type, Some(existing), store, true, &mut members);
        self.finish_load(record_type, result, members)
    }

    /// Loads an object that is not live yet from its permanent id.
    pub fn open<S: AttributeStore + ?Sized>(
        &mut self,
        id: &str,
        record_type: RecordType,
        store: &S,
    ) -> PersistResult<()> {
        if self.registry.contains(id) {
            return self.load(id, store);
        }
        if is_temporary_id(id) {
            return Err(PersistError::ObjectNotFound(id.to_string()));
        }
        let mut members = Vec::new();
        let result = self.read_object(id, record_type, None, store, true, &mut members);
        self.finish_load(record_type, result, members)
    }

    fn finish_load(
        &mut self,
        record_type: RecordType,
        result: PersistResult<PersistentObject>,
        members: Vec<PersistentObject>,
    ) -> PersistResult<()> {
        match result {
            Ok(object) => {
                for member in members {
                    self.registry.put_object(member);
                }
                self.registry.put_object(object);
                info!(
                    "event=uow_load module=persist status=ok record_type={}",
                    record_type.as_str()
                );
                Ok(())
            }
            Err(err) => {
                error!(
                    "event=uow_load module=persist status=error record_type={} error={err}",
                    record_type.as_str()
                );
                Err(err)
            }
        }
    }

    /// Reads one object from the store without touching the registry.
    ///
    /// Container members are read into `loaded`.
    pub(crate) fn read_object<S: AttributeStore + ?Sized>(
        &self,
        id: &str,
        record_type: RecordType,
        existing: Option<&PersistentObject>,
        store: &S,
        root: bool,
        loaded: &mut Vec<PersistentObject>,
    ) -> PersistResult<PersistentObject> {
        match store.record_type(id)? {
            Some(actual) if actual == record_type => {}
            Some(actual) => {
                return Err(StoreError::RecordTypeMismatch {
                    id: id.to_string(),
                    expected: record_type,
                    actual,
                }
                .into())
            }
            None => return Err(StoreError::RecordNotFound(id.to_string()).into()),
        }

        let stored_name = store.field(id, FIELD_NAME)?.unwrap_or_default();
        let blank_name = stored_name.trim().is_empty();
        let name = if blank_name {
            self.config.placeholder_name.clone()
        } else {
            stored_name
        };
        let mut entity = Entity::new(id, name)?;
        entity.set_description(store.field(id, FIELD_DESC)?.unwrap_or_default());

        let mut cache = existing
            .map(|object| object.cache.clone())
            .unwrap_or_default();
        let user_properties = AttributeReader::new(id, &mut cache, store)
            .load_user_properties(&self.config.user_properties_role)?;
        entity.replace_user_properties(user_properties);

        let template = existing
            .map(|object| object.body.clone())
            .unwrap_or_else(|| ObjectBody::for_record_type(record_type));
        let body = match template {
            ObjectBody::Container(parts) => ObjectBody::Container(self.read_container_parts(
                id,
                Some(&parts),
                store,
                root,
                loaded,
            )?),
            ObjectBody::Note { .. } | ObjectBody::Document { .. } => {
                read_document_body(id, store)?
            }
            ObjectBody::ExtendedAttribute { .. } => ObjectBody::ExtendedAttribute {
                value: store.field(id, FIELD_VALUE)?.unwrap_or_default(),
            },
            ObjectBody::ResponsibleParty { .. } => ObjectBody::ResponsibleParty {
                person_id: store
                    .association(id, Association::Persons)?
                    .into_iter()
                    .next(),
                role: store.field(id, FIELD_ROLE)?.unwrap_or_default(),
            },
            ObjectBody::Plain => ObjectBody::Plain,
        };

        let mut object = PersistentObject::new(entity, record_type, body);
        object.cache = cache;
        if blank_name {
            object.entity.mark_dirty();
            warn!(
                "event=uow_load module=persist status=degraded reason=blank_name record_type={}",
                record_type.as_str()
            );
        }
        Ok(object)
    }

    /// Deletes a persisted object with every record it owns.
    pub fn delete<S: AttributeStore + ?Sized>(
        &mut self,
        id: &str,
        store: &mut S,
    ) -> PersistResult<()> {
        let object = self.live_object(id)?;
        if object.entity.is_new() {
            debug!("event=uow_delete module=persist status=skip reason=not_persisted");
            return Ok(());
        }
        let record_type = object.record_type;

        let snapshot = self.registry.clone();
        store.begin()?;
        let result = match self.delete_cascade(id, store) {
            Ok(deleted) => store.commit().map(|_| deleted).map_err(PersistError::from),
            Err(err) => Err(err),
        };

        match result {
            Ok(deleted) => {
                if let Some(mut object) = self.registry.remove_object(id) {
                    if self.mode == WorkMode::CopyPaste {
                        object.deleted = true;
                        self.registry.put_object(object);
                    }
                }
                self.events.emit(&ModelEvent::deleted(id));
                info!(
                    "event=uow_delete module=persist status=ok record_type={} deleted_records={deleted}",
                    record_type.as_str()
                );
                Ok(())
            }
            Err(err) => {
                if let Err(rollback_err) = store.rollback() {
                    warn!(
                        "event=uow_delete module=persist status=degraded reason=rollback_failed error={rollback_err}"
                    );
                }
                self.registry = snapshot;
                error!(
                    "event=uow_delete module=persist status=error record_type={} error={err}",
                    record_type.as_str()
                );
                Err(err)
            }
        }
    }

    fn delete_cascade<S: AttributeStore + ?Sized>(
        &mut self,
        id: &str,
        store: &mut S,
    ) -> PersistResult<usize> {
        let mut deleted = 0;
        let queued = std::mem::take(&mut self.live_object_mut(id)?.deleted_objects);
        for mut queued_object in queued {
            if !queued_object.entity.is_new() {
                deleted += self.delete_records(&mut queued_object, store)?;
            }
        }
        if self.live_object(id)?.body.as_container().is_some() {
            deleted += self.delete_container_parts(id, store)?;
        }

        let mut object = self
            .registry
            .remove_object(id)
            .ok_or_else(|| PersistError::ObjectNotFound(id.to_string()))?;
        let result = self.delete_records(&mut object, store);
        self.registry.put_object(object);
        Ok(deleted + result?)
    }

    /// Deletes tracked attribute records, then the object's own record.
    pub(crate) fn delete_records<S: AttributeStore + ?Sized>(
        &mut self,
        object: &mut PersistentObject,
        store: &mut S,
    ) -> PersistResult<usize> {
        let mut writer = AttributeWriter::new(
            object.entity.id(),
            &mut object.cache,
            &mut *store,
            self.registry.ids_mut(),
        );
        let deleted = writer.delete_tracked_records()?;
        store.delete_record(object.entity.id(), object.record_type)?;
        Ok(deleted + 1)
    }

    /// Evicts an owned sub-object into the owner's deleted queue.
    pub fn add_to_deleted_objects(&mut self, owner_id: &str, member_id: &str) -> PersistResult<()> {
        self.live_object(owner_id)?;
        let member = self.live_object(member_id)?;
        if owner_id == member_id {
            return Err(PersistError::InvalidMember {
                member_id: member_id.to_string(),
                expected: "owned sub-object",
                actual: member.record_type,
            });
        }
        self.perform(Box::new(QueueEdit::enqueue(owner_id, member_id)))?;
        self.events.emit(&ModelEvent::deleted(member_id));
        debug!("event=deleted_queue_add module=persist status=ok");
        Ok(())
    }

    /// Reinstates a queued sub-object into the registry.
    pub fn remove_from_deleted_objects(
        &mut self,
        owner_id: &str,
        member_id: &str,
    ) -> PersistResult<()> {
        let queued = self
            .live_object(owner_id)?
            .deleted_objects
            .iter()
            .any(|queued| queued.id() == member_id);
        if !queued {
            return Err(PersistError::NotInList {
                container_id: owner_id.to_string(),
                member_id: member_id.to_string(),
            });
        }
        self.perform(Box::new(QueueEdit::reinstate(owner_id, member_id)))?;
        debug!("event=deleted_queue_remove module=persist status=ok");
        Ok(())
    }
}
