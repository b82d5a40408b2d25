#![allow(dead_code)]

use jobmeta_core::db::open_db_in_memory;
use jobmeta_core::{
    Association, AttributeStore, IdMap, ModelEvent, ModelEventKind, ModelListener,
    PermissionError, PermissionService, RecordType, SqliteAttributeStore, StoreError, StoreResult,
};
use rusqlite::Connection;
use std::cell::RefCell;

pub fn open_store_db() -> Connection {
    open_db_in_memory().unwrap()
}

/// Store wrapper that logs every call by name and can fail one kind of call.
pub struct RecordingStore<'conn> {
    inner: SqliteAttributeStore<'conn>,
    calls: RefCell<Vec<&'static str>>,
    fail_on: Option<&'static str>,
}

impl<'conn> RecordingStore<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self {
            inner: SqliteAttributeStore::try_new(conn).unwrap(),
            calls: RefCell::new(Vec::new()),
            fail_on: None,
        }
    }

    pub fn inner(&self) -> &SqliteAttributeStore<'conn> {
        &self.inner
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.borrow().clone()
    }

    pub fn count(&self, call: &str) -> usize {
        self.calls.borrow().iter().filter(|name| **name == call).count()
    }

    pub fn clear_calls(&self) {
        self.calls.borrow_mut().clear();
    }

    /// Makes every later call named `call` fail until `heal`.
    pub fn fail_on(&mut self, call: &'static str) {
        self.fail_on = Some(call);
    }

    pub fn heal(&mut self) {
        self.fail_on = None;
    }

    fn record(&self, call: &'static str) -> StoreResult<()> {
        self.calls.borrow_mut().push(call);
        if self.fail_on == Some(call) {
            return Err(StoreError::Backend(format!("injected failure on {call}")));
        }
        Ok(())
    }
}

impl AttributeStore for RecordingStore<'_> {
    fn begin(&mut self) -> StoreResult<()> {
        self.record("begin")?;
        self.inner.begin()
    }

    fn commit(&mut self) -> StoreResult<IdMap> {
        self.record("commit")?;
        self.inner.commit()
    }

    fn rollback(&mut self) -> StoreResult<()> {
        self.calls.borrow_mut().push("rollback");
        self.inner.rollback()
    }

    fn acquire_record(&mut self, id: &str, record_type: RecordType) -> StoreResult<()> {
        self.record("acquire_record")?;
        self.inner.acquire_record(id, record_type)
    }

    fn delete_record(&mut self, id: &str, record_type: RecordType) -> StoreResult<()> {
        self.record("delete_record")?;
        self.inner.delete_record(id, record_type)
    }

    fn record_type(&self, id: &str) -> StoreResult<Option<RecordType>> {
        self.record("record_type")?;
        self.inner.record_type(id)
    }

    fn field(&self, id: &str, name: &str) -> StoreResult<Option<String>> {
        self.record("field")?;
        self.inner.field(id, name)
    }

    fn set_field(&mut self, id: &str, name: &str, value: &str) -> StoreResult<()> {
        self.record("set_field")?;
        self.inner.set_field(id, name, value)
    }

    fn association(&self, id: &str, association: Association) -> StoreResult<Vec<String>> {
        self.record("association")?;
        self.inner.association(id, association)
    }

    fn set_association(
        &mut self,
        id: &str,
        association: Association,
        members: &[String],
    ) -> StoreResult<()> {
        self.record("set_association")?;
        self.inner.set_association(id, association, members)
    }

    fn add_to_association(
        &mut self,
        id: &str,
        association: Association,
        member: &str,
    ) -> StoreResult<()> {
        self.record("add_to_association")?;
        self.inner.add_to_association(id, association, member)
    }

    fn remove_from_association(
        &mut self,
        id: &str,
        association: Association,
        member: &str,
    ) -> StoreResult<()> {
        self.record("remove_from_association")?;
        self.inner.remove_from_association(id, association, member)
    }
}

/// Listener collecting every delivered event.
#[derive(Default)]
pub struct EventRecorder {
    events: RefCell<Vec<ModelEvent>>,
}

impl EventRecorder {
    pub fn events(&self) -> Vec<ModelEvent> {
        self.events.borrow().clone()
    }

    pub fn deleted_sources(&self) -> Vec<String> {
        self.events
            .borrow()
            .iter()
            .filter(|event| event.kind == ModelEventKind::Deleted)
            .map(|event| event.source_id.clone())
            .collect()
    }

    pub fn changed_fields(&self) -> Vec<&'static str> {
        self.events
            .borrow()
            .iter()
            .filter_map(|event| match event.kind {
                ModelEventKind::Changed { field, .. } => Some(field),
                ModelEventKind::Deleted => None,
            })
            .collect()
    }
}

impl ModelListener for EventRecorder {
    fn on_event(&self, event: &ModelEvent) {
        self.events.borrow_mut().push(event.clone());
    }
}

/// Permission backend that is always unreachable.
pub struct OfflinePermissions;

impl PermissionService for OfflinePermissions {
    fn is_authorized(&self, _resource_ref: &str, _permission: &str) -> Result<bool, PermissionError> {
        Err(PermissionError::new("directory offline"))
    }
}

/// Creates an object, saves it and returns its permanent id.
pub fn create_saved<S: AttributeStore + ?Sized>(
    uow: &mut jobmeta_core::UnitOfWork,
    store: &mut S,
    record_type: RecordType,
    name: &str,
) -> String {
    let temporary_id = uow.create_object(record_type, name).unwrap();
    permanent_id(&uow.save(&temporary_id, store).unwrap(), &temporary_id)
}

/// Permanent id assigned to `temporary_id` by one save.
pub fn permanent_id(outcome: &jobmeta_core::SaveOutcome, temporary_id: &str) -> String {
    match outcome {
        jobmeta_core::SaveOutcome::Saved { id_map } => id_map
            .get(temporary_id)
            .cloned()
            .unwrap_or_else(|| panic!("{temporary_id} was not remapped")),
        jobmeta_core::SaveOutcome::Unchanged => panic!("save of {temporary_id} was a no-op"),
    }
}
