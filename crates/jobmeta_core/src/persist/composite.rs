//! Composite containers.
//!
//! # Responsibility
//! - Track the notes, documents, extended attributes and responsible
//!   parties a container owns, plus its private note and folder placement.
//! - Save only changed members, reconcile the folder link and repopulate
//!   every list on load.
//!
//! # Invariants
//! - A container reports changes when its own entity is dirty, any list
//!   differs from its persisted snapshot, any member has changes, the
//!   private note or folder moved, or its deleted queue is non-empty.
//! - At most one private note record exists per container.
//! - Editability is resolved once, on the first root load of a persisted
//!   container.

use crate::model::entity::ObjectId;
use crate::model::undo::FieldEdit;
use crate::persist::cache::remap_id;
use crate::persist::object::{ObjectBody, PersistentObject};
use crate::persist::selectors;
use crate::persist::unit_of_work::UnitOfWork;
use crate::persist::{PersistError, PersistResult};
use crate::repo::attribute_store::{AttributeStore, IdMap};
use crate::repo::schema::{
    is_temporary_id, Association, RecordType, DOCUMENT_TYPE_NOTE, FIELD_DOCUMENT_TYPE,
    FIELD_LOCKED_BY, FIELD_NAME, FIELD_STORED_TEXT, FIELD_TEXT_ROLE, TEXT_ROLE_PRIVATE_NOTE,
};
use log::{debug, error, info, warn};

const PRIVATE_NOTE_SEED: &str = "NOTE";

/// Member lists of a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SubList {
    Notes,
    Documents,
    ExtendedAttributes,
    ResponsibleParties,
}

impl SubList {
    pub const ALL: [SubList; 4] = [
        SubList::Notes,
        SubList::Documents,
        SubList::ExtendedAttributes,
        SubList::ResponsibleParties,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Notes => "notes",
            Self::Documents => "documents",
            Self::ExtendedAttributes => "extended_attributes",
            Self::ResponsibleParties => "responsible_parties",
        }
    }

    fn expected_kind(self) -> &'static str {
        match self {
            Self::Notes => "note",
            Self::Documents => "document",
            Self::ExtendedAttributes => "extended attribute",
            Self::ResponsibleParties => "responsible party",
        }
    }

    fn accepts(self, body: &ObjectBody) -> bool {
        body.kind() == self.expected_kind()
    }
}

/// Ordered member ids plus the ids last written to the store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackedList {
    ids: Vec<ObjectId>,
    persisted: Vec<ObjectId>,
}

impl TrackedList {
    pub fn ids(&self) -> &[ObjectId] {
        &self.ids
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.iter().any(|current| current == id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Whether members were added, removed or reordered since the last save.
    pub fn is_changed(&self) -> bool {
        self.ids != self.persisted
    }

    pub(crate) fn replace(&mut self, ids: Vec<ObjectId>) {
        self.ids = ids;
    }

    fn reset(&mut self, ids: Vec<ObjectId>) {
        self.persisted = ids.clone();
        self.ids = ids;
    }

    fn mark_persisted(&mut self) {
        self.persisted = self.ids.clone();
    }

    fn remap_ids(&mut self, id_map: &IdMap) {
        for id in self.ids.iter_mut().chain(self.persisted.iter_mut()) {
            remap_id(id, id_map);
        }
    }

    /// Drops repeated ids, keeping the first; returns how many were dropped.
    fn collapse_duplicates(&mut self) -> usize {
        let before = self.ids.len();
        dedupe(&mut self.ids);
        dedupe(&mut self.persisted);
        before - self.ids.len()
    }
}

fn dedupe(ids: &mut Vec<ObjectId>) {
    let mut seen: Vec<ObjectId> = Vec::with_capacity(ids.len());
    ids.retain(|id| {
        if seen.contains(id) {
            false
        } else {
            seen.push(id.clone());
            true
        }
    });
}

/// Container-specific state of a persistent object.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerParts {
    notes: TrackedList,
    documents: TrackedList,
    extended_attributes: TrackedList,
    responsible_parties: TrackedList,
    private_note: Option<String>,
    persisted_private_note: Option<String>,
    private_note_id: Option<ObjectId>,
    folder: Option<ObjectId>,
    previous_folder_id: Option<ObjectId>,
    editable: Option<bool>,
}

impl ContainerParts {
    pub fn list(&self, list: SubList) -> &TrackedList {
        match list {
            SubList::Notes => &self.notes,
            SubList::Documents => &self.documents,
            SubList::ExtendedAttributes => &self.extended_attributes,
            SubList::ResponsibleParties => &self.responsible_parties,
        }
    }

    pub(crate) fn list_mut(&mut self, list: SubList) -> &mut TrackedList {
        match list {
            SubList::Notes => &mut self.notes,
            SubList::Documents => &mut self.documents,
            SubList::ExtendedAttributes => &mut self.extended_attributes,
            SubList::ResponsibleParties => &mut self.responsible_parties,
        }
    }

    pub fn notes(&self) -> &[ObjectId] {
        self.notes.ids()
    }

    pub fn documents(&self) -> &[ObjectId] {
        self.documents.ids()
    }

    pub fn extended_attributes(&self) -> &[ObjectId] {
        self.extended_attributes.ids()
    }

    pub fn responsible_parties(&self) -> &[ObjectId] {
        self.responsible_parties.ids()
    }

    pub fn private_note(&self) -> Option<&str> {
        self.private_note.as_deref()
    }

    /// Store record holding the private note, once saved.
    pub fn private_note_id(&self) -> Option<&str> {
        self.private_note_id.as_deref()
    }

    pub fn folder(&self) -> Option<&str> {
        self.folder.as_deref()
    }

    /// Folder linked in the store before the pending placement change.
    pub fn previous_folder_id(&self) -> Option<&str> {
        self.previous_folder_id.as_deref()
    }

    /// Editability resolved at load; unresolved containers are editable.
    pub fn is_editable(&self) -> bool {
        self.editable.unwrap_or(true)
    }

    pub fn member_ids(&self) -> impl Iterator<Item = &ObjectId> {
        SubList::ALL
            .into_iter()
            .flat_map(move |list| self.list(list).ids().iter())
    }

    fn private_note_changed(&self) -> bool {
        self.private_note != self.persisted_private_note
    }

    fn folder_changed(&self) -> bool {
        self.folder != self.previous_folder_id
    }

    /// List, private note or folder changes; member state is not consulted.
    pub fn has_structural_changes(&self) -> bool {
        SubList::ALL
            .into_iter()
            .any(|list| self.list(list).is_changed())
            || self.private_note_changed()
            || self.folder_changed()
    }

    pub(crate) fn set_private_note(&mut self, note: Option<String>) {
        self.private_note = note;
    }

    pub(crate) fn set_folder(&mut self, folder: Option<ObjectId>) {
        self.folder = folder;
    }

    pub(crate) fn remap_ids(&mut self, id_map: &IdMap) {
        for list in SubList::ALL {
            self.list_mut(list).remap_ids(id_map);
        }
        for id in [
            &mut self.private_note_id,
            &mut self.folder,
            &mut self.previous_folder_id,
        ]
        .into_iter()
        .flatten()
        {
            remap_id(id, id_map);
        }
    }

    pub(crate) fn collapse_responsible_parties(&mut self) -> usize {
        self.responsible_parties.collapse_duplicates()
    }

    fn mark_persisted(&mut self, private_note_id: Option<ObjectId>) {
        for list in SubList::ALL {
            self.list_mut(list).mark_persisted();
        }
        self.persisted_private_note = self.private_note.clone();
        self.private_note_id = private_note_id;
        self.previous_folder_id = self.folder.clone();
    }
}

fn normalize_note(note: Option<String>) -> Option<String> {
    note.filter(|text| !text.trim().is_empty())
}

impl UnitOfWork {
    pub(crate) fn container(&self, id: &str) -> PersistResult<&ContainerParts> {
        self.live_object(id)?
            .body
            .as_container()
            .ok_or_else(|| PersistError::NotAContainer(id.to_string()))
    }

    fn container_mut(&mut self, id: &str) -> PersistResult<&mut ContainerParts> {
        self.live_object_mut(id)?
            .body
            .as_container_mut()
            .ok_or_else(|| PersistError::NotAContainer(id.to_string()))
    }

    fn record_member_list(
        &mut self,
        container_id: &str,
        list: SubList,
        members: Vec<ObjectId>,
    ) -> PersistResult<()> {
        let old = self.container(container_id)?.list(list).ids().to_vec();
        let old_text = Some(old.join(","));
        let new_text = Some(members.join(","));
        self.perform(Box::new(FieldEdit::new(
            container_id,
            selectors::MEMBER_LIST,
            (list, old),
            (list, members),
        )))?;
        self.emit_changed(container_id, list.as_str(), old_text, new_text);
        Ok(())
    }

    /// Appends a live member to one of the container's lists.
    pub fn add_member(
        &mut self,
        container_id: &str,
        list: SubList,
        member_id: &str,
    ) -> PersistResult<()> {
        let parts = self.container(container_id)?;
        if parts.list(list).contains(member_id) {
            return Ok(());
        }
        let mut members = parts.list(list).ids().to_vec();
        let member = self.live_object(member_id)?;
        if !list.accepts(&member.body) {
            return Err(PersistError::InvalidMember {
                member_id: member_id.to_string(),
                expected: list.expected_kind(),
                actual: member.record_type,
            });
        }

        members.push(member_id.to_string());
        self.record_member_list(container_id, list, members)?;
        self.events.ripple(member_id, container_id);
        Ok(())
    }

    /// Unlinks a member and queues it for store deletion, as one undo step.
    pub fn remove_member(
        &mut self,
        container_id: &str,
        list: SubList,
        member_id: &str,
    ) -> PersistResult<()> {
        let parts = self.container(container_id)?;
        if !parts.list(list).contains(member_id) {
            return Err(PersistError::NotInList {
                container_id: container_id.to_string(),
                member_id: member_id.to_string(),
            });
        }
        let members: Vec<ObjectId> = parts
            .list(list)
            .ids()
            .iter()
            .filter(|current| current.as_str() != member_id)
            .cloned()
            .collect();
        self.live_object(member_id)?;

        self.start_compound();
        let result = self
            .record_member_list(container_id, list, members)
            .and_then(|()| self.add_to_deleted_objects(container_id, member_id));
        self.end_compound();
        result
    }

    /// Sets or clears the private note; blank text clears it.
    pub fn set_private_note(&mut self, container_id: &str, note: Option<&str>) -> PersistResult<()> {
        let note = normalize_note(note.map(str::to_string));
        let old = self.container(container_id)?.private_note.clone();
        if old == note {
            return Ok(());
        }
        self.perform(Box::new(FieldEdit::new(
            container_id,
            selectors::PRIVATE_NOTE,
            old.clone(),
            note.clone(),
        )))?;
        self.emit_changed(container_id, selectors::PRIVATE_NOTE.name, old, note);
        Ok(())
    }

    /// Places the container in `folder_id`, or removes it from its folder.
    pub fn set_folder(&mut self, container_id: &str, folder_id: Option<&str>) -> PersistResult<()> {
        if let Some(folder_id) = folder_id {
            match self.registry.get_object(folder_id) {
                Some(folder) if folder.record_type != RecordType::Folder => {
                    return Err(PersistError::InvalidMember {
                        member_id: folder_id.to_string(),
                        expected: "folder",
                        actual: folder.record_type,
                    });
                }
                None if is_temporary_id(folder_id) => {
                    return Err(PersistError::ObjectNotFound(folder_id.to_string()));
                }
                _ => {}
            }
        }
        let folder = folder_id.map(str::to_string);
        let old = self.container(container_id)?.folder.clone();
        if old == folder {
            return Ok(());
        }
        self.perform(Box::new(FieldEdit::new(
            container_id,
            selectors::FOLDER,
            old.clone(),
            folder.clone(),
        )))?;
        self.emit_changed(container_id, selectors::FOLDER.name, old, folder);
        Ok(())
    }

    pub fn is_editable(&self, container_id: &str) -> PersistResult<bool> {
        Ok(self.container(container_id)?.is_editable())
    }

    fn save_member<S: AttributeStore + ?Sized>(
        &mut self,
        member_id: &str,
        store: &mut S,
    ) -> PersistResult<()> {
        match self.registry.get_object(member_id) {
            Some(member) if self.object_changed(member) => self.save_object(member_id, store),
            Some(_) => Ok(()),
            None => {
                debug!("event=member_save module=persist status=skip reason=not_live");
                Ok(())
            }
        }
    }

    /// Writes private note, member lists and folder link of one container.
    pub(crate) fn save_container_parts<S: AttributeStore + ?Sized>(
        &mut self,
        container_id: &str,
        store: &mut S,
    ) -> PersistResult<()> {
        let parts = self.container(container_id)?.clone();

        let mut private_note_id = parts.private_note_id.clone();
        if parts.private_note_changed() {
            match (parts.private_note.as_deref(), parts.private_note_id.as_deref()) {
                (Some(text), Some(note_id)) => {
                    store.set_field(note_id, FIELD_STORED_TEXT, text)?;
                }
                (Some(text), None) => {
                    let note_id = self.registry.ids_mut().allocate(PRIVATE_NOTE_SEED, |_| false);
                    store.acquire_record(&note_id, RecordType::TextStore)?;
                    store.set_field(&note_id, FIELD_NAME, TEXT_ROLE_PRIVATE_NOTE)?;
                    store.set_field(&note_id, FIELD_TEXT_ROLE, TEXT_ROLE_PRIVATE_NOTE)?;
                    store.set_field(&note_id, FIELD_STORED_TEXT, text)?;
                    if !store.association_contains(container_id, Association::Notes, &note_id)? {
                        store.add_to_association(container_id, Association::Notes, &note_id)?;
                    }
                    private_note_id = Some(note_id);
                }
                (None, Some(note_id)) => {
                    store.delete_record(note_id, RecordType::TextStore)?;
                    private_note_id = None;
                }
                (None, None) => {}
            }
        }

        for member_id in parts.notes.ids().iter().chain(parts.documents.ids()) {
            self.save_member(member_id, store)?;
        }
        if parts.notes.is_changed() || parts.documents.is_changed() {
            let documents: Vec<ObjectId> = parts
                .notes
                .ids()
                .iter()
                .chain(parts.documents.ids())
                .cloned()
                .collect();
            store.set_association(container_id, Association::Documents, &documents)?;
        }

        for (list, association) in [
            (&parts.extended_attributes, Association::Extensions),
            (&parts.responsible_parties, Association::ResponsibleParties),
        ] {
            for member_id in list.ids() {
                self.save_member(member_id, store)?;
            }
            if list.is_changed() {
                store.set_association(container_id, association, list.ids())?;
            }
        }

        if parts.folder_changed() {
            if let Some(folder_id) = parts.folder.as_deref() {
                if is_temporary_id(folder_id) {
                    self.save_member(folder_id, store)?;
                }
                if !store.association_contains(container_id, Association::Trees, folder_id)? {
                    store.add_to_association(container_id, Association::Trees, folder_id)?;
                }
            }
            if let Some(previous_id) = parts.previous_folder_id.as_deref() {
                store.remove_from_association(container_id, Association::Trees, previous_id)?;
            }
        }

        self.container_mut(container_id)?
            .mark_persisted(private_note_id);
        Ok(())
    }

    /// Deletes owned extended attributes and the private note record.
    pub(crate) fn delete_container_parts<S: AttributeStore + ?Sized>(
        &mut self,
        container_id: &str,
        store: &mut S,
    ) -> PersistResult<usize> {
        let parts = self.container(container_id)?.clone();
        let mut deleted = 0;
        for member_id in parts.extended_attributes.ids() {
            if let Some(mut member) = self.registry.remove_object(member_id) {
                deleted += self.delete_records(&mut member, store)?;
            }
        }
        if let Some(note_id) = parts.private_note_id.as_deref() {
            store.delete_record(note_id, RecordType::TextStore)?;
            deleted += 1;
        }
        Ok(deleted)
    }

    /// Reads every member list, the private note and folder placement.
    pub(crate) fn read_container_parts<S: AttributeStore + ?Sized>(
        &self,
        container_id: &str,
        existing: Option<&ContainerParts>,
        store: &S,
        root: bool,
        loaded: &mut Vec<PersistentObject>,
    ) -> PersistResult<ContainerParts> {
        let mut notes = Vec::new();
        let mut documents = Vec::new();
        for member_id in store.association(container_id, Association::Documents)? {
            let member = self.read_member(&member_id, RecordType::Document, store, loaded)?;
            match member.body {
                ObjectBody::Note { .. } => notes.push(member_id),
                _ => documents.push(member_id),
            }
            loaded.push(member);
        }

        let mut extended_attributes = Vec::new();
        for member_id in store.association(container_id, Association::Extensions)? {
            let member =
                self.read_member(&member_id, RecordType::ExtendedAttribute, store, loaded)?;
            loaded.push(member);
            extended_attributes.push(member_id);
        }

        let mut responsible_parties = Vec::new();
        for member_id in store.association(container_id, Association::ResponsibleParties)? {
            if responsible_parties.contains(&member_id) {
                continue;
            }
            let member =
                self.read_member(&member_id, RecordType::ResponsibleParty, store, loaded)?;
            loaded.push(member);
            responsible_parties.push(member_id);
        }

        let mut parts = ContainerParts::default();
        parts.notes.reset(notes);
        parts.documents.reset(documents);
        parts.extended_attributes.reset(extended_attributes);
        parts.responsible_parties.reset(responsible_parties);

        for note_id in store.association(container_id, Association::Notes)? {
            if store.field(&note_id, FIELD_TEXT_ROLE)?.as_deref() != Some(TEXT_ROLE_PRIVATE_NOTE) {
                continue;
            }
            parts.private_note = normalize_note(store.field(&note_id, FIELD_STORED_TEXT)?);
            parts.persisted_private_note = parts.private_note.clone();
            parts.private_note_id = Some(note_id);
            break;
        }

        for tree_id in store.association(container_id, Association::Trees)? {
            if store.record_type(&tree_id)? == Some(RecordType::Folder) {
                parts.folder = Some(tree_id.clone());
                parts.previous_folder_id = Some(tree_id);
                break;
            }
        }

        parts.editable = existing.and_then(|existing| existing.editable);
        if root && parts.editable.is_none() && !is_temporary_id(container_id) {
            parts.editable = Some(self.resolve_editable(container_id, store)?);
        }
        Ok(parts)
    }

    fn read_member<S: AttributeStore + ?Sized>(
        &self,
        member_id: &str,
        record_type: RecordType,
        store: &S,
        loaded: &mut Vec<PersistentObject>,
    ) -> PersistResult<PersistentObject> {
        let existing = self.registry.get_object(member_id);
        self.read_object(member_id, record_type, existing, store, false, loaded)
    }

    fn resolve_editable<S: AttributeStore + ?Sized>(
        &self,
        container_id: &str,
        store: &S,
    ) -> PersistResult<bool> {
        let locked_by = store
            .field(container_id, FIELD_LOCKED_BY)?
            .unwrap_or_default();
        if !locked_by.trim().is_empty() {
            info!("event=editability_check module=persist status=ok editable=false reason=checked_out");
            return Ok(false);
        }
        let Some(permissions) = self.permissions.as_ref() else {
            return Ok(true);
        };
        match permissions.is_authorized(container_id, &self.config.edit_permission) {
            Ok(allowed) => {
                info!("event=editability_check module=persist status=ok editable={allowed}");
                Ok(allowed)
            }
            Err(err) => {
                error!("event=editability_check module=persist status=error editable=false error={err}");
                Ok(false)
            }
        }
    }

    /// Collapses repeated responsible-party ids left behind by a remap.
    pub(crate) fn collapse_responsible_parties(&mut self) {
        for object in self.registry.objects_mut() {
            let Some(parts) = object.body.as_container_mut() else {
                continue;
            };
            let collapsed = parts.collapse_responsible_parties();
            if collapsed > 0 {
                warn!(
                    "event=responsible_party_collapse module=persist status=degraded collapsed={collapsed}"
                );
            }
        }
    }
}

/// Body of a `Document` record, classified by its `DocumentType`.
pub(crate) fn read_document_body<S: AttributeStore + ?Sized>(
    id: &str,
    store: &S,
) -> PersistResult<ObjectBody> {
    let text = store.field(id, FIELD_STORED_TEXT)?.unwrap_or_default();
    if store.field(id, FIELD_DOCUMENT_TYPE)?.as_deref() == Some(DOCUMENT_TYPE_NOTE) {
        Ok(ObjectBody::Note { text })
    } else {
        Ok(ObjectBody::Document { text })
    }
}
