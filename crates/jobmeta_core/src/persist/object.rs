//! Persistent model objects.
//!
//! # Responsibility
//! - Pair an `Entity` with its store record type, kind-specific body,
//!   attribute cache, staged option writes and deleted-object queue.
//!
//! # Invariants
//! - `body` matches `record_type` (`ObjectBody::for_record_type`).
//! - Queued deleted objects are never live in the registry at the same time.

use crate::model::entity::{Entity, ObjectId};
use crate::persist::attributes::StagedAttributes;
use crate::persist::cache::{remap_id, AttributeCache};
use crate::persist::composite::ContainerParts;
use crate::repo::attribute_store::IdMap;
use crate::repo::schema::RecordType;

/// Lifecycle state of an object as seen by the unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectState {
    /// Temporary id, never persisted.
    New,
    /// Permanent id, no pending changes.
    Saved,
    /// Permanent id with pending changes.
    Modified,
    /// Deleted from the store; terminal.
    Deleted,
}

/// Kind-specific state of a persistent object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObjectBody {
    /// Job-model object without extra state.
    Plain,
    /// Object owning notes, documents, extensions and responsible parties.
    Container(ContainerParts),
    Note { text: String },
    Document { text: String },
    ExtendedAttribute { value: String },
    ResponsibleParty {
        person_id: Option<ObjectId>,
        role: String,
    },
}

impl ObjectBody {
    /// Default body for freshly created objects of one record type.
    pub fn for_record_type(record_type: RecordType) -> Self {
        match record_type {
            RecordType::Job
            | RecordType::Transformation
            | RecordType::Table
            | RecordType::Column
            | RecordType::SortSpec => Self::Container(ContainerParts::default()),
            RecordType::Document => Self::Document {
                text: String::new(),
            },
            RecordType::ExtendedAttribute => Self::ExtendedAttribute {
                value: String::new(),
            },
            RecordType::ResponsibleParty => Self::ResponsibleParty {
                person_id: None,
                role: String::new(),
            },
            _ => Self::Plain,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Plain => "plain",
            Self::Container(_) => "container",
            Self::Note { .. } => "note",
            Self::Document { .. } => "document",
            Self::ExtendedAttribute { .. } => "extended attribute",
            Self::ResponsibleParty { .. } => "responsible party",
        }
    }

    pub fn as_container(&self) -> Option<&ContainerParts> {
        match self {
            Self::Container(parts) => Some(parts),
            _ => None,
        }
    }

    pub fn as_container_mut(&mut self) -> Option<&mut ContainerParts> {
        match self {
            Self::Container(parts) => Some(parts),
            _ => None,
        }
    }
}

/// One live model object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistentObject {
    pub(crate) entity: Entity,
    pub(crate) record_type: RecordType,
    pub(crate) body: ObjectBody,
    pub(crate) cache: AttributeCache,
    pub(crate) staged: StagedAttributes,
    pub(crate) deleted_objects: Vec<PersistentObject>,
    pub(crate) deleted: bool,
}

impl PersistentObject {
    pub(crate) fn new(entity: Entity, record_type: RecordType, body: ObjectBody) -> Self {
        Self {
            entity,
            record_type,
            body,
            cache: AttributeCache::new(),
            staged: StagedAttributes::default(),
            deleted_objects: Vec::new(),
            deleted: false,
        }
    }

    pub fn id(&self) -> &str {
        self.entity.id()
    }

    pub fn entity(&self) -> &Entity {
        &self.entity
    }

    pub fn record_type(&self) -> RecordType {
        self.record_type
    }

    pub fn body(&self) -> &ObjectBody {
        &self.body
    }

    pub fn cache(&self) -> &AttributeCache {
        &self.cache
    }

    pub fn container(&self) -> Option<&ContainerParts> {
        self.body.as_container()
    }

    /// Objects removed from this owner and awaiting store deletion.
    pub fn deleted_objects(&self) -> &[PersistentObject] {
        &self.deleted_objects
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    /// Text of a note or document member.
    pub fn text(&self) -> Option<&str> {
        match &self.body {
            ObjectBody::Note { text } | ObjectBody::Document { text } => Some(text),
            _ => None,
        }
    }

    /// Changes held by this object alone, ignoring container members.
    pub(crate) fn has_local_changes(&self) -> bool {
        self.entity.is_dirty()
            || !self.deleted_objects.is_empty()
            || self
                .body
                .as_container()
                .is_some_and(ContainerParts::has_structural_changes)
    }

    /// Rewrites own and referenced temporary ids known to `id_map`.
    pub(crate) fn remap_ids(&mut self, id_map: &IdMap) {
        let mut id = self.entity.id().to_string();
        if remap_id(&mut id, id_map) {
            self.entity.set_id(id);
        }
        self.cache.remap_ids(id_map);
        self.staged.remap_ids(id_map);
        match &mut self.body {
            ObjectBody::Container(parts) => parts.remap_ids(id_map),
            ObjectBody::ResponsibleParty {
                person_id: Some(person_id),
                ..
            } => {
                remap_id(person_id, id_map);
            }
            _ => {}
        }
        for queued in &mut self.deleted_objects {
            queued.remap_ids(id_map);
        }
    }
}
