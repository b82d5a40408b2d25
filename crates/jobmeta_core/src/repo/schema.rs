//! Record-type, association and field vocabulary of the metadata store.
//!
//! # Responsibility
//! - Name every record type and association the persistence core reads or
//!   writes, with stable storage strings.
//! - Own the temporary-id predicate shared by the store and the registry.
//!
//! # Invariants
//! - `as_str` and `parse` round-trip for every variant.
//! - A temporary id is `$` followed by at least one non-blank character.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static TEMPORARY_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\$[^\s$]+$").expect("valid temporary id regex"));

/// Returns whether `id` was issued locally and not yet accepted by the store.
pub fn is_temporary_id(id: &str) -> bool {
    TEMPORARY_ID_RE.is_match(id)
}

/// Remote record type of one stored record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RecordType {
    Job,
    Transformation,
    Table,
    Column,
    SortSpec,
    Folder,
    Person,
    /// Public note or document attached to a container.
    Document,
    /// Private note text.
    TextStore,
    ExtendedAttribute,
    ResponsibleParty,
    /// Generic attribute record.
    Property,
    /// Attribute group record.
    PropertySet,
    /// Intermediate record letting one attribute reference an object list.
    ObjectHolder,
    /// Named, ordered list of arbitrary object references.
    CustomAssociation,
}

impl RecordType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Job => "Job",
            Self::Transformation => "Transformation",
            Self::Table => "Table",
            Self::Column => "Column",
            Self::SortSpec => "SortSpec",
            Self::Folder => "Folder",
            Self::Person => "Person",
            Self::Document => "Document",
            Self::TextStore => "TextStore",
            Self::ExtendedAttribute => "ExtendedAttribute",
            Self::ResponsibleParty => "ResponsibleParty",
            Self::Property => "Property",
            Self::PropertySet => "PropertySet",
            Self::ObjectHolder => "ObjectHolder",
            Self::CustomAssociation => "CustomAssociation",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        ALL_RECORD_TYPES
            .iter()
            .copied()
            .find(|record_type| record_type.as_str() == value)
    }
}

const ALL_RECORD_TYPES: &[RecordType] = &[
    RecordType::Job,
    RecordType::Transformation,
    RecordType::Table,
    RecordType::Column,
    RecordType::SortSpec,
    RecordType::Folder,
    RecordType::Person,
    RecordType::Document,
    RecordType::TextStore,
    RecordType::ExtendedAttribute,
    RecordType::ResponsibleParty,
    RecordType::Property,
    RecordType::PropertySet,
    RecordType::ObjectHolder,
    RecordType::CustomAssociation,
];

/// Ordered association list exposed by a stored record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Association {
    /// Owner -> Property (direct addressing).
    Properties,
    /// Owner -> PropertySet.
    PropertySets,
    /// PropertySet -> Property ("set properties" flavour).
    SetProperties,
    /// PropertySet -> Property ("properties" flavour, older data).
    GroupProperties,
    /// Property -> ObjectHolder.
    PropertyHolder,
    /// ObjectHolder -> referenced objects.
    HeldObjects,
    /// Owner or Property -> CustomAssociation.
    CustomAssociations,
    /// CustomAssociation -> referenced objects.
    AssociatedObjects,
    /// Container -> Document (notes and documents).
    Documents,
    /// Container -> TextStore (private note).
    Notes,
    /// Container -> ExtendedAttribute.
    Extensions,
    /// Container -> ResponsibleParty.
    ResponsibleParties,
    /// ResponsibleParty -> Person.
    Persons,
    /// Container -> Folder.
    Trees,
}

impl Association {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Properties => "Properties",
            Self::PropertySets => "PropertySets",
            Self::SetProperties => "SetProperties",
            Self::GroupProperties => "GroupProperties",
            Self::PropertyHolder => "PropertyHolder",
            Self::HeldObjects => "HeldObjects",
            Self::CustomAssociations => "CustomAssociations",
            Self::AssociatedObjects => "AssociatedObjects",
            Self::Documents => "Documents",
            Self::Notes => "Notes",
            Self::Extensions => "Extensions",
            Self::ResponsibleParties => "ResponsibleParties",
            Self::Persons => "Persons",
            Self::Trees => "Trees",
        }
    }
}

pub const FIELD_NAME: &str = "Name";
pub const FIELD_DESC: &str = "Desc";
pub const FIELD_PROPERTY_NAME: &str = "PropertyName";
pub const FIELD_DEFAULT_VALUE: &str = "DefaultValue";
pub const FIELD_SQL_TYPE: &str = "SQLType";
pub const FIELD_SET_ROLE: &str = "SetRole";
pub const FIELD_DOCUMENT_TYPE: &str = "DocumentType";
pub const FIELD_STORED_TEXT: &str = "StoredText";
pub const FIELD_TEXT_ROLE: &str = "TextRole";
pub const FIELD_VALUE: &str = "Value";
pub const FIELD_ROLE: &str = "Role";
pub const FIELD_LOCKED_BY: &str = "LockedBy";

/// `DocumentType` value classifying a document record as a public note.
pub const DOCUMENT_TYPE_NOTE: &str = "Note";
/// `DocumentType` value classifying a document record as a document.
pub const DOCUMENT_TYPE_DOCUMENT: &str = "Document";
/// `TextRole` value marking the single private note of a container.
pub const TEXT_ROLE_PRIVATE_NOTE: &str = "PrivateNote";
