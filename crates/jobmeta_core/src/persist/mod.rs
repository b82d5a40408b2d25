//! Persistence core: unit of work, registry, attribute engine, identity
//! layer and composite containers.
//!
//! # Responsibility
//! - Synchronize in-memory model objects with an `AttributeStore`.
//! - Issue temporary ids, track changes and rewrite ids after commit.
//!
//! # Invariants
//! - Objects reference each other by id through `ModelRegistry`, never by
//!   embedded pointers.
//! - A failed save/load/delete leaves every in-memory object as it was
//!   before the call.

pub mod attributes;
pub mod cache;
pub mod composite;
pub mod identity;
pub mod object;
pub mod registry;
mod selectors;
pub mod unit_of_work;

use crate::model::entity::{EntityValidationError, ObjectId};
use crate::model::undo::UndoApplyError;
use crate::repo::attribute_store::StoreError;
use crate::repo::schema::RecordType;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub use attributes::{AttributeReader, AttributeWriter, MatchBy, OptionAddress, OptionType};
pub use cache::{AttributeAddressMode, AttributeCache, GroupKey, PropertyKey, PropertyTracker};
pub use composite::{ContainerParts, SubList, TrackedList};
pub use identity::SaveOutcome;
pub use object::{ObjectBody, ObjectState, PersistentObject};
pub use registry::{IdAllocator, ModelRegistry};
pub use unit_of_work::{UnitOfWork, WorkMode};

pub type PersistResult<T> = Result<T, PersistError>;

/// Errors raised by the persistence core.
#[derive(Debug)]
pub enum PersistError {
    /// Rejected mutation; object state is unchanged.
    Validation(EntityValidationError),
    /// Store call failed during save/load/delete.
    Store(StoreError),
    /// Id does not resolve to a live object.
    ObjectNotFound(ObjectId),
    /// Object was deleted and accepts no further operations.
    ObjectDeleted(ObjectId),
    /// Container operation on an object without container parts.
    NotAContainer(ObjectId),
    /// Member is not part of the addressed sub-list.
    NotInList { container_id: ObjectId, member_id: ObjectId },
    /// Member kind does not fit the addressed sub-list or slot.
    InvalidMember {
        member_id: ObjectId,
        expected: &'static str,
        actual: RecordType,
    },
    /// Undo/redo replay failed.
    Undo(UndoApplyError),
    NothingToUndo,
    NothingToRedo,
    /// Undo/redo requested while a compound edit is still open.
    CompoundEditOpen,
}

impl Display for PersistError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::Store(err) => write!(f, "store synchronization failed: {err}"),
            Self::ObjectNotFound(id) => write!(f, "object not found: {id}"),
            Self::ObjectDeleted(id) => write!(f, "object was deleted: {id}"),
            Self::NotAContainer(id) => write!(f, "object is not a container: {id}"),
            Self::NotInList {
                container_id,
                member_id,
            } => write!(f, "object {member_id} is not a member of {container_id}"),
            Self::InvalidMember {
                member_id,
                expected,
                actual,
            } => write!(
                f,
                "object {member_id} of type {} cannot be used as {expected}",
                actual.as_str()
            ),
            Self::Undo(err) => write!(f, "undo replay failed: {err}"),
            Self::NothingToUndo => write!(f, "nothing to undo"),
            Self::NothingToRedo => write!(f, "nothing to redo"),
            Self::CompoundEditOpen => write!(f, "a compound edit is still open"),
        }
    }
}

impl Error for PersistError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Store(err) => Some(err),
            Self::Undo(err) => Some(err),
            _ => None,
        }
    }
}

impl From<EntityValidationError> for PersistError {
    fn from(value: EntityValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<StoreError> for PersistError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

impl From<UndoApplyError> for PersistError {
    fn from(value: UndoApplyError) -> Self {
        Self::Undo(value)
    }
}
