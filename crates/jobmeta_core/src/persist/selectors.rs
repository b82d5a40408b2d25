//! Field selectors replayed by the undo log.
//!
//! Every undoable mutator of the unit of work records a `FieldEdit` over one
//! of these selectors; the queue move of a removed member is `QueueEdit`.

use crate::model::entity::ObjectId;
use crate::model::undo::{no_remap, Direction, FieldSelector, UndoApplyError, UndoableEdit};
use crate::persist::attributes::StagedOption;
use crate::persist::cache::{remap_id, PropertyKey};
use crate::persist::composite::{ContainerParts, SubList};
use crate::persist::object::{ObjectBody, PersistentObject};
use crate::persist::registry::ModelRegistry;
use crate::repo::attribute_store::IdMap;

pub(crate) type StagedOptionSlot = (PropertyKey, Option<StagedOption>);
pub(crate) type CustomListSlot = (String, Option<Vec<ObjectId>>);
pub(crate) type UserPropertySlot = (String, Option<String>);
pub(crate) type MemberListSlot = (SubList, Vec<ObjectId>);

fn object_mut<'r>(
    registry: &'r mut ModelRegistry,
    id: &str,
) -> Result<&'r mut PersistentObject, UndoApplyError> {
    registry
        .get_object_mut(id)
        .ok_or_else(|| UndoApplyError::MissingTarget(id.to_string()))
}

fn container_mut<'r>(
    registry: &'r mut ModelRegistry,
    id: &str,
    field: &'static str,
) -> Result<&'r mut ContainerParts, UndoApplyError> {
    object_mut(registry, id)?
        .body
        .as_container_mut()
        .ok_or_else(|| UndoApplyError::FieldUnavailable {
            object_id: id.to_string(),
            field,
        })
}

fn unavailable(id: &str, field: &'static str) -> UndoApplyError {
    UndoApplyError::FieldUnavailable {
        object_id: id.to_string(),
        field,
    }
}

fn write_name(registry: &mut ModelRegistry, id: &str, value: &String) -> Result<(), UndoApplyError> {
    object_mut(registry, id)?.entity.set_loaded_name(value.clone());
    Ok(())
}

fn write_description(
    registry: &mut ModelRegistry,
    id: &str,
    value: &String,
) -> Result<(), UndoApplyError> {
    object_mut(registry, id)?
        .entity
        .set_description(value.clone());
    Ok(())
}

fn write_user_property(
    registry: &mut ModelRegistry,
    id: &str,
    value: &UserPropertySlot,
) -> Result<(), UndoApplyError> {
    let (key, property) = value;
    object_mut(registry, id)?
        .entity
        .set_user_property(key.clone(), property.clone());
    Ok(())
}

fn write_staged_option(
    registry: &mut ModelRegistry,
    id: &str,
    value: &StagedOptionSlot,
) -> Result<(), UndoApplyError> {
    let (key, staged) = value;
    let options = &mut object_mut(registry, id)?.staged.options;
    match staged {
        Some(staged) => {
            options.insert(key.clone(), staged.clone());
        }
        None => {
            options.remove(key);
        }
    }
    Ok(())
}

fn remap_staged_option(value: &mut StagedOptionSlot, id_map: &IdMap) {
    if let Some(staged) = value.1.as_mut() {
        staged.change.remap_ids(id_map);
    }
}

fn write_custom_list(
    registry: &mut ModelRegistry,
    id: &str,
    value: &CustomListSlot,
) -> Result<(), UndoApplyError> {
    let (name, objects) = value;
    let lists = &mut object_mut(registry, id)?.staged.custom_lists;
    match objects {
        Some(objects) => {
            lists.insert(name.clone(), objects.clone());
        }
        None => {
            lists.remove(name);
        }
    }
    Ok(())
}

fn remap_custom_list(value: &mut CustomListSlot, id_map: &IdMap) {
    for object_id in value.1.iter_mut().flatten() {
        remap_id(object_id, id_map);
    }
}

fn write_member_list(
    registry: &mut ModelRegistry,
    id: &str,
    value: &MemberListSlot,
) -> Result<(), UndoApplyError> {
    let (list, members) = value;
    container_mut(registry, id, list.as_str())?
        .list_mut(*list)
        .replace(members.clone());
    Ok(())
}

fn remap_member_list(value: &mut MemberListSlot, id_map: &IdMap) {
    for member_id in &mut value.1 {
        remap_id(member_id, id_map);
    }
}

fn write_private_note(
    registry: &mut ModelRegistry,
    id: &str,
    value: &Option<String>,
) -> Result<(), UndoApplyError> {
    container_mut(registry, id, "private_note")?.set_private_note(value.clone());
    Ok(())
}

fn write_folder(
    registry: &mut ModelRegistry,
    id: &str,
    value: &Option<ObjectId>,
) -> Result<(), UndoApplyError> {
    container_mut(registry, id, "folder")?.set_folder(value.clone());
    Ok(())
}

fn remap_optional_id(value: &mut Option<ObjectId>, id_map: &IdMap) {
    if let Some(object_id) = value.as_mut() {
        remap_id(object_id, id_map);
    }
}

fn write_text(registry: &mut ModelRegistry, id: &str, value: &String) -> Result<(), UndoApplyError> {
    match &mut object_mut(registry, id)?.body {
        ObjectBody::Note { text } | ObjectBody::Document { text } => {
            *text = value.clone();
            Ok(())
        }
        _ => Err(unavailable(id, "text")),
    }
}

fn write_extended_value(
    registry: &mut ModelRegistry,
    id: &str,
    value: &String,
) -> Result<(), UndoApplyError> {
    match &mut object_mut(registry, id)?.body {
        ObjectBody::ExtendedAttribute { value: current } => {
            *current = value.clone();
            Ok(())
        }
        _ => Err(unavailable(id, "value")),
    }
}

fn write_responsible_role(
    registry: &mut ModelRegistry,
    id: &str,
    value: &String,
) -> Result<(), UndoApplyError> {
    match &mut object_mut(registry, id)?.body {
        ObjectBody::ResponsibleParty { role, .. } => {
            *role = value.clone();
            Ok(())
        }
        _ => Err(unavailable(id, "role")),
    }
}

fn write_responsible_person(
    registry: &mut ModelRegistry,
    id: &str,
    value: &Option<ObjectId>,
) -> Result<(), UndoApplyError> {
    match &mut object_mut(registry, id)?.body {
        ObjectBody::ResponsibleParty { person_id, .. } => {
            *person_id = value.clone();
            Ok(())
        }
        _ => Err(unavailable(id, "person")),
    }
}

pub(crate) const NAME: FieldSelector<ModelRegistry, String> = FieldSelector {
    name: "name",
    write: write_name,
    remap: no_remap,
};

pub(crate) const DESCRIPTION: FieldSelector<ModelRegistry, String> = FieldSelector {
    name: "description",
    write: write_description,
    remap: no_remap,
};

pub(crate) const USER_PROPERTY: FieldSelector<ModelRegistry, UserPropertySlot> = FieldSelector {
    name: "user_property",
    write: write_user_property,
    remap: no_remap,
};

pub(crate) const STAGED_OPTION: FieldSelector<ModelRegistry, StagedOptionSlot> = FieldSelector {
    name: "option",
    write: write_staged_option,
    remap: remap_staged_option,
};

pub(crate) const STAGED_CUSTOM_LIST: FieldSelector<ModelRegistry, CustomListSlot> =
    FieldSelector {
        name: "custom_list",
        write: write_custom_list,
        remap: remap_custom_list,
    };

pub(crate) const MEMBER_LIST: FieldSelector<ModelRegistry, MemberListSlot> = FieldSelector {
    name: "members",
    write: write_member_list,
    remap: remap_member_list,
};

pub(crate) const PRIVATE_NOTE: FieldSelector<ModelRegistry, Option<String>> = FieldSelector {
    name: "private_note",
    write: write_private_note,
    remap: no_remap,
};

pub(crate) const FOLDER: FieldSelector<ModelRegistry, Option<ObjectId>> = FieldSelector {
    name: "folder",
    write: write_folder,
    remap: remap_optional_id,
};

pub(crate) const TEXT: FieldSelector<ModelRegistry, String> = FieldSelector {
    name: "text",
    write: write_text,
    remap: no_remap,
};

pub(crate) const EXTENDED_VALUE: FieldSelector<ModelRegistry, String> = FieldSelector {
    name: "value",
    write: write_extended_value,
    remap: no_remap,
};

pub(crate) const RESPONSIBLE_ROLE: FieldSelector<ModelRegistry, String> = FieldSelector {
    name: "role",
    write: write_responsible_role,
    remap: no_remap,
};

pub(crate) const RESPONSIBLE_PERSON: FieldSelector<ModelRegistry, Option<ObjectId>> =
    FieldSelector {
        name: "person",
        write: write_responsible_person,
        remap: remap_optional_id,
    };

/// Moves a member between the registry and its owner's deleted queue.
///
/// An enqueuing edit evicts on redo and reinstates on undo; a reinstating
/// edit does the reverse.
pub(crate) struct QueueEdit {
    owner_id: ObjectId,
    member_id: ObjectId,
    enqueue: bool,
}

impl QueueEdit {
    pub(crate) fn enqueue(owner_id: impl Into<ObjectId>, member_id: impl Into<ObjectId>) -> Self {
        Self {
            owner_id: owner_id.into(),
            member_id: member_id.into(),
            enqueue: true,
        }
    }

    pub(crate) fn reinstate(
        owner_id: impl Into<ObjectId>,
        member_id: impl Into<ObjectId>,
    ) -> Self {
        Self {
            enqueue: false,
            ..Self::enqueue(owner_id, member_id)
        }
    }
}

impl UndoableEdit<ModelRegistry> for QueueEdit {
    fn object_id(&self) -> &str {
        &self.member_id
    }

    fn label(&self) -> &'static str {
        "deleted_objects"
    }

    fn apply(&self, target: &mut ModelRegistry, direction: Direction) -> Result<(), UndoApplyError> {
        if self.enqueue == (direction == Direction::Redo) {
            enqueue(target, &self.owner_id, &self.member_id)
        } else {
            dequeue(target, &self.owner_id, &self.member_id)
        }
    }

    fn remap_ids(&mut self, id_map: &IdMap) {
        if let Some(owner_id) = id_map.get(&self.owner_id) {
            self.owner_id = owner_id.clone();
        }
        if let Some(member_id) = id_map.get(&self.member_id) {
            self.member_id = member_id.clone();
        }
    }

    fn object_ids(&self) -> Vec<&str> {
        vec![self.owner_id.as_str(), self.member_id.as_str()]
    }
}

/// Evicts `member_id` from the registry into the owner's deleted queue.
pub(crate) fn enqueue(
    registry: &mut ModelRegistry,
    owner_id: &str,
    member_id: &str,
) -> Result<(), UndoApplyError> {
    if !registry.contains(owner_id) {
        return Err(UndoApplyError::MissingTarget(owner_id.to_string()));
    }
    let member = registry
        .remove_object(member_id)
        .ok_or_else(|| UndoApplyError::MissingTarget(member_id.to_string()))?;
    object_mut(registry, owner_id)?.deleted_objects.push(member);
    Ok(())
}

/// Takes `member_id` out of the owner's deleted queue back into the registry.
pub(crate) fn dequeue(
    registry: &mut ModelRegistry,
    owner_id: &str,
    member_id: &str,
) -> Result<(), UndoApplyError> {
    let owner = object_mut(registry, owner_id)?;
    let position = owner
        .deleted_objects
        .iter()
        .position(|queued| queued.id() == member_id)
        .ok_or_else(|| UndoApplyError::MissingTarget(member_id.to_string()))?;
    let member = owner.deleted_objects.remove(position);
    registry.put_object(member);
    Ok(())
}
