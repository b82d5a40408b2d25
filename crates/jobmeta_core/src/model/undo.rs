//! Reversible edit log.
//!
//! # Responsibility
//! - Describe every persisted-state mutation as a reversible edit.
//! - Replay edits in strict stack order, grouping compound operations into
//!   one step.
//!
//! # Invariants
//! - Recording a new edit clears the redo stack.
//! - Edits recorded between `start_compound` and the matching
//!   `end_compound` undo and redo as one step; nesting is allowed.
//! - Replaying an edit never records a new one.

use crate::model::entity::ObjectId;
use crate::repo::attribute_store::IdMap;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Replay direction of an edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Undo,
    Redo,
}

impl Direction {
    pub fn reversed(self) -> Self {
        match self {
            Self::Undo => Self::Redo,
            Self::Redo => Self::Undo,
        }
    }
}

/// Failure while replaying an edit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UndoApplyError {
    /// The object the edit targets is no longer live.
    MissingTarget(ObjectId),
    /// The object exists but does not carry the edited field.
    FieldUnavailable {
        object_id: ObjectId,
        field: &'static str,
    },
}

impl Display for UndoApplyError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingTarget(id) => write!(f, "edit target is not live: {id}"),
            Self::FieldUnavailable { object_id, field } => {
                write!(f, "object {object_id} has no field `{field}`")
            }
        }
    }
}

impl Error for UndoApplyError {}

/// One reversible edit over a target model `T`.
pub trait UndoableEdit<T> {
    /// Object the edit applies to.
    fn object_id(&self) -> &str;
    /// Short label, used for logging.
    fn label(&self) -> &'static str;
    fn apply(&self, target: &mut T, direction: Direction) -> Result<(), UndoApplyError>;
    /// Rewrites temporary ids held by the edit.
    fn remap_ids(&mut self, id_map: &IdMap);

    /// Every object the edit writes to.
    fn object_ids(&self) -> Vec<&str> {
        vec![self.object_id()]
    }
}

/// Field accessor shared by every edit of one field.
pub struct FieldSelector<T, V> {
    pub name: &'static str,
    pub write: fn(&mut T, &str, &V) -> Result<(), UndoApplyError>,
    pub remap: fn(&mut V, &IdMap),
}

impl<T, V> Clone for FieldSelector<T, V> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T, V> Copy for FieldSelector<T, V> {}

/// Remap hook for field values that hold no object ids.
pub fn no_remap<V>(_value: &mut V, _id_map: &IdMap) {}

/// Old/new pair for one field of one object.
pub struct FieldEdit<T, V> {
    object_id: ObjectId,
    selector: FieldSelector<T, V>,
    old_value: V,
    new_value: V,
}

impl<T, V> FieldEdit<T, V> {
    pub fn new(
        object_id: impl Into<ObjectId>,
        selector: FieldSelector<T, V>,
        old_value: V,
        new_value: V,
    ) -> Self {
        Self {
            object_id: object_id.into(),
            selector,
            old_value,
            new_value,
        }
    }
}

impl<T, V> UndoableEdit<T> for FieldEdit<T, V> {
    fn object_id(&self) -> &str {
        &self.object_id
    }

    fn label(&self) -> &'static str {
        self.selector.name
    }

    fn apply(&self, target: &mut T, direction: Direction) -> Result<(), UndoApplyError> {
        let value = match direction {
            Direction::Undo => &self.old_value,
            Direction::Redo => &self.new_value,
        };
        (self.selector.write)(target, &self.object_id, value)
    }

    fn remap_ids(&mut self, id_map: &IdMap) {
        if let Some(new_id) = id_map.get(&self.object_id) {
            self.object_id = new_id.clone();
        }
        (self.selector.remap)(&mut self.old_value, id_map);
        (self.selector.remap)(&mut self.new_value, id_map);
    }
}

/// Edits grouped into one undo step.
pub struct CompoundEdit<T> {
    edits: Vec<Box<dyn UndoableEdit<T>>>,
}

impl<T> UndoableEdit<T> for CompoundEdit<T> {
    fn object_id(&self) -> &str {
        self.edits.first().map_or("", |edit| edit.object_id())
    }

    fn label(&self) -> &'static str {
        "compound"
    }

    /// Replays every grouped edit or none: on failure the edits already
    /// replayed are reverted before the error is returned.
    fn apply(&self, target: &mut T, direction: Direction) -> Result<(), UndoApplyError> {
        let ordered: Vec<&Box<dyn UndoableEdit<T>>> = match direction {
            Direction::Undo => self.edits.iter().rev().collect(),
            Direction::Redo => self.edits.iter().collect(),
        };
        for (position, edit) in ordered.iter().enumerate() {
            if let Err(err) = edit.apply(target, direction) {
                for applied in ordered[..position].iter().rev() {
                    // Reverting writes values that were live a moment ago.
                    let _ = applied.apply(target, direction.reversed());
                }
                return Err(err);
            }
        }
        Ok(())
    }

    fn remap_ids(&mut self, id_map: &IdMap) {
        for edit in &mut self.edits {
            edit.remap_ids(id_map);
        }
    }

    /// Object ids touched by the grouped edits, first occurrence order.
    fn object_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = Vec::new();
        for id in self.edits.iter().flat_map(|edit| edit.object_ids()) {
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        ids
    }
}

/// Undo and redo stacks plus open compound groups.
pub struct UndoLog<T> {
    undo_stack: Vec<Box<dyn UndoableEdit<T>>>,
    redo_stack: Vec<Box<dyn UndoableEdit<T>>>,
    open_groups: Vec<Vec<Box<dyn UndoableEdit<T>>>>,
}

impl<T> Default for UndoLog<T> {
    fn default() -> Self {
        Self {
            undo_stack: Vec::new(),
            redo_stack: Vec::new(),
            open_groups: Vec::new(),
        }
    }
}

impl<T: 'static> UndoLog<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, edit: Box<dyn UndoableEdit<T>>) {
        match self.open_groups.last_mut() {
            Some(group) => group.push(edit),
            None => {
                self.undo_stack.push(edit);
                self.redo_stack.clear();
            }
        }
    }

    pub fn start_compound(&mut self) {
        self.open_groups.push(Vec::new());
    }

    /// Closes the innermost group; empty groups leave no undo step.
    pub fn end_compound(&mut self) {
        let Some(edits) = self.open_groups.pop() else {
            return;
        };
        if edits.is_empty() {
            return;
        }
        self.record(Box::new(CompoundEdit { edits }));
    }

    pub fn is_compound_open(&self) -> bool {
        !self.open_groups.is_empty()
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    pub fn undo_depth(&self) -> usize {
        self.undo_stack.len()
    }

    pub fn pop_undo(&mut self) -> Option<Box<dyn UndoableEdit<T>>> {
        self.undo_stack.pop()
    }

    pub fn pop_redo(&mut self) -> Option<Box<dyn UndoableEdit<T>>> {
        self.redo_stack.pop()
    }

    /// Returns an undone edit to the redo stack.
    pub fn push_redo(&mut self, edit: Box<dyn UndoableEdit<T>>) {
        self.redo_stack.push(edit);
    }

    /// Returns a redone (or failed-to-undo) edit to the undo stack.
    pub fn push_undo(&mut self, edit: Box<dyn UndoableEdit<T>>) {
        self.undo_stack.push(edit);
    }

    pub fn clear(&mut self) {
        self.undo_stack.clear();
        self.redo_stack.clear();
        self.open_groups.clear();
    }

    pub fn remap_ids(&mut self, id_map: &IdMap) {
        for edit in self
            .undo_stack
            .iter_mut()
            .chain(self.redo_stack.iter_mut())
            .chain(self.open_groups.iter_mut().flatten())
        {
            edit.remap_ids(id_map);
        }
    }
}
