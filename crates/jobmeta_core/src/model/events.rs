//! Change and delete notifications for model objects.
//!
//! # Responsibility
//! - Keep per-object listener lists keyed by object id.
//! - Forward ("ripple") a member's events to the listeners of the objects
//!   it belongs to.
//!
//! # Invariants
//! - Each listener receives one event at most once per emit, even when
//!   ripple edges form a cycle.
//! - Listener and ripple keys follow id remaps.

use crate::model::entity::ObjectId;
use crate::repo::attribute_store::IdMap;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;

/// What happened to the source object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelEventKind {
    /// A persisted field changed; values are rendered as text.
    Changed {
        field: &'static str,
        old_value: Option<String>,
        new_value: Option<String>,
    },
    /// The object was removed from the live model.
    Deleted,
}

/// One notification delivered to listeners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelEvent {
    /// Object whose state changed.
    pub source_id: ObjectId,
    pub kind: ModelEventKind,
}

impl ModelEvent {
    pub fn changed(
        source_id: impl Into<ObjectId>,
        field: &'static str,
        old_value: Option<String>,
        new_value: Option<String>,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            kind: ModelEventKind::Changed {
                field,
                old_value,
                new_value,
            },
        }
    }

    pub fn deleted(source_id: impl Into<ObjectId>) -> Self {
        Self {
            source_id: source_id.into(),
            kind: ModelEventKind::Deleted,
        }
    }
}

/// Receiver of model notifications.
pub trait ModelListener {
    fn on_event(&self, event: &ModelEvent);
}

/// Handle returned by `EventBus::subscribe`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ListenerId(u64);

/// Listener registry with ripple forwarding.
#[derive(Default)]
pub struct EventBus {
    listeners: BTreeMap<ObjectId, Vec<(ListenerId, Arc<dyn ModelListener>)>>,
    ripples: BTreeMap<ObjectId, BTreeSet<ObjectId>>,
    next_listener: u64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, object_id: &str, listener: Arc<dyn ModelListener>) -> ListenerId {
        self.next_listener += 1;
        let handle = ListenerId(self.next_listener);
        self.listeners
            .entry(object_id.to_string())
            .or_default()
            .push((handle, listener));
        handle
    }

    /// Removes one listener; returns whether it was registered.
    pub fn unsubscribe(&mut self, object_id: &str, handle: ListenerId) -> bool {
        let Some(entries) = self.listeners.get_mut(object_id) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|(current, _)| *current != handle);
        let removed = entries.len() != before;
        if entries.is_empty() {
            self.listeners.remove(object_id);
        }
        removed
    }

    /// Forwards events of `from` to the listeners of `to`.
    pub fn ripple(&mut self, from: &str, to: &str) {
        self.ripples
            .entry(from.to_string())
            .or_default()
            .insert(to.to_string());
    }

    pub fn unripple(&mut self, from: &str, to: &str) {
        if let Some(targets) = self.ripples.get_mut(from) {
            targets.remove(to);
            if targets.is_empty() {
                self.ripples.remove(from);
            }
        }
    }

    /// Delivers `event` to the source's listeners, then along ripple edges.
    pub fn emit(&self, event: &ModelEvent) {
        let mut visited = BTreeSet::new();
        let mut queue = VecDeque::from([event.source_id.clone()]);
        while let Some(current) = queue.pop_front() {
            if !visited.insert(current.clone()) {
                continue;
            }
            if let Some(entries) = self.listeners.get(&current) {
                for (_, listener) in entries {
                    listener.on_event(event);
                }
            }
            if let Some(targets) = self.ripples.get(&current) {
                queue.extend(targets.iter().cloned());
            }
        }
    }

    /// Moves listener and ripple keys from temporary to permanent ids.
    pub fn remap_ids(&mut self, id_map: &IdMap) {
        for (old_id, new_id) in id_map {
            if let Some(entries) = self.listeners.remove(old_id) {
                self.listeners.entry(new_id.clone()).or_default().extend(entries);
            }
            if let Some(targets) = self.ripples.remove(old_id) {
                self.ripples.entry(new_id.clone()).or_default().extend(targets);
            }
        }
        for targets in self.ripples.values_mut() {
            let remapped = targets
                .iter()
                .map(|target| id_map.get(target).unwrap_or(target).clone())
                .collect();
            *targets = remapped;
        }
    }
}
