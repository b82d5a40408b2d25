//! Live object registry and temporary id allocation.
//!
//! # Responsibility
//! - Map object ids to live `PersistentObject`s.
//! - Allocate temporary ids for new objects and new store records.
//!
//! # Invariants
//! - Every key equals the id of the object stored under it.
//! - Allocated ids match the temporary id pattern and never repeat within
//!   one registry.

use crate::model::entity::ObjectId;
use crate::persist::object::PersistentObject;
use crate::repo::attribute_store::IdMap;
use crate::repo::schema::is_temporary_id;
use log::warn;
use std::collections::BTreeMap;

const FALLBACK_SEED: &str = "NEW";

/// Monotonic source of temporary ids (`$<seed><n>`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdAllocator {
    next: u64,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the next `$<seed><n>` for which `in_use` is false.
    pub fn allocate(&mut self, seed: &str, in_use: impl Fn(&str) -> bool) -> ObjectId {
        let seed = sanitize_seed(seed);
        loop {
            self.next += 1;
            let candidate = format!("${seed}{}", self.next);
            if !in_use(&candidate) {
                return candidate;
            }
        }
    }
}

fn sanitize_seed(seed: &str) -> String {
    let cleaned: String = seed
        .chars()
        .filter(|ch| !ch.is_whitespace() && *ch != '$')
        .collect();
    if cleaned.is_empty() {
        FALLBACK_SEED.to_string()
    } else {
        cleaned
    }
}

#[derive(Debug, Clone, Default)]
pub struct ModelRegistry {
    objects: BTreeMap<ObjectId, PersistentObject>,
    ids: IdAllocator,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces the object stored under its id.
    pub fn put_object(&mut self, object: PersistentObject) -> Option<PersistentObject> {
        self.objects.insert(object.id().to_string(), object)
    }

    pub fn remove_object(&mut self, id: &str) -> Option<PersistentObject> {
        self.objects.remove(id)
    }

    pub fn get_object(&self, id: &str) -> Option<&PersistentObject> {
        self.objects.get(id)
    }

    pub fn get_object_mut(&mut self, id: &str) -> Option<&mut PersistentObject> {
        self.objects.get_mut(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.objects.contains_key(id)
    }

    pub fn is_new_object_id(&self, id: &str) -> bool {
        is_temporary_id(id)
    }

    /// Allocates a temporary id that no live object uses yet.
    pub fn create_id_for_new_object(&mut self, seed: &str) -> ObjectId {
        let objects = &self.objects;
        self.ids.allocate(seed, |candidate| objects.contains_key(candidate))
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.objects.keys().map(String::as_str)
    }

    pub fn objects(&self) -> impl Iterator<Item = &PersistentObject> {
        self.objects.values()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub(crate) fn objects_mut(&mut self) -> impl Iterator<Item = &mut PersistentObject> {
        self.objects.values_mut()
    }

    /// Borrows one object together with the id allocator.
    pub(crate) fn object_and_ids_mut(
        &mut self,
        id: &str,
    ) -> Option<(&mut PersistentObject, &mut IdAllocator)> {
        let object = self.objects.get_mut(id)?;
        Some((object, &mut self.ids))
    }

    pub(crate) fn ids_mut(&mut self) -> &mut IdAllocator {
        &mut self.ids
    }

    /// Remaps every object's ids and re-keys the map.
    pub(crate) fn rekey(&mut self, id_map: &IdMap) {
        let objects = std::mem::take(&mut self.objects);
        for (_, mut object) in objects {
            object.remap_ids(id_map);
            let id = object.id().to_string();
            if let Some(previous) = self.objects.insert(id.clone(), object) {
                warn!(
                    "event=id_remap module=persist status=degraded reason=id_collision record_type={}",
                    previous.record_type().as_str()
                );
            }
        }
    }
}
