//! Per-entity lookup cache of generic attribute records.
//!
//! # Responsibility
//! - Remember which store records back an entity's attributes, attribute
//!   groups and custom lists so lookups skip the linear association scan.
//!
//! # Invariants
//! - Entries are inserted when a record is created or found, removed when
//!   the record is deleted, and their ids are rewritten only by `remap_ids`.
//! - `remap_ids` rewrites an id only when it is temporary and present in
//!   the map; anything else is left untouched.

use crate::model::entity::ObjectId;
use crate::repo::attribute_store::IdMap;
use crate::repo::schema::is_temporary_id;
use std::collections::BTreeMap;

/// Where an attribute record is linked from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AttributeAddressMode {
    /// Linked straight from the owner's `Properties` association.
    Direct,
    /// Linked from an attribute group's `GroupProperties` association.
    GroupProperties,
    /// Linked from an attribute group's `SetProperties` association.
    #[default]
    GroupSetProperties,
}

/// Cache key of one attribute record.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PropertyKey {
    pub mode: AttributeAddressMode,
    pub group_role: String,
    pub set_name: Option<String>,
    pub name: String,
}

/// Cache key of one attribute group record.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GroupKey {
    pub group_role: String,
    pub set_name: Option<String>,
}

/// Store records backing one attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyTracker {
    pub attribute_id: ObjectId,
    /// Holder record when the attribute carries an object list.
    pub holder_id: Option<ObjectId>,
    /// Custom association attached to the attribute.
    pub custom_list_id: Option<ObjectId>,
}

impl PropertyTracker {
    pub fn new(attribute_id: impl Into<ObjectId>) -> Self {
        Self {
            attribute_id: attribute_id.into(),
            holder_id: None,
            custom_list_id: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttributeCache {
    properties: BTreeMap<PropertyKey, PropertyTracker>,
    groups: BTreeMap<GroupKey, ObjectId>,
    custom_lists: BTreeMap<String, ObjectId>,
}

impl AttributeCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn property(&self, key: &PropertyKey) -> Option<&PropertyTracker> {
        self.properties.get(key)
    }

    pub fn group(&self, key: &GroupKey) -> Option<&str> {
        self.groups.get(key).map(String::as_str)
    }

    pub fn custom_list(&self, name: &str) -> Option<&str> {
        self.custom_lists.get(name).map(String::as_str)
    }

    pub fn properties(&self) -> impl Iterator<Item = (&PropertyKey, &PropertyTracker)> {
        self.properties.iter()
    }

    pub fn groups(&self) -> impl Iterator<Item = (&GroupKey, &str)> {
        self.groups.iter().map(|(key, id)| (key, id.as_str()))
    }

    pub fn custom_lists(&self) -> impl Iterator<Item = (&str, &str)> {
        self.custom_lists
            .iter()
            .map(|(name, id)| (name.as_str(), id.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty() && self.groups.is_empty() && self.custom_lists.is_empty()
    }

    pub(crate) fn track_property(&mut self, key: PropertyKey, tracker: PropertyTracker) {
        self.properties.insert(key, tracker);
    }

    pub(crate) fn track_group(&mut self, key: GroupKey, group_id: ObjectId) {
        self.groups.insert(key, group_id);
    }

    pub(crate) fn track_custom_list(&mut self, name: String, list_id: ObjectId) {
        self.custom_lists.insert(name, list_id);
    }

    pub(crate) fn forget_property(&mut self, key: &PropertyKey) -> Option<PropertyTracker> {
        self.properties.remove(key)
    }

    pub(crate) fn clear(&mut self) {
        self.properties.clear();
        self.groups.clear();
        self.custom_lists.clear();
    }

    /// Rewrites temporary record ids that the store has made permanent.
    pub fn remap_ids(&mut self, id_map: &IdMap) {
        for tracker in self.properties.values_mut() {
            remap_id(&mut tracker.attribute_id, id_map);
            if let Some(holder_id) = tracker.holder_id.as_mut() {
                remap_id(holder_id, id_map);
            }
            if let Some(custom_list_id) = tracker.custom_list_id.as_mut() {
                remap_id(custom_list_id, id_map);
            }
        }
        for group_id in self.groups.values_mut() {
            remap_id(group_id, id_map);
        }
        for list_id in self.custom_lists.values_mut() {
            remap_id(list_id, id_map);
        }
    }
}

/// Rewrites `id` in place when it is temporary and the map knows it.
pub fn remap_id(id: &mut ObjectId, id_map: &IdMap) -> bool {
    if !is_temporary_id(id) {
        return false;
    }
    match id_map.get(id.as_str()) {
        Some(permanent) => {
            *id = permanent.clone();
            true
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::{remap_id, AttributeAddressMode, AttributeCache, GroupKey, PropertyKey, PropertyTracker};
    use crate::repo::attribute_store::IdMap;

    fn key(name: &str) -> PropertyKey {
        PropertyKey {
            mode: AttributeAddressMode::GroupSetProperties,
            group_role: "OPTIONS".to_string(),
            set_name: None,
            name: name.to_string(),
        }
    }

    #[test]
    fn remap_rewrites_only_known_temporary_ids() {
        let mut cache = AttributeCache::new();
        let mut tracker = PropertyTracker::new("$ATTR1");
        tracker.holder_id = Some("$HOLD2".to_string());
        cache.track_property(key("Stable"), tracker);
        cache.track_property(key("Keep"), PropertyTracker::new("$ATTR9"));
        cache.track_group(
            GroupKey {
                group_role: "OPTIONS".to_string(),
                set_name: None,
            },
            "PERM-GROUP".to_string(),
        );

        let id_map = IdMap::from([
            ("$ATTR1".to_string(), "P-ATTR".to_string()),
            ("$HOLD2".to_string(), "P-HOLD".to_string()),
            ("PERM-GROUP".to_string(), "SHOULD-NOT-APPLY".to_string()),
        ]);
        cache.remap_ids(&id_map);

        let stable = cache.property(&key("Stable")).expect("tracked");
        assert_eq!(stable.attribute_id, "P-ATTR");
        assert_eq!(stable.holder_id.as_deref(), Some("P-HOLD"));
        assert_eq!(
            cache.property(&key("Keep")).expect("tracked").attribute_id,
            "$ATTR9"
        );
        assert_eq!(cache.groups().next().map(|(_, id)| id), Some("PERM-GROUP"));
    }

    #[test]
    fn remap_id_reports_whether_it_rewrote() {
        let id_map = IdMap::from([("$NEW1".to_string(), "P1".to_string())]);
        let mut id = "$NEW1".to_string();
        assert!(remap_id(&mut id, &id_map));
        assert_eq!(id, "P1");
        assert!(!remap_id(&mut id, &id_map));
    }
}
