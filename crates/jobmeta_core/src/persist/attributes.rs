//! Generic attribute engine.
//!
//! # Responsibility
//! - Map named options, object-list options, attached lists, custom lists
//!   and user properties onto `Property`/`PropertySet`/`ObjectHolder`/
//!   `CustomAssociation` records.
//! - Stage option writes on the owning object until the next save.
//!
//! # Invariants
//! - Lookups consult the per-object `AttributeCache` before scanning store
//!   associations; every hit and every created record is cached.
//! - Links are appended only when the association does not already contain
//!   the record.
//! - Malformed stored values degrade to the caller default and never fail a
//!   load.
//! - Duplicate custom lists of one name resolve to the first one found.

use crate::model::entity::ObjectId;
use crate::model::undo::FieldEdit;
use crate::persist::cache::{
    remap_id, AttributeAddressMode, AttributeCache, GroupKey, PropertyKey, PropertyTracker,
};
use crate::persist::registry::IdAllocator;
use crate::persist::selectors;
use crate::persist::unit_of_work::UnitOfWork;
use crate::persist::PersistResult;
use crate::repo::attribute_store::{AttributeStore, IdMap, StoreResult};
use crate::repo::schema::{
    Association, RecordType, FIELD_DEFAULT_VALUE, FIELD_NAME, FIELD_PROPERTY_NAME,
    FIELD_SET_ROLE, FIELD_SQL_TYPE,
};
use log::{debug, warn};
use std::collections::BTreeMap;

const GROUP_SEED: &str = "GRP";
const ATTRIBUTE_SEED: &str = "ATTR";
const HOLDER_SEED: &str = "HOLD";
const LIST_SEED: &str = "LIST";

/// Attribute field compared during the linear lookup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MatchBy {
    /// Compare the stable `PropertyName` field.
    #[default]
    PropertyName,
    /// Compare the display `Name` field.
    DisplayName,
}

impl MatchBy {
    fn field(self) -> &'static str {
        match self {
            Self::PropertyName => FIELD_PROPERTY_NAME,
            Self::DisplayName => FIELD_NAME,
        }
    }
}

/// Declared scalar type of an option value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OptionType {
    #[default]
    String,
    Int,
    Boolean,
    Double,
}

impl OptionType {
    /// Value written to the attribute's `SQLType` field.
    pub fn sql_type(self) -> &'static str {
        match self {
            Self::String => "VARCHAR",
            Self::Int => "INTEGER",
            Self::Boolean => "BOOLEAN",
            Self::Double => "DOUBLE",
        }
    }
}

/// Where an option lives relative to its owner.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OptionAddress {
    pub mode: AttributeAddressMode,
    /// `SetRole` of the attribute group; unused in direct mode.
    pub group_role: String,
    /// Distinguishes several groups sharing one role.
    pub set_name: Option<String>,
    pub match_by: MatchBy,
}

impl OptionAddress {
    /// Group "set properties" address (the default mode).
    pub fn group(role: impl Into<String>) -> Self {
        Self {
            mode: AttributeAddressMode::GroupSetProperties,
            group_role: role.into(),
            set_name: None,
            match_by: MatchBy::PropertyName,
        }
    }

    /// Group "properties" address, used by data written by older versions.
    pub fn group_properties(role: impl Into<String>) -> Self {
        Self {
            mode: AttributeAddressMode::GroupProperties,
            ..Self::group(role)
        }
    }

    /// Attribute linked straight from the owner.
    pub fn direct() -> Self {
        Self {
            mode: AttributeAddressMode::Direct,
            ..Self::group(String::new())
        }
    }

    pub fn with_set_name(mut self, set_name: impl Into<String>) -> Self {
        self.set_name = Some(set_name.into());
        self
    }

    pub fn match_display_name(mut self) -> Self {
        self.match_by = MatchBy::DisplayName;
        self
    }

    pub fn property_key(&self, name: &str) -> PropertyKey {
        PropertyKey {
            mode: self.mode,
            group_role: self.group_role.clone(),
            set_name: self.set_name.clone(),
            name: name.to_string(),
        }
    }

    pub fn group_key(&self) -> GroupKey {
        GroupKey {
            group_role: self.group_role.clone(),
            set_name: self.set_name.clone(),
        }
    }

    fn member_association(&self) -> Association {
        match self.mode {
            AttributeAddressMode::Direct => Association::Properties,
            AttributeAddressMode::GroupProperties => Association::GroupProperties,
            AttributeAddressMode::GroupSetProperties => Association::SetProperties,
        }
    }
}

/// Pending option write, flushed by the next save.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptionChange {
    Value {
        value: String,
        option_type: OptionType,
    },
    ObjectList(Vec<ObjectId>),
    ValueWithList {
        value: String,
        option_type: OptionType,
        list_name: String,
        objects: Vec<ObjectId>,
    },
    Removed,
}

impl OptionChange {
    pub(crate) fn remap_ids(&mut self, id_map: &IdMap) {
        match self {
            Self::ObjectList(objects) | Self::ValueWithList { objects, .. } => {
                for object_id in objects {
                    remap_id(object_id, id_map);
                }
            }
            Self::Value { .. } | Self::Removed => {}
        }
    }

    pub(crate) fn describe(&self) -> String {
        match self {
            Self::Value { value, .. } | Self::ValueWithList { value, .. } => value.clone(),
            Self::ObjectList(objects) => objects.join(","),
            Self::Removed => String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedOption {
    pub address: OptionAddress,
    pub name: String,
    pub change: OptionChange,
}

/// Option and custom-list writes waiting for the next save.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StagedAttributes {
    pub(crate) options: BTreeMap<PropertyKey, StagedOption>,
    pub(crate) custom_lists: BTreeMap<String, Vec<ObjectId>>,
}

impl StagedAttributes {
    pub fn is_empty(&self) -> bool {
        self.options.is_empty() && self.custom_lists.is_empty()
    }

    pub(crate) fn remap_ids(&mut self, id_map: &IdMap) {
        for staged in self.options.values_mut() {
            staged.change.remap_ids(id_map);
        }
        for objects in self.custom_lists.values_mut() {
            for object_id in objects {
                remap_id(object_id, id_map);
            }
        }
    }
}

pub(crate) fn parse_int(raw: &str) -> Option<i64> {
    raw.trim().parse().ok()
}

pub(crate) fn parse_double(raw: &str) -> Option<f64> {
    raw.trim().parse().ok()
}

pub(crate) fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}

fn typed_or_default<T>(
    raw: Option<&str>,
    default: T,
    name: &str,
    expected: &'static str,
    parse: fn(&str) -> Option<T>,
) -> T {
    let Some(raw) = raw else {
        return default;
    };
    match parse(raw) {
        Some(value) => value,
        None => {
            warn!(
                "event=option_parse module=persist status=degraded option={name} expected={expected}"
            );
            default
        }
    }
}

fn find_group<S: AttributeStore + ?Sized>(
    owner_id: &str,
    cache: &mut AttributeCache,
    store: &S,
    address: &OptionAddress,
) -> StoreResult<Option<ObjectId>> {
    if address.mode == AttributeAddressMode::Direct {
        return Ok(Some(owner_id.to_string()));
    }
    let key = address.group_key();
    if let Some(group_id) = cache.group(&key) {
        return Ok(Some(group_id.to_string()));
    }

    for group_id in store.association(owner_id, Association::PropertySets)? {
        if store.field(&group_id, FIELD_SET_ROLE)?.as_deref() != Some(address.group_role.as_str())
        {
            continue;
        }
        if let Some(set_name) = address.set_name.as_deref() {
            if store.field(&group_id, FIELD_NAME)?.as_deref() != Some(set_name) {
                continue;
            }
        }
        cache.track_group(key, group_id.clone());
        return Ok(Some(group_id));
    }
    Ok(None)
}

fn find_attribute<S: AttributeStore + ?Sized>(
    owner_id: &str,
    cache: &mut AttributeCache,
    store: &S,
    address: &OptionAddress,
    name: &str,
) -> StoreResult<Option<PropertyTracker>> {
    let key = address.property_key(name);
    if let Some(tracker) = cache.property(&key) {
        return Ok(Some(tracker.clone()));
    }
    let Some(host_id) = find_group(owner_id, cache, store, address)? else {
        return Ok(None);
    };

    for attribute_id in store.association(&host_id, address.member_association())? {
        if store.field(&attribute_id, address.match_by.field())?.as_deref() != Some(name) {
            continue;
        }
        let mut tracker = PropertyTracker::new(attribute_id.clone());
        tracker.holder_id = store
            .association(&attribute_id, Association::PropertyHolder)?
            .into_iter()
            .next();
        tracker.custom_list_id = store
            .association(&attribute_id, Association::CustomAssociations)?
            .into_iter()
            .next();
        cache.track_property(key, tracker.clone());
        return Ok(Some(tracker));
    }
    Ok(None)
}

fn find_custom_list<S: AttributeStore + ?Sized>(
    owner_id: &str,
    cache: &mut AttributeCache,
    store: &S,
    name: &str,
) -> StoreResult<Option<ObjectId>> {
    if let Some(list_id) = cache.custom_list(name) {
        return Ok(Some(list_id.to_string()));
    }

    let mut matches = Vec::new();
    for list_id in store.association(owner_id, Association::CustomAssociations)? {
        if store.field(&list_id, FIELD_NAME)?.as_deref() == Some(name) {
            matches.push(list_id);
        }
    }
    if matches.len() > 1 {
        warn!(
            "event=custom_list_duplicate module=persist status=degraded list={name} count={}",
            matches.len()
        );
    }
    let canonical = matches.into_iter().next();
    if let Some(list_id) = canonical.as_ref() {
        cache.track_custom_list(name.to_string(), list_id.clone());
    }
    Ok(canonical)
}

/// Read side of the engine for one owner.
pub struct AttributeReader<'a, S: AttributeStore + ?Sized> {
    owner_id: &'a str,
    cache: &'a mut AttributeCache,
    store: &'a S,
}

impl<'a, S: AttributeStore + ?Sized> AttributeReader<'a, S> {
    pub fn new(owner_id: &'a str, cache: &'a mut AttributeCache, store: &'a S) -> Self {
        Self {
            owner_id,
            cache,
            store,
        }
    }

    pub fn find_group(&mut self, address: &OptionAddress) -> StoreResult<Option<ObjectId>> {
        find_group(self.owner_id, self.cache, self.store, address)
    }

    pub fn find_attribute(
        &mut self,
        address: &OptionAddress,
        name: &str,
    ) -> StoreResult<Option<PropertyTracker>> {
        find_attribute(self.owner_id, self.cache, self.store, address, name)
    }

    fn raw_value(&mut self, address: &OptionAddress, name: &str) -> StoreResult<Option<String>> {
        match self.find_attribute(address, name)? {
            Some(tracker) => self.store.field(&tracker.attribute_id, FIELD_DEFAULT_VALUE),
            None => Ok(None),
        }
    }

    /// Stored option value, or `default` when absent.
    pub fn load_option(
        &mut self,
        address: &OptionAddress,
        name: &str,
        default: &str,
    ) -> StoreResult<String> {
        Ok(self
            .raw_value(address, name)?
            .unwrap_or_else(|| default.to_string()))
    }

    pub fn load_int_option(
        &mut self,
        address: &OptionAddress,
        name: &str,
        default: i64,
    ) -> StoreResult<i64> {
        let raw = self.raw_value(address, name)?;
        Ok(typed_or_default(raw.as_deref(), default, name, "int", parse_int))
    }

    pub fn load_double_option(
        &mut self,
        address: &OptionAddress,
        name: &str,
        default: f64,
    ) -> StoreResult<f64> {
        let raw = self.raw_value(address, name)?;
        Ok(typed_or_default(
            raw.as_deref(),
            default,
            name,
            "double",
            parse_double,
        ))
    }

    pub fn load_bool_option(
        &mut self,
        address: &OptionAddress,
        name: &str,
        default: bool,
    ) -> StoreResult<bool> {
        let raw = self.raw_value(address, name)?;
        Ok(typed_or_default(raw.as_deref(), default, name, "bool", parse_bool))
    }

    /// Follows attribute -> holder -> held objects; empty when a link is missing.
    pub fn load_object_list_option(
        &mut self,
        address: &OptionAddress,
        name: &str,
    ) -> StoreResult<Vec<ObjectId>> {
        let holder_id = self
            .find_attribute(address, name)?
            .and_then(|tracker| tracker.holder_id);
        match holder_id {
            Some(holder_id) => self.store.association(&holder_id, Association::HeldObjects),
            None => Ok(Vec::new()),
        }
    }

    /// Option value plus the objects of its attached custom association.
    pub fn load_option_with_attached_list(
        &mut self,
        address: &OptionAddress,
        name: &str,
        default: &str,
    ) -> StoreResult<(String, Vec<ObjectId>)> {
        let Some(tracker) = self.find_attribute(address, name)? else {
            return Ok((default.to_string(), Vec::new()));
        };
        let value = self
            .store
            .field(&tracker.attribute_id, FIELD_DEFAULT_VALUE)?
            .unwrap_or_else(|| default.to_string());
        let objects = match tracker.custom_list_id.as_deref() {
            Some(list_id) => self
                .store
                .association(list_id, Association::AssociatedObjects)?,
            None => Vec::new(),
        };
        Ok((value, objects))
    }

    pub fn load_custom_list(&mut self, name: &str) -> StoreResult<Vec<ObjectId>> {
        match find_custom_list(self.owner_id, self.cache, self.store, name)? {
            Some(list_id) => self
                .store
                .association(&list_id, Association::AssociatedObjects),
            None => Ok(Vec::new()),
        }
    }

    /// Reads the user-properties group; `None` when the group was never saved.
    pub fn load_user_properties(
        &mut self,
        role: &str,
    ) -> StoreResult<Option<BTreeMap<String, String>>> {
        let address = OptionAddress::group(role);
        let Some(group_id) = self.find_group(&address)? else {
            return Ok(None);
        };

        let mut properties = BTreeMap::new();
        for attribute_id in self
            .store
            .association(&group_id, address.member_association())?
        {
            let Some(key) = self.store.field(&attribute_id, FIELD_PROPERTY_NAME)? else {
                continue;
            };
            if key.trim().is_empty() {
                continue;
            }
            let value = self
                .store
                .field(&attribute_id, FIELD_DEFAULT_VALUE)?
                .unwrap_or_default();
            self.cache
                .track_property(address.property_key(&key), PropertyTracker::new(attribute_id));
            properties.insert(key, value);
        }
        Ok(Some(properties))
    }
}

/// Write side of the engine for one owner; requires an open store unit.
pub struct AttributeWriter<'a, S: AttributeStore + ?Sized> {
    owner_id: &'a str,
    cache: &'a mut AttributeCache,
    store: &'a mut S,
    ids: &'a mut IdAllocator,
}

impl<'a, S: AttributeStore + ?Sized> AttributeWriter<'a, S> {
    pub fn new(
        owner_id: &'a str,
        cache: &'a mut AttributeCache,
        store: &'a mut S,
        ids: &'a mut IdAllocator,
    ) -> Self {
        Self {
            owner_id,
            cache,
            store,
            ids,
        }
    }

    fn create_record(&mut self, seed: &str, record_type: RecordType) -> StoreResult<ObjectId> {
        let record_id = self.ids.allocate(seed, |_| false);
        self.store.acquire_record(&record_id, record_type)?;
        debug!(
            "event=attribute_create module=persist status=ok record_type={}",
            record_type.as_str()
        );
        Ok(record_id)
    }

    fn link(&mut self, host_id: &str, association: Association, member: &str) -> StoreResult<()> {
        if !self.store.association_contains(host_id, association, member)? {
            self.store.add_to_association(host_id, association, member)?;
        }
        Ok(())
    }

    /// Finds the group for `address`, creating and linking it when absent.
    pub fn ensure_group(&mut self, address: &OptionAddress) -> StoreResult<ObjectId> {
        if let Some(group_id) = find_group(self.owner_id, self.cache, &*self.store, address)? {
            return Ok(group_id);
        }
        let group_id = self.create_record(GROUP_SEED, RecordType::PropertySet)?;
        self.store
            .set_field(&group_id, FIELD_SET_ROLE, &address.group_role)?;
        let group_name = address
            .set_name
            .clone()
            .unwrap_or_else(|| address.group_role.clone());
        self.store.set_field(&group_id, FIELD_NAME, &group_name)?;
        let owner_id = self.owner_id;
        self.link(owner_id, Association::PropertySets, &group_id)?;
        self.cache.track_group(address.group_key(), group_id.clone());
        Ok(group_id)
    }

    /// Finds the named attribute, creating and linking it when absent.
    pub fn ensure_attribute(
        &mut self,
        address: &OptionAddress,
        name: &str,
    ) -> StoreResult<PropertyTracker> {
        if let Some(tracker) =
            find_attribute(self.owner_id, self.cache, &*self.store, address, name)?
        {
            return Ok(tracker);
        }
        let host_id = self.ensure_group(address)?;
        let attribute_id = self.create_record(ATTRIBUTE_SEED, RecordType::Property)?;
        self.store.set_field(&attribute_id, FIELD_NAME, name)?;
        self.store
            .set_field(&attribute_id, FIELD_PROPERTY_NAME, name)?;
        self.link(&host_id, address.member_association(), &attribute_id)?;

        let tracker = PropertyTracker::new(attribute_id);
        self.cache
            .track_property(address.property_key(name), tracker.clone());
        Ok(tracker)
    }

    pub fn save_option(
        &mut self,
        address: &OptionAddress,
        name: &str,
        value: &str,
        option_type: OptionType,
    ) -> StoreResult<PropertyTracker> {
        let tracker = self.ensure_attribute(address, name)?;
        self.store
            .set_field(&tracker.attribute_id, FIELD_DEFAULT_VALUE, value)?;
        self.store
            .set_field(&tracker.attribute_id, FIELD_SQL_TYPE, option_type.sql_type())?;
        Ok(tracker)
    }

    /// Replaces the holder's reference list with `objects`.
    pub fn save_object_list_option(
        &mut self,
        address: &OptionAddress,
        name: &str,
        objects: &[ObjectId],
    ) -> StoreResult<()> {
        let mut tracker = self.ensure_attribute(address, name)?;
        let holder_id = match tracker.holder_id.clone() {
            Some(holder_id) => holder_id,
            None => {
                let holder_id = self.create_record(HOLDER_SEED, RecordType::ObjectHolder)?;
                self.link(
                    &tracker.attribute_id,
                    Association::PropertyHolder,
                    &holder_id,
                )?;
                tracker.holder_id = Some(holder_id.clone());
                self.cache
                    .track_property(address.property_key(name), tracker);
                holder_id
            }
        };
        self.store
            .set_association(&holder_id, Association::HeldObjects, objects)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn save_option_with_attached_list(
        &mut self,
        address: &OptionAddress,
        name: &str,
        value: &str,
        option_type: OptionType,
        list_name: &str,
        objects: &[ObjectId],
    ) -> StoreResult<()> {
        let mut tracker = self.save_option(address, name, value, option_type)?;
        let list_id = match tracker.custom_list_id.clone() {
            Some(list_id) => list_id,
            None => {
                let list_id = self.create_record(LIST_SEED, RecordType::CustomAssociation)?;
                self.link(
                    &tracker.attribute_id,
                    Association::CustomAssociations,
                    &list_id,
                )?;
                tracker.custom_list_id = Some(list_id.clone());
                self.cache
                    .track_property(address.property_key(name), tracker);
                list_id
            }
        };
        self.store.set_field(&list_id, FIELD_NAME, list_name)?;
        self.store
            .set_association(&list_id, Association::AssociatedObjects, objects)
    }

    pub fn save_custom_list(&mut self, name: &str, objects: &[ObjectId]) -> StoreResult<()> {
        let list_id = match find_custom_list(self.owner_id, self.cache, &*self.store, name)? {
            Some(list_id) => list_id,
            None => {
                let list_id = self.create_record(LIST_SEED, RecordType::CustomAssociation)?;
                self.store.set_field(&list_id, FIELD_NAME, name)?;
                let owner_id = self.owner_id;
                self.link(owner_id, Association::CustomAssociations, &list_id)?;
                self.cache
                    .track_custom_list(name.to_string(), list_id.clone());
                list_id
            }
        };
        self.store
            .set_association(&list_id, Association::AssociatedObjects, objects)
    }

    /// Deletes one attribute with its holder and attached list.
    ///
    /// Returns whether an attribute was found.
    pub fn delete_option(&mut self, address: &OptionAddress, name: &str) -> StoreResult<bool> {
        let Some(tracker) =
            find_attribute(self.owner_id, self.cache, &*self.store, address, name)?
        else {
            return Ok(false);
        };
        self.delete_attribute_records(&tracker)?;
        self.cache.forget_property(&address.property_key(name));
        Ok(true)
    }

    fn delete_attribute_records(&mut self, tracker: &PropertyTracker) -> StoreResult<()> {
        if let Some(holder_id) = tracker.holder_id.as_deref() {
            self.store
                .delete_record(holder_id, RecordType::ObjectHolder)?;
        }
        if let Some(list_id) = tracker.custom_list_id.as_deref() {
            self.store
                .delete_record(list_id, RecordType::CustomAssociation)?;
        }
        self.store
            .delete_record(&tracker.attribute_id, RecordType::Property)
    }

    /// Writes the whole map and deletes stored keys it no longer holds.
    pub fn save_user_properties(
        &mut self,
        role: &str,
        properties: &BTreeMap<String, String>,
    ) -> StoreResult<()> {
        let address = OptionAddress::group(role);
        let group_id = self.ensure_group(&address)?;

        for attribute_id in self
            .store
            .association(&group_id, address.member_association())?
        {
            let key = self
                .store
                .field(&attribute_id, FIELD_PROPERTY_NAME)?
                .unwrap_or_default();
            if properties.contains_key(&key) {
                continue;
            }
            self.store
                .delete_record(&attribute_id, RecordType::Property)?;
            self.cache.forget_property(&address.property_key(&key));
            debug!("event=user_property_delete module=persist status=ok");
        }

        for (key, value) in properties {
            self.save_option(&address, key, value, OptionType::String)?;
        }
        Ok(())
    }

    /// Deletes every cached attribute, group and custom list record.
    ///
    /// Returns the number of delete calls issued.
    pub fn delete_tracked_records(&mut self) -> StoreResult<usize> {
        let trackers: Vec<PropertyTracker> = self
            .cache
            .properties()
            .map(|(_, tracker)| tracker.clone())
            .collect();
        let groups: Vec<ObjectId> = self
            .cache
            .groups()
            .map(|(_, group_id)| group_id.to_string())
            .collect();
        let lists: Vec<ObjectId> = self
            .cache
            .custom_lists()
            .map(|(_, list_id)| list_id.to_string())
            .collect();

        let mut deleted = 0;
        for tracker in &trackers {
            self.delete_attribute_records(tracker)?;
            deleted += 1
                + usize::from(tracker.holder_id.is_some())
                + usize::from(tracker.custom_list_id.is_some());
        }
        for group_id in &groups {
            self.store
                .delete_record(group_id, RecordType::PropertySet)?;
            deleted += 1;
        }
        for list_id in &lists {
            self.store
                .delete_record(list_id, RecordType::CustomAssociation)?;
            deleted += 1;
        }
        self.cache.clear();
        Ok(deleted)
    }

    /// Applies one staged option change.
    pub(crate) fn flush_option(&mut self, staged: &StagedOption) -> StoreResult<()> {
        let address = &staged.address;
        let name = staged.name.as_str();
        match &staged.change {
            OptionChange::Value { value, option_type } => {
                self.save_option(address, name, value, *option_type)?;
            }
            OptionChange::ObjectList(objects) => {
                self.save_object_list_option(address, name, objects)?;
            }
            OptionChange::ValueWithList {
                value,
                option_type,
                list_name,
                objects,
            } => {
                self.save_option_with_attached_list(
                    address,
                    name,
                    value,
                    *option_type,
                    list_name,
                    objects,
                )?;
            }
            OptionChange::Removed => {
                self.delete_option(address, name)?;
            }
        }
        Ok(())
    }
}

impl UnitOfWork {
    fn stage_option(
        &mut self,
        id: &str,
        address: &OptionAddress,
        name: &str,
        change: OptionChange,
    ) -> PersistResult<()> {
        let key = address.property_key(name);
        let old = self.live_object(id)?.staged.options.get(&key).cloned();
        let new = StagedOption {
            address: address.clone(),
            name: name.to_string(),
            change,
        };
        let old_text = old.as_ref().map(|staged| staged.change.describe());
        let new_text = Some(new.change.describe());
        self.perform(Box::new(FieldEdit::new(
            id,
            selectors::STAGED_OPTION,
            (key.clone(), old),
            (key, Some(new)),
        )))?;
        self.set_changed(id);
        self.emit_changed(id, selectors::STAGED_OPTION.name, old_text, new_text);
        Ok(())
    }

    /// Stages a scalar option; written by the next save.
    pub fn set_option(
        &mut self,
        id: &str,
        address: &OptionAddress,
        name: &str,
        value: impl Into<String>,
        option_type: OptionType,
    ) -> PersistResult<()> {
        self.stage_option(
            id,
            address,
            name,
            OptionChange::Value {
                value: value.into(),
                option_type,
            },
        )
    }

    pub fn set_object_list_option(
        &mut self,
        id: &str,
        address: &OptionAddress,
        name: &str,
        objects: Vec<ObjectId>,
    ) -> PersistResult<()> {
        self.stage_option(id, address, name, OptionChange::ObjectList(objects))
    }

    #[allow(clippy::too_many_arguments)]
    pub fn set_option_with_attached_list(
        &mut self,
        id: &str,
        address: &OptionAddress,
        name: &str,
        value: impl Into<String>,
        option_type: OptionType,
        list_name: impl Into<String>,
        objects: Vec<ObjectId>,
    ) -> PersistResult<()> {
        self.stage_option(
            id,
            address,
            name,
            OptionChange::ValueWithList {
                value: value.into(),
                option_type,
                list_name: list_name.into(),
                objects,
            },
        )
    }

    /// Stages deletion of an option and its holder/attached list.
    pub fn remove_option(
        &mut self,
        id: &str,
        address: &OptionAddress,
        name: &str,
    ) -> PersistResult<()> {
        self.stage_option(id, address, name, OptionChange::Removed)
    }

    pub fn set_custom_list(
        &mut self,
        id: &str,
        name: &str,
        objects: Vec<ObjectId>,
    ) -> PersistResult<()> {
        let old = self.live_object(id)?.staged.custom_lists.get(name).cloned();
        let old_text = old.as_ref().map(|objects| objects.join(","));
        let new_text = Some(objects.join(","));
        self.perform(Box::new(FieldEdit::new(
            id,
            selectors::STAGED_CUSTOM_LIST,
            (name.to_string(), old),
            (name.to_string(), Some(objects)),
        )))?;
        self.set_changed(id);
        self.emit_changed(id, selectors::STAGED_CUSTOM_LIST.name, old_text, new_text);
        Ok(())
    }

    fn staged_change(
        &self,
        id: &str,
        address: &OptionAddress,
        name: &str,
    ) -> PersistResult<Option<OptionChange>> {
        Ok(self
            .live_object(id)?
            .staged
            .options
            .get(&address.property_key(name))
            .map(|staged| staged.change.clone()))
    }

    /// Raw value of an option, staged writes first; `None` when absent.
    fn option_value<S: AttributeStore + ?Sized>(
        &mut self,
        id: &str,
        address: &OptionAddress,
        name: &str,
        store: &S,
    ) -> PersistResult<Option<String>> {
        match self.staged_change(id, address, name)? {
            Some(OptionChange::Value { value, .. })
            | Some(OptionChange::ValueWithList { value, .. }) => return Ok(Some(value)),
            Some(OptionChange::Removed) => return Ok(None),
            Some(OptionChange::ObjectList(_)) | None => {}
        }
        let object = self.live_object_mut(id)?;
        let mut reader = AttributeReader::new(object.entity.id(), &mut object.cache, store);
        Ok(reader.raw_value(address, name)?)
    }

    pub fn load_option<S: AttributeStore + ?Sized>(
        &mut self,
        id: &str,
        address: &OptionAddress,
        name: &str,
        default: &str,
        store: &S,
    ) -> PersistResult<String> {
        Ok(self
            .option_value(id, address, name, store)?
            .unwrap_or_else(|| default.to_string()))
    }

    pub fn load_int_option<S: AttributeStore + ?Sized>(
        &mut self,
        id: &str,
        address: &OptionAddress,
        name: &str,
        default: i64,
        store: &S,
    ) -> PersistResult<i64> {
        let raw = self.option_value(id, address, name, store)?;
        Ok(typed_or_default(raw.as_deref(), default, name, "int", parse_int))
    }

    pub fn load_double_option<S: AttributeStore + ?Sized>(
        &mut self,
        id: &str,
        address: &OptionAddress,
        name: &str,
        default: f64,
        store: &S,
    ) -> PersistResult<f64> {
        let raw = self.option_value(id, address, name, store)?;
        Ok(typed_or_default(
            raw.as_deref(),
            default,
            name,
            "double",
            parse_double,
        ))
    }

    pub fn load_bool_option<S: AttributeStore + ?Sized>(
        &mut self,
        id: &str,
        address: &OptionAddress,
        name: &str,
        default: bool,
        store: &S,
    ) -> PersistResult<bool> {
        let raw = self.option_value(id, address, name, store)?;
        Ok(typed_or_default(raw.as_deref(), default, name, "bool", parse_bool))
    }

    pub fn load_object_list_option<S: AttributeStore + ?Sized>(
        &mut self,
        id: &str,
        address: &OptionAddress,
        name: &str,
        store: &S,
    ) -> PersistResult<Vec<ObjectId>> {
        match self.staged_change(id, address, name)? {
            Some(OptionChange::ObjectList(objects)) => return Ok(objects),
            Some(OptionChange::Removed) => return Ok(Vec::new()),
            _ => {}
        }
        let object = self.live_object_mut(id)?;
        let mut reader = AttributeReader::new(object.entity.id(), &mut object.cache, store);
        Ok(reader.load_object_list_option(address, name)?)
    }

    pub fn load_option_with_attached_list<S: AttributeStore + ?Sized>(
        &mut self,
        id: &str,
        address: &OptionAddress,
        name: &str,
        default: &str,
        store: &S,
    ) -> PersistResult<(String, Vec<ObjectId>)> {
        match self.staged_change(id, address, name)? {
            Some(OptionChange::ValueWithList { value, objects, .. }) => {
                return Ok((value, objects))
            }
            Some(OptionChange::Removed) => return Ok((default.to_string(), Vec::new())),
            _ => {}
        }
        let object = self.live_object_mut(id)?;
        let mut reader = AttributeReader::new(object.entity.id(), &mut object.cache, store);
        Ok(reader.load_option_with_attached_list(address, name, default)?)
    }

    pub fn load_custom_list<S: AttributeStore + ?Sized>(
        &mut self,
        id: &str,
        name: &str,
        store: &S,
    ) -> PersistResult<Vec<ObjectId>> {
        let object = self.live_object_mut(id)?;
        if let Some(objects) = object.staged.custom_lists.get(name) {
            return Ok(objects.clone());
        }
        let mut reader = AttributeReader::new(object.entity.id(), &mut object.cache, store);
        Ok(reader.load_custom_list(name)?)
    }
}

#[cfg(test)]
mod tests {
    use super::{parse_bool, parse_double, parse_int, typed_or_default, OptionAddress};
    use crate::persist::cache::AttributeAddressMode;

    #[test]
    fn bool_parsing_accepts_common_spellings() {
        for raw in ["true", "TRUE", " yes ", "1"] {
            assert_eq!(parse_bool(raw), Some(true), "{raw}");
        }
        for raw in ["false", "No", "0"] {
            assert_eq!(parse_bool(raw), Some(false), "{raw}");
        }
        assert_eq!(parse_bool("maybe"), None);
    }

    #[test]
    fn malformed_numbers_degrade_to_default() {
        assert_eq!(parse_int(" 42 "), Some(42));
        assert_eq!(
            typed_or_default(Some("not-a-number"), 7, "Retries", "int", parse_int),
            7
        );
        assert_eq!(typed_or_default(None, 1.5, "Ratio", "double", parse_double), 1.5);
    }

    #[test]
    fn address_builders_select_modes() {
        let address = OptionAddress::group("OPTIONS");
        assert_eq!(address.mode, AttributeAddressMode::GroupSetProperties);

        let legacy = OptionAddress::group_properties("OPTIONS").with_set_name("Legacy");
        assert_eq!(legacy.mode, AttributeAddressMode::GroupProperties);
        assert_eq!(legacy.group_key().set_name.as_deref(), Some("Legacy"));

        let direct = OptionAddress::direct();
        assert_eq!(direct.property_key("Stable").group_role, "");
    }
}
