mod common;

use common::{create_saved, open_store_db};
use jobmeta_core::persist::{AttributeCache, AttributeReader, AttributeWriter, IdAllocator};
use jobmeta_core::repo::schema::{FIELD_DEFAULT_VALUE, FIELD_NAME, FIELD_SQL_TYPE};
use jobmeta_core::{
    Association, AttributeStore, OptionAddress, OptionType, RecordType, SqliteAttributeStore,
    UnitOfWork,
};

#[test]
fn every_option_type_round_trips_through_save_and_reload() {
    let conn = open_store_db();
    let mut store = SqliteAttributeStore::try_new(&conn).unwrap();
    let mut uow = UnitOfWork::default();
    let options = OptionAddress::group("OPTIONS");

    let id = create_saved(&mut uow, &mut store, RecordType::Transformation, "Aggregate");
    uow.set_option(&id, &options, "Label", "daily totals", OptionType::String)
        .unwrap();
    uow.set_option(&id, &options, "BufferRows", "5000", OptionType::Int)
        .unwrap();
    uow.set_option(&id, &options, "Distinct", "true", OptionType::Boolean)
        .unwrap();
    uow.set_option(&id, &options, "Ratio", "0.25", OptionType::Double)
        .unwrap();
    uow.save(&id, &mut store).unwrap();

    let mut fresh = UnitOfWork::default();
    fresh.open(&id, RecordType::Transformation, &store).unwrap();
    assert_eq!(
        fresh
            .load_option(&id, &options, "Label", "none", &store)
            .unwrap(),
        "daily totals"
    );
    assert_eq!(
        fresh
            .load_int_option(&id, &options, "BufferRows", 0, &store)
            .unwrap(),
        5000
    );
    assert!(fresh
        .load_bool_option(&id, &options, "Distinct", false, &store)
        .unwrap());
    let ratio = fresh
        .load_double_option(&id, &options, "Ratio", 1.0, &store)
        .unwrap();
    assert!((ratio - 0.25).abs() < f64::EPSILON);
    assert_eq!(
        fresh
            .load_option(&id, &options, "Missing", "fallback", &store)
            .unwrap(),
        "fallback"
    );
}

#[test]
fn declared_type_is_written_next_to_the_value() {
    let conn = open_store_db();
    let mut store = SqliteAttributeStore::try_new(&conn).unwrap();
    let mut uow = UnitOfWork::default();
    let options = OptionAddress::group("OPTIONS");

    let id = create_saved(&mut uow, &mut store, RecordType::Column, "AMOUNT");
    uow.set_option(&id, &options, "Scale", "2", OptionType::Int)
        .unwrap();
    uow.save(&id, &mut store).unwrap();

    let mut cache = AttributeCache::new();
    let tracker = AttributeReader::new(&id, &mut cache, &store)
        .find_attribute(&options, "Scale")
        .unwrap()
        .unwrap();
    assert_eq!(
        store.field(&tracker.attribute_id, FIELD_SQL_TYPE).unwrap().as_deref(),
        Some("INTEGER")
    );
}

#[test]
fn malformed_stored_values_degrade_to_defaults() {
    let conn = open_store_db();
    let mut store = SqliteAttributeStore::try_new(&conn).unwrap();
    let mut uow = UnitOfWork::default();
    let options = OptionAddress::group("OPTIONS");

    let id = create_saved(&mut uow, &mut store, RecordType::Table, "Orders");
    uow.set_option(&id, &options, "Retries", "not-a-number", OptionType::String)
        .unwrap();
    uow.save(&id, &mut store).unwrap();

    let mut fresh = UnitOfWork::default();
    fresh.open(&id, RecordType::Table, &store).unwrap();
    assert_eq!(
        fresh
            .load_int_option(&id, &options, "Retries", 7, &store)
            .unwrap(),
        7
    );
    assert!(fresh
        .load_bool_option(&id, &options, "Retries", true, &store)
        .unwrap());
    let value = fresh
        .load_double_option(&id, &options, "Retries", 1.5, &store)
        .unwrap();
    assert!((value - 1.5).abs() < f64::EPSILON);
}

#[test]
fn staged_writes_are_visible_before_save() {
    let conn = open_store_db();
    let mut store = SqliteAttributeStore::try_new(&conn).unwrap();
    let mut uow = UnitOfWork::default();
    let options = OptionAddress::group("OPTIONS");

    let id = create_saved(&mut uow, &mut store, RecordType::SortSpec, "Sort1");
    uow.set_option(&id, &options, "Stable", "true", OptionType::Boolean)
        .unwrap();
    assert!(uow.is_changed(&id).unwrap());
    assert!(uow
        .load_bool_option(&id, &options, "Stable", false, &store)
        .unwrap());

    uow.save(&id, &mut store).unwrap();
    uow.remove_option(&id, &options, "Stable").unwrap();
    assert_eq!(
        uow.load_option(&id, &options, "Stable", "unset", &store)
            .unwrap(),
        "unset"
    );

    uow.save(&id, &mut store).unwrap();
    let mut fresh = UnitOfWork::default();
    fresh.open(&id, RecordType::SortSpec, &store).unwrap();
    assert_eq!(
        fresh
            .load_option(&id, &options, "Stable", "unset", &store)
            .unwrap(),
        "unset"
    );
    assert!(store
        .record_ids_of_type(RecordType::Property)
        .unwrap()
        .is_empty());
}

#[test]
fn saving_an_option_twice_never_duplicates_links() {
    let conn = open_store_db();
    let mut store = SqliteAttributeStore::try_new(&conn).unwrap();
    let mut cache = AttributeCache::new();
    let mut ids = IdAllocator::new();
    let options = OptionAddress::group("OPTIONS");

    store.begin().unwrap();
    store.acquire_record("$J1", RecordType::Job).unwrap();
    {
        let mut writer = AttributeWriter::new("$J1", &mut cache, &mut store, &mut ids);
        writer
            .save_option(&options, "Mode", "append", OptionType::String)
            .unwrap();
        writer
            .save_option(&options, "Mode", "replace", OptionType::String)
            .unwrap();
    }
    let groups = store.association("$J1", Association::PropertySets).unwrap();
    assert_eq!(groups.len(), 1);
    assert_eq!(
        store
            .association(&groups[0], Association::SetProperties)
            .unwrap()
            .len(),
        1
    );

    // A cold cache must find the records linked above instead of creating new ones.
    let mut cold_cache = AttributeCache::new();
    AttributeWriter::new("$J1", &mut cold_cache, &mut store, &mut ids)
        .save_option(&options, "Mode", "merge", OptionType::String)
        .unwrap();
    assert_eq!(
        store
            .association(&groups[0], Association::SetProperties)
            .unwrap()
            .len(),
        1
    );
    let id_map = store.commit().unwrap();
    cache.remap_ids(&id_map);

    let job_id = &id_map["$J1"];
    let mut reader_cache = AttributeCache::new();
    assert_eq!(
        AttributeReader::new(job_id, &mut reader_cache, &store)
            .load_option(&options, "Mode", "")
            .unwrap(),
        "merge"
    );
    let tracker = cache.property(&options.property_key("Mode")).unwrap();
    assert_eq!(
        store
            .field(&tracker.attribute_id, FIELD_DEFAULT_VALUE)
            .unwrap()
            .as_deref(),
        Some("merge")
    );
}

#[test]
fn object_list_option_uses_a_replaceable_holder() {
    let conn = open_store_db();
    let mut store = SqliteAttributeStore::try_new(&conn).unwrap();
    let mut uow = UnitOfWork::default();
    let keys = OptionAddress::group("KEYS");

    let id = create_saved(&mut uow, &mut store, RecordType::Table, "Orders");
    assert!(uow
        .load_object_list_option(&id, &keys, "Primary", &store)
        .unwrap()
        .is_empty());

    uow.set_object_list_option(&id, &keys, "Primary", vec!["C-1".into(), "C-2".into()])
        .unwrap();
    uow.save(&id, &mut store).unwrap();
    uow.set_object_list_option(&id, &keys, "Primary", vec!["C-3".into()])
        .unwrap();
    uow.save(&id, &mut store).unwrap();

    let mut fresh = UnitOfWork::default();
    fresh.open(&id, RecordType::Table, &store).unwrap();
    assert_eq!(
        fresh
            .load_object_list_option(&id, &keys, "Primary", &store)
            .unwrap(),
        vec!["C-3".to_string()]
    );
    assert_eq!(
        store
            .record_ids_of_type(RecordType::ObjectHolder)
            .unwrap()
            .len(),
        1
    );
}

#[test]
fn option_with_attached_list_round_trips() {
    let conn = open_store_db();
    let mut store = SqliteAttributeStore::try_new(&conn).unwrap();
    let mut uow = UnitOfWork::default();
    let options = OptionAddress::group("MACROS");

    let id = create_saved(&mut uow, &mut store, RecordType::Job, "Nightly");
    uow.set_option_with_attached_list(
        &id,
        &options,
        "RunDate",
        "DSJobStartDate",
        OptionType::String,
        "Conflicts",
        vec!["P-1".into(), "P-2".into()],
    )
    .unwrap();
    uow.save(&id, &mut store).unwrap();

    let mut fresh = UnitOfWork::default();
    fresh.open(&id, RecordType::Job, &store).unwrap();
    let (value, objects) = fresh
        .load_option_with_attached_list(&id, &options, "RunDate", "", &store)
        .unwrap();
    assert_eq!(value, "DSJobStartDate");
    assert_eq!(objects, vec!["P-1".to_string(), "P-2".to_string()]);

    let (value, objects) = fresh
        .load_option_with_attached_list(&id, &options, "Other", "none", &store)
        .unwrap();
    assert_eq!(value, "none");
    assert!(objects.is_empty());
}

#[test]
fn duplicate_custom_lists_resolve_to_the_first_found() {
    let conn = open_store_db();
    let mut store = SqliteAttributeStore::try_new(&conn).unwrap();

    store.begin().unwrap();
    store.acquire_record("$J1", RecordType::Job).unwrap();
    store.set_field("$J1", FIELD_NAME, "Nightly").unwrap();
    for (list_id, target) in [("$L1", "T-first"), ("$L2", "T-second")] {
        store
            .acquire_record(list_id, RecordType::CustomAssociation)
            .unwrap();
        store.set_field(list_id, FIELD_NAME, "Targets").unwrap();
        store
            .set_association(list_id, Association::AssociatedObjects, &[target.to_string()])
            .unwrap();
        store
            .add_to_association("$J1", Association::CustomAssociations, list_id)
            .unwrap();
    }
    let id_map = store.commit().unwrap();
    let job_id = id_map["$J1"].clone();

    let mut uow = UnitOfWork::default();
    uow.open(&job_id, RecordType::Job, &store).unwrap();
    assert_eq!(
        uow.load_custom_list(&job_id, "Targets", &store).unwrap(),
        vec!["T-first".to_string()]
    );
    assert_eq!(
        uow.object(&job_id).unwrap().cache().custom_list("Targets"),
        Some(id_map["$L1"].as_str())
    );
}

#[test]
fn custom_list_replaces_contents_in_place() {
    let conn = open_store_db();
    let mut store = SqliteAttributeStore::try_new(&conn).unwrap();
    let mut uow = UnitOfWork::default();

    let id = create_saved(&mut uow, &mut store, RecordType::Job, "Nightly");
    uow.set_custom_list(&id, "Targets", vec!["T-1".into()]).unwrap();
    uow.save(&id, &mut store).unwrap();
    uow.set_custom_list(&id, "Targets", vec!["T-2".into(), "T-3".into()])
        .unwrap();
    assert_eq!(
        uow.load_custom_list(&id, "Targets", &store).unwrap(),
        vec!["T-2".to_string(), "T-3".to_string()]
    );
    uow.save(&id, &mut store).unwrap();

    let mut fresh = UnitOfWork::default();
    fresh.open(&id, RecordType::Job, &store).unwrap();
    assert_eq!(
        fresh.load_custom_list(&id, "Targets", &store).unwrap(),
        vec!["T-2".to_string(), "T-3".to_string()]
    );
    assert_eq!(
        store
            .association(&id, Association::CustomAssociations)
            .unwrap()
            .len(),
        1
    );
}

#[test]
fn group_properties_mode_reads_older_data() {
    let conn = open_store_db();
    let mut store = SqliteAttributeStore::try_new(&conn).unwrap();
    let mut cache = AttributeCache::new();
    let mut ids = IdAllocator::new();
    let legacy = OptionAddress::group_properties("LEGACY");

    store.begin().unwrap();
    store.acquire_record("$T1", RecordType::Table).unwrap();
    AttributeWriter::new("$T1", &mut cache, &mut store, &mut ids)
        .save_option(&legacy, "Format", "fixed", OptionType::String)
        .unwrap();
    let id_map = store.commit().unwrap();
    let table_id = &id_map["$T1"];

    let mut cold_cache = AttributeCache::new();
    let mut reader = AttributeReader::new(table_id, &mut cold_cache, &store);
    assert_eq!(reader.load_option(&legacy, "Format", "").unwrap(), "fixed");
    assert_eq!(
        reader
            .load_option(&OptionAddress::group("LEGACY"), "Format", "none")
            .unwrap(),
        "none"
    );
}

#[test]
fn display_name_matching_and_named_groups() {
    let conn = open_store_db();
    let mut store = SqliteAttributeStore::try_new(&conn).unwrap();
    let mut cache = AttributeCache::new();
    let mut ids = IdAllocator::new();
    let source = OptionAddress::group("LINK").with_set_name("source");
    let target = OptionAddress::group("LINK").with_set_name("target");

    store.begin().unwrap();
    store.acquire_record("$S1", RecordType::Transformation).unwrap();
    let tracker = {
        let mut writer = AttributeWriter::new("$S1", &mut cache, &mut store, &mut ids);
        writer
            .save_option(&target, "Path", "/out", OptionType::String)
            .unwrap();
        writer
            .save_option(&source, "Path", "/in", OptionType::String)
            .unwrap()
    };
    store
        .set_field(&tracker.attribute_id, FIELD_NAME, "Input path")
        .unwrap();
    let id_map = store.commit().unwrap();
    let stage_id = &id_map["$S1"];

    let mut cold_cache = AttributeCache::new();
    let mut reader = AttributeReader::new(stage_id, &mut cold_cache, &store);
    assert_eq!(reader.load_option(&source, "Path", "").unwrap(), "/in");
    assert_eq!(reader.load_option(&target, "Path", "").unwrap(), "/out");
    assert_eq!(
        reader
            .load_option(&source.clone().match_display_name(), "Input path", "")
            .unwrap(),
        "/in"
    );
    assert_eq!(
        store
            .association(stage_id, Association::PropertySets)
            .unwrap()
            .len(),
        2
    );
}

#[test]
fn direct_options_attach_to_the_owner() {
    let conn = open_store_db();
    let mut store = SqliteAttributeStore::try_new(&conn).unwrap();
    let mut uow = UnitOfWork::default();
    let direct = OptionAddress::direct();

    let id = create_saved(&mut uow, &mut store, RecordType::Column, "AMOUNT");
    uow.set_option(&id, &direct, "Nullable", "no", OptionType::Boolean)
        .unwrap();
    uow.save(&id, &mut store).unwrap();

    assert_eq!(store.association(&id, Association::Properties).unwrap().len(), 1);
    assert!(store
        .association(&id, Association::PropertySets)
        .unwrap()
        .is_empty());

    let mut fresh = UnitOfWork::default();
    fresh.open(&id, RecordType::Column, &store).unwrap();
    assert!(!fresh
        .load_bool_option(&id, &direct, "Nullable", true, &store)
        .unwrap());
}
