mod common;

use common::{create_saved, open_store_db, permanent_id, EventRecorder};
use jobmeta_core::{
    ModelConfig, OptionAddress, OptionType, PersistError, RecordType, SqliteAttributeStore,
    SubList, UnitOfWork,
};
use std::sync::Arc;

#[test]
fn undo_after_removal_reinstates_the_member() {
    let conn = open_store_db();
    let mut store = SqliteAttributeStore::try_new(&conn).unwrap();
    let mut uow = UnitOfWork::default();

    let job = uow.create_object(RecordType::Job, "Nightly").unwrap();
    let note = uow.create_note("Runbook", "restart on failure").unwrap();
    uow.add_member(&job, SubList::Notes, &note).unwrap();
    let outcome = uow.save(&job, &mut store).unwrap();
    let job = permanent_id(&outcome, &job);
    let note = permanent_id(&outcome, &note);

    let note_events = Arc::new(EventRecorder::default());
    let job_events = Arc::new(EventRecorder::default());
    uow.add_listener(&note, note_events.clone());
    uow.add_listener(&job, job_events.clone());

    uow.remove_member(&job, SubList::Notes, &note).unwrap();
    assert!(uow.object(&note).is_none());
    assert_eq!(uow.object(&job).unwrap().deleted_objects()[0].id(), note);
    assert_eq!(note_events.deleted_sources(), vec![note.clone()]);
    assert!(job_events.changed_fields().contains(&"notes"));

    uow.undo().unwrap();
    assert!(uow.object(&note).is_some());
    let owner = uow.object(&job).unwrap();
    assert!(owner.deleted_objects().is_empty());
    assert_eq!(owner.container().unwrap().notes(), &[note.clone()]);

    uow.redo().unwrap();
    assert!(uow.object(&note).is_none());
    assert!(uow
        .object(&job)
        .unwrap()
        .container()
        .unwrap()
        .notes()
        .is_empty());
}

#[test]
fn reinstating_from_the_queue_is_undoable() {
    let conn = open_store_db();
    let mut store = SqliteAttributeStore::try_new(&conn).unwrap();
    let mut uow = UnitOfWork::default();
    let job = create_saved(&mut uow, &mut store, RecordType::Job, "Nightly");
    let attribute = create_saved(&mut uow, &mut store, RecordType::ExtendedAttribute, "Owner");

    uow.add_to_deleted_objects(&job, &attribute).unwrap();
    assert!(uow.object(&attribute).is_none());
    assert!(matches!(
        uow.remove_from_deleted_objects(&job, "not-queued"),
        Err(PersistError::NotInList { .. })
    ));

    uow.remove_from_deleted_objects(&job, &attribute).unwrap();
    assert!(uow.object(&attribute).is_some());
    assert!(uow.object(&job).unwrap().deleted_objects().is_empty());

    uow.undo().unwrap();
    assert!(uow.object(&attribute).is_none());
    assert_eq!(uow.object(&job).unwrap().deleted_objects().len(), 1);
}

#[test]
fn undo_and_redo_replay_in_stack_order() {
    let mut uow = UnitOfWork::default();
    let id = uow.create_object(RecordType::Column, "A").unwrap();
    let recorder = Arc::new(EventRecorder::default());
    uow.add_listener(&id, recorder.clone());

    uow.set_name(&id, "B").unwrap();
    uow.set_name(&id, "C").unwrap();
    uow.set_description(&id, "amount in cents").unwrap();

    uow.undo().unwrap();
    assert_eq!(uow.object(&id).unwrap().entity().description(), "");
    uow.undo().unwrap();
    assert_eq!(uow.object(&id).unwrap().entity().name(), "B");
    assert!(uow.can_redo());

    uow.redo().unwrap();
    assert_eq!(uow.object(&id).unwrap().entity().name(), "C");

    uow.set_name(&id, "D").unwrap();
    assert!(!uow.can_redo());
    assert!(matches!(uow.redo(), Err(PersistError::NothingToRedo)));
    assert_eq!(
        recorder.changed_fields(),
        vec!["name", "name", "description", "description", "name", "name", "name"]
    );
}

#[test]
fn compound_edits_undo_as_one_step() {
    let mut uow = UnitOfWork::default();
    let id = uow.create_object(RecordType::Table, "Orders").unwrap();

    uow.start_compound();
    uow.set_name(&id, "Orders_v2").unwrap();
    uow.start_compound();
    uow.set_description(&id, "renamed").unwrap();
    uow.end_compound();
    assert!(matches!(uow.undo(), Err(PersistError::CompoundEditOpen)));
    uow.end_compound();

    uow.undo().unwrap();
    let entity = uow.object(&id).unwrap().entity();
    assert_eq!(entity.name(), "Orders");
    assert_eq!(entity.description(), "");
    assert!(!uow.can_undo());
    assert!(matches!(uow.undo(), Err(PersistError::NothingToUndo)));
}

#[test]
fn undo_of_staged_option_restores_previous_stage() {
    let conn = open_store_db();
    let mut store = SqliteAttributeStore::try_new(&conn).unwrap();
    let mut uow = UnitOfWork::default();
    let options = OptionAddress::group("OPTIONS");
    let id = create_saved(&mut uow, &mut store, RecordType::SortSpec, "Sort1");

    uow.set_option(&id, &options, "Stable", "true", OptionType::Boolean)
        .unwrap();
    uow.set_option(&id, &options, "Stable", "false", OptionType::Boolean)
        .unwrap();
    uow.undo().unwrap();
    assert_eq!(
        uow.load_option(&id, &options, "Stable", "unset", &store)
            .unwrap(),
        "true"
    );
    uow.undo().unwrap();
    assert_eq!(
        uow.load_option(&id, &options, "Stable", "unset", &store)
            .unwrap(),
        "unset"
    );
}

#[test]
fn history_survives_id_remap() {
    let conn = open_store_db();
    let mut store = SqliteAttributeStore::try_new(&conn).unwrap();
    let mut uow = UnitOfWork::default();

    let temporary_id = uow.create_object(RecordType::Transformation, "Join").unwrap();
    uow.set_description(&temporary_id, "first").unwrap();
    let id = permanent_id(&uow.save(&temporary_id, &mut store).unwrap(), &temporary_id);

    uow.undo().unwrap();
    assert_eq!(uow.object(&id).unwrap().entity().description(), "");
    assert!(uow.is_changed(&id).unwrap());
}

#[test]
fn disabled_undo_records_nothing() {
    let config = ModelConfig {
        undo_supported: false,
        ..ModelConfig::default()
    };
    let mut uow = UnitOfWork::new(config);
    let id = uow.create_object(RecordType::Column, "A").unwrap();

    uow.set_name(&id, "B").unwrap();
    assert_eq!(uow.object(&id).unwrap().entity().name(), "B");
    assert!(!uow.can_undo());
}

#[test]
fn temporary_ids_use_the_configured_seed() {
    let config = ModelConfig {
        temporary_id_seed: "TMP".to_string(),
        ..ModelConfig::default()
    };
    let mut uow = UnitOfWork::new(config);
    let first = uow.create_object(RecordType::Column, "A").unwrap();
    let second = uow.create_object(RecordType::Column, "B").unwrap();

    assert!(first.starts_with("$TMP"));
    assert_ne!(first, second);
    assert!(uow.registry().is_new_object_id(&second));
}

#[test]
fn removing_a_member_that_is_gone_changes_nothing() {
    let conn = open_store_db();
    let mut store = SqliteAttributeStore::try_new(&conn).unwrap();
    let mut uow = UnitOfWork::default();

    let job = uow.create_object(RecordType::Job, "Nightly").unwrap();
    let note = uow.create_note("Runbook", "restart on failure").unwrap();
    uow.add_member(&job, SubList::Notes, &note).unwrap();
    let outcome = uow.save(&job, &mut store).unwrap();
    let job = permanent_id(&outcome, &job);
    let note = permanent_id(&outcome, &note);

    let mut fresh = UnitOfWork::default();
    fresh.open(&job, RecordType::Job, &store).unwrap();
    fresh.delete(&note, &mut store).unwrap();

    assert!(matches!(
        fresh.remove_member(&job, SubList::Notes, &note),
        Err(PersistError::ObjectNotFound(_))
    ));
    assert_eq!(
        fresh.object(&job).unwrap().container().unwrap().notes(),
        &[note]
    );
    assert!(!fresh.is_changed(&job).unwrap());
    assert!(!fresh.can_undo());
}

#[test]
fn failed_compound_undo_leaves_the_model_untouched() {
    let conn = open_store_db();
    let mut store = SqliteAttributeStore::try_new(&conn).unwrap();
    let mut uow = UnitOfWork::default();
    let x = create_saved(&mut uow, &mut store, RecordType::Column, "X");
    let y = create_saved(&mut uow, &mut store, RecordType::Column, "Y");

    uow.start_compound();
    uow.set_description(&y, "surrogate key").unwrap();
    uow.set_name(&x, "X2").unwrap();
    uow.end_compound();
    uow.delete(&y, &mut store).unwrap();

    assert!(matches!(uow.undo(), Err(PersistError::Undo(_))));
    assert_eq!(uow.object(&x).unwrap().entity().name(), "X2");
    assert!(uow.object(&y).is_none());
    assert!(uow.can_undo());
    assert!(!uow.can_redo());
}
