//! Debounce, save-tag race handling, and version numbering against the
//! in-memory store.

use specdoc::{
    DocumentId, MemoryStore, SpecStore, StoreError, VersionConfig, VersionController,
};

fn controller() -> VersionController {
    VersionController::new(DocumentId::new("spec-7"), VersionConfig::default())
}

#[test]
fn five_rapid_edits_one_save_with_last_content() {
    let mut versions = controller();
    // Five edits, 200 ms apart.
    for tick in 0..5u64 {
        versions.note_edit(format!("<p>edit {tick}</p>"), tick * 200);
    }
    // No save during the burst or before the quiet period elapses.
    for tick in 0..9u64 {
        assert!(versions.poll(tick * 200).is_none(), "fired early at {tick}");
    }
    // Last edit at t=800; debounce expires at t=1800.
    let request = versions.poll(1800).expect("save fires after quiet period");
    assert_eq!(request.content, "<p>edit 4</p>");
    assert!(versions.poll(3000).is_none(), "only one save per gap");
}

#[test]
fn save_completing_after_a_load_is_discarded() {
    let mut versions = controller();
    let mut store = MemoryStore::new();
    let doc = DocumentId::new("spec-7");
    store.create_version(&doc, 0, "<p>v0</p>").unwrap();
    store.create_version(&doc, 1, "<p>v1</p>").unwrap();

    versions.note_edit("<p>typed into v0</p>".to_string(), 0);
    let request = versions.poll(1000).expect("save fires");

    // User switches versions while the save is in flight.
    let loaded = versions.load(1, &mut store).unwrap();
    assert_eq!(loaded, "<p>v1</p>");

    // The straggler completes; its tag is stale and must not disturb the
    // controller.
    let result = store.update_version(&doc, request.tag.version, &request.content);
    versions.complete_save(&request.tag, result);
    assert_eq!(versions.current_version(), 1);
    assert!(!versions.has_pending_save());
}

#[test]
fn load_failure_leaves_state_untouched() {
    let mut versions = controller();
    let mut store = MemoryStore::new();
    store
        .create_version(&DocumentId::new("spec-7"), 0, "<p>v0</p>")
        .unwrap();
    versions.load(0, &mut store).unwrap();
    versions.note_edit("<p>typed</p>".to_string(), 0);

    assert!(versions.load(9, &mut store).is_err());
    assert_eq!(versions.current_version(), 0);
    assert!(versions.has_pending_save());
}

#[test]
fn create_next_numbers_are_gap_free() {
    let mut versions = controller();
    let mut store = MemoryStore::new();
    let doc = DocumentId::new("spec-7");

    for expected in 0..4u64 {
        let record = versions
            .create_next(&mut store, &format!("<p>v{expected}</p>"))
            .unwrap();
        assert_eq!(record.version, expected.to_string());
        assert_eq!(versions.current_version(), expected);
    }
    let listed = store.list_versions(&doc).unwrap();
    assert_eq!(listed.len(), 4);
}

#[test]
fn autosave_targets_new_slot_after_create() {
    let mut versions = controller();
    let mut store = MemoryStore::new();
    versions.create_next(&mut store, "<p>v0</p>").unwrap();
    versions.create_next(&mut store, "<p>v1</p>").unwrap();

    versions.note_edit("<p>v1 amended</p>".to_string(), 0);
    let request = versions.poll(1000).expect("fires");
    assert_eq!(request.tag.version, 1);

    let result = store.update_version(&request.tag.doc, request.tag.version, &request.content);
    versions.complete_save(&request.tag, result);
    assert_eq!(
        store.fetch_content(&DocumentId::new("spec-7"), 1).unwrap(),
        "<p>v1 amended</p>"
    );
    // Version 0 untouched.
    assert_eq!(
        store.fetch_content(&DocumentId::new("spec-7"), 0).unwrap(),
        "<p>v0</p>"
    );
}

#[test]
fn failed_save_is_not_lost_forever() {
    let mut versions = controller();
    let mut store = MemoryStore::new();
    versions.create_next(&mut store, "<p>v0</p>").unwrap();

    versions.note_edit("<p>first try</p>".to_string(), 2000);
    let request = versions.poll(3000).expect("fires");
    store.fail_next = true;
    let result = store.update_version(&request.tag.doc, request.tag.version, &request.content);
    assert!(matches!(result, Err(StoreError::Backend(_))));
    versions.complete_save(&request.tag, result);

    // The next edit re-arms and the retry succeeds.
    versions.note_edit("<p>second try</p>".to_string(), 4000);
    let retry = versions.poll(5000).expect("fires again");
    let result = store.update_version(&retry.tag.doc, retry.tag.version, &retry.content);
    versions.complete_save(&retry.tag, result);
    assert_eq!(
        store.fetch_content(&DocumentId::new("spec-7"), 0).unwrap(),
        "<p>second try</p>"
    );
}

#[test]
fn load_latest_picks_highest_sequence() {
    let mut versions = controller();
    let mut store = MemoryStore::new();
    versions.create_next(&mut store, "<p>v0</p>").unwrap();
    versions.create_next(&mut store, "<p>v1</p>").unwrap();
    versions.create_next(&mut store, "<p>v2</p>").unwrap();

    let (seq, content) = versions.load_latest(&mut store).unwrap();
    assert_eq!(seq, 2);
    assert_eq!(content, "<p>v2</p>");
}

#[test]
fn version_records_serialize_for_the_wire() {
    let mut store = MemoryStore::new();
    let record = store
        .create_version(&DocumentId::new("spec-7"), 0, "<p>v0</p>")
        .unwrap();
    let json = serde_json::to_string(&record).unwrap();
    let back: specdoc::VersionRecord = serde_json::from_str(&json).unwrap();
    assert_eq!(back, record);
}
