mod common;

use std::collections::BTreeSet;
use std::fs;

use canto_sync::domain::{Filter, RecordId};
use canto_sync::library::{LibraryIndex, Reconciler};
use canto_sync::query::QueryFetcher;
use canto_sync::store::Store;

use common::{MockCatalog, NullSink, page, put_asset, record, temp_store};

fn seed_cache(store: &Store, client: &MockCatalog, terms: &[&str]) {
    let filter = Filter::parse(terms).unwrap();
    QueryFetcher::new(store, client).fetch(&filter, &NullSink).unwrap();
}

#[test]
fn index_has_one_entry_per_stored_asset() {
    let (_temp, store) = temp_store();
    let client = MockCatalog::default()
        .with_query(
            "en:Robin",
            vec![page(1, 2, vec![record(1, "Robin", "France"), record(2, "Robin", "Spain")])],
        )
        .with_query(
            "cnt:France",
            vec![page(1, 2, vec![record(1, "Robin", "France"), record(3, "Wren", "France")])],
        );
    seed_cache(&store, &client, &["en:Robin"]);
    seed_cache(&store, &client, &["cnt:France"]);
    put_asset(&store, "Robin", 1, b"a");
    put_asset(&store, "Robin", 2, b"a");
    put_asset(&store, "Wren", 3, b"a");
    // Same id stored twice still yields a single index entry.
    put_asset(&store, "Misfiled", 1, b"a");

    let (index, report) = Reconciler::new(&store, &client).reconcile(&NullSink).unwrap();

    assert_eq!(index.tracks.len(), 3);
    assert_eq!(index.recording_number, "3");
    assert_eq!(
        index.ids(),
        BTreeSet::from([RecordId::new(1), RecordId::new(2), RecordId::new(3)])
    );
    assert_eq!(report.from_cache, 3);
    assert_eq!(report.looked_up, 0);

    let stored = LibraryIndex::load(&store).unwrap().unwrap();
    assert_eq!(stored.tracks.len(), 3);
}

#[test]
fn uncached_asset_triggers_exactly_one_lookup() {
    let (_temp, store) = temp_store();
    let client = MockCatalog::default()
        .with_query("en:Robin", vec![page(1, 1, vec![record(1, "Robin", "France")])])
        .with_query("nr:55", vec![page(1, 1, vec![record(55, "Wren", "Italy")])]);
    seed_cache(&store, &client, &["en:Robin"]);
    put_asset(&store, "Robin", 1, b"a");
    put_asset(&store, "Wren", 55, b"a");

    let (index, report) = Reconciler::new(&store, &client).reconcile(&NullSink).unwrap();

    assert_eq!(client.page_calls_for("nr:55"), 1);
    assert_eq!(report.looked_up, 1);
    let looked_up = index
        .tracks
        .iter()
        .find(|track| track.id == RecordId::new(55))
        .unwrap();
    assert_eq!(looked_up.tag_value("cnt").as_deref(), Some("Italy"));

    // The lookup is now cached; a rebuild needs no remote call.
    let (_, report) = Reconciler::new(&store, &client).reconcile(&NullSink).unwrap();
    assert_eq!(report.looked_up, 0);
    assert_eq!(client.page_calls_for("nr:55"), 1);
}

#[test]
fn unknown_asset_is_reported_not_indexed() {
    let (_temp, store) = temp_store();
    let client = MockCatalog::default().with_query("nr:9", vec![page(0, 0, Vec::new())]);
    put_asset(&store, "Ghost", 9, b"a");

    let (index, report) = Reconciler::new(&store, &client).reconcile(&NullSink).unwrap();

    assert!(index.tracks.is_empty());
    assert_eq!(report.unresolved, vec![RecordId::new(9)]);
}

#[test]
fn rebuild_replaces_index_without_leftovers() {
    let (_temp, store) = temp_store();
    let client = MockCatalog::default().with_query(
        "en:Robin",
        vec![page(1, 2, vec![record(1, "Robin", "France"), record(2, "Robin", "France")])],
    );
    seed_cache(&store, &client, &["en:Robin"]);
    put_asset(&store, "Robin", 1, b"a");
    put_asset(&store, "Robin", 2, b"a");
    Reconciler::new(&store, &client).reconcile(&NullSink).unwrap();

    fs::remove_file(store.asset_path("Robin", RecordId::new(2), "mp3").as_std_path()).unwrap();
    Reconciler::new(&store, &client).reconcile(&NullSink).unwrap();

    let stored = LibraryIndex::load(&store).unwrap().unwrap();
    assert_eq!(stored.ids(), BTreeSet::from([RecordId::new(1)]));
    let hidden = fs::read_dir(store.metadata_root().as_std_path())
        .unwrap()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_name().to_string_lossy().starts_with('.'))
        .count();
    assert_eq!(hidden, 0);
}

#[test]
fn cache_with_missing_page_still_contributes() {
    let (_temp, store) = temp_store();
    let client = MockCatalog::default().with_query(
        "en:Robin",
        vec![
            page(2, 2, vec![record(1, "Robin", "France")]),
            page(2, 2, vec![record(2, "Robin", "France")]),
        ],
    );
    seed_cache(&store, &client, &["en:Robin"]);
    fs::remove_file(store.page_path("en_Robin", 2).as_std_path()).unwrap();
    put_asset(&store, "Robin", 1, b"a");

    let (index, report) = Reconciler::new(&store, &client).reconcile(&NullSink).unwrap();

    assert_eq!(index.ids(), BTreeSet::from([RecordId::new(1)]));
    assert_eq!(report.looked_up, 0);
}
