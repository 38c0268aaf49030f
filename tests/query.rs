mod common;

use std::fs;

use assert_matches::assert_matches;

use canto_sync::domain::Filter;
use canto_sync::error::CantoError;
use canto_sync::query::{QueryCache, QueryFetcher};

use common::{MockCatalog, NullSink, page, paged, record, temp_store};

#[test]
fn every_page_is_cached_under_the_filter_key() {
    let (_temp, store) = temp_store();
    let client = MockCatalog::default().with_query("en:Wren", paged(1, 7, 3, "Wren", "France"));
    let filter = Filter::parse(&["en:Wren"]).unwrap();

    let cache = QueryFetcher::new(&store, &client).fetch(&filter, &NullSink).unwrap();

    assert_eq!(cache.num_pages, 3);
    assert_eq!(cache.num_recordings, 7);
    assert!(cache.is_complete(&store));
    assert_eq!(client.page_calls_for("en:Wren"), 3);
    let last = cache.page(&store, 3).unwrap();
    assert_eq!(last.recordings.len(), 1);
}

#[test]
fn refetch_drops_pages_the_catalog_no_longer_has() {
    let (_temp, store) = temp_store();
    let filter = Filter::parse(&["en:Wren"]).unwrap();
    let before = MockCatalog::default().with_query("en:Wren", paged(1, 6, 2, "Wren", "France"));
    QueryFetcher::new(&store, &before).fetch(&filter, &NullSink).unwrap();
    assert!(store.page_path("en_Wren", 3).as_std_path().is_file());

    let after = MockCatalog::default().with_query("en:Wren", paged(1, 4, 2, "Wren", "France"));
    let cache = QueryFetcher::new(&store, &after).fetch(&filter, &NullSink).unwrap();

    assert_eq!(cache.num_pages, 2);
    assert!(!store.page_path("en_Wren", 3).as_std_path().exists());
    let reopened = QueryCache::open(&store, "en_Wren").unwrap();
    assert_eq!(reopened.num_recordings, 4);
}

#[test]
fn pages_are_stored_verbatim() {
    let (_temp, store) = temp_store();
    let raw = page(1, 1, vec![record(5, "Wren", "France")]);
    let client = MockCatalog::default().with_query("en:Wren", vec![raw.clone()]);
    let filter = Filter::parse(&["en:Wren"]).unwrap();

    QueryFetcher::new(&store, &client).fetch(&filter, &NullSink).unwrap();

    let stored: serde_json::Value =
        serde_json::from_slice(&fs::read(store.page_path("en_Wren", 1).as_std_path()).unwrap())
            .unwrap();
    assert_eq!(stored, raw);
}

#[test]
fn unparseable_page_is_reported_as_corrupt() {
    let (_temp, store) = temp_store();
    let client = MockCatalog::default().with_query("en:Wren", paged(1, 2, 2, "Wren", "France"));
    let filter = Filter::parse(&["en:Wren"]).unwrap();
    QueryFetcher::new(&store, &client).fetch(&filter, &NullSink).unwrap();
    fs::write(store.page_path("en_Wren", 1).as_std_path(), b"{ not json").unwrap();

    let err = QueryCache::open(&store, "en_Wren").unwrap_err();

    assert_matches!(err, CantoError::CorruptPage { .. });
}
