#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;
use std::sync::Mutex;

use camino::Utf8PathBuf;
use serde_json::{Value, json};

use canto_sync::app::{ProgressEvent, ProgressSink};
use canto_sync::catalog::CatalogClient;
use canto_sync::download::CancelToken;
use canto_sync::error::CantoError;
use canto_sync::store::Store;

pub struct NullSink;

impl ProgressSink for NullSink {
    fn event(&self, _event: ProgressEvent) {}
}

/// In-memory catalog. Pages are keyed by the encoded query string; assets
/// "download" as `full:<url>` unless scripted otherwise.
#[derive(Default)]
pub struct MockCatalog {
    pages: Mutex<HashMap<String, Vec<Value>>>,
    failing_urls: Mutex<HashSet<String>>,
    torn_write: Mutex<Option<(String, CancelToken)>>,
    pub page_calls: Mutex<Vec<(String, u64)>>,
    pub asset_calls: Mutex<Vec<String>>,
}

impl MockCatalog {
    pub fn with_query(self, query: &str, pages: Vec<Value>) -> Self {
        self.pages.lock().unwrap().insert(query.to_string(), pages);
        self
    }

    pub fn fail_url(&self, url: &str) {
        self.failing_urls.lock().unwrap().insert(url.to_string());
    }

    pub fn heal_url(&self, url: &str) {
        self.failing_urls.lock().unwrap().remove(url);
    }

    /// Leaves a truncated file for `url` and trips `cancel`, like a process
    /// killed halfway through a transfer.
    pub fn tear_at(&self, url: &str, cancel: CancelToken) {
        *self.torn_write.lock().unwrap() = Some((url.to_string(), cancel));
    }

    pub fn asset_call_count(&self) -> usize {
        self.asset_calls.lock().unwrap().len()
    }

    pub fn page_calls_for(&self, query: &str) -> usize {
        self.page_calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(called, _)| called == query)
            .count()
    }
}

impl CatalogClient for MockCatalog {
    fn fetch_page(&self, query: &str, page: u64) -> Result<Value, CantoError> {
        self.page_calls
            .lock()
            .unwrap()
            .push((query.to_string(), page));
        let pages = self.pages.lock().unwrap();
        pages
            .get(query)
            .and_then(|pages| pages.get(page as usize - 1))
            .cloned()
            .ok_or_else(|| CantoError::CatalogStatus {
                status: 404,
                message: format!("no page {page} for {query}"),
            })
    }

    fn retrieve_asset(&self, url: &str, destination: &Path) -> Result<(), CantoError> {
        self.asset_calls.lock().unwrap().push(url.to_string());
        if self.failing_urls.lock().unwrap().contains(url) {
            return Err(CantoError::AssetTransfer {
                url: url.to_string(),
                message: "connection reset".to_string(),
            });
        }
        let tear = {
            let mut torn = self.torn_write.lock().unwrap();
            match torn.as_ref() {
                Some((target, _)) if target == url => torn.take().map(|(_, cancel)| cancel),
                _ => None,
            }
        };
        match tear {
            Some(cancel) => {
                fs::write(destination, b"par").unwrap();
                cancel.cancel();
            }
            None => fs::write(destination, format!("full:{url}")).unwrap(),
        }
        Ok(())
    }
}

pub fn temp_store() -> (tempfile::TempDir, Store) {
    let temp = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(temp.path().join("dataset")).unwrap();
    (temp, Store::new(root))
}

pub fn asset_url(id: u64) -> String {
    format!("https://example.org/{id}.mp3")
}

pub fn record(id: u64, en: &str, cnt: &str) -> Value {
    json!({
        "id": id.to_string(),
        "en": en,
        "cnt": cnt,
        "q": "A",
        "file": asset_url(id),
    })
}

pub fn page(num_pages: u64, num_recordings: u64, recordings: Vec<Value>) -> Value {
    json!({
        "numRecordings": num_recordings.to_string(),
        "numSpecies": "1",
        "page": 1,
        "numPages": num_pages,
        "recordings": recordings,
    })
}

/// `count` records of one species split over pages of `per_page`.
pub fn paged(first_id: u64, count: u64, per_page: u64, en: &str, cnt: &str) -> Vec<Value> {
    let num_pages = count.div_ceil(per_page);
    (0..num_pages)
        .map(|page_index| {
            let start = first_id + page_index * per_page;
            let end = (start + per_page).min(first_id + count);
            page(
                num_pages,
                count,
                (start..end).map(|id| record(id, en, cnt)).collect(),
            )
        })
        .collect()
}

pub fn put_asset(store: &Store, category: &str, id: u64, content: &[u8]) {
    let dir = store.category_dir(category);
    fs::create_dir_all(dir.as_std_path()).unwrap();
    fs::write(dir.join(format!("{id}.mp3")).as_std_path(), content).unwrap();
}
