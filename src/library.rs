use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;

use serde::{Deserialize, Serialize};

use crate::app::{ProgressSink, emit};
use crate::catalog::CatalogClient;
use crate::domain::{Filter, Record, RecordId};
use crate::error::CantoError;
use crate::inventory::InventoryScanner;
use crate::query::{QueryCache, QueryFetcher};
use crate::store::Store;

/// Contents of `metadata/library.json`: one record per asset on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LibraryIndex {
    pub recording_number: String,
    pub tracks: Vec<Record>,
}

impl LibraryIndex {
    pub fn from_records(tracks: Vec<Record>) -> Self {
        Self {
            recording_number: tracks.len().to_string(),
            tracks,
        }
    }

    pub fn load(store: &Store) -> Result<Option<Self>, CantoError> {
        let path = store.library_path();
        let content = match fs::read(path.as_std_path()) {
            Ok(content) => content,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(CantoError::Filesystem(format!("read {path}: {err}"))),
        };
        serde_json::from_slice(&content)
            .map(Some)
            .map_err(|err| CantoError::Filesystem(format!("parse {path}: {err}")))
    }

    pub fn ids(&self) -> BTreeSet<RecordId> {
        self.tracks.iter().map(|track| track.id).collect()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ReconcileReport {
    pub assets: usize,
    pub from_cache: usize,
    pub looked_up: usize,
    pub unresolved: Vec<RecordId>,
    pub index_path: String,
}

pub struct Reconciler<'a, C: CatalogClient> {
    store: &'a Store,
    client: &'a C,
}

impl<'a, C: CatalogClient> Reconciler<'a, C> {
    pub fn new(store: &'a Store, client: &'a C) -> Self {
        Self { store, client }
    }

    /// Rebuilds the library index from scratch. The disk inventory decides
    /// which ids belong in it; cached pages supply records first and the
    /// catalog is asked only for ids no cache knows about.
    pub fn reconcile(
        &self,
        sink: &dyn ProgressSink,
    ) -> Result<(LibraryIndex, ReconcileReport), CantoError> {
        emit(sink, "phase=Resolve; scanning audio library");
        let targets = InventoryScanner::new(self.store).ids()?;
        tracing::info!(assets = targets.len(), "reconciling library index");

        let mut found = self.match_cached(&targets)?;
        let from_cache = found.len();

        let missing: Vec<RecordId> = targets
            .iter()
            .filter(|id| !found.contains_key(*id))
            .copied()
            .collect();
        let mut looked_up = 0usize;
        let mut unresolved = Vec::new();
        for id in missing {
            emit(sink, format!("phase=Fetch; looking up recording {id}"));
            looked_up += 1;
            match self.lookup(id, sink)? {
                Some(record) => {
                    found.insert(id, record);
                }
                None => {
                    tracing::warn!(%id, "catalog has no record for stored asset");
                    unresolved.push(id);
                }
            }
        }

        let index = LibraryIndex::from_records(found.into_values().collect());
        emit(sink, "phase=Store; writing library index");
        let index_path = self.store.library_path();
        Store::write_json_atomic(&index_path, &index)?;

        let report = ReconcileReport {
            assets: targets.len(),
            from_cache,
            looked_up,
            unresolved,
            index_path: index_path.to_string(),
        };
        Ok((index, report))
    }

    /// First occurrence wins; caches are visited in name order so the
    /// choice is stable between runs.
    fn match_cached(
        &self,
        targets: &BTreeSet<RecordId>,
    ) -> Result<BTreeMap<RecordId, Record>, CantoError> {
        let mut found = BTreeMap::new();
        for key in self.store.list_query_keys()? {
            let cache = match QueryCache::open(self.store, &key) {
                Ok(cache) => cache,
                Err(err @ (CantoError::MissingPage { .. } | CantoError::CorruptPage { .. })) => {
                    tracing::warn!(cache = %key, error = %err, "skipping unreadable query cache");
                    continue;
                }
                Err(err) => return Err(err),
            };
            for page in cache.pages(self.store) {
                let page = match page {
                    Ok(page) => page,
                    Err(err @ (CantoError::MissingPage { .. } | CantoError::CorruptPage { .. })) => {
                        tracing::warn!(cache = %key, error = %err, "skipping unreadable page");
                        continue;
                    }
                    Err(err) => return Err(err),
                };
                for record in page.recordings {
                    if targets.contains(&record.id) {
                        found.entry(record.id).or_insert(record);
                    }
                }
            }
        }
        Ok(found)
    }

    fn lookup(&self, id: RecordId, sink: &dyn ProgressSink) -> Result<Option<Record>, CantoError> {
        let cache = QueryFetcher::new(self.store, self.client).fetch(&Filter::by_id(id), sink)?;
        let page = cache.page(self.store, 1)?;
        Ok(page.recordings.into_iter().find(|record| record.id == id))
    }
}
