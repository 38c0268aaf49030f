use std::fs;
use std::io;

use camino::Utf8PathBuf;
use serde_json::Value;

use crate::app::{ProgressSink, emit};
use crate::catalog::CatalogClient;
use crate::domain::{CatalogPage, Filter};
use crate::error::CantoError;
use crate::store::Store;

/// Handle to a query cache folder whose pages are numbered `1..=num_pages`.
#[derive(Debug, Clone)]
pub struct QueryCache {
    pub key: String,
    pub dir: Utf8PathBuf,
    pub num_pages: u64,
    pub num_recordings: u64,
}

impl QueryCache {
    /// Opens an existing cache by reading its first page.
    pub fn open(store: &Store, key: &str) -> Result<Self, CantoError> {
        let first = read_page(store, key, 1)?;
        Ok(Self {
            key: key.to_string(),
            dir: store.query_dir(key),
            num_pages: first.num_pages.max(1),
            num_recordings: first.num_recordings,
        })
    }

    pub fn page(&self, store: &Store, page: u64) -> Result<CatalogPage, CantoError> {
        read_page(store, &self.key, page)
    }

    /// Pages in order. A cache with missing pages yields `MissingPage` for each gap.
    pub fn pages<'a>(
        &'a self,
        store: &'a Store,
    ) -> impl Iterator<Item = Result<CatalogPage, CantoError>> + 'a {
        (1..=self.num_pages).map(move |page| self.page(store, page))
    }

    pub fn is_complete(&self, store: &Store) -> bool {
        (1..=self.num_pages).all(|page| store.page_path(&self.key, page).as_std_path().is_file())
    }
}

pub fn read_page(store: &Store, key: &str, page: u64) -> Result<CatalogPage, CantoError> {
    let path = store.page_path(key, page);
    let content = match fs::read(path.as_std_path()) {
        Ok(content) => content,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            return Err(CantoError::MissingPage {
                path: path.to_string(),
            });
        }
        Err(err) => return Err(CantoError::Filesystem(format!("read {path}: {err}"))),
    };
    serde_json::from_slice(&content).map_err(|err| CantoError::CorruptPage {
        path: path.to_string(),
        message: err.to_string(),
    })
}

pub struct QueryFetcher<'a, C: CatalogClient> {
    store: &'a Store,
    client: &'a C,
}

impl<'a, C: CatalogClient> QueryFetcher<'a, C> {
    pub fn new(store: &'a Store, client: &'a C) -> Self {
        Self { store, client }
    }

    /// Fetches every page of `filter` and overwrites the cache. Any transport
    /// failure aborts; pages already written stay numbered contiguously from 1.
    pub fn fetch(&self, filter: &Filter, sink: &dyn ProgressSink) -> Result<QueryCache, CantoError> {
        let key = filter.cache_key();
        let query = filter.url_query();
        tracing::info!(filter = %filter, cache = %key, "retrieving metadata");

        let mut page = 1u64;
        let mut num_pages = 1u64;
        let mut num_recordings = 0u64;
        while page <= num_pages {
            emit(sink, format!("phase=Fetch; metadata page {page}/{num_pages}"));
            let raw: Value = self.client.fetch_page(&query, page)?;
            let parsed: CatalogPage =
                serde_json::from_value(raw.clone()).map_err(|err| CantoError::CorruptPage {
                    path: self.store.page_path(&key, page).to_string(),
                    message: err.to_string(),
                })?;
            Store::write_json_atomic(&self.store.page_path(&key, page), &raw)?;
            tracing::debug!(page, records = parsed.recordings.len(), "stored metadata page");
            if page == 1 {
                num_pages = parsed.num_pages.max(1);
                num_recordings = parsed.num_recordings;
            }
            page += 1;
        }

        self.remove_stale_pages(&key, num_pages)?;

        Ok(QueryCache {
            dir: self.store.query_dir(&key),
            key,
            num_pages,
            num_recordings,
        })
    }

    fn remove_stale_pages(&self, key: &str, num_pages: u64) -> Result<(), CantoError> {
        let mut page = num_pages + 1;
        loop {
            let path = self.store.page_path(key, page);
            match fs::remove_file(path.as_std_path()) {
                Ok(()) => tracing::debug!(%path, "removed stale metadata page"),
                Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
                Err(err) => return Err(CantoError::Filesystem(format!("remove {path}: {err}"))),
            }
            page += 1;
        }
    }
}
