use serde::Serialize;

use crate::catalog::CatalogClient;
use crate::domain::{Filter, RecordId, TagPredicate};
use crate::download::{CancelToken, DownloadOptions, DownloadReport, Downloader};
use crate::error::CantoError;
use crate::inventory::{CategorySummary, InventoryScanner};
use crate::library::{LibraryIndex, ReconcileReport, Reconciler};
use crate::progress::ProgressMarker;
use crate::purge::{DeleteReport, PruneReport, Purger};
use crate::query::QueryFetcher;
use crate::store::Store;

#[derive(Debug, Clone, Serialize)]
pub struct MetadataResult {
    pub filter: String,
    pub cache_key: String,
    pub path: String,
    pub pages: u64,
    pub recordings: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct InterruptedQuery {
    pub cache_key: String,
    pub in_flight: Vec<RecordId>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusResult {
    pub root: String,
    pub assets: usize,
    pub categories: Vec<CategorySummary>,
    pub queries: Vec<String>,
    pub interrupted: Vec<InterruptedQuery>,
    pub indexed: Option<usize>,
}

#[derive(Debug, Clone, Copy)]
pub enum ProgressSinkKind {
    Metadata,
    Download,
    Purge,
    Reindex,
    Delete,
}

impl ProgressSinkKind {
    pub fn label(self) -> &'static str {
        match self {
            ProgressSinkKind::Metadata => "metadata",
            ProgressSinkKind::Download => "download",
            ProgressSinkKind::Purge => "purge",
            ProgressSinkKind::Reindex => "reindex",
            ProgressSinkKind::Delete => "delete",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

pub fn emit(sink: &dyn ProgressSink, message: impl Into<String>) {
    sink.event(ProgressEvent {
        message: message.into(),
    });
}

#[derive(Clone)]
pub struct App<C: CatalogClient> {
    store: Store,
    client: C,
    options: DownloadOptions,
}

impl<C: CatalogClient> App<C> {
    pub fn new(store: Store, client: C, options: DownloadOptions) -> Self {
        Self {
            store,
            client,
            options,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.options.cancel.clone()
    }

    pub fn fetch_metadata(
        &self,
        terms: &[String],
        sink: &dyn ProgressSink,
    ) -> Result<MetadataResult, CantoError> {
        let filter = Filter::parse(terms)?;
        self.store.ensure_layout()?;
        let cache = QueryFetcher::new(&self.store, &self.client).fetch(&filter, sink)?;
        Ok(MetadataResult {
            filter: filter.to_string(),
            path: cache.dir.to_string(),
            cache_key: cache.key,
            pages: cache.num_pages,
            recordings: cache.num_recordings,
        })
    }

    pub fn download(
        &self,
        terms: &[String],
        sink: &dyn ProgressSink,
    ) -> Result<DownloadReport, CantoError> {
        let filter = Filter::parse(terms)?;
        Downloader::new(&self.store, &self.client, &self.options).run(&filter, sink)
    }

    pub fn purge(
        &self,
        min_assets: usize,
        sink: &dyn ProgressSink,
    ) -> Result<PruneReport, CantoError> {
        Purger::new(&self.store, &self.client).prune(min_assets, sink)
    }

    pub fn reindex(&self, sink: &dyn ProgressSink) -> Result<ReconcileReport, CantoError> {
        self.store.ensure_layout()?;
        let (_, report) = Reconciler::new(&self.store, &self.client).reconcile(sink)?;
        Ok(report)
    }

    /// Terms are validated before anything on disk is touched.
    pub fn delete(
        &self,
        terms: &[String],
        sink: &dyn ProgressSink,
    ) -> Result<DeleteReport, CantoError> {
        let predicate = TagPredicate::parse(terms)?;
        Purger::new(&self.store, &self.client).delete(&predicate, sink)
    }

    pub fn status(&self, sink: &dyn ProgressSink) -> Result<StatusResult, CantoError> {
        emit(sink, "phase=Resolve; scanning dataset");
        let categories = InventoryScanner::new(&self.store).categories()?;
        let queries = self.store.list_query_keys()?;
        let mut interrupted = Vec::new();
        for key in &queries {
            if let Some(ids) = ProgressMarker::for_cache(&self.store, key).read()? {
                interrupted.push(InterruptedQuery {
                    cache_key: key.clone(),
                    in_flight: ids.into_iter().collect(),
                });
            }
        }
        let indexed = LibraryIndex::load(&self.store)?.map(|index| index.tracks.len());
        Ok(StatusResult {
            root: self.store.root().to_string(),
            assets: categories.iter().map(|category| category.assets).sum(),
            categories,
            queries,
            interrupted,
            indexed,
        })
    }
}
