use std::collections::BTreeSet;
use std::fs;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use camino::Utf8PathBuf;
use serde::Serialize;

use crate::app::{ProgressSink, emit};
use crate::catalog::CatalogClient;
use crate::domain::{Filter, Record, RecordId};
use crate::error::CantoError;
use crate::progress::{ProgressMarker, RedownloadSet};
use crate::query::{QueryCache, QueryFetcher};
use crate::store::Store;

/// Cooperative cancellation flag, checked between transfer batches.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub struct DownloadOptions {
    pub extension: String,
    pub parallelism: usize,
    pub cancel: CancelToken,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            extension: "mp3".to_string(),
            parallelism: 1,
            cancel: CancelToken::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FailedAsset {
    pub id: RecordId,
    pub url: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DownloadReport {
    pub filter: String,
    pub cache_key: String,
    pub pages: u64,
    pub records: usize,
    pub fetched: usize,
    pub redownloaded: usize,
    pub skipped: usize,
    pub recovered_suspects: usize,
    pub failed: Vec<FailedAsset>,
    pub started_at: String,
    pub finished_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Skip,
    Fetch,
    Redownload,
}

struct Job {
    id: RecordId,
    url: String,
    destination: Utf8PathBuf,
    action: Action,
}

pub struct Downloader<'a, C: CatalogClient> {
    store: &'a Store,
    client: &'a C,
    options: &'a DownloadOptions,
}

impl<'a, C: CatalogClient> Downloader<'a, C> {
    pub fn new(store: &'a Store, client: &'a C, options: &'a DownloadOptions) -> Self {
        Self {
            store,
            client,
            options,
        }
    }

    /// Refreshes the query cache for `filter`, then makes sure every asset it
    /// references is on disk. Per-asset failures are reported, not returned.
    pub fn run(&self, filter: &Filter, sink: &dyn ProgressSink) -> Result<DownloadReport, CantoError> {
        let started_at = chrono::Utc::now().to_rfc3339();
        self.store.ensure_layout()?;

        let cache = QueryFetcher::new(self.store, self.client).fetch(filter, sink)?;
        // Read every dangling marker before this run overwrites its own.
        let mut suspects = RedownloadSet::collect(self.store)?;
        let recovered_suspects = suspects.len();
        if !suspects.is_empty() {
            emit(
                sink,
                format!("phase=Resolve; {recovered_suspects} recordings flagged from an interrupted run"),
            );
        }

        tracing::info!(
            cache = %cache.key,
            recordings = cache.num_recordings,
            pages = cache.num_pages,
            "downloading recordings"
        );
        emit(
            sink,
            format!("phase=Resolve; found {} recordings for {filter}", cache.num_recordings),
        );

        let mut report = DownloadReport {
            filter: filter.to_string(),
            cache_key: cache.key.clone(),
            pages: cache.num_pages,
            records: 0,
            fetched: 0,
            redownloaded: 0,
            skipped: 0,
            recovered_suspects,
            failed: Vec::new(),
            started_at,
            finished_at: String::new(),
        };
        self.run_pages(&cache, &mut suspects, &mut report, sink)?;
        report.finished_at = chrono::Utc::now().to_rfc3339();
        Ok(report)
    }

    fn run_pages(
        &self,
        cache: &QueryCache,
        suspects: &mut RedownloadSet,
        report: &mut DownloadReport,
        sink: &dyn ProgressSink,
    ) -> Result<(), CantoError> {
        let marker = ProgressMarker::for_cache(self.store, &cache.key);
        let batch = self.options.parallelism.max(1);
        let mut failed: BTreeSet<RecordId> = BTreeSet::new();

        for page_no in 1..=cache.num_pages {
            let page = cache.page(self.store, page_no)?;
            for chunk in page.recordings.chunks(batch) {
                if self.options.cancel.is_cancelled() {
                    tracing::warn!(cache = %cache.key, page = page_no, "download cancelled");
                    return Err(CantoError::Cancelled);
                }

                // Write-ahead: the marker names every id of this batch before any byte moves,
                // along with everything an earlier run left unconfirmed.
                let mut in_flight: BTreeSet<RecordId> =
                    chunk.iter().map(|record| record.id).collect();
                in_flight.extend(unconfirmed(&failed, suspects, &cache.key));
                marker.write(in_flight)?;

                let jobs: Vec<Job> = chunk
                    .iter()
                    .map(|record| self.plan(record, suspects))
                    .collect();
                let outcomes = self.execute(&jobs);

                for (job, outcome) in jobs.iter().zip(outcomes) {
                    report.records += 1;
                    match (job.action, outcome) {
                        (Action::Skip, _) => {
                            report.skipped += 1;
                            tracing::debug!(id = %job.id, "already present");
                        }
                        (action, Ok(())) => {
                            failed.remove(&job.id);
                            if action == Action::Redownload {
                                report.redownloaded += 1;
                                suspects.discharge(self.store, job.id, &cache.key)?;
                            } else {
                                report.fetched += 1;
                            }
                            emit(sink, format!("phase=Store; saved {}", job.destination));
                        }
                        (_, Err(err)) => {
                            tracing::warn!(id = %job.id, url = %job.url, error = %err, "asset download failed");
                            emit(sink, format!("download of {} failed: {err}", job.id));
                            failed.insert(job.id);
                            report.failed.push(FailedAsset {
                                id: job.id,
                                url: job.url.clone(),
                                error: err.to_string(),
                            });
                        }
                    }
                }
            }

            let outstanding = unconfirmed(&failed, suspects, &cache.key);
            self.finish_page(&marker, page_no, page.recordings.is_empty(), &outstanding)?;
        }
        Ok(())
    }

    /// Page completion: the marker disappears, or shrinks to the ids that still
    /// need a retry. A non-empty page without a marker means the protocol broke.
    fn finish_page(
        &self,
        marker: &ProgressMarker,
        page_no: u64,
        empty: bool,
        outstanding: &BTreeSet<RecordId>,
    ) -> Result<(), CantoError> {
        if empty {
            tracing::info!(page = page_no, "no recordings found for query page");
            return Ok(());
        }
        if !marker.exists() {
            return Err(CantoError::Consistency(format!(
                "page {page_no} finished without a progress marker at {}",
                marker.path()
            )));
        }
        if outstanding.is_empty() {
            marker.clear()?;
        } else {
            marker.write(outstanding.iter().copied())?;
        }
        Ok(())
    }

    fn plan(&self, record: &Record, suspects: &RedownloadSet) -> Job {
        let destination =
            self.store
                .asset_path(&record.category(), record.id, &self.options.extension);
        let action = if suspects.contains(record.id) {
            Action::Redownload
        } else if destination.as_std_path().is_file() {
            Action::Skip
        } else {
            Action::Fetch
        };
        Job {
            id: record.id,
            url: record.asset_url(),
            destination,
            action,
        }
    }

    fn execute(&self, jobs: &[Job]) -> Vec<Result<(), CantoError>> {
        let pending = jobs.iter().filter(|job| job.action != Action::Skip).count();
        if pending <= 1 {
            return jobs.iter().map(|job| self.transfer(job)).collect();
        }
        thread::scope(|scope| {
            let handles: Vec<_> = jobs
                .iter()
                .map(|job| scope.spawn(move || self.transfer(job)))
                .collect();
            handles
                .into_iter()
                .zip(jobs)
                .map(|(handle, job)| {
                    handle.join().unwrap_or_else(|_| {
                        Err(CantoError::AssetTransfer {
                            url: job.url.clone(),
                            message: "transfer thread panicked".to_string(),
                        })
                    })
                })
                .collect()
        })
    }

    fn transfer(&self, job: &Job) -> Result<(), CantoError> {
        if job.action == Action::Skip {
            return Ok(());
        }
        if job.url.is_empty() {
            return Err(CantoError::AssetTransfer {
                url: String::new(),
                message: format!("record {} has no asset url", job.id),
            });
        }
        if let Some(parent) = job.destination.parent() {
            fs::create_dir_all(parent.as_std_path())
                .map_err(|err| CantoError::Filesystem(err.to_string()))?;
        }
        tracing::debug!(id = %job.id, action = ?job.action, "downloading");
        self.client
            .retrieve_asset(&job.url, job.destination.as_std_path())
    }
}

/// Ids the marker of `key` must keep naming: failed transfers of this run and
/// suspects from its own earlier marker that have not been re-fetched yet.
fn unconfirmed(
    failed: &BTreeSet<RecordId>,
    suspects: &RedownloadSet,
    key: &str,
) -> BTreeSet<RecordId> {
    failed.iter().copied().chain(suspects.pending_for(key)).collect()
}
