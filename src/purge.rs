use std::collections::BTreeSet;
use std::fs;
use std::io;

use serde::Serialize;

use crate::app::{ProgressSink, emit};
use crate::catalog::CatalogClient;
use crate::domain::{RecordId, TagPredicate};
use crate::error::CantoError;
use crate::inventory::{AssetEntry, CategorySummary, InventoryScanner};
use crate::library::{ReconcileReport, Reconciler};
use crate::store::Store;

#[derive(Debug, Clone, Serialize)]
pub struct PruneReport {
    pub threshold: usize,
    pub removed: Vec<CategorySummary>,
    pub kept: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeleteReport {
    pub matched: usize,
    pub deleted: usize,
    pub pruned: Vec<CategorySummary>,
    pub reconcile: Option<ReconcileReport>,
}

pub struct Purger<'a, C: CatalogClient> {
    store: &'a Store,
    client: &'a C,
}

impl<'a, C: CatalogClient> Purger<'a, C> {
    pub fn new(store: &'a Store, client: &'a C) -> Self {
        Self { store, client }
    }

    /// Removes every category holding fewer than `min_assets` assets, whole.
    pub fn prune(
        &self,
        min_assets: usize,
        sink: &dyn ProgressSink,
    ) -> Result<PruneReport, CantoError> {
        if min_assets == 0 {
            return Err(CantoError::InvalidThreshold(min_assets));
        }
        let mut removed = Vec::new();
        let mut kept = 0usize;
        for summary in InventoryScanner::new(self.store).categories()? {
            if summary.assets >= min_assets {
                kept += 1;
                continue;
            }
            let dir = self.store.category_dir(&summary.name);
            tracing::info!(
                category = %summary.name,
                assets = summary.assets,
                threshold = min_assets,
                "removing undersized category"
            );
            emit(
                sink,
                format!(
                    "phase=Store; {} has {} recordings (< {min_assets}), deleting",
                    summary.name, summary.assets
                ),
            );
            Store::remove_dir_all(&dir)?;
            removed.push(summary);
        }
        Ok(PruneReport {
            threshold: min_assets,
            removed,
            kept,
        })
    }

    /// Deletes every stored asset whose indexed record satisfies `predicate`,
    /// in any category, then drops categories left empty. The index is rebuilt
    /// first so the match runs against what is actually on disk.
    pub fn delete(
        &self,
        predicate: &TagPredicate,
        sink: &dyn ProgressSink,
    ) -> Result<DeleteReport, CantoError> {
        if predicate.is_empty() {
            return Ok(DeleteReport {
                matched: 0,
                deleted: 0,
                pruned: Vec::new(),
                reconcile: None,
            });
        }

        let (index, reconcile) = Reconciler::new(self.store, self.client).reconcile(sink)?;
        let matched: BTreeSet<RecordId> = index
            .tracks
            .iter()
            .filter(|track| predicate.matches(track))
            .map(|track| track.id)
            .collect();
        tracing::info!(matched = matched.len(), "recordings identified for deletion");
        emit(
            sink,
            format!("phase=Verify; {} recordings identified to be deleted", matched.len()),
        );

        let doomed: Vec<AssetEntry> = InventoryScanner::new(self.store)
            .scan()?
            .filter(|entry| !matches!(entry, Ok(entry) if !matched.contains(&entry.id)))
            .collect::<Result<_, _>>()?;

        let mut deleted = 0usize;
        for entry in doomed {
            match fs::remove_file(entry.path.as_std_path()) {
                Ok(()) => deleted += 1,
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => {
                    return Err(CantoError::Filesystem(format!("remove {}: {err}", entry.path)));
                }
            }
        }
        emit(sink, format!("phase=Store; {deleted} recordings deleted"));

        let pruned = self.prune(1, sink)?.removed;
        Ok(DeleteReport {
            matched: matched.len(),
            deleted,
            pruned,
            reconcile: Some(reconcile),
        })
    }
}
